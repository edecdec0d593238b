//! Per-feature standardisation fitted on the training split.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let means: Vec<f64> = (0..x.ncols())
            .map(|c| x.column(c).sum() / n)
            .collect();
        let stds: Vec<f64> = (0..x.ncols())
            .map(|c| {
                let mean = means[c];
                let var = x.column(c).iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                if std > f64::EPSILON {
                    std
                } else {
                    1.0
                }
            })
            .collect();
        Self { means, stds }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.means.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![self.means.len()],
                got: vec![x.ncols()],
            });
        }
        let mut out = x.clone();
        for c in 0..out.ncols() {
            let mean = self.means[c];
            let std = self.stds[c];
            out.column_mut(c).mapv_inplace(|v| (v - mean) / std);
        }
        Ok(out)
    }

    pub fn fit_transform(x: &Array2<f64>) -> (Self, Array2<f64>) {
        let scaler = Self::fit(x);
        let out = scaler.transform(x).expect("fit input always matches");
        (scaler, out)
    }

    pub fn means(&self) -> Array1<f64> {
        Array1::from_vec(self.means.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standardises_to_zero_mean_unit_variance() {
        let x = array![[1.0, 100.0], [2.0, 200.0], [3.0, 300.0]];
        let (_, out) = StandardScaler::fit_transform(&x);
        for c in 0..2 {
            let mean = out.column(c).sum() / 3.0;
            let var = out.column(c).iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 3.0;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn constant_column_is_left_finite() {
        let x = array![[5.0], [5.0], [5.0]];
        let (_, out) = StandardScaler::fit_transform(&x);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn rejects_wrong_width() {
        let scaler = StandardScaler::fit(&array![[1.0, 2.0]]);
        assert!(scaler.transform(&array![[1.0]]).is_err());
    }
}
