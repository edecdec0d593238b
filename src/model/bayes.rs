//! Gaussian naive Bayes.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GaussianNbParams {
    /// Added to every feature variance for numerical stability.
    pub var_smoothing: f64,
}

impl Default for GaussianNbParams {
    fn default() -> Self {
        Self {
            var_smoothing: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClassStats {
    log_prior: f64,
    means: Vec<f64>,
    variances: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianNb {
    classes: Vec<ClassStats>,
}

impl GaussianNb {
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, params: GaussianNbParams) -> Result<Self> {
        if x.nrows() != y.len() || x.nrows() == 0 {
            return Err(Error::ShapeMismatch {
                expected: vec![y.len()],
                got: vec![x.nrows()],
            });
        }
        let d = x.ncols();
        // Smoothing scales with the largest feature variance, like the
        // classic formulation.
        let max_var = (0..d)
            .map(|c| {
                let col = x.column(c);
                let mean = col.sum() / x.nrows() as f64;
                col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / x.nrows() as f64
            })
            .fold(0.0f64, f64::max);
        let epsilon = params.var_smoothing * max_var.max(f64::EPSILON);

        let mut classes = Vec::with_capacity(2);
        for class in [0.0, 1.0] {
            let members: Vec<usize> = y
                .iter()
                .enumerate()
                .filter(|(_, &v)| v == class)
                .map(|(i, _)| i)
                .collect();
            if members.is_empty() {
                return Err(Error::InvalidParameter(format!(
                    "training split has no rows of class {class}"
                )));
            }
            let n = members.len() as f64;
            let means: Vec<f64> = (0..d)
                .map(|c| members.iter().map(|&i| x[(i, c)]).sum::<f64>() / n)
                .collect();
            let variances: Vec<f64> = (0..d)
                .map(|c| {
                    members
                        .iter()
                        .map(|&i| (x[(i, c)] - means[c]).powi(2))
                        .sum::<f64>()
                        / n
                        + epsilon
                })
                .collect();
            classes.push(ClassStats {
                log_prior: (n / x.nrows() as f64).ln(),
                means,
                variances,
            });
        }
        Ok(Self { classes })
    }

    fn log_joint(&self, row: &[f64], class: &ClassStats) -> f64 {
        let mut ll = class.log_prior;
        for ((&v, &mean), &var) in row.iter().zip(&class.means).zip(&class.variances) {
            ll += -0.5 * (2.0 * std::f64::consts::PI * var).ln() - (v - mean).powi(2) / (2.0 * var);
        }
        ll
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.classes[0].means.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![self.classes[0].means.len()],
                got: vec![x.ncols()],
            });
        }
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let row = row.to_vec();
                let l0 = self.log_joint(&row, &self.classes[0]);
                let l1 = self.log_joint(&row, &self.classes[1]);
                let max = l0.max(l1);
                let e0 = (l0 - max).exp();
                let e1 = (l1 - max).exp();
                e1 / (e0 + e1)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn separates_two_gaussians() {
        let x = array![
            [0.0, 0.1],
            [0.1, 0.0],
            [-0.1, 0.05],
            [5.0, 5.1],
            [5.1, 4.9],
            [4.9, 5.0],
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let nb = GaussianNb::fit(&x, &y, GaussianNbParams::default()).unwrap();
        let p = nb.predict_proba(&array![[0.05, 0.05], [5.0, 5.0]]).unwrap();
        assert!(p[0] < 0.01);
        assert!(p[1] > 0.99);
    }

    #[test]
    fn single_class_training_is_an_error() {
        let x = array![[0.0], [1.0]];
        let y = array![1.0, 1.0];
        assert!(GaussianNb::fit(&x, &y, GaussianNbParams::default()).is_err());
    }
}
