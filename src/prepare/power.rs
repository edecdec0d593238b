//! Yeo-Johnson power transformation for skewed features.
//!
//! At fit time each column's sample skewness is measured; columns whose
//! absolute skewness exceeds the configured limit get a per-column
//! lambda chosen by maximum likelihood, and the transformed values are
//! standardised with the fit-time mean and standard deviation. Columns
//! under the limit pass through untouched.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::frame::DataFrame;

/// Bias-corrected sample skewness (the adjusted Fisher-Pearson
/// coefficient), ignoring non-finite entries.
pub fn skewness(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let n = finite.len();
    if n < 3 {
        return 0.0;
    }
    let nf = n as f64;
    let mean = finite.iter().sum::<f64>() / nf;
    let m2 = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / nf;
    let m3 = finite.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / nf;
    if m2 <= f64::EPSILON {
        return 0.0;
    }
    let g1 = m3 / m2.powf(1.5);
    g1 * (nf * (nf - 1.0)).sqrt() / (nf - 2.0)
}

/// The Yeo-Johnson mapping for a single value.
fn yeo_johnson(x: f64, lambda: f64) -> f64 {
    if x >= 0.0 {
        if lambda.abs() > 1e-10 {
            ((x + 1.0).powf(lambda) - 1.0) / lambda
        } else {
            (x + 1.0).ln()
        }
    } else if (lambda - 2.0).abs() > 1e-10 {
        -(((-x + 1.0).powf(2.0 - lambda) - 1.0) / (2.0 - lambda))
    } else {
        -(-x + 1.0).ln()
    }
}

/// Profile log-likelihood of the Yeo-Johnson model at `lambda`.
fn log_likelihood(values: &[f64], lambda: f64) -> f64 {
    let n = values.len() as f64;
    let transformed: Vec<f64> = values.iter().map(|&v| yeo_johnson(v, lambda)).collect();
    let mean = transformed.iter().sum::<f64>() / n;
    let var = transformed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if var <= 0.0 || !var.is_finite() {
        return f64::NEG_INFINITY;
    }
    let jacobian: f64 = values
        .iter()
        .map(|&v| v.signum() * (v.abs() + 1.0).ln())
        .sum();
    -0.5 * n * var.ln() + (lambda - 1.0) * jacobian
}

/// Coarse grid over [-5, 5] followed by one refinement pass around the
/// best point. Accurate to roughly 1e-3 in lambda, which is plenty for
/// a normalising transform.
fn fit_lambda(values: &[f64]) -> f64 {
    let mut best = (0.0, f64::NEG_INFINITY);
    let mut scan = |lo: f64, hi: f64, steps: usize, best: &mut (f64, f64)| {
        for i in 0..=steps {
            let lambda = lo + (hi - lo) * i as f64 / steps as f64;
            let ll = log_likelihood(values, lambda);
            if ll > best.1 {
                *best = (lambda, ll);
            }
        }
    };
    scan(-5.0, 5.0, 200, &mut best);
    let center = best.0;
    scan(center - 0.05, center + 0.05, 100, &mut best);
    best.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ColumnTransform {
    name: String,
    lambda: f64,
    mean: f64,
    std: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerTransform {
    skew_limit: f64,
    columns: Vec<String>,
    transforms: Vec<ColumnTransform>,
    fitted: bool,
}

impl PowerTransform {
    pub fn new(skew_limit: f64) -> Self {
        Self {
            skew_limit,
            columns: Vec::new(),
            transforms: Vec::new(),
            fitted: false,
        }
    }

    /// Names of the columns selected for transformation.
    pub fn transformed_columns(&self) -> Vec<&str> {
        self.transforms.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn fit(&mut self, frame: &DataFrame) {
        self.columns = frame.columns().to_vec();
        self.transforms.clear();
        for name in &self.columns {
            let col = frame.column(name).expect("column listed in frame");
            let values: Vec<f64> = col.iter().copied().filter(|v| v.is_finite()).collect();
            let skew = skewness(&values);
            if skew.abs() <= self.skew_limit || values.len() < 3 {
                continue;
            }
            let lambda = fit_lambda(&values);
            let transformed: Vec<f64> = values.iter().map(|&v| yeo_johnson(v, lambda)).collect();
            let n = transformed.len() as f64;
            let mean = transformed.iter().sum::<f64>() / n;
            let std =
                (transformed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
            debug!(column = %name, skew, lambda, "power transform selected");
            self.transforms.push(ColumnTransform {
                name: name.clone(),
                lambda,
                mean,
                std: if std > f64::EPSILON { std } else { 1.0 },
            });
        }
        self.fitted = true;
    }

    pub fn transform(&self, frame: &DataFrame) -> Result<DataFrame> {
        if !self.fitted {
            return Err(Error::InvalidParameter(
                "power transform used before fit".into(),
            ));
        }
        let mut out = frame.select_columns(&self.columns)?;
        for t in &self.transforms {
            let idx = out.column_index(&t.name).expect("selected above");
            for v in out.data_mut().column_mut(idx).iter_mut() {
                if v.is_finite() {
                    *v = (yeo_johnson(*v, t.lambda) - t.mean) / t.std;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn yeo_johnson_identity_at_lambda_one() {
        for x in [-3.0, -0.5, 0.0, 0.5, 3.0] {
            assert!((yeo_johnson(x, 1.0) - x).abs() < 1e-12);
        }
    }

    #[test]
    fn yeo_johnson_log_branch() {
        assert!((yeo_johnson(3.0, 0.0) - 4.0_f64.ln()).abs() < 1e-12);
        assert!((yeo_johnson(-3.0, 2.0) + 4.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn skewness_detects_direction() {
        let right = [1.0, 1.0, 1.0, 2.0, 2.0, 3.0, 20.0];
        let flat = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(skewness(&right) > 1.0);
        assert!(skewness(&flat).abs() < 0.1);
    }

    #[test]
    fn transform_reduces_skew_of_selected_column() {
        // Exponential-ish right tail.
        let values: Vec<f64> = (0..60).map(|i| ((i as f64) / 8.0).exp()).collect();
        let n = values.len();
        let data = Array2::from_shape_vec((n, 1), values.clone()).unwrap();
        let frame = DataFrame::new(vec!["f".into()], data);

        let mut pt = PowerTransform::new(1.0);
        pt.fit(&frame);
        assert_eq!(pt.transformed_columns(), vec!["f"]);

        let out = pt.transform(&frame).unwrap();
        let after: Vec<f64> = out.column("f").unwrap().to_vec();
        assert!(skewness(&after).abs() < skewness(&values).abs());
    }

    #[test]
    fn symmetric_column_passes_through() {
        let values = vec![-2.0, -1.0, 0.0, 1.0, 2.0, -2.0, -1.0, 0.0, 1.0, 2.0];
        let data = Array2::from_shape_vec((10, 1), values.clone()).unwrap();
        let frame = DataFrame::new(vec!["f".into()], data);

        let mut pt = PowerTransform::new(1.0);
        pt.fit(&frame);
        assert!(pt.transformed_columns().is_empty());

        let out = pt.transform(&frame).unwrap();
        assert_eq!(out.column("f").unwrap().to_vec(), values);
    }
}
