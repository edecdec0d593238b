//! Quantile-band outlier clipping.
//!
//! Bounds are learned once at fit time from the training percentiles
//! widened by an IQR multiple, then applied verbatim to every later
//! batch. Values outside the band are clamped, never dropped, so the
//! row count is preserved.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::DataFrame;

/// Linear-interpolation percentile over the finite entries of `values`.
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantileClipper {
    lower_quantile: f64,
    upper_quantile: f64,
    iqr_multiplier: f64,
    columns: Vec<String>,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
}

impl QuantileClipper {
    pub fn new(lower_quantile: f64, upper_quantile: f64, iqr_multiplier: f64) -> Self {
        Self {
            lower_quantile,
            upper_quantile,
            iqr_multiplier,
            columns: Vec::new(),
            lower_bounds: Vec::new(),
            upper_bounds: Vec::new(),
        }
    }

    pub fn fit(&mut self, frame: &DataFrame) {
        self.columns = frame.columns().to_vec();
        self.lower_bounds.clear();
        self.upper_bounds.clear();
        for name in &self.columns {
            let col = frame.column(name).expect("column listed in frame");
            let values: Vec<f64> = col.iter().copied().collect();
            let lo = percentile(&values, self.lower_quantile);
            let hi = percentile(&values, self.upper_quantile);
            let iqr = hi - lo;
            self.lower_bounds.push(lo - self.iqr_multiplier * iqr);
            self.upper_bounds.push(hi + self.iqr_multiplier * iqr);
        }
    }

    pub fn transform(&self, frame: &DataFrame) -> Result<DataFrame> {
        if self.columns.is_empty() {
            return Err(Error::InvalidParameter(
                "quantile clipper used before fit".into(),
            ));
        }
        let mut out = frame.select_columns(&self.columns)?;
        for (idx, _) in self.columns.iter().enumerate() {
            let lo = self.lower_bounds[idx];
            let hi = self.upper_bounds[idx];
            if !lo.is_finite() || !hi.is_finite() {
                continue;
            }
            for v in out.data_mut().column_mut(idx).iter_mut() {
                if v.is_finite() {
                    *v = v.clamp(lo, hi);
                }
            }
        }
        Ok(out)
    }
}
