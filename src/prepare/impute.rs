//! K-nearest-neighbour imputation of missing feature values.
//!
//! Columns missing more than the configured share of their entries are
//! dropped outright at fit time; the remaining gaps are filled from the
//! `k` nearest training rows under the NaN-aware Euclidean distance.
//! The fitted training matrix is retained so that later batches are
//! imputed against the same donor pool.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::frame::DataFrame;

/// Euclidean distance over the coordinates both rows have present,
/// rescaled by the share of usable coordinates. Rows with no overlap
/// are infinitely far apart.
fn nan_euclidean(a: &[f64], b: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut present = 0usize;
    for (&x, &y) in a.iter().zip(b) {
        if x.is_finite() && y.is_finite() {
            sum += (x - y) * (x - y);
            present += 1;
        }
    }
    if present == 0 {
        f64::INFINITY
    } else {
        (sum * a.len() as f64 / present as f64).sqrt()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnImputer {
    n_neighbors: usize,
    max_missing_share: f64,
    columns: Vec<String>,
    dropped: Vec<String>,
    /// Training rows, kept as the donor pool for later batches.
    donors: Vec<Vec<f64>>,
    /// Per-column mean over the donors, the fallback when no donor has
    /// a value for the target coordinate.
    column_means: Vec<f64>,
}

impl KnnImputer {
    pub fn new(n_neighbors: usize, max_missing_share: f64) -> Self {
        Self {
            n_neighbors,
            max_missing_share,
            columns: Vec::new(),
            dropped: Vec::new(),
            donors: Vec::new(),
            column_means: Vec::new(),
        }
    }

    /// Columns removed at fit time for exceeding the missing-share cap.
    pub fn dropped_columns(&self) -> &[String] {
        &self.dropped
    }

    pub fn fit(&mut self, frame: &DataFrame) {
        let n_rows = frame.n_rows() as f64;
        self.columns.clear();
        self.dropped.clear();
        for name in frame.columns() {
            let col = frame.column(name).expect("column listed in frame");
            let missing = col.iter().filter(|v| !v.is_finite()).count() as f64;
            if n_rows > 0.0 && missing / n_rows > self.max_missing_share {
                debug!(column = %name, share = missing / n_rows, "dropping sparse column");
                self.dropped.push(name.clone());
            } else {
                self.columns.push(name.clone());
            }
        }
        if !self.dropped.is_empty() {
            info!(dropped = self.dropped.len(), "columns over the missing-value cap removed");
        }

        let kept = frame
            .select_columns(&self.columns)
            .expect("kept columns come from the frame");
        self.donors = kept
            .data()
            .rows()
            .into_iter()
            .map(|r| r.to_vec())
            .collect();
        self.column_means = (0..self.columns.len())
            .map(|c| {
                let present: Vec<f64> = self
                    .donors
                    .iter()
                    .map(|r| r[c])
                    .filter(|v| v.is_finite())
                    .collect();
                if present.is_empty() {
                    0.0
                } else {
                    present.iter().sum::<f64>() / present.len() as f64
                }
            })
            .collect();
    }

    pub fn transform(&self, frame: &DataFrame) -> Result<DataFrame> {
        if self.columns.is_empty() {
            return Err(Error::InvalidParameter("imputer used before fit".into()));
        }
        let mut out = frame.select_columns(&self.columns)?;
        let n_rows = out.n_rows();
        let n_cols = self.columns.len();

        let mut filled = Array2::zeros((n_rows, n_cols));
        let mut imputed_cells = 0usize;
        for (r, row) in out.data().rows().into_iter().enumerate() {
            let row: Vec<f64> = row.to_vec();
            if row.iter().all(|v| v.is_finite()) {
                for c in 0..n_cols {
                    filled[(r, c)] = row[c];
                }
                continue;
            }
            // Donors ranked once per incomplete row.
            let mut ranked: Vec<(f64, usize)> = self
                .donors
                .iter()
                .enumerate()
                .map(|(i, d)| (nan_euclidean(&row, d), i))
                .collect();
            ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            for c in 0..n_cols {
                if row[c].is_finite() {
                    filled[(r, c)] = row[c];
                    continue;
                }
                let neighbours: Vec<f64> = ranked
                    .iter()
                    .filter(|&&(dist, i)| dist.is_finite() && self.donors[i][c].is_finite())
                    .take(self.n_neighbors)
                    .map(|&(_, i)| self.donors[i][c])
                    .collect();
                filled[(r, c)] = if neighbours.is_empty() {
                    self.column_means[c]
                } else {
                    neighbours.iter().sum::<f64>() / neighbours.len() as f64
                };
                imputed_cells += 1;
            }
        }
        if imputed_cells > 0 {
            debug!(cells = imputed_cells, "missing values imputed");
        }
        *out.data_mut() = filled;
        Ok(out)
    }
}
