//! Principal component analysis retaining a target variance share.
//!
//! The covariance matrix is diagonalised with cyclic Jacobi rotations,
//! which is exact and dependency-free at wafer feature counts, and the
//! leading components are kept until the requested share of variance
//! is explained.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Cyclic Jacobi eigendecomposition of a symmetric matrix. Returns
/// eigenvalues and the matrix whose columns are the eigenvectors.
fn jacobi_eigen(matrix: &Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = matrix.nrows();
    let mut a = matrix.clone();
    let mut v = Array2::eye(n);

    for _ in 0..100 {
        let mut off_diag = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off_diag += a[(p, q)] * a[(p, q)];
            }
        }
        if off_diag < 1e-18 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[(p, q)].abs() < 1e-15 {
                    continue;
                }
                let theta = (a[(q, q)] - a[(p, p)]) / (2.0 * a[(p, q)]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for i in 0..n {
                    let aip = a[(i, p)];
                    let aiq = a[(i, q)];
                    a[(i, p)] = c * aip - s * aiq;
                    a[(i, q)] = s * aip + c * aiq;
                }
                for j in 0..n {
                    let apj = a[(p, j)];
                    let aqj = a[(q, j)];
                    a[(p, j)] = c * apj - s * aqj;
                    a[(q, j)] = s * apj + c * aqj;
                }
                for i in 0..n {
                    let vip = v[(i, p)];
                    let viq = v[(i, q)];
                    v[(i, p)] = c * vip - s * viq;
                    v[(i, q)] = s * vip + c * viq;
                }
            }
        }
    }
    let eigenvalues: Vec<f64> = (0..n).map(|i| a[(i, i)]).collect();
    (eigenvalues, v)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pca {
    mean: Vec<f64>,
    /// One kept component per row, in descending eigenvalue order.
    components: Vec<Vec<f64>>,
    pub explained_variance_share: f64,
}

impl Pca {
    /// Fit on `x`, keeping the fewest leading components whose summed
    /// eigenvalues reach `variance_share` of the total.
    pub fn fit(x: &Array2<f64>, variance_share: f64) -> Result<Self> {
        if x.nrows() < 2 {
            return Err(Error::InvalidParameter(
                "PCA needs at least two rows".into(),
            ));
        }
        let n = x.nrows() as f64;
        let d = x.ncols();
        let mean: Vec<f64> = (0..d).map(|c| x.column(c).sum() / n).collect();

        let mut cov = Array2::zeros((d, d));
        for row in x.rows() {
            let centered: Vec<f64> = row.iter().zip(&mean).map(|(v, m)| v - m).collect();
            for i in 0..d {
                for j in i..d {
                    cov[(i, j)] += centered[i] * centered[j];
                }
            }
        }
        for i in 0..d {
            for j in i..d {
                let value = cov[(i, j)] / (n - 1.0);
                cov[(i, j)] = value;
                cov[(j, i)] = value;
            }
        }

        let (eigenvalues, vectors) = jacobi_eigen(&cov);
        let mut order: Vec<usize> = (0..d).collect();
        order.sort_by(|&a, &b| {
            eigenvalues[b]
                .partial_cmp(&eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let total: f64 = eigenvalues.iter().map(|&e| e.max(0.0)).sum();
        let mut kept = Vec::new();
        let mut explained = 0.0;
        for &idx in &order {
            kept.push((0..d).map(|i| vectors[(i, idx)]).collect::<Vec<f64>>());
            explained += eigenvalues[idx].max(0.0);
            if total <= f64::EPSILON || explained / total >= variance_share {
                break;
            }
        }
        debug!(
            components = kept.len(),
            share = if total > 0.0 { explained / total } else { 0.0 },
            "pca fitted"
        );
        Ok(Self {
            mean,
            components: kept,
            explained_variance_share: if total > 0.0 { explained / total } else { 0.0 },
        })
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.mean.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![self.mean.len()],
                got: vec![x.ncols()],
            });
        }
        let mut out = Array2::zeros((x.nrows(), self.components.len()));
        for (r, row) in x.rows().into_iter().enumerate() {
            let centered: Vec<f64> = row.iter().zip(&self.mean).map(|(v, m)| v - m).collect();
            for (c, component) in self.components.iter().enumerate() {
                out[(r, c)] = centered
                    .iter()
                    .zip(component)
                    .map(|(v, w)| v * w)
                    .sum::<f64>();
            }
        }
        Ok(out)
    }

    pub fn mean(&self) -> Array1<f64> {
        Array1::from_vec(self.mean.clone())
    }
}
