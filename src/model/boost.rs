//! Gradient boosting with logistic loss.
//!
//! Each stage fits the shared regression tree to the current negative
//! gradient (the residual between labels and predicted probabilities)
//! and is added with shrinkage. Scores start from the log-odds of the
//! base rate.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::tree::{RegressionTree, TreeParams};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GradientBoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    init_score: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl GradientBoosting {
    pub fn fit(
        x: &Array2<f64>,
        y: &Array1<f64>,
        params: GradientBoostingParams,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let n = x.nrows();
        if n != y.len() || n == 0 {
            return Err(Error::ShapeMismatch {
                expected: vec![y.len()],
                got: vec![n],
            });
        }
        let positive_rate = y.iter().filter(|&&v| v == 1.0).count() as f64 / n as f64;
        let clamped = positive_rate.clamp(1e-6, 1.0 - 1e-6);
        let init_score = (clamped / (1.0 - clamped)).ln();

        let indices: Vec<usize> = (0..n).collect();
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: 1,
            max_features: None,
        };

        let mut scores = vec![init_score; n];
        let mut trees = Vec::with_capacity(params.n_estimators);
        for _ in 0..params.n_estimators {
            let residuals: Vec<f64> = scores
                .iter()
                .zip(y.iter())
                .map(|(&s, &label)| label - sigmoid(s))
                .collect();
            let tree = RegressionTree::fit(x, &residuals, &indices, tree_params, rng);
            for (i, score) in scores.iter_mut().enumerate() {
                *score += params.learning_rate * tree.predict_row(&x.row(i).to_vec());
            }
            trees.push(tree);
        }
        Ok(Self {
            init_score,
            learning_rate: params.learning_rate,
            trees,
            n_features: x.ncols(),
        })
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(Error::ShapeMismatch {
                expected: vec![self.n_features],
                got: vec![x.ncols()],
            });
        }
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let row = row.to_vec();
                let score = self.init_score
                    + self.learning_rate
                        * self.trees.iter().map(|t| t.predict_row(&row)).sum::<f64>();
                sigmoid(score)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn fits_a_threshold_boundary() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [10.0], [11.0], [12.0], [13.0]];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let mut rng = StdRng::seed_from_u64(42);
        let gb = GradientBoosting::fit(&x, &y, GradientBoostingParams::default(), &mut rng)
            .unwrap();
        let p = gb.predict_proba(&array![[1.5], [11.5]]).unwrap();
        assert!(p[0] < 0.2, "got {}", p[0]);
        assert!(p[1] > 0.8, "got {}", p[1]);
    }

    #[test]
    fn starts_from_the_base_rate() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![1.0, 1.0, 1.0, 0.0];
        let mut rng = StdRng::seed_from_u64(42);
        let gb = GradientBoosting::fit(
            &x,
            &y,
            GradientBoostingParams {
                n_estimators: 0,
                ..Default::default()
            },
            &mut rng,
        )
        .unwrap();
        let p = gb.predict_proba(&array![[5.0]]).unwrap();
        assert!((p[0] - 0.75).abs() < 1e-9);
    }
}
