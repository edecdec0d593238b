//! Bagged random forest over the shared regression tree.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::tree::{RegressionTree, TreeParams};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 8,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl RandomForest {
    pub fn fit(
        x: &Array2<f64>,
        y: &Array1<f64>,
        params: RandomForestParams,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let n = x.nrows();
        if n != y.len() || n == 0 {
            return Err(Error::ShapeMismatch {
                expected: vec![y.len()],
                got: vec![n],
            });
        }
        let targets: Vec<f64> = y.to_vec();
        let mtry = (x.ncols() as f64).sqrt().ceil() as usize;
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            max_features: Some(mtry.max(1)),
        };
        let trees = (0..params.n_estimators)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
                RegressionTree::fit(x, &targets, &bootstrap, tree_params, rng)
            })
            .collect();
        Ok(Self {
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
                let mean = self
                    .trees
                    .iter()
                    .map(|t| t.predict_row(&row))
                    .sum::<f64>()
                    / self.trees.len().max(1) as f64;
                mean.clamp(0.0, 1.0)
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
    fn learns_a_nonlinear_boundary() {
        // XOR-like layout a single linear cut cannot separate.
        let x = array![
            [0.0, 0.0],
            [0.1, 0.1],
            [1.0, 1.0],
            [0.9, 1.1],
            [0.0, 1.0],
            [0.1, 0.9],
            [1.0, 0.0],
            [1.1, 0.1],
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let mut rng = StdRng::seed_from_u64(42);
        let forest = RandomForest::fit(
            &x,
            &y,
            RandomForestParams {
                n_estimators: 50,
                max_depth: 4,
                min_samples_leaf: 1,
            },
            &mut rng,
        )
        .unwrap();
        let p = forest.predict_proba(&x).unwrap();
        for (i, &prob) in p.iter().enumerate() {
            if y[i] == 1.0 {
                assert!(prob > 0.5, "row {i} scored {prob}");
            } else {
                assert!(prob < 0.5, "row {i} scored {prob}");
            }
        }
    }

    #[test]
    fn probabilities_stay_in_unit_interval() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut rng = StdRng::seed_from_u64(42);
        let forest = RandomForest::fit(&x, &y, RandomForestParams::default(), &mut rng).unwrap();
        let p = forest.predict_proba(&array![[-100.0], [100.0]]).unwrap();
        assert!(p.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }
}
