//! A small regression tree used by both ensemble families.
//!
//! Splits minimise squared error of the target, which on 0/1 targets
//! is equivalent to Gini impurity, so the same builder serves the
//! forest (class fractions at the leaves) and the boosting stages
//! (residual fits).

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means all of them.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Fit on the rows at `indices` (duplicates allowed, so a bootstrap
    /// sample is just a list with repeats).
    pub fn fit(
        x: &Array2<f64>,
        targets: &[f64],
        indices: &[usize],
        params: TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, targets, indices, params, 0, rng);
        tree
    }

    fn grow(
        &mut self,
        x: &Array2<f64>,
        targets: &[f64],
        indices: &[usize],
        params: TreeParams,
        depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let mean = indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len().max(1) as f64;
        let homogeneous = indices
            .iter()
            .all(|&i| (targets[i] - targets[indices[0]]).abs() < 1e-12);
        if depth >= params.max_depth
            || indices.len() < 2 * params.min_samples_leaf
            || homogeneous
        {
            self.nodes.push(Node::Leaf { value: mean });
            return self.nodes.len() - 1;
        }

        let n_features = x.ncols();
        let candidates: Vec<usize> = match params.max_features {
            Some(m) if m < n_features => sample(rng, n_features, m).into_vec(),
            _ => (0..n_features).collect(),
        };

        let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, score)
        for &feature in &candidates {
            let mut ordered: Vec<(f64, f64)> = indices
                .iter()
                .map(|&i| (x[(i, feature)], targets[i]))
                .collect();
            ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            let total: f64 = ordered.iter().map(|&(_, t)| t).sum();
            let n = ordered.len() as f64;
            let mut left_sum = 0.0;
            for (split, window) in ordered.windows(2).enumerate() {
                left_sum += window[0].1;
                if window[0].0 == window[1].0 {
                    continue;
                }
                let left_n = (split + 1) as f64;
                let right_n = n - left_n;
                if (left_n as usize) < params.min_samples_leaf
                    || (right_n as usize) < params.min_samples_leaf
                {
                    continue;
                }
                // Maximising between-group sum of squares minimises SSE.
                let score =
                    left_sum * left_sum / left_n + (total - left_sum) * (total - left_sum) / right_n;
                let threshold = (window[0].0 + window[1].0) / 2.0;
                if best.map_or(true, |(_, _, s)| score > s) {
                    best = Some((feature, threshold, score));
                }
            }
        }

        let Some((feature, threshold, _)) = best else {
            self.nodes.push(Node::Leaf { value: mean });
            return self.nodes.len() - 1;
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[(i, feature)] <= threshold);

        // Reserve the split slot, then grow children.
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });
        let left = self.grow(x, targets, &left_idx, params, depth + 1, rng);
        let right = self.grow(x, targets, &right_idx, params, depth + 1, rng);
        self.nodes[slot] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        slot
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut at = 0usize;
        loop {
            match &self.nodes[at] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    at = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}
