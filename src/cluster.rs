//! Cluster discovery over prepared features.
//!
//! Training data is partitioned with seeded k-means; the number of
//! clusters is chosen by the knee of the inertia curve over
//! `k = 1..=max_k`. A missing knee is a hard error, never a silent
//! fallback. The fitted centroids are persisted so that inference rows
//! can be routed to the model trained for their cluster.

use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::frame::DataFrame;

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// One seeded k-means run: k-means++ initialisation followed by Lloyd
/// iterations until assignment convergence or the iteration cap.
fn kmeans(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> (Array2<f64>, Vec<usize>, f64) {
    let n = data.nrows();
    let d = data.ncols();
    let rows: Vec<Vec<f64>> = data.rows().into_iter().map(|r| r.to_vec()).collect();

    // k-means++ seeding.
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);
    centroids.push(rows[rng.random_range(0..n)].clone());
    while centroids.len() < k {
        let dists: Vec<f64> = rows
            .iter()
            .map(|r| {
                centroids
                    .iter()
                    .map(|c| squared_distance(r, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = dists.iter().sum();
        let next = if total <= f64::EPSILON {
            rng.random_range(0..n)
        } else {
            let mut target = rng.random::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &dist) in dists.iter().enumerate() {
                target -= dist;
                if target <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        };
        centroids.push(rows[next].clone());
    }

    let mut assignment = vec![0usize; n];
    for _ in 0..300 {
        let mut changed = false;
        for (i, row) in rows.iter().enumerate() {
            let nearest = centroids
                .iter()
                .enumerate()
                .map(|(c, centroid)| (c, squared_distance(row, centroid)))
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(c, _)| c)
                .unwrap_or(0);
            if assignment[i] != nearest {
                assignment[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<usize> = (0..n).filter(|&i| assignment[i] == c).collect();
            if members.is_empty() {
                // Re-seed an empty cluster on a random row.
                let farthest = sample(rng, n, 1).index(0);
                *centroid = rows[farthest].clone();
                continue;
            }
            for j in 0..d {
                centroid[j] =
                    members.iter().map(|&i| rows[i][j]).sum::<f64>() / members.len() as f64;
            }
        }
    }

    let inertia: f64 = rows
        .iter()
        .zip(&assignment)
        .map(|(r, &c)| squared_distance(r, &centroids[c]))
        .sum();
    let mut flat = Array2::zeros((k, d));
    for (c, centroid) in centroids.iter().enumerate() {
        for j in 0..d {
            flat[(c, j)] = centroid[j];
        }
    }
    (flat, assignment, inertia)
}

/// Knee of a decreasing inertia curve: the k whose point lies farthest
/// below the chord from the first to the last point. Returns `None`
/// for degenerate curves with no interior drop.
fn knee_point(inertias: &[f64]) -> Option<usize> {
    if inertias.len() < 3 {
        return None;
    }
    let n = inertias.len();
    let (x0, y0) = (1.0, inertias[0]);
    let (x1, y1) = (n as f64, inertias[n - 1]);
    let span = y0 - y1;
    if span <= f64::EPSILON {
        return None;
    }
    let norm = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
    let mut best: Option<(usize, f64)> = None;
    for (i, &y) in inertias.iter().enumerate().take(n - 1).skip(1) {
        let x = (i + 1) as f64;
        // Signed distance below the chord.
        let dist = ((y1 - y0) * x - (x1 - x0) * y + x1 * y0 - y1 * x0) / norm;
        if dist > 0.0 && best.map_or(true, |(_, d)| dist > d) {
            best = Some((i + 1, dist));
        }
    }
    best.map(|(k, _)| k)
}

/// Mean silhouette coefficient of an assignment. Quadratic in the row
/// count; wafer batches are small enough for that.
fn silhouette(data: &Array2<f64>, assignment: &[usize], k: usize) -> f64 {
    if k < 2 {
        return 0.0;
    }
    let rows: Vec<Vec<f64>> = data.rows().into_iter().map(|r| r.to_vec()).collect();
    let n = rows.len();
    let mut total = 0.0;
    let mut counted = 0usize;
    for i in 0..n {
        let own = assignment[i];
        let mut sums = vec![0.0f64; k];
        let mut counts = vec![0usize; k];
        for j in 0..n {
            if i == j {
                continue;
            }
            let dist = squared_distance(&rows[i], &rows[j]).sqrt();
            sums[assignment[j]] += dist;
            counts[assignment[j]] += 1;
        }
        if counts[own] == 0 {
            continue;
        }
        let a = sums[own] / counts[own] as f64;
        let b = (0..k)
            .filter(|&c| c != own && counts[c] > 0)
            .map(|c| sums[c] / counts[c] as f64)
            .fold(f64::INFINITY, f64::min);
        if !b.is_finite() {
            continue;
        }
        total += (b - a) / a.max(b);
        counted += 1;
    }
    if counted == 0 {
        0.0
    } else {
        total / counted as f64
    }
}

/// Persisted cluster routing model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterModel {
    pub k: usize,
    columns: Vec<String>,
    centroids: Vec<Vec<f64>>,
}

impl ClusterModel {
    /// Feature columns the model was fitted on, in fitted order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Route each row of `frame` to its nearest centroid. The frame is
    /// aligned to the fitted column order first.
    pub fn predict(&self, frame: &DataFrame) -> Result<Vec<usize>> {
        let aligned = frame.select_columns(&self.columns)?;
        Ok(aligned
            .data()
            .rows()
            .into_iter()
            .map(|row| {
                let row = row.to_vec();
                self.centroids
                    .iter()
                    .enumerate()
                    .map(|(c, centroid)| (c, squared_distance(&row, centroid)))
                    .min_by(|a, b| {
                        a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(c, _)| c)
                    .unwrap_or(0)
            })
            .collect())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// Fits the routing model and annotates training data with cluster ids.
pub struct ClusterAnalyzer<'a> {
    config: &'a ClusterConfig,
}

impl<'a> ClusterAnalyzer<'a> {
    pub fn new(config: &'a ClusterConfig) -> Self {
        Self { config }
    }

    /// Select k by the inertia knee, fit the final model, and return the
    /// frame with a dense cluster column appended.
    pub fn fit(&self, frame: &DataFrame, label_column: &str) -> Result<(DataFrame, ClusterModel)> {
        let mut features = frame.clone();
        let label = features.take_column(label_column);

        let max_k = self.config.max_k.min(features.n_rows()).max(1);
        let mut inertias = Vec::with_capacity(max_k);
        for k in 1..=max_k {
            let mut rng = StdRng::seed_from_u64(self.config.seed);
            let (_, _, inertia) = kmeans(features.data(), k, &mut rng);
            inertias.push(inertia);
        }
        let k = knee_point(&inertias).ok_or(Error::NoElbow { max_k })?;

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let (centroids, assignment, _) = kmeans(features.data(), k, &mut rng);
        let score = silhouette(features.data(), &assignment, k);
        info!(k, silhouette = score, "cluster model fitted");
        debug!(?inertias, "inertia curve");

        let model = ClusterModel {
            k,
            columns: features.columns().to_vec(),
            centroids: centroids
                .rows()
                .into_iter()
                .map(|r| r.to_vec())
                .collect(),
        };

        let mut annotated = features;
        annotated.push_column(
            &self.config.cluster_column,
            Array1::from_iter(assignment.iter().map(|&c| c as f64)),
        );
        if let Some(values) = label {
            annotated.push_column(label_column, values);
        }
        Ok((annotated, model))
    }
}

/// Split an annotated frame into per-cluster frames, densely indexed
/// from zero. The cluster column is removed from each piece.
pub fn split_by_cluster(
    frame: &DataFrame,
    cluster_column: &str,
    k: usize,
) -> Result<Vec<DataFrame>> {
    let labels = frame
        .column(cluster_column)
        .ok_or_else(|| Error::Schema(format!("missing column {cluster_column:?}")))?;
    let mut pieces = Vec::with_capacity(k);
    for c in 0..k {
        let indices: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &v)| v as usize == c)
            .map(|(i, _)| i)
            .collect();
        let mut piece = frame.select_rows(&indices);
        piece.drop_columns(&[cluster_column.to_string()]);
        pieces.push(piece);
    }
    Ok(pieces)
}
