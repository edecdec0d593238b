//! Serving path: score a validated prediction batch with the cached
//! champion generation.
//!
//! The cached generation holds the fitted feature pipeline, the
//! cluster routing model, and one model bundle per cluster. Rows are
//! prepared with the training-time pipeline, routed to their cluster,
//! and scored by that cluster's winner. Besides the plain prediction
//! table, a confidence-annotated feedback table and a
//! predictions-joined-with-inputs retraining reference are produced.

use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cluster::ClusterModel;
use crate::error::{Error, Result};
use crate::frame::DataFrame;
use crate::model::search::ModelBundle;
use crate::prepare::FeaturePipeline;
use crate::store::registry::GenerationManifest;

pub const PIPELINE_OBJECT: &str = "feature_pipeline.json";
pub const CLUSTER_OBJECT: &str = "cluster_model.json";
pub const MANIFEST_OBJECT: &str = "manifest.json";

pub fn bundle_object(cluster: usize) -> String {
    format!("cluster_{cluster}/model_bundle.json")
}

/// A generation loaded back from the local cache.
pub struct LoadedGeneration {
    pub manifest: GenerationManifest,
    pub pipeline: FeaturePipeline,
    pub clusters: ClusterModel,
    pub bundles: Vec<ModelBundle>,
}

impl LoadedGeneration {
    pub fn load(cache_dir: &Path) -> Result<Self> {
        let manifest: GenerationManifest =
            serde_json::from_str(&fs::read_to_string(cache_dir.join(MANIFEST_OBJECT))?)?;
        let pipeline = FeaturePipeline::load(&cache_dir.join(PIPELINE_OBJECT))?;
        let clusters = ClusterModel::load(&cache_dir.join(CLUSTER_OBJECT))?;
        let bundles = (0..manifest.clusters)
            .map(|c| ModelBundle::load(&cache_dir.join(bundle_object(c))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            manifest,
            pipeline,
            clusters,
            bundles,
        })
    }
}

/// One scored row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRow {
    pub id: Option<String>,
    pub cluster: usize,
    /// Human-readable class label.
    pub prediction: String,
    /// Probability of the predicted class, rounded to two decimals.
    pub confidence: f64,
}

pub struct Predictor<'a> {
    generation: &'a LoadedGeneration,
    /// Class label strings indexed by encoded class.
    class_labels: [String; 2],
}

impl<'a> Predictor<'a> {
    pub fn new(generation: &'a LoadedGeneration, class_labels: [String; 2]) -> Self {
        Self {
            generation,
            class_labels,
        }
    }

    /// Score a merged, validated prediction batch. Row order of the
    /// output matches the prepared input.
    pub fn predict(&self, batch: &DataFrame) -> Result<Vec<PredictionRow>> {
        let prepared = self.generation.pipeline.transform(batch)?;
        let routes = self.generation.clusters.predict(&prepared)?;
        // A labelled batch still scores on the fitted feature set.
        let features = prepared.select_columns(self.generation.clusters.columns())?;

        let mut rows: Vec<Option<PredictionRow>> = vec![None; prepared.n_rows()];
        for cluster in 0..self.generation.bundles.len() {
            let indices: Vec<usize> = routes
                .iter()
                .enumerate()
                .filter(|(_, &c)| c == cluster)
                .map(|(i, _)| i)
                .collect();
            if indices.is_empty() {
                continue;
            }
            let piece = features.select_rows(&indices);
            let scores = self.generation.bundles[cluster].predict_proba(piece.data())?;
            for (&row_idx, &p) in indices.iter().zip(scores.iter()) {
                let class = usize::from(p >= 0.5);
                let confidence = if class == 1 { p } else { 1.0 - p };
                rows[row_idx] = Some(PredictionRow {
                    id: prepared.ids().map(|ids| ids[row_idx].clone()),
                    cluster,
                    prediction: self.class_labels[class].clone(),
                    confidence: (confidence * 100.0).round() / 100.0,
                });
            }
        }
        let rows: Vec<PredictionRow> = rows
            .into_iter()
            .map(|r| {
                r.ok_or_else(|| {
                    Error::InvalidParameter("row routed to a cluster with no model".into())
                })
            })
            .collect::<Result<_>>()?;
        info!(rows = rows.len(), "prediction batch scored");
        Ok(rows)
    }
}

fn id_header(batch: &DataFrame) -> &str {
    batch.id_name().unwrap_or("row")
}

fn id_cell(row: &PredictionRow, index: usize) -> String {
    row.id.clone().unwrap_or_else(|| index.to_string())
}

/// The plain prediction table.
pub fn write_predictions(path: &Path, batch: &DataFrame, rows: &[PredictionRow]) -> Result<()> {
    let mut out = String::new();
    let _ = writeln!(out, "{},prediction", id_header(batch));
    for (i, row) in rows.iter().enumerate() {
        let _ = writeln!(out, "{},{}", id_cell(row, i), row.prediction);
    }
    write_table(path, &out)
}

/// The feedback table with per-row confidence.
pub fn write_feedback(path: &Path, batch: &DataFrame, rows: &[PredictionRow]) -> Result<()> {
    let mut out = String::new();
    let _ = writeln!(out, "{},prediction,confidence,cluster", id_header(batch));
    for (i, row) in rows.iter().enumerate() {
        let _ = writeln!(
            out,
            "{},{},{:.2},{}",
            id_cell(row, i),
            row.prediction,
            row.confidence,
            row.cluster
        );
    }
    write_table(path, &out)
}

/// Raw input columns joined with the prediction, the seed of a later
/// retraining batch. Returns the CSV text so the caller can both keep
/// it locally and upload it.
pub fn retraining_reference(batch: &DataFrame, rows: &[PredictionRow]) -> Result<String> {
    if batch.n_rows() != rows.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![batch.n_rows()],
            got: vec![rows.len()],
        });
    }
    let mut out = String::new();
    let _ = write!(out, "{}", id_header(batch));
    for column in batch.columns() {
        let _ = write!(out, ",{column}");
    }
    let _ = writeln!(out, ",prediction");
    for (i, row) in rows.iter().enumerate() {
        let _ = write!(out, "{}", id_cell(row, i));
        for value in batch.data().row(i) {
            let _ = write!(out, ",{value}");
        }
        let _ = writeln!(out, ",{}", row.prediction);
    }
    Ok(out)
}

fn write_table(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterAnalyzer;
    use crate::config::{ClusterConfig, PrepareConfig, SearchConfig};
    use crate::model::search::ModelSearch;
    use chrono::Utc;
    use ndarray::Array2;

    /// Build a tiny but complete generation in memory: two separated
    /// blobs, each with its own perfectly learnable label rule.
    fn generation_and_batch() -> (LoadedGeneration, DataFrame) {
        let mut rows: Vec<[f64; 3]> = Vec::new();
        for i in 0..20 {
            let jitter = i as f64 * 0.01;
            // Blob A around 0; class follows the second feature.
            rows.push([jitter, if i % 2 == 0 { -1.0 } else { 1.0 }, (i % 2) as f64]);
            // Blob B around 50.
            rows.push([
                50.0 + jitter,
                if i % 2 == 0 { -1.0 } else { 1.0 },
                (i % 2) as f64,
            ]);
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let ids: Vec<String> = (0..rows.len()).map(|i| format!("wafer-{i}")).collect();
        let frame = DataFrame::new(
            vec!["s1".into(), "s2".into(), "output".into()],
            Array2::from_shape_vec((rows.len(), 3), flat).unwrap(),
        )
        .with_ids("Wafer", ids);

        let mut pipeline = FeaturePipeline::new(&PrepareConfig::default(), "output");
        let prepared = pipeline.fit_transform(&frame).unwrap();

        let cluster_config = ClusterConfig::default();
        let (annotated, clusters) = ClusterAnalyzer::new(&cluster_config)
            .fit(&prepared, "output")
            .unwrap();
        let pieces =
            crate::cluster::split_by_cluster(&annotated, &cluster_config.cluster_column, clusters.k)
                .unwrap();
        let search_config = SearchConfig {
            n_iter: 2,
            ..Default::default()
        };
        let bundles: Vec<ModelBundle> = pieces
            .iter()
            .enumerate()
            .map(|(c, piece)| {
                ModelSearch::new(&search_config)
                    .run(c, piece, "output")
                    .unwrap()
                    .bundle
            })
            .collect();

        let generation = LoadedGeneration {
            manifest: GenerationManifest {
                run_id: "test-run".into(),
                clusters: clusters.k,
                winning_auc: vec![1.0; clusters.k],
                objects: vec![],
                created_at: Utc::now(),
            },
            pipeline,
            clusters,
            bundles,
        };

        // A label-free batch resembling both blobs.
        let batch_rows = vec![
            [0.05, -1.0],
            [0.05, 1.0],
            [50.05, -1.0],
            [50.05, 1.0],
        ];
        let flat: Vec<f64> = batch_rows.iter().flatten().copied().collect();
        let batch = DataFrame::new(
            vec!["s1".into(), "s2".into()],
            Array2::from_shape_vec((4, 2), flat).unwrap(),
        )
        .with_ids(
            "Wafer",
            (0..4).map(|i| format!("w{i}")).collect(),
        );
        (generation, batch)
    }

    fn labels() -> [String; 2] {
        ["Working".into(), "NotWorking".into()]
    }

    #[test]
    fn scores_every_row_with_a_label_and_confidence() {
        let (generation, batch) = generation_and_batch();
        let rows = Predictor::new(&generation, labels()).predict(&batch).unwrap();
        assert_eq!(rows.len(), 4);
        for row in &rows {
            assert!(row.prediction == "Working" || row.prediction == "NotWorking");
            assert!((0.5..=1.0).contains(&row.confidence));
            assert!(row.id.as_deref().unwrap().starts_with('w'));
        }
    }

    #[test]
    fn confidence_is_rounded_to_two_decimals() {
        let (generation, batch) = generation_and_batch();
        let rows = Predictor::new(&generation, labels()).predict(&batch).unwrap();
        for row in &rows {
            let scaled = row.confidence * 100.0;
            assert!((scaled - scaled.round()).abs() < 1e-9);
        }
    }

    #[test]
    fn tables_carry_the_wafer_ids() {
        let dir = tempfile::tempdir().unwrap();
        let (generation, batch) = generation_and_batch();
        let rows = Predictor::new(&generation, labels()).predict(&batch).unwrap();

        let predictions = dir.path().join("predictions.csv");
        write_predictions(&predictions, &batch, &rows).unwrap();
        let text = fs::read_to_string(&predictions).unwrap();
        assert!(text.starts_with("Wafer,prediction"));
        assert!(text.contains("w0,"));

        let feedback = dir.path().join("feedback.csv");
        write_feedback(&feedback, &batch, &rows).unwrap();
        let text = fs::read_to_string(&feedback).unwrap();
        assert!(text.contains("confidence"));
        assert!(text.contains("cluster"));
    }

    #[test]
    fn retraining_reference_joins_inputs_and_outputs() {
        let (generation, batch) = generation_and_batch();
        let rows = Predictor::new(&generation, labels()).predict(&batch).unwrap();
        let csv = retraining_reference(&batch, &rows).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), "Wafer,s1,s2,prediction");
        let first = lines.next().unwrap();
        assert!(first.starts_with("w0,"));
        assert!(first.ends_with("Working") || first.ends_with("NotWorking"));
    }
}
