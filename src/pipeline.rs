//! End-to-end training and prediction runs.
//!
//! Each invocation is one [`RunContext`]: validation and partitioning,
//! merging, feature preparation, clustering, the per-cluster model
//! search (clusters train in parallel), staging and promotion, and,
//! on the serving side, scoring plus the drift check. A failed remote
//! sync demotes the outcome to [`RunOutcome::SucceededSyncFailed`]
//! without touching the finished local artifacts.

use std::fs;
use std::path::Path;

use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::cluster::{split_by_cluster, ClusterAnalyzer};
use crate::config::PipelineConfig;
use crate::drift::{DriftDetector, DriftSchema, DriftVerdict};
use crate::error::Result;
use crate::frame::DataFrame;
use crate::merge::RawDataMerger;
use crate::model::metrics::audit_report;
use crate::model::search::{ClusterSearchOutcome, ModelSearch};
use crate::model::ModelFamily;
use crate::predict::{
    self, bundle_object, LoadedGeneration, Predictor, CLUSTER_OBJECT, PIPELINE_OBJECT,
};
use crate::prepare::FeaturePipeline;
use crate::run::{RunContext, RunOutcome, RunPurpose, RunRegistry, RunStage};
use crate::store::registry::{ModelRegistry, Slot};
use crate::store::ObjectStore;
use crate::validate::{RawDataPartitioner, SchemaSpec, SchemaValidator};

/// What one training run produced.
#[derive(Debug)]
pub struct TrainingReport {
    pub run_id: String,
    pub accepted_files: usize,
    pub rejected_files: usize,
    pub clusters: usize,
    /// Winning family and test AUC per cluster.
    pub winners: Vec<(ModelFamily, f64)>,
    /// `None` when the remote sync failed.
    pub promoted_to: Option<Slot>,
    pub outcome: RunOutcome,
}

/// What one prediction run produced.
#[derive(Debug)]
pub struct PredictionReport {
    pub run_id: String,
    pub accepted_files: usize,
    pub rejected_files: usize,
    pub scored_rows: usize,
    pub drift: Option<DriftVerdict>,
    pub outcome: RunOutcome,
}

pub struct TrainingPipeline<'a> {
    config: &'a PipelineConfig,
    runs: &'a RunRegistry,
    store: &'a dyn ObjectStore,
}

impl<'a> TrainingPipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        runs: &'a RunRegistry,
        store: &'a dyn ObjectStore,
    ) -> Self {
        Self {
            config,
            runs,
            store,
        }
    }

    /// Train on every raw file in `inbox`.
    pub fn run(&self, inbox: &Path) -> Result<TrainingReport> {
        let ctx = RunContext::new(RunPurpose::Training, &self.config.artifact_root);
        self.runs.register(&ctx);
        info!(run_id = ctx.run_id(), "training run started");
        match self.execute(&ctx, inbox) {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(run_id = ctx.run_id(), error = %e, "training run failed");
                self.runs.fail(ctx.run_id(), e.to_string());
                Err(e)
            }
        }
    }

    fn execute(&self, ctx: &RunContext, inbox: &Path) -> Result<TrainingReport> {
        self.runs.enter_stage(ctx.run_id(), RunStage::Validation);
        let schema = SchemaSpec::load(&self.config.schema_path)?;
        let partitioner = RawDataPartitioner::new(SchemaValidator::new(schema));
        let summary = partitioner.run(ctx, inbox)?;
        copy_report_for_dashboard(self.config, ctx)?;

        self.runs.enter_stage(ctx.run_id(), RunStage::Merge);
        let merged_path = ctx.merged_file_path();
        let merged = RawDataMerger::new(self.config).run(&ctx.good_partition_dir(), &merged_path)?;

        self.runs.enter_stage(ctx.run_id(), RunStage::Preparation);
        let mut pipeline =
            FeaturePipeline::new(&self.config.prepare, &self.config.label_column);
        let prepared = pipeline.fit_transform(&merged)?;
        let model_dir = ctx.model_dir();
        pipeline.save(&model_dir.join(PIPELINE_OBJECT))?;

        self.runs.enter_stage(ctx.run_id(), RunStage::Clustering);
        let analyzer = ClusterAnalyzer::new(&self.config.cluster);
        let (annotated, cluster_model) = analyzer.fit(&prepared, &self.config.label_column)?;
        cluster_model.save(&model_dir.join(CLUSTER_OBJECT))?;

        self.runs.enter_stage(ctx.run_id(), RunStage::ModelSearch);
        let pieces = split_by_cluster(
            &annotated,
            &self.config.cluster.cluster_column,
            cluster_model.k,
        )?;
        let mut outcomes: Vec<ClusterSearchOutcome> = pieces
            .par_iter()
            .enumerate()
            .map(|(c, piece)| {
                ModelSearch::new(&self.config.search).run(c, piece, &self.config.label_column)
            })
            .collect::<Result<_>>()?;
        outcomes.sort_by_key(|o| o.cluster);
        self.write_search_artifacts(ctx, &outcomes)?;
        self.runs.mark_trained(ctx.run_id());

        self.runs.enter_stage(ctx.run_id(), RunStage::Promotion);
        let winners: Vec<(ModelFamily, f64)> = outcomes
            .iter()
            .map(|o| (o.winner.family, o.winner.metrics.roc_auc))
            .collect();
        let (promoted_to, outcome) = match self.sync_remote(ctx, &merged_path, &outcomes) {
            Ok(slot) => {
                self.runs.mark_synced(ctx.run_id());
                (Some(slot), RunOutcome::Succeeded)
            }
            Err(e) => {
                warn!(run_id = ctx.run_id(), error = %e, "remote sync failed, local results kept");
                (None, RunOutcome::SucceededSyncFailed)
            }
        };
        self.runs.finish(ctx.run_id(), outcome);
        info!(
            run_id = ctx.run_id(),
            clusters = cluster_model.k,
            slot = promoted_to.map(Slot::name),
            "training run finished"
        );
        Ok(TrainingReport {
            run_id: ctx.run_id().to_string(),
            accepted_files: summary.accepted.len(),
            rejected_files: summary.rejected.len(),
            clusters: cluster_model.k,
            winners,
            promoted_to,
            outcome,
        })
    }

    /// Per-cluster result tables and audit reports under the run's
    /// model directory, plus a hyperparameter-free copy of the best
    /// table for the dashboard.
    fn write_search_artifacts(
        &self,
        ctx: &RunContext,
        outcomes: &[ClusterSearchOutcome],
    ) -> Result<()> {
        let model_dir = ctx.model_dir();
        fs::create_dir_all(&model_dir)?;
        let all: Vec<_> = outcomes
            .iter()
            .map(|o| {
                serde_json::json!({
                    "cluster": o.cluster,
                    "candidates": o.candidates,
                })
            })
            .collect();
        fs::write(
            model_dir.join("search_results.json"),
            serde_json::to_string_pretty(&all)?,
        )?;
        let best: Vec<_> = outcomes
            .iter()
            .map(|o| {
                serde_json::json!({
                    "cluster": o.cluster,
                    "family": o.winner.family,
                    "params": o.winner.params,
                    "cv_auc": o.winner.cv_auc,
                    "metrics": o.winner.metrics,
                })
            })
            .collect();
        fs::write(
            model_dir.join("best_models.json"),
            serde_json::to_string_pretty(&best)?,
        )?;

        for o in outcomes {
            // Each fitted candidate gets a confusion-matrix audit file
            // that lives only until the run log has consumed it. The
            // winner keeps a durable copy next to the result tables.
            for candidate in &o.candidates {
                let report = audit_report(o.cluster, candidate.family.name(), &candidate.metrics);
                let path = model_dir.join(format!(
                    "cluster_{}_{}_audit.txt",
                    o.cluster,
                    candidate.family.name()
                ));
                fs::write(&path, &report)?;
                for line in report.lines() {
                    info!(cluster = o.cluster, "{line}");
                }
                fs::remove_file(&path)?;
            }
            let report = audit_report(o.cluster, o.winner.family.name(), &o.winner.metrics);
            fs::write(
                model_dir.join(format!("cluster_{}_evaluation.txt", o.cluster)),
                report,
            )?;
        }

        // Dashboard copy without hyperparameters.
        let dashboard = self.config.artifact_root.join("dashboard");
        fs::create_dir_all(&dashboard)?;
        let public: Vec<_> = outcomes
            .iter()
            .map(|o| {
                serde_json::json!({
                    "cluster": o.cluster,
                    "family": o.winner.family,
                    "metrics": o.winner.metrics,
                })
            })
            .collect();
        fs::write(
            dashboard.join(format!("best_models_{}.json", ctx.run_id())),
            serde_json::to_string_pretty(&public)?,
        )?;
        Ok(())
    }

    /// Stage the generation, flip the slot pointer, and archive the
    /// training batch. Any error here is a sync failure, not a run
    /// failure.
    fn sync_remote(
        &self,
        ctx: &RunContext,
        merged_path: &Path,
        outcomes: &[ClusterSearchOutcome],
    ) -> Result<Slot> {
        let registry = ModelRegistry::new(self.store);
        let model_dir = ctx.model_dir();

        let mut objects = vec![
            (
                PIPELINE_OBJECT.to_string(),
                fs::read(model_dir.join(PIPELINE_OBJECT))?,
            ),
            (
                CLUSTER_OBJECT.to_string(),
                fs::read(model_dir.join(CLUSTER_OBJECT))?,
            ),
        ];
        for o in outcomes {
            objects.push((
                bundle_object(o.cluster),
                serde_json::to_vec(&o.bundle)?,
            ));
        }
        let aucs: Vec<f64> = outcomes.iter().map(|o| o.winner.metrics.roc_auc).collect();
        registry.stage(ctx.run_id(), &aucs, objects)?;
        let slot = registry.promote(ctx.run_id(), self.config.promotion.auc_threshold)?;
        registry.upload_training_data(ctx.run_id(), fs::read(merged_path)?)?;
        Ok(slot)
    }
}

pub struct PredictionPipeline<'a> {
    config: &'a PipelineConfig,
    runs: &'a RunRegistry,
    store: &'a dyn ObjectStore,
}

impl<'a> PredictionPipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        runs: &'a RunRegistry,
        store: &'a dyn ObjectStore,
    ) -> Self {
        Self {
            config,
            runs,
            store,
        }
    }

    /// Score every raw file in `inbox` with the current champion.
    pub fn run(&self, inbox: &Path) -> Result<PredictionReport> {
        let ctx = RunContext::new(RunPurpose::Prediction, &self.config.artifact_root);
        self.runs.register(&ctx);
        info!(run_id = ctx.run_id(), "prediction run started");
        match self.execute(&ctx, inbox) {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(run_id = ctx.run_id(), error = %e, "prediction run failed");
                self.runs.fail(ctx.run_id(), e.to_string());
                Err(e)
            }
        }
    }

    fn execute(&self, ctx: &RunContext, inbox: &Path) -> Result<PredictionReport> {
        self.runs.enter_stage(ctx.run_id(), RunStage::Validation);
        let schema = SchemaSpec::load(&self.config.schema_path)?;
        let partitioner = RawDataPartitioner::new(SchemaValidator::new(schema));
        let summary = partitioner.run(ctx, inbox)?;
        copy_report_for_dashboard(self.config, ctx)?;

        self.runs.enter_stage(ctx.run_id(), RunStage::Merge);
        let mut batch =
            RawDataMerger::new(self.config).run(&ctx.good_partition_dir(), &ctx.merged_file_path())?;
        // Deduplicate once up front so the scored rows, the feedback
        // table, and the retraining reference all align row for row.
        batch.dedup_rows();

        self.runs.enter_stage(ctx.run_id(), RunStage::Scoring);
        let registry = ModelRegistry::new(self.store);
        registry.sync_cache(Slot::Champion, &self.config.model_cache_dir)?;
        let generation = LoadedGeneration::load(&self.config.model_cache_dir)?;
        let predictor = Predictor::new(&generation, self.config.class_labels.clone());
        let rows = predictor.predict(&batch)?;

        predict::write_predictions(&ctx.artifact_dir().join("predictions.csv"), &batch, &rows)?;
        predict::write_feedback(
            &ctx.artifact_dir().join("predictions_with_confidence.csv"),
            &batch,
            &rows,
        )?;
        let reference_csv = predict::retraining_reference(&batch, &rows)?;
        fs::write(
            ctx.artifact_dir().join("retraining_reference.csv"),
            &reference_csv,
        )?;
        if let Err(e) =
            registry.upload_retraining_reference(ctx.run_id(), reference_csv.into_bytes())
        {
            warn!(run_id = ctx.run_id(), error = %e, "retraining reference upload failed");
        }

        self.runs.enter_stage(ctx.run_id(), RunStage::DriftCheck);
        let drift = self.check_drift(ctx, &generation.manifest.run_id, &batch)?;

        self.runs.finish(ctx.run_id(), RunOutcome::Succeeded);
        info!(
            run_id = ctx.run_id(),
            rows = rows.len(),
            "prediction run finished"
        );
        Ok(PredictionReport {
            run_id: ctx.run_id().to_string(),
            accepted_files: summary.accepted.len(),
            rejected_files: summary.rejected.len(),
            scored_rows: rows.len(),
            drift,
            outcome: RunOutcome::Succeeded,
        })
    }

    /// Compare the batch against the champion's archived training data.
    /// A missing reference only disables the check; it never fails the
    /// scoring run.
    fn check_drift(
        &self,
        ctx: &RunContext,
        champion_run_id: &str,
        batch: &DataFrame,
    ) -> Result<Option<DriftVerdict>> {
        let schema = match DriftSchema::load(&self.config.drift.schema_path) {
            Ok(schema) => schema,
            Err(e) => {
                warn!(error = %e, "drift schema unavailable, check skipped");
                return Ok(None);
            }
        };
        let key = format!("artifacts/training_data/{champion_run_id}.csv");
        let bytes = match self.store.get(&key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "training reference unavailable, drift check skipped");
                return Ok(None);
            }
        };
        let reference_path = ctx.artifact_dir().join("drift_reference.csv");
        fs::write(&reference_path, bytes)?;
        let reference = DataFrame::read_csv(&reference_path, Some(self.config.id_column.as_str()))?;
        let verdict = DriftDetector::new(&self.config.drift).evaluate(&schema, &reference, batch)?;
        Ok(Some(verdict))
    }
}

fn copy_report_for_dashboard(config: &PipelineConfig, ctx: &RunContext) -> Result<()> {
    let dashboard = config.artifact_root.join("dashboard");
    fs::create_dir_all(&dashboard)?;
    let target = dashboard.join(format!("validation_report_{}.csv", ctx.run_id()));
    fs::copy(ctx.validation_report_path(), &target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::InMemoryStore;
    use std::fmt::Write as FmtWrite;
    use tempfile::tempdir;

    const SENSORS: usize = 4;

    fn write_schema(path: &Path) {
        let mut cols = String::new();
        let _ = write!(cols, "\"Wafer\": \"varchar\"");
        for i in 1..=SENSORS {
            let _ = write!(cols, ", \"Sensor-{i}\": \"float\"");
        }
        let _ = write!(cols, ", \"Good/Bad\": \"int\"");
        fs::write(
            path,
            format!(
                "{{\"NumberofColumns\": {}, \"ColName\": {{{cols}}}}}",
                SENSORS + 2
            ),
        )
        .unwrap();
    }

    /// Two separable sensor regimes with labels tied to Sensor-2.
    fn write_training_file(path: &Path, offset: f64) {
        let mut text = String::new();
        let _ = write!(text, "Wafer");
        for i in 1..=SENSORS {
            let _ = write!(text, ",Sensor-{i}");
        }
        let _ = writeln!(text, ",Good/Bad");
        for i in 0..30 {
            let base = if i % 2 == 0 { 0.0 } else { 40.0 };
            let good = i % 4 < 2;
            let _ = writeln!(
                text,
                "wafer-{offset}-{i},{},{},{},{},{}",
                base + i as f64 * 0.01 + offset,
                if good { -1.0 } else { 1.0 },
                base * 0.5 + i as f64 * 0.02,
                base + 1.0,
                if good { -1 } else { 1 }
            );
        }
        fs::write(path, text).unwrap();
    }

    fn write_prediction_file(path: &Path) {
        let mut text = String::new();
        let _ = write!(text, "Wafer");
        for i in 1..=SENSORS {
            let _ = write!(text, ",Sensor-{i}");
        }
        let _ = writeln!(text, ",Good/Bad");
        for i in 0..10 {
            let base = if i % 2 == 0 { 0.0 } else { 40.0 };
            let _ = writeln!(
                text,
                "wafer-p{i},{},{},{},{},{}",
                base + i as f64 * 0.01,
                if i % 4 < 2 { -1.0 } else { 1.0 },
                base * 0.5,
                base + 1.0,
                if i % 4 < 2 { -1 } else { 1 }
            );
        }
        fs::write(path, text).unwrap();
    }

    fn test_config(root: &Path) -> PipelineConfig {
        let schema_path = root.join("schema.json");
        write_schema(&schema_path);
        PipelineConfig {
            schema_path,
            artifact_root: root.join("artifacts"),
            store_root: root.join("object_store"),
            model_cache_dir: root.join("model_cache"),
            search: crate::config::SearchConfig {
                n_iter: 1,
                ..Default::default()
            },
            cluster: crate::config::ClusterConfig {
                max_k: 5,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn training_run_promotes_a_first_champion() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let inbox = dir.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        write_training_file(&inbox.join("wafer_15062023_143210.csv"), 0.0);
        write_training_file(&inbox.join("wafer_16062023_090000.csv"), 0.1);

        let runs = RunRegistry::new();
        let store = InMemoryStore::new();
        let report = TrainingPipeline::new(&config, &runs, &store)
            .run(&inbox)
            .unwrap();

        assert_eq!(report.accepted_files, 2);
        assert_eq!(report.promoted_to, Some(Slot::Champion));
        assert_eq!(report.outcome, RunOutcome::Succeeded);
        assert!(report.clusters >= 2);
        assert_eq!(report.winners.len(), report.clusters);

        let record = runs.get(&report.run_id).unwrap();
        assert!(record.trained_locally);
        assert!(record.synced);

        // Dashboard copies exist.
        let dashboard = config.artifact_root.join("dashboard");
        assert!(dashboard
            .join(format!("validation_report_{}.csv", report.run_id))
            .exists());
        assert!(dashboard
            .join(format!("best_models_{}.json", report.run_id))
            .exists());

        // The merged training batch was archived remotely.
        assert!(store
            .exists(&format!("artifacts/training_data/{}.csv", report.run_id))
            .unwrap());
    }

    #[test]
    fn candidate_audit_files_are_consumed_by_the_log() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let inbox = dir.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        write_training_file(&inbox.join("wafer_15062023_143210.csv"), 0.0);

        let runs = RunRegistry::new();
        let store = InMemoryStore::new();
        let report = TrainingPipeline::new(&config, &runs, &store)
            .run(&inbox)
            .unwrap();

        let model_dir = config.artifact_root.join(&report.run_id).join("model_data");
        let leftovers: Vec<_> = fs::read_dir(&model_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.ends_with("_audit.txt"))
            .collect();
        assert!(leftovers.is_empty(), "audit files survived: {leftovers:?}");

        // The winner's evaluation stays durable.
        for cluster in 0..report.clusters {
            assert!(model_dir
                .join(format!("cluster_{cluster}_evaluation.txt"))
                .exists());
        }
    }

    #[test]
    fn prediction_run_scores_with_the_champion() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let runs = RunRegistry::new();
        let store = InMemoryStore::new();

        let train_inbox = dir.path().join("train_inbox");
        fs::create_dir_all(&train_inbox).unwrap();
        write_training_file(&train_inbox.join("wafer_15062023_143210.csv"), 0.0);
        TrainingPipeline::new(&config, &runs, &store)
            .run(&train_inbox)
            .unwrap();

        let predict_inbox = dir.path().join("predict_inbox");
        fs::create_dir_all(&predict_inbox).unwrap();
        write_prediction_file(&predict_inbox.join("wafer_17062023_110000.csv"));

        let report = PredictionPipeline::new(&config, &runs, &store)
            .run(&predict_inbox)
            .unwrap();
        assert_eq!(report.scored_rows, 10);
        assert_eq!(report.outcome, RunOutcome::Succeeded);

        let artifact_dir = config.artifact_root.join(&report.run_id);
        let predictions = fs::read_to_string(artifact_dir.join("predictions.csv")).unwrap();
        assert!(predictions.starts_with("id,prediction"));
        assert_eq!(predictions.lines().count(), 11);
        assert!(artifact_dir.join("predictions_with_confidence.csv").exists());
        assert!(store
            .exists(&format!("artifacts/retraining_data/{}.csv", report.run_id))
            .unwrap());
    }

    #[test]
    fn prediction_without_a_champion_fails_the_run() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let inbox = dir.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        write_prediction_file(&inbox.join("wafer_17062023_110000.csv"));

        let runs = RunRegistry::new();
        let store = InMemoryStore::new();
        let result = PredictionPipeline::new(&config, &runs, &store).run(&inbox);
        assert!(result.is_err());
    }

    #[test]
    fn empty_inbox_fails_and_records_the_error() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let inbox = dir.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();

        let runs = RunRegistry::new();
        let store = InMemoryStore::new();
        let result = TrainingPipeline::new(&config, &runs, &store).run(&inbox);
        assert!(matches!(result, Err(Error::EmptyInbox(_))));
    }
}
