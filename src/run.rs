//! Per-run context and status tracking
//!
//! Every pipeline invocation gets its own [`RunContext`]: a fresh run id,
//! its own artifact directory tree, and its own entry in the
//! [`RunRegistry`]. Nothing here is process-global: two concurrent runs
//! cannot clobber each other's completion state, and a caller polls a
//! run's record by id instead of reading a shared flag.
//!
//! # Example
//!
//! ```
//! use sentinela::run::{RunContext, RunPurpose, RunRegistry, RunStage};
//!
//! let registry = RunRegistry::new();
//! let ctx = RunContext::new(RunPurpose::Training, "artifacts".as_ref());
//! registry.register(&ctx);
//! registry.enter_stage(ctx.run_id(), RunStage::Validation);
//! let record = registry.get(ctx.run_id()).unwrap();
//! assert_eq!(record.stage, RunStage::Validation);
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// What a run is for; decides partition layout and archival behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPurpose {
    Training,
    Prediction,
}

impl RunPurpose {
    fn dir_name(self) -> &'static str {
        match self {
            RunPurpose::Training => "training_data",
            RunPurpose::Prediction => "prediction_data",
        }
    }
}

/// Lifecycle stage a run is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStage {
    Created,
    Validation,
    Merge,
    Preparation,
    Clustering,
    ModelSearch,
    Promotion,
    Scoring,
    DriftCheck,
    Finished,
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    InProgress,
    Succeeded,
    /// Local results are complete but the remote sync failed; the run
    /// still counts as trained and is never rolled back.
    SucceededSyncFailed,
    Failed,
}

/// Immutable per-run context threaded through every stage call.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    purpose: RunPurpose,
    started_at: DateTime<Utc>,
    artifact_dir: PathBuf,
}

impl RunContext {
    /// Create a context with a fresh run id under `artifact_root`.
    pub fn new(purpose: RunPurpose, artifact_root: &Path) -> Self {
        let started_at = Utc::now();
        let nonce: u32 = rand::rng().random_range(0..0x1_0000);
        let run_id = format!("{}_{nonce:04x}", started_at.format("%d_%m_%Y_%H_%M_%S"));
        let artifact_dir = artifact_root.join(&run_id);
        Self {
            run_id,
            purpose,
            started_at,
            artifact_dir,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn purpose(&self) -> RunPurpose {
        self.purpose
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Root of this run's local artifacts.
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    pub fn good_partition_dir(&self) -> PathBuf {
        self.artifact_dir
            .join(self.purpose.dir_name())
            .join("good_raw_data")
    }

    pub fn bad_partition_dir(&self) -> PathBuf {
        self.artifact_dir
            .join(self.purpose.dir_name())
            .join("bad_raw_data")
    }

    pub fn validation_report_path(&self) -> PathBuf {
        self.artifact_dir.join("validation_report.csv")
    }

    pub fn merged_file_path(&self) -> PathBuf {
        self.artifact_dir
            .join(self.purpose.dir_name())
            .join("merged.csv")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.artifact_dir.join("model_data")
    }
}

/// Mutable status record for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub purpose: RunPurpose,
    pub started_at: DateTime<Utc>,
    pub stage: RunStage,
    pub outcome: RunOutcome,
    /// Set once local training artifacts are complete.
    pub trained_locally: bool,
    /// Set once the remote sync for *this* run finished.
    pub synced: bool,
    pub error: Option<String>,
}

/// Thread-safe registry of run status records, keyed by run id.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    records: Arc<RwLock<HashMap<String, RunRecord>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ctx: &RunContext) {
        let record = RunRecord {
            run_id: ctx.run_id().to_string(),
            purpose: ctx.purpose(),
            started_at: ctx.started_at(),
            stage: RunStage::Created,
            outcome: RunOutcome::InProgress,
            trained_locally: false,
            synced: false,
            error: None,
        };
        self.records
            .write()
            .expect("run registry poisoned")
            .insert(record.run_id.clone(), record);
    }

    pub fn get(&self, run_id: &str) -> Option<RunRecord> {
        self.records
            .read()
            .expect("run registry poisoned")
            .get(run_id)
            .cloned()
    }

    pub fn enter_stage(&self, run_id: &str, stage: RunStage) {
        self.update(run_id, |r| r.stage = stage);
    }

    pub fn mark_trained(&self, run_id: &str) {
        self.update(run_id, |r| r.trained_locally = true);
    }

    pub fn mark_synced(&self, run_id: &str) {
        self.update(run_id, |r| r.synced = true);
    }

    pub fn finish(&self, run_id: &str, outcome: RunOutcome) {
        self.update(run_id, |r| {
            r.stage = RunStage::Finished;
            r.outcome = outcome;
        });
    }

    pub fn fail(&self, run_id: &str, error: impl Into<String>) {
        let error = error.into();
        self.update(run_id, move |r| {
            r.outcome = RunOutcome::Failed;
            r.error = Some(error.clone());
        });
    }

    fn update(&self, run_id: &str, f: impl Fn(&mut RunRecord)) {
        if let Some(record) = self
            .records
            .write()
            .expect("run registry poisoned")
            .get_mut(run_id)
        {
            f(record);
        }
    }
}
