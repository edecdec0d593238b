//! Declarative pipeline configuration
//!
//! One YAML document describes a deployment: where the schema lives, where
//! artifacts go, and the thresholds the lifecycle stages use. Loaded once
//! and threaded through every stage via [`crate::run::RunContext`]; no
//! stage reads ambient global state.
//!
//! # Example
//!
//! ```yaml
//! schema_path: config/training_schema.json
//! artifact_root: artifacts
//! store_root: object_store
//! promotion:
//!   auc_threshold: 0.95
//! drift:
//!   share_threshold: 0.30
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Full pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// JSON schema file the raw-file validator checks against.
    pub schema_path: PathBuf,
    /// Root directory for per-run local artifacts.
    pub artifact_root: PathBuf,
    /// Root directory of the filesystem-backed object store.
    pub store_root: PathBuf,
    /// Local cache directory the serving path syncs champion bundles into.
    pub model_cache_dir: PathBuf,
    /// Legacy identifier column name found in raw files.
    pub raw_id_column: String,
    /// Canonical identifier column name after merging.
    pub id_column: String,
    /// Legacy label column name found in raw files.
    pub raw_label_column: String,
    /// Canonical label column name after merging.
    pub label_column: String,
    /// Human-readable class names for predictions, index 0 and 1.
    pub class_labels: [String; 2],
    pub prepare: PrepareConfig,
    pub cluster: ClusterConfig,
    pub search: SearchConfig,
    pub promotion: PromotionConfig,
    pub drift: DriftConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema_path: PathBuf::from("config/training_schema.json"),
            artifact_root: PathBuf::from("artifacts"),
            store_root: PathBuf::from("object_store"),
            model_cache_dir: PathBuf::from("prediction_models"),
            raw_id_column: "Wafer".into(),
            id_column: "id".into(),
            raw_label_column: "Good/Bad".into(),
            label_column: "output".into(),
            class_labels: ["Working".into(), "NotWorking".into()],
            prepare: PrepareConfig::default(),
            cluster: ClusterConfig::default(),
            search: SearchConfig::default(),
            promotion: PromotionConfig::default(),
            drift: DriftConfig::default(),
        }
    }
}

/// Feature-preparation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepareConfig {
    /// Columns dropped outright before any fitting.
    pub unwanted_columns: Vec<String>,
    /// Columns with a higher missing share are dropped before imputation.
    pub max_missing_share: f64,
    /// Neighbors for KNN imputation.
    pub knn_neighbors: usize,
    /// Skewness band outside which a power transform is applied.
    pub skew_limit: f64,
    /// Clip bound percentiles.
    pub lower_percentile: f64,
    pub upper_percentile: f64,
    /// IQR multiplier for clip bounds.
    pub iqr_multiplier: f64,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            unwanted_columns: vec!["id".into()],
            max_missing_share: 0.5,
            knn_neighbors: 5,
            skew_limit: 1.0,
            lower_percentile: 0.05,
            upper_percentile: 0.95,
            iqr_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Elbow search range upper bound (inclusive).
    pub max_k: usize,
    /// Name of the appended cluster-id row attribute.
    pub cluster_column: String,
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_k: 10,
            cluster_column: "cluster".into(),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Sampled configurations per classifier family.
    pub n_iter: usize,
    /// Stratified cross-validation folds.
    pub cv_folds: usize,
    /// Held-out share of each cluster's data.
    pub test_size: f64,
    /// PCA retained-variance target.
    pub pca_variance: f64,
    /// SMOTE neighbor count.
    pub smote_neighbors: usize,
    pub seed: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            n_iter: 10,
            cv_folds: 5,
            test_size: 0.2,
            pca_variance: 0.99,
            smote_neighbors: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Every cluster's winning AUC must clear this to replace a champion.
    pub auc_threshold: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            auc_threshold: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Verdict fires when the drifted-column share exceeds this.
    pub share_threshold: f64,
    /// Per-column KS significance level.
    pub alpha: f64,
    /// Reference schema file (target, numeric features, id column).
    pub schema_path: PathBuf,
    /// Where the HTML drift report is written on detection.
    pub report_path: PathBuf,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            share_threshold: 0.30,
            alpha: 0.05,
            schema_path: PathBuf::from("config/drift_schema.json"),
            report_path: PathBuf::from("reports/drift_report.html"),
        }
    }
}

impl PipelineConfig {
    /// Load from a YAML file and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: PipelineConfig =
            serde_yaml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.search.test_size) || self.search.test_size == 0.0 {
            return Err(Error::Config(format!(
                "search.test_size must be in (0, 1), got {}",
                self.search.test_size
            )));
        }
        if self.search.cv_folds < 2 {
            return Err(Error::Config("search.cv_folds must be at least 2".into()));
        }
        if self.search.smote_neighbors < 1 {
            return Err(Error::Config(
                "search.smote_neighbors must be at least 1".into(),
            ));
        }
        if self.cluster.max_k < 3 {
            return Err(Error::Config(
                "cluster.max_k below 3 cannot produce an elbow".into(),
            ));
        }
        if self.prepare.lower_percentile >= self.prepare.upper_percentile {
            return Err(Error::Config(
                "prepare.lower_percentile must be below upper_percentile".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.promotion.auc_threshold) {
            return Err(Error::Config(
                "promotion.auc_threshold must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.drift.share_threshold) {
            return Err(Error::Config(
                "drift.share_threshold must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}
