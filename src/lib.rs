//! # Sentinela: Wafer Sensor-Fault Model Lifecycle
//!
//! Sentinela takes batches of raw wafer sensor files from validation
//! through training to serving: schema-driven validation and
//! partitioning, merging, feature preparation, cluster-wise model
//! search, champion/challenger promotion over an object store, drift
//! monitoring, and batch prediction.
//!
//! ## Architecture
//!
//! - **validate**: Schema checks and good/bad partitioning of raw files
//! - **merge**: Concatenation of accepted files into one canonical frame
//! - **prepare**: Imputation, power transform, outlier clipping
//! - **cluster**: K-means segmentation with elbow-based k selection
//! - **model**: Classifier families, search, and evaluation metrics
//! - **store**: Object-store abstraction and the model registry
//! - **predict**: Champion loading and batch scoring
//! - **drift**: Two-sample distribution checks against training data
//! - **pipeline**: Training and prediction orchestration
//! - **config**: Declarative YAML configuration
//! - **run**: Per-run context and status tracking

pub mod cluster;
pub mod config;
pub mod drift;
pub mod frame;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod predict;
pub mod prepare;
pub mod run;
pub mod store;
pub mod validate;

pub mod error;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use pipeline::{PredictionPipeline, TrainingPipeline};
