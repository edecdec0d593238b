//! Feature preparation.
//!
//! A [`FeaturePipeline`] is fitted once on a merged training batch and
//! then applied, with the same learned state, to every later batch.
//! The ordered stages are duplicate-row removal, unwanted-column
//! removal, zero-variance removal, k-nearest-neighbour imputation,
//! Yeo-Johnson normalisation of skewed columns, and quantile-band
//! clipping. Applying the fitted pipeline to its own fit input
//! reproduces the fit output exactly.

pub mod impute;
pub mod outlier;
pub mod power;

use std::fs;
use std::path::Path;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PrepareConfig;
use crate::error::{Error, Result};
use crate::frame::DataFrame;
use impute::KnnImputer;
use outlier::QuantileClipper;
use power::PowerTransform;

/// Drops columns whose training values never vary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZeroVarianceDropper {
    kept: Vec<String>,
    dropped: Vec<String>,
}

impl ZeroVarianceDropper {
    pub fn fit(&mut self, frame: &DataFrame) {
        self.kept.clear();
        self.dropped.clear();
        for name in frame.columns() {
            let col = frame.column(name).expect("column listed in frame");
            let finite: Vec<f64> = col.iter().copied().filter(|v| v.is_finite()).collect();
            let varies = match finite.first() {
                Some(&first) => finite.iter().any(|&v| (v - first).abs() > f64::EPSILON),
                None => false,
            };
            if varies {
                self.kept.push(name.clone());
            } else {
                self.dropped.push(name.clone());
            }
        }
        if !self.dropped.is_empty() {
            debug!(dropped = self.dropped.len(), "constant columns removed");
        }
    }

    pub fn transform(&self, frame: &DataFrame) -> Result<DataFrame> {
        if self.kept.is_empty() {
            return Err(Error::InvalidParameter(
                "zero-variance dropper used before fit".into(),
            ));
        }
        frame.select_columns(&self.kept)
    }

    pub fn dropped_columns(&self) -> &[String] {
        &self.dropped
    }
}

/// The fitted, serialisable feature-preparation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturePipeline {
    unwanted_columns: Vec<String>,
    label_column: String,
    variance: ZeroVarianceDropper,
    imputer: KnnImputer,
    power: PowerTransform,
    clipper: QuantileClipper,
    fitted: bool,
}

impl FeaturePipeline {
    pub fn new(config: &PrepareConfig, label_column: &str) -> Self {
        Self {
            unwanted_columns: config.unwanted_columns.clone(),
            label_column: label_column.to_string(),
            variance: ZeroVarianceDropper::default(),
            imputer: KnnImputer::new(config.knn_neighbors, config.max_missing_share),
            power: PowerTransform::new(config.skew_limit),
            clipper: QuantileClipper::new(
                config.lower_percentile,
                config.upper_percentile,
                config.iqr_multiplier,
            ),
            fitted: false,
        }
    }

    /// Fit every stage on `frame` and return the prepared output.
    pub fn fit_transform(&mut self, frame: &DataFrame) -> Result<DataFrame> {
        let mut df = frame.clone();
        let removed = df.dedup_rows();
        if removed > 0 {
            info!(removed, "duplicate rows dropped");
        }
        df.drop_columns(&self.unwanted_columns);
        let label = self.split_label(&mut df);

        self.variance.fit(&df);
        let df = self.variance.transform(&df)?;
        self.imputer.fit(&df);
        let df = self.imputer.transform(&df)?;
        self.power.fit(&df);
        let df = self.power.transform(&df)?;
        self.clipper.fit(&df);
        let mut df = self.clipper.transform(&df)?;

        self.fitted = true;
        self.reattach_label(&mut df, label);
        info!(
            rows = df.n_rows(),
            features = df.n_cols(),
            "feature preparation fitted"
        );
        Ok(df)
    }

    /// Apply the fitted stages to a new batch.
    pub fn transform(&self, frame: &DataFrame) -> Result<DataFrame> {
        if !self.fitted {
            return Err(Error::InvalidParameter(
                "feature pipeline used before fit".into(),
            ));
        }
        let mut df = frame.clone();
        df.dedup_rows();
        df.drop_columns(&self.unwanted_columns);
        let label = self.split_label(&mut df);

        let df = self.variance.transform(&df)?;
        let df = self.imputer.transform(&df)?;
        let df = self.power.transform(&df)?;
        let mut df = self.clipper.transform(&df)?;

        self.reattach_label(&mut df, label);
        Ok(df)
    }

    /// Column name the pipeline treats as the label.
    pub fn label_column(&self) -> &str {
        &self.label_column
    }

    fn split_label(&self, df: &mut DataFrame) -> Option<Array1<f64>> {
        df.take_column(&self.label_column)
    }

    fn reattach_label(&self, df: &mut DataFrame, label: Option<Array1<f64>>) {
        if let Some(values) = label {
            df.push_column(&self.label_column, values);
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
