//! Data drift detection between the training reference and a serving
//! batch.
//!
//! Each monitored numeric feature is compared with a two-sample
//! Kolmogorov-Smirnov test; a feature counts as drifted when its
//! p-value falls under the significance level. The batch verdict fires
//! when the share of drifted features exceeds the configured
//! threshold, and a standalone HTML report is written for review.

use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DriftConfig;
use crate::error::{Error, Result};
use crate::frame::DataFrame;

/// Which columns drift monitoring looks at, loaded from a JSON file
/// alongside the training schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSchema {
    pub target: String,
    pub numerical_features: Vec<String>,
    pub id: String,
}

impl DriftSchema {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read drift schema {path:?}: {e}")))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// One feature's test outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDrift {
    pub column: String,
    pub statistic: f64,
    pub p_value: f64,
    pub drifted: bool,
}

/// The batch-level verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftVerdict {
    pub drift_detected: bool,
    pub share_of_drifted_columns: f64,
    pub threshold: f64,
    pub columns: Vec<ColumnDrift>,
}

/// Two-sample Kolmogorov-Smirnov statistic over finite values.
fn ks_statistic(a: &[f64], b: &[f64]) -> f64 {
    let mut a: Vec<f64> = a.iter().copied().filter(|v| v.is_finite()).collect();
    let mut b: Vec<f64> = b.iter().copied().filter(|v| v.is_finite()).collect();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (mut i, mut j) = (0usize, 0usize);
    let mut max_gap = 0.0f64;
    while i < a.len() && j < b.len() {
        let value = a[i].min(b[j]);
        while i < a.len() && a[i] <= value {
            i += 1;
        }
        while j < b.len() && b[j] <= value {
            j += 1;
        }
        let gap = (i as f64 / a.len() as f64 - j as f64 / b.len() as f64).abs();
        if gap > max_gap {
            max_gap = gap;
        }
    }
    max_gap
}

/// Asymptotic p-value of the two-sample KS statistic (the Kolmogorov
/// distribution tail, truncated when the terms vanish).
fn ks_p_value(statistic: f64, n1: usize, n2: usize) -> f64 {
    if n1 == 0 || n2 == 0 || statistic <= 0.0 {
        return 1.0;
    }
    let en = ((n1 * n2) as f64 / (n1 + n2) as f64).sqrt();
    let lambda = (en + 0.12 + 0.11 / en) * statistic;
    let mut sum = 0.0;
    for k in 1..=100 {
        let term = 2.0 * (-1.0f64).powi(k as i32 + 1) * (-2.0 * lambda * lambda * (k * k) as f64).exp();
        sum += term;
        if term.abs() < 1e-10 {
            break;
        }
    }
    sum.clamp(0.0, 1.0)
}

pub struct DriftDetector<'a> {
    config: &'a DriftConfig,
}

impl<'a> DriftDetector<'a> {
    pub fn new(config: &'a DriftConfig) -> Self {
        Self { config }
    }

    /// Compare `current` against `reference` over the schema's
    /// monitored features. Features absent from either frame are
    /// skipped with a warning rather than failing the batch.
    pub fn evaluate(
        &self,
        schema: &DriftSchema,
        reference: &DataFrame,
        current: &DataFrame,
    ) -> Result<DriftVerdict> {
        let mut columns = Vec::new();
        for feature in &schema.numerical_features {
            let (Some(ref_col), Some(cur_col)) =
                (reference.column(feature), current.column(feature))
            else {
                warn!(column = %feature, "monitored feature missing from a frame, skipped");
                continue;
            };
            let ref_values = ref_col.to_vec();
            let cur_values = cur_col.to_vec();
            let statistic = ks_statistic(&ref_values, &cur_values);
            let p_value = ks_p_value(
                statistic,
                ref_col.iter().filter(|v| v.is_finite()).count(),
                cur_col.iter().filter(|v| v.is_finite()).count(),
            );
            let drifted = p_value < self.config.alpha;
            debug!(column = %feature, statistic, p_value, drifted, "feature tested");
            columns.push(ColumnDrift {
                column: feature.clone(),
                statistic,
                p_value,
                drifted,
            });
        }
        if columns.is_empty() {
            return Err(Error::Schema(
                "no monitored feature present in both frames".into(),
            ));
        }

        let share =
            columns.iter().filter(|c| c.drifted).count() as f64 / columns.len() as f64;
        let verdict = DriftVerdict {
            drift_detected: share > self.config.share_threshold,
            share_of_drifted_columns: share,
            threshold: self.config.share_threshold,
            columns,
        };
        info!(
            share,
            detected = verdict.drift_detected,
            "drift evaluation finished"
        );
        if verdict.drift_detected {
            self.write_report(&verdict)?;
        }
        Ok(verdict)
    }

    fn write_report(&self, verdict: &DriftVerdict) -> Result<()> {
        let html = render_report(verdict);
        if let Some(parent) = self.config.report_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.config.report_path, html)?;
        info!(path = ?self.config.report_path, "drift report written");
        Ok(())
    }
}

fn render_report(verdict: &DriftVerdict) -> String {
    let mut html = String::new();
    let _ = writeln!(html, "<!DOCTYPE html>");
    let _ = writeln!(html, "<html><head><title>Data Drift Report</title>");
    let _ = writeln!(
        html,
        "<style>body{{font-family:sans-serif}}table{{border-collapse:collapse}}\
         td,th{{border:1px solid #999;padding:4px 8px}}.drift{{background:#fdd}}</style>"
    );
    let _ = writeln!(html, "</head><body>");
    let _ = writeln!(html, "<h1>Data Drift Report</h1>");
    let _ = writeln!(
        html,
        "<p>Drifted share: <b>{:.1}%</b> (threshold {:.1}%)</p>",
        verdict.share_of_drifted_columns * 100.0,
        verdict.threshold * 100.0
    );
    let _ = writeln!(
        html,
        "<table><tr><th>Feature</th><th>KS statistic</th><th>p-value</th><th>Drifted</th></tr>"
    );
    for col in &verdict.columns {
        let _ = writeln!(
            html,
            "<tr{}><td>{}</td><td>{:.4}</td><td>{:.4}</td><td>{}</td></tr>",
            if col.drifted { " class=\"drift\"" } else { "" },
            col.column,
            col.statistic,
            col.p_value,
            if col.drifted { "yes" } else { "no" }
        );
    }
    let _ = writeln!(html, "</table></body></html>");
    html
}
