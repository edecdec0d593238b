//! Binary classification metrics and the evaluation audit report.

use std::fmt::Write as FmtWrite;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Confusion counts at the 0.5 threshold, rows are truth and columns
/// prediction, negative class first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative: u64,
    pub false_positive: u64,
    pub false_negative: u64,
    pub true_positive: u64,
}

impl ConfusionMatrix {
    pub fn total(&self) -> u64 {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSet {
    pub accuracy: f64,
    pub precision_positive: f64,
    pub recall_positive: f64,
    pub precision_negative: f64,
    pub recall_negative: f64,
    pub f1_positive: f64,
    pub roc_auc: f64,
    pub confusion: ConfusionMatrix,
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Area under the ROC curve via the rank statistic, with the midrank
/// correction for tied scores. Returns 0.5 when either class is
/// absent, the uninformative baseline.
pub fn roc_auc(labels: &Array1<f64>, scores: &Array1<f64>) -> Result<f64> {
    if labels.len() != scores.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![labels.len()],
            got: vec![scores.len()],
        });
    }
    let n_pos = labels.iter().filter(|&&v| v == 1.0).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Ok(0.5);
    }

    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Midranks over tied score groups.
    let mut ranks = vec![0.0f64; labels.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let midrank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = midrank;
        }
        i = j + 1;
    }

    let rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(&label, _)| label == 1.0)
        .map(|(_, &r)| r)
        .sum();
    let u = rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Ok(u / (n_pos * n_neg) as f64)
}

/// Full metric set of hard predictions plus ranking scores.
pub fn evaluate(labels: &Array1<f64>, scores: &Array1<f64>) -> Result<MetricSet> {
    let auc = roc_auc(labels, scores)?;
    let mut confusion = ConfusionMatrix::default();
    for (&label, &score) in labels.iter().zip(scores.iter()) {
        let predicted = score >= 0.5;
        match (label == 1.0, predicted) {
            (false, false) => confusion.true_negative += 1,
            (false, true) => confusion.false_positive += 1,
            (true, false) => confusion.false_negative += 1,
            (true, true) => confusion.true_positive += 1,
        }
    }
    let c = confusion;
    let precision_positive = ratio(c.true_positive, c.true_positive + c.false_positive);
    let recall_positive = ratio(c.true_positive, c.true_positive + c.false_negative);
    let f1_positive = if precision_positive + recall_positive > 0.0 {
        2.0 * precision_positive * recall_positive / (precision_positive + recall_positive)
    } else {
        0.0
    };
    Ok(MetricSet {
        accuracy: ratio(c.true_negative + c.true_positive, c.total()),
        precision_positive,
        recall_positive,
        precision_negative: ratio(c.true_negative, c.true_negative + c.false_negative),
        recall_negative: ratio(c.true_negative, c.true_negative + c.false_positive),
        f1_positive,
        roc_auc: auc,
        confusion,
    })
}

/// Plain-text audit report of one cluster's winning model evaluation.
pub fn audit_report(cluster: usize, family: &str, metrics: &MetricSet) -> String {
    let c = &metrics.confusion;
    let mut out = String::new();
    let _ = writeln!(out, "cluster {cluster} evaluation ({family})");
    let _ = writeln!(out, "rows: {}", c.total());
    let _ = writeln!(out);
    let _ = writeln!(out, "                 predicted 0   predicted 1");
    let _ = writeln!(
        out,
        "actual 0   {:>13} {:>13}",
        c.true_negative, c.false_positive
    );
    let _ = writeln!(
        out,
        "actual 1   {:>13} {:>13}",
        c.false_negative, c.true_positive
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "accuracy:  {:.4}", metrics.accuracy);
    let _ = writeln!(out, "precision: {:.4}", metrics.precision_positive);
    let _ = writeln!(out, "recall:    {:.4}", metrics.recall_positive);
    let _ = writeln!(out, "f1:        {:.4}", metrics.f1_positive);
    let _ = writeln!(out, "roc auc:   {:.4}", metrics.roc_auc);
    out
}
