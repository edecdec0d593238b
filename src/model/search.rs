//! Seeded randomized hyperparameter search over one cluster.
//!
//! The cluster's rows are split into a stratified train/test pair,
//! the train side is standardised, oversampled to class parity, and
//! projected by PCA. Every family then samples `n_iter` configurations,
//! each scored by stratified cross-validated AUC, and the family's best
//! configuration is refitted on the whole train side and measured on
//! the untouched test side. The winner is the candidate with the
//! highest test AUC, ties broken by fixed family precedence.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::frame::DataFrame;
use crate::model::bayes::{GaussianNb, GaussianNbParams};
use crate::model::boost::{GradientBoosting, GradientBoostingParams};
use crate::model::forest::{RandomForest, RandomForestParams};
use crate::model::metrics::{self, MetricSet};
use crate::model::pca::Pca;
use crate::model::scale::StandardScaler;
use crate::model::smote;
use crate::model::svm::{SvmClassifier, SvmParams};
use crate::model::{ModelFamily, TrainedClassifier};

// =============================================================================
// Search space
// =============================================================================

/// One numeric hyperparameter's range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParameterDomain {
    Continuous { low: f64, high: f64, log_scale: bool },
    Discrete { low: i64, high: i64 },
}

impl ParameterDomain {
    fn sample(&self, rng: &mut StdRng) -> f64 {
        match self {
            ParameterDomain::Continuous {
                low,
                high,
                log_scale,
            } => {
                if *log_scale {
                    let span = high.ln() - low.ln();
                    (low.ln() + rng.random::<f64>() * span).exp()
                } else {
                    low + rng.random::<f64>() * (high - low)
                }
            }
            ParameterDomain::Discrete { low, high } => {
                rng.random_range(*low..=*high) as f64
            }
        }
    }
}

/// Named domains, ordered so sampling is reproducible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSpace {
    params: BTreeMap<String, ParameterDomain>,
}

impl ParamSpace {
    pub fn add(mut self, name: &str, domain: ParameterDomain) -> Self {
        self.params.insert(name.to_string(), domain);
        self
    }

    pub fn sample(&self, rng: &mut StdRng) -> BTreeMap<String, f64> {
        self.params
            .iter()
            .map(|(name, domain)| (name.clone(), domain.sample(rng)))
            .collect()
    }
}

fn family_space(family: ModelFamily) -> ParamSpace {
    match family {
        ModelFamily::GaussianNb => ParamSpace::default().add(
            "var_smoothing",
            ParameterDomain::Continuous {
                low: 1e-9,
                high: 1e-1,
                log_scale: true,
            },
        ),
        ModelFamily::Svm => ParamSpace::default()
            .add(
                "c",
                ParameterDomain::Continuous {
                    low: 0.1,
                    high: 100.0,
                    log_scale: true,
                },
            )
            .add(
                "gamma",
                ParameterDomain::Continuous {
                    low: 1e-4,
                    high: 1.0,
                    log_scale: true,
                },
            ),
        ModelFamily::RandomForest => ParamSpace::default()
            .add("n_estimators", ParameterDomain::Discrete { low: 10, high: 150 })
            .add("max_depth", ParameterDomain::Discrete { low: 2, high: 12 }),
        ModelFamily::GradientBoosting => ParamSpace::default()
            .add(
                "learning_rate",
                ParameterDomain::Continuous {
                    low: 0.01,
                    high: 0.5,
                    log_scale: true,
                },
            )
            .add("n_estimators", ParameterDomain::Discrete { low: 10, high: 150 })
            .add("max_depth", ParameterDomain::Discrete { low: 2, high: 6 }),
    }
}

fn fit_family(
    family: ModelFamily,
    x: &Array2<f64>,
    y: &Array1<f64>,
    params: &BTreeMap<String, f64>,
    rng: &mut StdRng,
) -> Result<TrainedClassifier> {
    let get = |name: &str, default: f64| params.get(name).copied().unwrap_or(default);
    Ok(match family {
        ModelFamily::GaussianNb => TrainedClassifier::GaussianNb(GaussianNb::fit(
            x,
            y,
            GaussianNbParams {
                var_smoothing: get("var_smoothing", 1e-9),
            },
        )?),
        ModelFamily::Svm => TrainedClassifier::Svm(SvmClassifier::fit(
            x,
            y,
            SvmParams {
                c: get("c", 1.0),
                gamma: get("gamma", 0.1),
                epochs: 30,
            },
            rng,
        )?),
        ModelFamily::RandomForest => TrainedClassifier::RandomForest(RandomForest::fit(
            x,
            y,
            RandomForestParams {
                n_estimators: get("n_estimators", 100.0) as usize,
                max_depth: get("max_depth", 8.0) as usize,
                min_samples_leaf: 1,
            },
            rng,
        )?),
        ModelFamily::GradientBoosting => {
            TrainedClassifier::GradientBoosting(GradientBoosting::fit(
                x,
                y,
                GradientBoostingParams {
                    n_estimators: get("n_estimators", 100.0) as usize,
                    learning_rate: get("learning_rate", 0.1),
                    max_depth: get("max_depth", 3.0) as usize,
                },
                rng,
            )?)
        }
    })
}

// =============================================================================
// Splitting
// =============================================================================

/// Class-stratified index split. Each class contributes its own share
/// to the test side, so a rare class is never absent from training.
fn stratified_split(
    y: &Array1<f64>,
    test_size: f64,
    rng: &mut StdRng,
) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [0.0, 1.0] {
        let mut members: Vec<usize> = y
            .iter()
            .enumerate()
            .filter(|(_, &v)| v == class)
            .map(|(i, _)| i)
            .collect();
        members.shuffle(rng);
        let n_test = ((members.len() as f64) * test_size).round() as usize;
        let n_test = n_test.min(members.len().saturating_sub(1));
        test.extend(members.drain(..n_test));
        train.extend(members);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Stratified fold assignment for cross-validation.
fn stratified_folds(y: &Array1<f64>, folds: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut assignment = vec![0usize; y.len()];
    for class in [0.0, 1.0] {
        let mut members: Vec<usize> = y
            .iter()
            .enumerate()
            .filter(|(_, &v)| v == class)
            .map(|(i, _)| i)
            .collect();
        members.shuffle(rng);
        for (pos, &idx) in members.iter().enumerate() {
            assignment[idx] = pos % folds;
        }
    }
    assignment
}

fn take_rows(x: &Array2<f64>, indices: &[usize]) -> Array2<f64> {
    x.select(Axis(0), indices)
}

fn take_labels(y: &Array1<f64>, indices: &[usize]) -> Array1<f64> {
    Array1::from_iter(indices.iter().map(|&i| y[i]))
}

// =============================================================================
// Outcome types
// =============================================================================

/// The serving artifact for one cluster: the preprocessing fitted on
/// its training split plus the winning classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub scaler: StandardScaler,
    pub pca: Pca,
    pub model: TrainedClassifier,
}

impl ModelBundle {
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let scaled = self.scaler.transform(x)?;
        let projected = self.pca.transform(&scaled)?;
        self.model.predict_proba(&projected)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// One refitted candidate's report line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateReport {
    pub family: ModelFamily,
    pub params: BTreeMap<String, f64>,
    pub cv_auc: f64,
    pub metrics: MetricSet,
}

/// Everything the search produced for one cluster.
#[derive(Debug, Clone)]
pub struct ClusterSearchOutcome {
    pub cluster: usize,
    pub winner: CandidateReport,
    pub bundle: ModelBundle,
    pub candidates: Vec<CandidateReport>,
}

// =============================================================================
// The search itself
// =============================================================================

pub struct ModelSearch<'a> {
    config: &'a SearchConfig,
}

impl<'a> ModelSearch<'a> {
    pub fn new(config: &'a SearchConfig) -> Self {
        Self { config }
    }

    /// Run the full search for the cluster at index `cluster`, whose
    /// rows are in `frame` with the label in `label_column`.
    pub fn run(
        &self,
        cluster: usize,
        frame: &DataFrame,
        label_column: &str,
    ) -> Result<ClusterSearchOutcome> {
        let mut features = frame.clone();
        let y = features.take_column(label_column).ok_or_else(|| {
            Error::Schema(format!("missing label column {label_column:?}"))
        })?;
        let x = features.data().clone();
        if x.nrows() < 4 {
            return Err(Error::InvalidParameter(format!(
                "cluster {cluster} has too few rows ({}) to train on",
                x.nrows()
            )));
        }

        // One seeded stream drives the whole cluster's search, so the
        // outcome is a pure function of data and configuration.
        let mut rng = StdRng::seed_from_u64(self.config.seed ^ cluster as u64);
        let (train_idx, test_idx) = stratified_split(&y, self.config.test_size, &mut rng);
        let x_train_raw = take_rows(&x, &train_idx);
        let y_train_raw = take_labels(&y, &train_idx);
        let x_test_raw = take_rows(&x, &test_idx);
        let y_test = take_labels(&y, &test_idx);

        let (scaler, x_train_scaled) = StandardScaler::fit_transform(&x_train_raw);
        let (x_balanced, y_train) = smote::oversample(
            &x_train_scaled,
            &y_train_raw,
            self.config.smote_neighbors,
            &mut rng,
        )?;
        let pca = Pca::fit(&x_balanced, self.config.pca_variance)?;
        let x_train = pca.transform(&x_balanced)?;
        let x_test = pca.transform(&scaler.transform(&x_test_raw)?)?;
        debug!(
            cluster,
            train_rows = x_train.nrows(),
            test_rows = x_test.nrows(),
            components = pca.n_components(),
            "cluster search prepared"
        );

        let mut candidates = Vec::with_capacity(ModelFamily::ALL.len());
        for family in ModelFamily::ALL {
            let space = family_space(family);
            let mut best: Option<(BTreeMap<String, f64>, f64)> = None;
            for _ in 0..self.config.n_iter {
                let params = space.sample(&mut rng);
                let score =
                    self.cross_validate(family, &x_train, &y_train, &params, &mut rng)?;
                if best.as_ref().map_or(true, |(_, s)| score > *s) {
                    best = Some((params, score));
                }
            }
            let (params, cv_auc) = best.ok_or_else(|| {
                Error::InvalidParameter("search ran zero iterations".into())
            })?;

            let model = fit_family(family, &x_train, &y_train, &params, &mut rng)?;
            let scores = model.predict_proba(&x_test)?;
            let metrics = metrics::evaluate(&y_test, &scores)?;
            info!(
                cluster,
                family = %family,
                cv_auc,
                test_auc = metrics.roc_auc,
                "family evaluated"
            );
            candidates.push((
                CandidateReport {
                    family,
                    params,
                    cv_auc,
                    metrics,
                },
                model,
            ));
        }

        // Highest test AUC wins; family precedence settles exact ties.
        let (winner, model) = candidates
            .iter()
            .max_by(|(a, _), (b, _)| {
                a.metrics
                    .roc_auc
                    .partial_cmp(&b.metrics.roc_auc)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.family.priority().cmp(&b.family.priority()))
            })
            .map(|(report, model)| (report.clone(), model.clone()))
            .ok_or_else(|| Error::InvalidParameter("no candidate survived".into()))?;
        info!(cluster, family = %winner.family, auc = winner.metrics.roc_auc, "cluster winner");

        Ok(ClusterSearchOutcome {
            cluster,
            winner,
            bundle: ModelBundle {
                scaler,
                pca,
                model,
            },
            candidates: candidates.into_iter().map(|(report, _)| report).collect(),
        })
    }

    fn cross_validate(
        &self,
        family: ModelFamily,
        x: &Array2<f64>,
        y: &Array1<f64>,
        params: &BTreeMap<String, f64>,
        rng: &mut StdRng,
    ) -> Result<f64> {
        let min_class = [0.0, 1.0]
            .iter()
            .map(|&c| y.iter().filter(|&&v| v == c).count())
            .min()
            .unwrap_or(0);
        let folds = self.config.cv_folds.min(min_class);
        if folds < 2 {
            // Too little data to hold anything out; score neutrally.
            return Ok(0.5);
        }
        let assignment = stratified_folds(y, folds, rng);
        let mut total = 0.0;
        for fold in 0..folds {
            let train: Vec<usize> = (0..y.len()).filter(|&i| assignment[i] != fold).collect();
            let held: Vec<usize> = (0..y.len()).filter(|&i| assignment[i] == fold).collect();
            let model = fit_family(
                family,
                &take_rows(x, &train),
                &take_labels(y, &train),
                params,
                rng,
            )?;
            let scores = model.predict_proba(&take_rows(x, &held))?;
            total += metrics::roc_auc(&take_labels(y, &held), &scores)?;
        }
        Ok(total / folds as f64)
    }
}
