//! Per-cluster classifier families and the search that ranks them.
//!
//! Four model families compete on every cluster: Gaussian naive Bayes,
//! an RBF-kernel support-vector machine, a random forest, and gradient
//! boosting. [`search`] runs the seeded randomized search over all of
//! them and picks a single winner per cluster under a total order:
//! higher test AUC first, then a fixed family precedence so equal
//! scores never depend on evaluation order.

pub mod bayes;
pub mod boost;
pub mod forest;
pub mod metrics;
pub mod pca;
pub mod scale;
pub mod search;
pub mod smote;
pub mod svm;
pub mod tree;

use std::fmt;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The classifier families entered into every cluster's search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    GaussianNb,
    Svm,
    RandomForest,
    GradientBoosting,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 4] = [
        ModelFamily::GaussianNb,
        ModelFamily::Svm,
        ModelFamily::RandomForest,
        ModelFamily::GradientBoosting,
    ];

    /// Tie-break precedence when two families reach the same score.
    /// Higher wins.
    pub fn priority(self) -> u8 {
        match self {
            ModelFamily::GaussianNb => 0,
            ModelFamily::Svm => 1,
            ModelFamily::RandomForest => 2,
            ModelFamily::GradientBoosting => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelFamily::GaussianNb => "gaussian_nb",
            ModelFamily::Svm => "svm",
            ModelFamily::RandomForest => "random_forest",
            ModelFamily::GradientBoosting => "gradient_boosting",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fitted classifier of any family, serialisable as one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedClassifier {
    GaussianNb(bayes::GaussianNb),
    Svm(svm::SvmClassifier),
    RandomForest(forest::RandomForest),
    GradientBoosting(boost::GradientBoosting),
}

impl TrainedClassifier {
    pub fn family(&self) -> ModelFamily {
        match self {
            TrainedClassifier::GaussianNb(_) => ModelFamily::GaussianNb,
            TrainedClassifier::Svm(_) => ModelFamily::Svm,
            TrainedClassifier::RandomForest(_) => ModelFamily::RandomForest,
            TrainedClassifier::GradientBoosting(_) => ModelFamily::GradientBoosting,
        }
    }

    /// Probability of the positive class for each row.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            TrainedClassifier::GaussianNb(m) => m.predict_proba(x),
            TrainedClassifier::Svm(m) => m.predict_proba(x),
            TrainedClassifier::RandomForest(m) => m.predict_proba(x),
            TrainedClassifier::GradientBoosting(m) => m.predict_proba(x),
        }
    }

    /// Hard 0/1 labels at the 0.5 threshold.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self
            .predict_proba(x)?
            .mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }
}
