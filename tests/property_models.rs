//! Property-Based Tests for Model Building Blocks
//!
//! Validates correctness properties using proptest.
//!
//! Test Categories:
//! 1. Metric invariants (AUC bounds, rank invariance, label symmetry)
//! 2. Resampling invariants (class balance after oversampling)
//! 3. Scaling invariants (zero mean, unit variance)
//! 4. Digest determinism

use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use sentinela::model::metrics::roc_auc;
use sentinela::model::scale::StandardScaler;
use sentinela::model::smote::oversample;
use sentinela::store::content_digest;

/// Labelled score vectors with at least one row of each class.
fn labelled_scores() -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    prop::collection::vec((prop::bool::ANY, 0.0f64..1.0), 2..60).prop_map(|mut rows| {
        // Force both classes to appear.
        rows[0].0 = false;
        let last = rows.len() - 1;
        rows[last].0 = true;
        rows.iter()
            .map(|&(label, score)| (f64::from(u8::from(label)), score))
            .unzip()
    })
}

proptest! {
    #[test]
    fn auc_stays_in_the_unit_interval((labels, scores) in labelled_scores()) {
        let auc = roc_auc(&Array1::from(labels), &Array1::from(scores)).unwrap();
        prop_assert!((0.0..=1.0).contains(&auc));
    }

    #[test]
    fn auc_ignores_monotone_score_rescaling((labels, scores) in labelled_scores()) {
        let labels = Array1::from(labels);
        let plain = roc_auc(&labels, &Array1::from(scores.clone())).unwrap();
        let stretched: Vec<f64> = scores.iter().map(|s| 3.0 * s + 7.0).collect();
        let rescaled = roc_auc(&labels, &Array1::from(stretched)).unwrap();
        prop_assert!((plain - rescaled).abs() < 1e-12);
    }

    #[test]
    fn auc_flips_with_the_labels((labels, scores) in labelled_scores()) {
        let scores = Array1::from(scores);
        let direct = roc_auc(&Array1::from(labels.clone()), &scores).unwrap();
        let flipped: Vec<f64> = labels.iter().map(|&l| 1.0 - l).collect();
        let inverse = roc_auc(&Array1::from(flipped), &scores).unwrap();
        prop_assert!((direct + inverse - 1.0).abs() < 1e-12);
    }

    #[test]
    fn oversampling_balances_the_classes(
        positives in 2usize..20,
        negatives in 2usize..20,
        seed in 0u64..1000,
    ) {
        let n = positives + negatives;
        let x = Array2::from_shape_fn((n, 3), |(i, j)| (i * 3 + j) as f64 * 0.25);
        let y = Array1::from_shape_fn(n, |i| f64::from(u8::from(i < positives)));
        let mut rng = StdRng::seed_from_u64(seed);
        let (bx, by) = oversample(&x, &y, 2, &mut rng).unwrap();
        let pos = by.iter().filter(|&&v| v == 1.0).count();
        let neg = by.len() - pos;
        prop_assert_eq!(pos, neg);
        prop_assert_eq!(bx.nrows(), by.len());
        prop_assert!(bx.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn digest_is_deterministic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_eq!(content_digest(&bytes), content_digest(&bytes));
        let mut tweaked = bytes.clone();
        tweaked.push(0x5a);
        prop_assert_ne!(content_digest(&bytes), content_digest(&tweaked));
    }
}

#[test]
fn scaler_centers_every_column() {
    let x = Array2::from_shape_fn((40, 5), |(i, j)| (i as f64 - 20.0) * (j as f64 + 1.0) + 3.0);
    let (_, scaled) = StandardScaler::fit_transform(&x);
    for column in scaled.columns() {
        let mean = column.sum() / column.len() as f64;
        let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / column.len() as f64;
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(var, 1.0, epsilon = 1e-9);
    }
}
