//! Synthetic minority oversampling (SMOTE) for the training split.
//!
//! Synthetic rows are interpolations between a minority row and one of
//! its k nearest minority neighbours. Only the training split is ever
//! oversampled; evaluation data keeps its natural class balance.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use crate::error::{Error, Result};

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Oversample the minority class of a binary problem up to parity.
/// Returns the input untouched when the classes are already balanced
/// or the minority is a single row (no neighbour to interpolate with).
pub fn oversample(
    x: &Array2<f64>,
    y: &Array1<f64>,
    k_neighbors: usize,
    rng: &mut StdRng,
) -> Result<(Array2<f64>, Array1<f64>)> {
    if x.nrows() != y.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![x.nrows()],
            got: vec![y.len()],
        });
    }
    let positives: Vec<usize> = y.iter().enumerate().filter(|(_, &v)| v == 1.0).map(|(i, _)| i).collect();
    let negatives: Vec<usize> = y.iter().enumerate().filter(|(_, &v)| v != 1.0).map(|(i, _)| i).collect();
    let (minority, minority_label) = if positives.len() < negatives.len() {
        (&positives, 1.0)
    } else {
        (&negatives, 0.0)
    };
    let deficit = negatives.len().abs_diff(positives.len());
    if deficit == 0 || minority.len() < 2 {
        return Ok((x.clone(), y.clone()));
    }

    let rows: Vec<Vec<f64>> = minority
        .iter()
        .map(|&i| x.row(i).to_vec())
        .collect();
    let k = k_neighbors.min(rows.len() - 1);

    let mut data = x.clone();
    let mut labels = y.to_vec();
    for s in 0..deficit {
        let base = s % rows.len();
        let mut ranked: Vec<(f64, usize)> = rows
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != base)
            .map(|(i, r)| (squared_distance(&rows[base], r), i))
            .collect();
        ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        let pick = ranked[rng.random_range(0..k)].1;
        let gap: f64 = rng.random();
        let synthetic: Vec<f64> = rows[base]
            .iter()
            .zip(&rows[pick])
            .map(|(a, b)| a + gap * (b - a))
            .collect();
        data.append(
            Axis(0),
            Array2::from_shape_vec((1, synthetic.len()), synthetic)
                .map_err(|e| Error::InvalidParameter(e.to_string()))?
                .view(),
        )
        .map_err(|e| Error::InvalidParameter(e.to_string()))?;
        labels.push(minority_label);
    }
    Ok((data, Array1::from_vec(labels)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn balances_the_classes() {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.1],
            [5.0, 5.0],
            [5.1, 5.1],
            [5.2, 5.2],
            [5.3, 5.3],
        ];
        let y = array![1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let mut rng = StdRng::seed_from_u64(42);
        let (bx, by) = oversample(&x, &y, 2, &mut rng).unwrap();
        let pos = by.iter().filter(|&&v| v == 1.0).count();
        let neg = by.iter().filter(|&&v| v != 1.0).count();
        assert_eq!(pos, neg);
        assert_eq!(bx.nrows(), by.len());
    }

    #[test]
    fn synthetic_rows_interpolate_the_minority() {
        let x = array![[0.0], [1.0], [10.0], [11.0], [12.0], [13.0]];
        let y = array![1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let mut rng = StdRng::seed_from_u64(42);
        let (bx, by) = oversample(&x, &y, 2, &mut rng).unwrap();
        for (row, &label) in bx.rows().into_iter().zip(by.iter()).skip(6) {
            assert_eq!(label, 1.0);
            assert!((0.0..=1.0).contains(&row[0]), "synthetic row outside hull");
        }
    }

    #[test]
    fn balanced_input_passes_through() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![1.0, 1.0, 0.0, 0.0];
        let mut rng = StdRng::seed_from_u64(42);
        let (bx, _) = oversample(&x, &y, 2, &mut rng).unwrap();
        assert_eq!(bx.nrows(), 4);
    }

    #[test]
    fn singleton_minority_is_left_alone() {
        let x = array![[0.0], [10.0], [11.0], [12.0]];
        let y = array![1.0, 0.0, 0.0, 0.0];
        let mut rng = StdRng::seed_from_u64(42);
        let (bx, _) = oversample(&x, &y, 2, &mut rng).unwrap();
        assert_eq!(bx.nrows(), 4);
    }
}
