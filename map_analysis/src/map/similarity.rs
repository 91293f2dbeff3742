use std::ops::Range;

use ndarray::{s, Array2, ArrayView2, Axis};

/// Scales every row to unit L2 norm. All-zero rows stay zero, which puts them
/// at similarity 0 to everything.
pub fn normalize_rows(feats: ArrayView2<f64>) -> Array2<f64> {
    let mut normed = feats.to_owned();
    for mut row in normed.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    }
    normed
}

/// Cosine similarities of the query rows `rows` against every row, as a
/// `rows.len() × n` block. `normed` must come from [`normalize_rows`].
pub fn cosine_block(normed: &Array2<f64>, rows: Range<usize>) -> Array2<f64> {
    normed.slice(s![rows, ..]).dot(&normed.t())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn identical_direction_scores_one() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [-1.0, -2.0]];
        let block = cosine_block(&normalize_rows(x.view()), 0..3);
        assert!((block[[0, 1]] - 1.0).abs() < 1e-12);
        assert!((block[[0, 2]] + 1.0).abs() < 1e-12);
        assert!((block[[1, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_rows_are_neutral() {
        let x = array![[0.0, 0.0], [3.0, 4.0]];
        let block = cosine_block(&normalize_rows(x.view()), 0..2);
        assert_eq!(block[[0, 1]], 0.0);
    }

    #[test]
    fn partial_block_matches_full_block() {
        let x = array![[1.0, 0.5], [0.2, 0.9], [0.7, 0.7], [0.1, 0.0]];
        let normed = normalize_rows(x.view());
        let full = cosine_block(&normed, 0..4);
        let tail = cosine_block(&normed, 2..4);
        assert_eq!(tail.dim(), (2, 4));
        assert_eq!(tail.row(0), full.row(2));
        assert_eq!(tail.row(1), full.row(3));
    }
}
