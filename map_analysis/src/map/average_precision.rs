//! Per-sample Average Precision over similarity rankings.
//!
//! For a query sample every other sample is ranked by cosine similarity
//! (descending, ties in row order). Excluded pairs are dropped from the
//! ranking; positives and negatives stay. AP is the mean of precision@k over
//! the ranks k holding a positive.
//!
//! Query rows are processed `batch_size` at a time so that only a
//! `batch_size × n` similarity block is alive per batch. The batch size never
//! changes the scores.

use std::cmp::Ordering;
use std::ops::Range;

use ndarray::{Array2, ArrayView2};
use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::map::pairs::{PairClassifier, PairKind};
use crate::map::similarity::{cosine_block, normalize_rows};

/// Score of one query sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApRow {
    /// Row of the sample in the comparison table.
    pub index: usize,
    pub average_precision: f64,
    pub n_pos: usize,
    /// Positives plus negatives in the ranking.
    pub n_total: usize,
    pub p_value: f64,
}

impl ApRow {
    /// NaN AP marks a sample with no positive or no negative neighbour.
    pub fn is_scored(&self) -> bool {
        !self.average_precision.is_nan()
    }
}

/// AP of a ranked relevance list (`true` = positive), best match first.
///
/// NaN when the list holds no positive or no negative.
pub fn ranked_average_precision(labels: &[bool]) -> f64 {
    let n_pos = labels.iter().filter(|&&l| l).count();
    if n_pos == 0 || n_pos == labels.len() {
        return f64::NAN;
    }

    let mut hits = 0usize;
    let mut sum_precision = 0.0;
    for (k, &is_pos) in labels.iter().enumerate() {
        if is_pos {
            hits += 1;
            sum_precision += hits as f64 / (k + 1) as f64;
        }
    }
    sum_precision / n_pos as f64
}

/// AP given the sorted 0-based ranks at which the positives sit.
pub fn average_precision_from_ranks(pos_ranks: &[usize]) -> f64 {
    if pos_ranks.is_empty() {
        return f64::NAN;
    }
    let sum_precision: f64 = pos_ranks
        .iter()
        .enumerate()
        .map(|(hit, &rank)| (hit + 1) as f64 / (rank + 1) as f64)
        .sum();
    sum_precision / pos_ranks.len() as f64
}

fn score_batch(classifier: &PairClassifier, normed: &Array2<f64>, rows: Range<usize>) -> Vec<ApRow> {
    let start = rows.start;
    let block = cosine_block(normed, rows.clone());
    let mut out = Vec::with_capacity(rows.len());
    let mut ranking: Vec<(f64, bool)> = Vec::with_capacity(classifier.n_samples());

    for i in rows {
        ranking.clear();
        for (j, &sim) in block.row(i - start).iter().enumerate() {
            match classifier.classify(i, j) {
                PairKind::Positive => ranking.push((sim, true)),
                PairKind::Negative => ranking.push((sim, false)),
                PairKind::Excluded => {}
            }
        }
        // stable: equal similarities keep row order
        ranking.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let labels: Vec<bool> = ranking.iter().map(|&(_, is_pos)| is_pos).collect();
        out.push(ApRow {
            index: i,
            average_precision: ranked_average_precision(&labels),
            n_pos: labels.iter().filter(|&&l| l).count(),
            n_total: labels.len(),
            p_value: f64::NAN,
        });
    }
    out
}

/// Scores every sample of the table. p-values are left as NaN; see
/// [`crate::map::null_distribution::assign_p_values`].
pub fn compute_average_precision(
    classifier: &PairClassifier,
    feats: ArrayView2<f64>,
    batch_size: usize,
    parallel: bool,
) -> PolarsResult<Vec<ApRow>> {
    let n = feats.nrows();
    if n != classifier.n_samples() {
        return Err(PolarsError::ShapeMismatch(
            format!("{} feature rows but {} metadata rows", n, classifier.n_samples()).into(),
        ));
    }
    if batch_size == 0 {
        return Err(PolarsError::InvalidOperation("batch_size must be positive".into()));
    }

    let normed = normalize_rows(feats);
    let batches: Vec<Range<usize>> = (0..n)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(n))
        .collect();
    debug!("Scoring {} samples in {} batch(es) of up to {}", n, batches.len(), batch_size);

    let scored: Vec<Vec<ApRow>> = if parallel {
        batches
            .into_par_iter()
            .map(|rows| score_batch(classifier, &normed, rows))
            .collect()
    } else {
        batches
            .into_iter()
            .map(|rows| score_batch(classifier, &normed, rows))
            .collect()
    };
    let rows: Vec<ApRow> = scored.into_iter().flatten().collect();

    let unscored = rows.iter().filter(|r| !r.is_scored()).count();
    if unscored > 0 {
        warn!(
            "{} of {} samples have no positive or no negative pair; their AP is undefined",
            unscored, n
        );
    }
    Ok(rows)
}
