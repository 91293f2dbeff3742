//! Positive / negative pair classification from same-by and diff-by rules.

use std::collections::HashMap;

use polars::prelude::*;
use tracing::debug;

use crate::models::GroupingRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairKind {
    Positive,
    Negative,
    Excluded,
}

/// Classifies sample pairs of one metadata table.
///
/// Every referenced column is dictionary-encoded once, so a classification is
/// a handful of integer comparisons.
#[derive(Debug, Clone)]
pub struct PairClassifier {
    n_rows: usize,
    codes: Vec<Vec<u32>>,
    pos_sameby: Vec<usize>,
    pos_diffby: Vec<usize>,
    neg_sameby: Vec<usize>,
    neg_diffby: Vec<usize>,
}

fn encode_column(meta: &DataFrame, name: &str) -> PolarsResult<Vec<u32>> {
    let casted = meta.column(name)?.cast(&DataType::String)?;
    let values = casted.str()?;

    let mut dict: HashMap<&str, u32> = HashMap::new();
    let mut codes = Vec::with_capacity(values.len());
    for (row, opt) in values.into_iter().enumerate() {
        let v = opt.ok_or_else(|| {
            PolarsError::ComputeError(format!("missing value in grouping column '{}' at row {}", name, row).into())
        })?;
        let next = dict.len() as u32;
        codes.push(*dict.entry(v).or_insert(next));
    }
    debug!("Encoded '{}' into {} categories", name, dict.len());
    Ok(codes)
}

fn overlaps(a: &[String], b: &[String]) -> bool {
    a.iter().any(|c| b.contains(c))
}

impl PairClassifier {
    pub fn new(meta: &DataFrame, rules: &GroupingRules) -> PolarsResult<Self> {
        if rules.pos_sameby.is_empty() {
            return Err(PolarsError::InvalidOperation(
                "pos_sameby must name at least one column".into(),
            ));
        }
        // a pair can only be positive and negative at once when no column forces them apart
        if !overlaps(&rules.pos_sameby, &rules.neg_diffby) && !overlaps(&rules.pos_diffby, &rules.neg_sameby) {
            return Err(PolarsError::InvalidOperation(
                format!(
                    "grouping rules {:?} allow a pair to be both positive and negative; \
                     share a column between pos_sameby and neg_diffby or between pos_diffby and neg_sameby",
                    rules
                )
                .into(),
            ));
        }

        let columns = rules.columns();
        let mut codes = Vec::with_capacity(columns.len());
        for name in &columns {
            codes.push(encode_column(meta, name)?);
        }

        let lookup = |set: &[String]| -> Vec<usize> {
            set.iter()
                .filter_map(|c| columns.iter().position(|k| *k == c.as_str()))
                .collect()
        };

        Ok(Self {
            n_rows: meta.height(),
            pos_sameby: lookup(&rules.pos_sameby),
            pos_diffby: lookup(&rules.pos_diffby),
            neg_sameby: lookup(&rules.neg_sameby),
            neg_diffby: lookup(&rules.neg_diffby),
            codes,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.n_rows
    }

    fn all_same(&self, cols: &[usize], i: usize, j: usize) -> bool {
        cols.iter().all(|&c| self.codes[c][i] == self.codes[c][j])
    }

    fn all_differ(&self, cols: &[usize], i: usize, j: usize) -> bool {
        cols.iter().all(|&c| self.codes[c][i] != self.codes[c][j])
    }

    pub fn classify(&self, i: usize, j: usize) -> PairKind {
        if i == j {
            return PairKind::Excluded;
        }
        let positive = self.all_same(&self.pos_sameby, i, j) && self.all_differ(&self.pos_diffby, i, j);
        let negative = self.all_same(&self.neg_sameby, i, j) && self.all_differ(&self.neg_diffby, i, j);
        debug_assert!(!(positive && negative));

        if positive {
            PairKind::Positive
        } else if negative {
            PairKind::Negative
        } else {
            PairKind::Excluded
        }
    }

    fn pairs_of(&self, kind: PairKind) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for i in 0..self.n_rows {
            for j in (i + 1)..self.n_rows {
                if self.classify(i, j) == kind {
                    out.push((i, j));
                }
            }
        }
        out
    }

    /// Unordered positive pairs `(i, j)` with `i < j`.
    pub fn positive_pairs(&self) -> Vec<(usize, usize)> {
        self.pairs_of(PairKind::Positive)
    }

    /// Unordered negative pairs `(i, j)` with `i < j`.
    pub fn negative_pairs(&self) -> Vec<(usize, usize)> {
        self.pairs_of(PairKind::Negative)
    }
}
