//! Permutation null distributions for AP scores and empirical p-values.
//!
//! The AP of a random ranking only depends on how many positives
//! (`n_pos`) sit in a list of `n_total` entries, so one null distribution is
//! drawn per distinct `(n_pos, n_total)` and shared by every sample with that
//! configuration.
//!
//! Each configuration gets its own RNG seeded from [`derive_seed`], which
//! keeps draws reproducible and uncorrelated regardless of the order (or
//! thread) they are generated on.

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

use crate::map::average_precision::{average_precision_from_ranks, ApRow};

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of the RNG used for the `(n_pos, n_total)` null distribution.
pub fn derive_seed(seed: u64, n_pos: usize, n_total: usize) -> u64 {
    let config = ((n_pos as u64) << 32) ^ (n_total as u64);
    splitmix64(seed ^ splitmix64(config))
}

/// AP of one random ranking with `n_pos` positives among `n_total` entries.
pub fn random_average_precision<R: Rng + ?Sized>(n_pos: usize, n_total: usize, rng: &mut R) -> f64 {
    let mut ranks = sample(rng, n_total, n_pos).into_vec();
    ranks.sort_unstable();
    average_precision_from_ranks(&ranks)
}

/// `null_size` random AP scores for one configuration, sorted ascending.
pub fn null_scores(n_pos: usize, n_total: usize, null_size: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(derive_seed(seed, n_pos, n_total));
    let mut scores: Vec<f64> = (0..null_size)
        .map(|_| random_average_precision(n_pos, n_total, &mut rng))
        .collect();
    scores.sort_by(|a, b| a.total_cmp(b));
    scores
}

/// Null distributions keyed by `(n_pos, n_total)`.
#[derive(Debug, Clone)]
pub struct NullDistributions {
    null_size: usize,
    scores: HashMap<(usize, usize), Vec<f64>>,
}

impl NullDistributions {
    pub fn build<I>(configs: I, null_size: usize, seed: u64, parallel: bool) -> Self
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        // sorted so the work list is the same on every run
        let configs: Vec<(usize, usize)> = configs.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        debug!("Drawing {} null distribution(s) of size {}", configs.len(), null_size);

        let draw = |&(n_pos, n_total): &(usize, usize)| ((n_pos, n_total), null_scores(n_pos, n_total, null_size, seed));
        let scores: HashMap<(usize, usize), Vec<f64>> = if parallel {
            configs.par_iter().map(draw).collect()
        } else {
            configs.iter().map(draw).collect()
        };

        Self { null_size, scores }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn get(&self, n_pos: usize, n_total: usize) -> Option<&[f64]> {
        self.scores.get(&(n_pos, n_total)).map(Vec::as_slice)
    }

    /// `(#{null >= observed} + 1) / (null_size + 1)`; NaN for an undefined AP
    /// or an unknown configuration.
    pub fn p_value(&self, observed: f64, n_pos: usize, n_total: usize) -> f64 {
        if observed.is_nan() {
            return f64::NAN;
        }
        match self.get(n_pos, n_total) {
            Some(null) => {
                let at_least = null.len() - null.partition_point(|&x| x < observed);
                (at_least + 1) as f64 / (self.null_size + 1) as f64
            }
            None => f64::NAN,
        }
    }
}

/// Draws the null distributions needed by `rows` and fills in their p-values.
pub fn assign_p_values(rows: &mut [ApRow], null_size: usize, seed: u64, parallel: bool) -> NullDistributions {
    let configs = rows.iter().filter(|r| r.is_scored()).map(|r| (r.n_pos, r.n_total));
    let nulls = NullDistributions::build(configs, null_size, seed, parallel);

    for row in rows.iter_mut() {
        row.p_value = nulls.p_value(row.average_precision, row.n_pos, row.n_total);
    }
    nulls
}
