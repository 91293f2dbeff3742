//! Reference-vs-treatment mAP runs.
//!
//! For every perturbation other than the reference, the reference samples and
//! that perturbation's samples form one comparison set which is scored on its
//! own. The run is repeated on column-shuffled features as a negative control.

use std::path::Path;

use ndarray::Array2;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::MapConfig;
use crate::data_handling::aggregate::aggregate_profiles;
use crate::data_handling::features::infer_cp_features_with;
use crate::helper_functions::dataframe_to_csv;
use crate::map::shuffle::{features_to_matrix, shuffle_features};
use crate::map::{aggregate, run_pipeline};
use crate::models::{MapParams, ProfileLevel, SHUFFLED_COL};

/// Which feature values a run scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSpace {
    Original,
    Shuffled,
}

impl FeatureSpace {
    /// Value of the `shuffled` column.
    pub fn label(&self) -> &'static str {
        match self {
            FeatureSpace::Original => "Not Shuffled",
            FeatureSpace::Shuffled => "Features Shuffled",
        }
    }

    fn file_prefix(&self) -> &'static str {
        match self {
            FeatureSpace::Original => "",
            FeatureSpace::Shuffled => "shuffled_",
        }
    }
}

/// Reference samples plus one treatment's samples.
#[derive(Debug, Clone)]
pub struct ComparisonSet {
    pub treatment: String,
    pub meta: DataFrame,
    pub feats: Array2<f64>,
}

impl ComparisonSet {
    pub fn build(
        reference: &DataFrame,
        treatment_rows: &DataFrame,
        treatment: &str,
        meta_cols: &[String],
        feature_cols: &[String],
    ) -> PolarsResult<Self> {
        let combined = reference.vstack(treatment_rows)?;
        Ok(Self {
            treatment: treatment.to_string(),
            meta: combined.select(meta_cols.iter().map(|c| c.as_str()))?,
            feats: features_to_matrix(&combined, feature_cols)?,
        })
    }

    /// Same set with every feature column permuted independently.
    pub fn shuffled(self, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            feats: shuffle_features(self.feats, &mut rng),
            ..self
        }
    }

    pub fn len(&self) -> usize {
        self.meta.height()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.height() == 0
    }
}

/// Distinct values of `column` in order of first appearance.
pub fn perturbation_values(df: &DataFrame, column: &str) -> PolarsResult<Vec<String>> {
    let unique = df
        .column(column)?
        .as_materialized_series()
        .unique_stable()?
        .cast(&DataType::String)?;
    Ok(unique.str()?.into_iter().flatten().map(|s| s.to_string()).collect())
}

fn rows_with(df: &DataFrame, column: &str, value: &str) -> PolarsResult<DataFrame> {
    df.clone()
        .lazy()
        .filter(col(column).cast(DataType::String).eq(lit(value)))
        .collect()
}

/// AP scores of every treatment against the reference, stacked into one
/// table led by the `shuffled` label column.
pub fn run_reference_comparisons(
    table: &DataFrame,
    meta_cols: &[String],
    feature_cols: &[String],
    config: &MapConfig,
    params: &MapParams,
    space: FeatureSpace,
) -> PolarsResult<DataFrame> {
    let reference = rows_with(table, &config.perturbation_col, &config.reference_label)?;
    if reference.height() == 0 {
        return Err(PolarsError::ComputeError(
            format!("no '{}' reference samples in '{}'", config.reference_label, config.perturbation_col).into(),
        ));
    }

    let mut stacked: Option<DataFrame> = None;
    for treatment in perturbation_values(table, &config.perturbation_col)? {
        // skipping ref to ref comparison
        if treatment == config.reference_label {
            continue;
        }

        let treatment_rows = rows_with(table, &config.perturbation_col, &treatment)?;
        let mut set = ComparisonSet::build(&reference, &treatment_rows, &treatment, meta_cols, feature_cols)?;
        if space == FeatureSpace::Shuffled {
            set = set.shuffled(config.seed);
        }
        debug!(
            "{} vs {}: {} + {} samples",
            config.reference_label,
            treatment,
            reference.height(),
            treatment_rows.height()
        );

        let mut scores = run_pipeline(&set.meta, set.feats.view(), &config.rules, params)?;
        scores.insert_column(0, Column::new(SHUFFLED_COL.into(), vec![space.label(); scores.height()]))?;

        match stacked.as_mut() {
            Some(acc) => {
                acc.vstack_mut(&scores)?;
            }
            None => stacked = Some(scores),
        }
    }

    stacked.ok_or_else(|| {
        PolarsError::ComputeError(
            format!("no perturbation besides '{}' to compare against", config.reference_label).into(),
        )
    })
}

/// AP and mAP tables of one feature space.
#[derive(Debug, Clone)]
pub struct ScoreTables {
    pub space: FeatureSpace,
    pub ap_scores: DataFrame,
    pub map_scores: DataFrame,
}

/// Profile table for `level`: cells as-is, or reduced per well and perturbation.
pub fn level_table(profiles: &DataFrame, level: ProfileLevel, config: &MapConfig) -> PolarsResult<DataFrame> {
    match level {
        ProfileLevel::SingleCell => Ok(profiles.clone()),
        ProfileLevel::Well => {
            let features = infer_cp_features_with(profiles, &config.compartments, false, false)?;
            let strata = vec![config.replicate_col.clone(), config.perturbation_col.clone()];
            aggregate_profiles(profiles, &strata, &features, config.profile_reduction)
        }
    }
}

/// Original and shuffled score tables for one profile level.
pub fn run_level(profiles: &DataFrame, level: ProfileLevel, config: &MapConfig) -> PolarsResult<Vec<ScoreTables>> {
    info!("Running mAP at {}", level);
    let table = level_table(profiles, level, config)?;

    let meta_cols = infer_cp_features_with(&table, &config.compartments, false, true)?;
    let feature_cols = infer_cp_features_with(&table, &config.compartments, false, false)?;
    for needed in config.rules.columns() {
        if !meta_cols.iter().any(|c| c == needed) {
            return Err(PolarsError::ColumnNotFound(
                format!("grouping column '{}' is not a metadata column at {}", needed, level).into(),
            ));
        }
    }

    let counts = perturbation_values(&table, &config.perturbation_col)?
        .into_iter()
        .map(|p| rows_with(&table, &config.perturbation_col, &p).map(|df| (p, df.height())))
        .collect::<PolarsResult<Vec<(String, usize)>>>()?;
    for (p, n) in &counts {
        info!("Number of '{}' samples: {}", p, n);
    }
    let reference_count = counts
        .iter()
        .find(|(p, _)| *p == config.reference_label)
        .map(|(_, n)| *n)
        .unwrap_or(0);
    if reference_count < 2 {
        warn!(
            "only {} '{}' sample(s) at {}; reference APs will be undefined",
            reference_count, config.reference_label, level
        );
    }
    let params = config.params(reference_count);
    info!(
        "{} metadata and {} feature columns, null_size {}, batch_size {}",
        meta_cols.len(),
        feature_cols.len(),
        params.null_size,
        params.batch_size
    );

    let sameby = vec![config.perturbation_col.clone()];
    [FeatureSpace::Original, FeatureSpace::Shuffled]
        .into_iter()
        .map(|space| {
            let ap_scores = run_reference_comparisons(&table, &meta_cols, &feature_cols, config, &params, space)?;
            let map_scores = aggregate(&ap_scores, &sameby, config.threshold, config.p_value_combine)?;
            Ok(ScoreTables { space, ap_scores, map_scores })
        })
        .collect()
}

/// Writes `{prefix}{level}_AP_scores.csv` and `{prefix}{level}_mAP_scores.csv` under `results_dir`.
pub fn write_score_tables(tables: &mut [ScoreTables], level: ProfileLevel, results_dir: &Path) -> PolarsResult<()> {
    for t in tables.iter_mut() {
        let stem = format!("{}{}", t.space.file_prefix(), level.file_prefix());
        dataframe_to_csv(&mut t.ap_scores, &results_dir.join(format!("{stem}_AP_scores.csv")))?;
        dataframe_to_csv(&mut t.map_scores, &results_dir.join(format!("{stem}_mAP_scores.csv")))?;
    }
    Ok(())
}
