use polars::prelude::*;
use serde::{Deserialize, Serialize};

// ── Output column names ──────────────────────────────────────────────────────
pub const AP_COL: &str = "average_precision";
pub const P_VALUE_COL: &str = "p_value";
pub const N_POS_COL: &str = "n_pos_pairs";
pub const N_TOTAL_COL: &str = "n_total_pairs";
pub const MAP_COL: &str = "mean_average_precision";
pub const N_SAMPLES_COL: &str = "n_samples";
pub const CORRECTED_P_COL: &str = "corrected_p_value";
pub const BELOW_P_COL: &str = "below_p";
pub const BELOW_CORRECTED_P_COL: &str = "below_corrected_p";
pub const SHUFFLED_COL: &str = "shuffled";

/// Anything that can be loaded into a profile table.
pub trait Dataset {
    fn load(&self) -> PolarsResult<DataFrame>;

    /// Post-load cleanup. The default leaves the frame untouched.
    fn clean(&self, df: DataFrame) -> PolarsResult<DataFrame> {
        Ok(df)
    }
}

/// Wraps any foreign error so it can travel through `PolarsResult`.
pub fn polars_err(e: Box<dyn std::error::Error + Send + Sync>) -> PolarsError {
    PolarsError::ComputeError(format!("{}", e).into())
}

/// Same-by / diff-by rules deciding which sample pairs count as positive or negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingRules {
    pub pos_sameby: Vec<String>,
    pub pos_diffby: Vec<String>,
    pub neg_sameby: Vec<String>,
    pub neg_diffby: Vec<String>,
}

impl GroupingRules {
    /// Positives share `perturbation_col` across different `replicate_col` values,
    /// negatives differ in `perturbation_col`.
    pub fn perturbation_vs_replicate(perturbation_col: &str, replicate_col: &str) -> Self {
        Self {
            pos_sameby: vec![perturbation_col.to_string()],
            pos_diffby: vec![replicate_col.to_string()],
            neg_sameby: vec![],
            neg_diffby: vec![perturbation_col.to_string()],
        }
    }

    /// Every column referenced by any of the four rule sets, deduplicated.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = Vec::new();
        for c in self
            .pos_sameby
            .iter()
            .chain(&self.pos_diffby)
            .chain(&self.neg_sameby)
            .chain(&self.neg_diffby)
        {
            if !cols.contains(&c.as_str()) {
                cols.push(c.as_str());
            }
        }
        cols
    }
}

/// Knobs for the AP engine and its null distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapParams {
    pub null_size: usize,
    pub batch_size: usize,
    pub seed: u64,
    pub parallel: bool,
}

impl Default for MapParams {
    fn default() -> Self {
        Self {
            null_size: 1000,
            batch_size: 100,
            seed: 0,
            parallel: true,
        }
    }
}

/// Granularity a profile table is analysed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileLevel {
    /// Cells reduced to one profile per well before scoring.
    Well,
    /// Every cell scored as its own sample.
    #[serde(rename = "sc", alias = "single_cell")]
    SingleCell,
}

impl ProfileLevel {
    /// Prefix used in result file names.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            ProfileLevel::Well => "well",
            ProfileLevel::SingleCell => "sc",
        }
    }
}

impl std::fmt::Display for ProfileLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProfileLevel::Well => "well level",
            ProfileLevel::SingleCell => "single-cell level",
        };
        write!(f, "{s}")
    }
}
