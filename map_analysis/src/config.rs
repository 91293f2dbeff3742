use std::path::Path;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data_handling::aggregate::ProfileReduction;
use crate::data_handling::features::DEFAULT_COMPARTMENTS;
use crate::data_handling::plate_profile::NO_CONSTRUCT;
use crate::map::PValueCombine;
use crate::models::{polars_err, GroupingRules, MapParams, ProfileLevel};

/// Everything one analysis run needs. Missing JSON fields fall back to the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub profile_path: String,
    pub results_dir: String,
    pub perturbation_col: String,
    pub replicate_col: String,
    /// Reduction applied when building well-level profiles.
    pub profile_reduction: ProfileReduction,
    pub reference_label: String,
    pub rules: GroupingRules,
    /// `null_size = reference samples * null_size_factor`
    pub null_size_factor: usize,
    pub batch_size: usize,
    pub seed: u64,
    pub parallel: bool,
    pub threshold: f64,
    pub p_value_combine: PValueCombine,
    pub levels: Vec<ProfileLevel>,
    pub compartments: Vec<String>,
}

impl Default for MapConfig {
    fn default() -> Self {
        let perturbation_col = "Metadata_siRNA";
        let replicate_col = "Metadata_Well";
        Self {
            profile_path: "data/Plate_4_sc_normalized.parquet".to_string(),
            results_dir: "results".to_string(),
            perturbation_col: perturbation_col.to_string(),
            replicate_col: replicate_col.to_string(),
            profile_reduction: ProfileReduction::Median,
            reference_label: NO_CONSTRUCT.to_string(),
            rules: GroupingRules::perturbation_vs_replicate(perturbation_col, replicate_col),
            null_size_factor: 100,
            batch_size: 100,
            seed: 0,
            parallel: true,
            threshold: 0.05,
            p_value_combine: PValueCombine::GeometricMean,
            levels: vec![ProfileLevel::Well, ProfileLevel::SingleCell],
            compartments: DEFAULT_COMPARTMENTS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl MapConfig {
    pub fn load(path: &Path) -> PolarsResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: MapConfig = serde_json::from_str(&json).map_err(|e| polars_err(Box::new(e)))?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Reads `path` when it exists, otherwise the defaults.
    pub fn load_or_default(path: &Path) -> PolarsResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> PolarsResult<()> {
        if self.null_size_factor == 0 || self.batch_size == 0 {
            return Err(PolarsError::InvalidOperation(
                "null_size_factor and batch_size must be positive".into(),
            ));
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(PolarsError::InvalidOperation(
                format!("threshold must lie in (0, 1), got {}", self.threshold).into(),
            ));
        }
        if self.levels.is_empty() {
            return Err(PolarsError::InvalidOperation("no profile level selected".into()));
        }
        if !self.rules.pos_sameby.contains(&self.perturbation_col) {
            warn!(
                "pos_sameby {:?} does not include the perturbation column '{}'",
                self.rules.pos_sameby, self.perturbation_col
            );
        }
        Ok(())
    }

    /// Engine parameters for a comparison with `reference_count` reference samples.
    pub fn params(&self, reference_count: usize) -> MapParams {
        let null_size = reference_count.max(1) * self.null_size_factor;
        if null_size <= reference_count {
            warn!(
                "null_size {} does not exceed the {} reference samples; raise null_size_factor",
                null_size, reference_count
            );
        }
        MapParams {
            null_size,
            batch_size: self.batch_size,
            seed: self.seed,
            parallel: self.parallel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_the_plate_analysis() {
        let c = MapConfig::default();
        assert_eq!(c.rules.pos_sameby, vec!["Metadata_siRNA"]);
        assert_eq!(c.rules.pos_diffby, vec!["Metadata_Well"]);
        assert!(c.rules.neg_sameby.is_empty());
        assert_eq!(c.rules.neg_diffby, vec!["Metadata_siRNA"]);
        assert_eq!(c.params(12).null_size, 1200);
        assert_eq!(c.params(12).batch_size, 100);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map_config.json");
        std::fs::write(&path, r#"{ "seed": 7, "levels": ["well"], "p_value_combine": "stouffer" }"#).unwrap();

        let c = MapConfig::load(&path).unwrap();
        assert_eq!(c.seed, 7);
        assert_eq!(c.levels, vec![ProfileLevel::Well]);
        assert_eq!(c.p_value_combine, PValueCombine::Stouffer);
        assert_eq!(c.reference_label, "No Construct");
        assert_eq!(c.profile_reduction, ProfileReduction::Median);
    }

    #[test]
    fn levels_use_file_prefix_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map_config.json");
        std::fs::write(&path, r#"{ "levels": ["well", "sc"], "profile_reduction": "mean" }"#).unwrap();

        let c = MapConfig::load(&path).unwrap();
        assert_eq!(c.levels, vec![ProfileLevel::Well, ProfileLevel::SingleCell]);
        assert_eq!(c.profile_reduction, ProfileReduction::Mean);
        assert!(serde_json::to_string(&c).unwrap().contains(r#""levels":["well","sc"]"#));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = MapConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(c, MapConfig::default());
    }

    #[test]
    fn rejects_bad_values() {
        let c = MapConfig { threshold: 1.5, ..MapConfig::default() };
        assert!(c.validate().is_err());
        let c = MapConfig { batch_size: 0, ..MapConfig::default() };
        assert!(c.validate().is_err());
        let c = MapConfig { levels: vec![], ..MapConfig::default() };
        assert!(c.validate().is_err());
    }
}
