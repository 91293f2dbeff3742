use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// How feature values of one stratum are collapsed into a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileReduction {
    #[default]
    Median,
    Mean,
}

impl ProfileReduction {
    fn apply(&self, feature: Expr) -> Expr {
        match self {
            ProfileReduction::Median => feature.median(),
            ProfileReduction::Mean => feature.mean(),
        }
    }
}

/// One row per unique `strata` combination, in order of first appearance,
/// with every feature column reduced by `reduction`. Other columns are dropped.
pub fn aggregate_profiles(
    df: &DataFrame,
    strata: &[String],
    features: &[String],
    reduction: ProfileReduction,
) -> PolarsResult<DataFrame> {
    if strata.is_empty() {
        return Err(PolarsError::InvalidOperation("aggregation needs at least one strata column".into()));
    }

    let keys: Vec<Expr> = strata.iter().map(|s| col(s.as_str())).collect();
    let means: Vec<Expr> = features
        .iter()
        .map(|f| reduction.apply(col(f.as_str()).cast(DataType::Float64)).alias(f.as_str()))
        .collect();

    let aggregated = df.clone().lazy().group_by_stable(keys).agg(means).collect()?;
    info!(
        "Aggregated {} rows into {} profiles by {:?} ({:?})",
        df.height(),
        aggregated.height(),
        strata,
        reduction
    );
    Ok(aggregated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn median_per_well_by_default() {
        let cells = df![
            "Metadata_Well"  => &["B2", "B2", "C3", "B2"],
            "Metadata_siRNA" => &["No Construct", "No Construct", "NF1", "No Construct"],
            "Metadata_CellID" => &[1i64, 2, 3, 4],
            "Cells_Area"     => &[1.0, 2.0, 10.0, 10.0]
        ]
        .unwrap();
        let strata = vec!["Metadata_Well".to_string(), "Metadata_siRNA".to_string()];
        let out = aggregate_profiles(&cells, &strata, &["Cells_Area".to_string()], ProfileReduction::default()).unwrap();

        assert_eq!(out.shape(), (2, 3));
        let wells: Vec<&str> = out.column("Metadata_Well").unwrap().str().unwrap().into_no_null_iter().collect();
        assert_eq!(wells, vec!["B2", "C3"]);
        let area: Vec<f64> = out.column("Cells_Area").unwrap().f64().unwrap().into_no_null_iter().collect();
        // B2 holds 1, 2, 10
        assert_eq!(area, vec![2.0, 10.0]);
        assert!(out.column("Metadata_CellID").is_err());
    }

    #[test]
    fn mean_is_selectable() {
        let cells = df![
            "Metadata_Well" => &["B2", "B2", "B2"],
            "Cells_Area"    => &[1.0, 2.0, 10.0]
        ]
        .unwrap();
        let strata = vec!["Metadata_Well".to_string()];
        let out = aggregate_profiles(&cells, &strata, &["Cells_Area".to_string()], ProfileReduction::Mean).unwrap();
        let area = out.column("Cells_Area").unwrap().f64().unwrap().get(0).unwrap();
        assert!((area - 13.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_strata_is_rejected() {
        let cells = df!["Cells_Area" => &[1.0]].unwrap();
        assert!(aggregate_profiles(&cells, &[], &["Cells_Area".to_string()], ProfileReduction::Median).is_err());
    }
}
