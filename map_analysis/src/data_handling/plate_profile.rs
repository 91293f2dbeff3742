use polars::prelude::*;
use tracing::{debug, error, info};

use crate::helper_functions::read_table;
use crate::models::Dataset;

/// Label given to cells without any perturbation annotation.
pub const NO_CONSTRUCT: &str = "No Construct";

/// A normalized single-cell profile table (Parquet or CSV).
pub struct PlateProfile {
    pub path: String,
    /// Column holding the perturbation identity, e.g. `Metadata_siRNA`.
    pub perturbation_col: String,
    /// Value that replaces a missing perturbation.
    pub missing_label: String,
}

impl PlateProfile {
    pub fn new(path: &str, perturbation_col: &str) -> Self {
        Self {
            path: path.to_string(),
            perturbation_col: perturbation_col.to_string(),
            missing_label: NO_CONSTRUCT.to_string(),
        }
    }
}

/// Missing perturbations become `missing_label`; afterwards any row with a
/// null (or NaN float) in any column is dropped.
fn fill_and_drop_missing(df: DataFrame, perturbation_col: &str, missing_label: &str) -> PolarsResult<DataFrame> {
    let before = df.height();

    let nan_filters: Vec<Expr> = df
        .get_columns()
        .iter()
        .filter(|c| c.dtype().is_float())
        .map(|c| col(c.name().as_str()).is_not_nan())
        .collect();

    let mut lf = df
        .lazy()
        .with_column(
            col(perturbation_col)
                .cast(DataType::String)
                .fill_null(lit(missing_label))
                .alias(perturbation_col),
        );
    for f in nan_filters {
        lf = lf.filter(f);
    }
    let cleaned = lf.collect()?.drop_nulls::<String>(None)?;

    debug!("Dropped {} of {} rows with missing values", before - cleaned.height(), before);
    Ok(cleaned)
}

impl Dataset for PlateProfile {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading plate profile from {}", &self.path);

        let df = match read_table(&self.path) {
            Ok(df) => df,
            Err(e) => {
                error!("Failed to read plate profile: {}", e);
                return Err(e);
            }
        };
        if df.column(&self.perturbation_col).is_err() {
            return Err(PolarsError::ColumnNotFound(
                format!("perturbation column '{}' missing from {}", self.perturbation_col, self.path).into(),
            ));
        }

        let df = self.clean(df)?;
        info!("Profile shape after cleaning: {:?}", df.shape());
        Ok(df)
    }

    fn clean(&self, df: DataFrame) -> PolarsResult<DataFrame> {
        fill_and_drop_missing(df, &self.perturbation_col, &self.missing_label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper_functions::dataframe_to_csv;
    use polars::df;

    fn raw() -> DataFrame {
        df![
            "Metadata_siRNA" => &[Some("NF1"), None, Some("NF1"), None],
            "Metadata_Well"  => &[Some("C1"), Some("B1"), None, Some("B2")],
            "Cells_Area"     => &[Some(1.0), Some(2.0), Some(3.0), Some(f64::NAN)]
        ]
        .unwrap()
    }

    #[test]
    fn missing_sirna_becomes_no_construct_and_survives() {
        let profile = PlateProfile::new("unused.csv", "Metadata_siRNA");
        let out = profile.clean(raw()).unwrap();

        // row 2 lacks a well, row 3 has a NaN feature
        assert_eq!(out.height(), 2);
        let sirna: Vec<&str> = out.column("Metadata_siRNA").unwrap().str().unwrap().into_no_null_iter().collect();
        assert_eq!(sirna, vec!["NF1", NO_CONSTRUCT]);
        let wells: Vec<&str> = out.column("Metadata_Well").unwrap().str().unwrap().into_no_null_iter().collect();
        assert_eq!(wells, vec!["C1", "B1"]);
    }

    #[test]
    fn loads_csv_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plate.csv");
        let mut df = df![
            "Metadata_siRNA" => &[Some("NF1"), None],
            "Metadata_Well"  => &["C1", "B1"],
            "Cells_Area"     => &[1.0, 2.0]
        ]
        .unwrap();
        dataframe_to_csv(&mut df, &path).unwrap();

        let loaded = PlateProfile::new(path.to_str().unwrap(), "Metadata_siRNA").load().unwrap();
        assert_eq!(loaded.height(), 2);
        let sirna = loaded.column("Metadata_siRNA").unwrap().str().unwrap();
        assert_eq!(sirna.get(1), Some(NO_CONSTRUCT));
    }

    #[test]
    fn missing_perturbation_column_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plate.csv");
        let mut df = df!["Metadata_Well" => &["C1"], "Cells_Area" => &[1.0]].unwrap();
        dataframe_to_csv(&mut df, &path).unwrap();

        assert!(PlateProfile::new(path.to_str().unwrap(), "Metadata_siRNA").load().is_err());
    }
}
