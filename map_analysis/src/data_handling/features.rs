//! Split a profile's columns into metadata and CellProfiler features by name.

use polars::prelude::*;
use regex::Regex;

use crate::models::polars_err;

pub const DEFAULT_COMPARTMENTS: [&str; 3] = ["Cells", "Cytoplasm", "Nuclei"];
const METADATA_PATTERN: &str = "^Metadata_";

fn matching_columns(df: &DataFrame, pattern: &str) -> PolarsResult<Vec<String>> {
    let re = Regex::new(pattern).map_err(|e| polars_err(Box::new(e)))?;
    Ok(df
        .get_column_names()
        .iter()
        .filter(|name| re.is_match(name.as_str()))
        .map(|name| name.to_string())
        .collect())
}

/// `Metadata_*` columns when `metadata` is set, otherwise columns prefixed by
/// one of `compartments` (plus `Image_` when `image_features` is set).
///
/// Column order follows the table. Fails when nothing matches.
pub fn infer_cp_features_with(
    df: &DataFrame,
    compartments: &[String],
    image_features: bool,
    metadata: bool,
) -> PolarsResult<Vec<String>> {
    let pattern = if metadata {
        METADATA_PATTERN.to_string()
    } else {
        let mut prefixes: Vec<String> = compartments.iter().map(|c| regex::escape(c)).collect();
        if image_features {
            prefixes.push("Image".to_string());
        }
        format!("^({})_", prefixes.join("|"))
    };

    let cols = matching_columns(df, &pattern)?;
    if cols.is_empty() {
        let kind = if metadata { "metadata" } else { "CellProfiler feature" };
        return Err(PolarsError::ColumnNotFound(
            format!("no {} columns found (pattern {})", kind, pattern).into(),
        ));
    }
    Ok(cols)
}

/// [`infer_cp_features_with`] using the Cells / Cytoplasm / Nuclei compartments.
pub fn infer_cp_features(df: &DataFrame, metadata: bool) -> PolarsResult<Vec<String>> {
    let compartments: Vec<String> = DEFAULT_COMPARTMENTS.iter().map(|c| c.to_string()).collect();
    infer_cp_features_with(df, &compartments, false, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn profile() -> DataFrame {
        df![
            "Metadata_Well" => &["A1"],
            "Cells_AreaShape_Area" => &[1.0],
            "Metadata_siRNA" => &["NF1"],
            "Nuclei_Intensity_Mean" => &[2.0],
            "Image_Count_Cells" => &[3.0],
            "CellsExtra" => &[4.0]
        ]
        .unwrap()
    }

    #[test]
    fn splits_metadata_and_features() {
        let df = profile();
        assert_eq!(infer_cp_features(&df, true).unwrap(), vec!["Metadata_Well", "Metadata_siRNA"]);
        assert_eq!(
            infer_cp_features(&df, false).unwrap(),
            vec!["Cells_AreaShape_Area", "Nuclei_Intensity_Mean"]
        );
    }

    #[test]
    fn image_features_are_opt_in() {
        let compartments = vec!["Nuclei".to_string()];
        let cols = infer_cp_features_with(&profile(), &compartments, true, false).unwrap();
        assert_eq!(cols, vec!["Nuclei_Intensity_Mean", "Image_Count_Cells"]);
    }

    #[test]
    fn nothing_found_is_an_error() {
        let df = df!["x" => &[1.0]].unwrap();
        assert!(infer_cp_features(&df, false).is_err());
        assert!(infer_cp_features(&df, true).is_err());
    }
}
