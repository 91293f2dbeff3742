use std::path::PathBuf;
use polars::error::PolarsResult;
use polars::frame::DataFrame;
use polars::prelude::{CsvReadOptions, CsvWriter, ParquetReader, PolarsError, SerReader, SerWriter};
use tracing::{debug, info};

use std::env;
pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => {
            // Fall back to current directory if PROJECT_ROOT not set
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        }
    }
}

use std::fs;
use std::path::Path;
use serde::Serialize;

use crate::models::polars_err;

/// Writes `config` as pretty JSON to `path`, creating parent directories.
pub fn write_config_json<T: Serialize>(config: &T, path: &Path) -> PolarsResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config).map_err(|e| polars_err(Box::new(e)))?;
    fs::write(path, json)?;
    debug!("Run configuration written to {}", path.display());
    Ok(())
}

pub fn read_csv(file_path: &str) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(PathBuf::from(file_path)))?
        .finish()
}

pub fn read_parquet(file_path: &str) -> PolarsResult<DataFrame> {
    let file = fs::File::open(file_path)?;
    ParquetReader::new(file).finish()
}

/// Dispatches on the file extension: `.parquet` or `.csv`.
pub fn read_table(file_path: &str) -> PolarsResult<DataFrame> {
    let ext = Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("parquet") | Some("pq") => read_parquet(file_path),
        Some("csv") => read_csv(file_path),
        other => Err(PolarsError::InvalidOperation(
            format!("unsupported profile format {:?} for {}", other, file_path).into(),
        )),
    }
}

/// Flat CSV with a header row and no index column.
pub fn dataframe_to_csv(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .finish(df)?;
    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn csv_roundtrip_keeps_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.csv");
        let mut df = df![
            "Metadata_siRNA" => &["NF1", "No Construct"],
            "average_precision" => &[0.5, 1.0]
        ]
        .unwrap();

        dataframe_to_csv(&mut df, &path).unwrap();
        let back = read_table(path.to_str().unwrap()).unwrap();
        assert_eq!(back.shape(), (2, 2));
        assert_eq!(back.get_column_names(), df.get_column_names());
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(read_table("profiles.xlsx").is_err());
    }
}
