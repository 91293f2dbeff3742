//! Column-wise permutation of feature matrices and metadata columns.
//!
//! Used to build negative-control datasets: every feature column is shuffled
//! independently, so each dimension loses its link to the row it came from
//! and to every other dimension.
//!
//! Callers hand in the RNG. Seed a `StdRng` once per shuffle when the result
//! must be reproducible.

use ndarray::{Array2, ArrayD, Ix2};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

/// Independently permutes the values of every column of `values`.
///
/// Takes ownership of the matrix, shuffles it in place and hands the same
/// buffer back.
pub fn shuffle_features<R: Rng + ?Sized>(mut values: Array2<f64>, rng: &mut R) -> Array2<f64> {
    let mut buf: Vec<f64> = Vec::with_capacity(values.nrows());

    for mut column in values.columns_mut() {
        buf.clear();
        buf.extend(column.iter().copied());
        buf.shuffle(rng);
        for (dst, v) in column.iter_mut().zip(&buf) {
            *dst = *v;
        }
    }

    values
}

/// Same as [`shuffle_features`] for an array of unknown rank.
///
/// Fails with `ShapeMismatch` unless the array is two-dimensional.
pub fn shuffle_features_dyn<R: Rng + ?Sized>(values: ArrayD<f64>, rng: &mut R) -> PolarsResult<Array2<f64>> {
    let ndim = values.ndim();
    let matrix = values.into_dimensionality::<Ix2>().map_err(|_| {
        PolarsError::ShapeMismatch(
            format!("feature values must be a 2-dimensional matrix, got {} dimension(s)", ndim).into(),
        )
    })?;
    Ok(shuffle_features(matrix, rng))
}

/// Permutes the values of `target_col` across rows, leaving every other column as is.
pub fn shuffle_meta_labels<R: Rng + ?Sized>(
    mut df: DataFrame,
    target_col: &str,
    rng: &mut R,
) -> PolarsResult<DataFrame> {
    let mut order: Vec<IdxSize> = (0..df.height() as IdxSize).collect();
    order.shuffle(rng);
    let idx = IdxCa::from_vec(PlSmallStr::from("idx"), order);

    let shuffled = df.column(target_col)?.take(&idx)?;
    df.with_column(shuffled)?;
    debug!("Shuffled {} values of '{}'", df.height(), target_col);
    Ok(df)
}

/// Pulls the named columns out of `df` as a `rows × columns` f64 matrix.
///
/// Every column must be numeric and free of nulls and non-finite values.
pub fn features_to_matrix(df: &DataFrame, feature_cols: &[String]) -> PolarsResult<Array2<f64>> {
    let mut x = Array2::<f64>::zeros((df.height(), feature_cols.len()));

    for (j, name) in feature_cols.iter().enumerate() {
        let column = df.column(name)?;
        if !(column.dtype().is_float() || column.dtype().is_integer()) {
            return Err(PolarsError::SchemaMismatch(
                format!("feature column '{}' has non-numeric type {}", name, column.dtype()).into(),
            ));
        }
        let casted = column.cast(&DataType::Float64)?;
        for (i, opt) in casted.f64()?.into_iter().enumerate() {
            let v = opt.ok_or_else(|| {
                PolarsError::ComputeError(format!("null value in feature column '{}' at row {}", name, i).into())
            })?;
            if !v.is_finite() {
                return Err(PolarsError::ComputeError(
                    format!("non-finite value {} in feature column '{}' at row {}", v, name, i).into(),
                ));
            }
            x[[i, j]] = v;
        }
    }

    Ok(x)
}

/// Shuffles the named feature columns of `df` column-wise and writes them back.
pub fn shuffle_feature_columns<R: Rng + ?Sized>(
    mut df: DataFrame,
    feature_cols: &[String],
    rng: &mut R,
) -> PolarsResult<DataFrame> {
    let shuffled = shuffle_features(features_to_matrix(&df, feature_cols)?, rng);

    for (j, name) in feature_cols.iter().enumerate() {
        let values: Vec<f64> = shuffled.column(j).to_vec();
        df.with_column(Column::new(PlSmallStr::from(name.as_str()), values))?;
    }
    Ok(df)
}
