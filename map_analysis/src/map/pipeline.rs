use ndarray::ArrayView2;
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::map::average_precision::{compute_average_precision, ApRow};
use crate::map::null_distribution::assign_p_values;
use crate::map::pairs::PairClassifier;
use crate::models::{GroupingRules, MapParams, AP_COL, N_POS_COL, N_TOTAL_COL, P_VALUE_COL};

/// Appends the AP columns to a copy of `meta`. `rows` must be in row order.
pub fn ap_rows_to_frame(meta: &DataFrame, rows: &[ApRow]) -> PolarsResult<DataFrame> {
    if rows.len() != meta.height() {
        return Err(PolarsError::ShapeMismatch(
            format!("{} AP rows for {} metadata rows", rows.len(), meta.height()).into(),
        ));
    }
    let columns = [
        Column::new(AP_COL.into(), rows.iter().map(|r| r.average_precision).collect::<Vec<f64>>()),
        Column::new(P_VALUE_COL.into(), rows.iter().map(|r| r.p_value).collect::<Vec<f64>>()),
        Column::new(N_POS_COL.into(), rows.iter().map(|r| r.n_pos as u32).collect::<Vec<u32>>()),
        Column::new(N_TOTAL_COL.into(), rows.iter().map(|r| r.n_total as u32).collect::<Vec<u32>>()),
    ];
    meta.hstack(&columns)
}

/// Per-sample AP scores and p-values for one comparison table.
///
/// `meta` holds one row per sample and every column the grouping rules
/// name; `feats` is the matching `samples × features` matrix. The result is
/// `meta` with `average_precision`, `p_value`, `n_pos_pairs` and
/// `n_total_pairs` appended. Pure in its inputs: the same arguments always
/// produce the same table, so separate comparisons can run independently.
pub fn run_pipeline(
    meta: &DataFrame,
    feats: ArrayView2<f64>,
    rules: &GroupingRules,
    params: &MapParams,
) -> PolarsResult<DataFrame> {
    if meta.height() != feats.nrows() {
        return Err(PolarsError::ShapeMismatch(
            format!("metadata has {} rows but features have {}", meta.height(), feats.nrows()).into(),
        ));
    }
    if feats.ncols() == 0 {
        return Err(PolarsError::ShapeMismatch("feature matrix has no columns".into()));
    }
    if let Some(((i, j), v)) = feats.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(PolarsError::ComputeError(
            format!("non-finite feature value {} at row {}, column {}", v, i, j).into(),
        ));
    }
    if params.null_size == 0 {
        return Err(PolarsError::InvalidOperation("null_size must be positive".into()));
    }
    if params.null_size <= meta.height() {
        warn!(
            "null_size {} does not exceed the {} compared samples; p-values will be coarse",
            params.null_size,
            meta.height()
        );
    }

    let classifier = PairClassifier::new(meta, rules)?;
    let mut rows = compute_average_precision(&classifier, feats, params.batch_size, params.parallel)?;

    let n_pos_pairs: usize = rows.iter().map(|r| r.n_pos).sum::<usize>() / 2;
    let n_neg_pairs: usize = rows.iter().map(|r| r.n_total - r.n_pos).sum::<usize>() / 2;
    debug!("{} positive and {} negative pairs", n_pos_pairs, n_neg_pairs);
    if n_pos_pairs == 0 {
        warn!("No positive pairs among {} samples", meta.height());
    }
    if n_neg_pairs == 0 {
        warn!("No negative pairs among {} samples", meta.height());
    }

    let nulls = assign_p_values(&mut rows, params.null_size, params.seed, params.parallel);
    info!(
        "Scored {} samples ({} defined) against {} null configuration(s)",
        rows.len(),
        rows.iter().filter(|r| r.is_scored()).count(),
        nulls.len()
    );

    ap_rows_to_frame(meta, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use polars::df;

    fn rules() -> GroupingRules {
        GroupingRules::perturbation_vs_replicate("Metadata_siRNA", "Metadata_Well")
    }

    fn params() -> MapParams {
        MapParams { null_size: 200, batch_size: 2, seed: 0, parallel: false }
    }

    #[test]
    fn single_reference_and_treatment_are_undefined() {
        let meta = df![
            "Metadata_siRNA" => &["No Construct", "NF1"],
            "Metadata_Well"  => &["B2", "C3"]
        ]
        .unwrap();
        let feats = array![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];

        let classifier = PairClassifier::new(&meta, &rules()).unwrap();
        assert!(classifier.positive_pairs().is_empty());
        assert_eq!(classifier.negative_pairs(), vec![(0, 1)]);

        let out = run_pipeline(&meta, feats.view(), &rules(), &params()).unwrap();
        let ap = out.column(AP_COL).unwrap().f64().unwrap();
        assert!(ap.get(0).unwrap().is_nan());
        assert!(ap.get(1).unwrap().is_nan());
        let n_pos: Vec<u32> = out.column(N_POS_COL).unwrap().u32().unwrap().into_no_null_iter().collect();
        assert_eq!(n_pos, vec![0, 0]);
    }

    #[test]
    fn separable_groups_score_high() {
        let meta = df![
            "Metadata_siRNA" => &["No Construct", "No Construct", "No Construct", "NF1", "NF1", "NF1"],
            "Metadata_Well"  => &["B1", "B2", "B3", "C1", "C2", "C3"]
        ]
        .unwrap();
        let feats = array![
            [1.0, 0.0],
            [0.95, 0.05],
            [0.9, 0.1],
            [0.0, 1.0],
            [0.05, 0.95],
            [0.1, 0.9]
        ];
        let out = run_pipeline(&meta, feats.view(), &rules(), &params()).unwrap();

        assert_eq!(out.width(), meta.width() + 4);
        let ap: Vec<f64> = out.column(AP_COL).unwrap().f64().unwrap().into_no_null_iter().collect();
        assert!(ap.iter().all(|&v| v == 1.0));
        let p: Vec<f64> = out.column(P_VALUE_COL).unwrap().f64().unwrap().into_no_null_iter().collect();
        assert!(p.iter().all(|&v| v > 0.0 && v < 0.5));
    }

    #[test]
    fn same_inputs_same_output() {
        let meta = df![
            "Metadata_siRNA" => &["a", "a", "b", "b", "a"],
            "Metadata_Well"  => &["A1", "A2", "A3", "A4", "A5"]
        ]
        .unwrap();
        let feats = Array2::from_shape_fn((5, 3), |(i, j)| ((i * 7 + j * 3) % 5) as f64);
        let a = run_pipeline(&meta, feats.view(), &rules(), &params()).unwrap();
        let b = run_pipeline(&meta, feats.view(), &rules(), &MapParams { batch_size: 5, parallel: true, ..params() }).unwrap();
        let pv = |df: &DataFrame| -> Vec<f64> {
            df.column(P_VALUE_COL).unwrap().f64().unwrap().into_no_null_iter().collect()
        };
        assert_eq!(pv(&a), pv(&b));
    }

    #[test]
    fn validates_inputs() {
        let meta = df![
            "Metadata_siRNA" => &["a", "b"],
            "Metadata_Well"  => &["A1", "A2"]
        ]
        .unwrap();
        let three_rows = array![[1.0], [2.0], [3.0]];
        assert!(run_pipeline(&meta, three_rows.view(), &rules(), &params()).is_err());

        let two_rows = array![[1.0], [2.0]];
        let no_null = MapParams { null_size: 0, ..params() };
        assert!(run_pipeline(&meta, two_rows.view(), &rules(), &no_null).is_err());

        let no_batch = MapParams { batch_size: 0, ..params() };
        assert!(run_pipeline(&meta, two_rows.view(), &rules(), &no_batch).is_err());

        let no_features = Array2::<f64>::zeros((2, 0));
        assert!(run_pipeline(&meta, no_features.view(), &rules(), &params()).is_err());
    }

    #[test]
    fn infinite_features_are_rejected() {
        let n = 30;
        let sirna: Vec<&str> = (0..n).map(|i| if i < n / 2 { "No Construct" } else { "NF1" }).collect();
        let wells: Vec<String> = (0..n).map(|i| format!("W{}", i % 4)).collect();
        let meta = df!["Metadata_siRNA" => sirna, "Metadata_Well" => wells].unwrap();

        let mut feats = Array2::<f64>::from_shape_fn((n, 2), |(i, j)| (i + j) as f64 + 1.0);
        for i in (0..n).step_by(3) {
            feats[[i, 0]] = f64::INFINITY;
        }
        let err = run_pipeline(&meta, feats.view(), &rules(), &params()).unwrap_err();
        assert!(matches!(err, PolarsError::ComputeError(_)));

        feats[[0, 0]] = f64::NEG_INFINITY;
        assert!(run_pipeline(&meta, feats.view(), &rules(), &params()).is_err());
    }
}
