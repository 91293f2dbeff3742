//! Collapse per-sample AP scores into one mAP row per group.
//!
//! Group p-values are combined from the member p-values (geometric mean by
//! default, Stouffer's Z optionally) and then Benjamini–Hochberg corrected
//! across groups. Both the raw and the corrected p-value are compared against
//! the threshold.

use std::collections::HashMap;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{info, warn};

use crate::models::{
    AP_COL, BELOW_CORRECTED_P_COL, BELOW_P_COL, CORRECTED_P_COL, MAP_COL, N_SAMPLES_COL, P_VALUE_COL,
};

/// Rule turning member p-values into one group p-value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PValueCombine {
    /// `10^-(mean(-log10 p))`
    #[default]
    GeometricMean,
    /// Upper tail of `sum(Φ⁻¹(1 - p)) / sqrt(k)`.
    Stouffer,
}

/// One aggregated group.
#[derive(Debug, Clone, PartialEq)]
pub struct MapRow {
    pub key: Vec<String>,
    pub mean_average_precision: f64,
    pub n_samples: usize,
    pub p_value: f64,
    pub corrected_p_value: f64,
    pub below_p: bool,
    pub below_corrected_p: bool,
}

pub fn combine_p_values(p_values: &[f64], method: PValueCombine) -> f64 {
    let valid: Vec<f64> = p_values.iter().copied().filter(|p| !p.is_nan()).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    let k = valid.len() as f64;

    match method {
        PValueCombine::GeometricMean => {
            let mean_neg_log10 = valid.iter().map(|p| -p.log10()).sum::<f64>() / k;
            10f64.powf(-mean_neg_log10)
        }
        PValueCombine::Stouffer => {
            let normal = Normal::standard();
            let z: f64 = valid
                .iter()
                .map(|&p| normal.inverse_cdf(1.0 - p.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON)))
                .sum::<f64>()
                / k.sqrt();
            normal.sf(z)
        }
    }
}

/// Benjamini–Hochberg adjusted p-values, in input order.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let n = p_values.len();
    let mut indexed: Vec<(usize, f64)> = p_values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut q_values = vec![0.0; n];
    let mut min_q: f64 = 1.0;
    for (rank, &(orig_idx, p)) in indexed.iter().rev().enumerate() {
        let adj_rank = n - rank;
        let q = (p * n as f64) / adj_rank as f64;
        min_q = min_q.min(q);
        q_values[orig_idx] = min_q.min(1.0);
    }
    q_values
}

/// Groups `(key, ap, p)` triples, skipping undefined APs.
///
/// Groups appear in the order their first scored member does; a group
/// without any scored member is left out entirely.
pub fn aggregate_rows(
    keys: &[Vec<String>],
    average_precision: &[f64],
    p_values: &[f64],
    threshold: f64,
    method: PValueCombine,
) -> Vec<MapRow> {
    let mut order: Vec<&Vec<String>> = Vec::new();
    let mut members: HashMap<&Vec<String>, (Vec<f64>, Vec<f64>)> = HashMap::new();

    for ((key, &ap), &p) in keys.iter().zip(average_precision).zip(p_values) {
        if ap.is_nan() {
            continue;
        }
        let entry = members.entry(key).or_insert_with(|| {
            order.push(key);
            (Vec::new(), Vec::new())
        });
        entry.0.push(ap);
        entry.1.push(p);
    }

    let mut rows: Vec<MapRow> = order
        .into_iter()
        .map(|key| {
            let (aps, ps) = &members[key];
            MapRow {
                key: key.clone(),
                mean_average_precision: aps.iter().sum::<f64>() / aps.len() as f64,
                n_samples: aps.len(),
                p_value: combine_p_values(ps, method),
                corrected_p_value: f64::NAN,
                below_p: false,
                below_corrected_p: false,
            }
        })
        .collect();

    let raw: Vec<f64> = rows.iter().map(|r| r.p_value).collect();
    for (row, q) in rows.iter_mut().zip(benjamini_hochberg(&raw)) {
        row.corrected_p_value = q;
        row.below_p = row.p_value < threshold;
        row.below_corrected_p = q < threshold;
    }
    rows
}

fn group_keys(df: &DataFrame, sameby: &[String]) -> PolarsResult<Vec<Vec<String>>> {
    let mut keys: Vec<Vec<String>> = vec![Vec::with_capacity(sameby.len()); df.height()];
    for name in sameby {
        let casted = df.column(name)?.cast(&DataType::String)?;
        for (row, opt) in casted.str()?.into_iter().enumerate() {
            let v = opt.ok_or_else(|| {
                PolarsError::ComputeError(format!("missing group key in '{}' at row {}", name, row).into())
            })?;
            keys[row].push(v.to_string());
        }
    }
    Ok(keys)
}

fn float_values(df: &DataFrame, name: &str) -> PolarsResult<Vec<f64>> {
    let casted = df.column(name)?.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// mAP table for an AP score table grouped by `sameby`.
pub fn aggregate(
    ap_scores: &DataFrame,
    sameby: &[String],
    threshold: f64,
    method: PValueCombine,
) -> PolarsResult<DataFrame> {
    if sameby.is_empty() {
        return Err(PolarsError::InvalidOperation("sameby must name at least one column".into()));
    }

    let keys = group_keys(ap_scores, sameby)?;
    let aps = float_values(ap_scores, AP_COL)?;
    let ps = float_values(ap_scores, P_VALUE_COL)?;

    let dropped = aps.iter().filter(|v| v.is_nan()).count();
    if dropped > 0 {
        warn!("Ignoring {} of {} rows with undefined average precision", dropped, aps.len());
    }

    let rows = aggregate_rows(&keys, &aps, &ps, threshold, method);
    info!(
        "Aggregated {} group(s) by {:?}: {} below p < {}, {} below corrected p",
        rows.len(),
        sameby,
        rows.iter().filter(|r| r.below_p).count(),
        threshold,
        rows.iter().filter(|r| r.below_corrected_p).count()
    );

    let mut columns: Vec<Column> = sameby
        .iter()
        .enumerate()
        .map(|(k, name)| {
            let values: Vec<&str> = rows.iter().map(|r| r.key[k].as_str()).collect();
            Column::new(PlSmallStr::from(name.as_str()), values)
        })
        .collect();
    columns.push(Column::new(MAP_COL.into(), rows.iter().map(|r| r.mean_average_precision).collect::<Vec<f64>>()));
    columns.push(Column::new(N_SAMPLES_COL.into(), rows.iter().map(|r| r.n_samples as u32).collect::<Vec<u32>>()));
    columns.push(Column::new(P_VALUE_COL.into(), rows.iter().map(|r| r.p_value).collect::<Vec<f64>>()));
    columns.push(Column::new(CORRECTED_P_COL.into(), rows.iter().map(|r| r.corrected_p_value).collect::<Vec<f64>>()));
    columns.push(Column::new(BELOW_P_COL.into(), rows.iter().map(|r| r.below_p).collect::<Vec<bool>>()));
    columns.push(Column::new(BELOW_CORRECTED_P_COL.into(), rows.iter().map(|r| r.below_corrected_p).collect::<Vec<bool>>()));

    DataFrame::new(columns)
}
