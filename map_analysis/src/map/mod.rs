//! Mean Average Precision: pair classification, ranking, null calibration
//! and per-group aggregation.

pub mod aggregate;
pub mod average_precision;
pub mod null_distribution;
pub mod pairs;
pub mod pipeline;
pub mod shuffle;
pub mod similarity;

pub use aggregate::{aggregate, PValueCombine};
pub use pipeline::run_pipeline;
pub use shuffle::{shuffle_features, shuffle_meta_labels};
