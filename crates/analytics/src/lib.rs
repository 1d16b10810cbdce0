//! Analytics
//!
//! Accumulates per-instrument task results per job and computes
//! distribution statistics (histograms, percentiles, outliers) on demand.
//! Queries run over a snapshot copy and may execute concurrently with
//! appends from a still-running job.

pub mod distribution;
pub mod store;

pub use distribution::{
    distribution, Bucket, DistributionRequest, DistributionResponse, MetricStatistics,
    OutlierEntry, Outliers, DEFAULT_OUTLIER_K, MAX_OUTLIER_K,
};
pub use store::ResultStore;
