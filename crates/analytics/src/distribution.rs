//! Distribution analytics over a job's successful results.
//!
//! Histogram buckets are equal-width half-open intervals over the
//! observed range (last bucket closed on the right); percentiles use
//! linear interpolation on the sorted value sequence; outliers are the
//! top/bottom-K successful results by metric value with ties broken by
//! instrument code ascending for determinism.

use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use sweep_core::{Metric, OrchestratorError, TaskResult};

/// Default number of outliers returned on each side.
pub const DEFAULT_OUTLIER_K: usize = 3;
/// Upper bound on the requested outlier count.
pub const MAX_OUTLIER_K: usize = 25;

/// How many instrument codes each bucket records as samples.
const BUCKET_SAMPLE_LIMIT: usize = 5;

/// Parameters of a distribution query.
#[derive(Debug, Clone, Copy)]
pub struct DistributionRequest {
    pub metric: Metric,
    pub bucket_count: usize,
    pub outlier_k: usize,
}

/// One histogram interval.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Bucket {
    pub range_min: f64,
    pub range_max: f64,
    pub count: usize,
    /// Up to a handful of instrument codes that fell into this bucket.
    pub sample_instrument_codes: Vec<String>,
}

/// Summary statistics over the metric values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct MetricStatistics {
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub max: f64,
    pub mean: f64,
}

/// One result ranked among the best or worst by the chosen metric.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OutlierEntry {
    pub instrument_code: String,
    pub value: f64,
    pub result_id: Uuid,
}

/// Top and bottom ranked results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Outliers {
    pub best: Vec<OutlierEntry>,
    pub worst: Vec<OutlierEntry>,
}

/// Distribution of a metric across a job's successful results.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DistributionResponse {
    pub metric: Metric,
    /// Number of successful results with a defined value for the metric.
    pub sample_count: usize,
    pub buckets: Vec<Bucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<MetricStatistics>,
    pub outliers: Outliers,
}

/// Compute the distribution of `metric` over a snapshot of task results.
///
/// Failed results and results without a defined value for the metric are
/// excluded. An empty sample yields zero buckets and no statistics.
pub fn distribution(
    results: &[TaskResult],
    request: DistributionRequest,
) -> Result<DistributionResponse, OrchestratorError> {
    if request.bucket_count == 0 {
        return Err(OrchestratorError::InvalidRequest(
            "bucket_count must be at least 1".to_string(),
        ));
    }
    let outlier_k = request.outlier_k.min(MAX_OUTLIER_K);

    // (value, instrument_code, result_id) for every eligible result.
    let mut samples: Vec<(f64, &str, Uuid)> = results
        .iter()
        .filter_map(|r| {
            r.metric_value(request.metric)
                .map(|v| (v, r.instrument_code.as_str(), r.id))
        })
        .collect();

    if samples.is_empty() {
        return Ok(DistributionResponse {
            metric: request.metric,
            sample_count: 0,
            buckets: Vec::new(),
            statistics: None,
            outliers: Outliers::default(),
        });
    }

    let range_min = samples
        .iter()
        .map(|(v, _, _)| *v)
        .fold(f64::INFINITY, f64::min);
    let range_max = samples
        .iter()
        .map(|(v, _, _)| *v)
        .fold(f64::NEG_INFINITY, f64::max);

    let buckets = build_buckets(&samples, range_min, range_max, request.bucket_count);

    // Ascending by value, ties by instrument code, for percentiles and
    // the worst-side outliers.
    samples.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    let values: Vec<f64> = samples.iter().map(|(v, _, _)| *v).collect();

    let statistics = Some(MetricStatistics {
        min: range_min,
        p25: percentile(&values, 0.25),
        median: percentile(&values, 0.50),
        p75: percentile(&values, 0.75),
        max: range_max,
        mean: values.iter().sum::<f64>() / values.len() as f64,
    });

    let worst = samples
        .iter()
        .take(outlier_k)
        .map(|(value, code, id)| OutlierEntry {
            instrument_code: (*code).to_string(),
            value: *value,
            result_id: *id,
        })
        .collect();

    // Best side: descending by value, ties still ascending by code.
    let mut best_order = samples.clone();
    best_order.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    let best = best_order
        .iter()
        .take(outlier_k)
        .map(|(value, code, id)| OutlierEntry {
            instrument_code: (*code).to_string(),
            value: *value,
            result_id: *id,
        })
        .collect();

    debug!(
        metric = %request.metric,
        samples = values.len(),
        buckets = request.bucket_count,
        "Computed distribution"
    );

    Ok(DistributionResponse {
        metric: request.metric,
        sample_count: values.len(),
        buckets,
        statistics,
        outliers: Outliers { best, worst },
    })
}

fn build_buckets(
    samples: &[(f64, &str, Uuid)],
    range_min: f64,
    range_max: f64,
    bucket_count: usize,
) -> Vec<Bucket> {
    let width = (range_max - range_min) / bucket_count as f64;

    let mut buckets: Vec<Bucket> = (0..bucket_count)
        .map(|i| Bucket {
            range_min: range_min + width * i as f64,
            range_max: if i + 1 == bucket_count {
                range_max
            } else {
                range_min + width * (i + 1) as f64
            },
            count: 0,
            sample_instrument_codes: Vec::new(),
        })
        .collect();

    for (value, code, _) in samples {
        // Values equal to the range maximum land in the last bucket; a
        // degenerate single-valued range collapses into the first.
        let index = if width > 0.0 {
            (((value - range_min) / width) as usize).min(bucket_count - 1)
        } else {
            0
        };
        let bucket = &mut buckets[index];
        bucket.count += 1;
        if bucket.sample_instrument_codes.len() < BUCKET_SAMPLE_LIMIT {
            bucket.sample_instrument_codes.push((*code).to_string());
        }
    }

    buckets
}

/// Percentile by linear interpolation at rank `p * (n - 1)` over an
/// ascending-sorted slice. Caller guarantees the slice is non-empty.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let weight = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_core::TaskMetrics;

    fn success(instrument: &str, total_return: f64) -> TaskResult {
        TaskResult::success(
            Uuid::new_v4(),
            instrument,
            TaskMetrics {
                total_return,
                sharpe_ratio: Some(total_return * 2.0),
                max_drawdown: 0.1,
                win_rate: None,
                profit_factor: None,
                total_trades: 3,
            },
        )
    }

    fn request(bucket_count: usize) -> DistributionRequest {
        DistributionRequest {
            metric: Metric::TotalReturn,
            bucket_count,
            outlier_k: DEFAULT_OUTLIER_K,
        }
    }

    #[test]
    fn test_zero_bucket_count_rejected() {
        let err = distribution(&[], request(0)).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
    }

    #[test]
    fn test_empty_sample_yields_empty_distribution() {
        let failed = TaskResult::failed(Uuid::new_v4(), "A", "timeout");
        let response = distribution(&[failed], request(4)).unwrap();
        assert_eq!(response.sample_count, 0);
        assert!(response.buckets.is_empty());
        assert!(response.statistics.is_none());
        assert!(response.outliers.best.is_empty());
    }

    #[test]
    fn test_two_bucket_histogram_with_failure_excluded() {
        // Successes at -0.05 and 0.12, one failure: two buckets over
        // [-0.05, 0.12], one value each, mean 0.035.
        let results = vec![
            success("A", 0.12),
            success("B", -0.05),
            TaskResult::failed(Uuid::new_v4(), "C", "executor timed out after 30s"),
        ];
        let response = distribution(&results, request(2)).unwrap();

        assert_eq!(response.sample_count, 2);
        assert_eq!(response.buckets.len(), 2);
        assert_eq!(response.buckets[0].count, 1);
        assert_eq!(response.buckets[1].count, 1);
        assert_eq!(response.buckets[0].range_min, -0.05);
        assert_eq!(response.buckets[1].range_max, 0.12);

        let stats = response.statistics.unwrap();
        assert!((stats.mean - 0.035).abs() < 1e-12);
        assert_eq!(stats.min, -0.05);
        assert_eq!(stats.max, 0.12);
    }

    #[test]
    fn test_bucket_counts_sum_to_sample_count() {
        let results: Vec<TaskResult> = (0..37)
            .map(|i| success(&format!("I{i:02}"), -1.0 + 0.07 * f64::from(i)))
            .collect();

        for bucket_count in [1, 2, 3, 5, 10, 64] {
            let response = distribution(&results, request(bucket_count)).unwrap();
            let total: usize = response.buckets.iter().map(|b| b.count).sum();
            assert_eq!(total, 37, "bucket_count={bucket_count}");
            assert_eq!(response.buckets.len(), bucket_count);
        }
    }

    #[test]
    fn test_max_value_lands_in_last_bucket() {
        let results = vec![success("A", 0.0), success("B", 1.0)];
        let response = distribution(&results, request(4)).unwrap();
        assert_eq!(response.buckets[3].count, 1);
        assert_eq!(response.buckets[3].sample_instrument_codes, vec!["B"]);
    }

    #[test]
    fn test_single_valued_range_collapses_to_first_bucket() {
        let results = vec![success("A", 0.2), success("B", 0.2), success("C", 0.2)];
        let response = distribution(&results, request(3)).unwrap();
        assert_eq!(response.buckets.len(), 3);
        assert_eq!(response.buckets[0].count, 3);
        assert_eq!(response.buckets[1].count, 0);
        assert_eq!(response.buckets[2].count, 0);
    }

    #[test]
    fn test_percentile_interpolation_and_monotonicity() {
        let results = vec![
            success("A", 0.0),
            success("B", 0.1),
            success("C", 0.2),
            success("D", 0.3),
        ];
        let response = distribution(&results, request(1)).unwrap();
        let stats = response.statistics.unwrap();

        // p25 at rank 0.75 interpolates between 0.0 and 0.1.
        assert!((stats.p25 - 0.075).abs() < 1e-12);
        assert!((stats.median - 0.15).abs() < 1e-12);
        assert!((stats.p75 - 0.225).abs() < 1e-12);
        assert!(stats.p25 <= stats.median && stats.median <= stats.p75);
    }

    #[test]
    fn test_outliers_ranked_with_deterministic_ties() {
        let results = vec![
            success("ZZZ", 0.5),
            success("AAA", 0.5),
            success("MMM", 0.1),
            success("BBB", -0.4),
        ];
        let req = DistributionRequest {
            metric: Metric::TotalReturn,
            bucket_count: 2,
            outlier_k: 2,
        };
        let response = distribution(&results, req).unwrap();

        // Tie at 0.5 broken by instrument code ascending.
        assert_eq!(response.outliers.best[0].instrument_code, "AAA");
        assert_eq!(response.outliers.best[1].instrument_code, "ZZZ");
        assert_eq!(response.outliers.worst[0].instrument_code, "BBB");
        assert_eq!(response.outliers.worst[1].instrument_code, "MMM");
    }

    #[test]
    fn test_optional_metric_excludes_undefined_values() {
        // win_rate is None for every result here, so the sample is empty.
        let results = vec![success("A", 0.1), success("B", 0.2)];
        let req = DistributionRequest {
            metric: Metric::WinRate,
            bucket_count: 2,
            outlier_k: DEFAULT_OUTLIER_K,
        };
        let response = distribution(&results, req).unwrap();
        assert_eq!(response.sample_count, 0);
        assert!(response.statistics.is_none());
    }
}
