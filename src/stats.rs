//! Latency percentiles, success rates and throughput derivation.

use crate::core::SeriesPoint;
use serde::{Deserialize, Serialize};

/// Percentiles and mean of a latency sample, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub avg: f64,
}

/// Computes p50/p95/p99/avg over `samples`.
///
/// Returns `None` for an empty sample so that "no data" stays distinct from
/// "zero latency".
pub fn latency_stats(samples: &[f64]) -> Option<LatencyStats> {
    if samples.is_empty() {
        return None;
    }
    let sorted = sorted_copy(samples);
    let avg = sorted.iter().sum::<f64>() / sorted.len() as f64;
    Some(LatencyStats {
        p50: percentile_sorted(&sorted, 0.50),
        p95: percentile_sorted(&sorted, 0.95),
        p99: percentile_sorted(&sorted, 0.99),
        avg,
    })
}

/// A single percentile of an unsorted sample.
pub fn percentile(samples: &[f64], q: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(percentile_sorted(&sorted_copy(samples), q))
}

/// Percentile of an ascending, non-empty sample.
///
/// The rank `q * n` is taken as a 1-based position, clamped to `[1, n]`, and
/// interpolated linearly between the two neighbouring values. For
/// `[10, 20, .., 100]` this gives p50 = 50, p95 = 95 and p99 = 99.
fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    let rank = (q * n as f64).clamp(1.0, n as f64);
    let lower = rank.floor() as usize;
    let fraction = rank - lower as f64;
    if lower >= n || fraction == 0.0 {
        return sorted[lower - 1];
    }
    let below = sorted[lower - 1];
    let above = sorted[lower];
    below + fraction * (above - below)
}

fn sorted_copy(samples: &[f64]) -> Vec<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// `100 * part / total`, or 0 when nothing was sent.
pub fn success_rate(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// A series point annotated with the send rate since the previous point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputPoint {
    pub t_offset_sec: u64,
    pub sent_count: u64,
    pub success_count: u64,
    pub fail_count: u64,
    /// Messages per second. The first point reports its raw `sent_count`.
    pub throughput: f64,
}

/// Derives per-interval throughput from points sorted by `t_offset_sec`.
///
/// Each later point gets `(sent_i - sent_{i-1}) / (t_i - t_{i-1})`, or the raw
/// delta when both share an offset. Results are clamped to be non-negative.
pub fn derive_throughput(points: &[SeriesPoint]) -> Vec<ThroughputPoint> {
    points
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let throughput = match i.checked_sub(1).map(|prev| &points[prev]) {
                None => point.sent_count as f64,
                Some(prev) => {
                    let delta = point.sent_count as f64 - prev.sent_count as f64;
                    let elapsed = point.t_offset_sec.saturating_sub(prev.t_offset_sec);
                    if elapsed > 0 {
                        delta / elapsed as f64
                    } else {
                        delta
                    }
                }
            };
            ThroughputPoint {
                t_offset_sec: point.t_offset_sec,
                sent_count: point.sent_count,
                success_count: point.success_count,
                fail_count: point.fail_count,
                throughput: throughput.max(0.0),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    fn point(t_offset_sec: u64, sent_count: u64) -> SeriesPoint {
        SeriesPoint {
            experiment_id: "exp".to_string(),
            t_offset_sec,
            sent_count,
            success_count: sent_count,
            fail_count: 0,
            p95_latency_ms: None,
        }
    }

    #[test]
    fn test_percentiles_of_ten_values() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0];
        let stats = latency_stats(&values).unwrap();
        approx(stats.p50, 50.0);
        approx(stats.p95, 95.0);
        approx(stats.p99, 99.0);
        approx(stats.avg, 55.0);
    }

    #[test]
    fn test_percentiles_ignore_input_order() {
        let values = [100.0, 10.0, 60.0, 30.0, 90.0, 20.0, 50.0, 80.0, 40.0, 70.0];
        let stats = latency_stats(&values).unwrap();
        approx(stats.p50, 50.0);
        approx(stats.p95, 95.0);
    }

    #[test]
    fn test_single_value_is_every_percentile() {
        let stats = latency_stats(&[42.0]).unwrap();
        assert_eq!(stats.p50, 42.0);
        assert_eq!(stats.p95, 42.0);
        assert_eq!(stats.p99, 42.0);
        assert_eq!(stats.avg, 42.0);
    }

    #[test]
    fn test_empty_sample_has_no_stats() {
        assert!(latency_stats(&[]).is_none());
        assert!(percentile(&[], 0.95).is_none());
    }

    #[test]
    fn test_success_rate_handles_zero_total() {
        assert_eq!(success_rate(0, 0), 0.0);
        approx(success_rate(9, 12), 75.0);
    }

    #[test]
    fn test_throughput_derivation() {
        let points = vec![point(0, 5), point(1, 5), point(3, 15)];
        let derived = derive_throughput(&points);
        let rates: Vec<f64> = derived.iter().map(|p| p.throughput).collect();
        assert_eq!(rates, vec![5.0, 0.0, 5.0]);
    }

    #[test]
    fn test_throughput_is_never_negative() {
        let points = vec![point(0, 10), point(2, 4), point(2, 7)];
        let derived = derive_throughput(&points);
        assert_eq!(derived[1].throughput, 0.0);
        assert_eq!(derived[2].throughput, 3.0);
    }

    #[test]
    fn test_throughput_of_no_points() {
        assert!(derive_throughput(&[]).is_empty());
    }
}
