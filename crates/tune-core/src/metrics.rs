//! Latency statistics over benchmark samples.

/// Rounds `value` to `decimals` decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Mean of latencies given in seconds, in milliseconds.
///
/// The mean is rounded to the nanosecond before conversion. Returns `None`
/// when there are no samples.
pub fn mean_latency_ms(latencies: &[f64]) -> Option<f64> {
    if latencies.is_empty() {
        return None;
    }
    let mean = latencies.iter().sum::<f64>() / latencies.len() as f64;
    let ms = round_to(round_to(mean, 9) * 1000.0, 6);
    ms.is_finite().then_some(ms)
}

/// Percentile of ascending latencies (seconds), in milliseconds.
///
/// Picks the sample at `floor(n * quantile)` and only answers when at least
/// `min_samples` samples exist.
pub fn percentile_ms(sorted: &[f64], quantile: f64, min_samples: usize) -> Option<f64> {
    let n = sorted.len();
    if n == 0 || n < min_samples {
        return None;
    }
    let idx = ((n as f64 * quantile).floor() as usize).min(n - 1);
    Some(round_to(sorted[idx] * 1000.0, 5))
}

/// 90th percentile, needs 10 samples
pub fn p90_ms(sorted: &[f64]) -> Option<f64> {
    percentile_ms(sorted, 0.90, 10)
}

/// 95th percentile, needs 20 samples
pub fn p95_ms(sorted: &[f64]) -> Option<f64> {
    percentile_ms(sorted, 0.95, 20)
}

/// Average of the non-zero samples, rounded to 5 decimals.
///
/// A zero reading is a sampling artifact rather than an idle measurement.
pub fn nonzero_mean(samples: &[f64]) -> f64 {
    let kept: Vec<f64> = samples.iter().copied().filter(|x| *x != 0.0).collect();
    if kept.is_empty() {
        return 0.0;
    }
    round_to(kept.iter().sum::<f64>() / kept.len() as f64, 5)
}
