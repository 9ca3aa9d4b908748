//! Parsing of the benchmark's latency sample file.

use std::fs;
use std::path::Path;

/// Fields per latency record
const RECORD_FIELDS: usize = 5;

/// Latencies (seconds) from the second field of every 5-field record.
///
/// Header, summary and malformed lines are skipped, as are negative or
/// non-finite latencies.
pub fn parse_latencies(content: &str) -> Vec<f64> {
    content
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != RECORD_FIELDS {
                return None;
            }
            fields[1].trim().parse::<f64>().ok()
        })
        .filter(|v| v.is_finite() && *v >= 0.0)
        .collect()
}

/// Reads a result file; `None` when it was never written
pub fn read_latency_file(path: &Path) -> Option<Vec<f64>> {
    fs::read_to_string(path).ok().map(|c| parse_latencies(&c))
}

/// Removes a transient file if present
pub fn remove_if_exists(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_latencies_skips_other_lines() {
        let content = "iteration,latency,a,b,c\n\
                       1,0.012,0,0,0\n\
                       2, 0.010 ,0,0,0\n\
                       summary,0.011\n\
                       \n\
                       3,0.5,0,0\n";
        // The header has 5 fields but a non-numeric latency
        assert_eq!(parse_latencies(content), vec![0.012, 0.010]);
    }

    #[test]
    fn test_parse_latencies_rejects_out_of_range_values() {
        let content = "1,inf,0,0,0\n\
                       2,NaN,0,0,0\n\
                       3,-0.5,0,0,0\n\
                       4,0.020,0,0,0\n";
        assert_eq!(parse_latencies(content), vec![0.020]);
    }

    #[test]
    fn test_missing_file() {
        assert!(read_latency_file(Path::new("/nonexistent/result/file")).is_none());
    }
}
