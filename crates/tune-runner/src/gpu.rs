//! NVIDIA GPU detection and utilization queries through `nvidia-smi`.

use std::process::Command;

/// Number of GPUs listed by `nvidia-smi -L`; zero when the tool is missing
pub fn gpu_count() -> usize {
    match Command::new("nvidia-smi").arg("-L").output() {
        Ok(output) if output.status.success() => {
            parse_gpu_list(&String::from_utf8_lossy(&output.stdout))
        }
        _ => 0,
    }
}

pub fn has_gpu() -> bool {
    gpu_count() > 0
}

/// Mean utilization (percent) across all GPUs
pub fn gpu_utilization() -> Option<f64> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=utilization.gpu", "--format=csv,noheader,nounits"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }
    parse_utilization(&String::from_utf8_lossy(&output.stdout))
}

fn parse_gpu_list(stdout: &str) -> usize {
    stdout
        .lines()
        .filter(|line| line.trim_start().starts_with("GPU "))
        .count()
}

fn parse_utilization(stdout: &str) -> Option<f64> {
    let values: Vec<f64> = stdout
        .lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
