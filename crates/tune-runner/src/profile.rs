//! Transcoding of runtime trace files into flat tables.
//!
//! The benchmark's `-p <prefix>` flag writes a JSON array of trace events to
//! a file whose name starts with the prefix. Each event becomes one row of a
//! tab separated table next to the archived JSON.

use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use tune_core::{Error, Result};

const TSV_HEADER: &str = "cat\tpid\ttid\tdur\tts\tph\tname\targs";

#[derive(Debug, Deserialize)]
struct TraceEvent {
    #[serde(default)]
    cat: Value,
    #[serde(default)]
    pid: Value,
    #[serde(default)]
    tid: Value,
    #[serde(default)]
    dur: Value,
    #[serde(default)]
    ts: Value,
    #[serde(default)]
    ph: Value,
    #[serde(default)]
    name: Value,
    #[serde(default)]
    args: Value,
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Converts a JSON trace into the TSV table
pub fn trace_to_tsv(json: &str) -> Result<String> {
    let events: Vec<TraceEvent> = serde_json::from_str(json)?;

    let mut out = String::from(TSV_HEADER);
    out.push('\n');
    for event in &events {
        let row = [
            &event.cat,
            &event.pid,
            &event.tid,
            &event.dur,
            &event.ts,
            &event.ph,
            &event.name,
            &event.args,
        ]
        .iter()
        .map(|v| cell(v))
        .collect::<Vec<_>>()
        .join("\t");
        out.push_str(&row);
        out.push('\n');
    }
    Ok(out)
}

/// The single file starting with `prefix`, if exactly one exists
pub fn find_trace_file(prefix: &Path) -> Option<PathBuf> {
    let dir = prefix.parent()?;
    let stem = prefix.file_name()?.to_string_lossy().into_owned();

    let matches: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(&stem))
        })
        .collect();

    match matches.as_slice() {
        [single] => Some(single.clone()),
        _ => None,
    }
}

/// Writes `profile_<trial>.tsv` and moves the trace to `profile_<trial>.json`.
///
/// Returns the path of the table.
pub fn archive_trace(trace: &Path, result_dir: &Path, trial_name: &str) -> Result<PathBuf> {
    let json = fs::read_to_string(trace)?;
    let table = trace_to_tsv(&json)
        .map_err(|e| Error::Serialization(format!("Bad trace {}: {e}", trace.display())))?;

    let tsv_path = result_dir.join(format!("profile_{trial_name}.tsv"));
    fs::write(&tsv_path, table)?;

    let json_path = result_dir.join(format!("profile_{trial_name}.json"));
    if fs::rename(trace, &json_path).is_err() {
        fs::copy(trace, &json_path)?;
        fs::remove_file(trace)?;
    }

    Ok(tsv_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TRACE: &str = r#"[
        {"cat": "Session", "pid": 10, "tid": 11, "dur": 250, "ts": 3, "ph": "X", "name": "model_run", "args": {}},
        {"cat": "Node", "pid": 10, "tid": 12, "dur": 40, "ts": 9, "ph": "X", "name": "conv1", "args": {"op_name": "Conv"}}
    ]"#;

    #[test]
    fn test_trace_to_tsv() {
        let table = trace_to_tsv(TRACE).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], TSV_HEADER);
        assert_eq!(lines[1], "Session\t10\t11\t250\t3\tX\tmodel_run\t{}");
        assert_eq!(lines[2], "Node\t10\t12\t40\t9\tX\tconv1\t{\"op_name\":\"Conv\"}");
    }

    #[test]
    fn test_trace_rejects_non_array() {
        assert!(trace_to_tsv("{\"cat\": 1}").is_err());
    }

    #[test]
    fn test_find_and_archive_trace() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("abc123");
        let trace = dir.path().join("abc123_2024-01-01.json");
        fs::write(&trace, TRACE).unwrap();
        fs::write(dir.path().join("unrelated"), "x").unwrap();

        let found = find_trace_file(&prefix).unwrap();
        assert_eq!(found, trace);

        let tsv = archive_trace(&found, dir.path(), "cpu_4_intra_threads").unwrap();
        assert!(tsv.ends_with("profile_cpu_4_intra_threads.tsv"));
        assert!(dir.path().join("profile_cpu_4_intra_threads.json").exists());
        assert!(!trace.exists());
    }

    #[test]
    fn test_find_trace_requires_single_match() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("p");
        assert!(find_trace_file(&prefix).is_none());

        fs::write(dir.path().join("p_1.json"), "[]").unwrap();
        fs::write(dir.path().join("p_2.json"), "[]").unwrap();
        assert!(find_trace_file(&prefix).is_none());
    }
}
