//! Percentile re-profiling and the persisted tuning report.

use chrono::Utc;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use tune_core::metrics::{p90_ms, p95_ms, round_to};
use tune_core::{
    ExecutionProvider, OptimizationLevel, ProviderMetadata, Result, RunPass, TrialRunner, TrialSpec,
};

use crate::orchestrator::{ProviderResultSet, TuningOutcome};
use crate::snippet::CodeSnippet;

pub const LATENCY_LOG: &str = "latencies.txt";
pub const LATENCY_JSON: &str = "latencies.json";

/// Re-runs each provider's best trial with the profiling pass.
///
/// A failed re-run leaves the ranking measurement in place.
pub fn profile_best<R: TrialRunner>(runner: &mut R, results: &mut [ProviderResultSet]) {
    for set in results.iter_mut() {
        let Some(best) = set.best_mut() else {
            continue;
        };

        let mut profiled = best.clone();
        runner.run(&mut profiled, RunPass::Profiling);
        if profiled.succeeded() {
            *best = profiled;
        } else {
            warn!("Profiling of {} failed, keeping ranking result", best.name);
        }
    }
}

/// Orders providers by their best average latency
pub fn sort_providers(results: &mut [ProviderResultSet]) {
    results.sort_by(|a, b| {
        let lhs = a.best().and_then(TrialSpec::avg_ms);
        let rhs = b.best().and_then(TrialSpec::avg_ms);
        match (lhs, rhs) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialRecord {
    pub name: String,
    pub command: Option<String>,
    pub avg: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p90: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95: Option<f64>,
    pub cpu_usage: f64,
    pub gpu_usage: f64,
    pub memory_util: f64,
    pub code_snippet: CodeSnippet,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedRecord {
    pub name: String,
    pub command: Option<String>,
    pub result: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub generated_at: String,
    pub model: PathBuf,
    pub gpu_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_provider: Option<ExecutionProvider>,
}

/// What the report needs beyond the trials themselves
#[derive(Debug, Clone, Copy)]
pub struct ReportContext<'a> {
    pub optimization_level: OptimizationLevel,
    pub metadata: &'a ProviderMetadata,
    pub model: &'a Path,
    pub gpu_count: usize,
}

/// Final tuning report.
///
/// Serializes as a map from provider name to its trial records, ordered by
/// best latency, followed by `failed` and `metadata`.
#[derive(Debug, Clone)]
pub struct Report {
    pub providers: Vec<(ExecutionProvider, Vec<TrialRecord>)>,
    pub failed: Vec<FailedRecord>,
    pub metadata: ReportMetadata,
}

impl Report {
    /// Builds the report from providers already sorted by [`sort_providers`]
    pub fn build(outcome: &TuningOutcome, ctx: ReportContext<'_>) -> Self {
        let providers = outcome
            .results
            .iter()
            .map(|set| {
                let records = set
                    .trials
                    .iter()
                    .filter_map(|trial| record(trial, &ctx))
                    .collect();
                (set.provider, records)
            })
            .collect();

        let failed = outcome
            .failed
            .iter()
            .filter(|trial| ctx.gpu_count > 0 || !trial.provider.requires_gpu())
            .map(|trial| FailedRecord {
                name: trial.name.clone(),
                command: trial.result.command.clone(),
                result: "error",
            })
            .collect();

        let recommended_provider = ctx.metadata.recommended_provider(ctx.model);
        if let Some(provider) = recommended_provider {
            info!("Recommended provider for {}: {}", ctx.model.display(), provider);
        }

        Self {
            providers,
            failed,
            metadata: ReportMetadata {
                generated_at: Utc::now().to_rfc3339(),
                model: ctx.model.to_path_buf(),
                gpu_count: ctx.gpu_count,
                recommended_provider,
            },
        }
    }

    /// `<name> <avg> ms` per success, then `<name> error` per failure
    pub fn latency_log(&self) -> String {
        let mut out = String::new();
        for (_, records) in &self.providers {
            for r in records {
                out.push_str(&format!("{} {} ms\n", r.name, r.avg));
            }
        }
        for f in &self.failed {
            out.push_str(&format!("{} error\n", f.name));
        }
        out
    }

    /// Writes `latencies.txt` and `latencies.json` into `dir`
    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(LATENCY_LOG), self.latency_log())?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(LATENCY_JSON), json)?;
        Ok(())
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (provider, records) in &self.providers {
            map.serialize_entry(provider.as_str(), records)?;
        }
        if !self.failed.is_empty() {
            map.serialize_entry("failed", &self.failed)?;
        }
        map.serialize_entry("metadata", &self.metadata)?;
        map.end()
    }
}

fn record(trial: &TrialSpec, ctx: &ReportContext<'_>) -> Option<TrialRecord> {
    let avg = trial.avg_ms()?;
    let latencies = &trial.result.latencies;
    let usage = trial.result.resources.unwrap_or_default();

    Some(TrialRecord {
        name: trial.name.clone(),
        command: trial.result.command.clone(),
        avg,
        p90: p90_ms(latencies),
        p95: p95_ms(latencies),
        cpu_usage: round_to(usage.cpu / 100.0, 5),
        gpu_usage: round_to(usage.gpu, 5),
        memory_util: round_to(usage.memory / 100.0, 5),
        code_snippet: CodeSnippet::for_trial(
            trial,
            ctx.optimization_level,
            ctx.metadata.graph_optimizer(trial.provider),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{template, ScriptedRunner};
    use tempfile::TempDir;
    use tune_core::ResourceUsage;

    fn measured(provider: ExecutionProvider, name: &str, ms: f64, samples: usize) -> TrialSpec {
        let mut trial = template(provider, name);
        trial.result.record_command(format!("perf_test {name}"));
        trial.result.record_latencies(vec![ms / 1000.0; samples]);
        trial
    }

    fn failed(provider: ExecutionProvider, name: &str) -> TrialSpec {
        let mut trial = template(provider, name);
        trial.result.mark_failed();
        trial
    }

    fn context(metadata: &ProviderMetadata, gpu_count: usize) -> ReportContext<'_> {
        ReportContext {
            optimization_level: OptimizationLevel::All,
            metadata,
            model: Path::new("model.onnx"),
            gpu_count,
        }
    }

    #[test]
    fn test_profile_best_replaces_in_place() {
        let mut results = vec![ProviderResultSet {
            provider: ExecutionProvider::Cpu,
            trials: vec![
                measured(ExecutionProvider::Cpu, "cpu_4_intra_threads", 3.0, 5),
                measured(ExecutionProvider::Cpu, "cpu", 4.0, 5),
            ],
        }];
        let mut runner = ScriptedRunner::new(|_, pass| {
            (pass == RunPass::Profiling).then_some(2.5)
        });
        runner.samples = 200;

        profile_best(&mut runner, &mut results);

        assert_eq!(runner.runs, vec![("cpu_4_intra_threads".to_string(), RunPass::Profiling)]);
        let best = results[0].best().unwrap();
        assert_eq!(best.avg_ms(), Some(2.5));
        assert_eq!(best.result.latencies.len(), 200);
        assert_eq!(best.result.command.as_deref(), Some("perf_test cpu_4_intra_threads"));
        assert_eq!(results[0].trials[1].avg_ms(), Some(4.0));
    }

    #[test]
    fn test_failed_profiling_keeps_ranking_result() {
        let mut results = vec![ProviderResultSet {
            provider: ExecutionProvider::Cpu,
            trials: vec![measured(ExecutionProvider::Cpu, "cpu", 3.0, 5)],
        }];
        let mut runner = ScriptedRunner::new(|_, _| None);

        profile_best(&mut runner, &mut results);

        let best = results[0].best().unwrap();
        assert_eq!(best.avg_ms(), Some(3.0));
        assert!(best.result.resources.is_none());
    }

    #[test]
    fn test_sort_providers_by_best() {
        let mut results = vec![
            ProviderResultSet {
                provider: ExecutionProvider::Cpu,
                trials: vec![measured(ExecutionProvider::Cpu, "cpu", 8.0, 1)],
            },
            ProviderResultSet {
                provider: ExecutionProvider::Dnnl,
                trials: vec![measured(ExecutionProvider::Dnnl, "dnnl", 2.0, 1)],
            },
        ];
        sort_providers(&mut results);
        assert_eq!(results[0].provider, ExecutionProvider::Dnnl);
    }

    #[test]
    fn test_percentiles_need_enough_samples() {
        let metadata = ProviderMetadata::default();
        let ctx = context(&metadata, 1);

        let short = record(&measured(ExecutionProvider::Cpu, "a", 1.0, 9), &ctx).unwrap();
        assert!(short.p90.is_none() && short.p95.is_none());

        let mut trial = template(ExecutionProvider::Cpu, "b");
        trial
            .result
            .record_latencies((1..=15).map(|i| i as f64 / 1000.0).collect());
        let mid = record(&trial, &ctx).unwrap();
        assert_eq!(mid.p90, Some(14.0));
        assert!(mid.p95.is_none());
    }

    #[test]
    fn test_usage_fields_are_scaled() {
        let metadata = ProviderMetadata::default();
        let mut trial = measured(ExecutionProvider::Cpu, "cpu", 1.0, 3);
        trial.result.resources = Some(ResourceUsage {
            cpu: 55.5,
            gpu: 12.25,
            memory: 40.0,
        });
        let r = record(&trial, &context(&metadata, 0)).unwrap();
        assert_eq!(r.cpu_usage, 0.555);
        assert_eq!(r.gpu_usage, 12.25);
        assert_eq!(r.memory_util, 0.4);
    }

    #[test]
    fn test_gpu_failures_dropped_without_gpu() {
        let metadata = ProviderMetadata::default();
        let outcome = TuningOutcome {
            results: Vec::new(),
            failed: vec![
                failed(ExecutionProvider::Cuda, "cuda"),
                failed(ExecutionProvider::Tensorrt, "tensorrt_2_intra_threads"),
                failed(ExecutionProvider::Cpu, "cpu_3_intra_threads"),
            ],
            skipped: Vec::new(),
        };

        let without = Report::build(&outcome, context(&metadata, 0));
        let names: Vec<_> = without.failed.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["cpu_3_intra_threads"]);

        let with = Report::build(&outcome, context(&metadata, 1));
        assert_eq!(with.failed.len(), 3);
    }

    #[test]
    fn test_report_files() {
        let dir = TempDir::new().unwrap();
        let mut metadata = ProviderMetadata::default();
        metadata.models.insert("model.onnx".to_string(), "dnnl".to_string());

        let outcome = TuningOutcome {
            results: vec![
                ProviderResultSet {
                    provider: ExecutionProvider::Dnnl,
                    trials: vec![measured(ExecutionProvider::Dnnl, "dnnl_4_OMP_threads", 2.0, 20)],
                },
                ProviderResultSet {
                    provider: ExecutionProvider::Cpu,
                    trials: vec![
                        measured(ExecutionProvider::Cpu, "cpu_3_intra_threads", 3.0, 5),
                        measured(ExecutionProvider::Cpu, "cpu", 3.5, 5),
                    ],
                },
            ],
            failed: vec![failed(ExecutionProvider::Cpu, "cpu_parallel_2_inter_threads")],
            skipped: Vec::new(),
        };

        let report = Report::build(&outcome, context(&metadata, 0));
        report.write(dir.path()).unwrap();

        let log = fs::read_to_string(dir.path().join(LATENCY_LOG)).unwrap();
        assert_eq!(
            log,
            "dnnl_4_OMP_threads 2 ms\n\
             cpu_3_intra_threads 3 ms\n\
             cpu 3.5 ms\n\
             cpu_parallel_2_inter_threads error\n"
        );

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(LATENCY_JSON)).unwrap())
                .unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert!(keys.contains(&"dnnl".to_string()));
        assert_eq!(json["dnnl"][0]["p95"], 2.0);
        assert_eq!(json["cpu"][1]["name"], "cpu");
        assert!(json["cpu"][0].get("p90").is_none());
        assert_eq!(json["failed"][0]["result"], "error");
        assert_eq!(json["metadata"]["recommended_provider"], "dnnl");

        let text = fs::read_to_string(dir.path().join(LATENCY_JSON)).unwrap();
        let dnnl_at = text.find("\"dnnl\"").unwrap();
        let cpu_at = text.find("\"cpu\"").unwrap();
        assert!(dnnl_at < cpu_at);
    }
}
