//! Trial specifications, their results and the runner seam.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

use crate::metrics;
use crate::provider::{ExecutionProvider, ProviderBuild};
use crate::types::EnvCombination;

/// CPU/GPU/memory utilisation averaged over a profiling run (percent)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu: f64,
    pub gpu: f64,
    pub memory: f64,
}

/// Measured outcome of a trial.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialResult {
    /// Per-iteration latencies in seconds, ascending
    pub latencies: Vec<f64>,
    /// Mean latency in milliseconds; `None` marks a failed trial
    pub avg_ms: Option<f64>,
    /// Only filled by a profiling pass
    pub resources: Option<ResourceUsage>,
    /// First command line executed for this trial
    pub command: Option<String>,
}

impl TrialResult {
    /// Stores latencies (seconds) and derives the average.
    ///
    /// An empty sample set leaves the trial failed.
    pub fn record_latencies(&mut self, mut latencies: Vec<f64>) {
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        self.avg_ms = metrics::mean_latency_ms(&latencies);
        if self.avg_ms.is_none() {
            latencies.clear();
        }
        self.latencies = latencies;
    }

    /// Marks the trial failed
    pub fn mark_failed(&mut self) {
        self.latencies.clear();
        self.avg_ms = None;
    }

    /// Keeps the first command only
    pub fn record_command(&mut self, command: String) {
        if self.command.is_none() {
            self.command = Some(command);
        }
    }
}

/// One concrete benchmark invocation.
#[derive(Debug, Clone)]
pub struct TrialSpec {
    /// Unique name encoding the tuned dimension and value
    pub name: String,
    pub description: String,
    pub provider: ExecutionProvider,
    pub executable: PathBuf,
    /// Shared library directory exported to the child
    pub library_dir: PathBuf,
    /// Trial-specific arguments, before the common benchmark flags
    pub args: Vec<String>,
    /// Environment overlay applied on top of the inherited environment
    pub env: EnvCombination,
    pub model: PathBuf,
    pub result_dir: PathBuf,
    pub result: TrialResult,
}

impl TrialSpec {
    /// Creates a trial against a provider build
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        build: &ProviderBuild,
        args: Vec<String>,
        env: EnvCombination,
        model: PathBuf,
        result_dir: PathBuf,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            provider: build.provider,
            executable: build.executable.clone(),
            library_dir: build.dir.clone(),
            args,
            env,
            model,
            result_dir,
            result: TrialResult::default(),
        }
    }

    /// Same invocation under a new name, with an empty result
    pub fn derive(&self, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            result: TrialResult::default(),
            ..self.clone()
        }
    }

    pub fn avg_ms(&self) -> Option<f64> {
        self.result.avg_ms
    }

    pub fn succeeded(&self) -> bool {
        self.result.avg_ms.is_some()
    }

    /// Value following the last occurrence of `flag` in the arguments
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        let idx = self.args.iter().rposition(|a| a == flag)?;
        self.args.get(idx + 1).map(String::as_str)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

/// Which measurement a run is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPass {
    /// Regular measurement used to rank candidates
    Ranking,
    /// Larger sample count plus trace and resource profiling
    Profiling,
}

/// Executes trials and fills in their results.
///
/// Implementations never fail the caller: a trial that cannot be measured is
/// left with `avg_ms == None`.
pub trait TrialRunner {
    fn run(&mut self, trial: &mut TrialSpec, pass: RunPass);
}

impl<R: TrialRunner + ?Sized> TrialRunner for &mut R {
    fn run(&mut self, trial: &mut TrialSpec, pass: RunPass) {
        (**self).run(trial, pass)
    }
}

/// Successful and failed trials of one provider.
#[derive(Debug, Clone, Default)]
pub struct TrialLedger {
    pub successful: Vec<TrialSpec>,
    pub failed: Vec<TrialSpec>,
}

impl TrialLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files an executed trial by outcome
    pub fn record(&mut self, trial: TrialSpec) {
        if trial.succeeded() {
            self.successful.push(trial);
        } else {
            self.failed.push(trial);
        }
    }

    pub fn len(&self) -> usize {
        self.successful.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Successful trials sorted by average latency, truncated to `n`.
    ///
    /// Sorting is stable, so ties keep execution order.
    pub fn top_n(&self, n: usize) -> Vec<TrialSpec> {
        let mut ranked = self.successful.clone();
        sort_by_latency(&mut ranked);
        ranked.truncate(n);
        ranked
    }
}

/// Stable ascending sort on average latency; failed trials sort last
pub fn sort_by_latency(trials: &mut [TrialSpec]) {
    trials.sort_by(|a, b| match (a.avg_ms(), b.avg_ms()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
