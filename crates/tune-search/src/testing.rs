//! In-memory trial runner for search and aggregation tests.

use std::path::{Path, PathBuf};

use tune_core::{
    EnvCombination, ExecutionProvider, ProviderBuild, RunPass, TrialRunner, TrialSpec,
    OMP_NUM_THREADS,
};

type LatencyFn = Box<dyn FnMut(&TrialSpec, RunPass) -> Option<f64>>;

/// Answers each trial with the latency (ms) returned by a closure
pub struct ScriptedRunner {
    latency: LatencyFn,
    /// Sample count recorded per successful run
    pub samples: usize,
    pub runs: Vec<(String, RunPass)>,
}

impl ScriptedRunner {
    pub fn new(latency: impl FnMut(&TrialSpec, RunPass) -> Option<f64> + 'static) -> Self {
        Self {
            latency: Box::new(latency),
            samples: 5,
            runs: Vec::new(),
        }
    }

    /// Latency as a function of the tuned thread count only
    pub fn by_threads(curve: impl Fn(u32) -> Option<f64> + 'static) -> Self {
        Self::new(move |trial, _| curve(threads(trial)))
    }

    pub fn names(&self) -> Vec<&str> {
        self.runs.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl TrialRunner for ScriptedRunner {
    fn run(&mut self, trial: &mut TrialSpec, pass: RunPass) {
        self.runs.push((trial.name.clone(), pass));
        trial.result.record_command(format!("perf_test {}", trial.args.join(" ")));
        match (self.latency)(trial, pass) {
            Some(ms) => trial.result.record_latencies(vec![ms / 1000.0; self.samples]),
            None => trial.result.mark_failed(),
        }
    }
}

/// Thread count a trial asks for: OpenMP pool, then `-y`, then `-x`
pub fn threads(trial: &TrialSpec) -> u32 {
    trial
        .env
        .get(OMP_NUM_THREADS)
        .or_else(|| trial.arg_value("-y"))
        .or_else(|| trial.arg_value("-x"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

pub fn template(provider: ExecutionProvider, name: &str) -> TrialSpec {
    let build = ProviderBuild::locate(Path::new("bin"), "Release", provider);
    TrialSpec::new(
        name,
        format!("{provider} "),
        &build,
        provider.selector_args(),
        EnvCombination::new(),
        PathBuf::from("model.onnx"),
        PathBuf::from("results"),
    )
}
