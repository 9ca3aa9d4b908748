//! Benchmark-backed [`TrialRunner`].
//!
//! Every measurement is a warm-up invocation whose output is discarded
//! followed by the measured invocation. A profiling pass additionally
//! re-runs the trial with tracing enabled while resources are sampled.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use tune_core::{BenchmarkSettings, RunPass, TrialRunner, TrialSpec};

use crate::output::{read_latency_file, remove_if_exists};
use crate::process::{benchmark_command, command_line, invocation_args, run_with_timeout, ProcessOutcome};
use crate::profile;
use crate::sampler::{ResourceSampler, SamplingSession, SystemSampler};

/// Runs trials through the external benchmark executable
pub struct BenchmarkRunner<S: ResourceSampler = SystemSampler> {
    settings: BenchmarkSettings,
    sampler: S,
}

impl BenchmarkRunner<SystemSampler> {
    pub fn with_system_sampler(settings: BenchmarkSettings, sample_gpu: bool) -> Self {
        Self::new(settings, SystemSampler::new(sample_gpu))
    }
}

impl<S: ResourceSampler> BenchmarkRunner<S> {
    pub fn new(settings: BenchmarkSettings, sampler: S) -> Self {
        Self { settings, sampler }
    }

    pub fn settings(&self) -> &BenchmarkSettings {
        &self.settings
    }

    fn unique_path(dir: &Path) -> PathBuf {
        dir.join(Uuid::new_v4().simple().to_string())
    }

    /// Executes one invocation; `true` on a zero exit status
    fn execute(&self, trial: &TrialSpec, args: &[String]) -> bool {
        let mut cmd = benchmark_command(trial, args);
        match run_with_timeout(&mut cmd, self.settings.timeout) {
            Ok(ProcessOutcome::Exited(status)) => {
                if !status.success() {
                    debug!("{} exited with {}", trial.name, status);
                }
                status.success()
            }
            Ok(ProcessOutcome::TimedOut) => {
                warn!("{} timed out after {:?}", trial.name, self.settings.timeout);
                false
            }
            Err(e) => {
                warn!("{}: {}", trial.name, e);
                false
            }
        }
    }

    fn measure(&self, trial: &mut TrialSpec, flags: &[String], result_file: &Path) {
        let args = invocation_args(trial, flags, result_file);

        // Warm-up
        self.execute(trial, &args);
        remove_if_exists(result_file);

        let command = command_line(trial, &args);
        info!("{}", command);
        trial.result.record_command(command);

        let latencies = if self.execute(trial, &args) {
            read_latency_file(result_file)
        } else {
            None
        };
        remove_if_exists(result_file);

        match latencies {
            Some(latencies) => trial.result.record_latencies(latencies),
            None => trial.result.mark_failed(),
        }
    }

    fn profile(&self, trial: &mut TrialSpec, result_file: &Path) {
        let prefix = Self::unique_path(&trial.result_dir);
        let mut flags = self.settings.common_args();
        flags.extend(["-p".to_string(), prefix.to_string_lossy().into_owned()]);
        let args = invocation_args(trial, &flags, result_file);

        let hint = trial
            .result
            .latencies
            .first()
            .and_then(|secs| Duration::try_from_secs_f64(*secs).ok())
            .unwrap_or_default();

        let session = self.sampler.start(hint);
        let succeeded = self.execute(trial, &args);
        let samples = session.stop();
        remove_if_exists(result_file);

        trial.result.resources = Some(samples.summarize());

        if !succeeded {
            warn!("Profiling run of {} failed", trial.name);
            return;
        }
        match profile::find_trace_file(&prefix) {
            Some(trace) => match profile::archive_trace(&trace, &trial.result_dir, &trial.name) {
                Ok(tsv) => debug!("Profile table written to {}", tsv.display()),
                Err(e) => warn!("Failed to convert profile of {}: {}", trial.name, e),
            },
            None => warn!("No unique profile trace for {}", trial.name),
        }
    }
}

impl<S: ResourceSampler> TrialRunner for BenchmarkRunner<S> {
    fn run(&mut self, trial: &mut TrialSpec, pass: RunPass) {
        if let Err(e) = fs::create_dir_all(&trial.result_dir) {
            warn!("Cannot create {}: {}", trial.result_dir.display(), e);
            trial.result.mark_failed();
            return;
        }

        let result_file = Self::unique_path(&trial.result_dir);
        let flags = match pass {
            RunPass::Ranking => self.settings.common_args(),
            RunPass::Profiling => self.settings.percentile_args(),
        };

        self.measure(trial, &flags, &result_file);

        if pass == RunPass::Profiling && trial.succeeded() {
            self.profile(trial, &result_file);
        }

        match trial.avg_ms() {
            Some(avg) => info!("{} {} ms", trial.name, avg),
            None => info!("{} error", trial.name),
        }
    }
}
