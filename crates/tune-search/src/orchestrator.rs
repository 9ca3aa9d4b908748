//! Per-provider tuning pipeline.
//!
//! Each provider goes through four stages: inter-op thread tuning in
//! parallel mode, a sweep over environment combinations with intra-op (or
//! OpenMP) thread tuning, execution of the assembled candidates, and top-N
//! selection over everything that ran successfully.

use std::fmt;

use tracing::{info, warn};

use tune_core::{
    EnvCombination, ExecutionProvider, ProviderBuild, ProviderMetadata, Result, RunPass,
    ThreadSetting, TrialLedger, TrialRunner, TrialSpec, TuningConfig,
};

use crate::combos::combinations;
use crate::tuner::{ThreadSearch, ThreadTuner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningStage {
    InterTuning,
    EnvSweep,
    CandidateExecution,
    TopNSelection,
}

impl fmt::Display for TuningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TuningStage::InterTuning => "inter-op tuning",
            TuningStage::EnvSweep => "environment sweep",
            TuningStage::CandidateExecution => "candidate execution",
            TuningStage::TopNSelection => "top-n selection",
        };
        write!(f, "{name}")
    }
}

/// Top-N successful trials of one provider, fastest first
#[derive(Debug, Clone)]
pub struct ProviderResultSet {
    pub provider: ExecutionProvider,
    pub trials: Vec<TrialSpec>,
}

impl ProviderResultSet {
    pub fn best(&self) -> Option<&TrialSpec> {
        self.trials.first()
    }

    pub fn best_mut(&mut self) -> Option<&mut TrialSpec> {
        self.trials.first_mut()
    }
}

/// Everything one provider produced
#[derive(Debug, Clone)]
pub struct ProviderTuning {
    pub provider: ExecutionProvider,
    /// `None` when nothing succeeded
    pub results: Option<ProviderResultSet>,
    pub failed: Vec<TrialSpec>,
    /// Trials executed, probes included
    pub executed: usize,
}

/// Results across all tuned providers
#[derive(Debug, Clone, Default)]
pub struct TuningOutcome {
    pub results: Vec<ProviderResultSet>,
    pub failed: Vec<TrialSpec>,
    /// Providers without a build on disk
    pub skipped: Vec<ExecutionProvider>,
}

impl TuningOutcome {
    pub fn absorb(&mut self, tuning: ProviderTuning) {
        self.results.extend(tuning.results);
        self.failed.extend(tuning.failed);
    }
}

/// Runs the tuning pipeline with a borrowed configuration and metadata
pub struct Orchestrator<'a, R> {
    runner: R,
    config: &'a TuningConfig,
    metadata: &'a ProviderMetadata,
}

impl<'a, R: TrialRunner> Orchestrator<'a, R> {
    pub fn new(runner: R, config: &'a TuningConfig, metadata: &'a ProviderMetadata) -> Self {
        Self {
            runner,
            config,
            metadata,
        }
    }

    pub fn runner_mut(&mut self) -> &mut R {
        &mut self.runner
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    /// Build location of a provider under the configured binary root
    pub fn locate(&self, provider: ExecutionProvider) -> ProviderBuild {
        ProviderBuild::locate(&self.config.bin_dir, self.config.config.as_str(), provider)
    }

    /// Tunes every selected provider in order.
    ///
    /// Unknown provider names fail before anything runs.
    pub fn run(&mut self) -> Result<TuningOutcome> {
        let providers = self.config.providers()?;
        let mut outcome = TuningOutcome::default();

        for provider in providers {
            match self.tune_provider(provider)? {
                Some(tuning) => outcome.absorb(tuning),
                None => outcome.skipped.push(provider),
            }
        }
        Ok(outcome)
    }

    fn trial(
        &self,
        build: &ProviderBuild,
        name: String,
        description: String,
        args: Vec<String>,
        env: EnvCombination,
    ) -> TrialSpec {
        TrialSpec::new(
            name,
            description,
            build,
            args,
            env,
            self.config.model.clone(),
            self.config.result.clone(),
        )
    }

    /// Tunes one provider; `None` when its build is missing
    pub fn tune_provider(&mut self, provider: ExecutionProvider) -> Result<Option<ProviderTuning>> {
        let build = self.locate(provider);
        if !build.is_present() {
            warn!(
                "Skipping {}: no build at {}",
                provider,
                build.dir.display()
            );
            return Ok(None);
        }

        let env_combos = combinations(self.metadata.env_candidates(provider))?;
        let selector = provider.selector_args();
        let mut ledger = TrialLedger::new();
        let mut candidates = Vec::new();

        info!("{}: {}", provider, TuningStage::InterTuning);
        let best_inter = if self.config.parallel && provider.supports_parallel() {
            let mut args = selector.clone();
            args.push("-P".to_string());
            let template = self.trial(
                &build,
                format!("{provider}_parallel_"),
                format!("{provider} "),
                args,
                EnvCombination::new(),
            );
            let search = ThreadSearch::new(
                template,
                ThreadSetting::InterOp,
                self.config.inter_op_num_threads,
            );
            ThreadTuner::new(&mut self.runner)
                .search(&search, &mut ledger)
                .best
        } else {
            None
        };

        info!(
            "{}: {} over {} combination(s)",
            provider,
            TuningStage::EnvSweep,
            env_combos.len()
        );
        let intra = ThreadSetting::intra_for(provider);
        for env in env_combos {
            let env_suffix = env.name_suffix();
            let template = self.trial(
                &build,
                format!("{provider}_"),
                format!("{provider} "),
                selector.clone(),
                env.clone(),
            );
            let search = ThreadSearch::new(template, intra, self.config.intra_op_num_threads);
            let best_pool = ThreadTuner::new(&mut self.runner)
                .search(&search, &mut ledger)
                .best;

            if let (Some(inter), Some(pool)) = (best_inter, best_pool) {
                if inter > 1 && pool > 1 {
                    let mut args = selector.clone();
                    args.extend(["-P".to_string(), "-y".to_string(), inter.to_string()]);
                    let mut combined = self.trial(
                        &build,
                        format!(
                            "{provider}_parallel_{pool}{}_{inter}_inter_threads{env_suffix}",
                            intra.name_suffix()
                        ),
                        format!(
                            "{provider} {pool}{}{inter} inter_op_num_threads, {env_suffix}",
                            intra.description_suffix()
                        ),
                        args,
                        env.clone(),
                    );
                    intra.apply(&mut combined, pool);
                    candidates.push(combined);
                }
            }

            candidates.push(self.trial(
                &build,
                format!("{provider}{env_suffix}"),
                format!("{provider} {env_suffix}"),
                selector.clone(),
                env,
            ));
        }

        info!(
            "{}: {} of {} candidate(s)",
            provider,
            TuningStage::CandidateExecution,
            candidates.len()
        );
        for mut candidate in candidates {
            self.runner.run(&mut candidate, RunPass::Ranking);
            ledger.record(candidate);
        }

        info!("{}: {}", provider, TuningStage::TopNSelection);
        let executed = ledger.len();
        let top = ledger.top_n(self.config.top_n);
        if top.is_empty() {
            warn!("{}: every trial failed", provider);
        }

        Ok(Some(ProviderTuning {
            provider,
            results: (!top.is_empty()).then(|| ProviderResultSet {
                provider,
                trials: top,
            }),
            failed: ledger.failed,
            executed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use std::fs;
    use tempfile::TempDir;
    use tune_core::{EnvVarCandidates, ProviderEntry};

    fn config(bin: &TempDir, providers: &str) -> TuningConfig {
        TuningConfig {
            model: "model.onnx".into(),
            result: bin.path().join("results"),
            bin_dir: bin.path().to_path_buf(),
            execution_provider: providers.to_string(),
            intra_op_num_threads: 4,
            inter_op_num_threads: 4,
            top_n: 3,
            ..TuningConfig::default()
        }
    }

    fn with_builds(dirs: &[&str]) -> TempDir {
        let bin = TempDir::new().unwrap();
        for dir in dirs {
            fs::create_dir_all(bin.path().join("RelWithDebInfo").join(dir)).unwrap();
        }
        bin
    }

    #[test]
    fn test_cpu_pipeline_candidates() {
        let bin = with_builds(&["all_eps"]);
        let config = config(&bin, "cpu");
        let metadata = ProviderMetadata::default();
        let runner = ScriptedRunner::new(|trial, _| {
            let count = |flag: &str| {
                trial
                    .arg_value(flag)
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(1.0)
            };
            Some(20.0 / count("-x") + 10.0 / count("-y"))
        });

        let mut orchestrator = Orchestrator::new(runner, &config, &metadata);
        let outcome = orchestrator.run().unwrap();
        let runner = orchestrator.into_runner();

        assert_eq!(
            runner.names(),
            vec![
                "cpu_parallel_2_inter_threads",
                "cpu_parallel_3_inter_threads",
                "cpu_2_intra_threads",
                "cpu_3_intra_threads",
                "cpu_parallel_3_intra_threads_3_inter_threads",
                "cpu",
            ]
        );
        assert_eq!(outcome.results.len(), 1);
        let set = &outcome.results[0];
        assert_eq!(set.provider, ExecutionProvider::Cpu);
        assert_eq!(set.trials.len(), 3);
        let combined = set.best().unwrap();
        assert_eq!(combined.name, "cpu_parallel_3_intra_threads_3_inter_threads");
        assert_eq!(combined.avg_ms(), Some(10.0));
        assert_eq!(
            combined.args,
            vec!["-e", "cpu", "-P", "-y", "3", "-x", "3"]
        );
        assert!(outcome.failed.is_empty());
    }

    #[test]
    fn test_native_provider_sweeps_environment() {
        let bin = with_builds(&["all_eps"]);
        let mut config = config(&bin, "dnnl");
        config.parallel = false;
        config.intra_op_num_threads = 2;
        let mut metadata = ProviderMetadata::default();
        metadata.providers.insert(
            "dnnl".to_string(),
            ProviderEntry {
                graph_optimizer: None,
                env: vec![EnvVarCandidates::new("OMP_WAIT_POLICY", ["", "ACTIVE"])],
            },
        );
        let runner = ScriptedRunner::new(|_, _| Some(5.0));

        let mut orchestrator = Orchestrator::new(runner, &config, &metadata);
        let tuning = orchestrator
            .tune_provider(ExecutionProvider::Dnnl)
            .unwrap()
            .unwrap();
        let runner = orchestrator.into_runner();

        assert_eq!(
            runner.names(),
            vec![
                "dnnl_2_OMP_threads",
                "dnnl_2_OMP_threads_OMP_WAIT_POLICY_ACTIVE",
                "dnnl",
                "dnnl_OMP_WAIT_POLICY_ACTIVE",
            ]
        );
        assert_eq!(tuning.executed, 4);
        // Ties keep execution order
        let top: Vec<_> = tuning
            .results
            .unwrap()
            .trials
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(
            top,
            vec![
                "dnnl_2_OMP_threads",
                "dnnl_2_OMP_threads_OMP_WAIT_POLICY_ACTIVE",
                "dnnl"
            ]
        );
    }

    #[test]
    fn test_failures_are_collected() {
        let bin = with_builds(&["all_eps"]);
        let config = config(&bin, "cuda");
        let metadata = ProviderMetadata::default();
        let runner = ScriptedRunner::new(|_, _| None);

        let mut orchestrator = Orchestrator::new(runner, &config, &metadata);
        let outcome = orchestrator.run().unwrap();

        assert!(outcome.results.is_empty());
        let names: Vec<_> = outcome.failed.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["cuda_2_intra_threads", "cuda"]);
    }

    #[test]
    fn test_missing_build_is_skipped() {
        let bin = with_builds(&["all_eps"]);
        let config = config(&bin, "mklml,cpu");
        let metadata = ProviderMetadata::default();
        let runner = ScriptedRunner::new(|_, _| Some(1.0));

        let mut orchestrator = Orchestrator::new(runner, &config, &metadata);
        let outcome = orchestrator.run().unwrap();

        assert_eq!(outcome.skipped, vec![ExecutionProvider::Mklml]);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].provider, ExecutionProvider::Cpu);
    }

    #[test]
    fn test_unknown_provider_runs_nothing() {
        let bin = with_builds(&["all_eps"]);
        let config = config(&bin, "cpu,warp_drive");
        let metadata = ProviderMetadata::default();
        let runner = ScriptedRunner::new(|_, _| Some(1.0));

        let mut orchestrator = Orchestrator::new(runner, &config, &metadata);
        assert!(orchestrator.run().is_err());
        assert!(orchestrator.into_runner().runs.is_empty());
    }
}
