//! Execution Provider Perf Tuner
//!
//! Searches thread-pool sizes and environment settings for each execution
//! provider build, keeps the fastest configurations and writes a latency
//! report with reproduction snippets.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use tune_core::cli::{load_config_file, load_toml_config, setup_cli_logging};
use tune_core::{
    BuildConfig, ExecutionProvider, OptimizationLevel, ProviderBuild, ProviderMetadata, TestMode,
    TuningConfig,
};
use tune_runner::{gpu, BenchmarkRunner};
use tune_search::{
    combinations, profile_best, sort_providers, Orchestrator, Report, ReportContext, TuningOutcome,
};

/// Execution provider perf tuning
#[derive(Parser, Debug)]
#[command(
    name = "perf-tune",
    about = "Tune execution provider settings for a model",
    long_about = "Binary-search thread pool sizes and sweep environment variables for every \
                  execution provider build, then re-profile the fastest configurations and \
                  write latencies.txt / latencies.json."
)]
struct Args {
    /// Model to benchmark
    #[arg(long, value_name = "FILE")]
    model: Option<PathBuf>,

    /// Directory for results and profiles
    #[arg(long, value_name = "DIR")]
    result: Option<PathBuf>,

    /// Run configuration (TOML or JSON) used instead of the flags below
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Provider metadata (TOML): environment sweeps, graph optimizers, model recommendations
    #[arg(long, value_name = "FILE")]
    metadata: Option<PathBuf>,

    /// Build configuration directory
    #[arg(long, default_value = "RelWithDebInfo")]
    build_config: BuildConfig,

    /// Root containing <build config>/<artifact dir> builds
    #[arg(long, value_name = "DIR", default_value = "bin")]
    bin_dir: PathBuf,

    /// Benchmark test mode: times or duration
    #[arg(short = 'm', long, default_value = "times")]
    test_mode: TestMode,

    /// Comma-separated execution providers (all when empty)
    #[arg(short = 'e', long, default_value = "")]
    execution_provider: String,

    /// Repetitions per run in times mode
    #[arg(short = 'r', long, default_value_t = 20)]
    repeated_times: u32,

    /// Seconds per run in duration mode
    #[arg(short = 't', long, default_value_t = 10)]
    seconds_to_run: u32,

    /// Intra-op / OpenMP thread ceiling (default: half the logical CPUs)
    #[arg(short = 'x', long)]
    intra_op_num_threads: Option<u32>,

    /// Inter-op thread ceiling (default: half the logical CPUs)
    #[arg(short = 'y', long)]
    inter_op_num_threads: Option<u32>,

    /// Configurations kept per provider
    #[arg(short = 's', long, default_value_t = 3)]
    top_n: usize,

    /// Skip parallel execution mode tuning
    #[arg(long)]
    no_parallel: bool,

    /// Graph optimization level: 0, 1, 2 or 99
    #[arg(short = 'o', long, default_value = "99")]
    optimization_level: OptimizationLevel,

    /// Repetitions for the percentile re-run
    #[arg(long, default_value_t = 200)]
    percentile_repeats: u32,

    /// Timeout for a single benchmark process
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,

    /// Validate configuration and print the plan without running
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn to_config(&self) -> TuningConfig {
        let defaults = TuningConfig::default();
        TuningConfig {
            model: self.model.clone().unwrap_or_default(),
            result: self.result.clone().unwrap_or_default(),
            config: self.build_config,
            bin_dir: self.bin_dir.clone(),
            test_mode: self.test_mode,
            execution_provider: self.execution_provider.clone(),
            repeated_times: self.repeated_times,
            duration_time: self.seconds_to_run,
            intra_op_num_threads: self
                .intra_op_num_threads
                .unwrap_or(defaults.intra_op_num_threads),
            inter_op_num_threads: self
                .inter_op_num_threads
                .unwrap_or(defaults.inter_op_num_threads),
            top_n: self.top_n,
            parallel: !self.no_parallel,
            optimization_level: self.optimization_level,
            percentile_repeats: self.percentile_repeats,
            timeout_secs: self.timeout_secs,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    setup_cli_logging(args.verbose)?;

    info!("Execution Provider Perf Tuning");
    info!("==============================");

    let config = resolve_config(&args)?;
    config.validate().context("Invalid tuning configuration")?;

    let metadata = load_metadata(args.metadata.as_deref())?;
    let providers = config.providers()?;

    let gpu_count = gpu::gpu_count();
    if gpu_count == 0 {
        warn!("No GPU found on current device. Cuda and TensorRT performance tuning might not be available.");
    }

    print_plan(&config, &metadata, &providers)?;

    if args.dry_run {
        info!("Configuration validated successfully (dry run)");
        return Ok(());
    }

    std::fs::create_dir_all(&config.result)
        .with_context(|| format!("Failed to create result directory: {}", config.result.display()))?;

    let runner = BenchmarkRunner::with_system_sampler(config.benchmark_settings(), gpu_count > 0);
    let mut orchestrator = Orchestrator::new(runner, &config, &metadata);
    let mut outcome = TuningOutcome::default();

    let multi_progress = MultiProgress::new();
    for provider in providers {
        let spinner = multi_progress.add(ProgressBar::new_spinner());
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner.set_message(format!("Tuning {provider}"));

        match orchestrator.tune_provider(provider)? {
            Some(tuning) => {
                spinner.finish_with_message(format!(
                    "{provider}: {} trials, {} failed",
                    tuning.executed,
                    tuning.failed.len()
                ));
                outcome.absorb(tuning);
            }
            None => {
                spinner.finish_with_message(format!("{provider}: skipped (no build)"));
                outcome.skipped.push(provider);
            }
        }
    }

    info!("Re-running best candidates for percentiles...");
    profile_best(orchestrator.runner_mut(), &mut outcome.results);
    sort_providers(&mut outcome.results);

    let report = Report::build(
        &outcome,
        ReportContext {
            optimization_level: config.optimization_level,
            metadata: &metadata,
            model: &config.model,
            gpu_count,
        },
    );
    report
        .write(&config.result)
        .with_context(|| format!("Failed to write report to {}", config.result.display()))?;

    print_results(&report);
    info!("Results saved to: {}", config.result.display());

    Ok(())
}

/// Run file when given, command line otherwise
fn resolve_config(args: &Args) -> Result<TuningConfig> {
    match &args.config {
        Some(path) => load_config_file(path)
            .with_context(|| format!("Failed to load run configuration: {}", path.display())),
        None => Ok(args.to_config()),
    }
}

fn load_metadata(path: Option<&Path>) -> Result<ProviderMetadata> {
    let metadata = match path {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load provider metadata: {}", path.display()))?,
        None => ProviderMetadata::builtin(),
    };
    metadata.validate().context("Invalid provider metadata")?;
    Ok(metadata)
}

fn print_plan(
    config: &TuningConfig,
    metadata: &ProviderMetadata,
    providers: &[ExecutionProvider],
) -> Result<()> {
    info!("");
    info!("Model: {}", config.model.display());
    info!("Results: {}", config.result.display());
    info!("Builds: {}/{}", config.bin_dir.display(), config.config);
    info!(
        "Mode: {} ({})",
        config.test_mode,
        match config.test_mode {
            TestMode::Times => format!("{} repetitions", config.repeated_times),
            TestMode::Duration => format!("{} seconds", config.duration_time),
        }
    );
    info!(
        "Thread ceilings: intra {}, inter {}",
        config.intra_op_num_threads, config.inter_op_num_threads
    );
    if let Some(provider) = metadata.recommended_provider(&config.model) {
        info!("Recommended provider for this model: {}", provider);
    }
    info!("");
    info!("Providers:");
    for provider in providers {
        let build = ProviderBuild::locate(&config.bin_dir, config.config.as_str(), *provider);
        let combos = combinations(metadata.env_candidates(*provider))?.len();
        if build.is_present() {
            info!("  ✓ {} ({} env combination(s))", provider, combos);
        } else {
            info!("  ✗ {} (no build at {})", provider, build.dir.display());
        }
    }
    info!("");
    Ok(())
}

fn print_results(report: &Report) {
    println!();
    println!("{}", "Results:".green().bold());
    for (provider, records) in &report.providers {
        println!("  {}", provider.to_string().cyan().bold());
        for record in records {
            println!("    {} {} ms", record.name, record.avg);
        }
    }
    if !report.failed.is_empty() {
        println!("  {}", "failed".red().bold());
        for failed in &report.failed {
            println!("    {} {}", failed.name, "error".red());
        }
    }
}
