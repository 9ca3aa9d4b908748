//! Configuration structures for a tuning run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::provider::ExecutionProvider;
use crate::types::{MIN_SEARCH_THREADS, OMP_WAIT_POLICY};
use crate::{Error, Result};

/// How long each benchmark run lasts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    /// Fixed number of repetitions (`-r`)
    #[default]
    Times,
    /// Fixed number of seconds (`-t`)
    Duration,
}

impl TestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestMode::Times => "times",
            TestMode::Duration => "duration",
        }
    }
}

impl FromStr for TestMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "times" => Ok(TestMode::Times),
            "duration" => Ok(TestMode::Duration),
            other => Err(Error::Config(format!(
                "Please specify mode with one of the following - \"duration\", \"times\" (got \"{other}\")"
            ))),
        }
    }
}

impl std::fmt::Display for TestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Graph optimization level passed through `-o`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "LevelRepr", into = "String")]
pub enum OptimizationLevel {
    /// 0: no graph optimizations
    Disabled,
    /// 1: basic optimizations
    Basic,
    /// 2: extended optimizations
    Extended,
    /// 99: extended plus layout optimizations
    #[default]
    All,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LevelRepr {
    Number(u32),
    Text(String),
}

impl TryFrom<LevelRepr> for OptimizationLevel {
    type Error = Error;

    fn try_from(repr: LevelRepr) -> Result<Self> {
        match repr {
            LevelRepr::Number(n) => n.to_string().parse(),
            LevelRepr::Text(s) => s.parse(),
        }
    }
}

impl From<OptimizationLevel> for String {
    fn from(level: OptimizationLevel) -> Self {
        level.as_flag().to_string()
    }
}

impl OptimizationLevel {
    /// Value for the benchmark's `-o` flag
    pub fn as_flag(&self) -> &'static str {
        match self {
            OptimizationLevel::Disabled => "0",
            OptimizationLevel::Basic => "1",
            OptimizationLevel::Extended => "2",
            OptimizationLevel::All => "99",
        }
    }

    /// `GraphOptimizationLevel` member name in the Python API
    pub fn graph_optimization_level(&self) -> &'static str {
        match self {
            OptimizationLevel::Disabled => "ORT_DISABLE_ALL",
            OptimizationLevel::Basic => "ORT_ENABLE_BASIC",
            OptimizationLevel::Extended => "ORT_ENABLE_EXTENDED",
            OptimizationLevel::All => "ORT_ENABLE_ALL",
        }
    }
}

impl FromStr for OptimizationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "0" => Ok(OptimizationLevel::Disabled),
            "1" => Ok(OptimizationLevel::Basic),
            "2" => Ok(OptimizationLevel::Extended),
            "99" => Ok(OptimizationLevel::All),
            other => Err(Error::Config(format!(
                "Optimization level must be one of 0, 1, 2, 99 (got \"{other}\")"
            ))),
        }
    }
}

impl std::fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_flag())
    }
}

/// Build configuration directory under the binary root
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BuildConfig {
    Debug,
    MinSizeRel,
    Release,
    #[default]
    RelWithDebInfo,
}

impl BuildConfig {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildConfig::Debug => "Debug",
            BuildConfig::MinSizeRel => "MinSizeRel",
            BuildConfig::Release => "Release",
            BuildConfig::RelWithDebInfo => "RelWithDebInfo",
        }
    }
}

impl FromStr for BuildConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Debug" => Ok(BuildConfig::Debug),
            "MinSizeRel" => Ok(BuildConfig::MinSizeRel),
            "Release" => Ok(BuildConfig::Release),
            "RelWithDebInfo" => Ok(BuildConfig::RelWithDebInfo),
            other => Err(Error::Config(format!(
                "Please specify config with one of the following - \"Debug\", \"MinSizeRel\", \"Release\", \"RelWithDebInfo\" (got \"{other}\")"
            ))),
        }
    }
}

impl std::fmt::Display for BuildConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Half the logical CPUs, at least one
pub fn default_thread_ceiling() -> u32 {
    let logical = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(2);
    (logical / 2).max(1) as u32
}

/// Complete description of one tuning run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Model to benchmark
    pub model: PathBuf,
    /// Directory receiving reports and profiles
    pub result: PathBuf,
    /// Build configuration to use
    pub config: BuildConfig,
    /// Root holding `<config>/<artifact dir>` builds
    pub bin_dir: PathBuf,
    pub test_mode: TestMode,
    /// Comma-separated provider filter; empty means every provider
    pub execution_provider: String,
    /// Repetitions in `times` mode
    pub repeated_times: u32,
    /// Seconds in `duration` mode
    pub duration_time: u32,
    /// Ceiling for intra-op / OpenMP thread tuning
    pub intra_op_num_threads: u32,
    /// Ceiling for inter-op thread tuning
    pub inter_op_num_threads: u32,
    /// Results kept per provider
    pub top_n: usize,
    /// Tune parallel execution mode
    pub parallel: bool,
    pub optimization_level: OptimizationLevel,
    /// Repetitions for the percentile re-run
    pub percentile_repeats: u32,
    /// Upper bound on any single benchmark process
    pub timeout_secs: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        let cores = default_thread_ceiling();
        Self {
            model: PathBuf::new(),
            result: PathBuf::new(),
            config: BuildConfig::default(),
            bin_dir: PathBuf::from("bin"),
            test_mode: TestMode::Times,
            execution_provider: String::new(),
            repeated_times: 20,
            duration_time: 10,
            intra_op_num_threads: cores,
            inter_op_num_threads: cores,
            top_n: 3,
            parallel: true,
            optimization_level: OptimizationLevel::All,
            percentile_repeats: 200,
            timeout_secs: 600,
        }
    }
}

impl TuningConfig {
    /// Checks required inputs and numeric bounds
    pub fn validate(&self) -> Result<()> {
        if self.model.as_os_str().is_empty() {
            return Err(Error::Config(
                "Please specify the required argument \"model\"".to_string(),
            ));
        }
        if self.result.as_os_str().is_empty() {
            return Err(Error::Config(
                "Please specify the required argument \"result\"".to_string(),
            ));
        }
        if self.top_n == 0 {
            return Err(Error::Config("top_n must be at least 1".to_string()));
        }
        if self.intra_op_num_threads == 0 || self.inter_op_num_threads == 0 {
            return Err(Error::Config(
                "Thread ceilings must be at least 1".to_string(),
            ));
        }
        if self.intra_op_num_threads < MIN_SEARCH_THREADS
            || self.inter_op_num_threads < MIN_SEARCH_THREADS
        {
            tracing::warn!(
                "Thread ceilings below {} leave thread counts untuned",
                MIN_SEARCH_THREADS
            );
        }
        match self.test_mode {
            TestMode::Times if self.repeated_times == 0 => {
                return Err(Error::Config("repeated_times must be at least 1".to_string()));
            }
            TestMode::Duration if self.duration_time == 0 => {
                return Err(Error::Config("duration_time must be at least 1".to_string()));
            }
            _ => {}
        }
        if self.percentile_repeats == 0 {
            return Err(Error::Config(
                "percentile_repeats must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be at least 1".to_string()));
        }

        self.providers().map(|_| ())
    }

    /// Providers selected by the filter, in tuning order
    pub fn providers(&self) -> Result<Vec<ExecutionProvider>> {
        ExecutionProvider::parse_list(&self.execution_provider)
    }

    /// Settings handed to the trial runner
    pub fn benchmark_settings(&self) -> BenchmarkSettings {
        BenchmarkSettings {
            optimization_level: self.optimization_level,
            test_mode: self.test_mode,
            repeated_times: self.repeated_times,
            duration_time: self.duration_time,
            percentile_repeats: self.percentile_repeats,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Benchmark flags shared by every trial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkSettings {
    pub optimization_level: OptimizationLevel,
    pub test_mode: TestMode,
    pub repeated_times: u32,
    pub duration_time: u32,
    pub percentile_repeats: u32,
    pub timeout: Duration,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        TuningConfig::default().benchmark_settings()
    }
}

impl BenchmarkSettings {
    /// `-o <level> -m <mode>` plus the repetition or duration flag
    pub fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            self.optimization_level.as_flag().to_string(),
            "-m".to_string(),
            self.test_mode.as_str().to_string(),
        ];
        match self.test_mode {
            TestMode::Times => args.extend(["-r".to_string(), self.repeated_times.to_string()]),
            TestMode::Duration => args.extend(["-t".to_string(), self.duration_time.to_string()]),
        }
        args
    }

    /// Flags for the percentile re-run: always a fixed repetition count
    pub fn percentile_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            self.optimization_level.as_flag().to_string(),
            "-m".to_string(),
            TestMode::Times.as_str().to_string(),
            "-r".to_string(),
            self.percentile_repeats.to_string(),
        ]
    }
}

/// Candidate values for one environment variable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVarCandidates {
    pub name: String,
    /// An empty string stands for "leave unset"
    pub values: Vec<String>,
}

impl EnvVarCandidates {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Per-provider metadata entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Graph optimizer recommended for this provider
    #[serde(default)]
    pub graph_optimizer: Option<String>,
    /// Environment variables to sweep, in declaration order
    #[serde(default)]
    pub env: Vec<EnvVarCandidates>,
}

/// Static lookup tables supplied by the operator.
///
/// Loaded once at start-up and passed by reference to whatever needs it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Keyed by provider name
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderEntry>,
    /// Model path or file name to recommended provider name
    #[serde(default)]
    pub models: BTreeMap<String, String>,
}

impl ProviderMetadata {
    /// Tables used when no metadata file is given
    pub fn builtin() -> Self {
        let wait_policy = EnvVarCandidates::new(OMP_WAIT_POLICY, ["", "ACTIVE", "PASSIVE"]);
        let providers = ExecutionProvider::ALL
            .iter()
            .filter(|p| p.uses_native_threading())
            .map(|p| {
                (
                    p.as_str().to_string(),
                    ProviderEntry {
                        graph_optimizer: None,
                        env: vec![wait_policy.clone()],
                    },
                )
            })
            .collect();

        Self {
            providers,
            models: BTreeMap::new(),
        }
    }

    /// Rejects unknown provider names and empty candidate lists
    pub fn validate(&self) -> Result<()> {
        for (name, entry) in &self.providers {
            name.parse::<ExecutionProvider>()?;
            for var in &entry.env {
                if var.name.is_empty() {
                    return Err(Error::Config(format!(
                        "Provider {name} declares an environment variable without a name"
                    )));
                }
                if var.values.is_empty() {
                    return Err(Error::Config(format!(
                        "Environment variable {} of provider {name} has no candidate values",
                        var.name
                    )));
                }
            }
        }
        for (model, provider) in &self.models {
            provider.parse::<ExecutionProvider>().map_err(|_| {
                Error::Config(format!(
                    "Model {model} recommends unknown provider {provider}"
                ))
            })?;
        }
        Ok(())
    }

    /// Environment candidates to sweep for a provider
    pub fn env_candidates(&self, provider: ExecutionProvider) -> &[EnvVarCandidates] {
        self.providers
            .get(provider.as_str())
            .map(|e| e.env.as_slice())
            .unwrap_or(&[])
    }

    pub fn graph_optimizer(&self, provider: ExecutionProvider) -> Option<&str> {
        self.providers
            .get(provider.as_str())
            .and_then(|e| e.graph_optimizer.as_deref())
    }

    /// Provider recommended for a model, matched on full path then file name
    pub fn recommended_provider(&self, model: &Path) -> Option<ExecutionProvider> {
        let full = model.to_string_lossy();
        let file_name = model.file_name().map(|f| f.to_string_lossy());

        self.models
            .get(full.as_ref())
            .or_else(|| file_name.and_then(|f| self.models.get(f.as_ref())))
            .and_then(|p| p.parse().ok())
    }
}
