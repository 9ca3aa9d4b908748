//! Execution provider identities and their static properties.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::Error;

/// Execution providers the benchmark builds can target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionProvider {
    /// Default CPU kernels with the OpenMP thread pool
    CpuOpenmp,
    /// MKL-ML build
    Mklml,
    /// oneDNN
    Dnnl,
    /// Default CPU kernels
    Cpu,
    /// NVIDIA TensorRT
    Tensorrt,
    /// nGraph
    Ngraph,
    /// NVIDIA CUDA
    Cuda,
    /// Nuphar (TVM based), shipped with the MKL-ML build
    Nuphar,
}

/// Static properties of an execution provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderProperties {
    /// Directory under `<bin>/<config>` holding the provider's build
    pub artifact_dir: &'static str,
    /// Thread pool is controlled through `OMP_NUM_THREADS`
    pub native_threading: bool,
    /// Parallel execution mode (`-P`) is worth tuning
    pub supports_parallel: bool,
    /// Value passed to the benchmark's `-e` flag, if any
    pub cli_selector: Option<&'static str>,
    /// Needs a GPU on the host
    pub requires_gpu: bool,
}

impl ExecutionProvider {
    /// All providers, in tuning order.
    pub const ALL: [ExecutionProvider; 8] = [
        ExecutionProvider::CpuOpenmp,
        ExecutionProvider::Mklml,
        ExecutionProvider::Dnnl,
        ExecutionProvider::Cpu,
        ExecutionProvider::Tensorrt,
        ExecutionProvider::Ngraph,
        ExecutionProvider::Cuda,
        ExecutionProvider::Nuphar,
    ];

    /// Name used on the command line, in trial names and in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionProvider::CpuOpenmp => "cpu_openmp",
            ExecutionProvider::Mklml => "mklml",
            ExecutionProvider::Dnnl => "dnnl",
            ExecutionProvider::Cpu => "cpu",
            ExecutionProvider::Tensorrt => "tensorrt",
            ExecutionProvider::Ngraph => "ngraph",
            ExecutionProvider::Cuda => "cuda",
            ExecutionProvider::Nuphar => "nuphar",
        }
    }

    /// Property table entry for this provider
    pub fn properties(&self) -> ProviderProperties {
        use ExecutionProvider::*;

        let artifact_dir = match self {
            Mklml | Nuphar => "mklml",
            _ => "all_eps",
        };
        let native_threading = matches!(self, CpuOpenmp | Mklml | Dnnl | Ngraph | Nuphar);
        let supports_parallel = matches!(self, CpuOpenmp | Mklml | Dnnl | Cpu | Ngraph);
        let cli_selector = match self {
            Mklml | CpuOpenmp => None,
            other => Some(other.as_str()),
        };
        let requires_gpu = matches!(self, Cuda | Tensorrt);

        ProviderProperties {
            artifact_dir,
            native_threading,
            supports_parallel,
            cli_selector,
            requires_gpu,
        }
    }

    pub fn uses_native_threading(&self) -> bool {
        self.properties().native_threading
    }

    pub fn supports_parallel(&self) -> bool {
        self.properties().supports_parallel
    }

    pub fn requires_gpu(&self) -> bool {
        self.properties().requires_gpu
    }

    /// Benchmark arguments selecting this provider
    pub fn selector_args(&self) -> Vec<String> {
        match self.properties().cli_selector {
            Some(selector) => vec!["-e".to_string(), selector.to_string()],
            None => Vec::new(),
        }
    }

    /// Parse a comma-separated provider filter.
    ///
    /// An empty filter selects every provider. Any unknown name fails the
    /// whole list.
    pub fn parse_list(filter: &str) -> Result<Vec<Self>, Error> {
        let names: Vec<&str> = filter
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if names.is_empty() {
            return Ok(Self::ALL.to_vec());
        }

        names.into_iter().map(str::parse).collect()
    }
}

impl FromStr for ExecutionProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::UnknownProvider(s.to_string()))
    }
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// On-disk location of one provider's benchmark build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderBuild {
    pub provider: ExecutionProvider,
    /// Artifact directory, also used as the shared library search path
    pub dir: PathBuf,
    /// Benchmark executable inside `dir`
    pub executable: PathBuf,
}

impl ProviderBuild {
    /// Name of the benchmark executable on this platform
    pub const BENCHMARK_BINARY: &'static str = "onnxruntime_perf_test";

    /// Locate the build for `provider` under `<bin_root>/<build_config>`
    pub fn locate(bin_root: &Path, build_config: &str, provider: ExecutionProvider) -> Self {
        let dir = bin_root
            .join(build_config)
            .join(provider.properties().artifact_dir);
        let executable = dir.join(format!(
            "{}{}",
            Self::BENCHMARK_BINARY,
            std::env::consts::EXE_SUFFIX
        ));

        Self {
            provider,
            dir,
            executable,
        }
    }

    /// Whether the artifact directory exists
    pub fn is_present(&self) -> bool {
        self.dir.is_dir()
    }
}
