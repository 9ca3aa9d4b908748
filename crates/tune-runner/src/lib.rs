//! Benchmark execution for perf tuning.
//!
//! Spawns the external benchmark with an isolated environment, parses its
//! latency output and, for profiling passes, samples host resources and
//! converts the runtime trace.

pub mod gpu;
pub mod output;
pub mod process;
pub mod profile;
pub mod runner;
pub mod sampler;

pub use runner::BenchmarkRunner;
pub use sampler::{NullSampler, ResourceSampler, ResourceSamples, SamplingSession, SystemSampler};
