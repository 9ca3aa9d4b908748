//! Tuning search engine.
//!
//! Builds trial candidates per execution provider, searches thread counts,
//! sweeps environment combinations and turns the winners into a report.

pub mod combos;
pub mod orchestrator;
pub mod report;
pub mod snippet;
pub mod tuner;

#[cfg(test)]
mod testing;

pub use combos::combinations;
pub use orchestrator::{Orchestrator, ProviderResultSet, ProviderTuning, TuningOutcome, TuningStage};
pub use report::{profile_best, sort_providers, Report, ReportContext};
pub use snippet::CodeSnippet;
pub use tuner::{SearchOutcome, ThreadSearch, ThreadTuner};
