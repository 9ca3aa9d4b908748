//! Core types and utilities for execution-provider performance tuning.
//!
//! This crate provides the foundational types shared across the workspace:
//! trial specifications and their results, the provider property table,
//! run configuration and operator-supplied metadata, and latency statistics.

pub mod error;
pub mod provider;
pub mod types;
pub mod trial;
pub mod config;
pub mod metrics;
pub mod cli;

pub use error::{Error, Result};
pub use provider::{ExecutionProvider, ProviderBuild, ProviderProperties};
pub use types::*;
pub use trial::*;
pub use config::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{Error, Result};
    pub use crate::provider::{ExecutionProvider, ProviderBuild};
    pub use crate::trial::*;
    pub use crate::types::*;
}
