//! Core type definitions for thread and environment tuning.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::provider::ExecutionProvider;
use crate::trial::TrialSpec;

/// OpenMP wait policy variable
pub const OMP_WAIT_POLICY: &str = "OMP_WAIT_POLICY";

/// OpenMP thread count variable
pub const OMP_NUM_THREADS: &str = "OMP_NUM_THREADS";

/// Variables removed from the inherited environment before every trial
pub const CLEARED_ENV_VARS: [&str; 2] = [OMP_WAIT_POLICY, OMP_NUM_THREADS];

/// Smallest thread count the search ever probes
pub const MIN_SEARCH_THREADS: u32 = 2;

/// Ordered set of environment variable overrides for one trial.
///
/// Insertion order is kept so trial names built from a combination are
/// stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvCombination {
    entries: Vec<(String, String)>,
}

impl EnvCombination {
    /// Creates an empty combination (no overrides)
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a combination from name/value pairs, dropping empty values
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut combo = Self::new();
        for (name, value) in pairs {
            let value = value.into();
            if !value.is_empty() {
                combo.insert(name, value);
            }
        }
        combo
    }

    /// Sets a variable, replacing an existing value in place
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Suffix encoding the combination in trial names: `_NAME_value` per entry
    pub fn name_suffix(&self) -> String {
        self.iter()
            .map(|(name, value)| format!("_{name}_{value}"))
            .collect()
    }
}

impl Serialize for EnvCombination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Inclusive thread-count window for one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRange {
    pub lower: u32,
    pub upper: u32,
    /// Thread ceiling the range was derived from
    pub ceiling: u32,
}

impl SearchRange {
    /// Range for a requested ceiling.
    ///
    /// Modes driven by CLI flags keep one core free; native thread pools may
    /// use the whole ceiling.
    pub fn new(ceiling: u32, native_threading: bool) -> Self {
        let upper = if native_threading {
            ceiling
        } else {
            ceiling.saturating_sub(1)
        };

        Self {
            lower: MIN_SEARCH_THREADS,
            upper,
            ceiling,
        }
    }

    /// No thread count can be probed
    pub fn is_empty(&self) -> bool {
        self.lower > self.upper
    }

    /// Midpoint of the requested ceiling, `(1 + ceiling) / 2`.
    ///
    /// This is the value the plateau re-run compares against. It is taken from
    /// the ceiling, not from the probed window, so it can sit one above the
    /// window's own midpoint when a core is reserved.
    pub fn plateau_midpoint(&self) -> u32 {
        self.ceiling / 2 + self.ceiling % 2
    }
}

/// How a tuned thread count reaches the benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSetting {
    /// `-y <n>`: inter-op pool, used with parallel execution
    InterOp,
    /// `-x <n>`: intra-op pool
    IntraOp,
    /// `OMP_NUM_THREADS=<n>` with `-x 1` so the OpenMP pool is authoritative
    NativePool,
}

impl ThreadSetting {
    /// Intra-op setting appropriate for a provider
    pub fn intra_for(provider: ExecutionProvider) -> Self {
        if provider.uses_native_threading() {
            ThreadSetting::NativePool
        } else {
            ThreadSetting::IntraOp
        }
    }

    /// Applies `threads` to the trial's arguments or environment
    pub fn apply(&self, trial: &mut TrialSpec, threads: u32) {
        match self {
            ThreadSetting::InterOp => {
                trial.args.extend(["-y".to_string(), threads.to_string()]);
            }
            ThreadSetting::IntraOp => {
                trial.args.extend(["-x".to_string(), threads.to_string()]);
            }
            ThreadSetting::NativePool => {
                trial.env.insert(OMP_NUM_THREADS, threads.to_string());
                trial.args.extend(["-x".to_string(), "1".to_string()]);
            }
        }
    }

    pub fn name_suffix(&self) -> &'static str {
        match self {
            ThreadSetting::InterOp => "_inter_threads",
            ThreadSetting::IntraOp => "_intra_threads",
            ThreadSetting::NativePool => "_OMP_threads",
        }
    }

    pub fn description_suffix(&self) -> &'static str {
        match self {
            ThreadSetting::InterOp => " threads, ",
            ThreadSetting::IntraOp => " intra_op_num_threads, ",
            ThreadSetting::NativePool => " OMP_NUM_THREADS, ",
        }
    }

    /// Search range for this setting under a thread ceiling
    pub fn search_range(&self, ceiling: u32) -> SearchRange {
        SearchRange::new(ceiling, *self == ThreadSetting::NativePool)
    }
}
