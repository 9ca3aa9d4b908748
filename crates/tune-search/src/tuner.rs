//! Bisection search for the best thread count.
//!
//! The search assumes latency is unimodal in the thread count. It measures
//! a baseline at the lowest count, then bisects the rest of the range: a
//! probe slower than the best so far pulls the upper bound down, anything
//! else becomes the new best and pushes the lower bound up. When the best
//! lands exactly on the midpoint of the requested ceiling, the lower half is
//! searched once more to tell a real minimum from a plateau.

use tracing::{debug, info};

use tune_core::{SearchRange, ThreadSetting, TrialLedger, TrialRunner, TrialSpec, MIN_SEARCH_THREADS, RunPass};

/// One thread-count search: what to vary and where
#[derive(Debug, Clone)]
pub struct ThreadSearch {
    pub template: TrialSpec,
    pub setting: ThreadSetting,
    pub range: SearchRange,
    name_suffix: String,
    desc_suffix: String,
}

impl ThreadSearch {
    /// Search over `setting` below `ceiling`, suffixing probe names with the
    /// template's environment
    pub fn new(template: TrialSpec, setting: ThreadSetting, ceiling: u32) -> Self {
        let env_suffix = template.env.name_suffix();
        Self {
            name_suffix: format!("{}{}", setting.name_suffix(), env_suffix),
            desc_suffix: format!("{}{}", setting.description_suffix(), env_suffix),
            range: setting.search_range(ceiling),
            setting,
            template,
        }
    }

    /// Trial probing `threads`
    pub fn probe_trial(&self, threads: u32) -> TrialSpec {
        let mut trial = self.template.derive(
            format!("{}{}{}", self.template.name, threads, self.name_suffix),
            format!("{}{}{}", self.template.description, threads, self.desc_suffix),
        );
        self.setting.apply(&mut trial, threads);
        trial
    }
}

/// What a search found and how much it cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchOutcome {
    /// `None` when the range was empty or the baseline failed
    pub best: Option<u32>,
    pub probes: usize,
    pub reran: bool,
}

/// Drives thread searches through a [`TrialRunner`]
pub struct ThreadTuner<R> {
    runner: R,
}

impl<R: TrialRunner> ThreadTuner<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn into_inner(self) -> R {
        self.runner
    }

    fn probe(
        &mut self,
        search: &ThreadSearch,
        threads: u32,
        ledger: &mut TrialLedger,
        outcome: &mut SearchOutcome,
    ) -> Option<f64> {
        let mut trial = search.probe_trial(threads);
        self.runner.run(&mut trial, RunPass::Ranking);
        outcome.probes += 1;

        let avg = trial.avg_ms();
        debug!("Probe {} -> {:?}", trial.name, avg);
        ledger.record(trial);
        avg
    }

    /// Runs the search, filing every probe into `ledger`
    pub fn search(&mut self, search: &ThreadSearch, ledger: &mut TrialLedger) -> SearchOutcome {
        let mut outcome = SearchOutcome::default();
        let range = search.range;
        if range.is_empty() {
            debug!(
                "Empty thread range [{}, {}] for {}",
                range.lower, range.upper, search.template.name
            );
            return outcome;
        }

        let mut lower = range.lower;
        let mut upper = range.upper;

        let Some(mut best_latency) = self.probe(search, lower, ledger, &mut outcome) else {
            info!("Baseline of {} failed, not tuned", search.template.name);
            return outcome;
        };
        let mut best = lower;

        lower += 1;
        while lower <= upper {
            let mid = lower + (upper - lower) / 2;
            if mid == MIN_SEARCH_THREADS {
                break;
            }

            match self.probe(search, mid, ledger, &mut outcome) {
                Some(latency) if best_latency < latency => upper = mid - 1,
                Some(latency) => {
                    best_latency = latency;
                    best = mid;
                    match mid.checked_add(1) {
                        Some(next) => lower = next,
                        None => break,
                    }
                }
                None => break,
            }

            let midpoint = range.plateau_midpoint();
            if lower > upper && best == midpoint && !outcome.reran {
                debug!("Best {} at midpoint, re-running lower half", best);
                lower = MIN_SEARCH_THREADS;
                upper = midpoint - 1;
                outcome.reran = true;
            }
        }

        info!(
            "Best for {}{}: {} threads ({} ms)",
            search.template.name, search.name_suffix, best, best_latency
        );
        outcome.best = Some(best);
        outcome
    }
}
