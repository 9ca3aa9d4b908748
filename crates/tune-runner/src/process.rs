//! Child process execution bounded by a timeout.

use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tune_core::{Error, Result, TrialSpec, CLEARED_ENV_VARS};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a bounded child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited(ExitStatus),
    /// Killed after exceeding the timeout
    TimedOut,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited(status) if status.success())
    }
}

/// Runs `cmd` to completion or kills it once `timeout` has elapsed.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<ProcessOutcome> {
    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Process(format!("Failed to spawn {:?}: {e}", cmd.get_program())))?;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(ProcessOutcome::Exited(status)),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(ProcessOutcome::TimedOut);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Process(format!("Wait error: {e}")));
            }
        }
    }
}

/// Command for one benchmark invocation of `trial`.
///
/// The inherited environment is copied with the OpenMP variables removed,
/// then the trial's overlay applied. Output is discarded; results travel
/// through the result file.
pub fn benchmark_command(trial: &TrialSpec, args: &[String]) -> Command {
    let mut cmd = Command::new(&trial.executable);
    cmd.args(args);

    for var in CLEARED_ENV_VARS {
        cmd.env_remove(var);
    }
    if !cfg!(windows) {
        cmd.env("LD_LIBRARY_PATH", &trial.library_dir);
    }
    for (name, value) in trial.env.iter() {
        cmd.env(name, value);
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

/// Full argument list: trial arguments, benchmark flags, model, result file
pub fn invocation_args(trial: &TrialSpec, flags: &[String], result_file: &Path) -> Vec<String> {
    let mut args = trial.args.clone();
    args.extend(flags.iter().cloned());
    args.push(trial.model.to_string_lossy().into_owned());
    args.push(result_file.to_string_lossy().into_owned());
    args
}

/// Printable command line, prefixed with the OpenMP overrides when set
pub fn command_line(trial: &TrialSpec, args: &[String]) -> String {
    let mut parts: Vec<String> = CLEARED_ENV_VARS
        .iter()
        .filter_map(|var| trial.env.get(var).map(|v| format!("{var}={v}")))
        .collect();
    parts.push(trial.executable.to_string_lossy().into_owned());
    parts.extend(args.iter().cloned());
    parts.join(" ")
}
