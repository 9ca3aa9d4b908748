//! Background resource sampling during profiling runs.
//!
//! A [`ResourceSampler`] starts a session right before the profiled
//! benchmark is spawned; stopping (or dropping) the session joins the
//! sampling thread and hands back the collected readings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sysinfo::System;
use tracing::debug;

use tune_core::metrics::nonzero_mean;
use tune_core::ResourceUsage;

use crate::gpu;

const MIN_INTERVAL: Duration = Duration::from_millis(200);
const MAX_INTERVAL: Duration = Duration::from_secs(1);
const STOP_CHECK: Duration = Duration::from_millis(25);

/// Raw utilization readings in percent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSamples {
    pub cpu: Vec<f64>,
    pub gpu: Vec<f64>,
    pub memory: Vec<f64>,
}

impl ResourceSamples {
    /// Averages each series, ignoring zero readings
    pub fn summarize(&self) -> ResourceUsage {
        ResourceUsage {
            cpu: nonzero_mean(&self.cpu),
            gpu: nonzero_mean(&self.gpu),
            memory: nonzero_mean(&self.memory),
        }
    }
}

pub trait SamplingSession {
    fn stop(self) -> ResourceSamples;
}

pub trait ResourceSampler {
    type Session: SamplingSession;

    /// Starts sampling; `latency_hint` is the expected iteration time
    fn start(&self, latency_hint: Duration) -> Self::Session;
}

/// Sampling interval derived from the latency hint
pub fn sampling_interval(latency_hint: Duration) -> Duration {
    latency_hint.clamp(MIN_INTERVAL, MAX_INTERVAL)
}

/// Samples host CPU and memory through sysinfo, GPU through nvidia-smi.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSampler {
    gpu: bool,
}

impl SystemSampler {
    pub fn new(gpu: bool) -> Self {
        Self { gpu }
    }
}

impl ResourceSampler for SystemSampler {
    type Session = SystemSession;

    fn start(&self, latency_hint: Duration) -> SystemSession {
        let interval = sampling_interval(latency_hint);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let sample_gpu = self.gpu;

        debug!("Sampling resources every {:?}", interval);
        let handle = thread::spawn(move || sample_loop(&flag, interval, sample_gpu));

        SystemSession {
            stop,
            handle: Some(handle),
        }
    }
}

fn sample_loop(stop: &AtomicBool, interval: Duration, sample_gpu: bool) -> ResourceSamples {
    let mut sys = System::new();
    let mut samples = ResourceSamples::default();
    sys.refresh_cpu_all();

    while !stop.load(Ordering::Relaxed) {
        let tick = Instant::now();
        while tick.elapsed() < interval {
            if stop.load(Ordering::Relaxed) {
                return samples;
            }
            thread::sleep(STOP_CHECK.min(interval));
        }

        sys.refresh_cpu_all();
        samples.cpu.push(sys.global_cpu_usage() as f64);

        sys.refresh_memory();
        let total = sys.total_memory();
        if total > 0 {
            samples
                .memory
                .push(sys.used_memory() as f64 / total as f64 * 100.0);
        }

        if sample_gpu {
            if let Some(util) = gpu::gpu_utilization() {
                samples.gpu.push(util);
            }
        }
    }

    samples
}

/// Running sampler thread; stopped on drop if not stopped explicitly
pub struct SystemSession {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<ResourceSamples>>,
}

impl SystemSession {
    fn finish(&mut self) -> ResourceSamples {
        self.stop.store(true, Ordering::Relaxed);
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

impl SamplingSession for SystemSession {
    fn stop(mut self) -> ResourceSamples {
        self.finish()
    }
}

impl Drop for SystemSession {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.finish();
        }
    }
}

/// Sampler that records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSampler;

pub struct NullSession;

impl SamplingSession for NullSession {
    fn stop(self) -> ResourceSamples {
        ResourceSamples::default()
    }
}

impl ResourceSampler for NullSampler {
    type Session = NullSession;

    fn start(&self, _latency_hint: Duration) -> NullSession {
        NullSession
    }
}
