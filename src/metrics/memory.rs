// src/metrics/memory.rs
// Process memory sampling and the heap-pressure watcher

use super::Metrics;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Sampling cadence for the watcher task.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Fraction of total memory above which pressure callbacks fire.
const PRESSURE_THRESHOLD: f64 = 0.85;

/// Point-in-time process memory usage, in bytes.
///
/// Linux reads /proc; other platforms report zeros and the pressure watcher
/// stays silent there.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MemoryStats {
    pub rss_bytes: u64,
    pub heap_used_bytes: u64,
    pub heap_total_bytes: u64,
}

impl MemoryStats {
    /// Used-to-total ratio, or 0.0 when totals are unknown.
    pub fn used_fraction(&self) -> f64 {
        if self.heap_total_bytes == 0 {
            0.0
        } else {
            self.heap_used_bytes as f64 / self.heap_total_bytes as f64
        }
    }
}

/// Sample current process memory.
pub fn sample() -> MemoryStats {
    sample_proc().unwrap_or_default()
}

#[cfg(target_os = "linux")]
fn sample_proc() -> Option<MemoryStats> {
    let page_size = 4096u64;
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut fields = statm.split_whitespace();
    let vm_pages: u64 = fields.next()?.parse().ok()?;
    let rss_pages: u64 = fields.next()?.parse().ok()?;

    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let total_kb = meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        rest.trim().split_whitespace().next()?.parse::<u64>().ok()
    })?;

    let _ = vm_pages;
    Some(MemoryStats {
        rss_bytes: rss_pages * page_size,
        heap_used_bytes: rss_pages * page_size,
        heap_total_bytes: total_kb * 1024,
    })
}

#[cfg(not(target_os = "linux"))]
fn sample_proc() -> Option<MemoryStats> {
    None
}

type PressureCallback = Box<dyn Fn() + Send + Sync>;

/// Periodic memory sampler with registered pressure callbacks.
///
/// Every 60 s the watcher samples process memory; above the 85% threshold it
/// warns, bumps `memory.pressure_events`, and invokes every registered
/// callback (the context-loader cache registers one to flush itself).
pub struct MemoryWatcher {
    metrics: Arc<Metrics>,
    callbacks: Mutex<Vec<PressureCallback>>,
}

impl MemoryWatcher {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn on_pressure(&self, callback: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(Box::new(callback));
        }
    }

    /// One sampling step; split out of the loop for tests.
    pub fn check(&self, stats: MemoryStats) -> bool {
        self.metrics.set_gauge("memory.rss_bytes", stats.rss_bytes);
        let fraction = stats.used_fraction();
        if fraction <= PRESSURE_THRESHOLD {
            return false;
        }
        warn!(
            used_pct = (fraction * 100.0) as u64,
            rss_bytes = stats.rss_bytes,
            "Memory pressure detected, invoking pressure callbacks"
        );
        self.metrics.increment("memory.pressure_events");
        if let Ok(callbacks) = self.callbacks.lock() {
            for callback in callbacks.iter() {
                callback();
            }
        }
        true
    }

    /// Run until shutdown flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        debug!("Memory watcher started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SAMPLE_INTERVAL) => {
                    self.check(sample());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Memory watcher stopped");
    }
}
