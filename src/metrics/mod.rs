// src/metrics/mod.rs
// Process-wide counters and gauges with HTTP exposition

pub mod memory;

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counter and gauge registry.
///
/// Counters only ever add; gauges are last-write-wins. Both are commutative
/// under concurrent writers, so handlers update them without coordination.
pub struct Metrics {
    started_at: Instant,
    counters: RwLock<BTreeMap<&'static str, AtomicU64>>,
    gauges: RwLock<BTreeMap<&'static str, AtomicU64>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn increment(&self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &'static str, delta: u64) {
        if let Ok(counters) = self.counters.read()
            && let Some(counter) = counters.get(name)
        {
            counter.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        if let Ok(mut counters) = self.counters.write() {
            counters
                .entry(name)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .ok()
            .and_then(|c| c.get(name).map(|v| v.load(Ordering::Relaxed)))
            .unwrap_or(0)
    }

    pub fn set_gauge(&self, name: &'static str, value: u64) {
        if let Ok(gauges) = self.gauges.read()
            && let Some(gauge) = gauges.get(name)
        {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        if let Ok(mut gauges) = self.gauges.write() {
            gauges
                .entry(name)
                .or_insert_with(|| AtomicU64::new(0))
                .store(value, Ordering::Relaxed);
        }
    }

    pub fn gauge(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .ok()
            .and_then(|g| g.get(name).map(|v| v.load(Ordering::Relaxed)))
            .unwrap_or(0)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Point-in-time snapshot for the /metrics and /api/overview routes.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .read()
            .map(|c| {
                c.iter()
                    .map(|(k, v)| ((*k).to_string(), v.load(Ordering::Relaxed)))
                    .collect()
            })
            .unwrap_or_default();
        let gauges = self
            .gauges
            .read()
            .map(|g| {
                g.iter()
                    .map(|(k, v)| ((*k).to_string(), v.load(Ordering::Relaxed)))
                    .collect()
            })
            .unwrap_or_default();
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            counters,
            gauges,
            memory: memory::sample(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, u64>,
    pub memory: memory::MemoryStats,
}
