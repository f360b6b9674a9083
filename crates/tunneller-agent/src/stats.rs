//! Connection statistics
//!
//! Atomic total/active counters globally and per route pattern, plus a
//! sliding 60-second window of request-start times for a requests-per-minute
//! figure. Contention is negligible: the window lock is per pattern and held
//! for a prune-and-push.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct RouteStats {
    total: AtomicU64,
    active: AtomicU64,
    recent: Mutex<Vec<Instant>>,
}

impl RouteStats {
    fn record(&self, now: Instant) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);

        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        // checked_sub: Instant cannot represent times before the clock's
        // origin, e.g. within a minute of boot
        if let Some(cutoff) = now.checked_sub(WINDOW) {
            recent.retain(|ts| *ts >= cutoff);
        }
        recent.push(now);
    }

    fn complete(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    fn requests_per_minute(&self, now: Instant) -> usize {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        match now.checked_sub(WINDOW) {
            Some(cutoff) => recent.iter().filter(|ts| **ts >= cutoff).count(),
            None => recent.len(),
        }
    }
}

/// Point-in-time view of one pattern's counters
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RouteStatsSnapshot {
    pub pattern: String,
    pub total_requests: u64,
    pub active_requests: u64,
    pub requests_per_minute: usize,
}

/// Process-wide request accounting
#[derive(Debug, Default)]
pub struct ConnectionStats {
    total: AtomicU64,
    active: AtomicU64,
    routes: Mutex<HashMap<String, Arc<RouteStats>>>,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account a request starting on `pattern`
    pub fn record(&self, pattern: &str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        self.route_entry(pattern).record(Instant::now());
    }

    /// Account a request on `pattern` finishing (any exit path)
    pub fn complete(&self, pattern: &str) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(stats) = routes.get(pattern) {
            stats.complete();
        }
    }

    pub fn total_connections(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Per-pattern snapshots, sorted by pattern for stable output
    pub fn route_snapshots(&self) -> Vec<RouteStatsSnapshot> {
        let now = Instant::now();
        let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshots: Vec<_> = routes
            .iter()
            .map(|(pattern, stats)| RouteStatsSnapshot {
                pattern: pattern.clone(),
                total_requests: stats.total.load(Ordering::Relaxed),
                active_requests: stats.active.load(Ordering::Relaxed),
                requests_per_minute: stats.requests_per_minute(now),
            })
            .collect();
        snapshots.sort_by(|a, b| a.pattern.cmp(&b.pattern));
        snapshots
    }

    fn route_entry(&self, pattern: &str) -> Arc<RouteStats> {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes
            .entry(pattern.to_string())
            .or_insert_with(|| Arc::new(RouteStats::default()))
            .clone()
    }
}
