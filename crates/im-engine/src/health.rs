//! Driver liveness tracking
//!
//! Every scheduler driver reports each iteration's outcome here; the engine
//! surfaces the aggregate so operators can see a stuck or failing loop
//! without reading logs.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Health band of one driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverHealthLevel {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

/// Consecutive failures before a driver is degraded / critical
const DEGRADED_AFTER: u32 = 1;
const CRITICAL_AFTER: u32 = 3;

#[derive(Debug, Clone, Default)]
struct DriverStats {
    runs: u64,
    failures: u64,
    consecutive_failures: u32,
    last_run: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Per-driver status snapshot
#[derive(Debug, Clone)]
pub struct DriverReport {
    pub name: &'static str,
    pub level: DriverHealthLevel,
    pub runs: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Default)]
pub struct DriverHealthRegistry {
    inner: RwLock<HashMap<&'static str, DriverStats>>,
}

impl DriverHealthRegistry {
    pub fn new() -> Self {
        DriverHealthRegistry::default()
    }

    pub fn record_success(&self, name: &'static str) {
        let mut inner = self.inner.write();
        let stats = inner.entry(name).or_default();
        stats.runs += 1;
        stats.consecutive_failures = 0;
        stats.last_run = Some(Utc::now());
        stats.last_error = None;
    }

    pub fn record_failure(&self, name: &'static str, error: &str) {
        let mut inner = self.inner.write();
        let stats = inner.entry(name).or_default();
        stats.runs += 1;
        stats.failures += 1;
        stats.consecutive_failures += 1;
        stats.last_run = Some(Utc::now());
        stats.last_error = Some(error.to_string());
    }

    pub fn report(&self) -> Vec<DriverReport> {
        let inner = self.inner.read();
        let mut reports: Vec<DriverReport> = inner
            .iter()
            .map(|(name, stats)| DriverReport {
                name,
                level: level_of(stats),
                runs: stats.runs,
                failures: stats.failures,
                consecutive_failures: stats.consecutive_failures,
                last_run: stats.last_run,
                last_error: stats.last_error.clone(),
            })
            .collect();
        reports.sort_by_key(|r| r.name);
        reports
    }

    /// Worst level across drivers; Unknown until something has run
    pub fn overall(&self) -> DriverHealthLevel {
        let reports = self.report();
        if reports.is_empty() {
            return DriverHealthLevel::Unknown;
        }
        if reports.iter().any(|r| r.level == DriverHealthLevel::Critical) {
            DriverHealthLevel::Critical
        } else if reports.iter().any(|r| r.level == DriverHealthLevel::Degraded) {
            DriverHealthLevel::Degraded
        } else {
            DriverHealthLevel::Healthy
        }
    }
}

fn level_of(stats: &DriverStats) -> DriverHealthLevel {
    if stats.runs == 0 {
        DriverHealthLevel::Unknown
    } else if stats.consecutive_failures >= CRITICAL_AFTER {
        DriverHealthLevel::Critical
    } else if stats.consecutive_failures >= DEGRADED_AFTER {
        DriverHealthLevel::Degraded
    } else {
        DriverHealthLevel::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_registry_is_unknown() {
        let registry = DriverHealthRegistry::new();
        assert_eq!(registry.overall(), DriverHealthLevel::Unknown);
    }

    #[test]
    fn one_failure_degrades_and_success_recovers() {
        let registry = DriverHealthRegistry::new();
        registry.record_failure("assess", "store offline");
        assert_eq!(registry.overall(), DriverHealthLevel::Degraded);

        registry.record_success("assess");
        assert_eq!(registry.overall(), DriverHealthLevel::Healthy);
        let report = &registry.report()[0];
        assert_eq!(report.runs, 2);
        assert_eq!(report.failures, 1);
        assert!(report.last_error.is_none());
    }

    #[test]
    fn repeated_failures_become_critical() {
        let registry = DriverHealthRegistry::new();
        for _ in 0..3 {
            registry.record_failure("ticker", "timeout");
        }
        assert_eq!(registry.overall(), DriverHealthLevel::Critical);
        assert_eq!(registry.report()[0].consecutive_failures, 3);
    }

    #[test]
    fn one_bad_driver_dominates_the_overall_level() {
        let registry = DriverHealthRegistry::new();
        registry.record_success("assess");
        registry.record_failure("motor-diagnosis", "instance gone");
        assert_eq!(registry.overall(), DriverHealthLevel::Degraded);
    }
}
