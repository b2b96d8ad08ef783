//! Alarm rules, records and aggregated groups

use crate::types::{DeviceId, TagId, TsMillis};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Comparison applied by an alarm rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmCondition {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
    Between,
    Outside,
}

const EQ_EPSILON: f64 = 1e-9;

/// Threshold rule. `tag_pattern` may name a concrete tag or a `*`-glob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRule {
    pub rule_id: String,
    pub tag_pattern: String,
    pub condition: AlarmCondition,
    pub threshold: f64,
    /// Band bounds for `Between` / `Outside`
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub dwell_ms: i64,
    /// Percentage of the threshold the value must traverse out of the firing
    /// region before the rule re-arms
    pub hysteresis_pct: f64,
    pub severity: u8,
    pub enabled: bool,
}

impl AlarmRule {
    fn band(&self) -> (f64, f64) {
        let lo = self.lower.unwrap_or(self.threshold);
        let hi = self.upper.unwrap_or(self.threshold);
        if lo <= hi {
            (lo, hi)
        } else {
            (hi, lo)
        }
    }

    /// Whether `value` satisfies the firing predicate
    pub fn is_satisfied(&self, value: f64) -> bool {
        match self.condition {
            AlarmCondition::Gt => value > self.threshold,
            AlarmCondition::Gte => value >= self.threshold,
            AlarmCondition::Lt => value < self.threshold,
            AlarmCondition::Lte => value <= self.threshold,
            AlarmCondition::Eq => (value - self.threshold).abs() <= EQ_EPSILON,
            AlarmCondition::Neq => (value - self.threshold).abs() > EQ_EPSILON,
            AlarmCondition::Between => {
                let (lo, hi) = self.band();
                value >= lo && value <= hi
            }
            AlarmCondition::Outside => {
                let (lo, hi) = self.band();
                value < lo || value > hi
            }
        }
    }

    fn margin_for(&self, bound: f64) -> f64 {
        bound.abs() * self.hysteresis_pct / 100.0
    }

    /// Whether `value` has left the firing region by the hysteresis margin,
    /// re-arming the rule
    pub fn is_cleared(&self, value: f64) -> bool {
        let m = self.margin_for(self.threshold);
        match self.condition {
            AlarmCondition::Gt | AlarmCondition::Gte => value < self.threshold - m,
            AlarmCondition::Lt | AlarmCondition::Lte => value > self.threshold + m,
            AlarmCondition::Eq => (value - self.threshold).abs() > m.max(EQ_EPSILON),
            AlarmCondition::Neq => (value - self.threshold).abs() <= m.max(EQ_EPSILON),
            AlarmCondition::Between => {
                let (lo, hi) = self.band();
                value < lo - self.margin_for(lo) || value > hi + self.margin_for(hi)
            }
            AlarmCondition::Outside => {
                let (lo, hi) = self.band();
                value >= lo + self.margin_for(lo) && value <= hi - self.margin_for(hi)
            }
        }
    }
}

/// Alarm lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AlarmStatus {
    Open = 0,
    Acked = 1,
    Closed = 2,
}

/// A fired alarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub alarm_id: String,
    pub device_id: DeviceId,
    pub tag_id: Option<TagId>,
    pub rule_id: Option<String>,
    /// Group this alarm was attached to when it fired
    pub group_id: Option<String>,
    pub ts: TsMillis,
    pub severity: u8,
    pub code: String,
    pub message: String,
    pub status: AlarmStatus,
    pub acked_by: Option<String>,
    pub acked_utc: Option<DateTime<Utc>>,
    pub ack_note: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Aggregate of the open alarms fired by one rule on one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmGroup {
    pub group_id: String,
    pub device_id: DeviceId,
    pub rule_id: String,
    pub first_occurred_utc: DateTime<Utc>,
    pub last_occurred_utc: DateTime<Utc>,
    pub alarm_count: u32,
    /// Max severity over open children
    pub severity: u8,
    /// Message of the latest child
    pub message: String,
    pub aggregate_status: AlarmStatus,
}

/// Filter for alarm queries
#[derive(Debug, Clone, Default)]
pub struct AlarmQuery {
    pub device_id: Option<DeviceId>,
    pub status: Option<AlarmStatus>,
    pub min_severity: Option<u8>,
    pub start: Option<TsMillis>,
    pub end: Option<TsMillis>,
    pub limit: Option<usize>,
}
