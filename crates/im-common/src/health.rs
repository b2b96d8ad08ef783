//! Features, baselines and health scores

use crate::types::{DeviceId, TagId, TagImportance, TsMillis};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-tag statistics over an extraction window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagFeatures {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub latest: f64,
    /// Least-squares slope over the sample index
    pub trend_slope: f64,
    /// -1 falling, 0 flat, +1 rising
    pub trend_direction: i8,
    pub coefficient_of_variation: f64,
    pub range: f64,
}

/// Ephemeral per-assessment feature set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFeatures {
    pub device_id: DeviceId,
    pub timestamp: TsMillis,
    pub window_minutes: u32,
    pub sample_count: usize,
    pub tags: HashMap<TagId, TagFeatures>,
}

/// Statistical fingerprint of a tag under normal operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagBaseline {
    pub normal_mean: f64,
    pub normal_std_dev: f64,
    pub normal_min: f64,
    pub normal_max: f64,
    pub normal_cv: f64,
}

/// Learned baseline for a device, mutated only by the dynamic updater
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBaseline {
    pub device_id: DeviceId,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub sample_count: u64,
    pub learning_hours: f64,
    pub tags: HashMap<TagId, TagBaseline>,
}

/// Health band derived from the composite index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthLevel {
    Healthy,
    Attention,
    Warning,
    Critical,
}

/// A tag that pushed a sub-score down
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemTag {
    pub tag_id: TagId,
    pub importance: TagImportance,
    pub z_score: f64,
    pub reason: String,
}

/// Composite device health assessment. Immutable once emitted; snapshots
/// are appended to history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthScore {
    pub device_id: DeviceId,
    pub timestamp: TsMillis,
    pub index: u32,
    pub level: HealthLevel,
    pub deviation_score: f64,
    pub trend_score: f64,
    pub stability_score: f64,
    pub alarm_score: f64,
    pub has_baseline: bool,
    pub problem_tags: Vec<ProblemTag>,
    pub diagnostic_message: Option<String>,
}
