//! Work cycles and cycle baselines

use crate::types::{DeviceId, TsMillis};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a cycle anomaly, ordered by the table in the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleAnomalyType {
    CycleTimeout,
    CycleTooShort,
    OverCurrent,
    MotorImbalance,
    BaselineDeviation,
    AngleStall,
}

/// One detected mechanical cycle with its features and anomaly assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkCycle {
    pub device_id: DeviceId,
    pub segment_id: Option<String>,
    pub start_ts: TsMillis,
    pub end_ts: TsMillis,
    pub duration_seconds: f64,
    pub max_angle: f64,
    pub motor1_peak_current: f64,
    pub motor1_avg_current: f64,
    pub motor1_energy: f64,
    pub motor2_peak_current: f64,
    pub motor2_avg_current: f64,
    pub motor2_energy: f64,
    pub motor_balance_ratio: f64,
    pub baseline_deviation_percent: f64,
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub anomaly_type: Option<CycleAnomalyType>,
}

/// Which learned model a cycle baseline row carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleBaselineKind {
    Motor1Curve,
    Motor2Curve,
    Balance,
    Duration,
}

/// A learned cycle baseline. The model is an opaque versioned JSON blob;
/// readers must tolerate unknown fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleBaseline {
    pub device_id: DeviceId,
    pub kind: CycleBaselineKind,
    pub model: serde_json::Value,
    pub sample_count: usize,
    pub r_squared: f64,
    pub updated_utc: DateTime<Utc>,
}

/// Quadratic current-vs-angle model persisted for the curve baselines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolyCurveModel {
    pub version: u32,
    /// Coefficients `[a, b, c]` of `current = a*angle^2 + b*angle + c`
    pub coefficients: [f64; 3],
}

/// Mean/stddev model persisted for the balance and duration baselines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadModel {
    pub version: u32,
    pub mean: f64,
    pub std_dev: f64,
}

pub const CYCLE_MODEL_VERSION: u32 = 1;
