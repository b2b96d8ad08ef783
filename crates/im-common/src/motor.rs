//! Motor models, parameter mappings, baseline profiles and diagnoses

use crate::types::{DeviceId, TagId, TsMillis};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Electrical or mechanical quantity a mapped tag supplies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotorParameter {
    CurrentPhaseA,
    CurrentPhaseB,
    CurrentPhaseC,
    CurrentRms,
    VoltageA,
    VoltageB,
    VoltageC,
    VoltageRms,
    Power,
    PowerFactor,
    Frequency,
    Torque,
    Speed,
    Temperature,
    Vibration,
}

impl MotorParameter {
    /// Currents carry a frequency profile in their baseline
    pub fn is_current(&self) -> bool {
        matches!(
            self,
            MotorParameter::CurrentPhaseA
                | MotorParameter::CurrentPhaseB
                | MotorParameter::CurrentPhaseC
                | MotorParameter::CurrentRms
        )
    }
}

/// Rolling-element bearing geometry used for fault frequency computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BearingGeometry {
    pub rolling_element_count: u32,
    pub ball_diameter_mm: f64,
    pub pitch_diameter_mm: f64,
    pub contact_angle_deg: f64,
}

/// Motor type description shared by instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorModel {
    pub model_id: String,
    pub name: String,
    pub bearing: BearingGeometry,
    pub rated_power_kw: f64,
    pub rated_current_a: f64,
    pub rated_speed_rpm: f64,
}

/// Binding of a device to a motor model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorInstance {
    pub instance_id: String,
    pub device_id: DeviceId,
    pub model_id: String,
    pub enabled: bool,
}

/// Declares which tag supplies which parameter, with affine scaling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorParameterMapping {
    pub instance_id: String,
    pub parameter: MotorParameter,
    pub tag_id: TagId,
    pub scale: f64,
    pub offset: f64,
}

impl MotorParameterMapping {
    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.scale + self.offset
    }
}

/// A named operating regime. Detection picks the first enabled mode whose
/// discriminator range contains the latest mapped value, else the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMode {
    pub mode_id: String,
    pub instance_id: String,
    pub name: String,
    pub discriminator: Option<MotorParameter>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub is_default: bool,
}

/// Spectral fingerprint captured alongside a current baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyProfile {
    pub version: u32,
    pub sample_rate_hz: f64,
    pub fundamental_amplitude: f64,
    pub harmonic2_amplitude: f64,
    pub harmonic3_amplitude: f64,
    pub thd_percent: f64,
    pub low_band_energy: f64,
    pub mid_band_energy: f64,
    pub high_band_energy: f64,
    pub bpfo_amplitude: f64,
    pub bpfi_amplitude: f64,
    pub bsf_amplitude: f64,
    pub ftf_amplitude: f64,
    pub noise_floor: f64,
}

pub const FREQUENCY_PROFILE_VERSION: u32 = 1;

/// Per-(mode, parameter) statistical baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineProfile {
    pub instance_id: String,
    pub mode_id: String,
    pub parameter: MotorParameter,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub p05: f64,
    pub p95: f64,
    pub sample_count: u64,
    /// Percentage in [0, 100]
    pub confidence: f64,
    pub frequency_profile: Option<FrequencyProfile>,
    pub updated_utc: DateTime<Utc>,
}

/// Severity bands for motor faults, classified from |z|
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FaultSeverity {
    Minor,
    Moderate,
    Severe,
    Critical,
}

/// Diagnosed fault category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotorFaultType {
    Overcurrent,
    Undercurrent,
    Overvoltage,
    Undervoltage,
    PhaseImbalance,
    Overload,
    Underload,
    LowPowerFactor,
    FrequencyDeviation,
    Overspeed,
    Underspeed,
    Overheating,
    ExcessiveVibration,
    BearingOuterRace,
    BearingInnerRace,
    BearingBall,
    BearingCage,
    HarmonicAbnormal,
}

/// A single detected fault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorFault {
    pub fault_type: MotorFaultType,
    pub parameter: Option<MotorParameter>,
    pub severity: FaultSeverity,
    pub z_score: Option<f64>,
    /// Percentage in [0, 95]
    pub confidence: f64,
    pub message: String,
}

/// Full diagnosis for one motor instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub instance_id: String,
    pub device_id: DeviceId,
    pub ts: TsMillis,
    pub mode_id: Option<String>,
    pub health_score: f64,
    pub faults: Vec<MotorFault>,
    pub summary: String,
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_applies_affine_scaling() {
        let mapping = MotorParameterMapping {
            instance_id: "m1".into(),
            parameter: MotorParameter::CurrentRms,
            tag_id: "ia".into(),
            scale: 0.1,
            offset: -2.0,
        };
        assert_eq!(mapping.apply(100.0), 8.0);
    }

    #[test]
    fn frequency_profile_round_trips_exactly() {
        let profile = FrequencyProfile {
            version: FREQUENCY_PROFILE_VERSION,
            sample_rate_hz: 1000.0,
            fundamental_amplitude: 1.25,
            harmonic2_amplitude: 0.031,
            harmonic3_amplitude: 0.007,
            thd_percent: 2.54,
            low_band_energy: 10.0,
            mid_band_energy: 0.5,
            high_band_energy: 0.01,
            bpfo_amplitude: 0.09,
            bpfi_amplitude: 0.02,
            bsf_amplitude: 0.01,
            ftf_amplitude: 0.004,
            noise_floor: 0.01,
        };
        let json = serde_json::to_string(&profile).unwrap();
        let back: FrequencyProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn unknown_fields_in_persisted_profiles_are_tolerated() {
        let json = r#"{
            "version": 1, "sample_rate_hz": 500.0,
            "fundamental_amplitude": 1.0, "harmonic2_amplitude": 0.0,
            "harmonic3_amplitude": 0.0, "thd_percent": 0.0,
            "low_band_energy": 0.0, "mid_band_energy": 0.0,
            "high_band_energy": 0.0, "bpfo_amplitude": 0.0,
            "bpfi_amplitude": 0.0, "bsf_amplitude": 0.0,
            "ftf_amplitude": 0.0, "noise_floor": 0.0,
            "future_field": "ignored"
        }"#;
        let profile: FrequencyProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.sample_rate_hz, 500.0);
    }
}
