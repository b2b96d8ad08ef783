//! Motor fault detection
//!
//! Compares live mapped values against the active mode's baseline profiles,
//! adds phase-imbalance, bearing and harmonic detectors, and folds the
//! findings into a health score with ranked recommendations.

use crate::modes::{ModeDetector, RangeModeDetector};
use crate::spectrum::{bearing_frequencies, Spectrum, SpectrumFeatures};
use im_common::config::FaultDetectionConfig;
use im_common::motor::{
    BaselineProfile, DiagnosisResult, FaultSeverity, MotorFault, MotorFaultType, MotorParameter,
};
use im_common::stats::EPSILON;
use im_common::{Error, Result, TsMillis};
use im_store::{
    BaselineProfileRepository, MotorInstanceRepository, MotorMappingRepository,
    MotorModelRepository, OperationModeRepository, TelemetryRepository,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Waveform length pulled for the spectral detectors
const WAVEFORM_POINTS: usize = 4096;

/// Window the waveform is pulled from
const WAVEFORM_WINDOW_MS: i64 = 60_000;

/// Assumed supply frequency when no Frequency parameter is mapped
const DEFAULT_SUPPLY_HZ: f64 = 50.0;

pub struct FaultDetector {
    telemetry: Arc<dyn TelemetryRepository>,
    instances: Arc<dyn MotorInstanceRepository>,
    models: Arc<dyn MotorModelRepository>,
    mappings: Arc<dyn MotorMappingRepository>,
    modes: Arc<dyn OperationModeRepository>,
    profiles: Arc<dyn BaselineProfileRepository>,
    mode_detector: Arc<dyn ModeDetector>,
    config: FaultDetectionConfig,
    latest: Mutex<HashMap<String, DiagnosisResult>>,
}

impl FaultDetector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        telemetry: Arc<dyn TelemetryRepository>,
        instances: Arc<dyn MotorInstanceRepository>,
        models: Arc<dyn MotorModelRepository>,
        mappings: Arc<dyn MotorMappingRepository>,
        modes: Arc<dyn OperationModeRepository>,
        profiles: Arc<dyn BaselineProfileRepository>,
        config: FaultDetectionConfig,
    ) -> Self {
        FaultDetector {
            telemetry,
            instances,
            models,
            mappings,
            modes,
            profiles,
            mode_detector: Arc::new(RangeModeDetector),
            config,
            latest: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_mode_detector(mut self, detector: Arc<dyn ModeDetector>) -> Self {
        self.mode_detector = detector;
        self
    }

    /// Latest cached diagnosis for an instance
    pub fn latest(&self, instance_id: &str) -> Option<DiagnosisResult> {
        self.latest.lock().get(instance_id).cloned()
    }

    /// Diagnose every enabled instance, isolating per-instance failures
    pub async fn diagnose_all(&self, now: TsMillis) -> Result<Vec<DiagnosisResult>> {
        let instances = self.instances.list_enabled().await?;
        let mut out = Vec::new();
        for instance in instances {
            match self.diagnose(&instance.instance_id, now).await {
                Ok(result) => out.push(result),
                Err(Error::InsufficientData(reason)) => {
                    debug!("diagnosis skipped for {}: {reason}", instance.instance_id)
                }
                Err(e) => warn!("diagnosis failed for {}: {e}", instance.instance_id),
            }
        }
        Ok(out)
    }

    /// Full diagnosis of one motor instance
    pub async fn diagnose(&self, instance_id: &str, now: TsMillis) -> Result<DiagnosisResult> {
        let instance = self.instances.get(instance_id).await?;
        let mappings = self.mappings.list_for_instance(instance_id).await?;
        if mappings.is_empty() {
            return Err(Error::InsufficientData(format!(
                "instance {instance_id} has no parameter mappings"
            )));
        }

        // Latest mapped values
        let mut values: HashMap<MotorParameter, f64> = HashMap::new();
        for mapping in &mappings {
            let latest = self
                .telemetry
                .latest(Some(&instance.device_id), Some(&mapping.tag_id))
                .await?;
            if let Some(v) = latest.first().and_then(|p| p.value.as_f64()) {
                values.insert(mapping.parameter, mapping.apply(v));
            }
        }
        if values.is_empty() {
            return Err(Error::InsufficientData(format!(
                "no live values for instance {instance_id}"
            )));
        }

        // Operation mode via the external collaborator seam
        let modes = self.modes.list_for_instance(instance_id).await?;
        let mode_id = self.mode_detector.detect(&modes, &values);

        let mut faults: Vec<MotorFault> = Vec::new();
        let mut z_magnitudes: Vec<f64> = Vec::new();

        if let Some(mode) = mode_id.as_deref() {
            for (&parameter, &value) in &values {
                let Some(profile) = self.profiles.get(instance_id, mode, parameter).await? else {
                    continue;
                };
                if profile.std_dev < EPSILON {
                    continue;
                }
                let z = (value - profile.mean) / profile.std_dev;
                z_magnitudes.push(z.abs());
                if let Some(fault) = self.classify_deviation(parameter, value, z) {
                    faults.push(fault);
                }
            }
        }

        if let Some(fault) = self.detect_phase_imbalance(&values) {
            faults.push(fault);
        }
        let spectral =
            self.spectral_faults(&instance, &mappings, mode_id.as_deref(), &values, now).await?;
        faults.extend(spectral);

        faults.retain(|f| f.confidence >= self.config.min_confidence);
        faults.sort_by(|a, b| b.severity.cmp(&a.severity));

        let health_score = health_score(&z_magnitudes, &faults);
        let summary = summarize(&faults);
        let recommendations = recommend(&faults);

        let result = DiagnosisResult {
            instance_id: instance_id.to_string(),
            device_id: instance.device_id.clone(),
            ts: now,
            mode_id,
            health_score,
            faults,
            summary,
            recommendations,
        };
        self.latest.lock().insert(instance_id.to_string(), result.clone());
        Ok(result)
    }

    /// Severity bands over |z|, then fault type from parameter and sign
    fn classify_deviation(
        &self,
        parameter: MotorParameter,
        value: f64,
        z: f64,
    ) -> Option<MotorFault> {
        let magnitude = z.abs();
        if magnitude < self.config.minor_threshold {
            return None;
        }
        let severity = if magnitude >= self.config.critical_threshold {
            FaultSeverity::Critical
        } else if magnitude >= self.config.severe_threshold {
            FaultSeverity::Severe
        } else if magnitude >= self.config.moderate_threshold {
            FaultSeverity::Moderate
        } else {
            FaultSeverity::Minor
        };
        let fault_type = fault_type_for(parameter, z)?;
        Some(MotorFault {
            fault_type,
            parameter: Some(parameter),
            severity,
            z_score: Some(z),
            confidence: (50.0 + 10.0 * magnitude).min(95.0),
            message: format!("{parameter:?} at {value:.2} deviates {z:+.1} sigma from baseline"),
        })
    }

    /// Max deviation of the three phase currents from their average
    fn detect_phase_imbalance(&self, values: &HashMap<MotorParameter, f64>) -> Option<MotorFault> {
        let a = *values.get(&MotorParameter::CurrentPhaseA)?;
        let b = *values.get(&MotorParameter::CurrentPhaseB)?;
        let c = *values.get(&MotorParameter::CurrentPhaseC)?;
        let avg = (a + b + c) / 3.0;
        if avg.abs() < EPSILON {
            return None;
        }
        let deviation_pct = [a, b, c]
            .iter()
            .map(|p| (p - avg).abs() / avg.abs() * 100.0)
            .fold(0.0, f64::max);
        if deviation_pct <= self.config.phase_imbalance_threshold {
            return None;
        }
        let severity = if deviation_pct >= 2.0 * self.config.phase_imbalance_threshold {
            FaultSeverity::Severe
        } else {
            FaultSeverity::Moderate
        };
        Some(MotorFault {
            fault_type: MotorFaultType::PhaseImbalance,
            parameter: None,
            severity,
            z_score: None,
            confidence: (50.0 + 2.0 * deviation_pct).min(95.0),
            message: format!("phase currents diverge by {deviation_pct:.1}% from their mean"),
        })
    }

    /// Bearing and harmonic detectors over a recent current waveform
    async fn spectral_faults(
        &self,
        instance: &im_common::motor::MotorInstance,
        mappings: &[im_common::motor::MotorParameterMapping],
        mode_id: Option<&str>,
        values: &HashMap<MotorParameter, f64>,
        now: TsMillis,
    ) -> Result<Vec<MotorFault>> {
        let Some(mapping) = mappings
            .iter()
            .find(|m| m.parameter == MotorParameter::CurrentRms)
            .or_else(|| mappings.iter().find(|m| m.parameter == MotorParameter::CurrentPhaseA))
        else {
            return Ok(Vec::new());
        };

        let points = self
            .telemetry
            .query_simple(
                &instance.device_id,
                Some(&mapping.tag_id),
                now - WAVEFORM_WINDOW_MS,
                now + 1,
                WAVEFORM_POINTS,
            )
            .await?;
        let samples: Vec<(TsMillis, f64)> = points
            .iter()
            .filter_map(|p| p.value.as_f64().map(|v| (p.ts, mapping.apply(v))))
            .collect();
        if samples.len() < 64 {
            return Ok(Vec::new());
        }

        let span_ms = samples.last().expect("non-empty").0 - samples[0].0;
        if span_ms <= 0 {
            return Ok(Vec::new());
        }
        let sample_rate_hz = (samples.len() as f64 - 1.0) / (span_ms as f64 / 1000.0);
        let waveform: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
        let spectrum = Spectrum::compute(&waveform, sample_rate_hz);

        let model = self.models.get(&instance.model_id).await?;
        let shaft_hz = values
            .get(&MotorParameter::Speed)
            .map(|rpm| rpm / 60.0)
            .unwrap_or(model.rated_speed_rpm / 60.0);
        let supply_hz =
            values.get(&MotorParameter::Frequency).copied().unwrap_or(DEFAULT_SUPPLY_HZ);
        let bearing = bearing_frequencies(&model.bearing, shaft_hz);
        let Some(features) = SpectrumFeatures::extract(&spectrum, supply_hz, Some(bearing)) else {
            return Ok(Vec::new());
        };

        // Prefer the learned noise floor; fall back to the live spectrum's
        let noise_floor = match mode_id {
            Some(mode) => self
                .profiles
                .get(&instance.instance_id, mode, mapping.parameter)
                .await?
                .and_then(|p: BaselineProfile| p.frequency_profile)
                .map(|f| f.noise_floor)
                .unwrap_or(features.noise_floor),
            None => features.noise_floor,
        };
        let gate = noise_floor * self.config.bearing_fault_gain_threshold;

        let mut faults = Vec::new();
        if gate > EPSILON {
            if let Some(amps) = features.bearing {
                let candidates = [
                    (MotorFaultType::BearingOuterRace, amps.bpfo, amps.frequencies.bpfo),
                    (MotorFaultType::BearingInnerRace, amps.bpfi, amps.frequencies.bpfi),
                    (MotorFaultType::BearingBall, amps.bsf, amps.frequencies.bsf),
                    (MotorFaultType::BearingCage, amps.ftf, amps.frequencies.ftf),
                ];
                for (fault_type, amplitude, frequency) in candidates {
                    if amplitude > gate {
                        let ratio = amplitude / gate;
                        faults.push(MotorFault {
                            fault_type,
                            parameter: Some(mapping.parameter),
                            severity: if ratio >= 4.0 {
                                FaultSeverity::Severe
                            } else {
                                FaultSeverity::Moderate
                            },
                            z_score: None,
                            confidence: (50.0 + 10.0 * ratio).min(95.0),
                            message: format!(
                                "amplitude {amplitude:.3} at {frequency:.1} Hz exceeds the noise gate {gate:.3}"
                            ),
                        });
                    }
                }
            }
        }
        if features.thd_percent > self.config.thd_threshold {
            faults.push(MotorFault {
                fault_type: MotorFaultType::HarmonicAbnormal,
                parameter: Some(mapping.parameter),
                severity: if features.thd_percent > 2.0 * self.config.thd_threshold {
                    FaultSeverity::Severe
                } else {
                    FaultSeverity::Moderate
                },
                z_score: None,
                confidence: (50.0 + features.thd_percent).min(95.0),
                message: format!("THD {:.1}% exceeds {:.1}%", features.thd_percent, self.config.thd_threshold),
            });
        }
        Ok(faults)
    }
}

fn fault_type_for(parameter: MotorParameter, z: f64) -> Option<MotorFaultType> {
    use MotorFaultType::*;
    use MotorParameter::*;
    let rising = z > 0.0;
    Some(match (parameter, rising) {
        (CurrentPhaseA | CurrentPhaseB | CurrentPhaseC | CurrentRms, true) => Overcurrent,
        (CurrentPhaseA | CurrentPhaseB | CurrentPhaseC | CurrentRms, false) => Undercurrent,
        (VoltageA | VoltageB | VoltageC | VoltageRms, true) => Overvoltage,
        (VoltageA | VoltageB | VoltageC | VoltageRms, false) => Undervoltage,
        (Power | Torque, true) => Overload,
        (Power | Torque, false) => Underload,
        (PowerFactor, false) => LowPowerFactor,
        (PowerFactor, true) => return None,
        (Frequency, _) => FrequencyDeviation,
        (Speed, true) => Overspeed,
        (Speed, false) => Underspeed,
        (Temperature, true) => Overheating,
        (Temperature, false) => return None,
        (Vibration, true) => ExcessiveVibration,
        (Vibration, false) => return None,
    })
}

/// Start at `100 - 15 * mean(|z|)`, then subtract a severity penalty scaled
/// by each fault's confidence
fn health_score(z_magnitudes: &[f64], faults: &[MotorFault]) -> f64 {
    let mean_z = if z_magnitudes.is_empty() {
        0.0
    } else {
        z_magnitudes.iter().sum::<f64>() / z_magnitudes.len() as f64
    };
    let mut score = 100.0 - 15.0 * mean_z;
    for fault in faults {
        let penalty = match fault.severity {
            FaultSeverity::Minor => 5.0,
            FaultSeverity::Moderate => 10.0,
            FaultSeverity::Severe => 20.0,
            FaultSeverity::Critical => 30.0,
        };
        score -= penalty * fault.confidence / 100.0;
    }
    score.clamp(0.0, 100.0)
}

/// Top three faults by severity
fn summarize(faults: &[MotorFault]) -> String {
    if faults.is_empty() {
        return "no faults detected".to_string();
    }
    faults
        .iter()
        .take(3)
        .map(|f| format!("{:?} ({:?})", f.fault_type, f.severity))
        .collect::<Vec<_>>()
        .join(", ")
}

fn recommend(faults: &[MotorFault]) -> Vec<String> {
    use MotorFaultType::*;
    let mut out: Vec<String> = Vec::new();
    let mut push_once = |s: &str| {
        if !out.iter().any(|existing| existing == s) {
            out.push(s.to_string());
        }
    };
    for fault in faults {
        match fault.fault_type {
            Overcurrent | Overload => push_once("check mechanical load and supply quality"),
            Undercurrent | Underload => push_once("verify coupling and load presence"),
            Overvoltage | Undervoltage => push_once("inspect supply voltage regulation"),
            PhaseImbalance => push_once("inspect phase wiring and contactor contacts"),
            LowPowerFactor => push_once("review compensation capacitors"),
            FrequencyDeviation => push_once("check drive output frequency"),
            Overspeed | Underspeed => push_once("verify speed reference and feedback"),
            Overheating => push_once("check cooling circuit and ambient temperature"),
            ExcessiveVibration => push_once("check alignment and mounting"),
            BearingOuterRace | BearingInnerRace | BearingBall | BearingCage => {
                push_once("inspect and schedule bearing replacement")
            }
            HarmonicAbnormal => push_once("inspect drive electronics and filtering"),
        }
    }
    if faults.iter().any(|f| f.severity >= FaultSeverity::Severe) {
        out.push("schedule immediate stop for inspection".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use im_common::motor::{
        BearingGeometry, MotorInstance, MotorModel, MotorParameterMapping, OperationMode,
    };
    use im_common::{TelemetryPoint, TelemetryValue};
    use im_store::memory::{MemoryMotorStore, MemoryTelemetry};

    fn profile(parameter: MotorParameter, mean: f64, std_dev: f64) -> BaselineProfile {
        BaselineProfile {
            instance_id: "m1".into(),
            mode_id: "run".into(),
            parameter,
            mean,
            std_dev,
            min: mean - 3.0 * std_dev,
            max: mean + 3.0 * std_dev,
            median: mean,
            p05: mean - 2.0 * std_dev,
            p95: mean + 2.0 * std_dev,
            sample_count: 10_000,
            confidence: 90.0,
            frequency_profile: None,
            updated_utc: Utc::now(),
        }
    }

    async fn setup() -> (FaultDetector, Arc<MemoryTelemetry>, Arc<MemoryMotorStore>) {
        let telemetry = Arc::new(MemoryTelemetry::new());
        let motor = Arc::new(MemoryMotorStore::new());
        MotorModelRepository::upsert(
            motor.as_ref(),
            MotorModel {
                model_id: "mdl".into(),
                name: "test motor".into(),
                bearing: BearingGeometry {
                    rolling_element_count: 9,
                    ball_diameter_mm: 10.0,
                    pitch_diameter_mm: 40.0,
                    contact_angle_deg: 0.0,
                },
                rated_power_kw: 15.0,
                rated_current_a: 30.0,
                rated_speed_rpm: 1480.0,
            },
        )
        .await
        .unwrap();
        MotorInstanceRepository::upsert(
            motor.as_ref(),
            MotorInstance {
                instance_id: "m1".into(),
                device_id: "d1".into(),
                model_id: "mdl".into(),
                enabled: true,
            },
        )
        .await
        .unwrap();
        OperationModeRepository::upsert(
            motor.as_ref(),
            OperationMode {
                mode_id: "run".into(),
                instance_id: "m1".into(),
                name: "run".into(),
                discriminator: None,
                min_value: None,
                max_value: None,
                is_default: true,
            },
        )
        .await
        .unwrap();

        let detector = FaultDetector::new(
            telemetry.clone(),
            motor.clone(),
            motor.clone(),
            motor.clone(),
            motor.clone(),
            motor.clone(),
            FaultDetectionConfig::default(),
        );
        (detector, telemetry, motor)
    }

    async fn map(motor: &MemoryMotorStore, parameter: MotorParameter, tag: &str) {
        MotorMappingRepository::upsert(
            motor,
            MotorParameterMapping {
                instance_id: "m1".into(),
                parameter,
                tag_id: tag.to_string(),
                scale: 1.0,
                offset: 0.0,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn high_temperature_is_an_overheating_fault() {
        let (detector, telemetry, motor) = setup().await;
        map(&motor, MotorParameter::Temperature, "temp").await;
        BaselineProfileRepository::save(motor.as_ref(), profile(MotorParameter::Temperature, 60.0, 2.0))
            .await
            .unwrap();
        // 70 C is five sigma above the 60 C baseline
        telemetry
            .append(vec![TelemetryPoint::new("d1", "temp", 1000, TelemetryValue::Float64(70.0))])
            .await
            .unwrap();

        let result = detector.diagnose("m1", 2000).await.unwrap();
        assert_eq!(result.faults.len(), 1);
        let fault = &result.faults[0];
        assert_eq!(fault.fault_type, MotorFaultType::Overheating);
        assert_eq!(fault.severity, FaultSeverity::Critical);
        assert_eq!(fault.confidence, 95.0);
        assert!(result.health_score < 100.0 - 15.0 * 4.0);
        assert!(result.recommendations.iter().any(|r| r.contains("cooling")));
        assert!(result.recommendations.iter().any(|r| r.contains("immediate stop")));
        assert_eq!(detector.latest("m1").unwrap().faults.len(), 1);
    }

    #[tokio::test]
    async fn nominal_values_are_fault_free() {
        let (detector, telemetry, motor) = setup().await;
        map(&motor, MotorParameter::Temperature, "temp").await;
        BaselineProfileRepository::save(motor.as_ref(), profile(MotorParameter::Temperature, 60.0, 2.0))
            .await
            .unwrap();
        telemetry
            .append(vec![TelemetryPoint::new("d1", "temp", 1000, TelemetryValue::Float64(60.5))])
            .await
            .unwrap();

        let result = detector.diagnose("m1", 2000).await.unwrap();
        assert!(result.faults.is_empty());
        assert!(result.health_score > 90.0);
        assert_eq!(result.summary, "no faults detected");
    }

    #[tokio::test]
    async fn phase_imbalance_is_detected_from_three_phases() {
        let (detector, telemetry, motor) = setup().await;
        map(&motor, MotorParameter::CurrentPhaseA, "ia").await;
        map(&motor, MotorParameter::CurrentPhaseB, "ib").await;
        map(&motor, MotorParameter::CurrentPhaseC, "ic").await;
        telemetry
            .append(vec![
                TelemetryPoint::new("d1", "ia", 1000, TelemetryValue::Float64(30.0)),
                TelemetryPoint::new("d1", "ib", 1000, TelemetryValue::Float64(30.0)),
                TelemetryPoint::new("d1", "ic", 1000, TelemetryValue::Float64(24.0)),
            ])
            .await
            .unwrap();

        let result = detector.diagnose("m1", 2000).await.unwrap();
        // avg 28, max deviation 4/28 = 14.3% over the 5% threshold
        let fault = result
            .faults
            .iter()
            .find(|f| f.fault_type == MotorFaultType::PhaseImbalance)
            .expect("imbalance fault");
        assert_eq!(fault.severity, FaultSeverity::Severe);
    }

    #[tokio::test]
    async fn bearing_tone_produces_an_outer_race_fault() {
        let (detector, telemetry, motor) = setup().await;
        map(&motor, MotorParameter::CurrentRms, "irms").await;
        // Learned profile carries a 0.01 noise floor
        let mut p = profile(MotorParameter::CurrentRms, 0.0, 10.0);
        p.frequency_profile = Some(im_common::motor::FrequencyProfile {
            version: 1,
            sample_rate_hz: 1024.0,
            fundamental_amplitude: 1.0,
            harmonic2_amplitude: 0.0,
            harmonic3_amplitude: 0.0,
            thd_percent: 0.0,
            low_band_energy: 0.0,
            mid_band_energy: 0.0,
            high_band_energy: 0.0,
            bpfo_amplitude: 0.0,
            bpfi_amplitude: 0.0,
            bsf_amplitude: 0.0,
            ftf_amplitude: 0.0,
            noise_floor: 0.01,
        });
        BaselineProfileRepository::save(motor.as_ref(), p).await.unwrap();

        // Speed mapping pins the shaft frequency so BPFO lands at a known bin
        map(&motor, MotorParameter::Speed, "rpm").await;

        // Shaft 10 Hz -> BPFO = 4.5*10*0.75 = 33.75 Hz; 1 kHz waveform with
        // one sample per millisecond
        let mut batch = vec![TelemetryPoint::new("d1", "rpm", 0, TelemetryValue::Float64(600.0))];
        for i in 0..4096i64 {
            let t = i as f64 / 1000.0;
            let v = (2.0 * std::f64::consts::PI * 50.0 * t).sin()
                + 0.1 * (2.0 * std::f64::consts::PI * 33.75 * t).sin();
            batch.push(TelemetryPoint::new("d1", "irms", i, TelemetryValue::Float64(v)));
        }
        telemetry.append(batch).await.unwrap();

        let result = detector.diagnose("m1", 4100).await.unwrap();
        let fault = result
            .faults
            .iter()
            .find(|f| f.fault_type == MotorFaultType::BearingOuterRace)
            .expect("bearing fault");
        // amplitude ~0.1 over gate 0.05: confidence ~70
        assert!((fault.confidence - 70.0).abs() < 10.0, "confidence {}", fault.confidence);
    }

    #[tokio::test]
    async fn no_mappings_is_insufficient_data() {
        let (detector, _, _) = setup().await;
        let err = detector.diagnose("m1", 1000).await.unwrap_err();
        assert_eq!(err.category(), "insufficient_data");
    }
}
