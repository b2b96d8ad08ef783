//! Cycle boundary detection and per-cycle features
//!
//! A cycle opens when the angle crosses the threshold upward and closes on
//! the first sample back below it, provided the in-cycle peak exceeded the
//! minimum. Detected intervals are pairwise disjoint by construction.

use crate::anomaly::{score_cycle, CycleObservation};
use crate::polyfit::eval_quadratic;
use im_common::config::CycleDetectionConfig;
use im_common::cycle::{CycleBaseline, CycleBaselineKind, PolyCurveModel, SpreadModel, WorkCycle};
use im_common::stats::{self, EPSILON};
use im_common::{Result, TsMillis};
use im_store::{CycleBaselineRepository, TelemetryRepository, WorkCycleRepository};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const MAX_SERIES_POINTS: usize = 100_000;

pub struct CycleDetector {
    telemetry: Arc<dyn TelemetryRepository>,
    cycles: Arc<dyn WorkCycleRepository>,
    baselines: Arc<dyn CycleBaselineRepository>,
    config: CycleDetectionConfig,
}

/// One detected `[open, close)` interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleBounds {
    pub start: TsMillis,
    pub end: TsMillis,
    pub max_angle: f64,
}

impl CycleDetector {
    pub fn new(
        telemetry: Arc<dyn TelemetryRepository>,
        cycles: Arc<dyn WorkCycleRepository>,
        baselines: Arc<dyn CycleBaselineRepository>,
        config: CycleDetectionConfig,
    ) -> Self {
        CycleDetector { telemetry, cycles, baselines, config }
    }

    /// Analyze a device over an explicit `[start_ts, end_ts)` range:
    /// segment, feature, score and persist the cycles found.
    pub async fn analyze(
        &self,
        device_id: &str,
        start_ts: TsMillis,
        end_ts: TsMillis,
    ) -> Result<Vec<WorkCycle>> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }
        let angle = self.series(device_id, &self.config.angle_tag, start_ts, end_ts).await?;
        if angle.len() < 2 {
            return Ok(Vec::new());
        }
        let bounds = detect_bounds(&angle, &self.config);
        if bounds.is_empty() {
            debug!("no cycles for {device_id} in [{start_ts}, {end_ts})");
            return Ok(Vec::new());
        }

        let motor1 =
            self.series(device_id, &self.config.motor1_current_tag, start_ts, end_ts).await?;
        let motor2 =
            self.series(device_id, &self.config.motor2_current_tag, start_ts, end_ts).await?;
        let curve1 = self.curve_model(device_id, CycleBaselineKind::Motor1Curve).await?;
        let curve2 = self.curve_model(device_id, CycleBaselineKind::Motor2Curve).await?;
        let balance = self.spread_model(device_id, CycleBaselineKind::Balance).await?;

        let mut cycles = Vec::with_capacity(bounds.len());
        for b in bounds {
            cycles.push(self.build_cycle(
                device_id,
                b,
                &angle,
                &motor1,
                &motor2,
                curve1.as_ref(),
                curve2.as_ref(),
                balance.as_ref(),
            ));
        }
        self.cycles.save(cycles.clone()).await?;
        Ok(cycles)
    }

    async fn series(
        &self,
        device_id: &str,
        tag: &str,
        start: TsMillis,
        end: TsMillis,
    ) -> Result<Vec<(TsMillis, f64)>> {
        let points = self
            .telemetry
            .query_simple(device_id, Some(tag), start, end, MAX_SERIES_POINTS)
            .await?;
        Ok(points.iter().filter_map(|p| p.value.as_f64().map(|v| (p.ts, v))).collect())
    }

    async fn curve_model(
        &self,
        device_id: &str,
        kind: CycleBaselineKind,
    ) -> Result<Option<PolyCurveModel>> {
        Ok(self.baselines.get(device_id, kind).await?.and_then(decode_curve))
    }

    async fn spread_model(
        &self,
        device_id: &str,
        kind: CycleBaselineKind,
    ) -> Result<Option<SpreadModel>> {
        Ok(self.baselines.get(device_id, kind).await?.and_then(decode_spread))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_cycle(
        &self,
        device_id: &str,
        bounds: CycleBounds,
        angle: &[(TsMillis, f64)],
        motor1: &[(TsMillis, f64)],
        motor2: &[(TsMillis, f64)],
        curve1: Option<&PolyCurveModel>,
        curve2: Option<&PolyCurveModel>,
        balance: Option<&SpreadModel>,
    ) -> WorkCycle {
        let m1 = slice_window(motor1, bounds.start, bounds.end);
        let m2 = slice_window(motor2, bounds.start, bounds.end);
        let (m1_peak, m1_avg, m1_energy) = motor_features(&m1);
        let (m2_peak, m2_avg, m2_energy) = motor_features(&m2);

        // Neutral ratio when the second motor contributes no usable signal
        let ratio = if m2_avg.abs() < EPSILON { 1.0 } else { m1_avg / m2_avg };

        let angle_window = slice_window(angle, bounds.start, bounds.end);
        let mut deviations = Vec::new();
        if let Some(curve) = curve1 {
            if let Some(d) = curve_deviation(&angle_window, &m1, curve) {
                deviations.push(d);
            }
        }
        if let Some(curve) = curve2 {
            if let Some(d) = curve_deviation(&angle_window, &m2, curve) {
                deviations.push(d);
            }
        }
        let baseline_deviation = if deviations.is_empty() {
            0.0
        } else {
            stats::mean(&deviations)
        };

        let duration_seconds = (bounds.end - bounds.start) as f64 / 1000.0;
        let observation = CycleObservation {
            duration_seconds,
            max_angle: bounds.max_angle,
            peak_current: m1_peak.max(m2_peak),
            balance_ratio: ratio,
            baseline_deviation_percent: baseline_deviation,
        };
        let assessment = score_cycle(&observation, balance, &self.config);

        WorkCycle {
            device_id: device_id.to_string(),
            segment_id: Some(Uuid::new_v4().to_string()),
            start_ts: bounds.start,
            end_ts: bounds.end,
            duration_seconds,
            max_angle: bounds.max_angle,
            motor1_peak_current: m1_peak,
            motor1_avg_current: m1_avg,
            motor1_energy: m1_energy,
            motor2_peak_current: m2_peak,
            motor2_avg_current: m2_avg,
            motor2_energy: m2_energy,
            motor_balance_ratio: ratio,
            baseline_deviation_percent: baseline_deviation,
            anomaly_score: assessment.score,
            is_anomaly: assessment.is_anomaly,
            anomaly_type: assessment.primary,
        }
    }
}

/// Angle-threshold segmentation. Close snaps to the first sample back below
/// the threshold; candidates outside the duration bounds or that never
/// exceeded the minimum peak are discarded.
pub fn detect_bounds(angle: &[(TsMillis, f64)], config: &CycleDetectionConfig) -> Vec<CycleBounds> {
    let mut bounds = Vec::new();
    let mut open: Option<(TsMillis, f64)> = None; // (open ts, running peak)

    for window in angle.windows(2) {
        let (_, prev) = window[0];
        let (ts, current) = window[1];
        match open {
            None => {
                if prev < config.angle_threshold && current >= config.angle_threshold {
                    open = Some((ts, current));
                }
            }
            Some((start, peak)) => {
                if current < config.angle_threshold {
                    if peak > config.min_peak_angle {
                        let duration = (ts - start) as f64 / 1000.0;
                        if duration >= config.min_cycle_seconds
                            && duration <= config.max_cycle_seconds
                        {
                            bounds.push(CycleBounds { start, end: ts, max_angle: peak });
                        }
                    }
                    open = None;
                } else {
                    open = Some((start, peak.max(current)));
                }
            }
        }
    }
    bounds
}

fn slice_window(series: &[(TsMillis, f64)], start: TsMillis, end: TsMillis) -> Vec<(TsMillis, f64)> {
    series.iter().copied().filter(|(ts, _)| *ts >= start && *ts < end).collect()
}

/// Peak, average and trapezoidal energy of one motor-current window
fn motor_features(series: &[(TsMillis, f64)]) -> (f64, f64, f64) {
    if series.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    let peak = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let avg = stats::mean(&values);
    let mut energy = 0.0;
    for pair in series.windows(2) {
        let dt = (pair[1].0 - pair[0].0) as f64 / 1000.0;
        energy += (pair[0].1 + pair[1].1) / 2.0 * dt;
    }
    (peak, avg, energy)
}

/// Average percentage deviation of measured current from the fitted
/// current-vs-angle curve, aligned on timestamps
fn curve_deviation(
    angle: &[(TsMillis, f64)],
    current: &[(TsMillis, f64)],
    curve: &PolyCurveModel,
) -> Option<f64> {
    let current_by_ts: HashMap<TsMillis, f64> = current.iter().copied().collect();
    let mut deviations = Vec::new();
    for (ts, a) in angle {
        let Some(&measured) = current_by_ts.get(ts) else {
            continue;
        };
        let predicted = eval_quadratic(&curve.coefficients, *a);
        if predicted.abs() < EPSILON {
            continue;
        }
        deviations.push((measured - predicted).abs() / predicted.abs() * 100.0);
    }
    if deviations.is_empty() {
        None
    } else {
        Some(stats::mean(&deviations))
    }
}

fn decode_curve(baseline: CycleBaseline) -> Option<PolyCurveModel> {
    serde_json::from_value(baseline.model).ok()
}

fn decode_spread(baseline: CycleBaseline) -> Option<SpreadModel> {
    serde_json::from_value(baseline.model).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use im_common::{TelemetryPoint, TelemetryValue};
    use im_store::memory::{MemoryCycleBaselines, MemoryTelemetry, MemoryWorkCycles};

    fn config() -> CycleDetectionConfig {
        CycleDetectionConfig {
            angle_threshold: 10.0,
            min_peak_angle: 30.0,
            min_cycle_seconds: 5.0,
            max_cycle_seconds: 600.0,
            ..CycleDetectionConfig::default()
        }
    }

    /// Angle sweep 0 -> peak -> 0 over `duration_s` seconds, 1 Hz sampling
    fn sweep(start_s: i64, duration_s: i64, peak: f64) -> Vec<(TsMillis, f64)> {
        let half = duration_s / 2;
        (0..=duration_s)
            .map(|s| {
                let frac = if s <= half {
                    s as f64 / half as f64
                } else {
                    (duration_s - s) as f64 / half as f64
                };
                ((start_s + s) * 1000, peak * frac)
            })
            .collect()
    }

    #[test]
    fn detects_a_single_sweep() {
        let angle = sweep(0, 80, 120.0);
        let bounds = detect_bounds(&angle, &config());
        assert_eq!(bounds.len(), 1);
        assert!(bounds[0].max_angle > 100.0);
        // opens at the first sample at/above 10 degrees
        assert!(bounds[0].start < bounds[0].end);
    }

    #[test]
    fn low_peak_candidates_are_discarded() {
        let angle = sweep(0, 60, 25.0); // never exceeds 30 degrees
        assert!(detect_bounds(&angle, &config()).is_empty());
    }

    #[test]
    fn cycles_are_pairwise_disjoint() {
        let mut angle = sweep(0, 60, 120.0);
        angle.extend(sweep(70, 60, 110.0));
        angle.extend(sweep(140, 60, 100.0));
        let bounds = detect_bounds(&angle, &config());
        assert_eq!(bounds.len(), 3);
        for pair in bounds.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn out_of_range_durations_are_discarded() {
        let mut cfg = config();
        cfg.max_cycle_seconds = 40.0;
        let angle = sweep(0, 80, 120.0); // lasts ~76 s above threshold
        assert!(detect_bounds(&angle, &cfg).is_empty());
    }

    #[tokio::test]
    async fn analyze_scores_imbalanced_over_current_cycle() {
        let telemetry = Arc::new(MemoryTelemetry::new());
        let cfg = config();

        // Angle 0 -> 120 -> 0 over 80 s; motor1 peaks at 13 kA, motor2 at 9 kA
        let angle = sweep(0, 80, 120.0);
        let mut batch = Vec::new();
        for &(ts, a) in &angle {
            batch.push(TelemetryPoint::new("d1", "angle", ts, TelemetryValue::Float64(a)));
            let frac = a / 120.0;
            batch.push(TelemetryPoint::new(
                "d1",
                "motor1_current",
                ts,
                TelemetryValue::Float64(13_000.0 * frac),
            ));
            batch.push(TelemetryPoint::new(
                "d1",
                "motor2_current",
                ts,
                TelemetryValue::Float64(9_000.0 * frac),
            ));
        }
        telemetry.append(batch).await.unwrap();

        let detector = CycleDetector::new(
            telemetry,
            Arc::new(MemoryWorkCycles::new()),
            Arc::new(MemoryCycleBaselines::new()),
            cfg,
        );
        let cycles = detector.analyze("d1", 0, 100_000).await.unwrap();
        assert_eq!(cycles.len(), 1);
        let cycle = &cycles[0];

        assert!(cycle.duration_seconds < 120.0, "no timeout expected");
        assert_eq!(cycle.motor1_peak_current, 13_000.0);
        // Ratio of averages tracks the 13:9 shape
        assert!((cycle.motor_balance_ratio - 13.0 / 9.0).abs() < 0.01);
        assert!(cycle.is_anomaly);
        assert_eq!(cycle.anomaly_type, Some(im_common::cycle::CycleAnomalyType::MotorImbalance));
        // Imbalance ~22 plus over-current ~8.3
        assert!((cycle.anomaly_score - 30.3).abs() < 1.5, "score {}", cycle.anomaly_score);
    }
}
