//! Per-cycle anomaly scoring
//!
//! Each category contributes independently; the score saturates at 100 and
//! the primary type is the largest contributor.

use im_common::config::CycleDetectionConfig;
use im_common::cycle::{CycleAnomalyType, SpreadModel};
use im_common::stats::EPSILON;

/// Raw inputs to the scorer, derived from one cycle
pub struct CycleObservation {
    pub duration_seconds: f64,
    pub max_angle: f64,
    pub peak_current: f64,
    pub balance_ratio: f64,
    pub baseline_deviation_percent: f64,
}

/// Scoring outcome
#[derive(Debug, Clone)]
pub struct AnomalyAssessment {
    pub score: f64,
    pub is_anomaly: bool,
    pub primary: Option<CycleAnomalyType>,
    pub contributions: Vec<(CycleAnomalyType, f64)>,
}

const BASELINE_DEVIATION_TRIGGER: f64 = 20.0;
const BALANCE_SIGMA_BAND: f64 = 2.0;
const DEFAULT_BALANCE_LOW: f64 = 0.7;
const DEFAULT_BALANCE_HIGH: f64 = 1.3;

/// Score one cycle against the configuration and the optional learned
/// motor-balance spread.
pub fn score_cycle(
    obs: &CycleObservation,
    balance_baseline: Option<&SpreadModel>,
    config: &CycleDetectionConfig,
) -> AnomalyAssessment {
    let mut contributions: Vec<(CycleAnomalyType, f64)> = Vec::new();

    if obs.duration_seconds > config.timeout_seconds {
        contributions.push((
            CycleAnomalyType::CycleTimeout,
            30.0 + (obs.duration_seconds - config.timeout_seconds) / 10.0,
        ));
    }
    if obs.duration_seconds < config.short_seconds {
        contributions.push((
            CycleAnomalyType::CycleTooShort,
            30.0 + (config.short_seconds - obs.duration_seconds),
        ));
    }
    if obs.peak_current > config.over_current_limit {
        let over_pct =
            (obs.peak_current - config.over_current_limit) / config.over_current_limit * 100.0;
        contributions.push((CycleAnomalyType::OverCurrent, over_pct));
    }

    match balance_baseline {
        Some(model) if model.std_dev > EPSILON => {
            let low = model.mean - BALANCE_SIGMA_BAND * model.std_dev;
            let high = model.mean + BALANCE_SIGMA_BAND * model.std_dev;
            if obs.balance_ratio < low || obs.balance_ratio > high {
                contributions.push((
                    CycleAnomalyType::MotorImbalance,
                    (obs.balance_ratio - model.mean).abs() / model.std_dev * 10.0,
                ));
            }
        }
        _ => {
            if obs.balance_ratio < DEFAULT_BALANCE_LOW || obs.balance_ratio > DEFAULT_BALANCE_HIGH {
                contributions.push((
                    CycleAnomalyType::MotorImbalance,
                    (obs.balance_ratio - 1.0).abs() * 50.0,
                ));
            }
        }
    }

    if obs.baseline_deviation_percent > BASELINE_DEVIATION_TRIGGER {
        contributions
            .push((CycleAnomalyType::BaselineDeviation, obs.baseline_deviation_percent));
    }
    if obs.max_angle < config.stall_angle {
        contributions.push((
            CycleAnomalyType::AngleStall,
            20.0 + (config.stall_angle - obs.max_angle) / 2.0,
        ));
    }

    let score = contributions.iter().map(|(_, c)| c).sum::<f64>().min(100.0);
    let primary = contributions
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(kind, _)| *kind);

    AnomalyAssessment {
        score,
        is_anomaly: score >= config.anomaly_score_threshold,
        primary,
        contributions,
    }
}
