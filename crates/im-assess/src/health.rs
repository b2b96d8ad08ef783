//! Health score calculator
//!
//! Combines sigmoid-smoothed deviation, sqrt-smoothed trend, log-smoothed
//! stability and alarm pressure into a weighted composite with an
//! importance-ranked diagnostic message.

use crate::importance::TagImportanceService;
use im_common::alarm::AlarmRecord;
use im_common::config::{AlarmScoreConfig, HealthConfig};
use im_common::correlation::CorrelationAnomaly;
use im_common::health::{
    DeviceBaseline, DeviceFeatures, HealthLevel, HealthScore, ProblemTag, TagBaseline,
    TagFeatures,
};
use im_common::stats::{sigmoid, EPSILON};
use im_common::{Result, TagImportance, TsMillis};
use im_store::{AlarmRepository, HealthBaselineRepository};
use std::sync::Arc;

/// Deviation sub-score when no baseline (or a degenerate sigma) exists
const NO_BASELINE_SCORE: f64 = 80.0;

/// Sub-score id, used when collecting problem tags
#[derive(Clone, Copy, PartialEq)]
enum SubScore {
    Deviation,
    Trend,
}

pub struct HealthCalculator {
    importance: Arc<TagImportanceService>,
    baselines: Arc<dyn HealthBaselineRepository>,
    alarms: Arc<dyn AlarmRepository>,
    config: HealthConfig,
}

impl HealthCalculator {
    pub fn new(
        importance: Arc<TagImportanceService>,
        baselines: Arc<dyn HealthBaselineRepository>,
        alarms: Arc<dyn AlarmRepository>,
        config: HealthConfig,
    ) -> Self {
        HealthCalculator { importance, baselines, alarms, config }
    }

    /// Assess one device from its extracted features
    pub async fn assess(&self, features: &DeviceFeatures) -> Result<HealthScore> {
        let baseline = self.baselines.get(&features.device_id).await?;
        let open_alarms = self.alarms.list_open(&features.device_id).await?;
        Ok(self.score(features, baseline.as_ref(), &open_alarms, features.timestamp))
    }

    /// Pure scoring, separated for testability
    pub fn score(
        &self,
        features: &DeviceFeatures,
        baseline: Option<&DeviceBaseline>,
        open_alarms: &[AlarmRecord],
        now: TsMillis,
    ) -> HealthScore {
        let mut problem_tags: Vec<ProblemTag> = Vec::new();
        let mut deviation = WeightedMean::new();
        let mut trend = WeightedMean::new();
        let mut stability = WeightedMean::new();

        for (tag_id, f) in &features.tags {
            let importance = self.importance.importance_of(tag_id);
            let weight = importance.rank() as f64;
            let tag_baseline = baseline.and_then(|b| b.tags.get(tag_id));

            let (dev_score, dev_z) = deviation_score(f, tag_baseline);
            deviation.add(dev_score, weight);
            if let Some(z) = dev_z {
                if z > deviation_problem_threshold(importance) {
                    problem_tags.push(problem(tag_id, importance, z, SubScore::Deviation));
                }
            }

            let (trend_score, trend_norm) = trend_score(f);
            trend.add(trend_score, weight);
            if f.trend_direction != 0 && trend_norm > trend_problem_threshold(importance) {
                problem_tags.push(problem(tag_id, importance, trend_norm, SubScore::Trend));
            }

            stability.add(stability_score(f, tag_baseline), weight);
        }

        let deviation_score = deviation.value(NO_BASELINE_SCORE);
        let trend_score = trend.value(100.0);
        let stability_score = stability.value(100.0);
        let alarm_score = calculate_alarm_score(open_alarms, &self.config.alarm_score, now);

        let w = &self.config.weights;
        let index = (deviation_score * w.deviation
            + trend_score * w.trend
            + stability_score * w.stability
            + alarm_score * w.alarm)
            .round()
            .clamp(0.0, 100.0) as u32;

        problem_tags.sort_by(|a, b| {
            b.importance
                .rank()
                .cmp(&a.importance.rank())
                .then(b.z_score.partial_cmp(&a.z_score).unwrap_or(std::cmp::Ordering::Equal))
        });

        let diagnostic_message = if problem_tags.is_empty() {
            None
        } else {
            Some(
                problem_tags
                    .iter()
                    .take(3)
                    .map(|p| format!("{} ({})", p.tag_id, p.reason))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        HealthScore {
            device_id: features.device_id.clone(),
            timestamp: features.timestamp,
            index,
            level: self.level_for(index as f64),
            deviation_score,
            trend_score,
            stability_score,
            alarm_score,
            has_baseline: baseline.is_some(),
            problem_tags,
            diagnostic_message,
        }
    }

    /// Subtract correlation penalties and re-derive the level
    pub fn apply_correlation_penalties(
        &self,
        score: &mut HealthScore,
        anomalies: &[CorrelationAnomaly],
    ) {
        if anomalies.is_empty() {
            return;
        }
        let total: f64 = anomalies.iter().map(|a| a.penalty_score).sum();
        let new_index =
            (score.index as f64 - total).max(self.config.correlation_min_score).round() as u32;
        score.index = new_index;
        score.level = self.level_for(new_index as f64);

        let mut risks: Vec<&CorrelationAnomaly> = anomalies.iter().collect();
        risks.sort_by(|a, b| {
            b.penalty_score.partial_cmp(&a.penalty_score).unwrap_or(std::cmp::Ordering::Equal)
        });
        let prefix = risks
            .iter()
            .take(2)
            .map(|a| a.risk_description.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        score.diagnostic_message = Some(match score.diagnostic_message.take() {
            Some(existing) => format!("{prefix}; {existing}"),
            None => prefix,
        });
    }

    pub fn level_for(&self, index: f64) -> HealthLevel {
        let t = &self.config.level_thresholds;
        if index >= t.healthy_min {
            HealthLevel::Healthy
        } else if index >= t.attention_min {
            HealthLevel::Attention
        } else if index >= t.warning_min {
            HealthLevel::Warning
        } else {
            HealthLevel::Critical
        }
    }
}

struct WeightedMean {
    sum: f64,
    weight: f64,
}

impl WeightedMean {
    fn new() -> Self {
        WeightedMean { sum: 0.0, weight: 0.0 }
    }

    fn add(&mut self, value: f64, weight: f64) {
        self.sum += value * weight;
        self.weight += weight;
    }

    fn value(&self, default: f64) -> f64 {
        if self.weight < EPSILON {
            default
        } else {
            self.sum / self.weight
        }
    }
}

fn problem(tag_id: &str, importance: TagImportance, metric: f64, kind: SubScore) -> ProblemTag {
    let reason = match kind {
        SubScore::Deviation => format!("deviation z={metric:.2}"),
        SubScore::Trend => format!("trend {metric:.2}%"),
    };
    ProblemTag { tag_id: tag_id.to_string(), importance, z_score: metric, reason }
}

fn deviation_problem_threshold(importance: TagImportance) -> f64 {
    match importance {
        TagImportance::Critical => 2.0,
        TagImportance::Major => 2.5,
        TagImportance::Minor => 3.0,
        TagImportance::Trivial => 3.5,
    }
}

fn trend_problem_threshold(importance: TagImportance) -> f64 {
    match importance {
        TagImportance::Critical => 0.5,
        TagImportance::Major => 0.8,
        _ => 1.0,
    }
}

/// Sigmoid-smoothed deviation from the baseline mean. Returns the score and
/// the z-score when a usable baseline exists.
fn deviation_score(f: &TagFeatures, baseline: Option<&TagBaseline>) -> (f64, Option<f64>) {
    let Some(b) = baseline else {
        return (NO_BASELINE_SCORE, None);
    };
    if b.normal_std_dev < EPSILON || !f.mean.is_finite() {
        return (NO_BASELINE_SCORE, None);
    }
    let z = ((f.mean - b.normal_mean) / b.normal_std_dev).abs().min(10.0);
    let score = (100.0 * (1.0 - sigmoid(z - 3.0, 1.2) * 0.95)).clamp(5.0, 100.0);
    (score, Some(z))
}

/// Sqrt-smoothed trend penalty. Returns the score and the normalized slope
/// percentage used for problem detection.
fn trend_score(f: &TagFeatures) -> (f64, f64) {
    let norm = if f.mean.abs() < EPSILON {
        (10.0 * f.trend_slope.abs()).min(20.0)
    } else {
        f.trend_slope.abs() / f.mean.abs() * 100.0
    };
    ((100.0 - 8.0 * norm.sqrt()).clamp(20.0, 100.0), norm)
}

/// Log-smoothed stability penalty with a baseline-aware CV threshold
fn stability_score(f: &TagFeatures, baseline: Option<&TagBaseline>) -> f64 {
    let cv = f.coefficient_of_variation;
    if !cv.is_finite() || !f.std_dev.is_finite() {
        return 80.0;
    }
    let cv_threshold = baseline
        .map(|b| (1.5 * b.normal_cv).clamp(0.05, 0.5))
        .unwrap_or(0.2);
    if cv <= cv_threshold {
        return 100.0;
    }
    let excess = cv / cv_threshold;
    (100.0 - 40.0 * (excess + 1.0).ln()).clamp(20.0, 100.0)
}

/// Alarm pressure from the open-alarm severity multiset
pub fn calculate_alarm_score(open: &[AlarmRecord], cfg: &AlarmScoreConfig, now: TsMillis) -> f64 {
    if open.is_empty() {
        return 100.0;
    }
    let mut total_penalty = 0.0;
    for alarm in open {
        let base = match alarm.severity {
            s if s >= 4 => cfg.critical_penalty,
            3 => cfg.error_penalty,
            2 => cfg.warning_penalty,
            _ => cfg.info_penalty,
        };
        let multiplier = if cfg.consider_duration {
            let hours_open = ((now - alarm.ts).max(0)) as f64 / 3_600_000.0;
            1.0 + (hours_open * cfg.duration_factor_per_hour)
                .min(cfg.max_duration_multiplier - 1.0)
        } else {
            1.0
        };
        total_penalty += base * multiplier;
    }
    (100.0 - total_penalty).max(cfg.min_score)
}

/// Count-only fallback when severities are unavailable
pub fn alarm_score_by_count(open_count: usize) -> f64 {
    match open_count {
        0 => 100.0,
        1 => 80.0,
        2 => 60.0,
        3 => 40.0,
        _ => 20.0,
    }
}
