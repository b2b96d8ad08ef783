//! Per-tag trend forecaster
//!
//! Exponentially smooths a tag's history, fits a line over time, finds the
//! alarm threshold lying in the slope's path and reports the hours until it
//! is crossed.

use im_common::alarm::{AlarmCondition, AlarmRule};
use im_common::config::TrendPredictionConfig;
use im_common::stats;
use im_common::{PatternCache, Result, TsMillis};
use im_store::{AlarmRuleRepository, TelemetryRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

const MAX_HISTORY_POINTS: usize = 5000;
const MAX_FORECAST_HOURS: f64 = 720.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrendAlertLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl TrendAlertLevel {
    fn for_hours(hours: f64) -> Option<Self> {
        if hours <= 24.0 {
            Some(TrendAlertLevel::Critical)
        } else if hours <= 48.0 {
            Some(TrendAlertLevel::High)
        } else if hours <= 72.0 {
            Some(TrendAlertLevel::Medium)
        } else if hours <= 168.0 {
            Some(TrendAlertLevel::Low)
        } else {
            None
        }
    }

    /// One band down, used when the fit is weak
    fn demoted(self) -> Self {
        match self {
            TrendAlertLevel::Critical => TrendAlertLevel::High,
            TrendAlertLevel::High => TrendAlertLevel::Medium,
            _ => TrendAlertLevel::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendForecast {
    pub device_id: String,
    pub tag_id: String,
    /// Units per hour after smoothing
    pub slope_per_hour: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub current_value: f64,
    pub matched_rule_id: Option<String>,
    pub threshold: Option<f64>,
    pub hours_to_threshold: Option<f64>,
    pub alert_level: Option<TrendAlertLevel>,
    /// The fit's R-squared, reported as prediction confidence
    pub confidence: f64,
}

pub struct TrendPredictor {
    telemetry: Arc<dyn TelemetryRepository>,
    alarm_rules: Arc<dyn AlarmRuleRepository>,
    patterns: PatternCache,
    config: TrendPredictionConfig,
}

impl TrendPredictor {
    pub fn new(
        telemetry: Arc<dyn TelemetryRepository>,
        alarm_rules: Arc<dyn AlarmRuleRepository>,
        config: TrendPredictionConfig,
    ) -> Self {
        TrendPredictor { telemetry, alarm_rules, patterns: PatternCache::new(), config }
    }

    /// Forecast one tag. `None` when history is too thin or disabled.
    pub async fn forecast(
        &self,
        device_id: &str,
        tag_id: &str,
        now: TsMillis,
    ) -> Result<Option<TrendForecast>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let start = now - i64::from(self.config.history_window_hours) * 3_600_000;
        let points = self
            .telemetry
            .query_simple(device_id, Some(tag_id), start, now + 1, MAX_HISTORY_POINTS)
            .await?;

        let samples: Vec<(TsMillis, f64)> = points
            .iter()
            .filter_map(|p| p.value.as_f64().map(|v| (p.ts, v)))
            .collect();
        if samples.len() < self.config.min_data_points {
            debug!(
                "trend forecast skipped for {device_id}/{tag_id}: {} < {} points",
                samples.len(),
                self.config.min_data_points
            );
            return Ok(None);
        }

        let values: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
        let smoothed = stats::exponential_smooth(&values, self.config.smoothing_alpha);
        let t0 = samples[0].0;
        let hours: Vec<f64> =
            samples.iter().map(|(ts, _)| (ts - t0) as f64 / 3_600_000.0).collect();
        let Some(fit) = stats::linear_fit_xy(&hours, &smoothed) else {
            return Ok(None);
        };
        let current = *smoothed.last().expect("non-empty");

        let mut forecast = TrendForecast {
            device_id: device_id.to_string(),
            tag_id: tag_id.to_string(),
            slope_per_hour: fit.slope,
            intercept: fit.intercept,
            r_squared: fit.r_squared,
            current_value: current,
            matched_rule_id: None,
            threshold: None,
            hours_to_threshold: None,
            alert_level: None,
            confidence: fit.r_squared,
        };

        if fit.slope.abs() < self.config.trend_significance_threshold {
            return Ok(Some(forecast));
        }

        if let Some(rule) = self.matching_rule(tag_id, current, fit.slope).await? {
            let hours_to = (rule.threshold - current) / fit.slope;
            if hours_to > 0.0 {
                let clipped = hours_to.min(MAX_FORECAST_HOURS.min(self.config.prediction_horizon_hours));
                let mut level = TrendAlertLevel::for_hours(clipped);
                if fit.r_squared < self.config.confidence_threshold {
                    level = level.map(TrendAlertLevel::demoted);
                }
                forecast.matched_rule_id = Some(rule.rule_id.clone());
                forecast.threshold = Some(rule.threshold);
                forecast.hours_to_threshold = Some(clipped);
                forecast.alert_level = level;
            }
        }
        Ok(Some(forecast))
    }

    /// Forecast every tag of a device that has recent history
    pub async fn forecast_device(
        &self,
        device_id: &str,
        now: TsMillis,
    ) -> Result<Vec<TrendForecast>> {
        let latest = self.telemetry.latest(Some(device_id), None).await?;
        let mut out = Vec::new();
        for point in latest {
            if let Some(forecast) = self.forecast(device_id, &point.tag_id, now).await? {
                out.push(forecast);
            }
        }
        Ok(out)
    }

    /// Highest-severity enabled rule whose tag pattern matches and whose
    /// threshold lies ahead of the current value in the slope's direction
    async fn matching_rule(
        &self,
        tag_id: &str,
        current: f64,
        slope: f64,
    ) -> Result<Option<AlarmRule>> {
        let mut rules = self.alarm_rules.list_enabled().await?;
        rules.sort_by_key(|r| std::cmp::Reverse(r.severity));
        for rule in rules {
            if !self.patterns.matches(&rule.tag_pattern, tag_id).unwrap_or(false) {
                continue;
            }
            let ahead = match rule.condition {
                AlarmCondition::Gt | AlarmCondition::Gte => {
                    slope > 0.0 && rule.threshold > current
                }
                AlarmCondition::Lt | AlarmCondition::Lte => {
                    slope < 0.0 && rule.threshold < current
                }
                _ => false,
            };
            if ahead {
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }
}
