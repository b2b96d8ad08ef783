//! Remaining-useful-life predictor
//!
//! Regresses the device health index over its snapshot history and
//! extrapolates the hours until the failure threshold is crossed.

use im_common::config::RulPredictionConfig;
use im_common::stats;
use im_common::{Result, TsMillis};
use im_store::HealthSnapshotRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Slope flatter than this counts as stable
const STABLE_SLOPE: f64 = -0.001;

/// Projected failures closer than this report `NearFailure`
const NEAR_FAILURE_DAYS: f64 = 2.0;

const MAINTENANCE_LEAD_MS: i64 = 7 * 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RulStatus {
    NearFailure,
    AcceleratedDegradation,
    NormalDegradation,
    Healthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskBucket {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulPrediction {
    pub device_id: String,
    pub timestamp: TsMillis,
    pub current_index: u32,
    /// Index points per hour
    pub slope_per_hour: f64,
    pub status: RulStatus,
    pub risk: RiskBucket,
    pub remaining_hours: Option<f64>,
    pub predicted_failure_ts: Option<TsMillis>,
    pub recommended_maintenance_ts: Option<TsMillis>,
    pub confidence: f64,
}

pub struct RulPredictor {
    snapshots: Arc<dyn HealthSnapshotRepository>,
    config: RulPredictionConfig,
}

impl RulPredictor {
    pub fn new(snapshots: Arc<dyn HealthSnapshotRepository>, config: RulPredictionConfig) -> Self {
        RulPredictor { snapshots, config }
    }

    /// Predict RUL for one device; `None` when history is too thin
    pub async fn predict(&self, device_id: &str, now: TsMillis) -> Result<Option<RulPrediction>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let since = now - i64::from(self.config.history_window_days) * 86_400_000;
        let history = self.snapshots.history(device_id, since).await?;
        if history.len() < self.config.min_data_points {
            debug!(
                "RUL skipped for {device_id}: {} < {} snapshots",
                history.len(),
                self.config.min_data_points
            );
            return Ok(None);
        }

        let t0 = history[0].timestamp;
        let hours: Vec<f64> =
            history.iter().map(|s| (s.timestamp - t0) as f64 / 3_600_000.0).collect();
        let indices: Vec<f64> = history.iter().map(|s| f64::from(s.index)).collect();
        let Some(fit) = stats::linear_fit_xy(&hours, &indices) else {
            return Ok(None);
        };
        let current = history.last().expect("non-empty").index;

        let threshold = self.config.failure_threshold;
        let prediction = if f64::from(current) <= threshold {
            RulPrediction {
                device_id: device_id.to_string(),
                timestamp: now,
                current_index: current,
                slope_per_hour: fit.slope,
                status: RulStatus::NearFailure,
                risk: RiskBucket::Critical,
                remaining_hours: Some(0.0),
                predicted_failure_ts: Some(now),
                recommended_maintenance_ts: Some(now),
                confidence: fit.r_squared,
            }
        } else if fit.slope >= STABLE_SLOPE {
            RulPrediction {
                device_id: device_id.to_string(),
                timestamp: now,
                current_index: current,
                slope_per_hour: fit.slope,
                status: RulStatus::Healthy,
                risk: RiskBucket::Low,
                remaining_hours: None,
                predicted_failure_ts: None,
                recommended_maintenance_ts: None,
                confidence: fit.r_squared,
            }
        } else {
            let max_hours = f64::from(self.config.max_prediction_days) * 24.0;
            let hours_to_fail =
                ((threshold - f64::from(current)) / fit.slope).min(max_hours);
            let days_to_fail = hours_to_fail / 24.0;
            let daily_slope = fit.slope * 24.0;

            let status = if days_to_fail < NEAR_FAILURE_DAYS {
                RulStatus::NearFailure
            } else if daily_slope < -2.0 {
                RulStatus::AcceleratedDegradation
            } else if daily_slope < -0.5 {
                RulStatus::NormalDegradation
            } else {
                RulStatus::Healthy
            };
            let risk = if days_to_fail < 1.0 {
                RiskBucket::Critical
            } else if days_to_fail < 7.0 {
                RiskBucket::High
            } else if days_to_fail < 30.0 {
                RiskBucket::Medium
            } else {
                RiskBucket::Low
            };
            let failure_ts = now + (hours_to_fail * 3_600_000.0) as i64;
            RulPrediction {
                device_id: device_id.to_string(),
                timestamp: now,
                current_index: current,
                slope_per_hour: fit.slope,
                status,
                risk,
                remaining_hours: Some(hours_to_fail),
                predicted_failure_ts: Some(failure_ts),
                recommended_maintenance_ts: Some(failure_ts - MAINTENANCE_LEAD_MS),
                confidence: fit.r_squared,
            }
        };
        Ok(Some(prediction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use im_common::health::{HealthLevel, HealthScore};
    use im_store::memory::MemoryHealthSnapshots;

    const HOUR_MS: i64 = 3_600_000;
    const DAY_MS: i64 = 86_400_000;

    fn snapshot(ts: TsMillis, index: u32) -> HealthScore {
        HealthScore {
            device_id: "d1".into(),
            timestamp: ts,
            index,
            level: HealthLevel::Attention,
            deviation_score: 70.0,
            trend_score: 70.0,
            stability_score: 70.0,
            alarm_score: 100.0,
            has_baseline: true,
            problem_tags: Vec::new(),
            diagnostic_message: None,
        }
    }

    async fn predictor_with(
        history: Vec<HealthScore>,
        config: RulPredictionConfig,
    ) -> RulPredictor {
        let snapshots = Arc::new(MemoryHealthSnapshots::new());
        for s in history {
            snapshots.append(s).await.unwrap();
        }
        RulPredictor::new(snapshots, config)
    }

    #[tokio::test]
    async fn linear_decline_projects_hours_to_failure() {
        // Index falls linearly from 70 to 45 over 7 days
        let now = 7 * DAY_MS;
        let history: Vec<HealthScore> = (0..=168)
            .map(|h| {
                let index = 70.0 - 25.0 * h as f64 / 168.0;
                snapshot(h * HOUR_MS, index.round() as u32)
            })
            .collect();
        let config = RulPredictionConfig {
            failure_threshold: 40.0,
            min_data_points: 10,
            history_window_days: 30,
            ..RulPredictionConfig::default()
        };
        let predictor = predictor_with(history, config).await;

        let p = predictor.predict("d1", now).await.unwrap().unwrap();
        assert_relative_eq!(p.slope_per_hour, -25.0 / 168.0, epsilon = 1e-2);
        let remaining = p.remaining_hours.unwrap();
        assert_relative_eq!(remaining, 33.6, epsilon = 1.5);
        // 1.4 days out: near failure, high risk
        assert_eq!(p.status, RulStatus::NearFailure);
        assert_eq!(p.risk, RiskBucket::High);
        let recommended = p.recommended_maintenance_ts.unwrap();
        assert_eq!(recommended, p.predicted_failure_ts.unwrap() - 7 * DAY_MS);
    }

    #[tokio::test]
    async fn below_threshold_is_immediate_failure() {
        let history: Vec<HealthScore> =
            (0..20).map(|h| snapshot(h * HOUR_MS, 35)).collect();
        let config = RulPredictionConfig {
            failure_threshold: 40.0,
            min_data_points: 10,
            ..RulPredictionConfig::default()
        };
        let predictor = predictor_with(history, config).await;
        let p = predictor.predict("d1", 20 * HOUR_MS).await.unwrap().unwrap();
        assert_eq!(p.status, RulStatus::NearFailure);
        assert_eq!(p.risk, RiskBucket::Critical);
        assert_eq!(p.remaining_hours, Some(0.0));
    }

    #[tokio::test]
    async fn flat_history_is_healthy_with_no_eta() {
        let history: Vec<HealthScore> =
            (0..20).map(|h| snapshot(h * HOUR_MS, 85)).collect();
        let predictor = predictor_with(
            history,
            RulPredictionConfig { min_data_points: 10, ..RulPredictionConfig::default() },
        )
        .await;
        let p = predictor.predict("d1", 20 * HOUR_MS).await.unwrap().unwrap();
        assert_eq!(p.status, RulStatus::Healthy);
        assert!(p.remaining_hours.is_none());
        assert!(p.predicted_failure_ts.is_none());
    }

    #[tokio::test]
    async fn slow_decline_far_from_threshold_is_normal_degradation() {
        // 2 index points per day from 95 over 20 days
        let history: Vec<HealthScore> = (0..=480)
            .map(|h| snapshot(h * HOUR_MS, (95.0 - h as f64 / 12.0).round() as u32))
            .collect();
        let config = RulPredictionConfig {
            failure_threshold: 40.0,
            min_data_points: 10,
            history_window_days: 30,
            max_prediction_days: 90,
            ..RulPredictionConfig::default()
        };
        let predictor = predictor_with(history, config).await;
        let p = predictor.predict("d1", 480 * HOUR_MS).await.unwrap().unwrap();
        assert_eq!(p.status, RulStatus::NormalDegradation);
        assert_eq!(p.risk, RiskBucket::Medium);
    }

    #[tokio::test]
    async fn thin_history_yields_none() {
        let predictor = predictor_with(
            vec![snapshot(0, 80)],
            RulPredictionConfig { min_data_points: 10, ..RulPredictionConfig::default() },
        )
        .await;
        assert!(predictor.predict("d1", DAY_MS).await.unwrap().is_none());
    }
}
