//! Cycle baseline learning
//!
//! Fits per-motor quadratic current-vs-angle curves, a motor-balance spread
//! and a cycle-duration spread, and persists them as versioned JSON models.

use crate::polyfit::fit_quadratic;
use chrono::Utc;
use im_common::config::CycleDetectionConfig;
use im_common::cycle::{
    CycleBaseline, CycleBaselineKind, PolyCurveModel, SpreadModel, CYCLE_MODEL_VERSION,
};
use im_common::stats;
use im_common::{Error, Result, TsMillis};
use im_store::{CycleBaselineRepository, TelemetryRepository, WorkCycleRepository};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Pairs only count toward a curve fit above these floors
const CURVE_MIN_ANGLE: f64 = 5.0;
const CURVE_MIN_CURRENT: f64 = 100.0;

/// Both currents must exceed this for a balance sample
const BALANCE_MIN_CURRENT: f64 = 500.0;

const MAX_SERIES_POINTS: usize = 100_000;

pub struct CycleBaselineLearner {
    telemetry: Arc<dyn TelemetryRepository>,
    cycles: Arc<dyn WorkCycleRepository>,
    baselines: Arc<dyn CycleBaselineRepository>,
    config: CycleDetectionConfig,
}

impl CycleBaselineLearner {
    pub fn new(
        telemetry: Arc<dyn TelemetryRepository>,
        cycles: Arc<dyn WorkCycleRepository>,
        baselines: Arc<dyn CycleBaselineRepository>,
        config: CycleDetectionConfig,
    ) -> Self {
        CycleBaselineLearner { telemetry, cycles, baselines, config }
    }

    /// Learn every cycle baseline available in the range. Individual
    /// learners failing on thin data is expected and only logged.
    pub async fn learn_all(
        &self,
        device_id: &str,
        start: TsMillis,
        end: TsMillis,
    ) -> Result<Vec<CycleBaseline>> {
        let mut learned = Vec::new();
        for kind in [CycleBaselineKind::Motor1Curve, CycleBaselineKind::Motor2Curve] {
            match self.learn_curve(device_id, kind, start, end).await {
                Ok(baseline) => learned.push(baseline),
                Err(Error::InsufficientData(reason)) => debug!("{kind:?}: {reason}"),
                Err(e) => return Err(e),
            }
        }
        match self.learn_balance(device_id, start, end).await {
            Ok(baseline) => learned.push(baseline),
            Err(Error::InsufficientData(reason)) => debug!("balance: {reason}"),
            Err(e) => return Err(e),
        }
        match self.learn_duration(device_id, start, end).await {
            Ok(baseline) => learned.push(baseline),
            Err(Error::InsufficientData(reason)) => debug!("duration: {reason}"),
            Err(e) => return Err(e),
        }
        info!("learned {} cycle baseline(s) for {device_id}", learned.len());
        Ok(learned)
    }

    /// Quadratic current-vs-angle fit for one motor
    pub async fn learn_curve(
        &self,
        device_id: &str,
        kind: CycleBaselineKind,
        start: TsMillis,
        end: TsMillis,
    ) -> Result<CycleBaseline> {
        let current_tag = match kind {
            CycleBaselineKind::Motor1Curve => &self.config.motor1_current_tag,
            CycleBaselineKind::Motor2Curve => &self.config.motor2_current_tag,
            _ => return Err(Error::Validation(format!("{kind:?} is not a curve baseline"))),
        };
        let angle = self.series(device_id, &self.config.angle_tag, start, end).await?;
        let current = self.series(device_id, current_tag, start, end).await?;

        let current_by_ts: HashMap<TsMillis, f64> = current.into_iter().collect();
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for (ts, a) in angle {
            if a <= CURVE_MIN_ANGLE {
                continue;
            }
            if let Some(&c) = current_by_ts.get(&ts) {
                if c > CURVE_MIN_CURRENT {
                    xs.push(a);
                    ys.push(c);
                }
            }
        }
        if xs.len() < self.config.curve_min_pairs {
            return Err(Error::InsufficientData(format!(
                "{} usable angle/current pairs, need {}",
                xs.len(),
                self.config.curve_min_pairs
            )));
        }

        let (coefficients, r_squared) = fit_quadratic(&xs, &ys)
            .ok_or_else(|| Error::InsufficientData("degenerate curve fit".into()))?;
        let model = PolyCurveModel { version: CYCLE_MODEL_VERSION, coefficients };
        let baseline = CycleBaseline {
            device_id: device_id.to_string(),
            kind,
            model: serde_json::to_value(&model)?,
            sample_count: xs.len(),
            r_squared,
            updated_utc: Utc::now(),
        };
        self.baselines.save(baseline.clone()).await?;
        Ok(baseline)
    }

    /// Spread of the per-sample motor-current ratio
    pub async fn learn_balance(
        &self,
        device_id: &str,
        start: TsMillis,
        end: TsMillis,
    ) -> Result<CycleBaseline> {
        let m1 = self.series(device_id, &self.config.motor1_current_tag, start, end).await?;
        let m2 = self.series(device_id, &self.config.motor2_current_tag, start, end).await?;
        let m2_by_ts: HashMap<TsMillis, f64> = m2.into_iter().collect();

        let mut ratios = Vec::new();
        for (ts, a) in m1 {
            if a <= BALANCE_MIN_CURRENT {
                continue;
            }
            if let Some(&b) = m2_by_ts.get(&ts) {
                if b > BALANCE_MIN_CURRENT {
                    ratios.push(a / b);
                }
            }
        }
        if ratios.len() < self.config.balance_min_pairs {
            return Err(Error::InsufficientData(format!(
                "{} balance pairs, need {}",
                ratios.len(),
                self.config.balance_min_pairs
            )));
        }
        self.save_spread(device_id, CycleBaselineKind::Balance, &ratios).await
    }

    /// Spread of detected cycle durations
    pub async fn learn_duration(
        &self,
        device_id: &str,
        start: TsMillis,
        end: TsMillis,
    ) -> Result<CycleBaseline> {
        let cycles = self.cycles.query(device_id, start, end, 10_000).await?;
        if cycles.len() < self.config.duration_min_cycles {
            return Err(Error::InsufficientData(format!(
                "{} cycles, need {}",
                cycles.len(),
                self.config.duration_min_cycles
            )));
        }
        let durations: Vec<f64> = cycles.iter().map(|c| c.duration_seconds).collect();
        self.save_spread(device_id, CycleBaselineKind::Duration, &durations).await
    }

    async fn save_spread(
        &self,
        device_id: &str,
        kind: CycleBaselineKind,
        values: &[f64],
    ) -> Result<CycleBaseline> {
        let model = SpreadModel {
            version: CYCLE_MODEL_VERSION,
            mean: stats::mean(values),
            std_dev: stats::std_dev(values),
        };
        let baseline = CycleBaseline {
            device_id: device_id.to_string(),
            kind,
            model: serde_json::to_value(&model)?,
            sample_count: values.len(),
            r_squared: 1.0,
            updated_utc: Utc::now(),
        };
        self.baselines.save(baseline.clone()).await?;
        Ok(baseline)
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
}
