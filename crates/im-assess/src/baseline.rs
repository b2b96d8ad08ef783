//! Baseline store access and dynamic updater
//!
//! Learns per-device per-tag normal statistics and periodically blends new
//! windows into them with anomaly filtering and age-weighted averaging.

use chrono::{DateTime, Utc};
use im_common::config::DynamicBaselineConfig;
use im_common::health::{DeviceBaseline, TagBaseline};
use im_common::stats::{self, EPSILON};
use im_common::{Error, Result, TsMillis};
use im_store::{DeviceRepository, HealthBaselineRepository, TelemetryRepository};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Samples a tag must contribute before it gets a learned baseline
pub const MIN_LEARN_SAMPLES: usize = 100;

/// Query cap when collecting a learning or update window
const MAX_BASELINE_POINTS: usize = 50_000;

pub struct BaselineService {
    telemetry: Arc<dyn TelemetryRepository>,
    devices: Arc<dyn DeviceRepository>,
    baselines: Arc<dyn HealthBaselineRepository>,
    config: DynamicBaselineConfig,
}

impl BaselineService {
    pub fn new(
        telemetry: Arc<dyn TelemetryRepository>,
        devices: Arc<dyn DeviceRepository>,
        baselines: Arc<dyn HealthBaselineRepository>,
        config: DynamicBaselineConfig,
    ) -> Self {
        BaselineService { telemetry, devices, baselines, config }
    }

    /// Explicit learning pass over the trailing `learning_hours` window.
    /// Requires at least [`MIN_LEARN_SAMPLES`] samples for at least one tag.
    pub async fn learn(
        &self,
        device_id: &str,
        learning_hours: f64,
        now: TsMillis,
    ) -> Result<DeviceBaseline> {
        let start = now - (learning_hours * 3_600_000.0) as i64;
        let series = self.collect_series(device_id, start, now).await?;

        let mut tags = HashMap::new();
        let mut sample_count = 0u64;
        for (tag_id, values) in &series {
            if values.len() < MIN_LEARN_SAMPLES {
                continue;
            }
            sample_count += values.len() as u64;
            tags.insert(tag_id.clone(), describe(values));
        }
        if tags.is_empty() {
            return Err(Error::InsufficientData(format!(
                "device {device_id}: no tag reached {MIN_LEARN_SAMPLES} samples in {learning_hours}h"
            )));
        }

        let stamp = to_datetime(now);
        let baseline = DeviceBaseline {
            device_id: device_id.to_string(),
            created_utc: stamp,
            updated_utc: stamp,
            sample_count,
            learning_hours,
            tags,
        };
        self.baselines.save(baseline.clone()).await?;
        info!("learned baseline for {device_id}: {} tag(s), {sample_count} samples", baseline.tags.len());
        Ok(baseline)
    }

    /// Dynamic update for one device. Returns `false` when the device was
    /// skipped (fresh baseline, missing baseline or too little data).
    pub async fn update_device(&self, device_id: &str, now: TsMillis) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }
        let Some(mut baseline) = self.baselines.get(device_id).await? else {
            // First dynamic update creates the baseline when enough data exists
            return match self.learn(device_id, self.config.update_interval_hours, now).await {
                Ok(_) => Ok(true),
                Err(Error::InsufficientData(reason)) => {
                    debug!("no initial baseline for {device_id}: {reason}");
                    Ok(false)
                }
                Err(e) => Err(e),
            };
        };

        let age_hours =
            (to_datetime(now) - baseline.updated_utc).num_seconds() as f64 / 3600.0;
        if age_hours < self.config.update_interval_hours {
            return Ok(false);
        }

        let window_start = now - (self.config.update_interval_hours * 3_600_000.0) as i64;
        let series = self.collect_series(device_id, window_start, now).await?;
        let window_total: usize = series.values().map(Vec::len).sum();
        if window_total < self.config.min_sample_count {
            debug!(
                "skipping baseline update for {device_id}: {window_total} < {} window samples",
                self.config.min_sample_count
            );
            return Ok(false);
        }

        let days_since_creation =
            (to_datetime(now) - baseline.created_utc).num_seconds() as f64 / 86_400.0;
        let aging = (1.0 - days_since_creation * self.config.aging_factor).max(0.5);
        let w_new = self.config.incremental_weight;
        let w_old = (1.0 - w_new) * aging;

        for (tag_id, values) in series {
            match baseline.tags.get_mut(&tag_id) {
                Some(existing) => {
                    let filtered = filter_outliers(&values, existing, self.config.anomaly_filter_threshold);
                    if filtered.len() < 2 {
                        continue;
                    }
                    blend(existing, &describe(&filtered), w_old, w_new);
                }
                None => {
                    // New tags are inserted directly from the window
                    if values.len() >= 2 {
                        baseline.tags.insert(tag_id, describe(&values));
                    }
                }
            }
        }
        // Tags unseen in this window keep their existing baseline untouched

        baseline.sample_count += window_total as u64;
        baseline.updated_utc = to_datetime(now);
        self.baselines.save(baseline).await?;
        Ok(true)
    }

    /// Dynamic update across every enabled device, isolating failures.
    /// Returns the number of devices actually updated.
    pub async fn update_all(&self, now: TsMillis) -> Result<usize> {
        let devices = self.devices.list().await?;
        let mut updated = 0;
        for device in devices.into_iter().filter(|d| d.enabled) {
            match self.update_device(&device.device_id, now).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => warn!("baseline update failed for {}: {e}", device.device_id),
            }
        }
        Ok(updated)
    }

    async fn collect_series(
        &self,
        device_id: &str,
        start: TsMillis,
        end: TsMillis,
    ) -> Result<HashMap<String, Vec<f64>>> {
        let points = self
            .telemetry
            .query_simple(device_id, None, start, end + 1, MAX_BASELINE_POINTS)
            .await?;
        let mut series: HashMap<String, Vec<f64>> = HashMap::new();
        for point in points {
            if let Some(v) = point.value.as_f64() {
                series.entry(point.tag_id).or_default().push(v);
            }
        }
        Ok(series)
    }
}

fn to_datetime(ts: TsMillis) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts).unwrap_or_else(Utc::now)
}

fn describe(values: &[f64]) -> TagBaseline {
    let mean = stats::mean(values);
    let std_dev = stats::std_dev(values);
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let cv = if mean.abs() < EPSILON { 0.0 } else { std_dev / mean.abs() };
    TagBaseline {
        normal_mean: mean,
        normal_std_dev: std_dev,
        normal_min: min,
        normal_max: max,
        normal_cv: cv,
    }
}

fn filter_outliers(values: &[f64], baseline: &TagBaseline, z_threshold: f64) -> Vec<f64> {
    if baseline.normal_std_dev < EPSILON {
        return values.to_vec();
    }
    values
        .iter()
        .copied()
        .filter(|v| ((v - baseline.normal_mean) / baseline.normal_std_dev).abs() <= z_threshold)
        .collect()
}

/// Age-weighted blend of the existing baseline with the new window.
/// Bounds only ever widen.
fn blend(existing: &mut TagBaseline, window: &TagBaseline, w_old: f64, w_new: f64) {
    let total = w_old + w_new;
    existing.normal_mean =
        (existing.normal_mean * w_old + window.normal_mean * w_new) / total;
    existing.normal_std_dev =
        (existing.normal_std_dev * w_old + window.normal_std_dev * w_new) / total;
    existing.normal_min = existing.normal_min.min(window.normal_min);
    existing.normal_max = existing.normal_max.max(window.normal_max);
    existing.normal_cv = if existing.normal_mean.abs() < EPSILON {
        0.0
    } else {
        existing.normal_std_dev / existing.normal_mean.abs()
    };
}
