//! Feature extractor
//!
//! Turns a telemetry window into per-tag statistics. Tags with fewer than
//! two numeric samples are dropped; an empty window yields no feature set.

use im_common::health::{DeviceFeatures, TagFeatures};
use im_common::stats::{self, EPSILON};
use im_common::{Result, TsMillis};
use im_store::{DeviceRepository, TelemetryRepository};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-extraction cap on queried points, for performance
pub const MAX_WINDOW_POINTS: usize = 2000;

/// Relative slope above which a trend counts as rising/falling
const TREND_THRESHOLD: f64 = 0.001;

pub struct FeatureExtractor {
    telemetry: Arc<dyn TelemetryRepository>,
    devices: Arc<dyn DeviceRepository>,
}

impl FeatureExtractor {
    pub fn new(
        telemetry: Arc<dyn TelemetryRepository>,
        devices: Arc<dyn DeviceRepository>,
    ) -> Self {
        FeatureExtractor { telemetry, devices }
    }

    /// Extract features for one device over the trailing window ending at
    /// `now`. Returns `None` when the window holds no telemetry.
    pub async fn extract(
        &self,
        device_id: &str,
        window_minutes: u32,
        now: TsMillis,
    ) -> Result<Option<DeviceFeatures>> {
        let start = now - i64::from(window_minutes) * 60_000;
        let points = self
            .telemetry
            .query_simple(device_id, None, start, now + 1, MAX_WINDOW_POINTS)
            .await?;
        if points.is_empty() {
            return Ok(None);
        }

        let sample_count = points.len();
        let mut series: HashMap<String, Vec<f64>> = HashMap::new();
        for point in &points {
            if let Some(v) = point.value.as_f64() {
                series.entry(point.tag_id.clone()).or_default().push(v);
            }
        }

        let mut tags = HashMap::new();
        for (tag_id, values) in series {
            if let Some(features) = tag_features(&values) {
                tags.insert(tag_id, features);
            }
        }

        Ok(Some(DeviceFeatures {
            device_id: device_id.to_string(),
            timestamp: now,
            window_minutes,
            sample_count,
            tags,
        }))
    }

    /// Extract features for every enabled device, isolating per-device
    /// failures.
    pub async fn extract_all(
        &self,
        window_minutes: u32,
        now: TsMillis,
    ) -> Result<Vec<DeviceFeatures>> {
        let devices = self.devices.list().await?;
        let mut out = Vec::new();
        for device in devices.into_iter().filter(|d| d.enabled) {
            match self.extract(&device.device_id, window_minutes, now).await {
                Ok(Some(features)) => out.push(features),
                Ok(None) => debug!("no telemetry for device {} in window", device.device_id),
                Err(e) => warn!("feature extraction failed for {}: {e}", device.device_id),
            }
        }
        Ok(out)
    }
}

/// Statistics for one tag's window; `None` below two samples
fn tag_features(values: &[f64]) -> Option<TagFeatures> {
    if values.len() < 2 {
        return None;
    }
    let mean = stats::mean(values);
    let std_dev = stats::std_dev(values);
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let latest = *values.last().expect("non-empty");
    let slope = stats::linear_fit(values).map(|f| f.slope).unwrap_or(0.0);

    let cv = if mean.abs() < EPSILON { 0.0 } else { std_dev / mean.abs() };
    let relative_slope = if mean.abs() < EPSILON { slope } else { slope / mean.abs() };
    let trend_direction = if relative_slope > TREND_THRESHOLD {
        1
    } else if relative_slope < -TREND_THRESHOLD {
        -1
    } else {
        0
    };

    Some(TagFeatures {
        count: values.len(),
        mean,
        std_dev,
        min,
        max,
        latest,
        trend_slope: slope,
        trend_direction,
        coefficient_of_variation: cv,
        range: max - min,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use im_common::{Device, Protocol, TelemetryPoint, TelemetryValue};
    use im_store::memory::{MemoryRegistry, MemoryTelemetry};

    async fn setup(values: &[f64]) -> FeatureExtractor {
        let telemetry = Arc::new(MemoryTelemetry::new());
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .upsert(Device {
                device_id: "d1".into(),
                name: None,
                protocol: Protocol::OpcUa,
                enabled: true,
                location: None,
            })
            .await
            .unwrap();
        let batch: Vec<TelemetryPoint> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                TelemetryPoint::new("d1", "t1", i as i64 * 1000, TelemetryValue::Float64(v))
            })
            .collect();
        telemetry.append(batch).await.unwrap();
        FeatureExtractor::new(telemetry, registry)
    }

    #[tokio::test]
    async fn empty_window_yields_none() {
        let extractor = setup(&[]).await;
        let features = extractor.extract("d1", 30, 60_000).await.unwrap();
        assert!(features.is_none());
    }

    #[tokio::test]
    async fn single_sample_tags_are_dropped() {
        let extractor = setup(&[5.0]).await;
        let features = extractor.extract("d1", 30, 60_000).await.unwrap().unwrap();
        assert!(features.tags.is_empty());
        assert_eq!(features.sample_count, 1);
    }

    #[tokio::test]
    async fn strictly_increasing_series_trends_up() {
        let extractor = setup(&[10.0, 11.0, 12.0, 13.0, 14.0]).await;
        let features = extractor.extract("d1", 30, 60_000).await.unwrap().unwrap();
        let t1 = &features.tags["t1"];
        assert_eq!(t1.trend_direction, 1);
        assert!(t1.trend_slope > 0.0);
        assert_eq!(t1.latest, 14.0);
        assert_eq!(t1.range, 4.0);
    }

    #[tokio::test]
    async fn strictly_decreasing_series_trends_down() {
        let extractor = setup(&[14.0, 13.0, 12.0, 11.0, 10.0]).await;
        let features = extractor.extract("d1", 30, 60_000).await.unwrap().unwrap();
        assert_eq!(features.tags["t1"].trend_direction, -1);
    }

    #[tokio::test]
    async fn constant_series_is_flat_with_zero_cv() {
        let extractor = setup(&[7.0; 10]).await;
        let features = extractor.extract("d1", 30, 60_000).await.unwrap().unwrap();
        let t1 = &features.tags["t1"];
        assert_eq!(t1.trend_direction, 0);
        assert_eq!(t1.std_dev, 0.0);
        assert_eq!(t1.coefficient_of_variation, 0.0);
    }

    #[tokio::test]
    async fn zero_mean_series_has_zero_cv() {
        let extractor = setup(&[-1.0, 1.0, -1.0, 1.0]).await;
        let features = extractor.extract("d1", 30, 60_000).await.unwrap().unwrap();
        assert_eq!(features.tags["t1"].coefficient_of_variation, 0.0);
    }
}
