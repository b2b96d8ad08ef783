//! Slow degradation detector
//!
//! Smooths each tag series over the detection window, splits it into up to
//! five segments and looks for confirmed monotone drift or growing variance.

use im_common::config::DegradationConfig;
use im_common::stats::{self, EPSILON};
use im_common::{Result, TsMillis};
use im_store::TelemetryRepository;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const MAX_SEGMENTS: usize = 5;
const MIN_SEGMENT_LEN: usize = 2;
const SEGMENT_MOVE_PERCENT: f64 = 1.0;
const VARIANCE_GROWTH_FACTOR: f64 = 1.2;
const MAX_WINDOW_POINTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegradationKind {
    GradualIncrease,
    GradualDecrease,
    IncreasingVariance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationFinding {
    pub device_id: String,
    pub tag_id: String,
    pub kind: DegradationKind,
    /// Percent per day; present for gradual drift above the configured rate
    pub daily_rate_percent: Option<f64>,
    pub segment_count: usize,
}

pub struct DegradationDetector {
    telemetry: Arc<dyn TelemetryRepository>,
    config: DegradationConfig,
}

impl DegradationDetector {
    pub fn new(telemetry: Arc<dyn TelemetryRepository>, config: DegradationConfig) -> Self {
        DegradationDetector { telemetry, config }
    }

    pub async fn detect(&self, device_id: &str, now: TsMillis) -> Result<Vec<DegradationFinding>> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }
        let window_ms = i64::from(self.config.detection_window_days) * 86_400_000;
        let points = self
            .telemetry
            .query_simple(device_id, None, now - window_ms, now + 1, MAX_WINDOW_POINTS)
            .await?;

        let mut series: HashMap<String, Vec<(TsMillis, f64)>> = HashMap::new();
        for point in points {
            if let Some(v) = point.value.as_f64() {
                series.entry(point.tag_id).or_default().push((point.ts, v));
            }
        }

        let mut findings = Vec::new();
        for (tag_id, samples) in series {
            if let Some(finding) = self.analyze_tag(device_id, &tag_id, &samples) {
                findings.push(finding);
            } else {
                debug!("no degradation signal on {device_id}/{tag_id}");
            }
        }
        Ok(findings)
    }

    fn analyze_tag(
        &self,
        device_id: &str,
        tag_id: &str,
        samples: &[(TsMillis, f64)],
    ) -> Option<DegradationFinding> {
        if samples.len() < MAX_SEGMENTS * MIN_SEGMENT_LEN {
            return None;
        }
        let values: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
        let smoothed = moving_average(&values, self.smoothing_span(samples));

        let segment_count = MAX_SEGMENTS.min(smoothed.len() / MIN_SEGMENT_LEN);
        if segment_count < 2 {
            return None;
        }
        let segments = segment_stats(&smoothed, segment_count);

        let span_days = (samples.last()?.0 - samples.first()?.0) as f64 / 86_400_000.0;
        let kind = classify(&segments, self.config.confirmation_count)?;

        let daily_rate_percent = match kind {
            DegradationKind::IncreasingVariance => None,
            _ => {
                let first = segments.first()?.mean;
                let last = segments.last()?.mean;
                if first.abs() < EPSILON || span_days < EPSILON {
                    None
                } else {
                    let rate = (last - first) / first.abs() * 100.0 / span_days;
                    (rate.abs() >= self.config.degradation_rate_threshold).then_some(rate)
                }
            }
        };

        Some(DegradationFinding {
            device_id: device_id.to_string(),
            tag_id: tag_id.to_string(),
            kind,
            daily_rate_percent,
            segment_count,
        })
    }

    /// Samples covered by the noise filter window, estimated from the
    /// observed sampling cadence
    fn smoothing_span(&self, samples: &[(TsMillis, f64)]) -> usize {
        let span = (samples.last().map(|s| s.0).unwrap_or(0)
            - samples.first().map(|s| s.0).unwrap_or(0)) as f64;
        if span < EPSILON {
            return 1;
        }
        let interval = span / samples.len() as f64;
        let target = self.config.noise_filter_window_hours * 3_600_000.0;
        ((target / interval) as usize).clamp(1, samples.len() / 2)
    }
}

struct SegmentStat {
    mean: f64,
    std_dev: f64,
}

fn moving_average(values: &[f64], span: usize) -> Vec<f64> {
    if span <= 1 {
        return values.to_vec();
    }
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let start = i.saturating_sub(span - 1);
        let window = &values[start..=i];
        out.push(stats::mean(window));
    }
    out
}

fn segment_stats(values: &[f64], segments: usize) -> Vec<SegmentStat> {
    let len = values.len() / segments;
    (0..segments)
        .map(|i| {
            let start = i * len;
            let end = if i == segments - 1 { values.len() } else { start + len };
            let slice = &values[start..end];
            SegmentStat { mean: stats::mean(slice), std_dev: stats::std_dev(slice) }
        })
        .collect()
}

fn classify(segments: &[SegmentStat], confirmation_count: usize) -> Option<DegradationKind> {
    let mut rising = 0usize;
    let mut falling = 0usize;
    let mut max_rising = 0usize;
    let mut max_falling = 0usize;
    let mut variance_growth = 0usize;

    for pair in segments.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let move_pct = if a.mean.abs() < EPSILON {
            0.0
        } else {
            (b.mean - a.mean) / a.mean.abs() * 100.0
        };
        if move_pct > SEGMENT_MOVE_PERCENT {
            rising += 1;
            falling = 0;
        } else if move_pct < -SEGMENT_MOVE_PERCENT {
            falling += 1;
            rising = 0;
        } else {
            rising = 0;
            falling = 0;
        }
        max_rising = max_rising.max(rising);
        max_falling = max_falling.max(falling);

        if a.std_dev > EPSILON && b.std_dev > a.std_dev * VARIANCE_GROWTH_FACTOR {
            variance_growth += 1;
        }
    }

    if max_rising >= confirmation_count {
        Some(DegradationKind::GradualIncrease)
    } else if max_falling >= confirmation_count {
        Some(DegradationKind::GradualDecrease)
    } else if variance_growth >= confirmation_count.saturating_sub(1).max(1) {
        Some(DegradationKind::IncreasingVariance)
    } else {
        None
    }
}
