//! Multi-scale health composition
//!
//! Evaluates the health calculator at short, medium and long windows and
//! classifies the movement between them.

use crate::features::FeatureExtractor;
use crate::health::HealthCalculator;
use im_common::config::MultiScaleConfig;
use im_common::{Error, Result, TsMillis};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Movement classification across the three windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiScaleTrend {
    SharpDeterioration,
    SustainedDecline,
    SuddenAnomaly,
    Stable,
    TemporaryRecovery,
    GradualImprovement,
    RapidRecovery,
}

impl MultiScaleTrend {
    /// Signed direction in {-2..+2}
    pub fn direction(&self) -> i8 {
        match self {
            MultiScaleTrend::SharpDeterioration => -2,
            MultiScaleTrend::SustainedDecline | MultiScaleTrend::SuddenAnomaly => -1,
            MultiScaleTrend::Stable | MultiScaleTrend::TemporaryRecovery => 0,
            MultiScaleTrend::GradualImprovement => 1,
            MultiScaleTrend::RapidRecovery => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiScaleResult {
    pub device_id: String,
    pub timestamp: TsMillis,
    pub short_index: u32,
    pub medium_index: u32,
    pub long_index: u32,
    pub composite: u32,
    pub trend: MultiScaleTrend,
}

pub struct MultiScalePredictor {
    extractor: Arc<FeatureExtractor>,
    health: Arc<HealthCalculator>,
    config: MultiScaleConfig,
}

impl MultiScalePredictor {
    pub fn new(
        extractor: Arc<FeatureExtractor>,
        health: Arc<HealthCalculator>,
        config: MultiScaleConfig,
    ) -> Self {
        MultiScalePredictor { extractor, health, config }
    }

    pub async fn assess(&self, device_id: &str, now: TsMillis) -> Result<MultiScaleResult> {
        if !self.config.enabled {
            return Err(Error::InsufficientData("multi-scale assessment disabled".into()));
        }
        let short = self.window_index(device_id, self.config.short_term_minutes, now).await?;
        let medium = self.window_index(device_id, self.config.medium_term_minutes, now).await?;
        let long = self.window_index(device_id, self.config.long_term_minutes, now).await?;

        let composite = (f64::from(short) * self.config.short_term_weight
            + f64::from(medium) * self.config.medium_term_weight
            + f64::from(long) * self.config.long_term_weight)
            .round()
            .clamp(0.0, 100.0) as u32;

        Ok(MultiScaleResult {
            device_id: device_id.to_string(),
            timestamp: now,
            short_index: short,
            medium_index: medium,
            long_index: long,
            composite,
            trend: classify(short, medium, long),
        })
    }

    async fn window_index(&self, device_id: &str, minutes: u32, now: TsMillis) -> Result<u32> {
        let features = self
            .extractor
            .extract(device_id, minutes, now)
            .await?
            .ok_or_else(|| {
                Error::InsufficientData(format!("no telemetry for {device_id} in {minutes}m window"))
            })?;
        Ok(self.health.assess(&features).await?.index)
    }
}

/// Trend classification from `(short - long, medium - long)` with the
/// +/-5 and +/-15 bands.
fn classify(short: u32, medium: u32, long: u32) -> MultiScaleTrend {
    let d_short = f64::from(short) - f64::from(long);
    let d_medium = f64::from(medium) - f64::from(long);
    if d_short <= -15.0 {
        MultiScaleTrend::SharpDeterioration
    } else if d_short <= -5.0 {
        if d_medium <= -5.0 {
            MultiScaleTrend::SustainedDecline
        } else {
            MultiScaleTrend::SuddenAnomaly
        }
    } else if d_short >= 15.0 {
        MultiScaleTrend::RapidRecovery
    } else if d_short >= 5.0 {
        MultiScaleTrend::GradualImprovement
    } else if d_medium >= 5.0 {
        MultiScaleTrend::TemporaryRecovery
    } else {
        MultiScaleTrend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_the_bands() {
        assert_eq!(classify(60, 70, 80), MultiScaleTrend::SharpDeterioration);
        assert_eq!(classify(72, 70, 80), MultiScaleTrend::SustainedDecline);
        assert_eq!(classify(72, 80, 80), MultiScaleTrend::SuddenAnomaly);
        assert_eq!(classify(80, 80, 80), MultiScaleTrend::Stable);
        assert_eq!(classify(82, 88, 80), MultiScaleTrend::TemporaryRecovery);
        assert_eq!(classify(87, 82, 80), MultiScaleTrend::GradualImprovement);
        assert_eq!(classify(96, 90, 80), MultiScaleTrend::RapidRecovery);
    }

    #[test]
    fn directions_are_signed() {
        assert_eq!(MultiScaleTrend::SharpDeterioration.direction(), -2);
        assert_eq!(MultiScaleTrend::SuddenAnomaly.direction(), -1);
        assert_eq!(MultiScaleTrend::Stable.direction(), 0);
        assert_eq!(MultiScaleTrend::RapidRecovery.direction(), 2);
    }
}
