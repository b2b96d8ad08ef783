//! Health assessment, baselines and predictors
//!
//! Transforms windows of telemetry into per-device features, health scores,
//! correlation findings and forward-looking predictions. Components share
//! the telemetry and baseline repositories and agree on device/tag identity
//! and Unix-millisecond timestamps.

pub mod baseline;
pub mod correlation;
pub mod features;
pub mod health;
pub mod importance;
pub mod predict;

pub use baseline::BaselineService;
pub use correlation::CorrelationAnalyzer;
pub use features::FeatureExtractor;
pub use health::HealthCalculator;
pub use importance::TagImportanceService;
pub use predict::{
    DegradationDetector, MultiScalePredictor, RulPredictor, TrendPredictor,
};
