//! Work-cycle detection, features and anomaly scoring
//!
//! Segments an angle series into mechanical cycles, derives per-cycle motor
//! features, scores them against learned cycle baselines and persists both
//! cycles and baselines.

pub mod anomaly;
pub mod detector;
pub mod learner;
pub mod polyfit;

pub use anomaly::{score_cycle, AnomalyAssessment};
pub use detector::CycleDetector;
pub use learner::CycleBaselineLearner;
