//! Forward-looking predictors: multi-scale composition, degradation
//! detection, trend forecasting and remaining useful life

mod degradation;
mod multiscale;
mod rul;
mod trend;

pub use degradation::{DegradationDetector, DegradationFinding, DegradationKind};
pub use multiscale::{MultiScalePredictor, MultiScaleResult, MultiScaleTrend};
pub use rul::{RiskBucket, RulPredictor, RulPrediction, RulStatus};
pub use trend::{TrendAlertLevel, TrendForecast, TrendPredictor};
