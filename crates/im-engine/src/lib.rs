//! Assessment and diagnostics engine orchestrator
//!
//! Owns every service behind `Arc`, runs the periodic drivers and the
//! broadcast ticker, and exposes the ingest path used by edge collectors.

pub mod broadcast;
pub mod engine;
pub mod health;
pub mod scheduler;

pub use broadcast::Broadcaster;
pub use engine::{Engine, EngineStatus};
pub use health::{DriverHealthLevel, DriverHealthRegistry, DriverReport};
