//! Common types and utilities for the IntelliMaint assessment engine
//!
//! This crate provides the shared data model, error taxonomy, configuration
//! tree and wildcard pattern dialect used across all engine components.

pub mod alarm;
pub mod config;
pub mod correlation;
pub mod cycle;
pub mod error;
pub mod health;
pub mod motor;
pub mod pattern;
pub mod stats;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use pattern::{PatternCache, WildcardPattern};
pub use types::*;
