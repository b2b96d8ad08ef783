//! Repository contracts and in-memory stores for the IntelliMaint engine
//!
//! The engine addresses persistence exclusively through the traits in
//! [`repository`]. The [`memory`] module provides the in-process
//! implementations used by tests and the default wiring.

pub mod memory;
pub mod repository;

pub use memory::Stores;
pub use repository::*;
