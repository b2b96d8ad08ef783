//! Motor spectrum analysis, baseline profiles and fault detection
//!
//! Current spectra come from a windowed FFT; per-(mode, parameter) baseline
//! profiles are learned in the background and compared against live mapped
//! values to produce ranked fault diagnoses.

pub mod baseline;
pub mod faults;
pub mod modes;
pub mod spectrum;

pub use baseline::{LearningTask, MotorBaselineLearner, TaskState, Welford};
pub use faults::FaultDetector;
pub use modes::{ModeDetector, RangeModeDetector};
pub use spectrum::{bearing_frequencies, BearingFrequencies, Spectrum, SpectrumFeatures};
