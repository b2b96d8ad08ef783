//! Threshold alarm evaluation and group aggregation
//!
//! Rules fire only after their predicate holds for the configured dwell and
//! re-arm only after the value leaves the condition by the hysteresis
//! margin. Fired alarms attach to an open per-(device, rule) group.

pub mod evaluator;
pub mod groups;

pub use evaluator::AlarmEvaluator;
pub use groups::GroupAggregator;
