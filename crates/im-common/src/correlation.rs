//! Correlation rules and the anomalies they emit

use serde::{Deserialize, Serialize};

/// How two tag series are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationRuleType {
    /// Both normalized slopes exceed the threshold with the same sign
    SameDirection,
    /// Both normalized slopes exceed the threshold with opposite signs
    OppositeDirection,
    /// Both latest-point z-scores exceed the threshold
    ThresholdCombination,
}

/// Rule-driven pairwise anomaly definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub id: String,
    pub name: String,
    pub device_pattern: String,
    pub tag1_pattern: String,
    pub tag2_pattern: String,
    pub rule_type: CorrelationRuleType,
    pub threshold: f64,
    pub penalty_score: f64,
    pub risk_description: String,
    pub enabled: bool,
}

/// An anomaly detected between a matched tag pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationAnomaly {
    pub rule_id: String,
    pub rule_name: String,
    pub tag1: String,
    pub tag2: String,
    /// Pearson correlation coefficient of the aligned series
    pub correlation: f64,
    pub risk_description: String,
    pub penalty_score: f64,
}
