//! Configuration management for the assessment engine

use crate::error::{Error, Result};
use crate::types::TagImportance;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub health: HealthConfig,
    pub importance: ImportanceConfig,
    pub dynamic_baseline: DynamicBaselineConfig,
    pub multi_scale: MultiScaleConfig,
    pub degradation: DegradationConfig,
    pub trend_prediction: TrendPredictionConfig,
    pub rul_prediction: RulPredictionConfig,
    pub fault_detection: FaultDetectionConfig,
    pub cycle_detection: CycleDetectionConfig,
    pub scheduler: SchedulerConfig,
    pub hub: HubConfig,
}

/// Composite weights for the four health sub-scores. Must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub deviation: f64,
    pub trend: f64,
    pub stability: f64,
    pub alarm: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            deviation: 0.40,
            trend: 0.30,
            stability: 0.20,
            alarm: 0.10,
        }
    }
}

/// Band edges for the health level
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelThresholds {
    pub healthy_min: f64,
    pub attention_min: f64,
    pub warning_min: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        LevelThresholds {
            healthy_min: 80.0,
            attention_min: 60.0,
            warning_min: 40.0,
        }
    }
}

/// Alarm sub-score settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmScoreConfig {
    pub critical_penalty: f64,
    pub error_penalty: f64,
    pub warning_penalty: f64,
    pub info_penalty: f64,
    pub consider_duration: bool,
    pub duration_factor_per_hour: f64,
    pub max_duration_multiplier: f64,
    pub min_score: f64,
}

impl Default for AlarmScoreConfig {
    fn default() -> Self {
        AlarmScoreConfig {
            critical_penalty: 30.0,
            error_penalty: 20.0,
            warning_penalty: 10.0,
            info_penalty: 5.0,
            consider_duration: true,
            duration_factor_per_hour: 0.1,
            max_duration_multiplier: 3.0,
            min_score: 0.0,
        }
    }
}

/// Health score calculation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub weights: ScoreWeights,
    pub level_thresholds: LevelThresholds,
    pub alarm_score: AlarmScoreConfig,
    /// Feature extraction window for the standard assessment
    pub window_minutes: u32,
    /// Floor applied when correlation penalties subtract from the index
    pub correlation_min_score: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            weights: ScoreWeights::default(),
            level_thresholds: LevelThresholds::default(),
            alarm_score: AlarmScoreConfig::default(),
            window_minutes: 30,
            correlation_min_score: 10.0,
        }
    }
}

/// Tag importance matcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceConfig {
    pub default_importance: TagImportance,
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        ImportanceConfig {
            default_importance: TagImportance::Minor,
        }
    }
}

/// Dynamic baseline updater settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicBaselineConfig {
    pub enabled: bool,
    pub update_interval_hours: f64,
    pub min_sample_count: usize,
    /// Z-score above which window samples are filtered out before blending
    pub anomaly_filter_threshold: f64,
    /// Weight of the new window in the blend
    pub incremental_weight: f64,
    /// Per-day reduction of the old weight, floored at 0.5
    pub aging_factor: f64,
}

impl Default for DynamicBaselineConfig {
    fn default() -> Self {
        DynamicBaselineConfig {
            enabled: true,
            update_interval_hours: 24.0,
            min_sample_count: 100,
            anomaly_filter_threshold: 3.0,
            incremental_weight: 0.2,
            aging_factor: 0.01,
        }
    }
}

/// Multi-scale assessment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiScaleConfig {
    pub enabled: bool,
    pub short_term_minutes: u32,
    pub medium_term_minutes: u32,
    pub long_term_minutes: u32,
    pub short_term_weight: f64,
    pub medium_term_weight: f64,
    pub long_term_weight: f64,
}

impl Default for MultiScaleConfig {
    fn default() -> Self {
        MultiScaleConfig {
            enabled: true,
            short_term_minutes: 30,
            medium_term_minutes: 240,
            long_term_minutes: 1440,
            short_term_weight: 0.5,
            medium_term_weight: 0.3,
            long_term_weight: 0.2,
        }
    }
}

/// Degradation detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    pub enabled: bool,
    pub detection_window_days: u32,
    pub noise_filter_window_hours: f64,
    /// Adjacent monotone segment transitions required to confirm
    pub confirmation_count: usize,
    /// Absolute percent-per-day rate worth reporting
    pub degradation_rate_threshold: f64,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        DegradationConfig {
            enabled: true,
            detection_window_days: 7,
            noise_filter_window_hours: 2.0,
            confirmation_count: 3,
            degradation_rate_threshold: 1.0,
        }
    }
}

/// Trend forecaster settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendPredictionConfig {
    pub enabled: bool,
    pub history_window_hours: u32,
    pub min_data_points: usize,
    pub smoothing_alpha: f64,
    pub prediction_horizon_hours: f64,
    pub trend_significance_threshold: f64,
    /// R-squared below which the alert level is demoted one band
    pub confidence_threshold: f64,
}

impl Default for TrendPredictionConfig {
    fn default() -> Self {
        TrendPredictionConfig {
            enabled: true,
            history_window_hours: 72,
            min_data_points: 20,
            smoothing_alpha: 0.3,
            prediction_horizon_hours: 720.0,
            trend_significance_threshold: 1e-6,
            confidence_threshold: 0.6,
        }
    }
}

/// Remaining-useful-life predictor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulPredictionConfig {
    pub enabled: bool,
    pub history_window_days: u32,
    pub min_data_points: usize,
    pub failure_threshold: f64,
    pub max_prediction_days: u32,
    pub model_type: RulModelType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RulModelType {
    Linear,
}

impl Default for RulPredictionConfig {
    fn default() -> Self {
        RulPredictionConfig {
            enabled: true,
            history_window_days: 30,
            min_data_points: 10,
            failure_threshold: 40.0,
            max_prediction_days: 90,
            model_type: RulModelType::Linear,
        }
    }
}

/// Motor fault detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultDetectionConfig {
    pub minor_threshold: f64,
    pub moderate_threshold: f64,
    pub severe_threshold: f64,
    pub critical_threshold: f64,
    /// Max three-phase deviation percentage before a PhaseImbalance fault
    pub phase_imbalance_threshold: f64,
    pub thd_threshold: f64,
    /// Bearing amplitudes must exceed `noise_floor * gain` to fault
    pub bearing_fault_gain_threshold: f64,
    pub min_confidence: f64,
    /// Samples required to learn a baseline profile
    pub min_samples: usize,
}

impl Default for FaultDetectionConfig {
    fn default() -> Self {
        FaultDetectionConfig {
            minor_threshold: 2.0,
            moderate_threshold: 3.0,
            severe_threshold: 4.0,
            critical_threshold: 5.0,
            phase_imbalance_threshold: 5.0,
            thd_threshold: 10.0,
            bearing_fault_gain_threshold: 5.0,
            min_confidence: 50.0,
            min_samples: 100,
        }
    }
}

/// Work-cycle detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleDetectionConfig {
    pub enabled: bool,
    pub angle_tag: String,
    pub motor1_current_tag: String,
    pub motor2_current_tag: String,
    /// Angle a sample must reach to open / drop below to close a cycle
    pub angle_threshold: f64,
    /// Peak angle a candidate must have exceeded to count as a cycle
    pub min_peak_angle: f64,
    /// Hard bounds outside which a candidate cycle is discarded
    pub min_cycle_seconds: f64,
    pub max_cycle_seconds: f64,
    /// Anomaly thresholds
    pub timeout_seconds: f64,
    pub short_seconds: f64,
    pub over_current_limit: f64,
    pub stall_angle: f64,
    pub anomaly_score_threshold: f64,
    /// Baseline learning minimums
    pub curve_min_pairs: usize,
    pub balance_min_pairs: usize,
    pub duration_min_cycles: usize,
}

impl Default for CycleDetectionConfig {
    fn default() -> Self {
        CycleDetectionConfig {
            enabled: true,
            angle_tag: "angle".to_string(),
            motor1_current_tag: "motor1_current".to_string(),
            motor2_current_tag: "motor2_current".to_string(),
            angle_threshold: 10.0,
            min_peak_angle: 30.0,
            min_cycle_seconds: 5.0,
            max_cycle_seconds: 600.0,
            timeout_seconds: 120.0,
            short_seconds: 30.0,
            over_current_limit: 12000.0,
            stall_angle: 100.0,
            anomaly_score_threshold: 30.0,
            curve_min_pairs: 30,
            balance_min_pairs: 30,
            duration_min_cycles: 5,
        }
    }
}

/// Periodic driver intervals and fan-out bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub assess_interval_secs: u64,
    pub baseline_update_interval_secs: u64,
    pub rule_refresh_interval_secs: u64,
    pub prediction_interval_secs: u64,
    pub motor_interval_secs: u64,
    pub cycle_interval_secs: u64,
    pub broadcast_tick_ms: u64,
    /// Bound on concurrent per-device work inside one tick
    pub max_parallel_devices: usize,
    pub repository_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            assess_interval_secs: 30,
            baseline_update_interval_secs: 3600,
            rule_refresh_interval_secs: 300,
            prediction_interval_secs: 300,
            motor_interval_secs: 1,
            cycle_interval_secs: 60,
            broadcast_tick_ms: 1000,
            max_parallel_devices: 4,
            repository_timeout_ms: 10_000,
        }
    }
}

/// Broadcast hub settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Per-subscriber outbound queue capacity; overflow drops the oldest
    pub subscriber_buffer: usize,
    /// Lag events retained per connection
    pub lag_history: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            subscriber_buffer: 256,
            lag_history: 32,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            health: HealthConfig::default(),
            importance: ImportanceConfig::default(),
            dynamic_baseline: DynamicBaselineConfig::default(),
            multi_scale: MultiScaleConfig::default(),
            degradation: DegradationConfig::default(),
            trend_prediction: TrendPredictionConfig::default(),
            rul_prediction: RulPredictionConfig::default(),
            fault_detection: FaultDetectionConfig::default(),
            cycle_detection: CycleDetectionConfig::default(),
            scheduler: SchedulerConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

impl Config {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Config> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Fatal(format!("cannot read config {}: {e}", path.as_ref().display())))?;
        let config: Config =
            toml::from_str(&raw).map_err(|e| Error::Fatal(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine must not start with
    pub fn validate(&self) -> Result<()> {
        let w = &self.health.weights;
        let sum = w.deviation + w.trend + w.stability + w.alarm;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(Error::Fatal(format!("health weights sum to {sum}, expected 1.0")));
        }
        let t = &self.health.level_thresholds;
        if !(t.healthy_min > t.attention_min && t.attention_min > t.warning_min && t.warning_min > 0.0) {
            return Err(Error::Fatal("level thresholds must be strictly descending".into()));
        }
        let ms = &self.multi_scale;
        let ms_sum = ms.short_term_weight + ms.medium_term_weight + ms.long_term_weight;
        if ms.enabled && (ms_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(Error::Fatal(format!("multi-scale weights sum to {ms_sum}, expected 1.0")));
        }
        if !(ms.short_term_minutes < ms.medium_term_minutes && ms.medium_term_minutes < ms.long_term_minutes) {
            return Err(Error::Fatal("multi-scale windows must be strictly increasing".into()));
        }
        let alpha = self.trend_prediction.smoothing_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(Error::Fatal(format!("smoothing alpha {alpha} outside (0, 1]")));
        }
        if !(0.0..=100.0).contains(&self.rul_prediction.failure_threshold) {
            return Err(Error::Fatal("RUL failure threshold outside [0, 100]".into()));
        }
        let cy = &self.cycle_detection;
        if cy.min_cycle_seconds >= cy.max_cycle_seconds {
            return Err(Error::Fatal("cycle duration bounds are inverted".into()));
        }
        let fd = &self.fault_detection;
        if !(fd.minor_threshold < fd.moderate_threshold
            && fd.moderate_threshold < fd.severe_threshold
            && fd.severe_threshold < fd.critical_threshold)
        {
            return Err(Error::Fatal("fault severity thresholds must be strictly increasing".into()));
        }
        if self.scheduler.max_parallel_devices == 0 {
            return Err(Error::Fatal("max_parallel_devices must be positive".into()));
        }
        if self.hub.subscriber_buffer == 0 {
            return Err(Error::Fatal("subscriber buffer must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn unbalanced_weights_are_fatal() {
        let mut config = Config::default();
        config.health.weights.deviation = 0.9;
        let err = config.validate().unwrap_err();
        assert_eq!(err.category(), "fatal");
    }

    #[test]
    fn inverted_cycle_bounds_are_fatal() {
        let mut config = Config::default();
        config.cycle_detection.min_cycle_seconds = 700.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_files_load_and_validate() {
        use std::io::Write as _;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [rul_prediction]
            failure_threshold = 35.0

            [scheduler]
            assess_interval_secs = 10
            "#
        )
        .unwrap();
        let config = Config::from_toml_file(file.path()).unwrap();
        assert_eq!(config.rul_prediction.failure_threshold, 35.0);
        assert_eq!(config.scheduler.assess_interval_secs, 10);

        let err = Config::from_toml_file("/nonexistent/engine.toml").unwrap_err();
        assert_eq!(err.category(), "fatal");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [health]
            window_minutes = 15
            "#,
        )
        .unwrap();
        assert_eq!(config.health.window_minutes, 15);
        assert_eq!(config.scheduler.assess_interval_secs, 30);
        config.validate().unwrap();
    }
}
