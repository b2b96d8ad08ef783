//! Operation mode detection seam
//!
//! Mode detection is an external collaborator; the engine ships a simple
//! range-based detector and accepts any implementation of the trait.

use im_common::motor::{MotorParameter, OperationMode};
use std::collections::HashMap;

pub trait ModeDetector: Send + Sync {
    /// Pick the active mode from the latest mapped values, or `None` when
    /// no mode matches and no default exists
    fn detect(
        &self,
        modes: &[OperationMode],
        values: &HashMap<MotorParameter, f64>,
    ) -> Option<String>;
}

/// First enabled mode whose discriminator range contains the latest value;
/// the default mode otherwise.
#[derive(Debug, Default)]
pub struct RangeModeDetector;

impl ModeDetector for RangeModeDetector {
    fn detect(
        &self,
        modes: &[OperationMode],
        values: &HashMap<MotorParameter, f64>,
    ) -> Option<String> {
        for mode in modes {
            let Some(parameter) = mode.discriminator else {
                continue;
            };
            let Some(&value) = values.get(&parameter) else {
                continue;
            };
            let above = mode.min_value.is_none_or(|min| value >= min);
            let below = mode.max_value.is_none_or(|max| value <= max);
            if above && below {
                return Some(mode.mode_id.clone());
            }
        }
        modes.iter().find(|m| m.is_default).map(|m| m.mode_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(id: &str, min: Option<f64>, max: Option<f64>, is_default: bool) -> OperationMode {
        OperationMode {
            mode_id: id.to_string(),
            instance_id: "m1".into(),
            name: id.to_string(),
            discriminator: Some(MotorParameter::Speed),
            min_value: min,
            max_value: max,
            is_default,
        }
    }

    #[test]
    fn ranges_pick_the_matching_mode() {
        let modes = vec![
            mode("idle", None, Some(100.0), false),
            mode("run", Some(100.0), Some(2000.0), true),
        ];
        let detector = RangeModeDetector;

        let mut values = HashMap::new();
        values.insert(MotorParameter::Speed, 50.0);
        assert_eq!(detector.detect(&modes, &values).as_deref(), Some("idle"));

        values.insert(MotorParameter::Speed, 1500.0);
        assert_eq!(detector.detect(&modes, &values).as_deref(), Some("run"));
    }

    #[test]
    fn unmatched_values_fall_back_to_the_default_mode() {
        let modes = vec![
            mode("idle", None, Some(100.0), false),
            mode("run", Some(100.0), Some(2000.0), true),
        ];
        let detector = RangeModeDetector;
        let mut values = HashMap::new();
        values.insert(MotorParameter::Speed, 9000.0);
        assert_eq!(detector.detect(&modes, &values).as_deref(), Some("run"));
    }

    #[test]
    fn no_modes_means_no_detection() {
        let detector = RangeModeDetector;
        assert!(detector.detect(&[], &HashMap::new()).is_none());
    }
}
