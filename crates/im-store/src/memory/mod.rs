//! In-memory repository implementations
//!
//! Used by tests and by the default engine wiring when no persistent store
//! is attached.

mod alarms;
mod baselines;
mod cycles;
mod motor;
mod registry;
mod rules;
mod telemetry;

pub use alarms::{MemoryAlarmGroups, MemoryAlarmRules, MemoryAlarms};
pub use baselines::{MemoryHealthBaselines, MemoryHealthSnapshots};
pub use cycles::{MemoryCycleBaselines, MemoryWorkCycles};
pub use motor::MemoryMotorStore;
pub use registry::MemoryRegistry;
pub use rules::{MemoryCorrelationRules, MemoryImportanceRules};
pub use telemetry::MemoryTelemetry;

use crate::repository::*;
use std::sync::Arc;

/// Bundle of every repository the engine consumes
#[derive(Clone)]
pub struct Stores {
    pub telemetry: Arc<dyn TelemetryRepository>,
    pub devices: Arc<dyn DeviceRepository>,
    pub tags: Arc<dyn TagRepository>,
    pub alarms: Arc<dyn AlarmRepository>,
    pub alarm_rules: Arc<dyn AlarmRuleRepository>,
    pub alarm_groups: Arc<dyn AlarmGroupRepository>,
    pub health_baselines: Arc<dyn HealthBaselineRepository>,
    pub health_snapshots: Arc<dyn HealthSnapshotRepository>,
    pub work_cycles: Arc<dyn WorkCycleRepository>,
    pub cycle_baselines: Arc<dyn CycleBaselineRepository>,
    pub correlation_rules: Arc<dyn TagCorrelationRepository>,
    pub importance_rules: Arc<dyn TagImportanceRepository>,
    pub motor_models: Arc<dyn MotorModelRepository>,
    pub motor_instances: Arc<dyn MotorInstanceRepository>,
    pub motor_mappings: Arc<dyn MotorMappingRepository>,
    pub operation_modes: Arc<dyn OperationModeRepository>,
    pub baseline_profiles: Arc<dyn BaselineProfileRepository>,
}

impl Stores {
    /// Create a fully in-memory store set
    pub fn in_memory() -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let motor = Arc::new(MemoryMotorStore::new());
        Stores {
            telemetry: Arc::new(MemoryTelemetry::new()),
            devices: registry.clone(),
            tags: registry,
            alarms: Arc::new(MemoryAlarms::new()),
            alarm_rules: Arc::new(MemoryAlarmRules::new()),
            alarm_groups: Arc::new(MemoryAlarmGroups::new()),
            health_baselines: Arc::new(MemoryHealthBaselines::new()),
            health_snapshots: Arc::new(MemoryHealthSnapshots::new()),
            work_cycles: Arc::new(MemoryWorkCycles::new()),
            cycle_baselines: Arc::new(MemoryCycleBaselines::new()),
            correlation_rules: Arc::new(MemoryCorrelationRules::new()),
            importance_rules: Arc::new(MemoryImportanceRules::new()),
            motor_models: motor.clone(),
            motor_instances: motor.clone(),
            motor_mappings: motor.clone(),
            operation_modes: motor.clone(),
            baseline_profiles: motor,
        }
    }
}
