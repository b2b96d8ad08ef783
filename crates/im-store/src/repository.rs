//! Repository traits consumed by the engine core

use async_trait::async_trait;
use im_common::alarm::{AlarmGroup, AlarmQuery, AlarmRecord, AlarmRule, AlarmStatus};
use im_common::correlation::CorrelationRule;
use im_common::cycle::{CycleBaseline, CycleBaselineKind, WorkCycle};
use im_common::health::{DeviceBaseline, HealthScore};
use im_common::motor::{
    BaselineProfile, MotorInstance, MotorModel, MotorParameter, MotorParameterMapping,
    OperationMode,
};
use im_common::{
    Device, DeviceId, Result, Tag, TagImportanceRule, TagSummary, TelemetryPoint, TsMillis,
};
use std::collections::HashMap;

/// Sort order for telemetry queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Filter for the general telemetry query. Narrowing a filter never returns
/// more rows.
#[derive(Debug, Clone, Default)]
pub struct TelemetryFilter {
    pub device_id: Option<DeviceId>,
    pub tag_id: Option<String>,
    pub start: Option<TsMillis>,
    pub end: Option<TsMillis>,
    pub limit: Option<usize>,
    pub sort: SortOrder,
}

/// Aggregation function over a time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Avg,
    Min,
    Max,
    Sum,
    Count,
    First,
    Last,
}

/// One non-empty aggregation bucket
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateBucket {
    pub bucket_start: TsMillis,
    pub value: f64,
}

/// Typed point access. Append is an upsert on the primary key
/// `(device_id, tag_id, ts, seq)`.
#[async_trait]
pub trait TelemetryRepository: Send + Sync {
    async fn append(&self, batch: Vec<TelemetryPoint>) -> Result<usize>;

    async fn query(&self, filter: &TelemetryFilter) -> Result<Vec<TelemetryPoint>>;

    async fn query_simple(
        &self,
        device_id: &str,
        tag_id: Option<&str>,
        start: TsMillis,
        end: TsMillis,
        limit: usize,
    ) -> Result<Vec<TelemetryPoint>>;

    /// Latest row per `(device, tag)`, optionally narrowed
    async fn latest(&self, device_id: Option<&str>, tag_id: Option<&str>)
        -> Result<Vec<TelemetryPoint>>;

    /// Buckets group by `floor(ts / bucket_ms) * bucket_ms`; empty buckets
    /// are omitted
    async fn aggregate(
        &self,
        device_id: &str,
        tag_id: &str,
        start: TsMillis,
        end: TsMillis,
        bucket_ms: i64,
        func: AggregateFunction,
    ) -> Result<Vec<AggregateBucket>>;

    async fn tags(&self) -> Result<Vec<TagSummary>>;
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Device>>;
    async fn get(&self, device_id: &str) -> Result<Device>;
    async fn upsert(&self, device: Device) -> Result<()>;
    /// Fails with `Validation` when tags still reference the device
    async fn delete(&self, device_id: &str) -> Result<()>;
}

#[async_trait]
pub trait TagRepository: Send + Sync {
    async fn list(&self, device_id: Option<&str>) -> Result<Vec<Tag>>;
    async fn get(&self, tag_id: &str) -> Result<Tag>;
    /// Fails with `Validation` when the referenced device does not exist
    async fn upsert(&self, tag: Tag) -> Result<()>;
    async fn delete(&self, tag_id: &str) -> Result<()>;
}

#[async_trait]
pub trait AlarmRepository: Send + Sync {
    async fn create(&self, alarm: AlarmRecord) -> Result<()>;
    async fn get(&self, alarm_id: &str) -> Result<AlarmRecord>;
    async fn update(&self, alarm: AlarmRecord) -> Result<()>;
    async fn list_open(&self, device_id: &str) -> Result<Vec<AlarmRecord>>;
    async fn list_by_group(&self, group_id: &str) -> Result<Vec<AlarmRecord>>;
    async fn open_count(&self, device_id: &str) -> Result<u64>;
    async fn open_count_by_devices(&self, device_ids: &[DeviceId]) -> Result<HashMap<DeviceId, u64>>;
    async fn query(&self, query: &AlarmQuery) -> Result<Vec<AlarmRecord>>;
    /// Forward-only: acking a closed alarm fails with `ConflictState`
    async fn ack(&self, alarm_id: &str, by: &str, note: Option<String>) -> Result<AlarmRecord>;
    async fn close(&self, alarm_id: &str) -> Result<AlarmRecord>;
}

#[async_trait]
pub trait AlarmRuleRepository: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<AlarmRule>>;
    async fn list(&self) -> Result<Vec<AlarmRule>>;
    async fn get(&self, rule_id: &str) -> Result<AlarmRule>;
    async fn upsert(&self, rule: AlarmRule) -> Result<()>;
    async fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<()>;
    async fn delete(&self, rule_id: &str) -> Result<()>;
}

#[async_trait]
pub trait AlarmGroupRepository: Send + Sync {
    async fn open_by_device_rule(&self, device_id: &str, rule_id: &str)
        -> Result<Option<AlarmGroup>>;
    async fn get(&self, group_id: &str) -> Result<AlarmGroup>;
    async fn upsert(&self, group: AlarmGroup) -> Result<()>;
    async fn query(
        &self,
        device_id: Option<&str>,
        status: Option<AlarmStatus>,
        limit: usize,
    ) -> Result<Vec<AlarmGroup>>;
}

#[async_trait]
pub trait HealthBaselineRepository: Send + Sync {
    async fn get(&self, device_id: &str) -> Result<Option<DeviceBaseline>>;
    async fn list(&self) -> Result<Vec<DeviceBaseline>>;
    async fn save(&self, baseline: DeviceBaseline) -> Result<()>;
    async fn delete(&self, device_id: &str) -> Result<()>;
}

#[async_trait]
pub trait HealthSnapshotRepository: Send + Sync {
    /// History is append-only with non-decreasing timestamps per device
    async fn append(&self, snapshot: HealthScore) -> Result<()>;
    async fn history(&self, device_id: &str, since: TsMillis) -> Result<Vec<HealthScore>>;
    async fn latest(&self, device_id: &str) -> Result<Option<HealthScore>>;
}

#[async_trait]
pub trait WorkCycleRepository: Send + Sync {
    async fn save(&self, cycles: Vec<WorkCycle>) -> Result<()>;
    async fn query(
        &self,
        device_id: &str,
        start: TsMillis,
        end: TsMillis,
        limit: usize,
    ) -> Result<Vec<WorkCycle>>;
}

#[async_trait]
pub trait CycleBaselineRepository: Send + Sync {
    async fn get(&self, device_id: &str, kind: CycleBaselineKind) -> Result<Option<CycleBaseline>>;
    async fn list(&self, device_id: &str) -> Result<Vec<CycleBaseline>>;
    async fn save(&self, baseline: CycleBaseline) -> Result<()>;
    async fn delete(&self, device_id: &str) -> Result<()>;
}

#[async_trait]
pub trait TagCorrelationRepository: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<CorrelationRule>>;
    async fn upsert(&self, rule: CorrelationRule) -> Result<()>;
    async fn delete(&self, rule_id: &str) -> Result<()>;
}

#[async_trait]
pub trait TagImportanceRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<TagImportanceRule>>;
    async fn upsert(&self, rule: TagImportanceRule) -> Result<()>;
    async fn delete(&self, pattern: &str) -> Result<()>;
}

#[async_trait]
pub trait MotorModelRepository: Send + Sync {
    async fn get(&self, model_id: &str) -> Result<MotorModel>;
    async fn list(&self) -> Result<Vec<MotorModel>>;
    async fn upsert(&self, model: MotorModel) -> Result<()>;
    async fn delete(&self, model_id: &str) -> Result<()>;
}

#[async_trait]
pub trait MotorInstanceRepository: Send + Sync {
    async fn get(&self, instance_id: &str) -> Result<MotorInstance>;
    async fn list(&self) -> Result<Vec<MotorInstance>>;
    async fn list_enabled(&self) -> Result<Vec<MotorInstance>>;
    async fn upsert(&self, instance: MotorInstance) -> Result<()>;
    async fn delete(&self, instance_id: &str) -> Result<()>;
}

#[async_trait]
pub trait MotorMappingRepository: Send + Sync {
    async fn list_for_instance(&self, instance_id: &str) -> Result<Vec<MotorParameterMapping>>;
    async fn upsert(&self, mapping: MotorParameterMapping) -> Result<()>;
    async fn delete(&self, instance_id: &str, parameter: MotorParameter) -> Result<()>;
}

#[async_trait]
pub trait OperationModeRepository: Send + Sync {
    async fn list_for_instance(&self, instance_id: &str) -> Result<Vec<OperationMode>>;
    async fn upsert(&self, mode: OperationMode) -> Result<()>;
    async fn delete(&self, mode_id: &str) -> Result<()>;
}

#[async_trait]
pub trait BaselineProfileRepository: Send + Sync {
    async fn get(
        &self,
        instance_id: &str,
        mode_id: &str,
        parameter: MotorParameter,
    ) -> Result<Option<BaselineProfile>>;
    async fn list(&self, instance_id: &str) -> Result<Vec<BaselineProfile>>;
    async fn save(&self, profile: BaselineProfile) -> Result<()>;
    async fn delete(&self, instance_id: &str) -> Result<()>;
}
