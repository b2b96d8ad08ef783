//! Core telemetry and registry types shared across the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for devices
pub type DeviceId = String;

/// Unique identifier for tags
pub type TagId = String;

/// Unix-millisecond timestamp, the canonical telemetry time axis
pub type TsMillis = i64;

/// OPC-style quality code for a good sample
pub const QUALITY_GOOD: u16 = 192;

/// Collector protocol a point arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    OpcUa,
    Modbus,
}

/// Typed telemetry value. The enum representation guarantees that exactly
/// one slot is populated for any point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum TelemetryValue {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    DateTime(DateTime<Utc>),
    ByteArray(Vec<u8>),
}

/// Value discriminator, used on the wire and in tag metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
    DateTime,
    ByteArray,
}

impl TelemetryValue {
    /// Numeric coercion. Defined for numeric and bool variants, `None` for
    /// `String` and `ByteArray`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TelemetryValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            TelemetryValue::Int8(v) => Some(*v as f64),
            TelemetryValue::Int16(v) => Some(*v as f64),
            TelemetryValue::Int32(v) => Some(*v as f64),
            TelemetryValue::Int64(v) => Some(*v as f64),
            TelemetryValue::UInt8(v) => Some(*v as f64),
            TelemetryValue::UInt16(v) => Some(*v as f64),
            TelemetryValue::UInt32(v) => Some(*v as f64),
            TelemetryValue::UInt64(v) => Some(*v as f64),
            TelemetryValue::Float32(v) => Some(*v as f64),
            TelemetryValue::Float64(v) => Some(*v),
            TelemetryValue::DateTime(dt) => Some(dt.timestamp_millis() as f64),
            TelemetryValue::String(_) | TelemetryValue::ByteArray(_) => None,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            TelemetryValue::Bool(_) => ValueKind::Bool,
            TelemetryValue::Int8(_) => ValueKind::Int8,
            TelemetryValue::Int16(_) => ValueKind::Int16,
            TelemetryValue::Int32(_) => ValueKind::Int32,
            TelemetryValue::Int64(_) => ValueKind::Int64,
            TelemetryValue::UInt8(_) => ValueKind::UInt8,
            TelemetryValue::UInt16(_) => ValueKind::UInt16,
            TelemetryValue::UInt32(_) => ValueKind::UInt32,
            TelemetryValue::UInt64(_) => ValueKind::UInt64,
            TelemetryValue::Float32(_) => ValueKind::Float32,
            TelemetryValue::Float64(_) => ValueKind::Float64,
            TelemetryValue::String(_) => ValueKind::String,
            TelemetryValue::DateTime(_) => ValueKind::DateTime,
            TelemetryValue::ByteArray(_) => ValueKind::ByteArray,
        }
    }

    /// JSON-representable coercion for the push channel. Byte arrays are
    /// base64, timestamps RFC 3339.
    pub fn to_json(&self) -> serde_json::Value {
        use base64::Engine as _;
        match self {
            TelemetryValue::Bool(b) => serde_json::json!(b),
            TelemetryValue::Int8(v) => serde_json::json!(v),
            TelemetryValue::Int16(v) => serde_json::json!(v),
            TelemetryValue::Int32(v) => serde_json::json!(v),
            TelemetryValue::Int64(v) => serde_json::json!(v),
            TelemetryValue::UInt8(v) => serde_json::json!(v),
            TelemetryValue::UInt16(v) => serde_json::json!(v),
            TelemetryValue::UInt32(v) => serde_json::json!(v),
            TelemetryValue::UInt64(v) => serde_json::json!(v),
            TelemetryValue::Float32(v) => serde_json::json!(v),
            TelemetryValue::Float64(v) => serde_json::json!(v),
            TelemetryValue::String(s) => serde_json::json!(s),
            TelemetryValue::DateTime(dt) => serde_json::json!(dt.to_rfc3339()),
            TelemetryValue::ByteArray(bytes) => {
                serde_json::json!(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        }
    }
}

/// A single telemetry sample. Primary key `(device_id, tag_id, ts, seq)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub device_id: DeviceId,
    pub tag_id: TagId,
    pub ts: TsMillis,
    pub seq: u32,
    pub value: TelemetryValue,
    pub quality: u16,
    pub unit: Option<String>,
    pub protocol: Option<Protocol>,
}

impl TelemetryPoint {
    pub fn new(device_id: impl Into<String>, tag_id: impl Into<String>, ts: TsMillis, value: TelemetryValue) -> Self {
        TelemetryPoint {
            device_id: device_id.into(),
            tag_id: tag_id.into(),
            ts,
            seq: 0,
            value,
            quality: QUALITY_GOOD,
            unit: None,
            protocol: None,
        }
    }

    pub fn is_good(&self) -> bool {
        self.quality == QUALITY_GOOD
    }
}

/// Registered device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub name: Option<String>,
    pub protocol: Protocol,
    pub enabled: bool,
    pub location: Option<String>,
}

/// Registered tag. `device_id` must reference an existing device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub tag_id: TagId,
    pub device_id: DeviceId,
    pub data_type: ValueKind,
    pub enabled: bool,
    pub unit: Option<String>,
    pub address: Option<String>,
    pub scan_interval_ms: Option<u32>,
    pub tag_group: Option<String>,
}

/// Ordinal weight of a tag in weighted averaging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagImportance {
    Trivial,
    Minor,
    Major,
    Critical,
}

impl TagImportance {
    /// Rank used as an averaging weight: Critical=4 .. Trivial=1
    pub fn rank(&self) -> u32 {
        match self {
            TagImportance::Critical => 4,
            TagImportance::Major => 3,
            TagImportance::Minor => 2,
            TagImportance::Trivial => 1,
        }
    }
}

/// One entry of the tag importance mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagImportanceRule {
    pub pattern: String,
    pub importance: TagImportance,
    pub priority: i32,
    pub enabled: bool,
}

/// Distinct-tag summary returned by the telemetry store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagSummary {
    pub device_id: DeviceId,
    pub tag_id: TagId,
    pub point_count: u64,
    pub last_ts: TsMillis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercion_covers_all_numeric_variants() {
        assert_eq!(TelemetryValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(TelemetryValue::Int32(-7).as_f64(), Some(-7.0));
        assert_eq!(TelemetryValue::UInt64(42).as_f64(), Some(42.0));
        assert_eq!(TelemetryValue::Float32(1.5).as_f64(), Some(1.5));
        assert_eq!(TelemetryValue::String("x".into()).as_f64(), None);
        assert_eq!(TelemetryValue::ByteArray(vec![1]).as_f64(), None);
    }

    #[test]
    fn byte_arrays_serialize_to_base64() {
        let v = TelemetryValue::ByteArray(vec![0xDE, 0xAD]);
        assert_eq!(v.to_json(), serde_json::json!("3q0="));
    }

    #[test]
    fn importance_ranks_are_ordered() {
        assert!(TagImportance::Critical.rank() > TagImportance::Major.rank());
        assert!(TagImportance::Major.rank() > TagImportance::Minor.rank());
        assert!(TagImportance::Minor.rank() > TagImportance::Trivial.rank());
    }
}
