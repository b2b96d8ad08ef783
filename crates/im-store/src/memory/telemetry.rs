//! In-memory telemetry store

use crate::repository::{
    AggregateBucket, AggregateFunction, SortOrder, TelemetryFilter, TelemetryRepository,
};
use async_trait::async_trait;
use im_common::{Error, Result, TagSummary, TelemetryPoint, TsMillis};
use parking_lot::RwLock;
use std::collections::BTreeMap;

type PointKey = (String, String, TsMillis, u32);

/// Point store keyed by the primary key, so append is naturally an upsert
/// and range scans come out time-ordered per tag.
#[derive(Default)]
pub struct MemoryTelemetry {
    points: RwLock<BTreeMap<PointKey, TelemetryPoint>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        MemoryTelemetry::default()
    }

    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }
}

fn key_of(p: &TelemetryPoint) -> PointKey {
    (p.device_id.clone(), p.tag_id.clone(), p.ts, p.seq)
}

#[async_trait]
impl TelemetryRepository for MemoryTelemetry {
    async fn append(&self, batch: Vec<TelemetryPoint>) -> Result<usize> {
        let mut points = self.points.write();
        let count = batch.len();
        for point in batch {
            points.insert(key_of(&point), point);
        }
        Ok(count)
    }

    async fn query(&self, filter: &TelemetryFilter) -> Result<Vec<TelemetryPoint>> {
        let points = self.points.read();
        let mut rows: Vec<TelemetryPoint> = points
            .values()
            .filter(|p| {
                filter.device_id.as_deref().is_none_or(|d| p.device_id == d)
                    && filter.tag_id.as_deref().is_none_or(|t| p.tag_id == t)
                    && filter.start.is_none_or(|s| p.ts >= s)
                    && filter.end.is_none_or(|e| p.ts < e)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|p| (p.ts, p.seq));
        if filter.sort == SortOrder::Descending {
            rows.reverse();
        }
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn query_simple(
        &self,
        device_id: &str,
        tag_id: Option<&str>,
        start: TsMillis,
        end: TsMillis,
        limit: usize,
    ) -> Result<Vec<TelemetryPoint>> {
        self.query(&TelemetryFilter {
            device_id: Some(device_id.to_string()),
            tag_id: tag_id.map(str::to_string),
            start: Some(start),
            end: Some(end),
            limit: Some(limit),
            sort: SortOrder::Ascending,
        })
        .await
    }

    async fn latest(
        &self,
        device_id: Option<&str>,
        tag_id: Option<&str>,
    ) -> Result<Vec<TelemetryPoint>> {
        let points = self.points.read();
        let mut latest: BTreeMap<(String, String), TelemetryPoint> = BTreeMap::new();
        for p in points.values() {
            if device_id.is_some_and(|d| p.device_id != d) || tag_id.is_some_and(|t| p.tag_id != t)
            {
                continue;
            }
            let key = (p.device_id.clone(), p.tag_id.clone());
            match latest.get(&key) {
                Some(existing) if (existing.ts, existing.seq) >= (p.ts, p.seq) => {}
                _ => {
                    latest.insert(key, p.clone());
                }
            }
        }
        Ok(latest.into_values().collect())
    }

    async fn aggregate(
        &self,
        device_id: &str,
        tag_id: &str,
        start: TsMillis,
        end: TsMillis,
        bucket_ms: i64,
        func: AggregateFunction,
    ) -> Result<Vec<AggregateBucket>> {
        if bucket_ms <= 0 {
            return Err(Error::Validation(format!("bucket_ms must be positive, got {bucket_ms}")));
        }
        if start > end {
            return Err(Error::Validation("aggregate range is unsorted".into()));
        }
        let points = self.points.read();
        let mut buckets: BTreeMap<TsMillis, Vec<&TelemetryPoint>> = BTreeMap::new();
        for p in points.values() {
            if p.device_id != device_id || p.tag_id != tag_id || p.ts < start || p.ts >= end {
                continue;
            }
            let bucket = (p.ts / bucket_ms) * bucket_ms;
            buckets.entry(bucket).or_default().push(p);
        }

        let mut out = Vec::with_capacity(buckets.len());
        for (bucket_start, rows) in buckets {
            let numeric: Vec<f64> = rows.iter().filter_map(|p| p.value.as_f64()).collect();
            let value = match func {
                AggregateFunction::Count => Some(rows.len() as f64),
                AggregateFunction::Sum => Some(numeric.iter().sum()),
                AggregateFunction::Avg if !numeric.is_empty() => {
                    Some(numeric.iter().sum::<f64>() / numeric.len() as f64)
                }
                AggregateFunction::Min => numeric.iter().cloned().reduce(f64::min),
                AggregateFunction::Max => numeric.iter().cloned().reduce(f64::max),
                AggregateFunction::First => numeric.first().copied(),
                AggregateFunction::Last => numeric.last().copied(),
                _ => None,
            };
            if let Some(value) = value {
                out.push(AggregateBucket { bucket_start, value });
            }
        }
        Ok(out)
    }

    async fn tags(&self) -> Result<Vec<TagSummary>> {
        let points = self.points.read();
        let mut summaries: BTreeMap<(String, String), TagSummary> = BTreeMap::new();
        for p in points.values() {
            let key = (p.device_id.clone(), p.tag_id.clone());
            let entry = summaries.entry(key).or_insert_with(|| TagSummary {
                device_id: p.device_id.clone(),
                tag_id: p.tag_id.clone(),
                point_count: 0,
                last_ts: p.ts,
            });
            entry.point_count += 1;
            entry.last_ts = entry.last_ts.max(p.ts);
        }
        Ok(summaries.into_values().collect())
    }
}
