//! In-memory health baseline and snapshot stores

use crate::repository::{HealthBaselineRepository, HealthSnapshotRepository};
use async_trait::async_trait;
use im_common::health::{DeviceBaseline, HealthScore};
use im_common::{Error, Result, TsMillis};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryHealthBaselines {
    baselines: RwLock<HashMap<String, DeviceBaseline>>,
}

impl MemoryHealthBaselines {
    pub fn new() -> Self {
        MemoryHealthBaselines::default()
    }
}

#[async_trait]
impl HealthBaselineRepository for MemoryHealthBaselines {
    async fn get(&self, device_id: &str) -> Result<Option<DeviceBaseline>> {
        Ok(self.baselines.read().get(device_id).cloned())
    }

    async fn list(&self) -> Result<Vec<DeviceBaseline>> {
        let mut rows: Vec<DeviceBaseline> = self.baselines.read().values().cloned().collect();
        rows.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(rows)
    }

    async fn save(&self, baseline: DeviceBaseline) -> Result<()> {
        self.baselines.write().insert(baseline.device_id.clone(), baseline);
        Ok(())
    }

    async fn delete(&self, device_id: &str) -> Result<()> {
        self.baselines
            .write()
            .remove(device_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("baseline for device {device_id}")))
    }
}

/// Append-only per-device health history
#[derive(Default)]
pub struct MemoryHealthSnapshots {
    history: RwLock<HashMap<String, Vec<HealthScore>>>,
}

impl MemoryHealthSnapshots {
    pub fn new() -> Self {
        MemoryHealthSnapshots::default()
    }
}

#[async_trait]
impl HealthSnapshotRepository for MemoryHealthSnapshots {
    async fn append(&self, snapshot: HealthScore) -> Result<()> {
        let mut history = self.history.write();
        let entries = history.entry(snapshot.device_id.clone()).or_default();
        if let Some(last) = entries.last() {
            if snapshot.timestamp < last.timestamp {
                return Err(Error::Validation(format!(
                    "snapshot timestamp {} precedes history tail {}",
                    snapshot.timestamp, last.timestamp
                )));
            }
        }
        entries.push(snapshot);
        Ok(())
    }

    async fn history(&self, device_id: &str, since: TsMillis) -> Result<Vec<HealthScore>> {
        Ok(self
            .history
            .read()
            .get(device_id)
            .map(|entries| entries.iter().filter(|s| s.timestamp >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn latest(&self, device_id: &str) -> Result<Option<HealthScore>> {
        Ok(self.history.read().get(device_id).and_then(|entries| entries.last().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use im_common::health::HealthLevel;

    fn snapshot(ts: TsMillis, index: u32) -> HealthScore {
        HealthScore {
            device_id: "d1".into(),
            timestamp: ts,
            index,
            level: HealthLevel::Healthy,
            deviation_score: 90.0,
            trend_score: 90.0,
            stability_score: 90.0,
            alarm_score: 100.0,
            has_baseline: true,
            problem_tags: Vec::new(),
            diagnostic_message: None,
        }
    }

    #[tokio::test]
    async fn history_is_append_only_and_time_ordered() {
        let store = MemoryHealthSnapshots::new();
        store.append(snapshot(1000, 92)).await.unwrap();
        store.append(snapshot(2000, 88)).await.unwrap();
        let err = store.append(snapshot(1500, 85)).await.unwrap_err();
        assert_eq!(err.category(), "validation");

        let history = store.history("d1", 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(store.latest("d1").await.unwrap().unwrap().index, 88);
    }
}
