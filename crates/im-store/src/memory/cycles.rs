//! In-memory work-cycle and cycle-baseline stores

use crate::repository::{CycleBaselineRepository, WorkCycleRepository};
use async_trait::async_trait;
use im_common::cycle::{CycleBaseline, CycleBaselineKind, WorkCycle};
use im_common::{Error, Result, TsMillis};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryWorkCycles {
    cycles: RwLock<HashMap<String, Vec<WorkCycle>>>,
}

impl MemoryWorkCycles {
    pub fn new() -> Self {
        MemoryWorkCycles::default()
    }
}

#[async_trait]
impl WorkCycleRepository for MemoryWorkCycles {
    async fn save(&self, cycles: Vec<WorkCycle>) -> Result<()> {
        let mut store = self.cycles.write();
        for cycle in cycles {
            let entries = store.entry(cycle.device_id.clone()).or_default();
            // upsert on the start timestamp so re-analysis does not duplicate
            match entries.iter_mut().find(|c| c.start_ts == cycle.start_ts) {
                Some(existing) => *existing = cycle,
                None => entries.push(cycle),
            }
        }
        for entries in store.values_mut() {
            entries.sort_by_key(|c| c.start_ts);
        }
        Ok(())
    }

    async fn query(
        &self,
        device_id: &str,
        start: TsMillis,
        end: TsMillis,
        limit: usize,
    ) -> Result<Vec<WorkCycle>> {
        let mut rows: Vec<WorkCycle> = self
            .cycles
            .read()
            .get(device_id)
            .map(|entries| {
                entries.iter().filter(|c| c.start_ts >= start && c.start_ts < end).cloned().collect()
            })
            .unwrap_or_default();
        rows.truncate(limit);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct MemoryCycleBaselines {
    baselines: RwLock<HashMap<(String, CycleBaselineKind), CycleBaseline>>,
}

impl MemoryCycleBaselines {
    pub fn new() -> Self {
        MemoryCycleBaselines::default()
    }
}

#[async_trait]
impl CycleBaselineRepository for MemoryCycleBaselines {
    async fn get(&self, device_id: &str, kind: CycleBaselineKind) -> Result<Option<CycleBaseline>> {
        Ok(self.baselines.read().get(&(device_id.to_string(), kind)).cloned())
    }

    async fn list(&self, device_id: &str) -> Result<Vec<CycleBaseline>> {
        Ok(self
            .baselines
            .read()
            .values()
            .filter(|b| b.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn save(&self, baseline: CycleBaseline) -> Result<()> {
        self.baselines
            .write()
            .insert((baseline.device_id.clone(), baseline.kind), baseline);
        Ok(())
    }

    async fn delete(&self, device_id: &str) -> Result<()> {
        let mut baselines = self.baselines.write();
        let before = baselines.len();
        baselines.retain(|(device, _), _| device != device_id);
        if baselines.len() == before {
            return Err(Error::NotFound(format!("cycle baselines for device {device_id}")));
        }
        Ok(())
    }
}
