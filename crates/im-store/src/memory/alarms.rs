//! In-memory alarm, alarm-rule and alarm-group stores

use crate::repository::{AlarmGroupRepository, AlarmRepository, AlarmRuleRepository};
use async_trait::async_trait;
use chrono::Utc;
use im_common::alarm::{AlarmGroup, AlarmQuery, AlarmRecord, AlarmRule, AlarmStatus};
use im_common::{DeviceId, Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryAlarms {
    alarms: RwLock<HashMap<String, AlarmRecord>>,
}

impl MemoryAlarms {
    pub fn new() -> Self {
        MemoryAlarms::default()
    }
}

#[async_trait]
impl AlarmRepository for MemoryAlarms {
    async fn create(&self, alarm: AlarmRecord) -> Result<()> {
        let mut alarms = self.alarms.write();
        if alarms.contains_key(&alarm.alarm_id) {
            return Err(Error::Validation(format!("duplicate alarm id {}", alarm.alarm_id)));
        }
        alarms.insert(alarm.alarm_id.clone(), alarm);
        Ok(())
    }

    async fn get(&self, alarm_id: &str) -> Result<AlarmRecord> {
        self.alarms
            .read()
            .get(alarm_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("alarm {alarm_id}")))
    }

    async fn update(&self, alarm: AlarmRecord) -> Result<()> {
        let mut alarms = self.alarms.write();
        if !alarms.contains_key(&alarm.alarm_id) {
            return Err(Error::NotFound(format!("alarm {}", alarm.alarm_id)));
        }
        alarms.insert(alarm.alarm_id.clone(), alarm);
        Ok(())
    }

    async fn list_open(&self, device_id: &str) -> Result<Vec<AlarmRecord>> {
        let mut open: Vec<AlarmRecord> = self
            .alarms
            .read()
            .values()
            .filter(|a| a.device_id == device_id && a.status != AlarmStatus::Closed)
            .cloned()
            .collect();
        open.sort_by_key(|a| a.ts);
        Ok(open)
    }

    async fn list_by_group(&self, group_id: &str) -> Result<Vec<AlarmRecord>> {
        let mut rows: Vec<AlarmRecord> = self
            .alarms
            .read()
            .values()
            .filter(|a| a.group_id.as_deref() == Some(group_id))
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.ts);
        Ok(rows)
    }

    async fn open_count(&self, device_id: &str) -> Result<u64> {
        Ok(self
            .alarms
            .read()
            .values()
            .filter(|a| a.device_id == device_id && a.status != AlarmStatus::Closed)
            .count() as u64)
    }

    async fn open_count_by_devices(
        &self,
        device_ids: &[DeviceId],
    ) -> Result<HashMap<DeviceId, u64>> {
        let alarms = self.alarms.read();
        let mut counts: HashMap<DeviceId, u64> =
            device_ids.iter().map(|d| (d.clone(), 0)).collect();
        for alarm in alarms.values() {
            if alarm.status == AlarmStatus::Closed {
                continue;
            }
            if let Some(count) = counts.get_mut(&alarm.device_id) {
                *count += 1;
            }
        }
        Ok(counts)
    }

    async fn query(&self, query: &AlarmQuery) -> Result<Vec<AlarmRecord>> {
        let mut rows: Vec<AlarmRecord> = self
            .alarms
            .read()
            .values()
            .filter(|a| {
                query.device_id.as_deref().is_none_or(|d| a.device_id == d)
                    && query.status.is_none_or(|s| a.status == s)
                    && query.min_severity.is_none_or(|s| a.severity >= s)
                    && query.start.is_none_or(|s| a.ts >= s)
                    && query.end.is_none_or(|e| a.ts < e)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|a| std::cmp::Reverse(a.ts));
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn ack(&self, alarm_id: &str, by: &str, note: Option<String>) -> Result<AlarmRecord> {
        let mut alarms = self.alarms.write();
        let alarm = alarms
            .get_mut(alarm_id)
            .ok_or_else(|| Error::NotFound(format!("alarm {alarm_id}")))?;
        match alarm.status {
            AlarmStatus::Closed => {
                return Err(Error::ConflictState(format!("alarm {alarm_id} already closed")))
            }
            AlarmStatus::Acked => {}
            AlarmStatus::Open => {
                alarm.status = AlarmStatus::Acked;
                alarm.acked_by = Some(by.to_string());
                alarm.acked_utc = Some(Utc::now());
                alarm.ack_note = note;
                alarm.updated_utc = Utc::now();
            }
        }
        Ok(alarm.clone())
    }

    async fn close(&self, alarm_id: &str) -> Result<AlarmRecord> {
        let mut alarms = self.alarms.write();
        let alarm = alarms
            .get_mut(alarm_id)
            .ok_or_else(|| Error::NotFound(format!("alarm {alarm_id}")))?;
        if alarm.status == AlarmStatus::Closed {
            return Err(Error::ConflictState(format!("alarm {alarm_id} already closed")));
        }
        alarm.status = AlarmStatus::Closed;
        alarm.updated_utc = Utc::now();
        Ok(alarm.clone())
    }
}

#[derive(Default)]
pub struct MemoryAlarmRules {
    rules: RwLock<HashMap<String, AlarmRule>>,
}

impl MemoryAlarmRules {
    pub fn new() -> Self {
        MemoryAlarmRules::default()
    }
}

#[async_trait]
impl AlarmRuleRepository for MemoryAlarmRules {
    async fn list_enabled(&self) -> Result<Vec<AlarmRule>> {
        let mut rules: Vec<AlarmRule> =
            self.rules.read().values().filter(|r| r.enabled).cloned().collect();
        rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        Ok(rules)
    }

    async fn list(&self) -> Result<Vec<AlarmRule>> {
        let mut rules: Vec<AlarmRule> = self.rules.read().values().cloned().collect();
        rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        Ok(rules)
    }

    async fn get(&self, rule_id: &str) -> Result<AlarmRule> {
        self.rules
            .read()
            .get(rule_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("alarm rule {rule_id}")))
    }

    async fn upsert(&self, rule: AlarmRule) -> Result<()> {
        if !(1..=5).contains(&rule.severity) {
            return Err(Error::Validation(format!("severity {} outside 1..=5", rule.severity)));
        }
        self.rules.write().insert(rule.rule_id.clone(), rule);
        Ok(())
    }

    async fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<()> {
        let mut rules = self.rules.write();
        let rule = rules
            .get_mut(rule_id)
            .ok_or_else(|| Error::NotFound(format!("alarm rule {rule_id}")))?;
        rule.enabled = enabled;
        Ok(())
    }

    async fn delete(&self, rule_id: &str) -> Result<()> {
        self.rules
            .write()
            .remove(rule_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("alarm rule {rule_id}")))
    }
}

#[derive(Default)]
pub struct MemoryAlarmGroups {
    groups: RwLock<HashMap<String, AlarmGroup>>,
}

impl MemoryAlarmGroups {
    pub fn new() -> Self {
        MemoryAlarmGroups::default()
    }
}

#[async_trait]
impl AlarmGroupRepository for MemoryAlarmGroups {
    async fn open_by_device_rule(
        &self,
        device_id: &str,
        rule_id: &str,
    ) -> Result<Option<AlarmGroup>> {
        Ok(self
            .groups
            .read()
            .values()
            .find(|g| {
                g.device_id == device_id
                    && g.rule_id == rule_id
                    && g.aggregate_status != AlarmStatus::Closed
            })
            .cloned())
    }

    async fn get(&self, group_id: &str) -> Result<AlarmGroup> {
        self.groups
            .read()
            .get(group_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("alarm group {group_id}")))
    }

    async fn upsert(&self, group: AlarmGroup) -> Result<()> {
        self.groups.write().insert(group.group_id.clone(), group);
        Ok(())
    }

    async fn query(
        &self,
        device_id: Option<&str>,
        status: Option<AlarmStatus>,
        limit: usize,
    ) -> Result<Vec<AlarmGroup>> {
        let mut rows: Vec<AlarmGroup> = self
            .groups
            .read()
            .values()
            .filter(|g| {
                device_id.is_none_or(|d| g.device_id == d)
                    && status.is_none_or(|s| g.aggregate_status == s)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.last_occurred_utc.cmp(&a.last_occurred_utc));
        rows.truncate(limit);
        Ok(rows)
    }
}
