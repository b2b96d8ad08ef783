//! Per-(device, rule) alarm grouping and lifecycle
//!
//! Keeps the group invariants: `alarm_count` equals the number of children,
//! severity is the max over open children, the message follows the latest
//! child, and closing a group closes every child.

use im_common::alarm::{AlarmGroup, AlarmRecord, AlarmStatus};
use im_common::{Error, Result};
use im_store::{AlarmGroupRepository, AlarmRepository};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct GroupAggregator {
    alarms: Arc<dyn AlarmRepository>,
    groups: Arc<dyn AlarmGroupRepository>,
}

impl GroupAggregator {
    pub fn new(alarms: Arc<dyn AlarmRepository>, groups: Arc<dyn AlarmGroupRepository>) -> Self {
        GroupAggregator { alarms, groups }
    }

    /// Attach a freshly fired alarm to the open group for its
    /// (device, rule), creating the group when none is open. Returns the
    /// stored alarm (now carrying its group id) and the group.
    pub async fn attach(&self, mut alarm: AlarmRecord) -> Result<(AlarmRecord, AlarmGroup)> {
        let rule_id = alarm
            .rule_id
            .clone()
            .ok_or_else(|| Error::Validation("grouped alarms require a rule id".into()))?;

        let group = match self.groups.open_by_device_rule(&alarm.device_id, &rule_id).await? {
            Some(mut group) => {
                group.alarm_count += 1;
                group.last_occurred_utc = alarm.created_utc;
                group.severity = group.severity.max(alarm.severity);
                group.message = alarm.message.clone();
                if group.aggregate_status == AlarmStatus::Acked {
                    // A new open child reopens an acked group
                    group.aggregate_status = AlarmStatus::Open;
                }
                group
            }
            None => AlarmGroup {
                group_id: Uuid::new_v4().to_string(),
                device_id: alarm.device_id.clone(),
                rule_id,
                first_occurred_utc: alarm.created_utc,
                last_occurred_utc: alarm.created_utc,
                alarm_count: 1,
                severity: alarm.severity,
                message: alarm.message.clone(),
                aggregate_status: AlarmStatus::Open,
            },
        };

        alarm.group_id = Some(group.group_id.clone());
        self.alarms.create(alarm.clone()).await?;
        self.groups.upsert(group.clone()).await?;
        debug!(
            "alarm {} attached to group {} (count {})",
            alarm.alarm_id, group.group_id, group.alarm_count
        );
        Ok((alarm, group))
    }

    /// Ack a single alarm and refresh its group's aggregate state
    pub async fn ack_alarm(
        &self,
        alarm_id: &str,
        by: &str,
        note: Option<String>,
    ) -> Result<AlarmRecord> {
        let alarm = self.alarms.ack(alarm_id, by, note).await?;
        if let Some(group_id) = alarm.group_id.as_deref() {
            self.refresh_group(group_id).await?;
        }
        Ok(alarm)
    }

    /// Ack every open child of a group
    pub async fn ack_group(&self, group_id: &str, by: &str, note: Option<String>) -> Result<AlarmGroup> {
        let children = self.alarms.list_by_group(group_id).await?;
        if children.is_empty() {
            return Err(Error::NotFound(format!("alarm group {group_id} has no alarms")));
        }
        for child in children.iter().filter(|a| a.status == AlarmStatus::Open) {
            self.alarms.ack(&child.alarm_id, by, note.clone()).await?;
        }
        self.refresh_group(group_id).await
    }

    /// Close a single alarm and refresh its group's aggregate state
    pub async fn close_alarm(&self, alarm_id: &str) -> Result<AlarmRecord> {
        let alarm = self.alarms.close(alarm_id).await?;
        if let Some(group_id) = alarm.group_id.as_deref() {
            self.refresh_group(group_id).await?;
        }
        Ok(alarm)
    }

    /// Close a group and every child that is still open or acked
    pub async fn close_group(&self, group_id: &str) -> Result<AlarmGroup> {
        let group = self.groups.get(group_id).await?;
        if group.aggregate_status == AlarmStatus::Closed {
            return Err(Error::ConflictState(format!("group {group_id} already closed")));
        }
        for child in self.alarms.list_by_group(group_id).await? {
            if child.status != AlarmStatus::Closed {
                self.alarms.close(&child.alarm_id).await?;
            }
        }
        self.refresh_group(group_id).await
    }

    /// Recompute a group's aggregate fields from its children
    async fn refresh_group(&self, group_id: &str) -> Result<AlarmGroup> {
        let mut group = self.groups.get(group_id).await?;
        let children = self.alarms.list_by_group(group_id).await?;

        group.alarm_count = children.len() as u32;
        let open: Vec<&AlarmRecord> =
            children.iter().filter(|a| a.status != AlarmStatus::Closed).collect();
        if let Some(max) = open.iter().map(|a| a.severity).max() {
            group.severity = max;
        }
        if let Some(latest) = children.iter().max_by_key(|a| a.ts) {
            group.message = latest.message.clone();
            group.last_occurred_utc = latest.created_utc.max(group.last_occurred_utc);
        }
        group.aggregate_status = if open.is_empty() {
            AlarmStatus::Closed
        } else if open.iter().all(|a| a.status == AlarmStatus::Acked) {
            AlarmStatus::Acked
        } else {
            AlarmStatus::Open
        };
        self.groups.upsert(group.clone()).await?;
        Ok(group)
    }
}
