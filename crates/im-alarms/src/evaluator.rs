//! Alarm rule evaluator
//!
//! Tracks a per-(rule, device, tag) state machine. A rule fires once its
//! predicate has held continuously for the dwell time, measured from the
//! last observation that failed the predicate, and re-arms only after the
//! value leaves the condition region by the hysteresis margin.

use crate::groups::GroupAggregator;
use chrono::{DateTime, Utc};
use im_common::alarm::{AlarmRecord, AlarmRule, AlarmStatus};
use im_common::{PatternCache, Result, TelemetryPoint, TsMillis};
use im_store::AlarmRuleRepository;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

type StateKey = (String, String, String);

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Waiting for the predicate; `anchor` is the ts of the last failing
    /// observation (or the first sighting)
    Armed { anchor: TsMillis },
    /// Fired and not yet re-armed
    Fired,
}

pub struct AlarmEvaluator {
    rules_repo: Arc<dyn AlarmRuleRepository>,
    groups: Arc<GroupAggregator>,
    rules: RwLock<Arc<Vec<AlarmRule>>>,
    patterns: PatternCache,
    states: Mutex<HashMap<StateKey, Phase>>,
}

impl AlarmEvaluator {
    pub fn new(rules_repo: Arc<dyn AlarmRuleRepository>, groups: Arc<GroupAggregator>) -> Self {
        AlarmEvaluator {
            rules_repo,
            groups,
            rules: RwLock::new(Arc::new(Vec::new())),
            patterns: PatternCache::new(),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Reload enabled rules. States for removed rules are dropped and the
    /// pattern cache is flushed; patterns recompile lazily on first use.
    pub async fn refresh(&self) -> Result<usize> {
        let rules = self.rules_repo.list_enabled().await?;
        let count = rules.len();
        {
            let mut states = self.states.lock();
            states.retain(|(rule_id, _, _), _| rules.iter().any(|r| &r.rule_id == rule_id));
        }
        let dropped = self.patterns.clear();
        *self.rules.write() = Arc::new(rules);
        debug!("alarm rules refreshed, {count} active, {dropped} cached pattern(s) dropped");
        Ok(count)
    }

    /// Feed one observation through every matching rule. Returns the alarms
    /// fired by this observation.
    pub async fn observe(
        &self,
        device_id: &str,
        tag_id: &str,
        value: f64,
        ts: TsMillis,
    ) -> Result<Vec<AlarmRecord>> {
        let rules = self.rules.read().clone();
        let mut fired = Vec::new();
        for rule in rules.iter() {
            let matches = match self.patterns.matches(&rule.tag_pattern, tag_id) {
                Ok(m) => m,
                Err(e) => {
                    warn!("alarm rule {} has a bad tag pattern: {e}", rule.rule_id);
                    continue;
                }
            };
            if !matches {
                continue;
            }
            if self.step(rule, device_id, tag_id, value, ts) {
                let alarm = build_alarm(rule, device_id, tag_id, value, ts);
                let (alarm, group) = self.groups.attach(alarm).await?;
                info!(
                    "alarm fired: rule {} on {device_id}/{tag_id} value {value} (group {})",
                    rule.rule_id, group.group_id
                );
                fired.push(alarm);
            }
        }
        Ok(fired)
    }

    /// Evaluate a batch of latest-per-tag points, isolating per-point errors
    pub async fn evaluate_latest(&self, points: &[TelemetryPoint]) -> Result<Vec<AlarmRecord>> {
        let mut fired = Vec::new();
        for point in points {
            let Some(value) = point.value.as_f64() else {
                continue;
            };
            match self.observe(&point.device_id, &point.tag_id, value, point.ts).await {
                Ok(mut alarms) => fired.append(&mut alarms),
                Err(e) => {
                    warn!("alarm evaluation failed for {}/{}: {e}", point.device_id, point.tag_id)
                }
            }
        }
        Ok(fired)
    }

    /// Advance the state machine for one (rule, device, tag) observation.
    /// Returns true when the rule fires on this observation.
    fn step(&self, rule: &AlarmRule, device_id: &str, tag_id: &str, value: f64, ts: TsMillis) -> bool {
        let key = (rule.rule_id.clone(), device_id.to_string(), tag_id.to_string());
        let mut states = self.states.lock();
        let satisfied = rule.is_satisfied(value);

        let phase = states.entry(key).or_insert(Phase::Armed { anchor: ts });
        match *phase {
            Phase::Armed { anchor } => {
                if satisfied {
                    if ts - anchor >= rule.dwell_ms {
                        *phase = Phase::Fired;
                        return true;
                    }
                } else {
                    *phase = Phase::Armed { anchor: ts };
                }
                false
            }
            Phase::Fired => {
                if rule.is_cleared(value) {
                    *phase = Phase::Armed { anchor: ts };
                }
                false
            }
        }
    }
}

fn build_alarm(
    rule: &AlarmRule,
    device_id: &str,
    tag_id: &str,
    value: f64,
    ts: TsMillis,
) -> AlarmRecord {
    let stamp: DateTime<Utc> = DateTime::from_timestamp_millis(ts).unwrap_or_else(Utc::now);
    AlarmRecord {
        alarm_id: Uuid::new_v4().to_string(),
        device_id: device_id.to_string(),
        tag_id: Some(tag_id.to_string()),
        rule_id: Some(rule.rule_id.clone()),
        group_id: None,
        ts,
        severity: rule.severity,
        code: format!("RULE_{:?}", rule.condition).to_uppercase(),
        message: format!(
            "{tag_id} value {value} violates {:?} threshold {}",
            rule.condition, rule.threshold
        ),
        status: AlarmStatus::Open,
        acked_by: None,
        acked_utc: None,
        ack_note: None,
        created_utc: stamp,
        updated_utc: stamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::GroupAggregator;
    use im_common::alarm::AlarmCondition;
    use im_store::memory::{MemoryAlarmGroups, MemoryAlarmRules, MemoryAlarms};
    use im_store::{AlarmGroupRepository, AlarmRepository};

    fn rule(dwell_ms: i64) -> AlarmRule {
        AlarmRule {
            rule_id: "r1".into(),
            tag_pattern: "T1".into(),
            condition: AlarmCondition::Gt,
            threshold: 10.0,
            lower: None,
            upper: None,
            dwell_ms,
            hysteresis_pct: 10.0,
            severity: 3,
            enabled: true,
        }
    }

    async fn evaluator_with(
        rule: AlarmRule,
    ) -> (AlarmEvaluator, Arc<MemoryAlarms>, Arc<MemoryAlarmGroups>) {
        let alarms = Arc::new(MemoryAlarms::new());
        let group_repo = Arc::new(MemoryAlarmGroups::new());
        let groups = Arc::new(GroupAggregator::new(alarms.clone(), group_repo.clone()));
        let rules = Arc::new(MemoryAlarmRules::new());
        rules.upsert(rule).await.unwrap();
        let evaluator = AlarmEvaluator::new(rules, groups);
        evaluator.refresh().await.unwrap();
        (evaluator, alarms, group_repo)
    }

    #[tokio::test]
    async fn rule_fires_once_dwell_is_satisfied() {
        let (evaluator, alarms, groups) = evaluator_with(rule(2000)).await;

        // 8 at t=0 anchors the dwell; 11s hold the condition from t=1s
        assert!(evaluator.observe("d1", "T1", 8.0, 0).await.unwrap().is_empty());
        assert!(evaluator.observe("d1", "T1", 11.0, 1000).await.unwrap().is_empty());
        let fired = evaluator.observe("d1", "T1", 11.0, 2000).await.unwrap();
        assert_eq!(fired.len(), 1, "dwell satisfied at t=2s");
        assert!(evaluator.observe("d1", "T1", 11.0, 3000).await.unwrap().is_empty());

        assert_eq!(alarms.open_count("d1").await.unwrap(), 1);
        let group = groups.open_by_device_rule("d1", "r1").await.unwrap().unwrap();
        assert_eq!(group.alarm_count, 1);
    }

    #[tokio::test]
    async fn no_refire_without_hysteresis_clearance() {
        let (evaluator, alarms, _) = evaluator_with(rule(2000)).await;

        evaluator.observe("d1", "T1", 8.0, 0).await.unwrap();
        evaluator.observe("d1", "T1", 11.0, 1000).await.unwrap();
        assert_eq!(evaluator.observe("d1", "T1", 11.0, 2000).await.unwrap().len(), 1);

        // 9.5 leaves the condition but stays above 10*0.9 = 9: still latched
        evaluator.observe("d1", "T1", 9.5, 4000).await.unwrap();
        assert!(evaluator.observe("d1", "T1", 11.0, 6000).await.unwrap().is_empty());
        assert!(evaluator.observe("d1", "T1", 11.0, 9000).await.unwrap().is_empty());
        assert_eq!(alarms.open_count("d1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn refire_after_full_clearance_and_dwell() {
        let (evaluator, alarms, groups) = evaluator_with(rule(2000)).await;

        evaluator.observe("d1", "T1", 8.0, 0).await.unwrap();
        evaluator.observe("d1", "T1", 11.0, 1000).await.unwrap();
        assert_eq!(evaluator.observe("d1", "T1", 11.0, 2000).await.unwrap().len(), 1);

        // 8.5 < 9 re-arms; dwell counts from the clearing observation
        evaluator.observe("d1", "T1", 8.5, 4000).await.unwrap();
        assert!(evaluator.observe("d1", "T1", 11.0, 5000).await.unwrap().is_empty());
        assert_eq!(evaluator.observe("d1", "T1", 11.0, 6000).await.unwrap().len(), 1);

        assert_eq!(alarms.open_count("d1").await.unwrap(), 2);
        // Both fires land in the same still-open group
        let group = groups.open_by_device_rule("d1", "r1").await.unwrap().unwrap();
        assert_eq!(group.alarm_count, 2);
    }

    #[tokio::test]
    async fn zero_dwell_fires_immediately() {
        let (evaluator, _, _) = evaluator_with(rule(0)).await;
        let fired = evaluator.observe("d1", "T1", 12.0, 0).await.unwrap();
        assert_eq!(fired.len(), 1);
    }

    #[tokio::test]
    async fn pattern_rules_cover_multiple_tags_independently() {
        let mut r = rule(0);
        r.tag_pattern = "T?".into();
        let (evaluator, alarms, _) = evaluator_with(r).await;

        evaluator.observe("d1", "T1", 12.0, 0).await.unwrap();
        evaluator.observe("d1", "T2", 12.0, 0).await.unwrap();
        // Independent per-tag latches: neither refires
        evaluator.observe("d1", "T1", 12.0, 1000).await.unwrap();
        evaluator.observe("d1", "T2", 12.0, 1000).await.unwrap();
        assert_eq!(alarms.open_count("d1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn non_numeric_points_are_skipped() {
        let (evaluator, _, _) = evaluator_with(rule(0)).await;
        let point = TelemetryPoint::new(
            "d1",
            "T1",
            0,
            im_common::TelemetryValue::String("offline".into()),
        );
        assert!(evaluator.evaluate_latest(&[point]).await.unwrap().is_empty());
    }
}
