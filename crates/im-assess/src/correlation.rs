//! Correlation analyzer
//!
//! Rule-driven pairwise anomaly detection across a device's recent tag
//! series: same-direction drift, opposite-direction drift, and combined
//! threshold breaches, annotated with the Pearson coefficient.

use im_common::correlation::{CorrelationAnomaly, CorrelationRule, CorrelationRuleType};
use im_common::stats::{self, EPSILON};
use im_common::{PatternCache, Result, TsMillis};
use im_store::{TagCorrelationRepository, TelemetryRepository};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Common points two series must share after alignment
const MIN_COMMON_POINTS: usize = 3;

/// Query cap for the analysis window
const MAX_ANALYSIS_POINTS: usize = 2000;

pub struct CorrelationAnalyzer {
    repo: Arc<dyn TagCorrelationRepository>,
    telemetry: Arc<dyn TelemetryRepository>,
    rules: RwLock<Arc<Vec<CorrelationRule>>>,
    patterns: PatternCache,
}

impl CorrelationAnalyzer {
    pub fn new(
        repo: Arc<dyn TagCorrelationRepository>,
        telemetry: Arc<dyn TelemetryRepository>,
    ) -> Self {
        CorrelationAnalyzer {
            repo,
            telemetry,
            rules: RwLock::new(Arc::new(Vec::new())),
            patterns: PatternCache::new(),
        }
    }

    /// Reload enabled rules from the repository and swap them in. Stale
    /// compiled patterns are flushed; they recompile lazily on first use.
    pub async fn refresh(&self) -> Result<usize> {
        let rules = self.repo.list_enabled().await?;
        let count = rules.len();
        let dropped = self.patterns.clear();
        *self.rules.write() = Arc::new(rules);
        debug!("correlation rules refreshed, {count} active, {dropped} cached pattern(s) dropped");
        Ok(count)
    }

    /// Analyze one device's recent window against the loaded rules
    pub async fn analyze(
        &self,
        device_id: &str,
        window_minutes: u32,
        now: TsMillis,
    ) -> Result<Vec<CorrelationAnomaly>> {
        let rules = self.rules.read().clone();
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let start = now - i64::from(window_minutes) * 60_000;
        let points = self
            .telemetry
            .query_simple(device_id, None, start, now + 1, MAX_ANALYSIS_POINTS)
            .await?;
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let mut series: HashMap<String, Vec<(TsMillis, f64)>> = HashMap::new();
        for point in points {
            if let Some(v) = point.value.as_f64() {
                series.entry(point.tag_id).or_default().push((point.ts, v));
            }
        }
        let tag_ids: Vec<&String> = series.keys().collect();

        let mut anomalies = Vec::new();
        for rule in rules.iter() {
            match self.matches(&rule.device_pattern, device_id) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    warn!("correlation rule {} has a bad device pattern: {e}", rule.id);
                    continue;
                }
            }
            for &tag1 in &tag_ids {
                if !self.matches(&rule.tag1_pattern, tag1).unwrap_or(false) {
                    continue;
                }
                for &tag2 in &tag_ids {
                    if tag1 == tag2 || !self.matches(&rule.tag2_pattern, tag2).unwrap_or(false) {
                        continue;
                    }
                    let (s1, s2) = align(&series[tag1], &series[tag2]);
                    if s1.len() < MIN_COMMON_POINTS {
                        continue;
                    }
                    if evaluate(rule, &s1, &s2) {
                        anomalies.push(CorrelationAnomaly {
                            rule_id: rule.id.clone(),
                            rule_name: rule.name.clone(),
                            tag1: tag1.clone(),
                            tag2: tag2.clone(),
                            correlation: stats::pearson(&s1, &s2).unwrap_or(0.0),
                            risk_description: rule.risk_description.clone(),
                            penalty_score: rule.penalty_score,
                        });
                    }
                }
            }
        }
        Ok(anomalies)
    }

    fn matches(&self, pattern: &str, text: &str) -> Result<bool> {
        self.patterns.matches(pattern, text)
    }
}

/// Align two series on their timestamp intersection; fall back to index
/// alignment when they share too few stamps.
fn align(a: &[(TsMillis, f64)], b: &[(TsMillis, f64)]) -> (Vec<f64>, Vec<f64>) {
    let b_by_ts: HashMap<TsMillis, f64> = b.iter().copied().collect();
    let mut a_vals = Vec::new();
    let mut b_vals = Vec::new();
    for (ts, v) in a {
        if let Some(&bv) = b_by_ts.get(ts) {
            a_vals.push(*v);
            b_vals.push(bv);
        }
    }
    if a_vals.len() >= MIN_COMMON_POINTS {
        return (a_vals, b_vals);
    }
    // Index alignment fallback over the shorter series
    let n = a.len().min(b.len());
    (
        a[..n].iter().map(|(_, v)| *v).collect(),
        b[..n].iter().map(|(_, v)| *v).collect(),
    )
}

fn normalized_slope(values: &[f64]) -> f64 {
    let Some(fit) = stats::linear_fit(values) else {
        return 0.0;
    };
    let mean = stats::mean(values);
    if mean.abs() < EPSILON {
        fit.slope
    } else {
        fit.slope / mean.abs()
    }
}

fn latest_z(values: &[f64]) -> f64 {
    let mean = stats::mean(values);
    let std = stats::std_dev(values);
    if std < EPSILON {
        return 0.0;
    }
    (values.last().copied().unwrap_or(mean) - mean) / std
}

fn evaluate(rule: &CorrelationRule, s1: &[f64], s2: &[f64]) -> bool {
    match rule.rule_type {
        CorrelationRuleType::SameDirection => {
            let (n1, n2) = (normalized_slope(s1), normalized_slope(s2));
            n1.abs() > rule.threshold && n2.abs() > rule.threshold && n1 * n2 > 0.0
        }
        CorrelationRuleType::OppositeDirection => {
            let (n1, n2) = (normalized_slope(s1), normalized_slope(s2));
            n1.abs() > rule.threshold && n2.abs() > rule.threshold && n1 * n2 < 0.0
        }
        CorrelationRuleType::ThresholdCombination => {
            latest_z(s1).abs() > rule.threshold && latest_z(s2).abs() > rule.threshold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use im_common::{TelemetryPoint, TelemetryValue};
    use im_store::memory::{MemoryCorrelationRules, MemoryTelemetry};

    fn rule(rule_type: CorrelationRuleType, threshold: f64) -> CorrelationRule {
        CorrelationRule {
            id: "c1".into(),
            name: "pair rule".into(),
            device_pattern: "dev*".into(),
            tag1_pattern: "temp".into(),
            tag2_pattern: "current".into(),
            rule_type,
            threshold,
            penalty_score: 12.0,
            risk_description: "coupled anomaly".into(),
            enabled: true,
        }
    }

    async fn analyzer_with(
        rule: CorrelationRule,
        temp: &[f64],
        current: &[f64],
    ) -> CorrelationAnalyzer {
        let repo = Arc::new(MemoryCorrelationRules::new());
        repo.upsert(rule).await.unwrap();
        let telemetry = Arc::new(MemoryTelemetry::new());
        let mut batch = Vec::new();
        for (i, &v) in temp.iter().enumerate() {
            batch.push(TelemetryPoint::new("dev-1", "temp", i as i64 * 1000, TelemetryValue::Float64(v)));
        }
        for (i, &v) in current.iter().enumerate() {
            batch.push(TelemetryPoint::new("dev-1", "current", i as i64 * 1000, TelemetryValue::Float64(v)));
        }
        telemetry.append(batch).await.unwrap();
        let analyzer = CorrelationAnalyzer::new(repo, telemetry);
        analyzer.refresh().await.unwrap();
        analyzer
    }

    #[tokio::test]
    async fn same_direction_rise_is_detected() {
        let temp: Vec<f64> = (0..20).map(|i| 50.0 + i as f64).collect();
        let current: Vec<f64> = (0..20).map(|i| 100.0 + 2.0 * i as f64).collect();
        let analyzer =
            analyzer_with(rule(CorrelationRuleType::SameDirection, 0.005), &temp, &current).await;

        let anomalies = analyzer.analyze("dev-1", 60, 60_000).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert!(anomalies[0].correlation > 0.99);
        assert_eq!(anomalies[0].penalty_score, 12.0);
    }

    #[tokio::test]
    async fn opposite_direction_requires_sign_flip() {
        let temp: Vec<f64> = (0..20).map(|i| 50.0 + i as f64).collect();
        let falling: Vec<f64> = (0..20).map(|i| 100.0 - 2.0 * i as f64).collect();
        let analyzer =
            analyzer_with(rule(CorrelationRuleType::OppositeDirection, 0.005), &temp, &falling)
                .await;

        let anomalies = analyzer.analyze("dev-1", 60, 60_000).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert!(anomalies[0].correlation < -0.99);
    }

    #[tokio::test]
    async fn flat_series_do_not_trigger_direction_rules() {
        let flat = vec![50.0; 20];
        let analyzer =
            analyzer_with(rule(CorrelationRuleType::SameDirection, 0.005), &flat, &flat).await;
        assert!(analyzer.analyze("dev-1", 60, 60_000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn threshold_combination_checks_latest_z() {
        let mut temp = vec![50.0; 19];
        temp.push(80.0); // strong last-point excursion
        let mut current = vec![10.0; 19];
        current.push(25.0);
        let analyzer =
            analyzer_with(rule(CorrelationRuleType::ThresholdCombination, 2.0), &temp, &current)
                .await;
        assert_eq!(analyzer.analyze("dev-1", 60, 60_000).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn device_pattern_gates_the_rule() {
        let temp: Vec<f64> = (0..20).map(|i| 50.0 + i as f64).collect();
        let current: Vec<f64> = (0..20).map(|i| 100.0 + 2.0 * i as f64).collect();
        let mut r = rule(CorrelationRuleType::SameDirection, 0.005);
        r.device_pattern = "press_*".into();
        let analyzer = analyzer_with(r, &temp, &current).await;
        assert!(analyzer.analyze("dev-1", 60, 60_000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn too_few_common_points_are_skipped() {
        let analyzer =
            analyzer_with(rule(CorrelationRuleType::SameDirection, 0.005), &[1.0, 2.0], &[2.0, 4.0])
                .await;
        assert!(analyzer.analyze("dev-1", 60, 60_000).await.unwrap().is_empty());
    }
}
