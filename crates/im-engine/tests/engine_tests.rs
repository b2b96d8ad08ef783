//! End-to-end engine tests over the in-memory stores

use im_common::alarm::{AlarmCondition, AlarmRule, AlarmStatus};
use im_common::health::HealthLevel;
use im_common::{Config, Device, Protocol, TelemetryPoint, TelemetryValue};
use im_engine::Engine;
use im_hub::{device_topic, TOPIC_ALL};
use im_store::{
    AlarmGroupRepository, AlarmRepository, AlarmRuleRepository, DeviceRepository,
    HealthBaselineRepository, HealthSnapshotRepository, Stores, TelemetryRepository,
};
use std::sync::Arc;

const HOUR_MS: i64 = 3_600_000;

async fn engine_with_device(device_id: &str) -> (Arc<Engine>, Stores) {
    let stores = Stores::in_memory();
    stores
        .devices
        .upsert(Device {
            device_id: device_id.to_string(),
            name: Some("press".into()),
            protocol: Protocol::OpcUa,
            enabled: true,
            location: None,
        })
        .await
        .unwrap();
    let engine = Engine::new(Config::default(), stores.clone()).await.unwrap();
    (engine, stores)
}

fn point(device: &str, tag: &str, ts: i64, value: f64) -> TelemetryPoint {
    TelemetryPoint::new(device, tag, ts, TelemetryValue::Float64(value))
}

#[tokio::test]
async fn dwell_rule_fires_exactly_once_per_entry() {
    let (engine, stores) = engine_with_device("d1").await;
    stores
        .alarm_rules
        .upsert(AlarmRule {
            rule_id: "hi-temp".into(),
            tag_pattern: "T1".into(),
            condition: AlarmCondition::Gt,
            threshold: 10.0,
            lower: None,
            upper: None,
            dwell_ms: 2000,
            hysteresis_pct: 10.0,
            severity: 3,
            enabled: true,
        })
        .await
        .unwrap();
    engine.refresh_rules().await;

    // Below, then above for the dwell period
    engine.ingest(vec![point("d1", "T1", 0, 8.0)]).await.unwrap();
    engine.ingest(vec![point("d1", "T1", 1000, 11.0)]).await.unwrap();
    engine.ingest(vec![point("d1", "T1", 2000, 11.0)]).await.unwrap();
    engine.ingest(vec![point("d1", "T1", 3000, 11.0)]).await.unwrap();

    assert_eq!(stores.alarms.open_count("d1").await.unwrap(), 1);
    let group = stores.alarm_groups.open_by_device_rule("d1", "hi-temp").await.unwrap().unwrap();
    assert_eq!(group.alarm_count, 1);
    assert_eq!(group.aggregate_status, AlarmStatus::Open);

    // Still latched: 9.5 does not clear the 10% hysteresis margin
    engine.ingest(vec![point("d1", "T1", 4000, 9.5)]).await.unwrap();
    engine.ingest(vec![point("d1", "T1", 6000, 11.0)]).await.unwrap();
    engine.ingest(vec![point("d1", "T1", 8000, 11.0)]).await.unwrap();
    assert_eq!(stores.alarms.open_count("d1").await.unwrap(), 1);
}

#[tokio::test]
async fn group_lifecycle_closes_children() {
    let (engine, stores) = engine_with_device("d1").await;
    stores
        .alarm_rules
        .upsert(AlarmRule {
            rule_id: "r1".into(),
            tag_pattern: "T1".into(),
            condition: AlarmCondition::Gt,
            threshold: 10.0,
            lower: None,
            upper: None,
            dwell_ms: 0,
            hysteresis_pct: 10.0,
            severity: 4,
            enabled: true,
        })
        .await
        .unwrap();
    engine.refresh_rules().await;

    // Two entries into the condition region fire two grouped alarms
    engine.ingest(vec![point("d1", "T1", 1000, 12.0)]).await.unwrap();
    engine.ingest(vec![point("d1", "T1", 2000, 8.0)]).await.unwrap();
    engine.ingest(vec![point("d1", "T1", 3000, 12.0)]).await.unwrap();

    let group = stores.alarm_groups.open_by_device_rule("d1", "r1").await.unwrap().unwrap();
    assert_eq!(group.alarm_count, 2);

    let closed = engine.alarm_groups().close_group(&group.group_id).await.unwrap();
    assert_eq!(closed.aggregate_status, AlarmStatus::Closed);
    assert_eq!(stores.alarms.open_count("d1").await.unwrap(), 0);
    for child in stores.alarms.list_by_group(&group.group_id).await.unwrap() {
        assert_eq!(child.status, AlarmStatus::Closed);
    }
}

#[tokio::test]
async fn broadcast_reaches_only_matching_topics() {
    let (engine, _) = engine_with_device("A").await;
    let hub = engine.hub();

    let s1 = hub.connect();
    let s2 = hub.connect();
    let s3 = hub.connect();
    hub.subscribe(s1.id(), TOPIC_ALL).unwrap();
    hub.subscribe(s2.id(), &device_topic("A")).unwrap();
    hub.subscribe(s3.id(), &device_topic("B")).unwrap();

    engine.ingest(vec![point("A", "T1", 1000, 5.0)]).await.unwrap();

    let e1 = s1.recv().await.unwrap();
    let e2 = s2.recv().await.unwrap();
    assert_eq!(e1.device_id, "A");
    assert_eq!(e1.ts, 1000);
    assert_eq!(e2.ts, 1000);
    assert!(s3.try_recv().is_none());

    // Re-ingesting the same timestamp publishes nothing new
    engine.ingest(vec![point("A", "T1", 1000, 5.0)]).await.unwrap();
    assert!(s1.try_recv().is_none());
}

#[tokio::test]
async fn assessment_appends_snapshots_with_bounded_index() {
    let (engine, stores) = engine_with_device("d1").await;

    let now = 30 * 60_000;
    let batch: Vec<TelemetryPoint> =
        (0..120).map(|i| point("d1", "temp", i * 10_000, 60.0 + (i % 5) as f64 * 0.1)).collect();
    engine.ingest(batch).await.unwrap();

    let score = engine.assess_device("d1", now).await.unwrap().unwrap();
    assert!(score.index <= 100);
    assert!(!score.has_baseline);
    assert_eq!(score.device_id, "d1");

    let latest = stores.health_snapshots.latest("d1").await.unwrap().unwrap();
    assert_eq!(latest.index, score.index);
    assert_eq!(latest.timestamp, now);

    // A second assessment later appends, history stays ordered
    let later = now + 60_000;
    engine.ingest(vec![point("d1", "temp", later - 1000, 60.2)]).await.unwrap();
    engine.assess_device("d1", later).await.unwrap().unwrap();
    let history = stores.health_snapshots.history("d1", 0).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].timestamp <= history[1].timestamp);
}

#[tokio::test]
async fn learned_baseline_feeds_the_deviation_score() {
    let (engine, stores) = engine_with_device("d1").await;

    // Stable history around 60, then learn
    let batch: Vec<TelemetryPoint> =
        (0..200).map(|i| point("d1", "temp", i * 1000, 60.0 + (i % 7) as f64 * 0.1)).collect();
    engine.ingest(batch).await.unwrap();
    engine.learn_baseline("d1", 1.0, 200_000).await.unwrap();
    assert!(stores.health_baselines.get("d1").await.unwrap().is_some());

    // Fresh window far from the baseline mean
    let start = 10 * HOUR_MS;
    let hot: Vec<TelemetryPoint> =
        (0..60).map(|i| point("d1", "temp", start + i * 1000, 75.0)).collect();
    engine.ingest(hot).await.unwrap();

    let score = engine.assess_device("d1", start + 60_000).await.unwrap().unwrap();
    assert!(score.has_baseline);
    assert!(
        score.deviation_score < 40.0,
        "a 75C window against a 60C baseline must score low, got {}",
        score.deviation_score
    );
    assert_ne!(score.level, HealthLevel::Healthy);
}

#[tokio::test]
async fn rul_prediction_over_snapshot_history() {
    let (engine, stores) = engine_with_device("d1").await;

    // Synthetic declining history: 70 down to 45 over seven days
    for h in 0..=168i64 {
        let index = (70.0 - 25.0 * h as f64 / 168.0).round() as u32;
        stores
            .health_snapshots
            .append(im_common::health::HealthScore {
                device_id: "d1".into(),
                timestamp: h * HOUR_MS,
                index,
                level: HealthLevel::Attention,
                deviation_score: 70.0,
                trend_score: 70.0,
                stability_score: 70.0,
                alarm_score: 100.0,
                has_baseline: true,
                problem_tags: Vec::new(),
                diagnostic_message: None,
            })
            .await
            .unwrap();
    }

    let prediction = engine.predict_rul("d1", 168 * HOUR_MS).await.unwrap().unwrap();
    let remaining = prediction.remaining_hours.unwrap();
    assert!((remaining - 33.6).abs() < 2.0, "remaining {remaining}");
    assert_eq!(prediction.risk, im_assess::predict::RiskBucket::High);
}

#[tokio::test]
async fn invalid_configuration_is_fatal_at_startup() {
    let stores = Stores::in_memory();
    let mut config = Config::default();
    config.health.weights.deviation = 0.9; // sum != 1.0
    let err = Engine::new(config, stores).await.unwrap_err();
    assert_eq!(err.category(), "fatal");
}

#[tokio::test(start_paused = true)]
async fn broadcast_ticker_pushes_appended_points() {
    let stores = Stores::in_memory();
    stores
        .devices
        .upsert(Device {
            device_id: "d1".into(),
            name: None,
            protocol: Protocol::Modbus,
            enabled: true,
            location: None,
        })
        .await
        .unwrap();

    let mut config = Config::default();
    config.scheduler.broadcast_tick_ms = 100;
    let engine = Engine::new(config, stores.clone()).await.unwrap();
    engine.start();

    let hub = engine.hub();
    let conn = hub.connect();
    hub.subscribe(conn.id(), TOPIC_ALL).unwrap();

    // Appended directly to the store, not through ingest: only the ticker
    // can deliver it
    stores.telemetry.append(vec![point("d1", "T1", 1000, 3.0)]).await.unwrap();

    let mut received = None;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        if let Some(event) = conn.try_recv() {
            received = Some(event);
            break;
        }
    }
    engine.shutdown().await;

    let event = received.expect("ticker delivered the point");
    assert_eq!(event.tag_id, "T1");
    assert_eq!(event.ts, 1000);
}

#[tokio::test]
async fn engine_status_reflects_lifecycle() {
    let (engine, _) = engine_with_device("d1").await;
    engine.start();
    let status = engine.status();
    assert!(status.running);
    assert!(status.driver_count >= 6);
    assert_eq!(status.total_lag, 0);

    engine.shutdown().await;
    assert!(!engine.status().running);
}
