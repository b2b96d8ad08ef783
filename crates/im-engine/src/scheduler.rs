//! Periodic drivers
//!
//! One tokio task per concern, each on its own interval, each catching and
//! logging failures so the loop survives. Per-device work inside a tick is
//! bounded by a semaphore so the telemetry store is never stampeded.

use crate::engine::Engine;
use chrono::Utc;
use im_common::TsMillis;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct Scheduler;

impl Scheduler {
    /// Spawn every driver for the engine and return their handles
    pub fn spawn_all(engine: Arc<Engine>) -> Vec<JoinHandle<()>> {
        let cfg = engine.config().scheduler.clone();
        let mut handles = Vec::new();

        handles.push(spawn_driver(
            "assess",
            Duration::from_secs(cfg.assess_interval_secs),
            engine.clone(),
            |engine| async move { assess_tick(&engine).await },
        ));
        handles.push(spawn_driver(
            "baseline-update",
            Duration::from_secs(cfg.baseline_update_interval_secs),
            engine.clone(),
            |engine| async move {
                let updated = engine.baselines.update_all(now_ms()).await?;
                if updated > 0 {
                    info!("dynamic baseline update refreshed {updated} device(s)");
                }
                Ok(())
            },
        ));
        handles.push(spawn_driver(
            "rule-refresh",
            Duration::from_secs(cfg.rule_refresh_interval_secs),
            engine.clone(),
            |engine| async move {
                engine.refresh_rules().await;
                Ok(())
            },
        ));
        handles.push(spawn_driver(
            "prediction",
            Duration::from_secs(cfg.prediction_interval_secs),
            engine.clone(),
            |engine| async move { prediction_tick(&engine).await },
        ));
        handles.push(spawn_driver(
            "motor-diagnosis",
            Duration::from_secs(cfg.motor_interval_secs.max(1)),
            engine.clone(),
            |engine| async move {
                engine.motor_faults.diagnose_all(now_ms()).await.map(|_| ())
            },
        ));
        if engine.config().cycle_detection.enabled {
            let cursors: Arc<Mutex<HashMap<String, TsMillis>>> =
                Arc::new(Mutex::new(HashMap::new()));
            handles.push(spawn_driver(
                "cycle-analysis",
                Duration::from_secs(cfg.cycle_interval_secs),
                engine.clone(),
                move |engine| {
                    let cursors = cursors.clone();
                    async move { cycle_tick(&engine, &cursors).await }
                },
            ));
        }
        handles.push(spawn_driver(
            "broadcast-ticker",
            Duration::from_millis(cfg.broadcast_tick_ms.max(100)),
            engine,
            |engine| async move {
                let timeout_ms = engine.config().scheduler.repository_timeout_ms;
                let latest =
                    with_deadline(timeout_ms, engine.stores().telemetry.latest(None, None)).await?;
                let published = engine.broadcaster.publish_points(&latest);
                if published > 0 {
                    debug!("broadcast ticker pushed {published} update(s)");
                }
                Ok(())
            },
        ));
        handles
    }
}

fn now_ms() -> TsMillis {
    Utc::now().timestamp_millis()
}

/// Default deadline applied to repository calls made from drivers
async fn with_deadline<T>(
    timeout_ms: u64,
    fut: impl std::future::Future<Output = im_common::Result<T>>,
) -> im_common::Result<T> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms.max(1)), fut).await {
        Ok(result) => result,
        Err(_) => Err(im_common::Error::Dependency(format!(
            "repository call exceeded {timeout_ms}ms"
        ))),
    }
}

/// Assess every enabled device with bounded fan-out, then evaluate alarm
/// rules against each device's latest values.
async fn assess_tick(engine: &Arc<Engine>) -> im_common::Result<()> {
    let now = now_ms();
    let timeout_ms = engine.config().scheduler.repository_timeout_ms;
    let devices = with_deadline(timeout_ms, engine.stores().devices.list()).await?;
    let limit = engine.config().scheduler.max_parallel_devices.max(1);
    let semaphore = Arc::new(Semaphore::new(limit));

    let mut tasks = Vec::new();
    for device in devices.into_iter().filter(|d| d.enabled) {
        let engine = engine.clone();
        let semaphore = semaphore.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore open");
            let device_id = device.device_id;
            match engine.assess_device(&device_id, now).await {
                Ok(Some(score)) => {
                    debug!("assessed {device_id}: index {} ({:?})", score.index, score.level)
                }
                Ok(None) => {}
                Err(e) => warn!("assessment failed for {device_id}: {e}"),
            }
            match engine.stores().telemetry.latest(Some(&device_id), None).await {
                Ok(latest) => {
                    if let Err(e) = engine.evaluator.evaluate_latest(&latest).await {
                        warn!("alarm evaluation failed for {device_id}: {e}");
                    }
                }
                Err(e) => warn!("latest query failed for {device_id}: {e}"),
            }
        }));
    }
    for task in tasks {
        if engine.cancellation_token().is_cancelled() {
            break;
        }
        let _ = task.await;
    }
    Ok(())
}

/// Trend, RUL, multi-scale and degradation on their shared cadence
async fn prediction_tick(engine: &Arc<Engine>) -> im_common::Result<()> {
    let now = now_ms();
    let devices = engine.stores().devices.list().await?;
    for device in devices.into_iter().filter(|d| d.enabled) {
        if engine.cancellation_token().is_cancelled() {
            return Ok(());
        }
        let device_id = &device.device_id;

        match engine.forecast_trends(device_id, now).await {
            Ok(forecasts) => {
                for f in forecasts.iter().filter(|f| f.alert_level.is_some()) {
                    info!(
                        "trend alert {:?} on {device_id}/{}: {:.1}h to threshold",
                        f.alert_level.expect("filtered"),
                        f.tag_id,
                        f.hours_to_threshold.unwrap_or_default()
                    );
                }
            }
            Err(e) => warn!("trend forecast failed for {device_id}: {e}"),
        }

        match engine.predict_rul(device_id, now).await {
            Ok(Some(p)) => debug!("RUL for {device_id}: {:?} risk {:?}", p.status, p.risk),
            Ok(None) => {}
            Err(e) => warn!("RUL prediction failed for {device_id}: {e}"),
        }

        if engine.config().multi_scale.enabled {
            match engine.assess_multi_scale(device_id, now).await {
                Ok(result) => debug!(
                    "multi-scale for {device_id}: composite {} trend {:?}",
                    result.composite, result.trend
                ),
                Err(e) if e.category() == "insufficient_data" => {}
                Err(e) => warn!("multi-scale assessment failed for {device_id}: {e}"),
            }
        }

        match engine.detect_degradation(device_id, now).await {
            Ok(findings) => {
                for finding in findings {
                    info!(
                        "degradation on {device_id}/{}: {:?} rate {:?}",
                        finding.tag_id, finding.kind, finding.daily_rate_percent
                    );
                }
            }
            Err(e) => warn!("degradation detection failed for {device_id}: {e}"),
        }
    }
    Ok(())
}

/// Advance each device's cycle cursor and analyze the newly closed range
async fn cycle_tick(
    engine: &Arc<Engine>,
    cursors: &Arc<Mutex<HashMap<String, TsMillis>>>,
) -> im_common::Result<()> {
    let now = now_ms();
    let lookback = engine.config().cycle_detection.max_cycle_seconds as i64 * 1000 * 2;
    let devices = engine.stores().devices.list().await?;
    for device in devices.into_iter().filter(|d| d.enabled) {
        if engine.cancellation_token().is_cancelled() {
            return Ok(());
        }
        let start = {
            let cursors = cursors.lock();
            cursors.get(&device.device_id).copied().unwrap_or(now - lookback)
        };
        match engine.cycles.analyze(&device.device_id, start, now).await {
            Ok(cycles) => {
                if let Some(last) = cycles.last() {
                    cursors.lock().insert(device.device_id.clone(), last.end_ts);
                    let anomalies = cycles.iter().filter(|c| c.is_anomaly).count();
                    debug!(
                        "{} cycle(s) for {} ({anomalies} anomalous)",
                        cycles.len(),
                        device.device_id
                    );
                }
            }
            Err(e) => warn!("cycle analysis failed for {}: {e}", device.device_id),
        }
    }
    Ok(())
}

/// Spawn one driver loop: tick, run, log failures, never die
fn spawn_driver<F, Fut>(
    name: &'static str,
    period: Duration,
    engine: Arc<Engine>,
    body: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<Engine>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = im_common::Result<()>> + Send,
{
    let cancel = engine.cancellation_token().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("driver '{name}' running every {period:?}");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("driver '{name}' stopped");
                    return;
                }
                _ = interval.tick() => {
                    match body(engine.clone()).await {
                        Ok(()) => engine.driver_health.record_success(name),
                        Err(im_common::Error::Cancelled) => return,
                        Err(e) => {
                            engine.driver_health.record_failure(name, &e.to_string());
                            warn!("driver '{name}' iteration failed ({}): {e}", e.category());
                        }
                    }
                }
            }
        }
    })
}
