//! Engine orchestrator
//!
//! Builds every service over the shared repositories, exposes the ingest
//! path and on-demand assessments, and owns the scheduler's driver tasks.

use crate::broadcast::Broadcaster;
use crate::health::{DriverHealthLevel, DriverHealthRegistry, DriverReport};
use crate::scheduler::Scheduler;
use chrono::{DateTime, Utc};
use im_alarms::{AlarmEvaluator, GroupAggregator};
use im_assess::predict::{
    DegradationFinding, MultiScaleResult, RulPrediction, TrendForecast,
};
use im_assess::{
    BaselineService, CorrelationAnalyzer, DegradationDetector, FeatureExtractor, HealthCalculator,
    MultiScalePredictor, RulPredictor, TagImportanceService, TrendPredictor,
};
use im_common::health::HealthScore;
use im_common::motor::DiagnosisResult;
use im_common::{Config, Result, TelemetryPoint, TsMillis};
use im_cycles::{CycleBaselineLearner, CycleDetector};
use im_hub::BroadcastHub;
use im_motor::{FaultDetector, MotorBaselineLearner};
use im_store::Stores;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Snapshot of the engine's runtime state
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub started_at: DateTime<Utc>,
    pub running: bool,
    pub driver_count: usize,
    pub connection_count: usize,
    pub total_lag: u64,
    pub driver_health: DriverHealthLevel,
    pub drivers: Vec<DriverReport>,
}

pub struct Engine {
    config: Config,
    stores: Stores,
    pub(crate) importance: Arc<TagImportanceService>,
    pub(crate) extractor: Arc<FeatureExtractor>,
    pub(crate) baselines: Arc<BaselineService>,
    pub(crate) health: Arc<HealthCalculator>,
    pub(crate) correlation: Arc<CorrelationAnalyzer>,
    pub(crate) multi_scale: Arc<MultiScalePredictor>,
    pub(crate) degradation: Arc<DegradationDetector>,
    pub(crate) trend: Arc<TrendPredictor>,
    pub(crate) rul: Arc<RulPredictor>,
    pub(crate) evaluator: Arc<AlarmEvaluator>,
    pub(crate) groups: Arc<GroupAggregator>,
    pub(crate) cycles: Arc<CycleDetector>,
    pub(crate) cycle_learner: Arc<CycleBaselineLearner>,
    pub(crate) motor_faults: Arc<FaultDetector>,
    pub(crate) motor_learner: Arc<MotorBaselineLearner>,
    pub(crate) broadcaster: Arc<Broadcaster>,
    pub(crate) driver_health: Arc<DriverHealthRegistry>,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
    drivers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build the engine over a store set. Fails fast on invalid
    /// configuration and primes the rule caches.
    pub async fn new(config: Config, stores: Stores) -> Result<Arc<Engine>> {
        config.validate()?;
        info!("initializing assessment engine");

        let cancel = CancellationToken::new();
        let hub = Arc::new(BroadcastHub::new(config.hub.clone()));
        let broadcaster = Arc::new(Broadcaster::new(hub));

        let importance = Arc::new(TagImportanceService::new(
            stores.importance_rules.clone(),
            config.importance.default_importance,
        ));
        let extractor =
            Arc::new(FeatureExtractor::new(stores.telemetry.clone(), stores.devices.clone()));
        let baselines = Arc::new(BaselineService::new(
            stores.telemetry.clone(),
            stores.devices.clone(),
            stores.health_baselines.clone(),
            config.dynamic_baseline.clone(),
        ));
        let health = Arc::new(HealthCalculator::new(
            importance.clone(),
            stores.health_baselines.clone(),
            stores.alarms.clone(),
            config.health.clone(),
        ));
        let correlation = Arc::new(CorrelationAnalyzer::new(
            stores.correlation_rules.clone(),
            stores.telemetry.clone(),
        ));
        let multi_scale = Arc::new(MultiScalePredictor::new(
            extractor.clone(),
            health.clone(),
            config.multi_scale.clone(),
        ));
        let degradation = Arc::new(DegradationDetector::new(
            stores.telemetry.clone(),
            config.degradation.clone(),
        ));
        let trend = Arc::new(TrendPredictor::new(
            stores.telemetry.clone(),
            stores.alarm_rules.clone(),
            config.trend_prediction.clone(),
        ));
        let rul =
            Arc::new(RulPredictor::new(stores.health_snapshots.clone(), config.rul_prediction.clone()));

        let groups =
            Arc::new(GroupAggregator::new(stores.alarms.clone(), stores.alarm_groups.clone()));
        let evaluator = Arc::new(AlarmEvaluator::new(stores.alarm_rules.clone(), groups.clone()));

        let cycles = Arc::new(CycleDetector::new(
            stores.telemetry.clone(),
            stores.work_cycles.clone(),
            stores.cycle_baselines.clone(),
            config.cycle_detection.clone(),
        ));
        let cycle_learner = Arc::new(CycleBaselineLearner::new(
            stores.telemetry.clone(),
            stores.work_cycles.clone(),
            stores.cycle_baselines.clone(),
            config.cycle_detection.clone(),
        ));

        let motor_faults = Arc::new(FaultDetector::new(
            stores.telemetry.clone(),
            stores.motor_instances.clone(),
            stores.motor_models.clone(),
            stores.motor_mappings.clone(),
            stores.operation_modes.clone(),
            stores.baseline_profiles.clone(),
            config.fault_detection.clone(),
        ));
        let motor_learner = MotorBaselineLearner::new(
            stores.telemetry.clone(),
            stores.motor_instances.clone(),
            stores.motor_models.clone(),
            stores.motor_mappings.clone(),
            stores.baseline_profiles.clone(),
            config.fault_detection.clone(),
            cancel.child_token(),
        );

        let engine = Arc::new(Engine {
            config,
            stores,
            importance,
            extractor,
            baselines,
            health,
            correlation,
            multi_scale,
            degradation,
            trend,
            rul,
            evaluator,
            groups,
            cycles,
            cycle_learner,
            motor_faults,
            motor_learner,
            broadcaster,
            driver_health: Arc::new(DriverHealthRegistry::new()),
            cancel,
            started_at: Utc::now(),
            drivers: Mutex::new(Vec::new()),
        });

        engine.refresh_rules().await;
        info!("engine initialized");
        Ok(engine)
    }

    /// Spawn the periodic drivers
    pub fn start(self: &Arc<Engine>) {
        let handles = Scheduler::spawn_all(self.clone());
        let mut drivers = self.drivers.lock();
        if !drivers.is_empty() {
            warn!("engine already started");
            return;
        }
        *drivers = handles;
        info!("engine started with {} driver(s)", drivers.len());
    }

    /// Cooperative shutdown: cancel the process token and detach drivers
    pub async fn shutdown(&self) {
        info!("shutting down engine");
        self.cancel.cancel();
        for handle in self.drivers.lock().drain(..) {
            handle.abort();
        }
        info!("engine shutdown complete");
    }

    pub fn status(&self) -> EngineStatus {
        let hub = self.broadcaster.hub();
        EngineStatus {
            started_at: self.started_at,
            running: !self.cancel.is_cancelled(),
            driver_count: self.drivers.lock().len(),
            connection_count: hub.connection_count(),
            total_lag: hub.total_lag(),
            driver_health: self.driver_health.overall(),
            drivers: self.driver_health.report(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        self.broadcaster.hub()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn alarm_groups(&self) -> &Arc<GroupAggregator> {
        &self.groups
    }

    pub fn motor_learner(&self) -> &Arc<MotorBaselineLearner> {
        &self.motor_learner
    }

    pub fn latest_motor_diagnosis(&self, instance_id: &str) -> Option<DiagnosisResult> {
        self.motor_faults.latest(instance_id)
    }

    /// Ingest a batch from an edge collector: append, evaluate matching
    /// alarm rules, and push fresh samples to subscribers.
    pub async fn ingest(&self, batch: Vec<TelemetryPoint>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let appended = self.stores.telemetry.append(batch.clone()).await?;
        if let Err(e) = self.evaluator.evaluate_latest(&batch).await {
            warn!("alarm evaluation on ingest failed: {e}");
        }
        self.broadcaster.publish_points(&batch);
        Ok(appended)
    }

    /// Reload every rule-driven cache
    pub async fn refresh_rules(&self) {
        if let Err(e) = self.importance.refresh().await {
            warn!("importance refresh failed: {e}");
        }
        if let Err(e) = self.correlation.refresh().await {
            warn!("correlation rule refresh failed: {e}");
        }
        if let Err(e) = self.evaluator.refresh().await {
            warn!("alarm rule refresh failed: {e}");
        }
    }

    /// Assess one device now: features, health, correlation penalties,
    /// snapshot. Returns `None` when the window holds no telemetry.
    pub async fn assess_device(
        &self,
        device_id: &str,
        now: TsMillis,
    ) -> Result<Option<HealthScore>> {
        let window = self.config.health.window_minutes;
        let Some(features) = self.extractor.extract(device_id, window, now).await? else {
            debug!("no telemetry for {device_id}, skipping assessment");
            return Ok(None);
        };
        let mut score = self.health.assess(&features).await?;
        match self.correlation.analyze(device_id, window, now).await {
            Ok(anomalies) if !anomalies.is_empty() => {
                self.health.apply_correlation_penalties(&mut score, &anomalies);
            }
            Ok(_) => {}
            Err(e) => warn!("correlation analysis failed for {device_id}: {e}"),
        }
        self.stores.health_snapshots.append(score.clone()).await?;
        Ok(Some(score))
    }

    /// On-demand predictors, used by the drivers and by external callers
    pub async fn predict_rul(&self, device_id: &str, now: TsMillis) -> Result<Option<RulPrediction>> {
        self.rul.predict(device_id, now).await
    }

    pub async fn forecast_trends(&self, device_id: &str, now: TsMillis) -> Result<Vec<TrendForecast>> {
        self.trend.forecast_device(device_id, now).await
    }

    pub async fn assess_multi_scale(&self, device_id: &str, now: TsMillis) -> Result<MultiScaleResult> {
        self.multi_scale.assess(device_id, now).await
    }

    pub async fn detect_degradation(
        &self,
        device_id: &str,
        now: TsMillis,
    ) -> Result<Vec<DegradationFinding>> {
        self.degradation.detect(device_id, now).await
    }

    pub async fn diagnose_motor(&self, instance_id: &str, now: TsMillis) -> Result<DiagnosisResult> {
        self.motor_faults.diagnose(instance_id, now).await
    }

    pub async fn learn_baseline(&self, device_id: &str, hours: f64, now: TsMillis) -> Result<()> {
        self.baselines.learn(device_id, hours, now).await.map(|_| ())
    }

    pub async fn learn_cycle_baselines(
        &self,
        device_id: &str,
        start: TsMillis,
        end: TsMillis,
    ) -> Result<Vec<im_common::cycle::CycleBaseline>> {
        self.cycle_learner.learn_all(device_id, start, end).await
    }
}
