//! Motor baseline profile learning
//!
//! Learns per-(mode, parameter) statistics from scaled telemetry, captures a
//! frequency profile for currents, and exposes an online Welford update for
//! incremental refresh. Long-running learns publish state into an in-memory
//! task map whose entries expire five minutes after completion.

use crate::spectrum::{bearing_frequencies, Spectrum, SpectrumFeatures};
use chrono::Utc;
use im_common::config::FaultDetectionConfig;
use im_common::motor::{
    BaselineProfile, FrequencyProfile, MotorParameter, FREQUENCY_PROFILE_VERSION,
};
use im_common::stats::{self, EPSILON};
use im_common::{Error, Result, TsMillis};
use im_store::{
    BaselineProfileRepository, MotorInstanceRepository, MotorMappingRepository,
    MotorModelRepository, TelemetryRepository,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Completed task entries are swept this long after completion
const TASK_TTL: Duration = Duration::from_secs(300);

/// Assumed supply frequency when no Frequency mapping exists
const DEFAULT_SUPPLY_HZ: f64 = 50.0;

const MAX_LEARNING_POINTS: usize = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Completed,
    Failed,
}

/// State of one background learning task
#[derive(Debug, Clone)]
pub struct LearningTask {
    pub task_id: String,
    pub instance_id: String,
    pub mode_id: String,
    pub state: TaskState,
    pub message: String,
    pub started: Instant,
    pub completed: Option<Instant>,
}

/// Online mean/variance accumulator
#[derive(Debug, Clone, Copy, Default)]
pub struct Welford {
    pub count: u64,
    pub mean: f64,
    m2: f64,
}

impl Welford {
    pub fn from_profile(profile: &BaselineProfile) -> Self {
        let variance = profile.std_dev * profile.std_dev;
        Welford {
            count: profile.sample_count,
            mean: profile.mean,
            m2: variance * profile.sample_count.saturating_sub(1) as f64,
        }
    }

    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    /// Fold the accumulator back into a profile, refreshing mean, spread,
    /// bounds and confidence
    pub fn apply_to(&self, profile: &mut BaselineProfile, value: f64) {
        profile.mean = self.mean;
        profile.std_dev = self.std_dev();
        profile.min = profile.min.min(value);
        profile.max = profile.max.max(value);
        profile.sample_count = self.count;
        profile.confidence = confidence(self.mean, self.std_dev(), self.count);
        profile.updated_utc = Utc::now();
    }
}

fn confidence(mean: f64, std_dev: f64, count: u64) -> f64 {
    let spread_term = if mean.abs() < EPSILON {
        0.0
    } else {
        1.0 - (std_dev / mean.abs()).min(1.0)
    };
    let volume_term = (count as f64 / 10_000.0).min(1.0);
    (0.6 * spread_term + 0.4 * volume_term) * 100.0
}

pub struct MotorBaselineLearner {
    telemetry: Arc<dyn TelemetryRepository>,
    instances: Arc<dyn MotorInstanceRepository>,
    models: Arc<dyn MotorModelRepository>,
    mappings: Arc<dyn MotorMappingRepository>,
    profiles: Arc<dyn BaselineProfileRepository>,
    config: FaultDetectionConfig,
    shutdown: CancellationToken,
    tasks: Arc<Mutex<HashMap<String, LearningTask>>>,
}

impl MotorBaselineLearner {
    pub fn new(
        telemetry: Arc<dyn TelemetryRepository>,
        instances: Arc<dyn MotorInstanceRepository>,
        models: Arc<dyn MotorModelRepository>,
        mappings: Arc<dyn MotorMappingRepository>,
        profiles: Arc<dyn BaselineProfileRepository>,
        config: FaultDetectionConfig,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(MotorBaselineLearner {
            telemetry,
            instances,
            models,
            mappings,
            profiles,
            config,
            shutdown,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Learn the profile for one (mode, parameter) from the given range
    pub async fn learn_profile(
        &self,
        instance_id: &str,
        mode_id: &str,
        parameter: MotorParameter,
        start: TsMillis,
        end: TsMillis,
    ) -> Result<BaselineProfile> {
        let instance = self.instances.get(instance_id).await?;
        let mapping = self
            .mappings
            .list_for_instance(instance_id)
            .await?
            .into_iter()
            .find(|m| m.parameter == parameter)
            .ok_or_else(|| {
                Error::NotFound(format!("no mapping for {parameter:?} on instance {instance_id}"))
            })?;

        let points = self
            .telemetry
            .query_simple(&instance.device_id, Some(&mapping.tag_id), start, end, MAX_LEARNING_POINTS)
            .await?;
        let samples: Vec<(TsMillis, f64)> = points
            .iter()
            .filter_map(|p| p.value.as_f64().map(|v| (p.ts, mapping.apply(v))))
            .collect();
        if samples.len() < self.config.min_samples {
            return Err(Error::InsufficientData(format!(
                "{} samples for {parameter:?}, need {}",
                samples.len(),
                self.config.min_samples
            )));
        }

        let values: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mean = stats::mean(&values);
        let std_dev = stats::std_dev(&values);
        let frequency_profile = if parameter.is_current() {
            self.frequency_profile(&instance.model_id, &samples).await?
        } else {
            None
        };

        let profile = BaselineProfile {
            instance_id: instance_id.to_string(),
            mode_id: mode_id.to_string(),
            parameter,
            mean,
            std_dev,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            median: stats::percentile_sorted(&sorted, 0.5),
            p05: stats::percentile_sorted(&sorted, 0.05),
            p95: stats::percentile_sorted(&sorted, 0.95),
            sample_count: values.len() as u64,
            confidence: confidence(mean, std_dev, values.len() as u64),
            frequency_profile,
            updated_utc: Utc::now(),
        };
        self.profiles.save(profile.clone()).await?;
        debug!("profile learned for {instance_id}/{mode_id}/{parameter:?}: n={}", profile.sample_count);
        Ok(profile)
    }

    /// Learn every mapped parameter of an instance for a mode, isolating
    /// per-parameter failures. Returns the number of profiles learned.
    pub async fn learn_instance(
        &self,
        instance_id: &str,
        mode_id: &str,
        start: TsMillis,
        end: TsMillis,
    ) -> Result<usize> {
        let mappings = self.mappings.list_for_instance(instance_id).await?;
        if mappings.is_empty() {
            return Err(Error::NotFound(format!("instance {instance_id} has no mappings")));
        }
        let mut learned = 0;
        for mapping in mappings {
            if self.shutdown.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.learn_profile(instance_id, mode_id, mapping.parameter, start, end).await {
                Ok(_) => learned += 1,
                Err(Error::InsufficientData(reason)) => {
                    debug!("skipping {:?}: {reason}", mapping.parameter)
                }
                Err(e) => warn!("profile learning failed for {:?}: {e}", mapping.parameter),
            }
        }
        Ok(learned)
    }

    /// Kick off a background learn and return the task id. The task
    /// survives the caller's cancellation but stops on service shutdown.
    pub fn start_learning(
        self: &Arc<Self>,
        instance_id: String,
        mode_id: String,
        start: TsMillis,
        end: TsMillis,
    ) -> String {
        self.sweep_tasks();
        let task_id = Uuid::new_v4().to_string();
        {
            let mut tasks = self.tasks.lock();
            tasks.insert(
                task_id.clone(),
                LearningTask {
                    task_id: task_id.clone(),
                    instance_id: instance_id.clone(),
                    mode_id: mode_id.clone(),
                    state: TaskState::Running,
                    message: "learning".into(),
                    started: Instant::now(),
                    completed: None,
                },
            );
        }

        let learner = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = learner.learn_instance(&instance_id, &mode_id, start, end) => result,
                _ = learner.shutdown.cancelled() => Err(Error::Cancelled),
            };
            let mut tasks = learner.tasks.lock();
            if let Some(task) = tasks.get_mut(&id) {
                task.completed = Some(Instant::now());
                match outcome {
                    Ok(count) => {
                        task.state = TaskState::Completed;
                        task.message = format!("{count} profile(s) learned");
                        info!("baseline learning {id} finished: {count} profile(s)");
                    }
                    Err(Error::Cancelled) => {
                        task.state = TaskState::Failed;
                        task.message = "cancelled by shutdown".into();
                    }
                    Err(e) => {
                        task.state = TaskState::Failed;
                        task.message = e.to_string();
                        warn!("baseline learning {id} failed: {e}");
                    }
                }
            }
        });
        task_id
    }

    pub fn task(&self, task_id: &str) -> Option<LearningTask> {
        self.tasks.lock().get(task_id).cloned()
    }

    /// Drop completed entries older than the TTL; runs lazily on each start
    fn sweep_tasks(&self) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, t| match t.completed {
            Some(done) => done.elapsed() < TASK_TTL,
            None => true,
        });
    }

    async fn frequency_profile(
        &self,
        model_id: &str,
        samples: &[(TsMillis, f64)],
    ) -> Result<Option<FrequencyProfile>> {
        let span_ms = samples.last().map(|s| s.0).unwrap_or(0)
            - samples.first().map(|s| s.0).unwrap_or(0);
        if span_ms <= 0 {
            return Ok(None);
        }
        let sample_rate_hz = (samples.len() as f64 - 1.0) / (span_ms as f64 / 1000.0);
        let values: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
        let spectrum = Spectrum::compute(&values, sample_rate_hz);

        let model = self.models.get(model_id).await?;
        let shaft_hz = model.rated_speed_rpm / 60.0;
        let bearing = bearing_frequencies(&model.bearing, shaft_hz);

        Ok(SpectrumFeatures::extract(&spectrum, DEFAULT_SUPPLY_HZ, Some(bearing)).map(
            |f| FrequencyProfile {
                version: FREQUENCY_PROFILE_VERSION,
                sample_rate_hz,
                fundamental_amplitude: f.fundamental_amplitude,
                harmonic2_amplitude: f.harmonic2_amplitude,
                harmonic3_amplitude: f.harmonic3_amplitude,
                thd_percent: f.thd_percent,
                low_band_energy: f.low_band_energy,
                mid_band_energy: f.mid_band_energy,
                high_band_energy: f.high_band_energy,
                bpfo_amplitude: f.bearing.map(|b| b.bpfo).unwrap_or(0.0),
                bpfi_amplitude: f.bearing.map(|b| b.bpfi).unwrap_or(0.0),
                bsf_amplitude: f.bearing.map(|b| b.bsf).unwrap_or(0.0),
                ftf_amplitude: f.bearing.map(|b| b.ftf).unwrap_or(0.0),
                noise_floor: f.noise_floor,
            },
        ))
    }
}
