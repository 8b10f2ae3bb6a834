//! Run configuration and the trajectory simulator.
//!
//! This module provides:
//! - [SimulationConfig]: the immutable, serializable description of one run, with JSON/YAML/TOML I/O
//! - [TrajectorySimulator]: validates a configuration and drives truth, observations and the filter
//! - [EstimationRecord] and [SimulationRun]: the per-step output sequence
//!
//! Each step `k` (time `(k + 1) * dt`) draws process noise from the first stream and advances the
//! truth, draws measurement noise from the second stream and synthesizes the observation, then runs
//! the filter predict and update and appends one record. A run either completes in full or reports the
//! step that failed; a partially filled sequence is never returned.

use crate::error::{EstimationError, NumericDriftWarning};
use crate::kalman::{CovarianceUpdate, DEFAULT_DRIFT_TOLERANCE, KalmanFilter};
use crate::linalg::is_symmetric_psd;
use crate::models::{MeasurementModel, MeasurementModelKind, ProcessModel, ProcessModelKind};
use crate::noise::{DEFAULT_MEASUREMENT_SEED, DEFAULT_PROCESS_SEED, NoiseSource};
use crate::StateEstimator;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Guards `floor(duration / dt)` against representation error (e.g. 1.0 / 0.01).
const STEP_COUNT_EPSILON: f64 = 1e-9;
/// Longest run a configuration may request.
pub const MAX_STEPS: usize = 1_000_000;

/// Where the ground truth comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthSource {
    /// Truth is propagated by the process model with sampled process noise.
    #[default]
    Model,
    /// Scalar truth `10 sin(t / 10) + t / 30`, tracked by the filter as a random walk.
    Sinusoid,
}

impl TruthSource {
    /// Closed-form truth at time `t` for [TruthSource::Sinusoid].
    pub fn sinusoid(t: f64) -> f64 {
        10.0 * (t / 10.0).sin() + t / 30.0
    }
    /// Time the true state of step `step` refers to.
    ///
    /// Model truth is advanced before it is observed, so step `k` sees `(k + 1) dt`.
    /// The sinusoid is sampled from `t = 0`.
    pub fn sample_time(&self, step: usize, dt: f64) -> f64 {
        match self {
            TruthSource::Model => (step + 1) as f64 * dt,
            TruthSource::Sinusoid => step as f64 * dt,
        }
    }
}

/// Immutable description of one simulation run.
///
/// Exactly one of `steps` and `duration` must be given; with `duration` the run
/// has `floor(duration / dt)` steps.
///
/// ## Examples
///
/// ```
/// use kalmanviz::sim::SimulationConfig;
///
/// let config = SimulationConfig {
///     process_noise: 0.05,
///     ..SimulationConfig::constant_demo()
/// };
/// assert!(config.validate().is_ok());
/// assert_eq!(config.step_count().unwrap(), 100);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub process_model: ProcessModelKind,
    #[serde(default)]
    pub measurement_model: MeasurementModelKind,
    /// Process noise intensity Q (> 0)
    pub process_noise: f64,
    /// Measurement noise intensity R (> 0)
    pub measurement_noise: f64,
    /// True initial state
    pub initial_state: Vec<f64>,
    /// Filter's initial estimate; defaults to the true initial state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_estimate: Option<Vec<f64>>,
    /// Initial covariance, row-major
    pub initial_covariance: Vec<Vec<f64>>,
    /// Time step in seconds
    pub dt: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default = "default_process_seed")]
    pub process_seed: u64,
    #[serde(default = "default_measurement_seed")]
    pub measurement_seed: u64,
    #[serde(default)]
    pub truth: TruthSource,
    #[serde(default)]
    pub covariance_update: CovarianceUpdate,
}

fn default_process_seed() -> u64 {
    DEFAULT_PROCESS_SEED
}
fn default_measurement_seed() -> u64 {
    DEFAULT_MEASUREMENT_SEED
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig::constant_demo()
    }
}

impl SimulationConfig {
    /// Scalar demo: a sinusoidal position tracked by a random-walk filter.
    ///
    /// The sinusoid consumes no process noise, so observations come from the
    /// seed-42 stream.
    pub fn constant_demo() -> Self {
        SimulationConfig {
            process_model: ProcessModelKind::Constant,
            measurement_model: MeasurementModelKind::Identity,
            process_noise: 0.01,
            measurement_noise: 0.1,
            initial_state: vec![0.0],
            initial_estimate: None,
            initial_covariance: vec![vec![1.0]],
            dt: 1.0,
            steps: Some(100),
            duration: None,
            process_seed: DEFAULT_PROCESS_SEED,
            measurement_seed: DEFAULT_PROCESS_SEED,
            truth: TruthSource::Sinusoid,
            covariance_update: CovarianceUpdate::Standard,
        }
    }
    /// Pendulum demo: an EKF tracking `[θ, ω]` from the horizontal projection `sin θ`.
    pub fn pendulum_demo() -> Self {
        SimulationConfig {
            process_model: ProcessModelKind::Pendulum {
                gravity: crate::models::STANDARD_GRAVITY,
            },
            measurement_model: MeasurementModelKind::SineProjection,
            process_noise: 0.01,
            measurement_noise: 0.1,
            initial_state: vec![1.0, -0.1],
            initial_estimate: None,
            initial_covariance: vec![vec![0.1, 0.0], vec![0.0, 0.1]],
            dt: 0.01,
            steps: None,
            duration: Some(10.0),
            process_seed: DEFAULT_PROCESS_SEED,
            measurement_seed: DEFAULT_MEASUREMENT_SEED,
            truth: TruthSource::Model,
            covariance_update: CovarianceUpdate::Standard,
        }
    }
    /// State dimension n of the run.
    pub fn state_size(&self) -> usize {
        self.initial_state.len()
    }
    /// Number of steps the run will produce, at most [MAX_STEPS].
    pub fn step_count(&self) -> Result<usize, EstimationError> {
        let steps = match (self.steps, self.duration) {
            (Some(steps), None) => steps,
            (None, Some(duration)) => {
                if !duration.is_finite() || duration < 0.0 {
                    return Err(EstimationError::Configuration(format!(
                        "duration must be finite and non-negative, got {duration}"
                    )));
                }
                let ratio = duration / self.dt + STEP_COUNT_EPSILON;
                if !ratio.is_finite() || ratio >= (MAX_STEPS + 1) as f64 {
                    return Err(EstimationError::Configuration(format!(
                        "duration {duration} at dt = {} exceeds {MAX_STEPS} steps",
                        self.dt
                    )));
                }
                ratio.floor() as usize
            }
            (Some(_), Some(_)) => {
                return Err(EstimationError::Configuration(
                    "specify either steps or duration, not both".to_string(),
                ));
            }
            (None, None) => {
                return Err(EstimationError::Configuration(
                    "one of steps or duration is required".to_string(),
                ));
            }
        };
        if steps > MAX_STEPS {
            return Err(EstimationError::Configuration(format!(
                "{steps} steps exceeds the limit of {MAX_STEPS}"
            )));
        }
        Ok(steps)
    }
    /// Initial covariance as a matrix.
    pub fn initial_covariance_matrix(&self) -> Result<DMatrix<f64>, EstimationError> {
        let n = self.state_size();
        if self.initial_covariance.len() != n {
            return Err(EstimationError::DimensionMismatch {
                context: "initial covariance rows",
                expected: n,
                found: self.initial_covariance.len(),
            });
        }
        for row in &self.initial_covariance {
            if row.len() != n {
                return Err(EstimationError::DimensionMismatch {
                    context: "initial covariance columns",
                    expected: n,
                    found: row.len(),
                });
            }
        }
        let flat: Vec<f64> = self.initial_covariance.iter().flatten().copied().collect();
        Ok(DMatrix::from_row_slice(n, n, &flat))
    }
    /// Eagerly check every field; a run never starts from an invalid configuration.
    pub fn validate(&self) -> Result<(), EstimationError> {
        if !(self.process_noise.is_finite() && self.process_noise > 0.0) {
            return Err(EstimationError::Configuration(format!(
                "process noise must be positive, got {}",
                self.process_noise
            )));
        }
        if !(self.measurement_noise.is_finite() && self.measurement_noise > 0.0) {
            return Err(EstimationError::Configuration(format!(
                "measurement noise must be positive, got {}",
                self.measurement_noise
            )));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(EstimationError::Configuration(format!(
                "time step must be positive, got {}",
                self.dt
            )));
        }
        let n = self.state_size();
        if n == 0 {
            return Err(EstimationError::Configuration(
                "initial state must not be empty".to_string(),
            ));
        }
        if self.initial_state.iter().any(|v| !v.is_finite()) {
            return Err(EstimationError::Configuration(
                "initial state must be finite".to_string(),
            ));
        }
        if let Some(estimate) = &self.initial_estimate
            && estimate.len() != n
        {
            return Err(EstimationError::DimensionMismatch {
                context: "initial estimate",
                expected: n,
                found: estimate.len(),
            });
        }
        if self.truth == TruthSource::Sinusoid && n != 1 {
            return Err(EstimationError::DimensionMismatch {
                context: "sinusoid truth",
                expected: 1,
                found: n,
            });
        }
        let p0 = self.initial_covariance_matrix()?;
        let tolerance = DEFAULT_DRIFT_TOLERANCE * (1.0 + p0.amax());
        if p0.iter().any(|v| !v.is_finite()) || !is_symmetric_psd(&p0, tolerance) {
            return Err(EstimationError::Configuration(
                "initial covariance must be finite, symmetric and positive semi-definite"
                    .to_string(),
            ));
        }
        self.process_model.build(n)?;
        self.step_count()?;
        Ok(())
    }
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }
}

fn extension(p: &Path) -> Option<String> {
    p.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported_extension(p: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unsupported config extension for {}", p.display()),
    )
}

/// One step of a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EstimationRecord {
    pub step: usize,
    /// Time of the true state, see [TruthSource::sample_time]
    pub time: f64,
    pub true_state: DVector<f64>,
    pub observation: DVector<f64>,
    pub predicted_state: DVector<f64>,
    pub predicted_covariance: DMatrix<f64>,
    pub estimated_state: DVector<f64>,
    pub estimated_covariance: DMatrix<f64>,
    /// Observation minus the predicted observation
    pub innovation: DVector<f64>,
    pub kalman_gain: DMatrix<f64>,
}

impl EstimationRecord {
    /// Standard deviation of one component of the estimate.
    pub fn uncertainty(&self, component: usize) -> f64 {
        self.estimated_covariance[(component, component)].max(0.0).sqrt()
    }
    /// Standard deviation of one component of the prediction.
    pub fn predicted_uncertainty(&self, component: usize) -> f64 {
        self.predicted_covariance[(component, component)].max(0.0).sqrt()
    }
    /// Estimation error (estimate minus truth).
    pub fn error(&self) -> DVector<f64> {
        &self.estimated_state - &self.true_state
    }
}

/// Output of a completed run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SimulationRun {
    pub records: Vec<EstimationRecord>,
    /// Covariance repairs that happened along the way
    pub warnings: Vec<NumericDriftWarning>,
}

impl SimulationRun {
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    /// Root-mean-square estimation error of one state component.
    pub fn rmse(&self, component: usize) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .records
            .iter()
            .map(|r| r.error()[component].powi(2))
            .sum();
        (sum / self.records.len() as f64).sqrt()
    }
}

/// Drives truth propagation, observation synthesis and the filter over one run.
///
/// A simulator is consumed by [TrajectorySimulator::run]; running again with a
/// changed configuration means building a new simulator.
#[derive(Debug)]
pub struct TrajectorySimulator {
    config: SimulationConfig,
    process_noise: NoiseSource,
    measurement_noise: NoiseSource,
    process_model: Box<dyn ProcessModel + Send>,
    measurement_model: Box<dyn MeasurementModel + Send>,
    filter: KalmanFilter,
    step_count: usize,
}

impl TrajectorySimulator {
    /// Validate `config` and set up noise streams, models and the filter.
    pub fn new(config: SimulationConfig) -> Result<Self, EstimationError> {
        let process_model = config.process_model.build(config.state_size())?;
        let measurement_model = config.measurement_model.build();
        TrajectorySimulator::with_models(config, process_model, measurement_model)
    }
    /// Like [TrajectorySimulator::new] but with caller-supplied models in place of
    /// the ones the configuration names.
    ///
    /// The configuration is still validated in full; the models must agree with
    /// its state size.
    pub fn with_models(
        config: SimulationConfig,
        process_model: Box<dyn ProcessModel + Send>,
        measurement_model: Box<dyn MeasurementModel + Send>,
    ) -> Result<Self, EstimationError> {
        config.validate()?;
        let n = config.state_size();
        if process_model.dimension() != n {
            return Err(EstimationError::DimensionMismatch {
                context: "process model",
                expected: n,
                found: process_model.dimension(),
            });
        }
        let m = measurement_model.dimension(n);
        let initial_estimate = DVector::from_vec(
            config
                .initial_estimate
                .clone()
                .unwrap_or_else(|| config.initial_state.clone()),
        );
        let filter = KalmanFilter::new(
            initial_estimate,
            config.initial_covariance_matrix()?,
            process_model.noise_covariance(config.process_noise, config.dt),
            measurement_model.noise_covariance(config.measurement_noise, n),
        )?
        .with_covariance_update(config.covariance_update);
        if filter.measurement_noise().nrows() != m {
            return Err(EstimationError::DimensionMismatch {
                context: "measurement noise",
                expected: m,
                found: filter.measurement_noise().nrows(),
            });
        }
        let step_count = config.step_count()?;
        Ok(TrajectorySimulator {
            process_noise: NoiseSource::new(config.process_seed),
            measurement_noise: NoiseSource::new(config.measurement_seed),
            process_model,
            measurement_model,
            filter,
            step_count,
            config,
        })
    }
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }
    pub fn step_count(&self) -> usize {
        self.step_count
    }
    /// Run every step from t = 0 and return the complete record sequence.
    ///
    /// # Errors
    /// The first numeric failure aborts the run; the error names the failing step.
    pub fn run(mut self) -> Result<SimulationRun, EstimationError> {
        let dt = self.config.dt;
        let n = self.config.state_size();
        let m = self.measurement_model.dimension(n);
        let process_std = self.process_model.noise_std(self.config.process_noise);
        let measurement_std = self.config.measurement_noise.sqrt();
        debug!(
            "starting run: {:?} / {:?}, {} steps, dt = {}, Q = {}, R = {}",
            self.process_model,
            self.measurement_model,
            self.step_count,
            dt,
            self.config.process_noise,
            self.config.measurement_noise
        );

        let mut truth = DVector::from_vec(self.config.initial_state.clone());
        let mut run = SimulationRun {
            records: Vec::with_capacity(self.step_count),
            warnings: Vec::new(),
        };
        for step in 0..self.step_count {
            let time = self.config.truth.sample_time(step, dt);
            truth = match self.config.truth {
                TruthSource::Model => {
                    let w = self
                        .process_noise
                        .gaussian_vector(self.process_model.noise_dimension(), process_std);
                    self.process_model.advance(&truth, dt, &w)
                }
                TruthSource::Sinusoid => DVector::from_element(1, TruthSource::sinusoid(time)),
            };
            let v = self.measurement_noise.gaussian_vector(m, measurement_std);
            let observation = self.measurement_model.observe(&truth, &v);

            self.filter.predict(self.process_model.as_ref(), dt)?;
            let predicted_state = self.filter.get_estimate();
            let predicted_covariance = self.filter.get_certainty();
            let outcome = self
                .filter
                .update(self.measurement_model.as_ref(), &observation)?;
            if let Some(warning) = outcome.warning {
                run.warnings.push(warning);
            }
            run.records.push(EstimationRecord {
                step,
                time,
                true_state: truth.clone(),
                observation,
                predicted_state,
                predicted_covariance,
                estimated_state: self.filter.get_estimate(),
                estimated_covariance: self.filter.get_certainty(),
                innovation: outcome.innovation,
                kalman_gain: outcome.gain,
            });
        }
        info!(
            "run complete: {} records, {} covariance repairs",
            run.records.len(),
            run.warnings.len()
        );
        Ok(run)
    }
}

/// Validate `config` and run it to completion.
pub fn simulate(config: &SimulationConfig) -> Result<SimulationRun, EstimationError> {
    TrajectorySimulator::new(config.clone())?.run()
}
