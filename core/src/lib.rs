//! Recursive Bayesian state estimation for interactive filter demonstrations
//!
//! This crate provides a discrete Kalman filter and its linearized ("extended") variant together with
//! a deterministic trajectory simulator that produces, for every time step, the hidden true state, a noisy
//! observation, the filter prediction and the filter estimate with its uncertainty. It is meant to sit behind
//! a charting front-end: the front-end supplies an immutable [sim::SimulationConfig], the crate returns an
//! ordered sequence of [sim::EstimationRecord]s, and [chart] flattens those records into rows keyed by field
//! name. Changing any parameter means running a new simulation; nothing is recomputed incrementally.
//!
//! This crate is primarily built off of:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the linear algebra tools for the filters.
//! - [`serde`](https://crates.io/crates/serde): Configuration and record (de)serialization.
//!
//! ## Crate overview
//!
//! - [noise]: Seeded linear-congruential uniform generator with Box–Muller Gaussian samples.
//! - [models]: Process models (constant random walk, pendulum) and measurement models (identity, sine projection)
//!   with their Jacobians.
//! - [kalman]: The predict/update recursion ([kalman::KalmanFilter]).
//! - [linalg]: Covariance conditioning helpers and the innovation inverse.
//! - [sim]: Run configuration and the trajectory simulator.
//! - [chart]: Flat chart rows with display toggles.
//! - [gaussian]: Scalar Gaussian beliefs and the prior → prediction → posterior walkthrough.
//! - [logging]: `env_logger` setup for the command line host.
//!
//! ## The filter recursion
//!
//! Given a process model $f$ with Jacobian $F$ and a measurement model $h$ with Jacobian $H$, every step
//! first predicts
//!
//! $$
//! \bar{x} = f(x), \qquad \bar{P} = F P F^T + Q
//! $$
//!
//! and then corrects with the observation $z$:
//!
//! $$
//! K = \bar{P} H^T (H \bar{P} H^T + R)^{-1}, \qquad x = \bar{x} + K (z - h(\bar{x})), \qquad P = \bar{P} - K H \bar{P}
//! $$
//!
//! For linear models the Jacobians are exact and this is the classic Kalman filter; for the pendulum and the
//! sine projection they are evaluated at the current estimate, which gives the extended Kalman filter.
//!
//! ## Determinism
//!
//! A run is a pure function of its configuration: initial conditions, noise intensities, model choice and the
//! two seeds of the process and measurement noise streams. Each run owns all of its state, so independent runs
//! may execute on different threads without any synchronization.
pub mod chart;
pub mod error;
pub mod gaussian;
pub mod kalman;
pub mod linalg;
pub mod logging;
pub mod models;
pub mod noise;
pub mod sim;

use nalgebra::{DMatrix, DVector};

pub use crate::error::{EstimationError, NumericDriftWarning};
pub use crate::kalman::{CovarianceUpdate, KalmanFilter, UpdateOutcome};
pub use crate::models::{MeasurementModel, ProcessModel};
pub use crate::sim::{EstimationRecord, SimulationConfig, SimulationRun, TrajectorySimulator, simulate};

/// Generic Bayesian estimator trait
///
/// Provides the two-phase interface shared by the Kalman-family filters in this
/// crate. Both phases return a `Result` so that numeric failures surface to the
/// caller instead of leaking NaN into the estimate.
pub trait StateEstimator {
    /// Propagate the estimate and its covariance through the process model.
    fn predict<P: ProcessModel + ?Sized>(&mut self, model: &P, dt: f64)
    -> Result<(), EstimationError>;
    /// Correct the predicted estimate with an observation.
    fn update<M: MeasurementModel + ?Sized>(
        &mut self,
        model: &M,
        observation: &DVector<f64>,
    ) -> Result<UpdateOutcome, EstimationError>;
    /// Current state estimate
    fn get_estimate(&self) -> DVector<f64>;
    /// Current state covariance
    fn get_certainty(&self) -> DMatrix<f64>;
}
