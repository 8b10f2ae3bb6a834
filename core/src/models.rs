//! Process (dynamics) and measurement models.
//!
//! A filter run is driven by a model pair: a [ProcessModel] that propagates the
//! state through time and a [MeasurementModel] that maps a state into
//! observation space. Both expose their analytic Jacobians so the same
//! [`KalmanFilter`](crate::kalman::KalmanFilter) recursion serves the linear
//! case (where the Jacobian is the exact transition/observation matrix) and the
//! extended case (where it is a local linearization at the estimate).
//!
//! # Provided models
//!
//! | Model | State | Kind |
//! |-------|-------|------|
//! | [ConstantModel] | `x` (any size) | linear random walk, `F = I` |
//! | [PendulumModel] | `[θ, ω]` | nonlinear, Euler step of `θ̈ = -g sin θ` |
//! | [IdentityMeasurement] | `z = x + v` | linear, `H = I` |
//! | [SineProjectionMeasurement] | `z = sin θ + v` | nonlinear, `H = [cos θ, 0]` |
//!
//! The serializable selectors [ProcessModelKind] and [MeasurementModelKind] are
//! what a configuration names; they build the boxed trait objects used by the
//! simulator.

use crate::error::EstimationError;

use std::fmt::{self, Debug, Display};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Standard gravity used by the pendulum when none is configured (m/s²)
pub const STANDARD_GRAVITY: f64 = 9.81;

/// Dynamics model trait for truth propagation and filter prediction.
pub trait ProcessModel: Debug {
    /// Size of the state vector this model propagates
    fn dimension(&self) -> usize;
    /// Size of the noise sample consumed by [ProcessModel::advance]
    fn noise_dimension(&self) -> usize;
    /// Advance a (true) state by `dt` with the given noise sample added.
    fn advance(&self, state: &DVector<f64>, dt: f64, noise: &DVector<f64>) -> DVector<f64>;
    /// Noise-free propagation used as the filter's prediction function `f(x)`.
    fn predict(&self, state: &DVector<f64>, dt: f64) -> DVector<f64> {
        self.advance(state, dt, &DVector::zeros(self.noise_dimension()))
    }
    /// State transition Jacobian `F = ∂f/∂x` evaluated at `state`.
    fn jacobian(&self, state: &DVector<f64>, dt: f64) -> DMatrix<f64>;
    /// Process noise covariance in state space implied by the scalar intensity `q`.
    fn noise_covariance(&self, intensity: f64, dt: f64) -> DMatrix<f64>;
    /// Standard deviation of each sample handed to [ProcessModel::advance].
    fn noise_std(&self, intensity: f64) -> f64 {
        intensity.sqrt()
    }
}

/// Measurement model trait: state to observation mapping.
pub trait MeasurementModel: Debug {
    /// Size of the observation vector for a given state size
    fn dimension(&self, state_size: usize) -> usize;
    /// Observation of `state` with the given noise sample added.
    fn observe(&self, state: &DVector<f64>, noise: &DVector<f64>) -> DVector<f64>;
    /// Noise-free observation `h(x)`.
    fn expected(&self, state: &DVector<f64>) -> DVector<f64> {
        self.observe(state, &DVector::zeros(self.dimension(state.len())))
    }
    /// Measurement Jacobian `H = ∂h/∂x` evaluated at `state`.
    fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64>;
    /// Measurement noise covariance implied by the scalar intensity `r`.
    fn noise_covariance(&self, intensity: f64, state_size: usize) -> DMatrix<f64> {
        let m = self.dimension(state_size);
        DMatrix::<f64>::identity(m, m) * intensity
    }
}

/// Random-walk model `x' = x + w`.
///
/// Linear, so the Jacobian is the exact transition matrix (identity) and the
/// filter reduces to the classic Kalman filter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantModel {
    pub state_size: usize,
}
impl ConstantModel {
    pub fn new(state_size: usize) -> Self {
        ConstantModel { state_size }
    }
}
impl Display for ConstantModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConstantModel(n: {})", self.state_size)
    }
}
impl ProcessModel for ConstantModel {
    fn dimension(&self) -> usize {
        self.state_size
    }
    fn noise_dimension(&self) -> usize {
        self.state_size
    }
    fn advance(&self, state: &DVector<f64>, _dt: f64, noise: &DVector<f64>) -> DVector<f64> {
        state + noise
    }
    fn jacobian(&self, _state: &DVector<f64>, _dt: f64) -> DMatrix<f64> {
        DMatrix::identity(self.state_size, self.state_size)
    }
    fn noise_covariance(&self, intensity: f64, _dt: f64) -> DMatrix<f64> {
        DMatrix::<f64>::identity(self.state_size, self.state_size) * intensity
    }
}

/// Simple pendulum with state `[θ, ω]` (angle in radians, angular rate in rad/s).
///
/// Truth and prediction use an explicit Euler step of $\ddot{\theta} = -g \sin\theta$:
///
/// $$
/// \begin{aligned}
/// \omega' &= \omega - g \sin(\theta)\, dt + w \sqrt{dt} \\\\
/// \theta' &= \theta + \omega\, dt
/// \end{aligned}
/// $$
///
/// where the angle update uses the rate from before the step. The noise term is
/// the Euler–Maruyama discretization of continuous white noise on the angular
/// acceleration, which gives the state-space process noise
/// `Q = [[0, 0], [0, q dt]]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendulumModel {
    pub gravity: f64,
}
impl Default for PendulumModel {
    fn default() -> Self {
        PendulumModel {
            gravity: STANDARD_GRAVITY,
        }
    }
}
impl PendulumModel {
    pub fn new(gravity: f64) -> Self {
        PendulumModel { gravity }
    }
}
impl Display for PendulumModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PendulumModel(g: {})", self.gravity)
    }
}
impl ProcessModel for PendulumModel {
    fn dimension(&self) -> usize {
        2
    }
    fn noise_dimension(&self) -> usize {
        1
    }
    fn advance(&self, state: &DVector<f64>, dt: f64, noise: &DVector<f64>) -> DVector<f64> {
        let (theta, omega) = (state[0], state[1]);
        let omega_next = omega - self.gravity * theta.sin() * dt + noise[0] * dt.sqrt();
        let theta_next = theta + omega * dt;
        DVector::from_vec(vec![theta_next, omega_next])
    }
    fn jacobian(&self, state: &DVector<f64>, dt: f64) -> DMatrix<f64> {
        let theta = state[0];
        DMatrix::from_row_slice(2, 2, &[1.0, dt, -self.gravity * theta.cos() * dt, 1.0])
    }
    fn noise_covariance(&self, intensity: f64, dt: f64) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 0.0, intensity * dt])
    }
}

/// Full-state observation `z = x + v`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IdentityMeasurement;
impl MeasurementModel for IdentityMeasurement {
    fn dimension(&self, state_size: usize) -> usize {
        state_size
    }
    fn observe(&self, state: &DVector<f64>, noise: &DVector<f64>) -> DVector<f64> {
        state + noise
    }
    fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(state.len(), state.len())
    }
}

/// Horizontal projection of a pendulum bob, `z = sin θ + v`.
///
/// Only the first state component is observed (through a nonlinearity), so the
/// angular rate is recovered purely through the dynamics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SineProjectionMeasurement;
impl MeasurementModel for SineProjectionMeasurement {
    fn dimension(&self, _state_size: usize) -> usize {
        1
    }
    fn observe(&self, state: &DVector<f64>, noise: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(1, state[0].sin() + noise[0])
    }
    fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64> {
        let mut h = DMatrix::zeros(1, state.len());
        h[(0, 0)] = state[0].cos();
        h
    }
}

/// Serializable process model selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessModelKind {
    /// Random walk over a state of any size
    #[default]
    Constant,
    /// Nonlinear pendulum over `[θ, ω]`
    Pendulum {
        #[serde(default = "default_gravity")]
        gravity: f64,
    },
}

fn default_gravity() -> f64 {
    STANDARD_GRAVITY
}

impl ProcessModelKind {
    /// Build the model for a state of `state_size` components.
    pub fn build(&self, state_size: usize) -> Result<Box<dyn ProcessModel + Send>, EstimationError> {
        match *self {
            ProcessModelKind::Constant => {
                if state_size == 0 {
                    return Err(EstimationError::Configuration(
                        "constant model needs at least one state component".to_string(),
                    ));
                }
                Ok(Box::new(ConstantModel::new(state_size)))
            }
            ProcessModelKind::Pendulum { gravity } => {
                if state_size != 2 {
                    return Err(EstimationError::DimensionMismatch {
                        context: "pendulum state",
                        expected: 2,
                        found: state_size,
                    });
                }
                if !gravity.is_finite() || gravity <= 0.0 {
                    return Err(EstimationError::Configuration(format!(
                        "pendulum gravity must be positive and finite, got {gravity}"
                    )));
                }
                Ok(Box::new(PendulumModel::new(gravity)))
            }
        }
    }
    /// Whether the filter for this model needs linearization.
    pub fn is_linear(&self) -> bool {
        matches!(self, ProcessModelKind::Constant)
    }
}

/// Serializable measurement model selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasurementModelKind {
    #[default]
    Identity,
    SineProjection,
}

impl MeasurementModelKind {
    pub fn build(&self) -> Box<dyn MeasurementModel + Send> {
        match self {
            MeasurementModelKind::Identity => Box::new(IdentityMeasurement),
            MeasurementModelKind::SineProjection => Box::new(SineProjectionMeasurement),
        }
    }
    pub fn is_linear(&self) -> bool {
        matches!(self, MeasurementModelKind::Identity)
    }
}
