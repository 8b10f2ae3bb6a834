//! Kalman-style state estimation (linear KF and EKF)
//!
//! This module contains the predict/update recursion shared by the linear and the
//! extended Kalman filter. Which one you get depends only on the model pair handed
//! to [`KalmanFilter::predict`] and [`KalmanFilter::update`]: linear models return
//! their exact transition and observation matrices as "Jacobians", nonlinear ones
//! return a local linearization at the current estimate.

use crate::error::{EstimationError, NumericDriftWarning};
use crate::linalg::{asymmetry, floor_eigenvalues, invert_innovation, min_eigenvalue, symmetrize};
use crate::models::{MeasurementModel, ProcessModel};
use crate::StateEstimator;

use std::fmt::{self, Debug, Display};

use log::warn;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Default tolerance on covariance asymmetry and negative eigenvalues,
/// relative to the magnitude of the covariance.
pub const DEFAULT_DRIFT_TOLERANCE: f64 = 1e-9;

/// Form of the posterior covariance update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceUpdate {
    /// $P = P^- - K H P^-$
    #[default]
    Standard,
    /// $P = (I - K H) P^- (I - K H)^T + K R K^T$
    Joseph,
}

/// Quantities computed by a successful measurement update.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateOutcome {
    /// $y = z - h(\bar{x})$
    pub innovation: DVector<f64>,
    /// $S = H \bar{P} H^T + R$
    pub innovation_covariance: DMatrix<f64>,
    /// $K = \bar{P} H^T S^{-1}$
    pub gain: DMatrix<f64>,
    /// Set when the covariance had to be repaired after this update
    pub warning: Option<NumericDriftWarning>,
}

/// Kalman filter over a dynamically sized state.
///
/// # Mathematical Background
///
/// ## Predict Step
///
/// $$
/// \begin{aligned}
/// \bar{x}_{k+1} &= f(x_k) \\\\
/// \bar{P}_{k+1} &= F_k P_k F_k^T + Q
/// \end{aligned}
/// $$
///
/// where $F_k = \frac{\partial f}{\partial x}\big|_{x_k}$. The prediction is applied
/// to the estimate, never to the truth.
///
/// ## Update Step
///
/// $$
/// \begin{aligned}
/// y_k &= z_k - h(\bar{x}_k) \\\\
/// S_k &= H_k \bar{P}_k H_k^T + R \\\\
/// K_k &= \bar{P}_k H_k^T S_k^{-1} \\\\
/// x_k &= \bar{x}_k + K_k y_k \\\\
/// P_k &= \bar{P}_k - K_k H_k \bar{P}_k
/// \end{aligned}
/// $$
///
/// with $H_k = \frac{\partial h}{\partial x}\big|_{\bar{x}_k}$. The Joseph form can be
/// selected with [`KalmanFilter::with_covariance_update`].
///
/// # Numerics
///
/// - $S^{-1}$ uses the closed form for 1×1 and 2×2 innovations and LU otherwise.
///   A near-singular $S$ fails the update with
///   [`EstimationError::SingularInnovation`] instead of producing NaN.
/// - After every update the covariance is symmetrized. If it had drifted beyond
///   tolerance (asymmetry or a negative eigenvalue), the negative eigenvalues are
///   floored at zero and a [`NumericDriftWarning`] is returned and logged.
/// - Both steps are atomic: on error the filter keeps its previous state.
///
/// # Example
///
/// ```rust
/// use kalmanviz::kalman::KalmanFilter;
/// use kalmanviz::models::{ConstantModel, IdentityMeasurement};
/// use kalmanviz::StateEstimator;
/// use nalgebra::{DMatrix, DVector};
///
/// let mut kf = KalmanFilter::new(
///     DVector::from_element(1, 0.0),
///     DMatrix::from_element(1, 1, 1.0),
///     DMatrix::from_element(1, 1, 0.01),
///     DMatrix::from_element(1, 1, 0.1),
/// )
/// .unwrap();
/// kf.predict(&ConstantModel::new(1), 1.0).unwrap();
/// kf.update(&IdentityMeasurement, &DVector::from_element(1, 1.0)).unwrap();
/// assert!((kf.get_estimate()[0] - 1.01 / 1.11).abs() < 1e-12);
/// ```
#[derive(Clone)]
pub struct KalmanFilter {
    /// State estimate vector
    mean_state: DVector<f64>,
    /// State covariance matrix
    covariance: DMatrix<f64>,
    /// Process noise covariance Q (state space)
    process_noise: DMatrix<f64>,
    /// Measurement noise covariance R
    measurement_noise: DMatrix<f64>,
    state_size: usize,
    covariance_update: CovarianceUpdate,
    /// Number of completed measurement updates
    steps: usize,
}

impl Debug for KalmanFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KF")
            .field("mean_state", &self.mean_state)
            .field("covariance", &self.covariance)
            .field("process_noise", &self.process_noise)
            .field("measurement_noise", &self.measurement_noise)
            .field("state_size", &self.state_size)
            .field("steps", &self.steps)
            .finish()
    }
}

impl Display for KalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KalmanFilter")
            .field("mean_state", &self.mean_state)
            .field("covariance", &self.covariance)
            .field("covariance_update", &self.covariance_update)
            .field("steps", &self.steps)
            .finish()
    }
}

impl KalmanFilter {
    /// Create a new filter from the initial estimate and the noise covariances.
    ///
    /// # Arguments
    ///
    /// * `initial_state` - Initial estimate $x_0$ (size n)
    /// * `initial_covariance` - Initial covariance $P_0$ (n×n, symmetric PSD)
    /// * `process_noise` - Process noise covariance Q (n×n)
    /// * `measurement_noise` - Measurement noise covariance R (m×m)
    ///
    /// # Errors
    ///
    /// [`EstimationError::DimensionMismatch`] when the matrices do not agree with n,
    /// [`EstimationError::Configuration`] for an empty state, non-finite values or a
    /// covariance that is not symmetric PSD.
    pub fn new(
        initial_state: DVector<f64>,
        initial_covariance: DMatrix<f64>,
        process_noise: DMatrix<f64>,
        measurement_noise: DMatrix<f64>,
    ) -> Result<KalmanFilter, EstimationError> {
        let state_size = initial_state.len();
        if state_size == 0 {
            return Err(EstimationError::Configuration(
                "state vector must not be empty".to_string(),
            ));
        }
        check_square("initial covariance", &initial_covariance, state_size)?;
        check_square("process noise", &process_noise, state_size)?;
        if !measurement_noise.is_square() || measurement_noise.is_empty() {
            return Err(EstimationError::DimensionMismatch {
                context: "measurement noise",
                expected: measurement_noise.nrows(),
                found: measurement_noise.ncols(),
            });
        }
        let all_finite = initial_state.iter().all(|v| v.is_finite())
            && initial_covariance.iter().all(|v| v.is_finite())
            && process_noise.iter().all(|v| v.is_finite())
            && measurement_noise.iter().all(|v| v.is_finite());
        if !all_finite {
            return Err(EstimationError::Configuration(
                "initial conditions and noise covariances must be finite".to_string(),
            ));
        }
        let tolerance = DEFAULT_DRIFT_TOLERANCE * (1.0 + initial_covariance.amax());
        if asymmetry(&initial_covariance) > tolerance
            || min_eigenvalue(&initial_covariance) < -tolerance
        {
            return Err(EstimationError::Configuration(
                "initial covariance must be symmetric positive semi-definite".to_string(),
            ));
        }
        Ok(KalmanFilter {
            mean_state: initial_state,
            covariance: initial_covariance,
            process_noise,
            measurement_noise,
            state_size,
            covariance_update: CovarianceUpdate::default(),
            steps: 0,
        })
    }
    /// Select the posterior covariance form.
    pub fn with_covariance_update(mut self, covariance_update: CovarianceUpdate) -> Self {
        self.covariance_update = covariance_update;
        self
    }
    pub fn state_size(&self) -> usize {
        self.state_size
    }
    /// Number of measurement updates completed so far.
    pub fn steps(&self) -> usize {
        self.steps
    }
    pub fn measurement_noise(&self) -> &DMatrix<f64> {
        &self.measurement_noise
    }
    /// Repair a covariance after an update; returns the warning when it had drifted.
    fn condition_covariance(
        &self,
        covariance: DMatrix<f64>,
    ) -> (DMatrix<f64>, Option<NumericDriftWarning>) {
        let tolerance = DEFAULT_DRIFT_TOLERANCE * (1.0 + covariance.amax());
        let skew = asymmetry(&covariance);
        let symmetric = symmetrize(&covariance);
        let lowest = min_eigenvalue(&symmetric);
        if skew <= tolerance && lowest >= -tolerance {
            return (symmetric, None);
        }
        let warning = NumericDriftWarning {
            step: self.steps,
            asymmetry: skew,
            min_eigenvalue: lowest,
        };
        warn!("{warning}; re-symmetrizing");
        (floor_eigenvalues(&symmetric, 0.0), Some(warning))
    }
}

fn check_square(
    context: &'static str,
    matrix: &DMatrix<f64>,
    size: usize,
) -> Result<(), EstimationError> {
    if matrix.nrows() != size {
        return Err(EstimationError::DimensionMismatch {
            context,
            expected: size,
            found: matrix.nrows(),
        });
    }
    if matrix.ncols() != size {
        return Err(EstimationError::DimensionMismatch {
            context,
            expected: size,
            found: matrix.ncols(),
        });
    }
    Ok(())
}

impl StateEstimator for KalmanFilter {
    /// Predict step: propagate estimate and covariance through the process model.
    ///
    /// The Jacobian is evaluated at the estimate before propagation.
    fn predict<P: ProcessModel + ?Sized>(
        &mut self,
        model: &P,
        dt: f64,
    ) -> Result<(), EstimationError> {
        if model.dimension() != self.state_size {
            return Err(EstimationError::DimensionMismatch {
                context: "process model",
                expected: self.state_size,
                found: model.dimension(),
            });
        }
        let f_matrix = model.jacobian(&self.mean_state, dt);
        check_square("process jacobian", &f_matrix, self.state_size)?;
        let mean_state = model.predict(&self.mean_state, dt);
        if mean_state.len() != self.state_size {
            return Err(EstimationError::DimensionMismatch {
                context: "predicted state",
                expected: self.state_size,
                found: mean_state.len(),
            });
        }
        let covariance = &f_matrix * &self.covariance * f_matrix.transpose() + &self.process_noise;
        let covariance = symmetrize(&covariance);
        if mean_state.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
            return Err(EstimationError::NonFinite { step: self.steps });
        }
        self.mean_state = mean_state;
        self.covariance = covariance;
        Ok(())
    }

    /// Update step: correct the predicted estimate with an observation.
    fn update<M: MeasurementModel + ?Sized>(
        &mut self,
        model: &M,
        observation: &DVector<f64>,
    ) -> Result<UpdateOutcome, EstimationError> {
        let step = self.steps;
        let z_hat = model.expected(&self.mean_state);
        let meas_dim = z_hat.len();
        if observation.len() != meas_dim {
            return Err(EstimationError::DimensionMismatch {
                context: "observation",
                expected: meas_dim,
                found: observation.len(),
            });
        }
        if self.measurement_noise.nrows() != meas_dim {
            return Err(EstimationError::DimensionMismatch {
                context: "measurement noise",
                expected: meas_dim,
                found: self.measurement_noise.nrows(),
            });
        }
        let h_matrix = model.jacobian(&self.mean_state);
        if h_matrix.shape() != (meas_dim, self.state_size) {
            return Err(EstimationError::DimensionMismatch {
                context: "measurement jacobian",
                expected: meas_dim * self.state_size,
                found: h_matrix.nrows() * h_matrix.ncols(),
            });
        }

        let innovation = observation - &z_hat;
        let pht = &self.covariance * h_matrix.transpose();
        let s = &h_matrix * &pht + &self.measurement_noise;
        let s_inv = invert_innovation(&s).map_err(|singular| {
            EstimationError::SingularInnovation {
                step,
                determinant: singular.determinant,
            }
        })?;
        let gain = &pht * s_inv;
        let mean_state = &self.mean_state + &gain * &innovation;
        let covariance = match self.covariance_update {
            CovarianceUpdate::Standard => &self.covariance - &gain * &h_matrix * &self.covariance,
            CovarianceUpdate::Joseph => {
                let i_kh = DMatrix::<f64>::identity(self.state_size, self.state_size)
                    - &gain * &h_matrix;
                &i_kh * &self.covariance * i_kh.transpose()
                    + &gain * &self.measurement_noise * gain.transpose()
            }
        };
        if mean_state.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
            return Err(EstimationError::NonFinite { step });
        }
        let (covariance, warning) = self.condition_covariance(covariance);

        self.mean_state = mean_state;
        self.covariance = covariance;
        self.steps += 1;
        Ok(UpdateOutcome {
            innovation,
            innovation_covariance: s,
            gain,
            warning,
        })
    }

    fn get_estimate(&self) -> DVector<f64> {
        self.mean_state.clone()
    }

    fn get_certainty(&self) -> DMatrix<f64> {
        self.covariance.clone()
    }
}
