//! Error and warning types shared by the estimator and the simulator.
//!
//! Configuration problems are rejected before a run starts. Numeric failures
//! inside a step abort the run and carry the index of the failing step. Drift
//! of the covariance away from symmetric positive semi-definite is repaired in
//! place and reported as a [`NumericDriftWarning`] rather than an error.

use serde::Serialize;
use thiserror::Error;

/// Errors raised while configuring or running an estimator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimationError {
    /// A configuration value is out of range (non-positive noise, bad time step, ...)
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Vector or matrix sizes disagree with the state dimension of the run
    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    /// The innovation covariance S could not be inverted during an update
    #[error("innovation covariance is singular at step {step} (|det S| = {determinant:e})")]
    SingularInnovation { step: usize, determinant: f64 },

    /// The update produced NaN or infinite values
    #[error("non-finite state or covariance produced at step {step}")]
    NonFinite { step: usize },
}

impl EstimationError {
    /// True for errors that are detected before any stepping happens.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EstimationError::Configuration(_) | EstimationError::DimensionMismatch { .. }
        )
    }

    /// Step at which a numeric failure happened, if any.
    pub fn failed_step(&self) -> Option<usize> {
        match self {
            EstimationError::SingularInnovation { step, .. } | EstimationError::NonFinite { step } => {
                Some(*step)
            }
            _ => None,
        }
    }
}

/// Covariance lost symmetry or positive semi-definiteness beyond tolerance.
///
/// The filter has already repaired the covariance when this is reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericDriftWarning {
    pub step: usize,
    /// Largest absolute element of `P - Pᵀ` before symmetrization
    pub asymmetry: f64,
    /// Smallest eigenvalue of the symmetrized covariance before flooring
    pub min_eigenvalue: f64,
}

impl std::fmt::Display for NumericDriftWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "covariance drift at step {} (asymmetry {:e}, min eigenvalue {:e})",
            self.step, self.asymmetry, self.min_eigenvalue
        )
    }
}
