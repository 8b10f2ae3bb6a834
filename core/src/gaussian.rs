//! Scalar Gaussian beliefs and the one-cycle walkthrough.
//!
//! A single Kalman iteration in one dimension is easiest to read as operations on
//! normal densities: the prior is shifted and widened by the motion, then multiplied
//! by the measurement density to give a narrower posterior, which becomes the next
//! prior. [BeliefCycle] holds the four densities of one such iteration and reports
//! which of them are on screen at each of the five walkthrough stages.

use crate::error::EstimationError;

use serde::{Deserialize, Serialize};

/// Normal density `N(mean, variance)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gaussian {
    pub mean: f64,
    pub variance: f64,
}

impl Gaussian {
    pub fn new(mean: f64, variance: f64) -> Result<Self, EstimationError> {
        if !mean.is_finite() || !variance.is_finite() || variance <= 0.0 {
            return Err(EstimationError::Configuration(format!(
                "gaussian needs a finite mean and positive variance, got N({mean}, {variance})"
            )));
        }
        Ok(Gaussian { mean, variance })
    }
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
    /// Probability density at `x`.
    pub fn pdf(&self, x: f64) -> f64 {
        (-(x - self.mean).powi(2) / (2.0 * self.variance)).exp()
            / (2.0 * std::f64::consts::PI * self.variance).sqrt()
    }
    /// Motion step: shift the mean and add the motion variance.
    pub fn predict(&self, shift: f64, added_variance: f64) -> Gaussian {
        Gaussian {
            mean: self.mean + shift,
            variance: self.variance + added_variance,
        }
    }
    /// Normalized product of two densities.
    pub fn fuse(&self, other: &Gaussian) -> Gaussian {
        let variance = 1.0 / (1.0 / self.variance + 1.0 / other.variance);
        Gaussian {
            mean: variance * (self.mean / self.variance + other.mean / other.variance),
            variance,
        }
    }
    /// `n` evenly spaced `(x, pdf(x))` points starting at `lo`, spaced `(hi - lo) / n`.
    pub fn sample(&self, lo: f64, hi: f64, n: usize) -> Vec<(f64, f64)> {
        let step = if n == 0 { 0.0 } else { (hi - lo) / n as f64 };
        (0..n)
            .map(|i| {
                let x = lo + i as f64 * step;
                (x, self.pdf(x))
            })
            .collect()
    }
}

/// Role of a density in the walkthrough.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeliefRole {
    Prior,
    Predicted,
    Measurement,
    Posterior,
    NextPrior,
}

/// Titles of the walkthrough stages, in order.
pub const STAGE_TITLES: [&str; 5] = [
    "Initial Prior Distribution",
    "Prediction Step",
    "Measurement",
    "Posterior Update",
    "Cycle Completion",
];

/// One predict/measure/fuse iteration over scalar Gaussians.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BeliefCycle {
    pub prior: Gaussian,
    pub predicted: Gaussian,
    pub measurement: Gaussian,
    pub posterior: Gaussian,
}

impl Default for BeliefCycle {
    /// Prior N(0, 1), motion +0.5 with variance 0.3, measurement N(1.2, 0.5).
    fn default() -> Self {
        let prior = Gaussian {
            mean: 0.0,
            variance: 1.0,
        };
        let measurement = Gaussian {
            mean: 1.2,
            variance: 0.5,
        };
        BeliefCycle::from_parts(prior, 0.5, 0.3, measurement)
    }
}

impl BeliefCycle {
    pub fn new(
        prior: Gaussian,
        motion_shift: f64,
        motion_variance: f64,
        measurement: Gaussian,
    ) -> Result<Self, EstimationError> {
        if !motion_shift.is_finite() || !motion_variance.is_finite() || motion_variance < 0.0 {
            return Err(EstimationError::Configuration(format!(
                "motion needs a finite shift and non-negative variance, got {motion_shift}, {motion_variance}"
            )));
        }
        let prior = Gaussian::new(prior.mean, prior.variance)?;
        let measurement = Gaussian::new(measurement.mean, measurement.variance)?;
        Ok(BeliefCycle::from_parts(prior, motion_shift, motion_variance, measurement))
    }

    fn from_parts(
        prior: Gaussian,
        motion_shift: f64,
        motion_variance: f64,
        measurement: Gaussian,
    ) -> Self {
        let predicted = prior.predict(motion_shift, motion_variance);
        BeliefCycle {
            prior,
            predicted,
            measurement,
            posterior: predicted.fuse(&measurement),
        }
    }

    /// The posterior, carried into the next iteration.
    pub fn next_prior(&self) -> Gaussian {
        self.posterior
    }

    /// Densities shown at walkthrough stage `index` (0..=4).
    ///
    /// Stages 0 to 3 accumulate prior, prediction, measurement and posterior. The
    /// last stage shows only the posterior next to the next prior it becomes.
    pub fn stage(&self, index: usize) -> Result<Vec<(BeliefRole, Gaussian)>, EstimationError> {
        let all = [
            (BeliefRole::Prior, self.prior),
            (BeliefRole::Predicted, self.predicted),
            (BeliefRole::Measurement, self.measurement),
            (BeliefRole::Posterior, self.posterior),
        ];
        match index {
            0..=3 => Ok(all[..=index].to_vec()),
            4 => Ok(vec![
                (BeliefRole::Posterior, self.posterior),
                (BeliefRole::NextPrior, self.next_prior()),
            ]),
            _ => Err(EstimationError::Configuration(format!(
                "walkthrough has {} stages, got stage {index}",
                STAGE_TITLES.len()
            ))),
        }
    }
}
