//! Deterministic pseudorandom noise streams.
//!
//! Every run draws its process and measurement noise from two independent
//! [`NoiseSource`] instances so that a run is reproducible from its seeds alone.
//! The generator is a small linear-congruential recurrence,
//!
//! $$
//! s_{k+1} = (9301 s_k + 49297) \bmod 233280, \qquad u_k = s_{k+1} / 233280
//! $$
//!
//! and Gaussian samples come from the Box–Muller transform of two consecutive
//! uniforms. The period is short (at most 233 280 draws) which is more than
//! enough for the few hundred steps of a demonstration run.

use nalgebra::DVector;

const MULTIPLIER: u64 = 9301;
const INCREMENT: u64 = 49297;
const MODULUS: u64 = 233280;

/// Seed used for the process-noise stream when none is configured.
pub const DEFAULT_PROCESS_SEED: u64 = 42;
/// Seed used for the measurement-noise stream when none is configured.
pub const DEFAULT_MEASUREMENT_SEED: u64 = 24;

/// Seeded uniform / Gaussian sample stream.
///
/// Two sources built from the same seed produce identical sequences for the
/// same sequence of calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoiseSource {
    state: u64,
    draws: u64,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        // Reducing up front keeps the recurrence in range without changing its output.
        NoiseSource {
            state: seed % MODULUS,
            draws: 0,
        }
    }
    /// Next uniform sample in [0, 1).
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> f64 {
        self.state = (self.state * MULTIPLIER + INCREMENT) % MODULUS;
        self.draws += 1;
        self.state as f64 / MODULUS as f64
    }
    /// Normal sample with the given mean and standard deviation (Box–Muller).
    ///
    /// Consumes exactly two uniform draws.
    pub fn gaussian(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next().max(f64::MIN_POSITIVE);
        let u2 = self.next();
        let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        z0 * std_dev + mean
    }
    /// Zero-mean vector of independent normal samples, drawn component by component.
    pub fn gaussian_vector(&mut self, dimension: usize, std_dev: f64) -> DVector<f64> {
        DVector::from_iterator(dimension, (0..dimension).map(|_| self.gaussian(0.0, std_dev)))
    }
    /// Number of uniform draws consumed so far.
    pub fn draws(&self) -> u64 {
        self.draws
    }
}
