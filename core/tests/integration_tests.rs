//! End-to-end tests for the filter and the trajectory simulator
//!
//! These tests exercise the public API the way a charting front-end would: build a
//! configuration, run it, and inspect the record sequence. They check the properties a
//! reader of the charts relies on:
//! 1. A run is a pure function of its configuration
//! 2. The estimate covariance never grows through an update and stays symmetric PSD
//! 3. The filter degenerates correctly as either noise intensity goes to zero
//! 4. Invalid configurations and degenerate innovations fail loudly, never with NaN
//!
//! Randomized configurations are drawn with `rand` from fixed seeds so failures reproduce.
use kalmanviz::linalg::{asymmetry, min_eigenvalue};
use kalmanviz::models::{ConstantModel, IdentityMeasurement, PendulumModel, ProcessModelKind};
use kalmanviz::sim::TruthSource;
use kalmanviz::{
    EstimationError, KalmanFilter, MeasurementModel, ProcessModel, SimulationConfig,
    StateEstimator, TrajectorySimulator, simulate,
};

use assert_approx_eq::assert_approx_eq;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

fn scalar_filter(x0: f64, p0: f64, q: f64, r: f64) -> KalmanFilter {
    KalmanFilter::new(
        DVector::from_element(1, x0),
        DMatrix::from_element(1, 1, p0),
        DMatrix::from_element(1, 1, q),
        DMatrix::from_element(1, 1, r),
    )
    .unwrap()
}

/// Sensor that sees nothing: `H = 0`.
#[derive(Debug)]
struct BlindSensor;
impl MeasurementModel for BlindSensor {
    fn dimension(&self, _state_size: usize) -> usize {
        1
    }
    fn observe(&self, _state: &DVector<f64>, noise: &DVector<f64>) -> DVector<f64> {
        noise.clone()
    }
    fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::zeros(1, state.len())
    }
}

/// Deterministic unit-speed motion, `x' = x + dt`.
#[derive(Debug)]
struct Conveyor;
impl ProcessModel for Conveyor {
    fn dimension(&self) -> usize {
        1
    }
    fn noise_dimension(&self) -> usize {
        1
    }
    fn advance(&self, state: &DVector<f64>, dt: f64, _noise: &DVector<f64>) -> DVector<f64> {
        state.add_scalar(dt)
    }
    fn jacobian(&self, _state: &DVector<f64>, _dt: f64) -> DMatrix<f64> {
        DMatrix::identity(1, 1)
    }
    fn noise_covariance(&self, intensity: f64, dt: f64) -> DMatrix<f64> {
        DMatrix::from_element(1, 1, intensity * dt)
    }
}

/// Noise-free sensor that loses the target beyond `x = 2.5`.
#[derive(Debug)]
struct ShortRangeSensor;
impl MeasurementModel for ShortRangeSensor {
    fn dimension(&self, _state_size: usize) -> usize {
        1
    }
    fn observe(&self, state: &DVector<f64>, _noise: &DVector<f64>) -> DVector<f64> {
        state.clone()
    }
    fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64> {
        let sensitivity = if state[0] < 2.5 { 1.0 } else { 0.0 };
        DMatrix::from_element(1, 1, sensitivity)
    }
    fn noise_covariance(&self, _intensity: f64, _state_size: usize) -> DMatrix<f64> {
        DMatrix::zeros(1, 1)
    }
}

/// Direct sensor whose claimed noise covariance is negative.
#[derive(Debug)]
struct OverconfidentSensor;
impl MeasurementModel for OverconfidentSensor {
    fn dimension(&self, state_size: usize) -> usize {
        state_size
    }
    fn observe(&self, state: &DVector<f64>, noise: &DVector<f64>) -> DVector<f64> {
        state + noise
    }
    fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::identity(state.len(), state.len())
    }
    fn noise_covariance(&self, _intensity: f64, state_size: usize) -> DMatrix<f64> {
        DMatrix::identity(state_size, state_size) * -0.5
    }
}

fn conveyor_config(steps: usize) -> SimulationConfig {
    SimulationConfig {
        truth: TruthSource::Model,
        steps: Some(steps),
        ..SimulationConfig::constant_demo()
    }
}

#[test]
fn run_aborts_at_failing_step() {
    let simulator = TrajectorySimulator::with_models(
        conveyor_config(5),
        Box::new(Conveyor),
        Box::new(ShortRangeSensor),
    )
    .unwrap();
    let err = simulator.run().unwrap_err();
    assert!(matches!(err, EstimationError::SingularInnovation { step: 2, .. }), "{err}");
    assert_eq!(err.failed_step(), Some(2));

    // The same pair over the steps before the sensor goes blind completes.
    let run = TrajectorySimulator::with_models(
        conveyor_config(2),
        Box::new(Conveyor),
        Box::new(ShortRangeSensor),
    )
    .unwrap()
    .run()
    .unwrap();
    assert_eq!(run.len(), 2);
    assert_approx_eq!(run.records[1].estimated_state[0], 2.0, 1e-12);
}

#[test]
fn run_collects_drift_warnings() {
    let run = TrajectorySimulator::with_models(
        conveyor_config(4),
        Box::new(Conveyor),
        Box::new(OverconfidentSensor),
    )
    .unwrap()
    .run()
    .unwrap();
    assert_eq!(run.len(), 4);
    assert_eq!(run.warnings.len(), 1);
    let warning = run.warnings[0];
    assert_eq!(warning.step, 0);
    assert_approx_eq!(warning.min_eigenvalue, 1.01 - (1.01 / 0.51) * 1.01, 1e-9);
    assert_approx_eq!(run.records[0].estimated_covariance[(0, 0)], 0.0, 1e-12);
    for record in &run.records {
        assert!(record.estimated_covariance[(0, 0)] >= 0.0);
    }
}

#[test]
fn custom_models_must_match_state_size() {
    let config = SimulationConfig::pendulum_demo();
    assert!(matches!(
        TrajectorySimulator::with_models(config, Box::new(Conveyor), Box::new(ShortRangeSensor)),
        Err(EstimationError::DimensionMismatch { context: "process model", .. })
    ));
}

#[test]
fn scalar_scenario() {
    let mut filter = scalar_filter(0.0, 1.0, 0.01, 0.1);
    filter.predict(&ConstantModel::new(1), 1.0).unwrap();
    assert_eq!(filter.get_estimate()[0], 0.0);
    assert_approx_eq!(filter.get_certainty()[(0, 0)], 1.01, 1e-15);
    let outcome = filter
        .update(&IdentityMeasurement, &DVector::from_element(1, 1.0))
        .unwrap();
    let gain = 1.01 / 1.11;
    assert_approx_eq!(outcome.gain[(0, 0)], gain, 1e-12);
    assert_approx_eq!(filter.get_estimate()[0], gain, 1e-12);
    assert_approx_eq!(filter.get_certainty()[(0, 0)], 0.1 * 1.01 / 1.11, 1e-12);
    assert_approx_eq!(gain, 0.9099, 1e-4);
    assert_approx_eq!(filter.get_certainty()[(0, 0)], 0.0910, 1e-4);
}

#[test]
fn pendulum_scenario() {
    let (theta0, omega0, dt, g): (f64, f64, f64, f64) = (1.0, -0.1, 0.01, 9.81);
    let mut filter = KalmanFilter::new(
        DVector::from_vec(vec![theta0, omega0]),
        DMatrix::identity(2, 2) * 0.1,
        DMatrix::zeros(2, 2),
        DMatrix::from_element(1, 1, 0.1),
    )
    .unwrap();
    let model = PendulumModel::new(g);
    filter.predict(&model, dt).unwrap();
    let predicted = filter.get_estimate();
    assert_eq!(predicted[0], theta0 + omega0 * dt);
    assert_approx_eq!(predicted[1], omega0 - g * theta0.sin() * dt, 1e-15);
    let f = DMatrix::from_row_slice(2, 2, &[1.0, dt, -g * theta0.cos() * dt, 1.0]);
    let expected = &f * (DMatrix::<f64>::identity(2, 2) * 0.1) * f.transpose();
    let covariance = filter.get_certainty();
    for i in 0..2 {
        for j in 0..2 {
            assert_approx_eq!(covariance[(i, j)], expected[(i, j)], 1e-14);
        }
    }
}

#[test]
fn singular_innovation_is_an_error() {
    let mut filter = scalar_filter(0.3, 1.0, 0.01, 0.0);
    filter.predict(&ConstantModel::new(1), 1.0).unwrap();
    let before = (filter.get_estimate(), filter.get_certainty());
    let err = filter
        .update(&BlindSensor, &DVector::from_element(1, 0.5))
        .unwrap_err();
    assert!(matches!(err, EstimationError::SingularInnovation { step: 0, .. }));
    assert_eq!(err.failed_step(), Some(0));
    assert_eq!((filter.get_estimate(), filter.get_certainty()), before);
    assert!(filter.get_estimate().iter().all(|v| v.is_finite()));
}

#[test]
fn runs_are_deterministic() {
    for config in [
        SimulationConfig::constant_demo(),
        SimulationConfig::pendulum_demo(),
    ] {
        let first = simulate(&config).unwrap();
        let second = simulate(&config).unwrap();
        assert_eq!(first, second);
    }
    let reseeded = SimulationConfig {
        measurement_seed: 7,
        ..SimulationConfig::constant_demo()
    };
    assert_ne!(
        simulate(&reseeded).unwrap().records[0].observation,
        simulate(&SimulationConfig::constant_demo()).unwrap().records[0].observation
    );
}

#[test]
fn update_never_increases_variance() {
    for config in [
        SimulationConfig::constant_demo(),
        SimulationConfig::pendulum_demo(),
    ] {
        let run = simulate(&config).unwrap();
        for record in &run.records {
            for i in 0..record.estimated_state.len() {
                assert!(
                    record.estimated_covariance[(i, i)]
                        <= record.predicted_covariance[(i, i)] + 1e-12,
                    "step {} component {i}",
                    record.step
                );
            }
        }
    }
}

#[test]
fn constant_model_variance_settles() {
    let run = simulate(&SimulationConfig::constant_demo()).unwrap();
    let variances: Vec<f64> = run
        .records
        .iter()
        .map(|r| r.estimated_covariance[(0, 0)])
        .collect();
    for pair in variances.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-15);
    }
    // Steady state of P = (P + Q) R / (P + Q + R) with Q = 0.01, R = 0.1
    let (q, r) = (0.01_f64, 0.1_f64);
    let steady = (-q + (q * q + 4.0 * q * r).sqrt()) / 2.0;
    assert_approx_eq!(*variances.last().unwrap(), steady, 1e-9);
}

#[test]
fn vanishing_measurement_noise_follows_observations() {
    let config = SimulationConfig {
        measurement_noise: 1e-12,
        ..SimulationConfig::constant_demo()
    };
    let run = simulate(&config).unwrap();
    for record in &run.records {
        assert!((record.estimated_state[0] - record.observation[0]).abs() < 1e-6);
    }
    let mut filter = scalar_filter(0.0, 1.0, 0.01, 0.0);
    filter.predict(&ConstantModel::new(1), 1.0).unwrap();
    filter
        .update(&IdentityMeasurement, &DVector::from_element(1, 2.5))
        .unwrap();
    assert_approx_eq!(filter.get_estimate()[0], 2.5, 1e-12);
    assert_approx_eq!(filter.get_certainty()[(0, 0)], 0.0, 1e-12);
}

#[test]
fn vanishing_process_noise_averages_observations() {
    let (p0, r) = (1.0_f64, 0.1_f64);
    let mut filter = scalar_filter(0.0, p0, 0.0, r);
    let model = ConstantModel::new(1);
    let mut rng = StdRng::seed_from_u64(11);
    let noise = Normal::new(3.0, r.sqrt()).unwrap();
    let mut sum = 0.0;
    let mut previous = p0;
    for k in 1..=200 {
        let z: f64 = rng.sample(noise);
        sum += z;
        filter.predict(&model, 1.0).unwrap();
        filter
            .update(&IdentityMeasurement, &DVector::from_element(1, z))
            .unwrap();
        let p = filter.get_certainty()[(0, 0)];
        assert!(p < previous);
        previous = p;
        let information = 1.0 / p0 + k as f64 / r;
        assert_approx_eq!(p, 1.0 / information, 1e-12);
        assert_approx_eq!(filter.get_estimate()[0], (sum / r) / information, 1e-9);
    }
    assert!((filter.get_estimate()[0] - 3.0).abs() < 0.1);

    // A repeated observation is a fixed point of the recursion.
    let mut filter = scalar_filter(0.0, p0, 0.0, r);
    let z = DVector::from_element(1, 2.0);
    let mut gap = f64::INFINITY;
    for _ in 0..100 {
        filter.predict(&model, 1.0).unwrap();
        filter.update(&IdentityMeasurement, &z).unwrap();
        let next_gap = (filter.get_estimate()[0] - 2.0).abs();
        assert!(next_gap < gap);
        gap = next_gap;
    }
    assert!(gap < 1e-2);
}

#[test]
fn randomized_pendulum_runs_keep_covariance_healthy() {
    let mut rng = StdRng::seed_from_u64(2024);
    for trial in 0..1000 {
        let p_theta = rng.random_range(0.01..1.0);
        let p_omega = rng.random_range(0.01..1.0);
        let config = SimulationConfig {
            process_noise: rng.random_range(0.001..0.1),
            measurement_noise: rng.random_range(0.01..1.0),
            initial_state: vec![rng.random_range(-1.5..1.5), rng.random_range(-1.0..1.0)],
            initial_covariance: vec![vec![p_theta, 0.0], vec![0.0, p_omega]],
            dt: rng.random_range(0.005..0.05),
            steps: Some(50),
            duration: None,
            process_seed: rng.random_range(0..233_280),
            measurement_seed: rng.random_range(0..233_280),
            ..SimulationConfig::pendulum_demo()
        };
        let run = simulate(&config).unwrap_or_else(|e| panic!("trial {trial}: {e}"));
        assert_eq!(run.len(), 50);
        for record in &run.records {
            for p in [&record.predicted_covariance, &record.estimated_covariance] {
                let tolerance = 1e-9 * (1.0 + p.amax());
                assert!(asymmetry(p) <= 1e-12, "trial {trial} step {}", record.step);
                assert!(min_eigenvalue(p) >= -tolerance, "trial {trial} step {}", record.step);
            }
        }
    }
}

#[test]
fn invalid_configurations_fail_before_stepping() {
    let base = SimulationConfig::pendulum_demo();
    let cases = [
        SimulationConfig {
            process_noise: 0.0,
            ..base.clone()
        },
        SimulationConfig {
            measurement_noise: -0.1,
            ..base.clone()
        },
        SimulationConfig {
            dt: 0.0,
            ..base.clone()
        },
        SimulationConfig {
            initial_state: vec![1.0, 0.0, 0.0],
            initial_covariance: vec![vec![0.1, 0.0, 0.0]; 3],
            ..base.clone()
        },
        SimulationConfig {
            process_model: ProcessModelKind::Pendulum { gravity: -9.81 },
            ..base.clone()
        },
        SimulationConfig {
            initial_covariance: vec![vec![0.1, 0.5], vec![0.5, 0.1]],
            ..base.clone()
        },
        SimulationConfig {
            truth: TruthSource::Sinusoid,
            ..base.clone()
        },
    ];
    for config in cases {
        assert!(config.validate().is_err(), "{config:?}");
        assert!(TrajectorySimulator::new(config).is_err());
    }
}

#[test]
fn duration_sets_sequence_length() {
    for (duration, dt, expected) in [(1.0, 0.01, 100), (2.5, 1.0, 2), (0.999, 0.1, 9), (0.0, 0.1, 0)] {
        let config = SimulationConfig {
            steps: None,
            duration: Some(duration),
            dt,
            ..SimulationConfig::constant_demo()
        };
        let run = simulate(&config).unwrap();
        assert_eq!(run.len(), expected, "duration {duration} dt {dt}");
        if let Some(last) = run.records.last() {
            // The sinusoid is sampled from t = 0.
            assert_approx_eq!(last.time, (expected - 1) as f64 * dt, 1e-12);
        }
    }
}
