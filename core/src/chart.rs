//! Flat chart rows for a plotting front-end.
//!
//! Every [EstimationRecord] becomes one row keyed by field name:
//! `time`, `true_state`, `measurement`, `prediction`, `estimate`, `uncertainty`
//! and `prediction_uncertainty`. Multi-component quantities get an index suffix
//! (`estimate_0`, `estimate_1`, ...). A hidden trace keeps its key with a `None`
//! value, so every row of a run has the same column set.

use crate::sim::{EstimationRecord, SimulationRun};

use std::collections::BTreeMap;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// A flat chart row.
pub type ChartRow = BTreeMap<String, Option<f64>>;

/// Which traces the chart shows. All visible by default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceVisibility {
    pub true_state: bool,
    pub measurement: bool,
    pub prediction: bool,
    pub estimate: bool,
    pub uncertainty: bool,
}

impl Default for TraceVisibility {
    fn default() -> Self {
        TraceVisibility {
            true_state: true,
            measurement: true,
            prediction: true,
            estimate: true,
            uncertainty: true,
        }
    }
}

fn insert_vector(row: &mut ChartRow, key: &str, values: &DVector<f64>, visible: bool) {
    if values.len() == 1 {
        row.insert(key.to_string(), visible.then_some(values[0]));
    } else {
        for (i, value) in values.iter().enumerate() {
            row.insert(format!("{key}_{i}"), visible.then_some(*value));
        }
    }
}

/// Flatten one record.
pub fn chart_row(record: &EstimationRecord, visibility: &TraceVisibility) -> ChartRow {
    let mut row = ChartRow::new();
    row.insert("time".to_string(), Some(record.time));
    insert_vector(&mut row, "true_state", &record.true_state, visibility.true_state);
    insert_vector(&mut row, "measurement", &record.observation, visibility.measurement);
    insert_vector(&mut row, "prediction", &record.predicted_state, visibility.prediction);
    insert_vector(&mut row, "estimate", &record.estimated_state, visibility.estimate);
    let n = record.estimated_state.len();
    let sigma = DVector::from_fn(n, |i, _| record.uncertainty(i));
    let predicted_sigma = DVector::from_fn(n, |i, _| record.predicted_uncertainty(i));
    insert_vector(&mut row, "uncertainty", &sigma, visibility.uncertainty);
    insert_vector(
        &mut row,
        "prediction_uncertainty",
        &predicted_sigma,
        visibility.uncertainty && visibility.prediction,
    );
    row
}

/// Flatten a whole run, one row per step.
pub fn chart_rows(run: &SimulationRun, visibility: &TraceVisibility) -> Vec<ChartRow> {
    run.records
        .iter()
        .map(|record| chart_row(record, visibility))
        .collect()
}

/// Column names of a run's rows, `time` first and the rest in key order.
pub fn columns(rows: &[ChartRow]) -> Vec<String> {
    let mut names = vec!["time".to_string()];
    if let Some(first) = rows.first() {
        names.extend(first.keys().filter(|k| k.as_str() != "time").cloned());
    }
    names
}
