use serde::{Deserialize, Serialize};

use crate::types::machine::{MAX_HEALTH_SCORE, MIN_HEALTH_SCORE};
use crate::types::SensorVector;

/// `(threshold, penalty)` pairs, highest threshold first. The first rung the
/// reading reaches applies.
const TEMPERATURE_LADDER: [(f64, i32); 4] = [(90.0, 45), (75.0, 30), (60.0, 12), (50.0, 6)];
const VIBRATION_LADDER: [(f64, i32); 4] = [(10.0, 40), (7.0, 25), (4.0, 12), (2.5, 6)];
const LOAD_LADDER: [(f64, i32); 3] = [(95.0, 20), (85.0, 12), (70.0, 6)];

fn penalty(ladder: &[(f64, i32)], value: f64) -> i32 {
    // NaN compares false against every rung.
    ladder
        .iter()
        .find(|(threshold, _)| value >= *threshold)
        .map_or(0, |(_, penalty)| *penalty)
}

/// Advisory health score in `[5, 100]`. Never written back to `Machine.status`.
pub fn score(temperature: f64, vibration: f64, current_load: f64) -> i32 {
    let total = penalty(&TEMPERATURE_LADDER, temperature)
        + penalty(&VIBRATION_LADDER, vibration)
        + penalty(&LOAD_LADDER, current_load);
    (MAX_HEALTH_SCORE - total).max(MIN_HEALTH_SCORE)
}

pub fn score_vector(reading: &SensorVector) -> i32 {
    score(reading.temperature, reading.vibration, reading.current_load)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBand {
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthBand {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 80 => HealthBand::Good,
            s if s >= 60 => HealthBand::Fair,
            s if s >= 40 => HealthBand::Poor,
            _ => HealthBand::Critical,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthBand::Good => "Good",
            HealthBand::Fair => "Fair",
            HealthBand::Poor => "Poor",
            HealthBand::Critical => "Critical",
        }
    }
}
