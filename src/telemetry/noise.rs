use rand::Rng;

use crate::types::SensorVector;

pub const TEMPERATURE_STEP: f64 = 1.0;
pub const VIBRATION_STEP: f64 = 0.3;
pub const LOAD_STEP: f64 = 2.0;

/// Source of bounded per-tick deltas.
pub trait NoiseSource: Send + Sync {
    /// A value in `[-magnitude, magnitude]`.
    fn sample(&self, magnitude: f64) -> f64;
}

/// Independent uniform draws from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformNoise;

impl NoiseSource for UniformNoise {
    fn sample(&self, magnitude: f64) -> f64 {
        if magnitude <= 0.0 {
            return 0.0;
        }
        rand::rng().random_range(-magnitude..=magnitude)
    }
}

/// Always returns the same fraction of the magnitude.
#[derive(Debug, Clone, Copy)]
pub struct FixedNoise(pub f64);

impl NoiseSource for FixedNoise {
    fn sample(&self, magnitude: f64) -> f64 {
        magnitude * self.0.clamp(-1.0, 1.0)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// One simulator step: bounded deltas, clamped then rounded to one decimal.
pub fn drift(current: &SensorVector, noise: &dyn NoiseSource) -> SensorVector {
    let temperature = (current.temperature + noise.sample(TEMPERATURE_STEP)).max(0.0);
    let vibration = (current.vibration + noise.sample(VIBRATION_STEP)).max(0.0);
    let current_load = (current.current_load + noise.sample(LOAD_STEP)).clamp(0.0, 100.0);

    SensorVector {
        temperature: round1(temperature),
        vibration: round1(vibration),
        current_load: round1(current_load),
    }
}
