//! Per-machine simulated sensor feed.
//!
//! Each running machine owns a tokio interval task that drifts its last-known
//! [`SensorVector`](crate::types::SensorVector) by bounded random deltas,
//! stores the result in a [`SensorCache`] and broadcasts a
//! [`TelemetryReading`].

pub mod cache;
pub mod manager;
pub mod noise;

pub use cache::{InMemorySensorCache, SensorCache};
pub use manager::{TelemetryManager, TelemetryReading};
pub use noise::{drift, FixedNoise, NoiseSource, UniformNoise};
