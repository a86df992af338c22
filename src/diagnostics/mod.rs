//! Pure sensor-vector evaluators: the display health score and the rule-based
//! bearing fault classifier.

pub mod classifier;
pub mod health;

pub use classifier::classify;
pub use health::{score, score_vector, HealthBand};
