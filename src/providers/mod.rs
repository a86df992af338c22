pub mod prediction;

pub use prediction::{HttpPredictionService, Prediction, PredictionService, DEFAULT_PREDICTION_TIMEOUT};
