pub mod api;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod fleet;
pub mod providers;
pub mod storage;
pub mod telemetry;
pub mod types;

pub use config::Config;
pub use fleet::Fleet;
pub use types::*;
