use crate::types::{FaultCategory, FaultType, SensorVector};

pub const VIBRATION_FAULT_THRESHOLD: f64 = 7.0;
pub const TEMPERATURE_FAULT_THRESHOLD: f64 = 70.0;
pub const LOAD_FAULT_THRESHOLD: f64 = 90.0;

/// First matching rule wins: vibration, then temperature, then load.
pub fn classify(reading: &SensorVector) -> FaultCategory {
    if reading.vibration > VIBRATION_FAULT_THRESHOLD {
        FaultCategory::Fault(FaultType::OuterRaceFault)
    } else if reading.temperature > TEMPERATURE_FAULT_THRESHOLD {
        FaultCategory::Fault(FaultType::InnerRaceFault)
    } else if reading.current_load > LOAD_FAULT_THRESHOLD {
        FaultCategory::Fault(FaultType::BallFault)
    } else {
        FaultCategory::Normal
    }
}
