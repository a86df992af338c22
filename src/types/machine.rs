use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MachineId, MachineStatus, ValidationError};

pub const MIN_HEALTH_SCORE: i32 = 5;
pub const MAX_HEALTH_SCORE: i32 = 100;

/// One telemetry sample: the unit the simulator emits and the classifier reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorVector {
    pub temperature: f64,
    pub vibration: f64,
    pub current_load: f64,
}

impl SensorVector {
    pub fn new(temperature: f64, vibration: f64, current_load: f64) -> Self {
        Self {
            temperature,
            vibration,
            current_load,
        }
    }
}

impl Default for SensorVector {
    fn default() -> Self {
        Self {
            temperature: 50.0,
            vibration: 1.2,
            current_load: 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub name: String,
    pub location: String,
    pub status: MachineStatus,
    pub health_score: i32,
    pub temperature: f64,
    pub vibration: f64,
    pub current_load: f64,
    pub updated_at: DateTime<Utc>,
}

impl Machine {
    pub fn sensor_vector(&self) -> SensorVector {
        SensorVector {
            temperature: self.temperature,
            vibration: self.vibration,
            current_load: self.current_load,
        }
    }

    pub fn apply_reading(&mut self, reading: SensorVector, at: DateTime<Utc>) {
        self.temperature = reading.temperature;
        self.vibration = reading.vibration;
        self.current_load = reading.current_load;
        self.updated_at = at;
    }
}

/// Fields for a machine the store has not assigned an id to yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMachine {
    /// Fixtures may pin ids; the store assigns the next free id otherwise.
    #[serde(default)]
    pub id: Option<MachineId>,
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub status: MachineStatus,
    #[serde(default = "default_health_score")]
    pub health_score: i32,
    #[serde(default)]
    pub sensors: SensorVector,
}

fn default_health_score() -> i32 {
    MAX_HEALTH_SCORE
}

impl NewMachine {
    pub fn new(name: impl Into<String>, status: MachineStatus) -> Self {
        Self {
            id: None,
            name: name.into(),
            location: String::new(),
            status,
            health_score: MAX_HEALTH_SCORE,
            sensors: SensorVector::default(),
        }
    }

    pub fn with_id(mut self, id: MachineId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_sensors(mut self, sensors: SensorVector) -> Self {
        self.sensors = sensors;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Required { field: "name" });
        }
        if !(MIN_HEALTH_SCORE..=MAX_HEALTH_SCORE).contains(&self.health_score) {
            return Err(ValidationError::OutOfRange {
                field: "health_score",
                min: MIN_HEALTH_SCORE as f64,
                max: MAX_HEALTH_SCORE as f64,
                value: self.health_score as f64,
            });
        }
        let load = self.sensors.current_load;
        if !(0.0..=100.0).contains(&load) {
            return Err(ValidationError::OutOfRange {
                field: "current_load",
                min: 0.0,
                max: 100.0,
                value: load,
            });
        }
        Ok(())
    }

    pub fn into_machine(self, id: MachineId) -> Machine {
        Machine {
            id,
            name: self.name,
            location: self.location,
            status: self.status,
            health_score: self.health_score,
            temperature: self.sensors.temperature,
            vibration: self.sensors.vibration,
            current_load: self.sensors.current_load,
            updated_at: Utc::now(),
        }
    }
}

/// Operator edits. Telemetry and the stored score are not editable here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachinePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<MachineStatus>,
}

impl MachinePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.location.is_none() && self.status.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_empty() {
            return Err(ValidationError::Required {
                field: "name, location or status",
            });
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ValidationError::Required { field: "name" });
            }
        }
        Ok(())
    }

    pub fn apply_to(self, machine: &mut Machine) {
        if let Some(name) = self.name {
            machine.name = name.trim().to_string();
        }
        if let Some(location) = self.location {
            machine.location = location.trim().to_string();
        }
        if let Some(status) = self.status {
            machine.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sensor_vector() {
        let v = SensorVector::default();
        assert_eq!(v.temperature, 50.0);
        assert_eq!(v.vibration, 1.2);
        assert_eq!(v.current_load, 40.0);
    }

    #[test]
    fn test_apply_reading_only_touches_telemetry() {
        let mut machine = NewMachine::new("Press", MachineStatus::Warning).into_machine(7);
        let at = Utc::now();
        machine.apply_reading(SensorVector::new(61.5, 2.2, 77.0), at);

        assert_eq!(machine.temperature, 61.5);
        assert_eq!(machine.vibration, 2.2);
        assert_eq!(machine.current_load, 77.0);
        assert_eq!(machine.updated_at, at);
        assert_eq!(machine.status, MachineStatus::Warning);
        assert_eq!(machine.health_score, 100);
    }

    #[test]
    fn test_validate_rejects_blank_name() {
        let machine = NewMachine::new("   ", MachineStatus::Healthy);
        assert_eq!(
            machine.validate(),
            Err(ValidationError::Required { field: "name" })
        );
    }

    #[test]
    fn test_validate_rejects_out_of_range_score_and_load() {
        let mut machine = NewMachine::new("Lathe", MachineStatus::Healthy);
        machine.health_score = 2;
        assert!(machine.validate().is_err());

        let machine = NewMachine::new("Lathe", MachineStatus::Healthy)
            .with_sensors(SensorVector::new(40.0, 1.0, 120.0));
        assert!(matches!(
            machine.validate(),
            Err(ValidationError::OutOfRange {
                field: "current_load",
                ..
            })
        ));
    }

    #[test]
    fn test_patch_validates_and_applies() {
        assert!(MachinePatch::default().validate().is_err());
        let blank = MachinePatch {
            name: Some("  ".to_string()),
            ..MachinePatch::default()
        };
        assert_eq!(blank.validate(), Err(ValidationError::Required { field: "name" }));

        let mut machine = NewMachine::new("Press", MachineStatus::Healthy).into_machine(3);
        let patch = MachinePatch {
            location: Some(" Bay 4 ".to_string()),
            status: Some(MachineStatus::Maintenance),
            ..MachinePatch::default()
        };
        assert!(patch.validate().is_ok());
        patch.apply_to(&mut machine);
        assert_eq!(machine.name, "Press");
        assert_eq!(machine.location, "Bay 4");
        assert_eq!(machine.status, MachineStatus::Maintenance);
        assert_eq!(machine.temperature, 50.0);
    }

    #[test]
    fn test_patch_rejects_telemetry_fields() {
        let result: Result<MachinePatch, _> = serde_json::from_str(r#"{"temperature": 99.0}"#);
        assert!(result.is_err());
    }
}
