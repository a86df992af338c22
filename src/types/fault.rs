use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FaultEventId, FaultType, MachineId, Severity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultEvent {
    pub id: FaultEventId,
    pub machine_id: MachineId,
    pub fault_type: FaultType,
    pub severity: Severity,
    pub component: String,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFaultEvent {
    pub machine_id: MachineId,
    pub fault_type: FaultType,
    pub severity: Severity,
    pub component: String,
    pub detected_at: DateTime<Utc>,
}

impl NewFaultEvent {
    /// Classifier-raised events are always high severity bearing faults.
    pub fn detected(machine_id: MachineId, fault_type: FaultType) -> Self {
        Self {
            machine_id,
            fault_type,
            severity: Severity::High,
            component: "bearing".to_string(),
            detected_at: Utc::now(),
        }
    }

    pub fn into_event(self, id: FaultEventId) -> FaultEvent {
        FaultEvent {
            id,
            machine_id: self.machine_id,
            fault_type: self.fault_type,
            severity: self.severity,
            component: self.component,
            detected_at: self.detected_at,
            resolved: false,
        }
    }
}
