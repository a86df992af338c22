pub mod fault;
pub mod job;
pub mod machine;
pub mod notification;

pub use fault::{FaultEvent, NewFaultEvent};
pub use job::{Job, JobFilter, JobOrder, NewJob};
pub use machine::{Machine, MachinePatch, NewMachine, SensorVector};
pub use notification::Notification;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type MachineId = i64;
pub type JobId = i64;
pub type FaultEventId = i64;
pub type NotificationId = uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Lookup of a record that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} {id} not found")]
pub struct NotFoundError {
    pub kind: &'static str,
    pub id: i64,
}

impl NotFoundError {
    pub fn machine(id: MachineId) -> Self {
        Self { kind: "machine", id }
    }

    pub fn job(id: JobId) -> Self {
        Self { kind: "job", id }
    }
}

/// Rejected input. Raised before anything is written to the store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: &'static str },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },
    #[error("end_time must not be before start_time")]
    EndBeforeStart,
    #[error("machine {0} does not exist")]
    UnknownMachine(MachineId),
    #[error("duplicate machine id {0}")]
    DuplicateMachine(MachineId),
    #[error(transparent)]
    Parse(#[from] ParseEnumError),
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Operator-assigned machine condition. Set independently of the health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Healthy,
    Warning,
    Critical,
    Maintenance,
}

impl MachineStatus {
    pub const ALL: [MachineStatus; 4] = [
        MachineStatus::Healthy,
        MachineStatus::Warning,
        MachineStatus::Critical,
        MachineStatus::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Healthy => "healthy",
            MachineStatus::Warning => "warning",
            MachineStatus::Critical => "critical",
            MachineStatus::Maintenance => "maintenance",
        }
    }
}

impl FromStr for MachineStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("machine status", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Paused,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Paused,
        JobStatus::Failed,
    ];

    /// Statuses the reassignment scheduler moves off a degraded machine.
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Running, JobStatus::Pending];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Paused => "paused",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

impl FromStr for JobStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("job status", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    Medium,
    Low,
}

impl JobPriority {
    pub const ALL: [JobPriority; 3] = [JobPriority::High, JobPriority::Medium, JobPriority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::High => "high",
            JobPriority::Medium => "medium",
            JobPriority::Low => "low",
        }
    }
}

impl FromStr for JobPriority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Older rows carry "High" capitalised.
        let lowered = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == lowered)
            .ok_or_else(|| ParseEnumError::new("job priority", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("severity", s))
    }
}

/// A recorded bearing defect. There is no `Normal` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultType {
    OuterRaceFault,
    InnerRaceFault,
    BallFault,
}

impl FaultType {
    pub const ALL: [FaultType; 3] = [
        FaultType::OuterRaceFault,
        FaultType::InnerRaceFault,
        FaultType::BallFault,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultType::OuterRaceFault => "OuterRaceFault",
            FaultType::InnerRaceFault => "InnerRaceFault",
            FaultType::BallFault => "BallFault",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FaultType::OuterRaceFault => "Outer Race Fault",
            FaultType::InnerRaceFault => "Inner Race Fault",
            FaultType::BallFault => "Ball Fault",
        }
    }
}

impl FromStr for FaultType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s || v.label() == s)
            .ok_or_else(|| ParseEnumError::new("fault type", s))
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifier output: one of the fault types, or `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FaultCategory {
    Fault(FaultType),
    Normal,
}

impl FaultCategory {
    pub fn fault_type(&self) -> Option<FaultType> {
        match self {
            FaultCategory::Fault(fault) => Some(*fault),
            FaultCategory::Normal => None,
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, FaultCategory::Normal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultCategory::Fault(fault) => fault.as_str(),
            FaultCategory::Normal => "Normal",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FaultCategory::Fault(fault) => fault.label(),
            FaultCategory::Normal => "Normal",
        }
    }
}

impl From<FaultCategory> for String {
    fn from(category: FaultCategory) -> Self {
        category.as_str().to_string()
    }
}

impl TryFrom<String> for FaultCategory {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for FaultCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "Normal" {
            return Ok(FaultCategory::Normal);
        }
        s.parse::<FaultType>()
            .map(FaultCategory::Fault)
            .map_err(|_| ParseEnumError::new("fault category", s))
    }
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_status_round_trips_through_str() {
        for status in MachineStatus::ALL {
            assert_eq!(status.as_str().parse::<MachineStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_values_are_rejected() {
        let err = "offline".parse::<MachineStatus>().unwrap_err();
        assert_eq!(err.kind, "machine status");
        assert_eq!(err.value, "offline");

        assert!("archived".parse::<JobStatus>().is_err());
        assert!("urgent".parse::<JobPriority>().is_err());
        assert!("Normal".parse::<FaultType>().is_err());
    }

    #[test]
    fn test_priority_accepts_legacy_capitalisation() {
        assert_eq!("High".parse::<JobPriority>().unwrap(), JobPriority::High);
    }

    #[test]
    fn test_fault_category_parses_labels_and_identifiers() {
        assert_eq!(
            "Inner Race Fault".parse::<FaultCategory>().unwrap(),
            FaultCategory::Fault(FaultType::InnerRaceFault)
        );
        assert_eq!(
            "BallFault".parse::<FaultCategory>().unwrap(),
            FaultCategory::Fault(FaultType::BallFault)
        );
        assert_eq!("Normal".parse::<FaultCategory>().unwrap(), FaultCategory::Normal);
        assert!("Gearbox".parse::<FaultCategory>().is_err());
    }

    #[test]
    fn test_active_job_statuses() {
        assert!(JobStatus::Running.is_active());
        assert!(JobStatus::Pending.is_active());
        assert!(!JobStatus::Paused.is_active());
        assert!(!JobStatus::Completed.is_active());
        assert!(!JobStatus::Failed.is_active());
    }

    #[test]
    fn test_fault_category_serializes_as_identifier() {
        let json = serde_json::to_string(&FaultCategory::Fault(FaultType::OuterRaceFault)).unwrap();
        assert_eq!(json, "\"OuterRaceFault\"");
        let normal: FaultCategory = serde_json::from_str("\"Normal\"").unwrap();
        assert_eq!(normal, FaultCategory::Normal);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&MachineStatus::Maintenance).unwrap();
        assert_eq!(json, "\"maintenance\"");
        let parsed: Result<JobStatus, _> = serde_json::from_str("\"archived\"");
        assert!(parsed.is_err());
    }
}
