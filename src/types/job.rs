use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FaultType, JobId, JobPriority, JobStatus, MachineId, ValidationError};

pub const MAX_JOB_NAME_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub machine_id: Option<MachineId>,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    #[serde(default)]
    pub machine_id: Option<MachineId>,
    #[serde(default = "default_status")]
    pub status: JobStatus,
    #[serde(default = "default_priority")]
    pub priority: JobPriority,
    #[serde(default = "Utc::now")]
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

fn default_status() -> JobStatus {
    JobStatus::Pending
}

fn default_priority() -> JobPriority {
    JobPriority::Medium
}

impl NewJob {
    pub fn new(name: impl Into<String>, machine_id: Option<MachineId>) -> Self {
        Self {
            name: name.into(),
            machine_id,
            status: JobStatus::Pending,
            priority: JobPriority::Medium,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// The high-priority pending job raised after a fault is detected.
    pub fn maintenance(machine_id: MachineId, fault: FaultType) -> Self {
        Self {
            name: format!("Maintenance – {}", fault.label()),
            machine_id: Some(machine_id),
            status: JobStatus::Pending,
            priority: JobPriority::High,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    /// Field-level checks. Whether `machine_id` exists is the caller's concern.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::Required { field: "name" });
        }
        if name.chars().count() > MAX_JOB_NAME_LEN {
            return Err(ValidationError::TooLong {
                field: "name",
                max: MAX_JOB_NAME_LEN,
            });
        }
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(ValidationError::EndBeforeStart);
            }
        }
        Ok(())
    }

    pub fn into_job(self, id: JobId) -> Job {
        Job {
            id,
            name: self.name.trim().to_string(),
            machine_id: self.machine_id,
            status: self.status,
            priority: self.priority,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOrder {
    #[default]
    Id,
    StartTime,
}

/// Selection for [`crate::storage::Storage::list_jobs`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub machine_id: Option<MachineId>,
    /// `None` matches every status.
    pub statuses: Option<Vec<JobStatus>>,
    pub order: JobOrder,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_machine(machine_id: MachineId) -> Self {
        Self {
            machine_id: Some(machine_id),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[JobStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn ordered_by(mut self, order: JobOrder) -> Self {
        self.order = order;
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        if let Some(machine_id) = self.machine_id {
            if job.machine_id != Some(machine_id) {
                return false;
            }
        }
        match &self.statuses {
            Some(statuses) => statuses.contains(&job.status),
            None => true,
        }
    }
}
