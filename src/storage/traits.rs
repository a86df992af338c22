use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    FaultEvent, Job, JobFilter, JobId, Machine, MachineId, MachineStatus, NewFaultEvent, NewJob,
    NewMachine, SensorVector,
};

/// Record store for machines, jobs and fault events.
///
/// Writes are last-write-wins; there is no concurrency token and no
/// multi-record transaction.
#[async_trait]
pub trait Storage: Send + Sync {
    // Machine operations
    async fn insert_machine(&self, machine: NewMachine) -> Result<Machine>;
    async fn get_machine(&self, id: MachineId) -> Result<Option<Machine>>;
    /// Ordered by ascending id.
    async fn list_machines(&self, status: Option<MachineStatus>) -> Result<Vec<Machine>>;
    async fn update_machine(&self, machine: &Machine) -> Result<()>;
    /// Writes the sensor fields and `updated_at`; returns `None` if the machine is gone.
    async fn update_machine_telemetry(
        &self,
        id: MachineId,
        reading: SensorVector,
        at: DateTime<Utc>,
    ) -> Result<Option<Machine>>;
    async fn delete_machine(&self, id: MachineId) -> Result<bool>;

    // Job operations
    async fn insert_job(&self, job: NewJob) -> Result<Job>;
    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;
    async fn assign_job(&self, id: JobId, machine_id: MachineId) -> Result<Job>;
    async fn delete_job(&self, id: JobId) -> Result<bool>;

    // Fault events
    async fn insert_fault_event(&self, event: NewFaultEvent) -> Result<FaultEvent>;
    /// Newest first.
    async fn list_fault_events(&self, machine_id: Option<MachineId>) -> Result<Vec<FaultEvent>>;
}
