//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use faultline::engine::{Orchestrator, OrchestratorConfig};
use faultline::storage::{InMemoryNotificationLog, InMemoryStore, Storage};
use faultline::telemetry::{FixedNoise, InMemorySensorCache, TelemetryManager};
use faultline::types::{
    FaultEvent, Job, JobFilter, JobId, Machine, MachineId, MachineStatus, NewFaultEvent, NewJob,
    NewMachine, SensorVector,
};

/// In-memory store that can be told to fail specific writes.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    /// Number of `assign_job` calls that succeed before every later one fails.
    assign_budget: Arc<AtomicUsize>,
    limit_assignments: Arc<AtomicBool>,
    fail_telemetry: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_assignments_after(&self, successes: usize) {
        self.assign_budget.store(successes, Ordering::SeqCst);
        self.limit_assignments.store(true, Ordering::SeqCst);
    }

    pub fn fail_telemetry_writes(&self, fail: bool) {
        self.fail_telemetry.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for FlakyStore {
    async fn insert_machine(&self, machine: NewMachine) -> Result<Machine> {
        self.inner.insert_machine(machine).await
    }

    async fn get_machine(&self, id: MachineId) -> Result<Option<Machine>> {
        self.inner.get_machine(id).await
    }

    async fn list_machines(&self, status: Option<MachineStatus>) -> Result<Vec<Machine>> {
        self.inner.list_machines(status).await
    }

    async fn update_machine(&self, machine: &Machine) -> Result<()> {
        self.inner.update_machine(machine).await
    }

    async fn update_machine_telemetry(
        &self,
        id: MachineId,
        reading: SensorVector,
        at: DateTime<Utc>,
    ) -> Result<Option<Machine>> {
        if self.fail_telemetry.load(Ordering::SeqCst) {
            bail!("database unavailable");
        }
        self.inner.update_machine_telemetry(id, reading, at).await
    }

    async fn delete_machine(&self, id: MachineId) -> Result<bool> {
        self.inner.delete_machine(id).await
    }

    async fn insert_job(&self, job: NewJob) -> Result<Job> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.inner.list_jobs(filter).await
    }

    async fn assign_job(&self, id: JobId, machine_id: MachineId) -> Result<Job> {
        if self.limit_assignments.load(Ordering::SeqCst) {
            let remaining = self.assign_budget.load(Ordering::SeqCst);
            if remaining == 0 {
                bail!("connection lost while assigning job {}", id);
            }
            self.assign_budget.store(remaining - 1, Ordering::SeqCst);
        }
        self.inner.assign_job(id, machine_id).await
    }

    async fn delete_job(&self, id: JobId) -> Result<bool> {
        self.inner.delete_job(id).await
    }

    async fn insert_fault_event(&self, event: NewFaultEvent) -> Result<FaultEvent> {
        self.inner.insert_fault_event(event).await
    }

    async fn list_fault_events(&self, machine_id: Option<MachineId>) -> Result<Vec<FaultEvent>> {
        self.inner.list_fault_events(machine_id).await
    }
}

pub struct Plant {
    pub store: Arc<dyn Storage>,
    pub notifications: InMemoryNotificationLog,
    pub cache: Arc<InMemorySensorCache>,
    pub orchestrator: Arc<Orchestrator>,
    pub telemetry: Arc<TelemetryManager>,
}

impl Plant {
    pub fn new(store: Arc<dyn Storage>, config: OrchestratorConfig, noise: f64) -> Self {
        let notifications = InMemoryNotificationLog::new();
        let cache = Arc::new(InMemorySensorCache::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::new(notifications.clone()),
            cache.clone(),
            config,
        ));
        let telemetry = Arc::new(TelemetryManager::new(cache.clone(), Arc::new(FixedNoise(noise))));
        Self {
            store,
            notifications,
            cache,
            orchestrator,
            telemetry,
        }
    }

    pub fn spawn_listener(&self) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let readings = self.telemetry.subscribe();
        tokio::spawn(async move { orchestrator.run_telemetry_listener(readings).await })
    }

    pub async fn machine(&self, id: MachineId, status: MachineStatus, sensors: SensorVector) {
        self.store
            .insert_machine(
                NewMachine::new(format!("Machine {}", id), status)
                    .with_id(id)
                    .with_sensors(sensors),
            )
            .await
            .unwrap();
    }
}
