use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::traits::Storage;
use crate::types::{
    FaultEvent, FaultEventId, Job, JobFilter, JobId, JobOrder, Machine, MachineId, MachineStatus,
    NewFaultEvent, NewJob, NewMachine, SensorVector, ValidationError,
};

#[derive(Clone)]
pub struct InMemoryStore {
    machines: Arc<RwLock<BTreeMap<MachineId, Machine>>>,
    jobs: Arc<RwLock<BTreeMap<JobId, Job>>>,
    faults: Arc<RwLock<BTreeMap<FaultEventId, FaultEvent>>>,
    next_machine_id: Arc<AtomicI64>,
    next_job_id: Arc<AtomicI64>,
    next_fault_id: Arc<AtomicI64>,
    writes: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            machines: Arc::new(RwLock::new(BTreeMap::new())),
            jobs: Arc::new(RwLock::new(BTreeMap::new())),
            faults: Arc::new(RwLock::new(BTreeMap::new())),
            next_machine_id: Arc::new(AtomicI64::new(1)),
            next_job_id: Arc::new(AtomicI64::new(1)),
            next_fault_id: Arc::new(AtomicI64::new(1)),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of successful mutations since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl Storage for InMemoryStore {
    async fn insert_machine(&self, machine: NewMachine) -> Result<Machine> {
        machine.validate()?;
        let mut machines = write(&self.machines)?;

        let id = match machine.id {
            Some(id) => {
                if machines.contains_key(&id) {
                    return Err(ValidationError::DuplicateMachine(id).into());
                }
                self.next_machine_id.fetch_max(id + 1, Ordering::SeqCst);
                id
            }
            None => {
                let mut id = self.next_machine_id.fetch_add(1, Ordering::SeqCst);
                while machines.contains_key(&id) {
                    id = self.next_machine_id.fetch_add(1, Ordering::SeqCst);
                }
                id
            }
        };

        let record = machine.into_machine(id);
        machines.insert(id, record.clone());
        self.record_write();
        Ok(record)
    }

    async fn get_machine(&self, id: MachineId) -> Result<Option<Machine>> {
        let machines = read(&self.machines)?;
        Ok(machines.get(&id).cloned())
    }

    async fn list_machines(&self, status: Option<MachineStatus>) -> Result<Vec<Machine>> {
        let machines = read(&self.machines)?;
        Ok(machines
            .values()
            .filter(|m| status.map_or(true, |s| m.status == s))
            .cloned()
            .collect())
    }

    async fn update_machine(&self, machine: &Machine) -> Result<()> {
        let mut machines = write(&self.machines)?;
        if !machines.contains_key(&machine.id) {
            bail!("machine {} not found", machine.id);
        }
        machines.insert(machine.id, machine.clone());
        self.record_write();
        Ok(())
    }

    async fn update_machine_telemetry(
        &self,
        id: MachineId,
        reading: SensorVector,
        at: DateTime<Utc>,
    ) -> Result<Option<Machine>> {
        let mut machines = write(&self.machines)?;
        let updated = match machines.get_mut(&id) {
            Some(machine) => {
                machine.apply_reading(reading, at);
                Some(machine.clone())
            }
            None => None,
        };
        if updated.is_some() {
            self.record_write();
        }
        Ok(updated)
    }

    /// Detaches the machine's jobs and drops its fault history, as the
    /// foreign keys do in PostgreSQL.
    async fn delete_machine(&self, id: MachineId) -> Result<bool> {
        let removed = write(&self.machines)?.remove(&id).is_some();
        if !removed {
            return Ok(false);
        }
        for job in write(&self.jobs)?.values_mut() {
            if job.machine_id == Some(id) {
                job.machine_id = None;
            }
        }
        write(&self.faults)?.retain(|_, event| event.machine_id != id);
        self.record_write();
        Ok(true)
    }

    async fn insert_job(&self, job: NewJob) -> Result<Job> {
        job.validate()?;
        let mut jobs = write(&self.jobs)?;
        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let record = job.into_job(id);
        jobs.insert(id, record.clone());
        self.record_write();
        Ok(record)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let jobs = read(&self.jobs)?;
        Ok(jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let jobs = read(&self.jobs)?;
        let mut selected: Vec<Job> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        if filter.order == JobOrder::StartTime {
            selected.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        }
        Ok(selected)
    }

    async fn assign_job(&self, id: JobId, machine_id: MachineId) -> Result<Job> {
        let mut jobs = write(&self.jobs)?;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("job {} not found", id))?;
        job.machine_id = Some(machine_id);
        let updated = job.clone();
        self.record_write();
        Ok(updated)
    }

    async fn delete_job(&self, id: JobId) -> Result<bool> {
        let mut jobs = write(&self.jobs)?;
        let removed = jobs.remove(&id).is_some();
        if removed {
            self.record_write();
        }
        Ok(removed)
    }

    async fn insert_fault_event(&self, event: NewFaultEvent) -> Result<FaultEvent> {
        let mut faults = write(&self.faults)?;
        let id = self.next_fault_id.fetch_add(1, Ordering::SeqCst);
        let record = event.into_event(id);
        faults.insert(id, record.clone());
        self.record_write();
        Ok(record)
    }

    async fn list_fault_events(&self, machine_id: Option<MachineId>) -> Result<Vec<FaultEvent>> {
        let faults = read(&self.faults)?;
        let mut events: Vec<FaultEvent> = faults
            .values()
            .filter(|f| machine_id.map_or(true, |id| f.machine_id == id))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.detected_at.cmp(&a.detected_at).then(b.id.cmp(&a.id)));
        Ok(events)
    }
}
