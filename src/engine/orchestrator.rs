use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::diagnostics::{classify, score_vector, HealthBand};
use crate::engine::reassignment::{ReassignmentOutcome, ReassignmentScheduler};
use crate::providers::{Prediction, PredictionService};
use crate::storage::{NotificationSink, Storage};
use crate::telemetry::{SensorCache, TelemetryReading};
use crate::types::{
    FaultCategory, FaultEvent, FaultEventId, FaultType, Job, JobFilter, JobId, JobOrder, Machine,
    MachineId, MachinePatch, MachineStatus, NewFaultEvent, NewJob, NewMachine, NotFoundError,
    SensorVector, ValidationError,
};

const SNAPSHOT_CHANNEL_CAPACITY: usize = 1024;
const RECENT_FAULT_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Reassign a critical machine's active jobs as soon as a fault is recorded.
    pub auto_reassign_critical: bool,
}

/// A machine record together with its display-only health score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub machine: Machine,
    pub display_score: i32,
    pub band: HealthBand,
}

impl MachineSnapshot {
    pub fn of(machine: Machine) -> Self {
        let display_score = score_vector(&machine.sensor_vector());
        Self {
            band: HealthBand::from_score(display_score),
            display_score,
            machine,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub machine_id: MachineId,
    pub reading: SensorVector,
    pub category: FaultCategory,
    /// Remote model output. Never used for any downstream effect.
    pub prediction: Option<Prediction>,
    pub fault_event_id: Option<FaultEventId>,
    pub maintenance_job_id: Option<JobId>,
    pub reassignment: Option<ReassignmentOutcome>,
    /// Set when auto-reassignment was attempted and failed. The fault is still
    /// recorded and the maintenance job still opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reassignment_error: Option<String>,
    /// The machine's jobs after classification, by start time.
    pub jobs: Vec<Job>,
}

/// Plant-wide counts for a dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub machines: usize,
    pub by_status: BTreeMap<String, usize>,
    pub active_jobs: usize,
    pub faults_by_type: BTreeMap<String, usize>,
    /// Newest first.
    pub recent_faults: Vec<FaultEvent>,
}

/// Ties telemetry, diagnostics and scheduling to the store.
pub struct Orchestrator {
    store: Arc<dyn Storage>,
    notifications: Arc<dyn NotificationSink>,
    cache: Arc<dyn SensorCache>,
    prediction: Option<Arc<dyn PredictionService>>,
    scheduler: ReassignmentScheduler,
    config: OrchestratorConfig,
    snapshots: broadcast::Sender<MachineSnapshot>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Storage>,
        notifications: Arc<dyn NotificationSink>,
        cache: Arc<dyn SensorCache>,
        config: OrchestratorConfig,
    ) -> Self {
        let (snapshots, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            scheduler: ReassignmentScheduler::new(Arc::clone(&store)),
            store,
            notifications,
            cache,
            prediction: None,
            config,
            snapshots,
        }
    }

    pub fn with_prediction(mut self, service: Arc<dyn PredictionService>) -> Self {
        self.prediction = Some(service);
        self
    }

    pub fn store(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.store)
    }

    pub fn notifications(&self) -> Arc<dyn NotificationSink> {
        Arc::clone(&self.notifications)
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<MachineSnapshot> {
        self.snapshots.subscribe()
    }

    async fn require_machine(&self, id: MachineId) -> Result<Machine> {
        self.store
            .get_machine(id)
            .await?
            .ok_or_else(|| NotFoundError::machine(id).into())
    }

    pub async fn machine_snapshot(&self, id: MachineId) -> Result<MachineSnapshot> {
        Ok(MachineSnapshot::of(self.require_machine(id).await?))
    }

    pub async fn list_snapshots(&self, status: Option<MachineStatus>) -> Result<Vec<MachineSnapshot>> {
        let machines = self.store.list_machines(status).await?;
        Ok(machines.into_iter().map(MachineSnapshot::of).collect())
    }

    /// Writes a telemetry emission onto the machine record and publishes the
    /// refreshed snapshot. Failures are logged, never returned.
    pub async fn apply_reading(&self, reading: &TelemetryReading) -> Option<MachineSnapshot> {
        let updated = self
            .store
            .update_machine_telemetry(reading.machine_id, reading.reading, reading.at)
            .await;

        match updated {
            Ok(Some(machine)) => {
                let snapshot = MachineSnapshot::of(machine);
                let _ = self.snapshots.send(snapshot.clone());
                Some(snapshot)
            }
            Ok(None) => {
                log::warn!(
                    "Dropping telemetry for unknown machine {}",
                    reading.machine_id
                );
                None
            }
            Err(e) => {
                log::warn!(
                    "Failed to store telemetry for machine {}: {}",
                    reading.machine_id,
                    e
                );
                None
            }
        }
    }

    /// Applies readings until every sender is gone.
    ///
    /// Writes are applied one at a time, so each machine's readings land in
    /// emission order. A slow store backs up the channel for every machine and
    /// the oldest readings are dropped on lag.
    pub async fn run_telemetry_listener(&self, mut readings: broadcast::Receiver<TelemetryReading>) {
        loop {
            match readings.recv().await {
                Ok(reading) => {
                    self.apply_reading(&reading).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Telemetry listener lagged, skipped {} reading(s)", skipped);
                }
                Err(RecvError::Closed) => {
                    log::debug!("Telemetry channel closed, listener exiting");
                    break;
                }
            }
        }
    }

    async fn current_reading(&self, machine: &Machine) -> SensorVector {
        match self.cache.get(machine.id).await {
            Ok(Some(cached)) => cached,
            Ok(None) => machine.sensor_vector(),
            Err(e) => {
                log::warn!("Sensor cache read failed for machine {}: {}", machine.id, e);
                machine.sensor_vector()
            }
        }
    }

    async fn advisory_prediction(&self, machine_id: MachineId, reading: &SensorVector) -> Option<Prediction> {
        let service = self.prediction.as_ref()?;
        match service.predict(reading).await {
            Ok(prediction) => {
                log::info!(
                    "Prediction service suggested '{}' for machine {}",
                    prediction.label,
                    machine_id
                );
                Some(prediction)
            }
            Err(e) => {
                log::warn!("Prediction failed for machine {}: {}", machine_id, e);
                None
            }
        }
    }

    /// Classifies the machine's current reading and records any fault.
    ///
    /// A non-normal category inserts a fault event, appends a notification and
    /// opens a maintenance job. The remote prediction is informational only.
    pub async fn classify_machine(&self, id: MachineId) -> Result<ClassificationReport> {
        let machine = self.require_machine(id).await?;
        let reading = self.current_reading(&machine).await;
        let prediction = self.advisory_prediction(id, &reading).await;

        let category = classify(&reading);
        log::info!("Machine {} ({}) classified as {}", id, machine.name, category);

        let mut report = ClassificationReport {
            machine_id: id,
            reading,
            category,
            prediction,
            fault_event_id: None,
            maintenance_job_id: None,
            reassignment: None,
            reassignment_error: None,
            jobs: Vec::new(),
        };

        if let Some(fault) = category.fault_type() {
            let event = self
                .store
                .insert_fault_event(NewFaultEvent::detected(id, fault))
                .await?;
            report.fault_event_id = Some(event.id);

            self.notifications
                .append(
                    &format!("Fault: {}", machine.name),
                    &format!("{} detected on {}", fault.label(), machine.name),
                )
                .await?;

            // Runs before the maintenance job exists so that job stays here.
            if self.config.auto_reassign_critical && machine.status == MachineStatus::Critical {
                match self.scheduler.reassign(id).await {
                    Ok(outcome) => report.reassignment = Some(outcome),
                    Err(e) => {
                        log::warn!("Auto-reassignment for machine {} failed: {:#}", id, e);
                        report.reassignment_error = Some(format!("{:#}", e));
                    }
                }
            }

            let job = self.store.insert_job(NewJob::maintenance(id, fault)).await?;
            report.maintenance_job_id = Some(job.id);
        }

        report.jobs = self
            .store
            .list_jobs(&JobFilter::for_machine(id).ordered_by(JobOrder::StartTime))
            .await?;
        Ok(report)
    }

    pub async fn reassign(&self, id: MachineId) -> Result<ReassignmentOutcome> {
        self.require_machine(id).await?;
        self.scheduler.reassign(id).await
    }

    pub async fn create_machine(&self, machine: NewMachine) -> Result<MachineSnapshot> {
        let created = self.store.insert_machine(machine).await?;
        log::info!("Added machine {} ({})", created.id, created.name);
        Ok(MachineSnapshot::of(created))
    }

    pub async fn update_machine(&self, id: MachineId, patch: MachinePatch) -> Result<MachineSnapshot> {
        patch.validate()?;
        let mut machine = self.require_machine(id).await?;
        patch.apply_to(&mut machine);
        machine.updated_at = Utc::now();
        self.store.update_machine(&machine).await?;
        log::info!("Updated machine {} ({}), status {}", id, machine.name, machine.status.as_str());
        Ok(MachineSnapshot::of(machine))
    }

    /// Jobs on the machine are detached and its fault history dropped.
    pub async fn delete_machine(&self, id: MachineId) -> Result<()> {
        if !self.store.delete_machine(id).await? {
            return Err(NotFoundError::machine(id).into());
        }
        log::info!("Deleted machine {}", id);
        Ok(())
    }

    pub async fn delete_job(&self, id: JobId) -> Result<()> {
        if !self.store.delete_job(id).await? {
            return Err(NotFoundError::job(id).into());
        }
        log::info!("Deleted job {}", id);
        Ok(())
    }

    pub async fn summary(&self) -> Result<FleetSummary> {
        let machines = self.store.list_machines(None).await?;
        let mut by_status: BTreeMap<String, usize> = MachineStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), 0))
            .collect();
        for machine in &machines {
            *by_status.entry(machine.status.as_str().to_string()).or_default() += 1;
        }

        let active_jobs = self
            .store
            .list_jobs(&JobFilter::all())
            .await?
            .iter()
            .filter(|job| job.is_active())
            .count();

        let faults = self.store.list_fault_events(None).await?;
        let mut faults_by_type: BTreeMap<String, usize> = FaultType::ALL
            .iter()
            .map(|fault| (fault.as_str().to_string(), 0))
            .collect();
        for event in &faults {
            *faults_by_type.entry(event.fault_type.as_str().to_string()).or_default() += 1;
        }

        Ok(FleetSummary {
            machines: machines.len(),
            by_status,
            active_jobs,
            faults_by_type,
            recent_faults: faults.into_iter().take(RECENT_FAULT_LIMIT).collect(),
        })
    }

    /// Validates, checks the target machine exists, then inserts.
    pub async fn create_job(&self, job: NewJob) -> Result<Job> {
        job.validate()?;
        if let Some(machine_id) = job.machine_id {
            if self.store.get_machine(machine_id).await?.is_none() {
                return Err(ValidationError::UnknownMachine(machine_id).into());
            }
        }
        let created = self.store.insert_job(job).await?;
        log::info!("Created job {} ({})", created.id, created.name);
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryNotificationLog, InMemoryStore};
    use crate::telemetry::InMemorySensorCache;
    use crate::types::{FaultType, JobPriority, JobStatus, NewMachine};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        store: InMemoryStore,
        notifications: InMemoryNotificationLog,
        cache: InMemorySensorCache,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: InMemoryStore::new(),
                notifications: InMemoryNotificationLog::new(),
                cache: InMemorySensorCache::new(),
            }
        }

        fn orchestrator(&self, config: OrchestratorConfig) -> Orchestrator {
            Orchestrator::new(
                Arc::new(self.store.clone()),
                Arc::new(self.notifications.clone()),
                Arc::new(self.cache.clone()),
                config,
            )
        }

        async fn machine(&self, id: MachineId, status: MachineStatus, sensors: SensorVector) {
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

    struct CountingPrediction {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PredictionService for CountingPrediction {
        async fn predict(&self, _sample: &SensorVector) -> Result<Prediction> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("model offline");
            }
            Ok(Prediction {
                label: "Ball Fault".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_inner_race_fault_side_effects() {
        let h = Harness::new();
        h.machine(1, MachineStatus::Warning, SensorVector::new(95.0, 1.0, 50.0)).await;
        let orchestrator = h.orchestrator(OrchestratorConfig::default());

        let report = orchestrator.classify_machine(1).await.unwrap();
        assert_eq!(report.category, FaultCategory::Fault(FaultType::InnerRaceFault));

        let events = h.store.list_fault_events(Some(1)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].component, "bearing");
        assert_eq!(Some(events[0].id), report.fault_event_id);

        let notes = h.notifications.list().await.unwrap();
        assert_eq!(notes[0].title, "Fault: Machine 1");
        assert_eq!(notes[0].message, "Inner Race Fault detected on Machine 1");

        assert_eq!(report.jobs.len(), 1);
        let job = &report.jobs[0];
        assert_eq!(job.name, "Maintenance – Inner Race Fault");
        assert_eq!(job.priority, JobPriority::High);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.machine_id, Some(1));
    }

    #[tokio::test]
    async fn test_normal_reading_has_no_side_effects() {
        let h = Harness::new();
        h.machine(1, MachineStatus::Healthy, SensorVector::new(20.0, 1.0, 50.0)).await;
        let writes = h.store.write_count();
        let orchestrator = h.orchestrator(OrchestratorConfig::default());

        let report = orchestrator.classify_machine(1).await.unwrap();
        assert!(report.category.is_normal());
        assert!(report.fault_event_id.is_none());
        assert!(report.maintenance_job_id.is_none());
        assert_eq!(h.store.write_count(), writes);
        assert!(h.notifications.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cached_reading_preferred_over_record() {
        let h = Harness::new();
        h.machine(1, MachineStatus::Healthy, SensorVector::new(20.0, 1.0, 50.0)).await;
        h.cache.put(1, SensorVector::new(20.0, 8.2, 50.0)).await.unwrap();
        let orchestrator = h.orchestrator(OrchestratorConfig::default());

        let report = orchestrator.classify_machine(1).await.unwrap();
        assert_eq!(report.category, FaultCategory::Fault(FaultType::OuterRaceFault));
        assert_eq!(report.reading.vibration, 8.2);
    }

    #[tokio::test]
    async fn test_prediction_is_advisory() {
        let h = Harness::new();
        h.machine(1, MachineStatus::Healthy, SensorVector::new(20.0, 1.0, 50.0)).await;
        let service = Arc::new(CountingPrediction {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let orchestrator = h
            .orchestrator(OrchestratorConfig::default())
            .with_prediction(service.clone());

        let report = orchestrator.classify_machine(1).await.unwrap();
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.prediction.unwrap().label, "Ball Fault");
        assert!(report.category.is_normal());
        assert!(report.maintenance_job_id.is_none());
    }

    #[tokio::test]
    async fn test_prediction_failure_is_swallowed() {
        let h = Harness::new();
        h.machine(1, MachineStatus::Healthy, SensorVector::new(20.0, 1.0, 95.0)).await;
        let orchestrator = h
            .orchestrator(OrchestratorConfig::default())
            .with_prediction(Arc::new(CountingPrediction {
                calls: AtomicUsize::new(0),
                fail: true,
            }));

        let report = orchestrator.classify_machine(1).await.unwrap();
        assert!(report.prediction.is_none());
        assert_eq!(report.category, FaultCategory::Fault(FaultType::BallFault));
    }

    #[tokio::test]
    async fn test_auto_reassign_keeps_maintenance_job_local() {
        let h = Harness::new();
        h.machine(1, MachineStatus::Critical, SensorVector::new(40.0, 9.0, 50.0)).await;
        h.machine(2, MachineStatus::Healthy, SensorVector::default()).await;
        h.store
            .insert_job(NewJob::new("Batch A", Some(1)).with_status(JobStatus::Running))
            .await
            .unwrap();
        let orchestrator = h.orchestrator(OrchestratorConfig {
            auto_reassign_critical: true,
        });

        let report = orchestrator.classify_machine(1).await.unwrap();
        assert_eq!(report.reassignment.as_ref().map(|r| r.count()), Some(1));
        let names: Vec<_> = report.jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["Maintenance – Outer Race Fault"]);

        let moved = h.store.list_jobs(&JobFilter::for_machine(2)).await.unwrap();
        assert_eq!(moved[0].name, "Batch A");
    }

    #[tokio::test]
    async fn test_unknown_machine_is_not_found() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(OrchestratorConfig::default());

        let err = orchestrator.reassign(42).await.unwrap_err();
        assert_eq!(err.downcast_ref::<NotFoundError>(), Some(&NotFoundError::machine(42)));
        assert!(orchestrator.classify_machine(42).await.is_err());
    }

    #[tokio::test]
    async fn test_apply_reading_updates_record_and_publishes() {
        let h = Harness::new();
        h.machine(1, MachineStatus::Critical, SensorVector::default()).await;
        let orchestrator = h.orchestrator(OrchestratorConfig::default());
        let mut snapshots = orchestrator.subscribe_snapshots();

        let reading = TelemetryReading {
            machine_id: 1,
            reading: SensorVector::new(95.0, 1.0, 50.0),
            at: Utc::now(),
        };
        let snapshot = orchestrator.apply_reading(&reading).await.unwrap();
        assert_eq!(snapshot.display_score, 55);
        assert_eq!(snapshot.band, HealthBand::Poor);
        assert_eq!(snapshot.machine.status, MachineStatus::Critical);
        assert_eq!(snapshots.recv().await.unwrap(), snapshot);

        let missing = TelemetryReading { machine_id: 9, ..reading };
        assert!(orchestrator.apply_reading(&missing).await.is_none());
    }

    #[tokio::test]
    async fn test_create_job_rejects_unknown_machine() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(OrchestratorConfig::default());

        let err = orchestrator
            .create_job(NewJob::new("Batch", Some(7)))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::UnknownMachine(7))
        );
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_update_machine_validates_before_writing() {
        let h = Harness::new();
        h.machine(1, MachineStatus::Healthy, SensorVector::new(80.0, 2.0, 60.0)).await;
        let orchestrator = h.orchestrator(OrchestratorConfig::default());
        let writes = h.store.write_count();

        let blank = MachinePatch {
            name: Some(" ".to_string()),
            status: Some(MachineStatus::Critical),
            ..MachinePatch::default()
        };
        assert!(orchestrator.update_machine(1, blank).await.is_err());
        assert_eq!(h.store.write_count(), writes);

        let patch = MachinePatch {
            status: Some(MachineStatus::Critical),
            ..MachinePatch::default()
        };
        let snapshot = orchestrator.update_machine(1, patch).await.unwrap();
        assert_eq!(snapshot.machine.status, MachineStatus::Critical);
        assert_eq!(snapshot.machine.temperature, 80.0);
        let stored = h.store.get_machine(1).await.unwrap().unwrap();
        assert_eq!(stored.status, MachineStatus::Critical);

        let err = orchestrator
            .update_machine(9, MachinePatch {
                status: Some(MachineStatus::Healthy),
                ..MachinePatch::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<NotFoundError>(), Some(&NotFoundError::machine(9)));
    }

    #[tokio::test]
    async fn test_deletes_report_missing_records() {
        let h = Harness::new();
        h.machine(1, MachineStatus::Healthy, SensorVector::default()).await;
        let job = h.store.insert_job(NewJob::new("Batch", Some(1))).await.unwrap();
        let orchestrator = h.orchestrator(OrchestratorConfig::default());

        orchestrator.delete_job(job.id).await.unwrap();
        let err = orchestrator.delete_job(job.id).await.unwrap_err();
        assert_eq!(err.downcast_ref::<NotFoundError>(), Some(&NotFoundError::job(job.id)));

        orchestrator.delete_machine(1).await.unwrap();
        assert!(orchestrator.delete_machine(1).await.is_err());
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let h = Harness::new();
        h.machine(1, MachineStatus::Healthy, SensorVector::new(20.0, 1.0, 95.0)).await;
        h.machine(2, MachineStatus::Critical, SensorVector::new(20.0, 8.0, 40.0)).await;
        h.machine(3, MachineStatus::Healthy, SensorVector::default()).await;
        h.store
            .insert_job(NewJob::new("Batch", Some(3)).with_status(JobStatus::Completed))
            .await
            .unwrap();
        let orchestrator = h.orchestrator(OrchestratorConfig::default());
        orchestrator.classify_machine(1).await.unwrap();
        orchestrator.classify_machine(2).await.unwrap();
        orchestrator.classify_machine(2).await.unwrap();

        let summary = orchestrator.summary().await.unwrap();
        assert_eq!(summary.machines, 3);
        assert_eq!(summary.by_status["healthy"], 2);
        assert_eq!(summary.by_status["critical"], 1);
        assert_eq!(summary.by_status["maintenance"], 0);
        assert_eq!(summary.active_jobs, 3);
        assert_eq!(summary.faults_by_type["OuterRaceFault"], 2);
        assert_eq!(summary.faults_by_type["BallFault"], 1);
        assert_eq!(summary.faults_by_type["InnerRaceFault"], 0);
        assert_eq!(summary.recent_faults.len(), 3);
    }
}
