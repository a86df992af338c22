use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::engine::{ClassificationReport, FleetSummary, MachineSnapshot, ReassignmentOutcome};
use crate::types::{
    FaultEvent, Job, JobFilter, JobId, JobOrder, JobStatus, MachineId, MachinePatch,
    MachineStatus, NewJob, NewMachine, Notification,
};

#[derive(Debug, Deserialize)]
pub struct MachineQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub machine_id: Option<MachineId>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FaultQuery {
    pub machine_id: Option<MachineId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartSimulatorRequest {
    pub interval_secs: Option<u64>,
}

impl StartSimulatorRequest {
    /// An empty body means defaults. Anything else must parse.
    fn from_body(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| ApiError::Validation(format!("invalid simulator request: {}", e)))
    }
}

#[derive(Debug, Serialize)]
pub struct SimulatorResponse {
    pub machine_id: MachineId,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub was_running: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub unread: usize,
    pub notifications: Vec<Notification>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "simulators": state.telemetry.running(),
    }))
}

pub async fn list_machines(
    State(state): State<AppState>,
    Query(query): Query<MachineQuery>,
) -> Result<Json<Vec<MachineSnapshot>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<MachineStatus>)
        .transpose()?;
    Ok(Json(state.orchestrator.list_snapshots(status).await?))
}

pub async fn create_machine(
    State(state): State<AppState>,
    payload: Result<Json<NewMachine>, JsonRejection>,
) -> Result<(StatusCode, Json<MachineSnapshot>), ApiError> {
    let Json(machine) = payload?;
    let snapshot = state.orchestrator.create_machine(machine).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn get_machine(
    State(state): State<AppState>,
    Path(id): Path<MachineId>,
) -> Result<Json<MachineSnapshot>, ApiError> {
    Ok(Json(state.orchestrator.machine_snapshot(id).await?))
}

pub async fn update_machine(
    State(state): State<AppState>,
    Path(id): Path<MachineId>,
    payload: Result<Json<MachinePatch>, JsonRejection>,
) -> Result<Json<MachineSnapshot>, ApiError> {
    let Json(patch) = payload?;
    Ok(Json(state.orchestrator.update_machine(id, patch).await?))
}

/// Also stops the machine's simulator and forgets its cached reading.
pub async fn delete_machine(
    State(state): State<AppState>,
    Path(id): Path<MachineId>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.delete_machine(id).await?;
    state.telemetry.stop(id)?;
    state.telemetry.cache().remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_machine_jobs(
    State(state): State<AppState>,
    Path(id): Path<MachineId>,
) -> Result<Json<Vec<Job>>, ApiError> {
    state.orchestrator.machine_snapshot(id).await?;
    let jobs = state
        .orchestrator
        .store()
        .list_jobs(&JobFilter::for_machine(id).ordered_by(JobOrder::StartTime))
        .await?;
    Ok(Json(jobs))
}

pub async fn classify_machine(
    State(state): State<AppState>,
    Path(id): Path<MachineId>,
) -> Result<Json<ClassificationReport>, ApiError> {
    Ok(Json(state.orchestrator.classify_machine(id).await?))
}

pub async fn reassign_machine(
    State(state): State<AppState>,
    Path(id): Path<MachineId>,
) -> Result<Json<ReassignmentOutcome>, ApiError> {
    Ok(Json(state.orchestrator.reassign(id).await?))
}

pub async fn start_simulator(
    State(state): State<AppState>,
    Path(id): Path<MachineId>,
    body: Bytes,
) -> Result<Json<SimulatorResponse>, ApiError> {
    let request = StartSimulatorRequest::from_body(&body)?;
    let snapshot = state.orchestrator.machine_snapshot(id).await?;
    let interval_secs = request.interval_secs.unwrap_or(state.default_interval_secs);

    state
        .telemetry
        .start(id, snapshot.machine.sensor_vector(), interval_secs)
        .await?;

    Ok(Json(SimulatorResponse {
        machine_id: id,
        running: true,
        interval_secs: Some(interval_secs),
        was_running: None,
    }))
}

pub async fn stop_simulator(
    State(state): State<AppState>,
    Path(id): Path<MachineId>,
) -> Result<Json<SimulatorResponse>, ApiError> {
    let was_running = state.telemetry.stop(id)?;
    Ok(Json(SimulatorResponse {
        machine_id: id,
        running: false,
        interval_secs: None,
        was_running: Some(was_running),
    }))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let mut filter = JobFilter {
        machine_id: query.machine_id,
        ..JobFilter::all()
    };
    if let Some(status) = query.status.as_deref() {
        filter = filter.with_statuses(&[status.parse::<JobStatus>()?]);
    }
    Ok(Json(state.orchestrator.store().list_jobs(&filter).await?))
}

pub async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<NewJob>, JsonRejection>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let Json(request) = payload?;
    let job = state.orchestrator.create_job(request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.delete_job(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_faults(
    State(state): State<AppState>,
    Query(query): Query<FaultQuery>,
) -> Result<Json<Vec<FaultEvent>>, ApiError> {
    let events = state
        .orchestrator
        .store()
        .list_fault_events(query.machine_id)
        .await?;
    Ok(Json(events))
}

pub async fn fleet_summary(State(state): State<AppState>) -> Result<Json<FleetSummary>, ApiError> {
    Ok(Json(state.orchestrator.summary().await?))
}

pub async fn list_notifications(
    State(state): State<AppState>,
) -> Result<Json<NotificationsResponse>, ApiError> {
    let sink = state.orchestrator.notifications();
    Ok(Json(NotificationsResponse {
        unread: sink.unread_count().await?,
        notifications: sink.list().await?,
    }))
}

pub async fn mark_notifications_read(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let marked = state.orchestrator.notifications().mark_all_read().await?;
    Ok(Json(serde_json::json!({ "marked": marked })))
}

/// Live machine snapshots as server-sent events. Lagged subscribers skip ahead.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.orchestrator.subscribe_snapshots()).filter_map(
        |snapshot| async move {
            let snapshot = snapshot.ok()?;
            Event::default()
                .event("machine")
                .json_data(&snapshot)
                .ok()
                .map(Ok)
        },
    );
    Sse::new(stream).keep_alive(KeepAlive::default())
}
