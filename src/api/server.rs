use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::engine::Orchestrator;
use crate::telemetry::TelemetryManager;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub telemetry: Arc<TelemetryManager>,
    /// Used when a simulator start request names no interval.
    pub default_interval_secs: u64,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        telemetry: Arc<TelemetryManager>,
        default_interval_secs: u64,
    ) -> Self {
        Self {
            orchestrator,
            telemetry,
            default_interval_secs,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/machines",
            get(handlers::list_machines).post(handlers::create_machine),
        )
        .route(
            "/machines/:id",
            get(handlers::get_machine)
                .patch(handlers::update_machine)
                .delete(handlers::delete_machine),
        )
        .route("/machines/:id/jobs", get(handlers::get_machine_jobs))
        .route("/machines/:id/classify", post(handlers::classify_machine))
        .route("/machines/:id/reassign", post(handlers::reassign_machine))
        .route("/machines/:id/simulator/start", post(handlers::start_simulator))
        .route("/machines/:id/simulator/stop", post(handlers::stop_simulator))
        .route("/jobs", get(handlers::list_jobs).post(handlers::create_job))
        .route("/jobs/:id", delete(handlers::delete_job))
        .route("/faults", get(handlers::list_faults))
        .route("/summary", get(handlers::fleet_summary))
        .route("/notifications", get(handlers::list_notifications))
        .route("/notifications/read", post(handlers::mark_notifications_read))
        .route("/events", get(handlers::stream_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    log::info!("Faultline API server listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}
