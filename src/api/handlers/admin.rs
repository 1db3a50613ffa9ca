use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiError, AppQuery, JSend};
use crate::storage::models::EventRecord;
use crate::workers::{MetricsSnapshot, METRICS_GROUP, PREVIEW_GROUP};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Serialize)]
pub struct EventSummary {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub state: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub locked_by: Option<String>,
    pub parked_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConsumerLag {
    pub group: &'static str,
    pub lag: u64,
}

#[derive(Debug, Serialize)]
pub struct OutboxResponse {
    pub total: u64,
    pub pending: u64,
    pub parked: u64,
    pub sent: u64,
    pub oldest_pending: Vec<EventSummary>,
    pub parked_events: Vec<EventSummary>,
    pub consumers: Vec<ConsumerLag>,
}

#[derive(Debug, serde::Deserialize)]
pub struct OutboxParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub events_deleted: u64,
    pub files_deleted: u64,
    pub versions_deleted: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health(State(state): State<Arc<AppState>>) -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: state.config.node.id.clone(),
    })
}

pub async fn outbox_status(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<OutboxParams>,
) -> Result<Json<JSend<OutboxResponse>>, ApiError> {
    let counts = state.events.stats()?;
    let oldest_pending = state.events.pending(params.limit)?;
    let parked = state.events.parked(params.limit)?;

    let topic = &state.config.outbox.topic;
    let mut consumers = Vec::new();
    for group in [PREVIEW_GROUP, METRICS_GROUP] {
        let lag = state
            .queue
            .lag(topic, group)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        consumers.push(ConsumerLag { group, lag });
    }

    Ok(JSend::success(OutboxResponse {
        total: counts.total,
        pending: counts.pending,
        parked: counts.parked,
        sent: counts.sent(),
        oldest_pending: oldest_pending.iter().map(event_to_summary).collect(),
        parked_events: parked.iter().map(event_to_summary).collect(),
        consumers,
    }))
}

pub async fn requeue_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<EventSummary>>, ApiError> {
    let event = state.events.requeue(&id)?;
    Ok(JSend::success(event_to_summary(&event)))
}

pub async fn event_metrics(State(state): State<Arc<AppState>>) -> Json<JSend<MetricsSnapshot>> {
    JSend::success(state.metrics.snapshot())
}

pub async fn admin_purge(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    let stats = state
        .db
        .purge_all()
        .map_err(|e| ApiError::internal(e.to_string()))?;

    tracing::warn!(
        files = stats.files,
        versions = stats.versions,
        events = stats.events,
        "Purged all data"
    );

    Ok(JSend::success(PurgeResponse {
        events_deleted: stats.events,
        files_deleted: stats.files,
        versions_deleted: stats.versions,
    }))
}

// ============================================================================
// Helpers
// ============================================================================

fn event_to_summary(event: &EventRecord) -> EventSummary {
    let state = if event.parked_at.is_some() {
        "parked".to_string()
    } else {
        event.delivery_state().to_string()
    };

    EventSummary {
        id: event.id.clone(),
        name: event.name.clone(),
        created_at: event.created_at.to_rfc3339(),
        state,
        retry_count: event.retry_count,
        last_error: event.last_error.clone(),
        locked_by: event.locked_by.clone(),
        parked_at: event.parked_at.map(|t| t.to_rfc3339()),
    }
}
