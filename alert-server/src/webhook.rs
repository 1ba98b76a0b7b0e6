use alert_core::decision::SessionContext;
use alert_core::event_log::{AlertActivity, Event, EventLog};
use alert_core::report::Report;
use alert_core::router::AlertRouter;
use alert_core::workspace::Workspace;
use alert_schema::Provider;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const DEFAULT_ALERT_LIMIT: usize = 50;

pub struct AppState<W> {
    pub router: AlertRouter<W>,
    pub context: SessionContext,
    pub dry_run: bool,
}

type ApiError = (StatusCode, String);

pub fn webhook_router<W>(state: Arc<AppState<W>>) -> Router
where
    W: Workspace + Send + Sync + 'static,
{
    Router::new()
        .route("/webhook", post(handle_detected::<W>))
        .route("/webhook/:provider", post(handle_provider::<W>))
        .route("/alerts", get(recent_alerts::<W>))
        .route("/alerts/:id/events", get(alert_events::<W>))
        .with_state(state)
}

/// Provider named in a webhook path, or 404.
pub fn provider_from_path(name: &str) -> Result<Provider, ApiError> {
    Provider::from_name(name).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("unknown alert provider '{name}'"),
        )
    })
}

async fn handle_detected<W>(
    State(state): State<Arc<AppState<W>>>,
    Json(payload): Json<Value>,
) -> Result<Json<Report>, ApiError>
where
    W: Workspace + Send + Sync + 'static,
{
    let provider = Provider::detect(&payload);
    route_alert(state, provider, payload).await
}

async fn handle_provider<W>(
    State(state): State<Arc<AppState<W>>>,
    Path(provider): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Report>, ApiError>
where
    W: Workspace + Send + Sync + 'static,
{
    let provider = provider_from_path(&provider)?;
    route_alert(state, provider, payload).await
}

async fn route_alert<W>(
    state: Arc<AppState<W>>,
    provider: Provider,
    payload: Value,
) -> Result<Json<Report>, ApiError>
where
    W: Workspace + Send + Sync + 'static,
{
    tracing::debug!(%provider, "webhook received");
    tokio::task::spawn_blocking(move || {
        state
            .router
            .handle_as(provider, &payload, &state.context, state.dry_run)
    })
    .await
    .map(Json)
    .map_err(|err| {
        tracing::error!(error = %err, "alert handler panicked");
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertListQuery {
    pub limit: Option<usize>,
}

async fn recent_alerts<W>(
    State(state): State<Arc<AppState<W>>>,
    Query(query): Query<AlertListQuery>,
) -> Result<Json<Vec<AlertActivity>>, ApiError>
where
    W: Workspace + Send + Sync + 'static,
{
    let log = event_log(&state)?;
    let limit = query.limit.unwrap_or(DEFAULT_ALERT_LIMIT);
    tokio::task::spawn_blocking(move || log.recent_alerts(limit))
        .await
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?
        .map(Json)
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}

async fn alert_events<W>(
    State(state): State<Arc<AppState<W>>>,
    Path(alert_id): Path<String>,
) -> Result<Json<Vec<Event>>, ApiError>
where
    W: Workspace + Send + Sync + 'static,
{
    let log = event_log(&state)?;
    tokio::task::spawn_blocking(move || log.events_for_alert(&alert_id))
        .await
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?
        .map(Json)
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}

fn event_log<W: Workspace>(state: &AppState<W>) -> Result<EventLog, ApiError> {
    state
        .router
        .event_log()
        .cloned()
        .ok_or_else(|| (StatusCode::NOT_FOUND, "event log is disabled".into()))
}
