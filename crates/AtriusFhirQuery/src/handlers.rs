//! Request handlers for the query server

use atrius_fhir_query::{FhirAssistant, FormattedResult, SourceStatus};
use axum::{
    Json,
    extract::State,
    http::Uri,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::info;

use super::{
    error::{ServerError, ServerResult},
    models::{AssessRequest, AssessResponse, QueryRequest, SessionUpdate, SessionView},
};

/// Shared by every handler; the session inside the assistant is the only
/// mutable state.
#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<FhirAssistant>,
}

/// Handler for POST /query - answers one free-text question
pub async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ServerResult<Json<FormattedResult>> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(ServerError::BadRequest("query must not be empty".to_string()));
    }

    info!("Handling query: {}", query);
    let result = state.assistant.process(query).await;
    Ok(Json(result))
}

/// Handler for POST /assess - scores the session's server or the one given
pub async fn assess_handler(
    State(state): State<AppState>,
    Json(request): Json<AssessRequest>,
) -> ServerResult<Json<AssessResponse>> {
    let server = match request.server.as_deref() {
        Some(server) => Some(super::models::validate_server(server)?),
        None => None,
    };

    let target = server
        .clone()
        .unwrap_or_else(|| state.assistant.session().endpoint().to_string());
    info!("Handling assessment for {}", target);
    let assessment = state.assistant.executor().assess(server.as_deref()).await;
    let band = request
        .band_scheme
        .unwrap_or_default()
        .band(assessment.overall_score);

    Ok(Json(AssessResponse { assessment, band }))
}

/// Handler for GET /session
pub async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(SessionView::from_session(state.assistant.session()))
}

/// Handler for PUT /session - a changed server is connection-tested at once
pub async fn put_session(
    State(state): State<AppState>,
    Json(update): Json<SessionUpdate>,
) -> ServerResult<Json<SessionView>> {
    let session = state.assistant.session();
    if update.apply(session)? {
        info!("Server changed to {}", session.endpoint());
        state.assistant.executor().transport().probe().await;
    }
    Ok(Json(SessionView::from_session(session)))
}

/// Handler for POST /session/probe - connection test against the session's server
pub async fn probe_handler(State(state): State<AppState>) -> ServerResult<Json<SessionView>> {
    let status = state.assistant.executor().transport().probe().await;
    if let SourceStatus::Unreachable { endpoint } = status {
        return Err(ServerError::Upstream(format!(
            "FHIR server {} did not answer a metadata request",
            endpoint
        )));
    }
    Ok(Json(SessionView::from_session(state.assistant.session())))
}

/// Simple health check endpoint
pub async fn health_check() -> impl IntoResponse {
    info!("Handling Health Check request");
    Json(serde_json::json!({
        "status": "ok",
        "service": "atrius-query-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Fallback for unknown routes
pub async fn not_found(uri: Uri) -> ServerError {
    ServerError::NotFound(format!("No route for {}", uri.path()))
}
