//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::PathRejection},
    http::{HeaderMap, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, warn};

use super::enforce::{EnforcementRequest, Outcome, PolicyEnforcementPoint};
use crate::mtls::extract_from_headers;

/// Header carrying the per-request correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state
pub struct AppState {
    /// Policy enforcement point
    pub pep: Arc<PolicyEnforcementPoint>,
    /// Header the proxy forwards the client certificate in
    pub identity_header: HeaderName,
}

impl AppState {
    /// Bundle a PEP with the identity header name
    pub fn new(pep: Arc<PolicyEnforcementPoint>, identity_header: HeaderName) -> Self {
        Self {
            pep,
            identity_header,
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(health_handler))
        .route("/resources/{id}", any(resource_handler))
        .route("/docs/{id}", any(resource_handler))
        .route("/", any(whoami_handler))
        // Innermost first: propagate sees the id set by the outer layer
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

/// Any method on `/resources/{id}`: identity → catalog → PDP → outcome
///
/// A path id that fails to decode is not rejected here: the PEP still checks
/// the caller first and then treats the id as absent from the catalog.
async fn resource_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let id = match path {
        Ok(Path(id)) => Some(id),
        Err(e) => {
            debug!(request_id = %request_id(&headers), error = %e, "Undecodable resource id");
            None
        }
    };
    let identity_header = headers
        .get(&state.identity_header)
        .map(|v| String::from_utf8_lossy(v.as_bytes()));

    let request = EnforcementRequest {
        request_id: request_id(&headers),
        identity_header: identity_header.as_deref(),
        method: method.as_str(),
        resource_id: id.as_deref(),
    };

    state.pep.enforce(&request).await.into_response()
}

/// `/` - echoes the caller identity back, nothing else
async fn whoami_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match extract_from_headers(&headers, &state.identity_header) {
        Ok(id) => {
            debug!(request_id = %request_id(&headers), caller = %id, "Identity echo");
            (
                StatusCode::OK,
                format!("Hello {id}. Nothing to see here. Move on.\n"),
            )
                .into_response()
        }
        Err(e) => {
            warn!(
                request_id = %request_id(&headers),
                reason = e.kind(),
                error = %e,
                "Caller identity rejected"
            );
            Outcome::Unidentified(e).into_response()
        }
    }
}

/// Health check handler. Never consults the PDP.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
