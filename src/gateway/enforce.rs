//! Policy enforcement point.
//!
//! One call to [`PolicyEnforcementPoint::enforce`] walks a single request
//! through
//!
//! ```text
//! START → IDENTITY_RESOLVED → RESOURCE_RESOLVED → QUERY_BUILT → DECISION_RECEIVED
//!     ↘ 403                ↘ 404                                  ↘ 200 | 401 | 500
//! ```
//!
//! and returns a terminal [`Outcome`]. No state survives between calls.
//!
//! Only [`Outcome::Allowed`] carries the catalog entry, so no other exit can
//! serialize resource fields into a response.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::authz::{AuthorizationQuery, Decision, PolicyDecisionPoint, QueryBuilder, map_action};
use crate::catalog::{CatalogEntry, ResourceCatalog};
use crate::config::ExistencePolicy;
use crate::error::{IdentityError, PolicyError};
use crate::mtls::extract_identity;

/// Facts about one inbound request the PEP needs.
#[derive(Debug, Clone, Copy)]
pub struct EnforcementRequest<'a> {
    /// Correlation id for logs
    pub request_id: &'a str,
    /// Raw forwarded-client-certificate header, if present
    pub identity_header: Option<&'a str>,
    /// HTTP method token
    pub method: &'a str,
    /// Catalog identifier from the path; `None` if it did not decode
    pub resource_id: Option<&'a str>,
}

/// Terminal state of one enforcement.
#[derive(Debug)]
pub enum Outcome {
    /// PDP allowed; the entry is returned to the caller
    Allowed(CatalogEntry),
    /// PDP denied (or existence is concealed)
    Denied,
    /// No usable caller identity
    Unidentified(IdentityError),
    /// Unknown resource identifier
    NotFound,
    /// No decision could be obtained
    Failed(PolicyError),
}

impl Outcome {
    /// HTTP status this outcome is answered with
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Allowed(_) => StatusCode::OK,
            Self::Denied => StatusCode::UNAUTHORIZED,
            Self::Unidentified(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller gets the resource
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        let status = self.status();
        // Generic messages only: parse errors, policy internals and PDP
        // failures stay in the server logs.
        let message = match self {
            Self::Allowed(entry) => return (status, Json(entry)).into_response(),
            Self::Denied => "Access denied",
            Self::Unidentified(_) => "Forbidden",
            Self::NotFound => "Not found",
            Self::Failed(_) => "Internal server error",
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Orchestrates identity extraction, catalog lookup and the PDP call.
pub struct PolicyEnforcementPoint {
    catalog: Arc<dyn ResourceCatalog>,
    pdp: Arc<dyn PolicyDecisionPoint>,
    queries: QueryBuilder,
    pdp_timeout: Duration,
    existence: ExistencePolicy,
    shutdown: CancellationToken,
}

impl PolicyEnforcementPoint {
    /// Create a PEP with the default query schema, disclosed existence and
    /// a cancellation token that is never triggered.
    pub fn new(
        catalog: Arc<dyn ResourceCatalog>,
        pdp: Arc<dyn PolicyDecisionPoint>,
        pdp_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            pdp,
            queries: QueryBuilder::default(),
            pdp_timeout,
            existence: ExistencePolicy::Disclose,
            shutdown: CancellationToken::new(),
        }
    }

    /// Use a custom query schema.
    #[must_use]
    pub fn with_queries(mut self, queries: QueryBuilder) -> Self {
        self.queries = queries;
        self
    }

    /// Choose how unknown identifiers are answered.
    #[must_use]
    pub fn with_existence(mut self, existence: ExistencePolicy) -> Self {
        self.existence = existence;
        self
    }

    /// Abort in-flight PDP calls when `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Run one request through the state machine.
    #[tracing::instrument(
        skip(self, request),
        fields(
            request_id = %request.request_id,
            resource = request.resource_id.unwrap_or("<undecodable>"),
            method = %request.method,
            caller = tracing::field::Empty,
        )
    )]
    pub async fn enforce(&self, request: &EnforcementRequest<'_>) -> Outcome {
        // START → IDENTITY_RESOLVED
        let identity = match request
            .identity_header
            .map_or(Err(IdentityError::MissingHeader), extract_identity)
        {
            Ok(identity) => identity,
            Err(e) => {
                warn!(reason = e.kind(), error = %e, "Caller identity rejected");
                return Outcome::Unidentified(e);
            }
        };
        tracing::Span::current().record("caller", tracing::field::display(&identity));

        // IDENTITY_RESOLVED → RESOURCE_RESOLVED
        // An id that does not decode can never be in the catalog
        let Some(entry) = request.resource_id.and_then(|id| self.catalog.lookup(id)) else {
            return match self.existence {
                ExistencePolicy::Disclose => {
                    info!("Resource not found");
                    Outcome::NotFound
                }
                ExistencePolicy::Conceal => {
                    info!("Resource not found, answering as denied");
                    Outcome::Denied
                }
            };
        };

        // RESOURCE_RESOLVED → QUERY_BUILT
        let action = map_action(request.method);
        let query = self.queries.build(&identity, &entry, action);

        // QUERY_BUILT → DECISION_RECEIVED
        match self.decide(&query).await {
            Ok(Decision::Allow) => {
                info!(action = %action, decision = "allow", "Request allowed");
                Outcome::Allowed(entry)
            }
            Ok(Decision::Deny) => {
                warn!(action = %action, decision = "deny", "Request denied");
                Outcome::Denied
            }
            Err(e) => {
                error!(action = %action, decision = e.kind(), error = %e, "Policy check failed");
                Outcome::Failed(e)
            }
        }
    }

    /// Ask the PDP, bounded by the timeout and the shutdown token. Not retried.
    async fn decide(&self, query: &AuthorizationQuery) -> Result<Decision, PolicyError> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(PolicyError::Cancelled),
            result = tokio::time::timeout(self.pdp_timeout, self.pdp.check(query)) => {
                result.unwrap_or(Err(PolicyError::Timeout(self.pdp_timeout)))
            }
        }
    }
}
