//! Cerbos PDP client over the JSON `CheckResources` API.
//!
//! ```text
//! POST {endpoint}/api/check/resources
//! {
//!   "requestId": "…",
//!   "principal": {"id": "spiffe://…", "roles": ["api"], "attr": {"trustDomain": "…"}},
//!   "resources": [{"actions": ["read"],
//!                  "resource": {"kind": "document", "id": "doc1", "attr": {"category": "…"}}}]
//! }
//! ```
//!
//! The effect for the requested action must be `EFFECT_ALLOW` or
//! `EFFECT_DENY`. Anything else is a malformed response, never a default.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::pdp::{Decision, PolicyDecisionPoint};
use super::query::{AuthorizationQuery, Principal, Resource};
use crate::config::PdpConfig;
use crate::error::PolicyError;
use crate::{Error, Result};

const CHECK_RESOURCES_PATH: &str = "/api/check/resources";
const EFFECT_ALLOW: &str = "EFFECT_ALLOW";
const EFFECT_DENY: &str = "EFFECT_DENY";

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckResourcesRequest<'a> {
    request_id: String,
    principal: &'a Principal,
    resources: [ResourceEntry<'a>; 1],
}

#[derive(Serialize)]
struct ResourceEntry<'a> {
    actions: [&'a str; 1],
    resource: &'a Resource,
}

#[derive(Deserialize)]
struct CheckResourcesResponse {
    #[serde(default)]
    results: Vec<ResourceResult>,
}

#[derive(Deserialize)]
struct ResourceResult {
    resource: ResultResource,
    #[serde(default)]
    actions: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ResultResource {
    id: String,
}

// ── Client ────────────────────────────────────────────────────────────────

/// HTTP client for a Cerbos policy decision point.
#[derive(Debug, Clone)]
pub struct CerbosClient {
    http: reqwest::Client,
    check_url: Url,
    timeout: Duration,
}

impl CerbosClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unusable endpoint and `Error::Http` if
    /// the underlying HTTP client cannot be built.
    pub fn new(config: &PdpConfig) -> Result<Self> {
        let invalid = |e: url::ParseError| {
            Error::Config(format!("Invalid PDP endpoint {}: {e}", config.endpoint))
        };
        let check_url = Url::parse(&config.endpoint)
            .and_then(|base| base.join(CHECK_RESOURCES_PATH))
            .map_err(invalid)?;

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            check_url,
            timeout: config.timeout,
        })
    }

    /// Full URL decisions are requested from.
    #[must_use]
    pub fn check_url(&self) -> &Url {
        &self.check_url
    }
}

#[async_trait]
impl PolicyDecisionPoint for CerbosClient {
    async fn check(
        &self,
        query: &AuthorizationQuery,
    ) -> std::result::Result<Decision, PolicyError> {
        let action = query.action.as_str();
        let body = CheckResourcesRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            principal: &query.principal,
            resources: [ResourceEntry {
                actions: [action],
                resource: &query.resource,
            }],
        };

        let response = self
            .http
            .post(self.check_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PolicyError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let parsed: CheckResourcesResponse = serde_json::from_slice(&bytes)
            .map_err(|e| PolicyError::MalformedResponse(e.to_string()))?;

        let decision = interpret(&parsed, &query.resource.id, action)?;
        debug!(
            request_id = %body.request_id,
            resource = %query.resource.id,
            action,
            decision = %decision,
            "PDP answered"
        );
        Ok(decision)
    }
}

impl CerbosClient {
    fn transport_error(&self, e: &reqwest::Error) -> PolicyError {
        if e.is_timeout() {
            PolicyError::Timeout(self.timeout)
        } else {
            PolicyError::Unavailable(e.to_string())
        }
    }
}

/// Find the effect for `action` on resource `id`.
fn interpret(
    response: &CheckResourcesResponse,
    id: &str,
    action: &str,
) -> std::result::Result<Decision, PolicyError> {
    let result = response
        .results
        .iter()
        .find(|r| r.resource.id == id)
        .ok_or_else(|| PolicyError::MalformedResponse(format!("no result for resource {id}")))?;

    match result.actions.get(action).map(String::as_str) {
        Some(EFFECT_ALLOW) => Ok(Decision::Allow),
        Some(EFFECT_DENY) => Ok(Decision::Deny),
        Some(other) => Err(PolicyError::MalformedResponse(format!(
            "unknown effect {other} for action {action}"
        ))),
        None => Err(PolicyError::MalformedResponse(format!(
            "no effect for action {action}"
        ))),
    }
}
