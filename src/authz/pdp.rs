//! Policy decision point seam.

use std::fmt;

use async_trait::async_trait;

use super::query::AuthorizationQuery;
use crate::error::PolicyError;

/// A decision the PDP actually made.
///
/// "No decision" is not a variant: it is a [`PolicyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The action is permitted
    Allow,
    /// The action is forbidden
    Deny,
}

impl Decision {
    /// Label for structured logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote service answering `(principal, resource, action)` questions.
///
/// Implementations must not retry on their own and must not invent a
/// decision when the remote side did not give one.
#[async_trait]
pub trait PolicyDecisionPoint: Send + Sync {
    /// Ask for a decision on `query`.
    async fn check(&self, query: &AuthorizationQuery) -> Result<Decision, PolicyError>;
}
