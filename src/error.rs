//! Error types for the authorization gateway

use std::io;

use thiserror::Error;

/// Result type alias for the authorization gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors raised outside a single request (startup, serving)
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a caller identity could not be established from the request.
///
/// Every variant is answered with the same 403; the detail only reaches
/// server-side logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The forwarded-client-certificate header is absent or empty
    #[error("forwarded client certificate header is missing or empty")]
    MissingHeader,

    /// The header carries no `URI=` segment
    #[error("no URI segment in forwarded client certificate header")]
    NoIdentitySegment,

    /// The `URI=` value is not a well-formed URI
    #[error("malformed identity URI {uri:?}: {reason}")]
    MalformedUri {
        /// Raw segment value
        uri: String,
        /// Parser message
        reason: String,
    },

    /// The URI parsed but is not a valid SPIFFE ID
    #[error("invalid SPIFFE ID {uri:?}: {reason}")]
    InvalidIdentityFormat {
        /// Raw segment value
        uri: String,
        /// Which rule was violated
        reason: &'static str,
    },
}

impl IdentityError {
    /// Short, stable label for structured logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::NoIdentitySegment => "no_identity_segment",
            Self::MalformedUri { .. } => "malformed_uri",
            Self::InvalidIdentityFormat { .. } => "invalid_identity_format",
        }
    }
}

/// The policy decision point did not produce a usable decision.
///
/// Absence of a decision is never read as allow or deny.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Transport-level failure reaching the PDP
    #[error("policy decision point unreachable: {0}")]
    Unavailable(String),

    /// No answer within the configured bound
    #[error("policy decision point timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// PDP answered with a non-success HTTP status
    #[error("policy decision point returned HTTP {0}")]
    Status(u16),

    /// PDP answered but the body could not be interpreted
    #[error("malformed policy decision response: {0}")]
    MalformedResponse(String),

    /// The call was abandoned because the gateway is shutting down
    #[error("policy check cancelled")]
    Cancelled,
}

impl PolicyError {
    /// Short, stable label for structured logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "pdp_unavailable",
            Self::Timeout(_) => "pdp_timeout",
            Self::Status(_) => "pdp_status",
            Self::MalformedResponse(_) => "pdp_malformed_response",
            Self::Cancelled => "pdp_cancelled",
        }
    }
}
