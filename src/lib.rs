//! Authorization Gateway Library
//!
//! Policy enforcement point for services behind an mTLS-terminating proxy.
//!
//! # Features
//!
//! - **Caller identity**: SPIFFE ID from the `X-Forwarded-Client-Cert` header
//! - **Externalized policy**: every decision comes from a Cerbos PDP
//! - **Fail closed**: no decision means no data
//! - **Graceful shutdown**: stop accepting, drain, then force close
//!
//! # Request flow
//!
//! ```text
//! request → mtls::extract_identity → catalog lookup → authz::QueryBuilder
//!         → PolicyDecisionPoint::check → gateway::Outcome → response
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authz;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mtls;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` wins over `level` when set. `format` selects `json` output;
/// anything else is human-readable text.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::Config(format!("Invalid log level '{level}': {e}")))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
    }

    Ok(())
}
