//! Configuration management

use std::{collections::HashSet, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::catalog::{CatalogEntry, demo_documents};
use crate::mtls::XFCC_HEADER;
use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "AUTHZ_GATEWAY_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Caller identity configuration
    pub identity: IdentityConfig,
    /// Policy decision point configuration
    pub pdp: PdpConfig,
    /// Resource catalog configuration
    pub catalog: CatalogConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Where the caller identity comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Header injected by the mTLS-terminating proxy
    pub header: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            header: XFCC_HEADER.to_string(),
        }
    }
}

/// Policy decision point configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdpConfig {
    /// Base URL of the Cerbos HTTP API
    pub endpoint: String,
    /// Upper bound for one decision, connect included
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Upper bound for establishing the connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Roles attached to every principal
    pub principal_roles: Vec<String>,
    /// Resource kind policies are written against
    pub resource_kind: String,
}

impl Default for PdpConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://cerbos.cerbos.svc.cluster.local:3592".to_string(),
            timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
            principal_roles: vec!["api".to_string()],
            resource_kind: "document".to_string(),
        }
    }
}

/// Whether a lookup miss may be revealed to the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistencePolicy {
    /// Unknown ids answer 404 before any authorization
    #[default]
    Disclose,
    /// Unknown ids answer like a denial.
    ///
    /// Only the status and body are equalized. An unknown id is answered
    /// without a PDP round-trip, so response latency can still tell it apart
    /// from a known id that was denied.
    Conceal,
}

/// Resource catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Entries served by the static catalog
    pub documents: Vec<CatalogEntry>,
    /// Treatment of unknown identifiers
    pub existence: ExistencePolicy,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            documents: demo_documents(),
            existence: ExistencePolicy::Disclose,
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional YAML file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (AUTHZ_GATEWAY_ prefix, __ for nesting)
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check invariants figment cannot express
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let endpoint = Url::parse(&self.pdp.endpoint)
            .map_err(|e| Error::Config(format!("pdp.endpoint: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "pdp.endpoint must be http or https, got {}",
                endpoint.scheme()
            )));
        }
        if self.pdp.timeout.is_zero() {
            return Err(Error::Config("pdp.timeout must be greater than zero".to_string()));
        }
        if self.identity.header.trim().is_empty() {
            return Err(Error::Config("identity.header must not be empty".to_string()));
        }
        axum::http::HeaderName::try_from(self.identity.header.as_str())
            .map_err(|e| Error::Config(format!("identity.header: {e}")))?;

        let mut seen = HashSet::new();
        for doc in &self.catalog.documents {
            if !seen.insert(doc.id.as_str()) {
                return Err(Error::Config(format!(
                    "catalog.documents: duplicate id {}",
                    doc.id
                )));
            }
        }

        Ok(())
    }

    /// Render the effective configuration as YAML
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Internal(e.to_string()))
    }
}
