//! Gateway server

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::enforce::PolicyEnforcementPoint;
use super::router::{AppState, create_router};
use crate::authz::{CerbosClient, PolicyDecisionPoint, QueryBuilder};
use crate::catalog::StaticCatalog;
use crate::config::Config;
use crate::{Error, Result};

/// How long force-closed requests get to write their 500 before `serve` returns
const FORCE_CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Gateway server
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
    /// Fires when the drain deadline passes; aborts in-flight PDP calls
    force_close: CancellationToken,
}

impl Gateway {
    /// Create a gateway talking to the Cerbos PDP named in `config`
    pub fn new(config: Config) -> Result<Self> {
        let pdp = CerbosClient::new(&config.pdp)?;
        info!(endpoint = %config.pdp.endpoint, url = %pdp.check_url(), "Configured PDP");
        Self::with_pdp(config, Arc::new(pdp))
    }

    /// Create a gateway around an arbitrary PDP
    pub fn with_pdp(config: Config, pdp: Arc<dyn PolicyDecisionPoint>) -> Result<Self> {
        config.validate()?;

        let catalog = StaticCatalog::from_entries(config.catalog.documents.clone())?;
        info!(documents = catalog.len(), existence = ?config.catalog.existence, "Loaded catalog");

        let identity_header = HeaderName::try_from(config.identity.header.as_str())
            .map_err(|e| Error::Config(format!("identity.header: {e}")))?;

        let force_close = CancellationToken::new();
        let pep = PolicyEnforcementPoint::new(Arc::new(catalog), pdp, config.pdp.timeout)
            .with_queries(QueryBuilder::new(
                config.pdp.principal_roles.clone(),
                config.pdp.resource_kind.clone(),
            ))
            .with_existence(config.catalog.existence)
            .with_shutdown(force_close.clone());

        let state = Arc::new(AppState::new(Arc::new(pep), identity_header));

        Ok(Self {
            config,
            state,
            force_close,
        })
    }

    /// The router serving this gateway's state
    pub fn router(&self) -> axum::Router {
        create_router(Arc::clone(&self.state))
    }

    /// Bind the configured address and serve until SIGINT/SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid server address: {e}")))?;

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("AUTHZ GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(header = %self.config.identity.header, "Caller identity");
        info!(
            endpoint = %self.config.pdp.endpoint,
            timeout = ?self.config.pdp.timeout,
            "Policy decision point"
        );
        info!("Routes:");
        info!("  ANY /resources/{{id}}  (alias /docs/{{id}})");
        info!("  ANY /");
        info!("  GET /health");
        info!("============================================================");

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `signal` resolves, then drain.
    ///
    /// After `signal` the listener stops accepting. In-flight requests get
    /// `server.shutdown_timeout` to finish; past that, their PDP calls are
    /// cancelled (answering 500) and this returns once those answers are
    /// written or a short grace period runs out.
    pub async fn serve<S>(self, listener: TcpListener, signal: S) -> Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let stop_accepting = CancellationToken::new();
        let server = axum::serve(listener, self.router())
            .with_graceful_shutdown(stop_accepting.clone().cancelled_owned())
            .into_future();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => return result.map_err(Error::Io),
            () = signal => {}
        }

        let drain = self.config.server.shutdown_timeout;
        info!(timeout = ?drain, "Draining in-flight requests");
        stop_accepting.cancel();

        if let Ok(result) = tokio::time::timeout(drain, &mut server).await {
            result?;
            info!("Shutdown complete");
        } else {
            warn!(timeout = ?drain, "Drain timed out, forcing close");
            self.force_close.cancel();
            match tokio::time::timeout(FORCE_CLOSE_GRACE, &mut server).await {
                Ok(result) => result?,
                Err(_) => warn!("Connections still open after force close, dropping them"),
            }
        }

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
