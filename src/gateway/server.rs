//! MCP server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::mcp::McpHandler;
use super::router::{AppState, create_router};
use crate::auth::{CredentialEnv, CredentialResolver, TokenCache};
use crate::config::Config;
use crate::session::SessionManager;
use crate::tool::{ToolExecutor, ToolRegistry};
use crate::{Error, Result};

/// HTTP server exposing the indexer tools over MCP
pub struct McpServer {
    /// Configuration
    config: Config,
    /// Shared state handed to the router
    state: Arc<AppState>,
}

impl McpServer {
    /// Load the tool table and wire every component.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool table cannot be loaded or the HTTP client
    /// cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let state = Arc::new(build_state(&config)?);
        Ok(Self { config, state })
    }

    /// Shared state, for embedding the router elsewhere
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Run until Ctrl+C or SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid, the port cannot be bound,
    /// or the server fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        let sessions = Arc::clone(&self.state.sessions);
        let sweep_interval = self.config.session.sweep_interval.max(Duration::from_millis(1));
        let mut sweep_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sessions.sweep();
                    }
                    _ = sweep_shutdown.recv() => {
                        debug!("Session sweeper stopping");
                        break;
                    }
                }
            }
        });

        let app = create_router(Arc::clone(&self.state));

        let listener = TcpListener::bind(addr).await?;
        info!(
            address = %addr,
            tools = self.state.handler.tool_count(),
            session_timeout = ?self.config.session.timeout,
            "MCP server listening on http://{addr}/mcp"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!(open_sessions = self.state.sessions.count(), "Server stopped");
        Ok(())
    }
}

/// Build the shared state from configuration
///
/// # Errors
///
/// Returns an error if the tool table cannot be loaded or the HTTP client
/// cannot be built.
pub fn build_state(config: &Config) -> Result<AppState> {
    let registry = Arc::new(ToolRegistry::load(config.tools.path.as_deref())?);
    let base_url = config
        .upstream
        .base_url
        .clone()
        .unwrap_or_else(|| registry.base_url().to_string());
    info!(tools = registry.len(), base_url = %base_url, "Loaded tool table");

    let env = CredentialEnv::from_process();
    let client = reqwest::Client::builder()
        .timeout(config.upstream.timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
    let tokens = Arc::new(TokenCache::new(client.clone()));
    let resolver = CredentialResolver::new(registry.schemes().clone(), env, tokens);

    let sessions = Arc::new(SessionManager::new(config.session.timeout));
    let executor = ToolExecutor::new(registry, resolver, client, base_url)
        .with_sessions(Arc::clone(&sessions));

    Ok(AppState {
        handler: Arc::new(McpHandler::new(Arc::new(executor))),
        sessions,
        static_dir: config.server.static_dir.clone(),
        max_body_size: config.server.max_body_size,
    })
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
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
    let _ = shutdown_tx.send(());
}
