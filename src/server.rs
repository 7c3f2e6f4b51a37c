pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{Router, routing::get};
use color_eyre::eyre::{Context, Result};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::pki::crl::{RefreshScheduler, RevocationRegistry};
use handlers::health::health_check;
use handlers::revocation::revocation_status;
use handlers::stats::stats;

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig<'a> {
    pub host: &'a str,
    pub port: u16,
}

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RevocationRegistry>,
    /// Present when a refresh loop feeds the registry; `/stats` reports its
    /// per-issuer status.
    pub scheduler: Option<Arc<RefreshScheduler>>,
}

impl AppState {
    pub fn new(registry: Arc<RevocationRegistry>) -> Self {
        Self {
            registry,
            scheduler: None,
        }
    }

    pub fn with_scheduler(scheduler: Arc<RefreshScheduler>) -> Self {
        Self {
            registry: Arc::clone(scheduler.registry()),
            scheduler: Some(scheduler),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &'_ axum::extract::Request<_>| {
            let uri = request.uri().to_string();
            tracing::info_span!("request", method = %request.method(), uri)
        });

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/{issuer_id}/{serial}", get(revocation_status))
        .layer(trace_layer)
        .with_state(state)
}

pub struct Server {
    router: Router,
    listener: TcpListener,
}

impl Server {
    /// Binds the listener immediately so the chosen port is known before
    /// [`Server::run`].
    pub async fn new(state: AppState, config: ServerConfig<'_>) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .wrap_err_with(|| format!("Binding TCP listener on {addr}"))?;

        Ok(Self {
            router: router(state),
            listener,
        })
    }

    /// Port the server is bound to.
    pub fn port(&self) -> Result<u16> {
        Ok(self
            .listener
            .local_addr()
            .context("Getting local address")?
            .port())
    }

    pub async fn run(self) -> Result<()> {
        let addr = self.listener.local_addr().context("Getting local address")?;
        tracing::info!("Server listening on http://{addr}");
        axum::serve(self.listener, self.router)
            .await
            .context("Running server")?;
        Ok(())
    }
}
