//! Listeners
//!
//! Two listeners share one [`Authenticator`]:
//! - the ext_authz gRPC decision service (`server.filter_port`)
//! - the HTTP callback / logout service (`server.callback_port`)
//!
//! Both stop on SIGINT or SIGTERM and let in-flight requests finish.

pub mod ext_authz;
pub mod http;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::authenticator::Authenticator;
use crate::config::ServerConfig;
use crate::{Error, Result};

pub use ext_authz::ExtAuthzService;
pub use http::create_router;

/// Runs both listeners until shutdown
pub struct FilterServer {
    authenticator: Arc<Authenticator>,
    config: ServerConfig,
}

impl FilterServer {
    /// Create a server for a ready authenticator
    #[must_use]
    pub fn new(authenticator: Arc<Authenticator>, config: ServerConfig) -> Self {
        Self {
            authenticator,
            config,
        }
    }

    /// Serve until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// Returns an error if the host is invalid or a listener fails to bind or serve.
    pub async fn run(self) -> Result<()> {
        let host: IpAddr = self
            .config
            .host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid host: {e}")))?;
        let grpc_addr = SocketAddr::new(host, self.config.filter_port);
        let http_addr = SocketAddr::new(host, self.config.callback_port);

        let http_listener = TcpListener::bind(http_addr).await?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut http_shutdown = shutdown_tx.subscribe();
        let mut grpc_shutdown = shutdown_tx.subscribe();
        tokio::spawn(shutdown_signal(shutdown_tx));

        info!(addr = %grpc_addr, "ext_authz gRPC listener");
        info!(addr = %http_addr, "HTTP callback listener");

        let http_serve = async {
            axum::serve(http_listener, create_router(Arc::clone(&self.authenticator)))
                .with_graceful_shutdown(async move {
                    let _ = http_shutdown.recv().await;
                })
                .await
                .map_err(|e| Error::Internal(format!("HTTP listener: {e}")))
        };

        let grpc_serve = async {
            tonic::transport::Server::builder()
                .add_service(ExtAuthzService::new(Arc::clone(&self.authenticator)).into_server())
                .serve_with_shutdown(grpc_addr, async move {
                    let _ = grpc_shutdown.recv().await;
                })
                .await
                .map_err(|e| Error::Internal(format!("gRPC listener: {e}")))
        };

        tokio::try_join!(http_serve, grpc_serve)?;
        info!("Listeners stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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
