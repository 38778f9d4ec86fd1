//! HTTP server module
//!
//! Owns the listener and hands every request to the route table.

pub mod http;

use crate::config::Config;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::info;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

/// HTTP Server
///
/// Thin wrapper over [`http::HttpServer`] that stops on Ctrl-C.
pub struct Server {
    config: Config,
    addr: SocketAddr,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("{}", e)))?;

        Ok(Self { config, addr })
    }

    /// Configured listen address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run the server until Ctrl-C
    pub async fn run(self) -> Result<(), ServerError> {
        info!(
            routes = self.config.routes.len(),
            max_body_bytes = self.config.server.max_body_bytes,
            "Starting server on {}",
            self.addr
        );

        let server = http::HttpServer::new(self.config).await?;
        server
            .run_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await?;

        info!("Shutting down server");
        Ok(())
    }
}
