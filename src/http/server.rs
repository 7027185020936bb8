//! Server startup for the configured TLS mode.

use std::net::SocketAddr;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;

use crate::config::{AppConfig, TlsMode};

use super::shutdown;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid listen address {0}")]
    Address(String),

    #[error("Failed to load TLS configuration: {0}")]
    TlsConfig(String),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Runs the server until a shutdown signal has drained all connections.
pub async fn start_server(app: Router, config: &AppConfig) -> Result<(), ServerError> {
    let listen = format!("{}:{}", config.http.host, config.http.port);
    let addr: SocketAddr = listen
        .parse()
        .map_err(|_| ServerError::Address(listen.clone()))?;

    let handle = Handle::new();
    shutdown::setup_shutdown_handler(handle.clone());

    match config.http.tls.mode {
        TlsMode::None => {
            tracing::info!(%addr, "Starting HTTP server (no TLS)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        TlsMode::Manual => {
            let (Some(cert_path), Some(key_path)) =
                (&config.http.tls.cert_path, &config.http.tls.key_path)
            else {
                return Err(ServerError::TlsConfig(
                    "manual TLS requires cert_path and key_path".to_string(),
                ));
            };

            tracing::info!(%addr, cert = %cert_path, key = %key_path, "Starting HTTPS server");
            let rustls_config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .map_err(|e| ServerError::TlsConfig(format!("Failed to load certificates: {}", e)))?;

            shutdown::setup_reload_handler(rustls_config.clone(), cert_path.clone(), key_path.clone());

            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}
