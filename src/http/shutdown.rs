//! Signal handling: graceful shutdown on SIGTERM/SIGINT and certificate
//! reload on SIGHUP.

use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;

/// Open connections get this long to finish after a shutdown signal
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Resolves with the name of the first termination signal received.
async fn termination_signal() -> &'static str {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

pub fn setup_shutdown_handler(handle: Handle) {
    tokio::spawn(async move {
        let signal = termination_signal().await;
        tracing::info!(
            signal,
            grace_seconds = SHUTDOWN_GRACE_PERIOD.as_secs(),
            "Shutting down, draining open connections"
        );
        handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
    });
}

/// Re-reads the certificate and key from disk on every SIGHUP.
#[cfg(unix)]
pub fn setup_reload_handler(tls_config: RustlsConfig, cert_path: String, key_path: String) {
    tokio::spawn(async move {
        let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .expect("Failed to install SIGHUP handler");

        while sighup.recv().await.is_some() {
            match tls_config.reload_from_pem_file(&cert_path, &key_path).await {
                Ok(()) => tracing::info!(cert = %cert_path, "TLS certificates reloaded"),
                Err(e) => tracing::error!(
                    error = %e,
                    cert = %cert_path,
                    key = %key_path,
                    "Failed to reload TLS certificates, keeping the current ones"
                ),
            }
        }
    });
}

#[cfg(not(unix))]
pub fn setup_reload_handler(_tls_config: RustlsConfig, _cert_path: String, _key_path: String) {
    tracing::warn!("Certificate hot-reload via SIGHUP not supported on this platform");
}
