//! HTTP server with optional TLS.
//!
//! Two modes:
//! - **None** (default): plain HTTP, for use behind a TLS-terminating proxy
//! - **Manual**: user-provided certificate and key, reloaded on SIGHUP
//!
//! Both modes drain connections gracefully on SIGTERM/SIGINT.

mod server;
mod shutdown;

pub use server::{start_server, ServerError};
