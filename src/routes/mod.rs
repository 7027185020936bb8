//! HTTP route handlers for the JSON API.
//!
//! API responses are never cached. Request tracing is enabled via middleware
//! that generates a unique request ID for each incoming request, so all logs
//! within a request can be correlated.

pub mod chat;
pub mod conversations;
pub mod health;
pub mod knowledge;

use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use http::header::{HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use http::Method;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::{HttpServerConfig, CACHE_CONTROL_API};
use crate::middleware::{request_id_layer, REQUEST_ID_HEADER};
use crate::state::AppState;

const CORS_MAX_AGE: Duration = Duration::from_secs(3600);

/// Origins that fail to parse as header values are skipped with a warning.
pub fn cors_layer(config: &HttpServerConfig) -> CorsLayer {
    let origin = if config.cors_allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
        .max_age(CORS_MAX_AGE)
}

/// Creates the Axum router with all routes, headers and middleware.
pub fn create_router(state: AppState) -> Router {
    let chat_routes = Router::new()
        .route("/chat", post(chat::send))
        .route("/chat/greeting", get(chat::greeting));

    let conversation_routes = Router::new()
        .route("/conversations/{id}", get(conversations::history))
        .route("/conversations/{id}/summary", get(conversations::summary))
        .route("/conversations/{id}/end", post(conversations::end));

    let knowledge_routes = Router::new().route("/knowledge", get(knowledge::search));

    let api_routes = Router::new()
        .merge(chat_routes)
        .merge(conversation_routes)
        .merge(knowledge_routes)
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_API),
        ));

    // Health checks - no caching, always fresh for probes
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready));

    let cors = cors_layer(&state.config.http);

    Router::new()
        .nest("/api/v1", api_routes)
        .merge(health_routes)
        .with_state(state)
        .layer(cors)
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}
