//! HTTP façade for the event store.
//!
//! Exposes append, stream/global reads, and live NDJSON subscriptions over
//! JSON, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::events::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/streams/{aggregate_id}/events",
            post(routes::events::append::<S>),
        )
        .route(
            "/streams/{aggregate_id}/events",
            get(routes::events::read_stream::<S>),
        )
        .route("/events", get(routes::events::read_all::<S>))
        .route("/events/subscribe", get(routes::events::subscribe::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the shared application state over a backend.
pub fn create_state<S: EventStore + Clone + 'static>(store: S) -> Arc<AppState<S>> {
    Arc::new(AppState { store })
}
