//! Event store server entry point.

use event_store::{EventStore, MemoryEventStore, PostgresEventStore};
use metrics_exporter_prometheus::PrometheusHandle;
use server::config::{BackendConfig, Config};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve<S: EventStore + Clone + 'static>(
    store: S,
    addr: &str,
    metrics_handle: PrometheusHandle,
) {
    let state = server::create_state(store);
    let app = server::create_app(state, metrics_handle);

    tracing::info!(%addr, "starting event store server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Load configuration; an unrecognized backend is fatal
    let config = Config::from_env().expect("invalid configuration");
    let addr = config.addr();

    // 4. Select the backend and serve
    match config.backend {
        BackendConfig::Memory => {
            tracing::info!("using in-memory backend");
            serve(MemoryEventStore::new(), &addr, metrics_handle).await;
        }
        BackendConfig::Postgres(url) => {
            tracing::info!("using postgres backend");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to postgres");
            let store = PostgresEventStore::new(pool);
            // A schema mismatch must abort rather than run corrupt.
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            serve(store, &addr, metrics_handle).await;
        }
    }
}
