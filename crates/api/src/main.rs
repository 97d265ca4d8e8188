use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shopline_api::config::ServerConfig;
use shopline_api::router::build_app_router;
use shopline_api::state::AppState;
use shopline_api::ws;
use shopline_notify::aggregation::FlushSink;
use shopline_notify::calendar::{BusinessCalendar, CalendarConfig};
use shopline_notify::dispatch::{DispatchContext, Dispatcher};
use shopline_notify::holidays::HttpHolidayProvider;
use shopline_notify::listener::EventListener;
use shopline_notify::registry::EventRegistry;
use shopline_notify::{Aggregator, EventBus};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shopline_api=debug,shopline_notify=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = shopline_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    shopline_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    shopline_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Presence layer ---
    let presence = Arc::new(ws::PresenceRouter::new(pool.clone(), config.replay_limit));
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&presence));

    // --- Notification engine ---
    let calendar = Arc::new(BusinessCalendar::new(
        CalendarConfig::from_env(),
        Arc::new(HttpHolidayProvider::from_env()),
    ));
    let aggregator = Arc::new(Aggregator::default());
    let event_bus = Arc::new(EventBus::default());

    let mut dispatcher = Dispatcher::new(DispatchContext {
        pool: pool.clone(),
        registry: EventRegistry::defaults(),
        calendar,
        aggregator: Arc::clone(&aggregator),
        realtime: Arc::clone(&presence) as _,
    });
    dispatcher.register_senders_from_env();
    let dispatcher = Arc::new(dispatcher);

    let cancel = tokio_util::sync::CancellationToken::new();

    // Aggregation flush scheduler (drains its buffers on cancellation).
    let scheduler_handle = {
        let aggregator = Arc::clone(&aggregator);
        let sink: Arc<dyn FlushSink> = Arc::clone(&dispatcher) as _;
        let cancel = cancel.clone();
        tokio::spawn(async move { aggregator.run(sink, cancel).await })
    };

    // Event listener: bus -> dispatcher.
    let listener_handle = {
        let listener = EventListener::new(Arc::clone(&event_bus), Arc::clone(&dispatcher));
        let cancel = cancel.clone();
        tokio::spawn(async move { listener.run(cancel).await })
    };

    // Deferred sends: calendar-gated notifications whose time has come.
    let deferred_handle = {
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run_deferred_sends(cancel).await })
    };

    tracing::info!("Notification engine started (scheduler, listener, deferred sends)");

    // --- App state / router ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        presence: Arc::clone(&presence),
        event_bus: Arc::clone(&event_bus),
        dispatcher: Arc::clone(&dispatcher),
        aggregator: Arc::clone(&aggregator),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Cancelling stops the loops; the aggregation scheduler flushes every
    // outstanding buffer through the dispatcher before exiting.
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(10), scheduler_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), listener_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), deferred_handle).await;
    tracing::info!("Notification engine stopped");

    presence.shutdown_all().await;
    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server shuts
/// down cleanly whether stopped interactively or by a process manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
