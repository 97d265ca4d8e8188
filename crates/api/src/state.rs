use std::sync::Arc;

use shopline_notify::{Aggregator, Dispatcher, EventBus};

use crate::config::ServerConfig;
use crate::ws::PresenceRouter;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: shopline_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// WebSocket presence router (live sockets, replay, rooms).
    pub presence: Arc<PresenceRouter>,
    /// Centralized bus for publishing domain events.
    pub event_bus: Arc<EventBus>,
    /// Dispatch coordinator (admin flush endpoints).
    pub dispatcher: Arc<Dispatcher>,
    /// Aggregation buffers (admin introspection).
    pub aggregator: Arc<Aggregator>,
}
