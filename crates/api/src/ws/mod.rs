//! WebSocket presence layer.

pub mod handler;
pub mod heartbeat;
pub mod presence_map;
pub mod router;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use presence_map::PresenceMap;
pub use router::PresenceRouter;
