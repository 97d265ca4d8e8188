//! Shopline notification fan-out and delivery-tracking engine.
//!
//! This crate turns raw entity-change events into per-user, per-channel
//! notification deliveries:
//!
//! - [`EventBus`] / [`DomainEvent`] — in-process publish/subscribe hub backed
//!   by `tokio::sync::broadcast`.
//! - [`EventRegistry`] — the typed table mapping event keys to recipient
//!   rules, default channels, and templates.
//! - [`BusinessCalendar`] — weekend/holiday/work-hour gate with a fail-open
//!   holiday cache.
//! - [`Aggregator`] — time-windowed buffering of related changes with a
//!   single deadline-driven flush scheduler.
//! - [`Dispatcher`] — the orchestration entry point; resolves recipients and
//!   channels, consults the gate, and drives channel senders.
//! - [`DeliveryTracker`] — per-(notification, channel) delivery state
//!   bookkeeping.
//! - [`channels`] — external channel senders (email, SMS, push).

pub mod aggregation;
pub mod bus;
pub mod calendar;
pub mod channels;
pub mod dispatch;
pub mod holidays;
pub mod listener;
pub mod presence;
pub mod registry;
pub mod tracker;

pub use aggregation::{Aggregator, FlushSink, PendingAggregation};
pub use bus::{DomainEvent, EventBus};
pub use calendar::{BusinessCalendar, CalendarConfig};
pub use dispatch::{DispatchContext, Dispatcher};
pub use holidays::{HolidayLookup, HolidayProvider, HttpHolidayProvider};
pub use listener::{emit_field_change_events, EventListener};
pub use presence::RealtimePush;
pub use registry::{EventRegistry, EventRoute, RecipientRule};
pub use tracker::DeliveryTracker;
