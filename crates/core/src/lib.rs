//! Shopline domain primitives.
//!
//! This crate has zero internal dependencies so it can be used by the
//! repository layer, the notification engine, and the API server alike.

pub mod channels;
pub mod delivery;
pub mod diff;
pub mod error;
pub mod notification;
pub mod types;
