//! Row models and DTOs for the Shopline tables.

pub mod notification;
pub mod preference;
pub mod user;
