pub mod admin;
pub mod notifications;
