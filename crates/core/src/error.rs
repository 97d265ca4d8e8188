//! Domain error taxonomy shared by every crate in the workspace.
//!
//! Four variants cover the failure modes the handlers actually produce:
//! missing entities, rejected input, missing credentials, and ownership
//! violations. Database failures stay as `sqlx::Error` until the HTTP
//! layer classifies them.

use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}
