//! User directory model.

use serde::Serialize;
use sqlx::FromRow;

use shopline_core::types::{DbId, Timestamp};

/// A row from the `users` table.
///
/// The notification engine only reads this table (recipient resolution and
/// channel addressing); account management lives elsewhere.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: DbId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    /// Device token for the mobile push gateway, when registered.
    pub push_token: Option<String>,
    pub role: String,
    pub sector: Option<String>,
    pub is_active: bool,
    pub created_at: Timestamp,
}
