//! Read-only repository over the `users` directory table.
//!
//! The notification engine never mutates users; it only resolves recipient
//! sets and channel addresses. Inactive users are excluded everywhere.

use sqlx::PgPool;

use shopline_core::types::DbId;

use crate::models::user::User;

/// Column list for `users` queries.
const COLUMNS: &str =
    "id, name, email, phone, push_token, role, sector, is_active, created_at";

/// Directory lookups for recipient resolution.
pub struct UserRepo;

impl UserRepo {
    /// Find a user by id (active or not; callers check `is_active`).
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All active users holding any of the given roles.
    pub async fn active_by_roles(
        pool: &PgPool,
        roles: &[String],
    ) -> Result<Vec<User>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM users \
             WHERE role = ANY($1) AND is_active = true \
             ORDER BY id"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(roles)
            .fetch_all(pool)
            .await
    }

    /// All active users in any of the given sectors.
    pub async fn active_by_sectors(
        pool: &PgPool,
        sectors: &[String],
    ) -> Result<Vec<User>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM users \
             WHERE sector = ANY($1) AND is_active = true \
             ORDER BY id"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(sectors)
            .fetch_all(pool)
            .await
    }

    /// All active users except one (the triggering user).
    pub async fn all_active_except(
        pool: &PgPool,
        excluded: DbId,
    ) -> Result<Vec<User>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM users \
             WHERE id <> $1 AND is_active = true \
             ORDER BY id"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(excluded)
            .fetch_all(pool)
            .await
    }
}
