//! Per-(notification, channel) delivery state bookkeeping.
//!
//! The tracker is a thin race-safe facade over [`DeliveryRepo`]: transition
//! legality and timestamp monotonicity are enforced by the guarded SQL
//! updates, so concurrent channel sends for the same notification cannot
//! regress a record. A refused transition is logged, never an error --
//! under at-least-once delivery a duplicate "sent" report is normal.

use shopline_db::models::notification::NotificationDelivery;
use shopline_db::repositories::DeliveryRepo;
use shopline_db::DbPool;

use shopline_core::types::DbId;

/// Owns the delivery-record write path.
#[derive(Clone)]
pub struct DeliveryTracker {
    pool: DbPool,
}

impl DeliveryTracker {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Ensure the pending record for (notification, channel) exists.
    pub async fn ensure_pending(
        &self,
        notification_id: DbId,
        channel: &str,
    ) -> Result<NotificationDelivery, sqlx::Error> {
        DeliveryRepo::upsert_pending(&self.pool, notification_id, channel).await
    }

    /// Record a successful handoff to the channel provider.
    pub async fn record_sent(&self, notification_id: DbId, channel: &str) -> Result<(), sqlx::Error> {
        let applied = DeliveryRepo::mark_sent(&self.pool, notification_id, channel).await?;
        if !applied {
            tracing::debug!(notification_id, channel, "Sent transition refused (not pending)");
        }
        Ok(())
    }

    /// Record confirmed receipt by the end device.
    pub async fn record_delivered(
        &self,
        notification_id: DbId,
        channel: &str,
    ) -> Result<(), sqlx::Error> {
        let applied = DeliveryRepo::mark_delivered(&self.pool, notification_id, channel).await?;
        if !applied {
            tracing::debug!(
                notification_id,
                channel,
                "Delivered transition refused (not sent)"
            );
        }
        Ok(())
    }

    /// Record a terminal failure with its reason.
    pub async fn record_failed(
        &self,
        notification_id: DbId,
        channel: &str,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        let applied = DeliveryRepo::mark_failed(&self.pool, notification_id, channel, reason).await?;
        if !applied {
            tracing::debug!(
                notification_id,
                channel,
                "Failed transition refused (already terminal)"
            );
        }
        Ok(())
    }

    /// Fetch the delivery record for (notification, channel), if any.
    pub async fn get(
        &self,
        notification_id: DbId,
        channel: &str,
    ) -> Result<Option<NotificationDelivery>, sqlx::Error> {
        DeliveryRepo::get(&self.pool, notification_id, channel).await
    }
}
