//! Creation listener: feeds newly inserted notifications to the on-create path.
//!
//! The schema's `AFTER INSERT` trigger publishes
//! `{"recipient_id": ..., "id": ...}` on the `notification_created` channel.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use uuid::Uuid;

use tidings_engine::reactive::{ReactiveDispatcher, ReactiveOutcome};

pub const CREATED_CHANNEL: &str = "notification_created";

/// Payload published by the insert trigger.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedEvent {
    pub recipient_id: String,
    pub id: Uuid,
}

impl CreatedEvent {
    pub fn parse(payload: &str) -> Option<Self> {
        serde_json::from_str(payload).ok()
    }
}

pub struct CreationListener {
    pool: PgPool,
    reactive: Arc<ReactiveDispatcher>,
}

impl CreationListener {
    pub fn new(pool: PgPool, reactive: Arc<ReactiveDispatcher>) -> Self {
        Self { pool, reactive }
    }

    /// Listen until the connection fails irrecoverably.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CREATED_CHANNEL).await?;
        tracing::info!(channel = CREATED_CHANNEL, "Listening for new notifications");

        loop {
            // `recv` reconnects transparently; missed events are covered by the scan.
            let notification = listener.recv().await?;
            let Some(event) = CreatedEvent::parse(notification.payload()) else {
                tracing::warn!(
                    payload = notification.payload(),
                    "Ignoring malformed creation event"
                );
                continue;
            };

            self.handle(&event).await;
        }
    }

    pub async fn handle(&self, event: &CreatedEvent) {
        match self
            .reactive
            .on_created(&event.recipient_id, event.id, Utc::now())
            .await
        {
            Ok(ReactiveOutcome::Dispatched(outcome)) => {
                tracing::debug!(
                    recipient_id = %event.recipient_id,
                    notification_id = %event.id,
                    sent = outcome.is_sent(),
                    "Handled new notification"
                );
            }
            Ok(ReactiveOutcome::Deferred(reason)) => {
                tracing::debug!(
                    recipient_id = %event.recipient_id,
                    notification_id = %event.id,
                    reason = ?reason,
                    "New notification left for the periodic scan"
                );
            }
            Err(e) => {
                tracing::error!(
                    recipient_id = %event.recipient_id,
                    notification_id = %event.id,
                    error = %e,
                    "Failed to handle new notification"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trigger_payload() {
        let event = CreatedEvent::parse(
            r#"{"recipient_id":"user-1","id":"6f1c2d7e-8a8b-4d6e-9c1f-0a2b3c4d5e6f"}"#,
        )
        .unwrap();
        assert_eq!(event.recipient_id, "user-1");
        assert_eq!(
            event.id,
            Uuid::parse_str("6f1c2d7e-8a8b-4d6e-9c1f-0a2b3c4d5e6f").unwrap()
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CreatedEvent::parse("not json").is_none());
        assert!(CreatedEvent::parse(r#"{"recipient_id":"u"}"#).is_none());
    }
}
