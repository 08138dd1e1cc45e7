//! PostgreSQL-backed notification store.
//!
//! Notifications live in a single table keyed by `(recipient_id, id)`; every
//! query is scoped to one recipient. Delivery marking is a conditional
//! `UPDATE ... WHERE delivery_state <> 'sent'`, so a record can only become
//! `sent` once regardless of how many dispatchers race on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{DueFilter, NotificationStore, RecipientPage};
use crate::types::{Category, DeliveryState, Language, NotificationRecord, Recipient};

#[derive(Debug, sqlx::FromRow)]
struct RecipientRow {
    id: String,
    push_token: Option<String>,
    language: Option<String>,
}

impl From<RecipientRow> for Recipient {
    fn from(row: RecipientRow) -> Self {
        Recipient {
            id: row.id,
            push_token: row.push_token,
            language: Language::from_tag(row.language.as_deref()),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    recipient_id: String,
    category: String,
    delivery_state: String,
    delivered_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    scheduled_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    title: Option<String>,
    title_ar: Option<String>,
    body: Option<String>,
    body_ar: Option<String>,
    payload: serde_json::Value,
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let malformed = |reason: String| StoreError::Malformed {
            id: row.id.to_string(),
            reason,
        };

        let category = row.category.parse::<Category>().map_err(malformed)?;
        let state = match row.delivery_state.as_str() {
            "pending" => DeliveryState::Pending,
            "sent" => DeliveryState::Sent {
                at: row
                    .delivered_at
                    .ok_or_else(|| malformed("sent without delivered_at".to_string()))?,
            },
            "failed" => DeliveryState::Failed {
                reason: row.failure_reason.clone().unwrap_or_default(),
            },
            other => return Err(malformed(format!("unknown delivery state '{}'", other))),
        };
        let payload = match row.payload {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        Ok(NotificationRecord {
            id: row.id,
            recipient_id: row.recipient_id,
            category,
            state,
            scheduled_time: row.scheduled_time,
            created_at: row.created_at,
            title: row.title,
            title_ar: row.title_ar,
            body: row.body,
            body_ar: row.body_ar,
            payload,
        })
    }
}

const NOTIFICATION_COLUMNS: &str = "id, recipient_id, category, delivery_state, delivered_at, \
     failure_reason, scheduled_time, created_at, title, title_ar, body, body_ar, payload";

/// Notification store over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn list_recipients(&self, page: &RecipientPage) -> Result<Vec<Recipient>, StoreError> {
        let rows: Vec<RecipientRow> = sqlx::query_as(
            r#"
            SELECT id, push_token, language
            FROM recipients
            WHERE $1::text IS NULL OR id > $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(page.after.as_deref())
        .bind(i64::from(page.limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Recipient::from).collect())
    }

    async fn get_recipient(&self, recipient_id: &str) -> Result<Option<Recipient>, StoreError> {
        let row: Option<RecipientRow> =
            sqlx::query_as("SELECT id, push_token, language FROM recipients WHERE id = $1")
                .bind(recipient_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Recipient::from))
    }

    async fn find_undelivered(
        &self,
        recipient_id: &str,
        filter: &DueFilter,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        // The column name comes from a closed enum, never from input.
        let column = filter.field.column();
        let sql = format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS}
            FROM notifications
            WHERE recipient_id = $1
              AND delivery_state <> 'sent'
              AND category = $2
              AND {column} IS NOT NULL
              AND ($3::timestamptz IS NULL OR {column} >= $3)
              AND ($4::timestamptz IS NULL OR {column} <= $4)
            ORDER BY {column}
            "#
        );

        let rows: Vec<NotificationRow> = sqlx::query_as(&sql)
            .bind(recipient_id)
            .bind(filter.category.as_str())
            .bind(filter.not_before)
            .bind(filter.not_after)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(NotificationRecord::try_from).collect()
    }

    async fn get_notification(
        &self,
        recipient_id: &str,
        notification_id: Uuid,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE recipient_id = $1 AND id = $2"
        );
        let row: Option<NotificationRow> = sqlx::query_as(&sql)
            .bind(recipient_id)
            .bind(notification_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(NotificationRecord::try_from).transpose()
    }

    async fn mark_sent(
        &self,
        recipient_id: &str,
        notification_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET delivery_state = 'sent', delivered_at = $3, failure_reason = NULL
            WHERE recipient_id = $1 AND id = $2 AND delivery_state <> 'sent'
            "#,
        )
        .bind(recipient_id)
        .bind(notification_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        recipient_id: &str,
        notification_id: Uuid,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET delivery_state = 'failed', failure_reason = $3
            WHERE recipient_id = $1 AND id = $2 AND delivery_state <> 'sent'
            "#,
        )
        .bind(recipient_id)
        .bind(notification_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(state: &str, delivered_at: Option<DateTime<Utc>>) -> NotificationRow {
        NotificationRow {
            id: Uuid::new_v4(),
            recipient_id: "u1".to_string(),
            category: "vaccination".to_string(),
            delivery_state: state.to_string(),
            delivered_at,
            failure_reason: None,
            scheduled_time: None,
            created_at: Utc::now(),
            title: Some("Reminder".to_string()),
            title_ar: None,
            body: None,
            body_ar: None,
            payload: serde_json::json!({"childId": "c1"}),
        }
    }

    #[test]
    fn test_row_conversion_maps_state() {
        let at = Utc::now();
        let record = NotificationRecord::try_from(row("sent", Some(at))).unwrap();
        assert_eq!(record.state, DeliveryState::Sent { at });
        assert_eq!(record.payload.get("childId"), Some(&serde_json::json!("c1")));

        let record = NotificationRecord::try_from(row("pending", None)).unwrap();
        assert_eq!(record.state, DeliveryState::Pending);
    }

    #[test]
    fn test_row_conversion_rejects_inconsistent_rows() {
        assert!(NotificationRecord::try_from(row("sent", None)).is_err());
        assert!(NotificationRecord::try_from(row("archived", None)).is_err());

        let mut bad_category = row("pending", None);
        bad_category.category = "newsletter".to_string();
        assert!(matches!(
            NotificationRecord::try_from(bad_category),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn test_recipient_row_defaults_language() {
        let recipient = Recipient::from(RecipientRow {
            id: "u1".to_string(),
            push_token: None,
            language: None,
        });
        assert_eq!(recipient.language, Language::En);
    }
}
