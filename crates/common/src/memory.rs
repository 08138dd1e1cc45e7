use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{DueFilter, NotificationStore, RecipientPage};
use crate::types::{DeliveryState, NotificationRecord, Recipient};

#[derive(Default)]
struct Inner {
    recipients: BTreeMap<String, Recipient>,
    notifications: BTreeMap<String, Vec<NotificationRecord>>,
    failing_queries: HashSet<String>,
    fail_registry: bool,
    fail_updates: bool,
}

/// A thread-safe in-memory notification store.
///
/// Recipients are kept ordered by id so pagination behaves like the Postgres
/// store. Failure switches let tests simulate an unavailable backend for one
/// recipient, for the registry, or for delivery marking.
#[derive(Default, Clone)]
pub struct InMemoryNotificationStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_recipient(&self, recipient: Recipient) {
        let mut inner = self.inner.write().await;
        inner.recipients.insert(recipient.id.clone(), recipient);
    }

    pub async fn insert_notification(&self, record: NotificationRecord) {
        let mut inner = self.inner.write().await;
        inner
            .notifications
            .entry(record.recipient_id.clone())
            .or_default()
            .push(record);
    }

    /// Current copy of a record, regardless of its state.
    pub async fn notification(&self, notification_id: Uuid) -> Option<NotificationRecord> {
        let inner = self.inner.read().await;
        inner
            .notifications
            .values()
            .flatten()
            .find(|n| n.id == notification_id)
            .cloned()
    }

    /// Make every notification query for `recipient_id` fail.
    pub async fn fail_queries_for(&self, recipient_id: &str) {
        let mut inner = self.inner.write().await;
        inner.failing_queries.insert(recipient_id.to_string());
    }

    pub async fn set_fail_registry(&self, fail: bool) {
        self.inner.write().await.fail_registry = fail;
    }

    pub async fn set_fail_updates(&self, fail: bool) {
        self.inner.write().await.fail_updates = fail;
    }

    fn find_mut<'a>(
        inner: &'a mut Inner,
        recipient_id: &str,
        notification_id: Uuid,
    ) -> Option<&'a mut NotificationRecord> {
        inner
            .notifications
            .get_mut(recipient_id)?
            .iter_mut()
            .find(|n| n.id == notification_id)
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn list_recipients(&self, page: &RecipientPage) -> Result<Vec<Recipient>, StoreError> {
        let inner = self.inner.read().await;
        if inner.fail_registry {
            return Err(StoreError::Unavailable("recipient registry offline".to_string()));
        }

        let recipients = inner
            .recipients
            .values()
            .filter(|r| page.after.as_deref().is_none_or(|after| r.id.as_str() > after))
            .take(page.limit as usize)
            .cloned()
            .collect();
        Ok(recipients)
    }

    async fn get_recipient(&self, recipient_id: &str) -> Result<Option<Recipient>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.recipients.get(recipient_id).cloned())
    }

    async fn find_undelivered(
        &self,
        recipient_id: &str,
        filter: &DueFilter,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let inner = self.inner.read().await;
        if inner.failing_queries.contains(recipient_id) {
            return Err(StoreError::Unavailable(format!(
                "notifications of {} unreachable",
                recipient_id
            )));
        }

        Ok(inner
            .notifications
            .get(recipient_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|n| !n.state.is_delivered() && filter.matches(n))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_notification(
        &self,
        recipient_id: &str,
        notification_id: Uuid,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        let inner = self.inner.read().await;
        if inner.failing_queries.contains(recipient_id) {
            return Err(StoreError::Unavailable(format!(
                "notifications of {} unreachable",
                recipient_id
            )));
        }

        Ok(inner
            .notifications
            .get(recipient_id)
            .and_then(|records| records.iter().find(|n| n.id == notification_id))
            .cloned())
    }

    async fn mark_sent(
        &self,
        recipient_id: &str,
        notification_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.fail_updates {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }

        match Self::find_mut(&mut inner, recipient_id, notification_id) {
            Some(record) if !record.state.is_delivered() => {
                record.state = DeliveryState::Sent { at };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        recipient_id: &str,
        notification_id: Uuid,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.fail_updates {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }

        match Self::find_mut(&mut inner, recipient_id, notification_id) {
            Some(record) if !record.state.is_delivered() => {
                record.state = DeliveryState::Failed {
                    reason: reason.to_string(),
                };
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Language};

    fn recipient(id: &str) -> Recipient {
        Recipient {
            id: id.to_string(),
            push_token: Some(format!("token-{}", id)),
            language: Language::En,
        }
    }

    fn pending(recipient_id: &str) -> NotificationRecord {
        NotificationRecord {
            id: Uuid::new_v4(),
            recipient_id: recipient_id.to_string(),
            category: Category::Weather,
            state: DeliveryState::Pending,
            scheduled_time: None,
            created_at: Utc::now(),
            title: Some("Storm".to_string()),
            title_ar: None,
            body: None,
            body_ar: None,
            payload: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_recipient_pages_are_ordered_and_exclusive() {
        let store = InMemoryNotificationStore::new();
        for id in ["c", "a", "b"] {
            store.insert_recipient(recipient(id)).await;
        }

        let first = store
            .list_recipients(&RecipientPage { after: None, limit: 2 })
            .await
            .unwrap();
        assert_eq!(
            first.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        let second = store
            .list_recipients(&RecipientPage {
                after: Some("b".to_string()),
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "c");
    }

    #[tokio::test]
    async fn test_mark_sent_only_once() {
        let store = InMemoryNotificationStore::new();
        let record = pending("a");
        let id = record.id;
        store.insert_notification(record).await;

        let first = Utc::now();
        assert!(store.mark_sent("a", id, first).await.unwrap());
        assert!(!store.mark_sent("a", id, Utc::now()).await.unwrap());
        assert!(!store.mark_failed("a", id, "late failure").await.unwrap());

        let stored = store.notification(id).await.unwrap();
        assert_eq!(stored.state, DeliveryState::Sent { at: first });
    }

    #[tokio::test]
    async fn test_failed_records_remain_undelivered() {
        let store = InMemoryNotificationStore::new();
        let record = pending("a");
        let id = record.id;
        store.insert_notification(record).await;
        store.mark_failed("a", id, "token expired").await.unwrap();

        let filter = DueFilter {
            category: Category::Weather,
            field: crate::store::ReferenceField::CreatedAt,
            not_before: None,
            not_after: None,
        };
        let due = store.find_undelivered("a", &filter).await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(matches!(due[0].state, DeliveryState::Failed { .. }));
    }
}
