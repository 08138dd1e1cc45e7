//! Eligibility query: finds the due, undelivered records of one recipient.
//!
//! Issues one filtered read per configured category and unions the results.
//! Category is part of every filter, so the union never contains duplicates.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use tidings_common::error::StoreError;
use tidings_common::store::NotificationStore;
use tidings_common::types::NotificationRecord;

use crate::policy::PolicySet;

pub struct EligibilityQuery {
    store: Arc<dyn NotificationStore>,
    policies: PolicySet,
}

impl EligibilityQuery {
    pub fn new(store: Arc<dyn NotificationStore>, policies: PolicySet) -> Self {
        Self { store, policies }
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Records of `recipient_id` that are due at `now` across all categories.
    ///
    /// The first failing category read aborts the whole lookup.
    pub async fn find_due(
        &self,
        recipient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let mut due = Vec::new();

        for (category, policy) in self.policies.iter() {
            let filter = policy.filter(category, now);
            let records = self.store.find_undelivered(recipient_id, &filter).await?;

            tracing::debug!(
                recipient_id,
                category = %category,
                count = records.len(),
                "Eligibility query returned records"
            );

            due.extend(records);
        }

        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tidings_common::memory::InMemoryNotificationStore;
    use tidings_common::types::{Category, DeliveryState};
    use uuid::Uuid;

    fn record(category: Category, scheduled: Option<DateTime<Utc>>, created: DateTime<Utc>) -> NotificationRecord {
        NotificationRecord {
            id: Uuid::new_v4(),
            recipient_id: "u1".to_string(),
            category,
            state: DeliveryState::Pending,
            scheduled_time: scheduled,
            created_at: created,
            title: Some("t".to_string()),
            title_ar: None,
            body: Some("b".to_string()),
            body_ar: None,
            payload: Default::default(),
        }
    }

    async fn due_ids(store: &InMemoryNotificationStore, now: DateTime<Utc>) -> Vec<Uuid> {
        let query = EligibilityQuery::new(Arc::new(store.clone()), PolicySet::default());
        query
            .find_due("u1", now)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    #[tokio::test]
    async fn test_time_critical_window() {
        let store = InMemoryNotificationStore::new();
        let now = Utc::now();
        let long_ago = now - Duration::days(10);

        let inside = record(Category::Vaccination, Some(now - Duration::minutes(4)), long_ago);
        let too_old = record(Category::Vaccination, Some(now - Duration::minutes(6)), long_ago);
        let too_early = record(Category::Vaccination, Some(now + Duration::minutes(6)), long_ago);
        let unscheduled = record(Category::Vaccination, None, now);
        let inside_id = inside.id;
        for r in [inside, too_old, too_early, unscheduled] {
            store.insert_notification(r).await;
        }

        assert_eq!(due_ids(&store, now).await, vec![inside_id]);
    }

    #[tokio::test]
    async fn test_freshness_window() {
        let store = InMemoryNotificationStore::new();
        let now = Utc::now();

        let fresh = record(Category::Weather, None, now - Duration::minutes(239));
        let stale = record(Category::Weather, None, now - Duration::minutes(241));
        let future = record(Category::Weather, None, now + Duration::minutes(30));
        let just_now = record(Category::Weather, None, now);
        let mut expected = vec![fresh.id, future.id, just_now.id];
        for r in [fresh, stale, future, just_now] {
            store.insert_notification(r).await;
        }

        let mut got = due_ids(&store, now).await;
        got.sort();
        expected.sort();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_delivered_records_are_not_due() {
        let store = InMemoryNotificationStore::new();
        let now = Utc::now();
        let mut sent = record(Category::Weather, None, now);
        sent.state = DeliveryState::Sent { at: now };
        store.insert_notification(sent).await;

        assert!(due_ids(&store, now).await.is_empty());
    }

    #[tokio::test]
    async fn test_unions_categories() {
        let store = InMemoryNotificationStore::new();
        let now = Utc::now();
        store
            .insert_notification(record(Category::Vaccination, Some(now), now - Duration::days(3)))
            .await;
        store
            .insert_notification(record(Category::Weather, None, now - Duration::hours(1)))
            .await;

        assert_eq!(due_ids(&store, now).await.len(), 2);
    }

    #[tokio::test]
    async fn test_query_failure_propagates() {
        let store = InMemoryNotificationStore::new();
        store.fail_queries_for("u1").await;
        let query = EligibilityQuery::new(Arc::new(store), PolicySet::default());

        assert!(query.find_due("u1", Utc::now()).await.is_err());
    }
}
