//! Store and push-channel capabilities consumed by the dispatch pipeline.
//!
//! Both are injected as trait objects so the engine can run against Postgres and
//! FCM in production and against in-memory doubles in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{PushError, StoreError};
use crate::types::{Category, NotificationRecord, PushMessage, Recipient};

/// Timestamp field a range filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceField {
    ScheduledTime,
    CreatedAt,
}

impl ReferenceField {
    pub fn column(&self) -> &'static str {
        match self {
            ReferenceField::ScheduledTime => "scheduled_time",
            ReferenceField::CreatedAt => "created_at",
        }
    }

    /// Value of this field on a record. A record without a scheduled time never
    /// matches a scheduled-time range.
    pub fn value_of(&self, record: &NotificationRecord) -> Option<DateTime<Utc>> {
        match self {
            ReferenceField::ScheduledTime => record.scheduled_time,
            ReferenceField::CreatedAt => Some(record.created_at),
        }
    }
}

/// Filter for undelivered records of one category whose reference field lies
/// in `[not_before, not_after]`. Either bound may be open; both are inclusive.
///
/// The range always applies to a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueFilter {
    pub category: Category,
    pub field: ReferenceField,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl DueFilter {
    /// Evaluate the filter against a record (state is not considered).
    pub fn matches(&self, record: &NotificationRecord) -> bool {
        if record.category != self.category {
            return false;
        }
        let Some(value) = self.field.value_of(record) else {
            return false;
        };
        if let Some(lower) = self.not_before
            && value < lower
        {
            return false;
        }
        if let Some(upper) = self.not_after
            && value > upper
        {
            return false;
        }
        true
    }
}

/// One page of the recipient registry, ordered by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientPage {
    /// Exclusive lower bound on recipient id; `None` starts from the beginning.
    pub after: Option<String>,
    pub limit: u32,
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Load a page of recipients ordered by id, strictly after `page.after`.
    async fn list_recipients(&self, page: &RecipientPage) -> Result<Vec<Recipient>, StoreError>;

    async fn get_recipient(&self, recipient_id: &str) -> Result<Option<Recipient>, StoreError>;

    /// Undelivered (`Pending` or `Failed`) records of one recipient matching `filter`.
    async fn find_undelivered(
        &self,
        recipient_id: &str,
        filter: &DueFilter,
    ) -> Result<Vec<NotificationRecord>, StoreError>;

    async fn get_notification(
        &self,
        recipient_id: &str,
        notification_id: Uuid,
    ) -> Result<Option<NotificationRecord>, StoreError>;

    /// Transition a record to `Sent { at }` unless it is already sent.
    ///
    /// Returns `true` if this call performed the transition.
    async fn mark_sent(
        &self,
        recipient_id: &str,
        notification_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Transition a record to `Failed { reason }` unless it is already sent.
    async fn mark_failed(
        &self,
        recipient_id: &str,
        notification_id: Uuid,
        reason: &str,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Deliver one message. Returns the channel's message identifier.
    async fn send(&self, message: &PushMessage) -> Result<String, PushError>;
}
