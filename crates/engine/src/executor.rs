//! Dispatch executor: sends one notification and records its delivery.
//!
//! Per record:
//! 1. Skip recipients without a push token (record left pending)
//! 2. Re-read the record and skip it if it was delivered in the meantime
//! 3. Take a send claim (skip if another dispatcher holds it)
//! 4. Resolve localized strings and send through the push channel
//! 5. Conditionally mark the record `Sent`; this is the durability boundary
//!
//! A crash between 4 and 5 means the next scan sends again. Failures never
//! propagate: they are logged and reported as a `Failed` outcome.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use tidings_common::error::{PushError, StoreError};
use tidings_common::store::{NotificationStore, PushChannel};
use tidings_common::types::{Category, NotificationRecord, PushMessage, Recipient};

use crate::claims::SendClaims;
use crate::localization::{self, LocalizedText};

/// Why a record was not sent, without it being a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The recipient has no push token.
    NoToken,
    /// The record is gone or was marked sent since it was selected.
    AlreadyDelivered,
    /// Another dispatcher is sending this record right now.
    ClaimedElsewhere,
}

#[derive(Debug)]
pub enum FailureReason {
    /// The fresh read before sending failed.
    Lookup(StoreError),
    /// The push channel rejected the message; retried next scan.
    Send(PushError),
    /// The push succeeded but the delivery mark could not be written.
    Mark(StoreError),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Lookup(e) => write!(f, "lookup failed: {}", e),
            FailureReason::Send(e) => write!(f, "send failed: {}", e),
            FailureReason::Mark(e) => write!(f, "delivery mark failed: {}", e),
        }
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Sent { at: DateTime<Utc> },
    Skipped(SkipReason),
    Failed(FailureReason),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent { .. })
    }
}

pub struct DispatchExecutor {
    store: Arc<dyn NotificationStore>,
    push: Arc<dyn PushChannel>,
    claims: Arc<dyn SendClaims>,
}

impl DispatchExecutor {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        push: Arc<dyn PushChannel>,
        claims: Arc<dyn SendClaims>,
    ) -> Self {
        Self {
            store,
            push,
            claims,
        }
    }

    pub async fn dispatch(
        &self,
        recipient: &Recipient,
        record: &NotificationRecord,
    ) -> DispatchOutcome {
        let Some(token) = recipient.token() else {
            tracing::warn!(
                recipient_id = %recipient.id,
                notification_id = %record.id,
                "No push token; leaving notification pending"
            );
            return DispatchOutcome::Skipped(SkipReason::NoToken);
        };

        // Fresh read: a snapshot taken at scan start may be stale.
        let current = match self.store.get_notification(&recipient.id, record.id).await {
            Ok(Some(current)) if !current.state.is_delivered() => current,
            Ok(_) => {
                tracing::debug!(
                    recipient_id = %recipient.id,
                    notification_id = %record.id,
                    "Notification already delivered; skipping"
                );
                return DispatchOutcome::Skipped(SkipReason::AlreadyDelivered);
            }
            Err(e) => {
                tracing::error!(
                    recipient_id = %recipient.id,
                    notification_id = %record.id,
                    category = %record.category,
                    error = %e,
                    "Failed to re-read notification before sending"
                );
                return DispatchOutcome::Failed(FailureReason::Lookup(e));
            }
        };

        match self.claims.try_claim(current.id).await {
            Ok(true) => {}
            Ok(false) => return DispatchOutcome::Skipped(SkipReason::ClaimedElsewhere),
            Err(e) => {
                tracing::warn!(
                    notification_id = %current.id,
                    error = %e,
                    "Send claim unavailable; sending without it"
                );
            }
        }

        let text = localization::resolve(&current, recipient.language);
        let message = build_message(token, &current, &text);

        if let Err(e) = self.push.send(&message).await {
            tracing::error!(
                recipient_id = %recipient.id,
                notification_id = %current.id,
                category = %current.category,
                error = %e,
                "Push send failed; notification stays pending"
            );
            if let Err(release_err) = self.claims.release(current.id).await {
                tracing::warn!(
                    notification_id = %current.id,
                    error = %release_err,
                    "Failed to release send claim"
                );
            }
            return DispatchOutcome::Failed(FailureReason::Send(e));
        }

        let at = Utc::now();
        match self.store.mark_sent(&recipient.id, current.id, at).await {
            Ok(true) => {
                tracing::info!(
                    recipient_id = %recipient.id,
                    notification_id = %current.id,
                    category = %current.category,
                    language = %recipient.language,
                    title = %text.title,
                    "Notification sent"
                );
                DispatchOutcome::Sent { at }
            }
            Ok(false) => {
                tracing::warn!(
                    recipient_id = %recipient.id,
                    notification_id = %current.id,
                    category = %current.category,
                    "Notification sent but already marked by an overlapping dispatch"
                );
                DispatchOutcome::Sent { at }
            }
            Err(e) => {
                tracing::error!(
                    recipient_id = %recipient.id,
                    notification_id = %current.id,
                    category = %current.category,
                    error = %e,
                    "Notification sent but delivery mark failed; it will be sent again next scan"
                );
                DispatchOutcome::Failed(FailureReason::Mark(e))
            }
        }
    }
}

/// Build the push message: localized text as the visible notification, category
/// metadata and payload fields as string-typed data.
pub fn build_message(token: &str, record: &NotificationRecord, text: &LocalizedText) -> PushMessage {
    let mut data: BTreeMap<String, String> = record
        .payload
        .iter()
        .map(|(key, value)| (key.clone(), data_value(value)))
        .collect();
    if record.category == Category::Vaccination {
        // Clients read `childId` unconditionally.
        data.entry("childId".to_string()).or_default();
    }
    data.insert("type".to_string(), record.category.to_string());
    data.insert("notificationId".to_string(), record.id.to_string());

    PushMessage {
        token: token.to_string(),
        title: text.title.clone(),
        body: text.body.clone(),
        data,
    }
}

fn data_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidings_common::types::DeliveryState;
    use uuid::Uuid;

    fn record() -> NotificationRecord {
        let mut payload = serde_json::Map::new();
        payload.insert("childId".to_string(), serde_json::json!("child-7"));
        payload.insert("dose".to_string(), serde_json::json!(2));
        payload.insert("clinic".to_string(), serde_json::Value::Null);
        payload.insert("type".to_string(), serde_json::json!("spoofed"));

        NotificationRecord {
            id: Uuid::nil(),
            recipient_id: "u1".to_string(),
            category: Category::Vaccination,
            state: DeliveryState::Pending,
            scheduled_time: None,
            created_at: Utc::now(),
            title: None,
            title_ar: None,
            body: None,
            body_ar: None,
            payload,
        }
    }

    #[test]
    fn test_build_message_stringifies_payload() {
        let text = LocalizedText {
            title: "Reminder".to_string(),
            body: "Dose due".to_string(),
        };
        let message = build_message("tok", &record(), &text);

        assert_eq!(message.token, "tok");
        assert_eq!(message.title, "Reminder");
        assert_eq!(message.body, "Dose due");
        assert_eq!(message.data["childId"], "child-7");
        assert_eq!(message.data["dose"], "2");
        assert_eq!(message.data["clinic"], "");
        assert_eq!(message.data["type"], "vaccination");
        assert_eq!(
            message.data["notificationId"],
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_build_message_defaults_child_id_for_vaccination() {
        let text = LocalizedText {
            title: "Reminder".to_string(),
            body: "Dose due".to_string(),
        };
        let mut vaccination = record();
        vaccination.payload.clear();
        let message = build_message("tok", &vaccination, &text);
        assert_eq!(message.data["childId"], "");

        let mut weather = record();
        weather.payload.clear();
        weather.category = Category::Weather;
        let message = build_message("tok", &weather, &text);
        assert!(!message.data.contains_key("childId"));
        assert_eq!(message.data["type"], "weather");
    }
}
