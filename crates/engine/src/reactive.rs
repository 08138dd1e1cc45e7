//! On-create dispatch: sends time-critical notifications as soon as they are
//! written instead of waiting for the next scan.
//!
//! Only categories with a time-critical policy are handled here, and only when
//! the record is due within the policy window from now. Everything else is left
//! to the periodic scan. Both paths share the executor, so a record delivered
//! here is `Sent` and never picked up by a scan.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use tidings_common::error::StoreError;
use tidings_common::store::NotificationStore;

use crate::executor::{DispatchExecutor, DispatchOutcome, FailureReason};
use crate::policy::{PolicySet, Window};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    /// The record or its recipient no longer exists.
    NotFound,
    /// Already delivered.
    AlreadyDelivered,
    /// The category is not time-critical.
    NotTimeCritical,
    /// Time-critical category without a scheduled time.
    Unscheduled,
    /// Due later than the window; the scan will pick it up.
    ScheduledLater { at: DateTime<Utc> },
    /// Due time already passed; the scan's lookback covers it.
    PastDue { at: DateTime<Utc> },
}

#[derive(Debug)]
pub enum ReactiveOutcome {
    Dispatched(DispatchOutcome),
    Deferred(DeferReason),
}

pub struct ReactiveDispatcher {
    store: Arc<dyn NotificationStore>,
    executor: Arc<DispatchExecutor>,
    policies: PolicySet,
}

impl ReactiveDispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        executor: Arc<DispatchExecutor>,
        policies: PolicySet,
    ) -> Self {
        Self {
            store,
            executor,
            policies,
        }
    }

    /// Handle a freshly created record.
    ///
    /// A failed send records `Failed { reason }` on the record; it stays
    /// undelivered and the periodic scan retries it.
    pub async fn on_created(
        &self,
        recipient_id: &str,
        notification_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ReactiveOutcome, StoreError> {
        let Some(record) = self
            .store
            .get_notification(recipient_id, notification_id)
            .await?
        else {
            return Ok(ReactiveOutcome::Deferred(DeferReason::NotFound));
        };

        if record.state.is_delivered() {
            return Ok(ReactiveOutcome::Deferred(DeferReason::AlreadyDelivered));
        }

        let window = match self.policies.get(record.category).map(|p| p.window) {
            Some(Window::SymmetricAroundNow(width)) => width,
            _ => return Ok(ReactiveOutcome::Deferred(DeferReason::NotTimeCritical)),
        };

        let Some(scheduled) = record.scheduled_time else {
            return Ok(ReactiveOutcome::Deferred(DeferReason::Unscheduled));
        };

        let lead = scheduled - now;
        if lead > window {
            tracing::info!(
                recipient_id,
                notification_id = %notification_id,
                scheduled_time = %scheduled,
                "Notification scheduled for later"
            );
            return Ok(ReactiveOutcome::Deferred(DeferReason::ScheduledLater {
                at: scheduled,
            }));
        }
        if lead < chrono::Duration::zero() {
            return Ok(ReactiveOutcome::Deferred(DeferReason::PastDue { at: scheduled }));
        }

        let Some(recipient) = self.store.get_recipient(recipient_id).await? else {
            return Ok(ReactiveOutcome::Deferred(DeferReason::NotFound));
        };

        let outcome = self.executor.dispatch(&recipient, &record).await;

        if let DispatchOutcome::Failed(FailureReason::Send(e)) = &outcome {
            let reason = e.to_string();
            if let Err(mark_err) = self
                .store
                .mark_failed(recipient_id, notification_id, &reason)
                .await
            {
                tracing::warn!(
                    recipient_id,
                    notification_id = %notification_id,
                    error = %mark_err,
                    "Failed to record send failure"
                );
            }
        }

        Ok(ReactiveOutcome::Dispatched(outcome))
    }
}
