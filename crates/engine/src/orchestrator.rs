//! Scan orchestrator: one full pass over the recipient registry.
//!
//! For each recipient:
//! 1. Skip entirely when there is no push token (no queries issued)
//! 2. Find due records across all categories (`EligibilityQuery`)
//! 3. Dispatch each record (`DispatchExecutor`)
//!
//! Failures are contained at the narrowest scope: a record failure never stops
//! its siblings, a recipient failure never stops other recipients, and a
//! registry failure ends only the current scan.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use thiserror::Error;

use tidings_common::error::StoreError;
use tidings_common::store::{NotificationStore, RecipientPage};
use tidings_common::types::Recipient;

use crate::eligibility::EligibilityQuery;
use crate::executor::{DispatchExecutor, DispatchOutcome, FailureReason};
use crate::policy::PolicySet;

/// Default number of recipients loaded per registry page.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to load recipient registry: {0}")]
    RegistryLoad(#[source] StoreError),

    #[error("Eligibility query failed for recipient {recipient_id}: {source}")]
    Query {
        recipient_id: String,
        #[source]
        source: StoreError,
    },
}

/// Per-recipient tally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecipientReport {
    pub due: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Delivered but the mark could not be written.
    pub unmarked: usize,
}

/// Aggregate outcome of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub started_at: DateTime<Utc>,
    pub recipients: usize,
    pub recipients_without_token: usize,
    pub recipients_failed: usize,
    pub due: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unmarked: usize,
    /// `false` when the scan ended early because the registry could not be read.
    pub completed: bool,
}

impl ScanSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            recipients: 0,
            recipients_without_token: 0,
            recipients_failed: 0,
            due: 0,
            sent: 0,
            skipped: 0,
            failed: 0,
            unmarked: 0,
            completed: false,
        }
    }

    fn absorb(&mut self, report: &RecipientReport) {
        self.due += report.due;
        self.sent += report.sent;
        self.skipped += report.skipped;
        self.failed += report.failed;
        self.unmarked += report.unmarked;
    }
}

enum RecipientResult {
    NoToken,
    Processed(RecipientReport),
    Failed,
}

pub struct ScanOrchestrator {
    store: Arc<dyn NotificationStore>,
    eligibility: EligibilityQuery,
    executor: Arc<DispatchExecutor>,
    page_size: u32,
    concurrency: usize,
}

impl ScanOrchestrator {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        executor: Arc<DispatchExecutor>,
        policies: PolicySet,
    ) -> Self {
        Self {
            eligibility: EligibilityQuery::new(store.clone(), policies),
            store,
            executor,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: 1,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Number of recipients processed at once. `1` keeps the scan sequential.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run one scan at reference time `now`. Never fails: every error is logged
    /// and reflected in the returned summary.
    pub async fn run_scan(&self, now: DateTime<Utc>) -> ScanSummary {
        let mut summary = ScanSummary::new(now);
        tracing::info!(scan_time = %now, "Notification scan started");

        match self.scan_registry(now, &mut summary).await {
            Ok(()) => {
                summary.completed = true;
                tracing::info!(
                    recipients = summary.recipients,
                    recipients_without_token = summary.recipients_without_token,
                    recipients_failed = summary.recipients_failed,
                    due = summary.due,
                    sent = summary.sent,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    unmarked = summary.unmarked,
                    "All notifications processed"
                );
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    recipients = summary.recipients,
                    sent = summary.sent,
                    "Notification scan aborted"
                );
            }
        }

        summary
    }

    async fn scan_registry(
        &self,
        now: DateTime<Utc>,
        summary: &mut ScanSummary,
    ) -> Result<(), ScanError> {
        let mut page = RecipientPage {
            after: None,
            limit: self.page_size,
        };

        loop {
            let recipients = self
                .store
                .list_recipients(&page)
                .await
                .map_err(ScanError::RegistryLoad)?;

            let Some(last) = recipients.last() else {
                break;
            };
            page.after = Some(last.id.clone());
            let full_page = recipients.len() >= self.page_size as usize;

            let results: Vec<RecipientResult> = stream::iter(recipients.iter())
                .map(|recipient| self.run_recipient(recipient, now))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for result in results {
                summary.recipients += 1;
                match result {
                    RecipientResult::NoToken => summary.recipients_without_token += 1,
                    RecipientResult::Processed(report) => summary.absorb(&report),
                    RecipientResult::Failed => summary.recipients_failed += 1,
                }
            }

            if !full_page {
                break;
            }
        }

        Ok(())
    }

    async fn run_recipient(&self, recipient: &Recipient, now: DateTime<Utc>) -> RecipientResult {
        if recipient.token().is_none() {
            tracing::warn!(recipient_id = %recipient.id, "No push token for recipient");
            return RecipientResult::NoToken;
        }

        match self.process_recipient(recipient, now).await {
            Ok(report) => RecipientResult::Processed(report),
            Err(e) => {
                tracing::error!(
                    recipient_id = %recipient.id,
                    error = %e,
                    "Failed to process recipient"
                );
                RecipientResult::Failed
            }
        }
    }

    /// Find and dispatch every due record of one recipient.
    pub async fn process_recipient(
        &self,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> Result<RecipientReport, ScanError> {
        let due = self
            .eligibility
            .find_due(&recipient.id, now)
            .await
            .map_err(|source| ScanError::Query {
                recipient_id: recipient.id.clone(),
                source,
            })?;

        let mut report = RecipientReport {
            due: due.len(),
            ..Default::default()
        };

        if due.is_empty() {
            tracing::info!(recipient_id = %recipient.id, "No pending notifications for recipient");
            return Ok(report);
        }

        for record in &due {
            match self.executor.dispatch(recipient, record).await {
                DispatchOutcome::Sent { .. } => report.sent += 1,
                DispatchOutcome::Skipped(_) => report.skipped += 1,
                DispatchOutcome::Failed(FailureReason::Mark(_)) => {
                    report.failed += 1;
                    report.unmarked += 1;
                }
                DispatchOutcome::Failed(_) => report.failed += 1,
            }
        }

        Ok(report)
    }
}
