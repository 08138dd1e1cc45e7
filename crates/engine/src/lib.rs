//! Scheduled notification dispatch pipeline.
//!
//! `ScanOrchestrator` drives `EligibilityQuery` and `DispatchExecutor` over the
//! recipient registry; `ReactiveDispatcher` reuses the executor for records that
//! are due as soon as they are created.

pub mod claims;
pub mod eligibility;
pub mod executor;
pub mod localization;
pub mod orchestrator;
pub mod policy;
pub mod reactive;
