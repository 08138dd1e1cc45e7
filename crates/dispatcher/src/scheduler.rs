use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use tidings_engine::orchestrator::{ScanOrchestrator, ScanSummary};

/// Fixed-interval scan trigger.
///
/// Each tick runs one full scan under a watchdog timeout. A scan that overruns
/// the interval delays the next tick instead of stacking up.
pub struct ScanLoop {
    orchestrator: Arc<ScanOrchestrator>,
    interval: Duration,
    timeout: Duration,
}

impl ScanLoop {
    pub fn new(orchestrator: Arc<ScanOrchestrator>, interval_secs: u64, timeout_secs: u64) -> Self {
        Self {
            orchestrator,
            interval: Duration::from_secs(interval_secs.max(1)),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// Run scans forever. The first scan starts immediately.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "Scan loop started"
        );

        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    /// Run a single scan. Returns `None` when the watchdog timeout fired.
    pub async fn run_once(&self) -> Option<ScanSummary> {
        let now = Utc::now();
        match tokio::time::timeout(self.timeout, self.orchestrator.run_scan(now)).await {
            Ok(summary) => Some(summary),
            Err(_) => {
                tracing::error!(
                    scan_time = %now,
                    timeout_secs = self.timeout.as_secs(),
                    "Scan exceeded watchdog timeout; abandoned until next tick"
                );
                None
            }
        }
    }
}
