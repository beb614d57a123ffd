use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::{ServiceClient, StatusName};
use crate::error::Error;
use crate::result::Result;

/// Interval used with a wall-clock deadline.
pub static DEADLINE_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub static DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub static DEFAULT_MAX_POLLS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollBudget {
    Ticks(u32),
    Deadline(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub budget: PollBudget,
}

impl PollPolicy {
    pub fn ticks(interval: Duration, max_ticks: u32) -> Self {
        PollPolicy {
            interval,
            budget: PollBudget::Ticks(max_ticks),
        }
    }

    pub fn deadline(timeout: Duration) -> Self {
        PollPolicy {
            interval: DEADLINE_POLL_INTERVAL,
            budget: PollBudget::Deadline(timeout),
        }
    }

    fn exhausted(&self, ticks: u32, elapsed: Duration) -> bool {
        match self.budget {
            PollBudget::Ticks(max_ticks) => ticks >= max_ticks,
            PollBudget::Deadline(timeout) => elapsed >= timeout,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy::ticks(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_POLLS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Success,
    Failure { error_code: Option<String> },
    Timeout,
}

/// Emitted after every non-terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollProgress {
    pub tick: u32,
    pub elapsed: Duration,
    pub status: StatusName,
}

pub struct ScanPoller {
    client: Arc<ServiceClient>,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl ScanPoller {
    pub fn new(client: Arc<ServiceClient>, policy: PollPolicy) -> Self {
        ScanPoller {
            client,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn poll(&self, session_id: &str) -> Result<ScanOutcome> {
        self.poll_with(session_id, |_| {}).await
    }

    /// Queries the scan status until it is terminal or the budget runs out.
    ///
    /// Transport errors end the poll immediately. Cancellation is observed
    /// between ticks and during the wait.
    pub async fn poll_with<F>(&self, session_id: &str, mut on_progress: F) -> Result<ScanOutcome>
    where
        F: FnMut(&PollProgress),
    {
        let start = Instant::now();
        let mut ticks = 0;

        loop {
            if self.policy.exhausted(ticks, start.elapsed()) {
                break;
            }
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            ticks += 1;
            let status = self.client.scan_status(session_id).await?;

            match status.name {
                StatusName::Success => {
                    log::info!("scan of {} done", session_id);
                    return Ok(ScanOutcome::Success);
                }
                StatusName::Failure => {
                    return Ok(ScanOutcome::Failure {
                        error_code: status.error_code,
                    })
                }
                _ => {}
            }

            let progress = PollProgress {
                tick: ticks,
                elapsed: start.elapsed(),
                status: status.name,
            };
            log::info!(
                "waiting for results ({} seconds, poll {}). current status: {}",
                progress.elapsed.as_secs(),
                progress.tick,
                progress.status
            );
            on_progress(&progress);

            if let PollBudget::Ticks(max_ticks) = self.policy.budget {
                if ticks >= max_ticks {
                    break;
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
        }

        log::warn!("scan of {} did not finish after {} polls", session_id, ticks);

        Ok(ScanOutcome::Timeout)
    }
}
