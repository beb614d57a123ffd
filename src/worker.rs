use std::sync::Arc;
use std::time::Duration;

use crate::api::{PartLookup, ServiceClient};
use crate::error::Error;
use crate::result::Result;
use crate::source::{content_md5, RangedReader};

pub static DEFAULT_UPLOAD_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per part, including the first.
    pub max_attempts: u32,
    /// Delay between attempts; zero retries immediately.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(DEFAULT_UPLOAD_ATTEMPTS, Duration::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartOutcome {
    Uploaded,
    AlreadyUploaded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResult {
    pub worker_id: u32,
    pub succeeded: bool,
    pub uploaded: u32,
    pub skipped: u32,
}

/// Uploads a fixed, ascending set of part numbers one after another.
pub struct PartWorker {
    pub id: u32,
    pub parts: Vec<u32>,
    pub session_id: String,
    pub client: Arc<ServiceClient>,
    pub source: Arc<dyn RangedReader>,
    pub retry: RetryPolicy,
    pub send_content_md5: bool,
}

impl PartWorker {
    pub async fn run(self) -> WorkerResult {
        let mut result = WorkerResult {
            worker_id: self.id,
            succeeded: true,
            uploaded: 0,
            skipped: 0,
        };

        for &part_number in self.parts.iter() {
            match self.upload_with_retry(part_number).await {
                PartOutcome::Uploaded => result.uploaded += 1,
                PartOutcome::AlreadyUploaded => {
                    log::info!("part {} already uploaded, skipping", part_number);
                    result.skipped += 1;
                }
                PartOutcome::Failed(msg) => {
                    log::error!("uploader {} giving up: {}", self.id, msg);
                    result.succeeded = false;
                    break;
                }
            }
        }

        log::debug!("uploader {} finished: {:?}", self.id, result);

        result
    }

    async fn upload_with_retry(&self, part_number: u32) -> PartOutcome {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.upload_part(part_number).await {
                Ok(outcome) => return outcome,
                Err(err) => {
                    log::warn!(
                        "error uploading part {} on attempt {} of {}: {}",
                        part_number,
                        attempt,
                        max_attempts,
                        err
                    );
                    last_error = err.to_string();

                    if attempt < max_attempts && !self.retry.backoff.is_zero() {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
            }
        }

        PartOutcome::Failed(format!(
            "{} out of {} failures uploading part {}: {}",
            max_attempts, max_attempts, part_number, last_error
        ))
    }

    /// Fetch descriptor, send bytes, acknowledge. A short local read is an
    /// error like any other and goes through the same retry loop.
    async fn upload_part(&self, part_number: u32) -> Result<PartOutcome> {
        let descriptor = match self
            .client
            .part_descriptor(&self.session_id, part_number)
            .await?
        {
            PartLookup::AlreadyFinished => return Ok(PartOutcome::AlreadyUploaded),
            PartLookup::Pending(descriptor) => descriptor,
        };

        if descriptor.length_bytes > 0 {
            let offset = descriptor.start_offset_bytes;
            let expected = descriptor.length_bytes;
            let body = self.source.read_range(offset, expected).await?;

            if body.len() as u64 != expected {
                return Err(Error::LocalRead {
                    offset,
                    expected,
                    actual: body.len() as u64,
                });
            }

            let digest = content_md5(&body);
            log::debug!(
                "uploading part {} ({} bytes at {}, md5 {})",
                part_number,
                expected,
                offset,
                digest
            );

            self.client
                .transmit_part(&descriptor, body, Some(digest).filter(|_| self.send_content_md5))
                .await?;
        } else {
            log::debug!("part {} is empty, acknowledging", part_number);
        }

        self.client
            .finish_part(&self.session_id, part_number)
            .await?;

        Ok(PartOutcome::Uploaded)
    }
}
