use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::ServiceClient;
use crate::error::Error;
use crate::poller::{PollPolicy, ScanOutcome, ScanPoller};
use crate::result::Result;
use crate::source::FileSource;
use crate::upload::{file_name_of, UploadConfig, Uploader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Uploaded { session_id: String },
    Scanned { session_id: String },
}

/// Uploads one artifact and, when a poll policy is set, waits for its scan.
pub struct App {
    pub client: Arc<ServiceClient>,
    pub uploader: Uploader,
    pub poll: Option<PollPolicy>,
    pub cancel: CancellationToken,
}

impl App {
    pub fn new(client: Arc<ServiceClient>, config: UploadConfig, poll: Option<PollPolicy>) -> Self {
        App {
            uploader: Uploader::new(client.clone(), config),
            client,
            poll,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, file: &Path, name: Option<&str>) -> Result<RunOutcome> {
        let source = FileSource::open(file).await.map_err(|err| {
            Error::Config(format!("cannot open {}: {}", file.display(), err))
        })?;
        let file_name = match name {
            Some(name) => name.to_owned(),
            None => file_name_of(file)?,
        };

        let session_id = tokio::select! {
            result = self.uploader.upload(&file_name, Arc::new(source)) => result?,
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
        };
        log::info!("upload success: {}", session_id);

        let policy = match self.poll {
            Some(policy) => policy,
            None => {
                log::info!("not waiting for scan results");
                return Ok(RunOutcome::Uploaded { session_id });
            }
        };

        let poller = ScanPoller::new(self.client.clone(), policy).with_cancel(self.cancel.clone());
        match poller.poll(&session_id).await? {
            ScanOutcome::Success => {
                log::info!("scan of {} finished", session_id);
                Ok(RunOutcome::Scanned { session_id })
            }
            ScanOutcome::Failure { error_code } => {
                log::error!(
                    "scan of {} failed: {}",
                    session_id,
                    error_code.as_deref().unwrap_or("unknown error")
                );
                Err(Error::ScanFailed { error_code })
            }
            ScanOutcome::Timeout => {
                log::error!("scan of {} failed: timeout", session_id);
                Err(Error::ScanTimeout)
            }
        }
    }
}
