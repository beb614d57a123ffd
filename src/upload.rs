use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::api::ServiceClient;
use crate::error::Error;
use crate::result::Result;
use crate::session::{assign_parts, SessionState, Transition, UploadSession};
use crate::source::RangedReader;
use crate::worker::{PartWorker, RetryPolicy, WorkerResult};

pub static CLIENT_MAX_CONCURRENCY: u32 = 5;

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub artifact_id: String,
    /// Client-side cap on the server's suggested concurrency.
    pub max_concurrency: u32,
    pub retry: RetryPolicy,
    pub send_content_md5: bool,
}

impl UploadConfig {
    pub fn new(artifact_id: &str) -> Self {
        UploadConfig {
            artifact_id: artifact_id.to_owned(),
            max_concurrency: CLIENT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            send_content_md5: false,
        }
    }
}

/// Resolves a path or glob pattern to exactly one regular file.
pub fn resolve_artifact(pattern: &str) -> Result<PathBuf> {
    let mut matches = vec![];
    for entry in glob::glob(pattern)? {
        let f = entry?;
        if f.is_file() {
            matches.push(f);
        }
    }

    matches.sort();

    match matches.len() {
        0 => Err(Error::Config(format!("no file matches {}", pattern))),
        1 => Ok(matches.remove(0)),
        n => Err(Error::Config(format!(
            "{} files match {}: {:?}",
            n, pattern, matches
        ))),
    }
}

pub fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_owned())
        .ok_or_else(|| Error::Config(format!("invalid file name {:?}", path)))
}

/// Drives one upload session: negotiate, upload parts concurrently, finalize.
pub struct Uploader {
    client: Arc<ServiceClient>,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(client: Arc<ServiceClient>, config: UploadConfig) -> Self {
        Uploader { client, config }
    }

    /// Uploads `source` as `file_name` and returns the session id.
    ///
    /// Finalize is only sent after every worker has joined successfully; if
    /// any worker exhausts its retries the session is left unfinished.
    pub async fn upload(&self, file_name: &str, source: Arc<dyn RangedReader>) -> Result<String> {
        let session = self
            .client
            .negotiate(&self.config.artifact_id, file_name, source.size())
            .await?;
        let workers = session.worker_count(self.config.max_concurrency);

        log::info!(
            "upload {} of {} negotiated: {} bytes in {} parts, {} uploaders",
            session.session_id,
            session.file_name,
            session.file_size_bytes,
            session.total_parts,
            workers
        );

        let state = SessionState::new().apply(Transition::StartUpload)?;
        let results = self.run_workers(&session, workers, source).await;

        let mut failed: Vec<u32> = results
            .iter()
            .filter(|result| !result.succeeded)
            .map(|result| result.worker_id)
            .collect();
        failed.sort_unstable();

        if !failed.is_empty() {
            let err = Error::WorkersFailed { workers: failed };
            log::error!("aborting upload {}: {}", session.session_id, err);
            state.apply(Transition::Abort {
                msg: err.to_string(),
            })?;
            return Err(err);
        }

        let (uploaded, skipped) = results
            .iter()
            .fold((0, 0), |(u, s), r| (u + r.uploaded, s + r.skipped));
        log::info!(
            "completing upload {} ({} parts uploaded, {} already present)",
            session.session_id,
            uploaded,
            skipped
        );

        self.client.finish_session(&session.session_id).await?;
        state.apply(Transition::Finalize)?;

        Ok(session.session_id)
    }

    /// Spawns one task per worker and waits for all of them.
    ///
    /// The tasks live in a `JoinSet`, so dropping this future (on cancel)
    /// aborts every worker still running.
    async fn run_workers(
        &self,
        session: &UploadSession,
        workers: u32,
        source: Arc<dyn RangedReader>,
    ) -> Vec<WorkerResult> {
        let mut join_set: JoinSet<WorkerResult> = JoinSet::new();

        for (id, parts) in assign_parts(session.total_parts, workers)
            .into_iter()
            .enumerate()
        {
            let worker = PartWorker {
                id: id as u32,
                parts,
                session_id: session.session_id.clone(),
                client: self.client.clone(),
                source: source.clone(),
                retry: self.config.retry,
                send_content_md5: self.config.send_content_md5,
            };
            join_set.spawn(worker.run());
        }

        let mut results = Vec::with_capacity(workers as usize);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => log::error!("uploader did not complete: {}", err),
            }
        }

        // a worker that panicked never reported; count it as failed
        for id in 0..workers {
            if !results.iter().any(|result| result.worker_id == id) {
                results.push(WorkerResult {
                    worker_id: id,
                    succeeded: false,
                    uploaded: 0,
                    skipped: 0,
                });
            }
        }
        results.sort_by_key(|result| result.worker_id);

        results
    }
}
