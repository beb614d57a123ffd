use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error negotiating upload session: {0}")]
    Negotiation(String),

    #[error("error decoding {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("file read error: expected {expected} bytes at offset {offset}, read {actual}")]
    LocalRead {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("upload failed: exception from uploader(s) {workers:?}")]
    WorkersFailed { workers: Vec<u32> },

    #[error("error finalizing upload {session_id}: {source}")]
    Finalize {
        session_id: String,
        #[source]
        source: TransportError,
    },

    #[error("scan failed: {}", error_code.as_deref().unwrap_or("unknown error"))]
    ScanFailed { error_code: Option<String> },

    #[error("scan failed: timeout")]
    ScanTimeout,

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<glob::PatternError> for Error {
    fn from(err: glob::PatternError) -> Self {
        Error::Config(format!("invalid file pattern: {}", err))
    }
}

impl From<glob::GlobError> for Error {
    fn from(err: glob::GlobError) -> Self {
        Error::Config(format!("error reading file pattern match: {}", err))
    }
}
