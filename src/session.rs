use crate::error::Error;
use crate::result::Result;

/// Upload terms assigned by the service for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub session_id: String,
    pub file_name: String,
    pub file_size_bytes: u64,
    pub total_parts: u32,
    pub max_concurrency: u32,
}

impl UploadSession {
    /// Number of workers to run: the server's suggestion, capped by the client
    /// limit and never below one.
    pub fn worker_count(&self, client_cap: u32) -> u32 {
        self.max_concurrency.min(client_cap).max(1)
    }
}

/// Round-robin partition of part numbers `1..=total_parts` over `workers`.
///
/// Worker `w` owns every part `p` with `(p - 1) % workers == w`, in ascending
/// order.
pub fn assign_parts(total_parts: u32, workers: u32) -> Vec<Vec<u32>> {
    let workers = workers.max(1);
    let mut assignment = vec![Vec::new(); workers as usize];

    for part_number in 1..=total_parts {
        assignment[((part_number - 1) % workers) as usize].push(part_number);
    }

    assignment
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    StartUpload,
    Finalize,
    Abort { msg: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Negotiated,
    Uploading,
    Finalized,
    Aborted { msg: String },
}

impl SessionState {
    pub fn new() -> Self {
        SessionState::Negotiated
    }

    pub fn apply(self, op: Transition) -> Result<SessionState> {
        match self {
            SessionState::Negotiated => match op {
                Transition::StartUpload => Ok(SessionState::Uploading),
                Transition::Abort { msg } => Ok(SessionState::Aborted { msg }),
                op => Err(Error::InvalidState(format!(
                    "invalid operation {:?} in negotiated state",
                    op
                ))),
            },
            SessionState::Uploading => match op {
                Transition::Finalize => Ok(SessionState::Finalized),
                Transition::Abort { msg } => Ok(SessionState::Aborted { msg }),
                op => Err(Error::InvalidState(format!(
                    "invalid operation {:?} in uploading state",
                    op
                ))),
            },
            state => Err(Error::InvalidState(format!(
                "invalid operation {:?} in terminal state {:?}",
                op, state
            ))),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::new()
    }
}
