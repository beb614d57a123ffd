//! Test doubles for the transport.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::transport::{Method, Request, Transport, TransportError, TransportFuture};

type Handler = Box<dyn Fn(&Request) -> Result<Value, TransportError> + Send + Sync>;

/// Answers every request through `handler` and records what was sent.
pub struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&Request) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        Arc::new(MockTransport {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn call(&self, request: Request) -> TransportFuture<'_> {
        let result = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        Box::pin(async move { result })
    }
}

pub static SESSION_ID: &str = "img-1";
static STORAGE_URL: &str = "https://storage.test";

#[derive(Default)]
struct FakeState {
    received: BTreeMap<u32, (u64, Vec<u8>)>,
    finished_parts: BTreeSet<u32>,
    transmit_failures: HashMap<u32, u32>,
    transmit_attempts: HashMap<u32, u32>,
    digests: HashMap<u32, String>,
    events: Vec<String>,
}

/// In-process analysis service that splits a file into equal parts.
pub struct FakeService {
    file_size: u64,
    total_parts: u32,
    max_concurrency: u32,
    zero_length_parts: BTreeSet<u32>,
    state: Mutex<FakeState>,
}

impl FakeService {
    pub fn new(file_size: u64, total_parts: u32, max_concurrency: u32) -> Self {
        FakeService {
            file_size,
            total_parts,
            max_concurrency,
            zero_length_parts: BTreeSet::new(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Part `part_number` transmissions fail `times` times before succeeding.
    pub fn failing_transmit(self, part_number: u32, times: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .transmit_failures
            .insert(part_number, times);
        self
    }

    pub fn already_finished(self, part_number: u32) -> Self {
        self.state.lock().unwrap().finished_parts.insert(part_number);
        self
    }

    pub fn zero_length(mut self, part_number: u32) -> Self {
        self.zero_length_parts.insert(part_number);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn part_size(&self) -> u64 {
        (self.file_size + self.total_parts as u64 - 1) / self.total_parts as u64
    }

    pub fn range(&self, part_number: u32) -> (u64, u64) {
        if self.zero_length_parts.contains(&part_number) {
            return (0, 0);
        }
        let start = (part_number as u64 - 1) * self.part_size();
        let len = self.part_size().min(self.file_size.saturating_sub(start));
        (start, len)
    }

    /// Bytes received so far, placed at their offsets.
    pub fn reassemble(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let mut file = vec![0u8; self.file_size as usize];
        for (offset, bytes) in state.received.values() {
            let start = *offset as usize;
            file[start..start + bytes.len()].copy_from_slice(bytes);
        }
        file
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }

    pub fn transmit_attempts(&self, part_number: u32) -> u32 {
        self.state
            .lock()
            .unwrap()
            .transmit_attempts
            .get(&part_number)
            .copied()
            .unwrap_or(0)
    }

    pub fn content_md5(&self, part_number: u32) -> Option<String> {
        self.state.lock().unwrap().digests.get(&part_number).cloned()
    }

    fn handle(&self, request: &Request) -> Result<Value, TransportError> {
        let status = |status: u16, body: Option<Value>| TransportError::Status {
            url: request.url.clone(),
            status,
            body,
        };
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        if let Some(rest) = request.url.strip_prefix(STORAGE_URL) {
            let part_number: u32 = rest.trim_matches('/').parse().map_err(|_| status(404, None))?;
            *state.transmit_attempts.entry(part_number).or_insert(0) += 1;

            if let Some(remaining) = state.transmit_failures.get_mut(&part_number) {
                if *remaining > 0 {
                    *remaining -= 1;
                    state.events.push(format!("transmit-failed {}", part_number));
                    return Err(status(500, None));
                }
            }

            if let Some(digest) = &request.content_md5 {
                state.digests.insert(part_number, digest.clone());
            }
            let (offset, _) = self.range(part_number);
            let body = request.body.clone().unwrap_or_default();
            state.received.insert(part_number, (offset, body));
            state.events.push(format!("transmit {}", part_number));
            return Ok(Value::Null);
        }

        let segments: Vec<&str> = request
            .url
            .trim_start_matches("/v3/images/")
            .trim_end_matches('/')
            .split('/')
            .collect();

        match segments.as_slice() {
            ["upload_request"] if request.method == Method::POST => {
                state.events.push("negotiate".to_owned());
                Ok(json!({
                    "image_id": SESSION_ID,
                    "total_parts": self.total_parts,
                    "max_concurrency": self.max_concurrency,
                }))
            }
            [_, "part", n] if request.method == Method::GET => {
                let part_number: u32 = n.parse().map_err(|_| status(404, None))?;
                if state.finished_parts.contains(&part_number) {
                    return Err(status(
                        400,
                        Some(json!({"details": "part already uploaded and finished"})),
                    ));
                }
                let (start, len) = self.range(part_number);
                Ok(json!({
                    "start_offset_bytes": start,
                    "part_length_bytes": len,
                    "prepared_request_URL": format!("{}/{}", STORAGE_URL, part_number),
                    "prepared_request_method": "PUT",
                }))
            }
            [_, "part", n, "finished"] if request.method == Method::POST => {
                let part_number: u32 = n.parse().map_err(|_| status(404, None))?;
                state.finished_parts.insert(part_number);
                state.events.push(format!("finish-part {}", part_number));
                Ok(Value::Null)
            }
            [_, "finished"] if request.method == Method::POST => {
                state.events.push("finalize".to_owned());
                Ok(Value::Null)
            }
            _ => Err(status(404, None)),
        }
    }
}

impl Transport for FakeService {
    fn call(&self, request: Request) -> TransportFuture<'_> {
        let result = self.handle(&request);
        Box::pin(async move { result })
    }
}

/// Delays every pre-signed transmit of a `FakeService` and tracks how many
/// are in flight at once.
pub struct PacedService {
    pub inner: Arc<FakeService>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl PacedService {
    pub fn new(inner: Arc<FakeService>, delay: Duration) -> Arc<Self> {
        Arc::new(PacedService {
            inner,
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Transport for PacedService {
    fn call(&self, request: Request) -> TransportFuture<'_> {
        if request.authenticated {
            return self.inner.call(request);
        }

        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let result = self.inner.call(request).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}
