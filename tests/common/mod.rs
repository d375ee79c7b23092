//! Shared test helpers: a scripted in-memory object store and fast retry policies

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use partwise::error::{UploadError, UploadResult};
use partwise::ledger::{CompletedPart, LedgerStore, MemoryLedgerStore, UploadLedger};
use partwise::retry::RetryPolicy;
use partwise::store::{CompletedObject, ObjectStore};

/// Retry policy with millisecond delays
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 4,
        backoff_factor: 2.0,
    }
}

/// Ledger backed by an in-memory store the test keeps a handle to
pub fn memory_ledger() -> (Arc<MemoryLedgerStore>, Arc<UploadLedger>) {
    let store = Arc::new(MemoryLedgerStore::new());
    let ledger = reopen_ledger(&store);
    (store, ledger)
}

/// Simulates a restart: a fresh ledger over the same persisted bytes
pub fn reopen_ledger(store: &Arc<MemoryLedgerStore>) -> Arc<UploadLedger> {
    let store: Arc<dyn LedgerStore> = store.clone();
    Arc::new(UploadLedger::open(store, chrono::Duration::days(7)))
}

/// Deterministic content of `len` bytes
pub fn content(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

/// Poll `condition` until it holds, failing the test after 5 seconds
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { key: String, content_type: String },
    UploadPart { upload_id: String, part_number: u32, len: usize },
    Complete { upload_id: String, parts: Vec<CompletedPart> },
    Abort { upload_id: String },
}

#[derive(Default)]
struct Session {
    key: String,
    parts: HashMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct State {
    next_session: u32,
    sessions: HashMap<String, Session>,
    create_failures: VecDeque<UploadError>,
    part_failures: HashMap<u32, VecDeque<UploadError>>,
    complete_failure: Option<UploadError>,
    abort_failure: Option<UploadError>,
    hang_on_part: Option<u32>,
    completed: HashMap<String, Bytes>,
    calls: Vec<Call>,
}

/// In-memory object store whose failures are scripted by the test
#[derive(Default)]
pub struct ScriptedStore {
    state: Mutex<State>,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Fail the next `times` create calls with `status`
    pub fn fail_create(&self, times: usize, status: u16) {
        let mut state = self.state();
        for _ in 0..times {
            state
                .create_failures
                .push_back(UploadError::http(status, "scripted create failure"));
        }
    }

    /// Fail the next `times` attempts at `part_number` with `status`
    pub fn fail_part(&self, part_number: u32, times: usize, status: u16) {
        let mut state = self.state();
        let queue = state.part_failures.entry(part_number).or_default();
        for _ in 0..times {
            queue.push_back(UploadError::http(status, "scripted part failure"));
        }
    }

    pub fn fail_complete(&self, status: u16) {
        self.state().complete_failure = Some(UploadError::http(status, "scripted complete failure"));
    }

    pub fn fail_abort(&self, status: u16) {
        self.state().abort_failure = Some(UploadError::http(status, "scripted abort failure"));
    }

    /// Upload-part calls for `part_number` never return
    pub fn hang_on_part(&self, part_number: u32) {
        self.state().hang_on_part = Some(part_number);
    }

    pub fn release_hang(&self) {
        self.state().hang_on_part = None;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create { .. }))
            .count()
    }

    /// Upload-part attempts in call order
    pub fn part_attempts(&self) -> Vec<u32> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                Call::UploadPart { part_number, .. } => Some(*part_number),
                _ => None,
            })
            .collect()
    }

    pub fn complete_calls(&self) -> Vec<Vec<CompletedPart>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Complete { parts, .. } => Some(parts),
                _ => None,
            })
            .collect()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Abort { upload_id } => Some(upload_id),
                _ => None,
            })
            .collect()
    }

    /// Assembled bytes of a completed object
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state().completed.get(key).cloned()
    }

    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }
}

#[async_trait]
impl ObjectStore for ScriptedStore {
    async fn create_multipart(
        &self,
        _namespace: &str,
        key: &str,
        content_type: &str,
    ) -> UploadResult<String> {
        let mut state = self.state();
        state.calls.push(Call::Create {
            key: key.to_string(),
            content_type: content_type.to_string(),
        });
        if let Some(e) = state.create_failures.pop_front() {
            return Err(e);
        }
        state.next_session += 1;
        let upload_id = format!("session-{}", state.next_session);
        state.sessions.insert(
            upload_id.clone(),
            Session {
                key: key.to_string(),
                ..Session::default()
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        upload_id: &str,
        _namespace: &str,
        _key: &str,
        part_number: u32,
        body: Bytes,
    ) -> UploadResult<String> {
        let hang = {
            let mut state = self.state();
            state.calls.push(Call::UploadPart {
                upload_id: upload_id.to_string(),
                part_number,
                len: body.len(),
            });
            state.hang_on_part == Some(part_number)
        };
        if hang {
            return std::future::pending::<UploadResult<String>>().await;
        }

        let mut state = self.state();
        if let Some(e) = state
            .part_failures
            .get_mut(&part_number)
            .and_then(|q| q.pop_front())
        {
            return Err(e);
        }
        let etag = format!("etag-{}-{}-{}", upload_id, part_number, body.len());
        let session = state
            .sessions
            .get_mut(upload_id)
            .ok_or_else(|| UploadError::http(404, "NoSuchUpload"))?;
        session.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        upload_id: &str,
        _namespace: &str,
        key: &str,
        parts: &[CompletedPart],
    ) -> UploadResult<CompletedObject> {
        let mut state = self.state();
        state.calls.push(Call::Complete {
            upload_id: upload_id.to_string(),
            parts: parts.to_vec(),
        });
        if let Some(e) = state.complete_failure.take() {
            return Err(e);
        }

        let session = state
            .sessions
            .remove(upload_id)
            .ok_or_else(|| UploadError::http(404, "NoSuchUpload"))?;

        let mut assembled = Vec::new();
        for part in parts {
            match session.parts.get(&part.part_number) {
                Some((etag, body)) if *etag == part.etag => assembled.extend_from_slice(body),
                _ => return Err(UploadError::http(400, "InvalidPart")),
            }
        }
        let size = assembled.len() as u64;
        state.completed.insert(session.key, Bytes::from(assembled));

        Ok(CompletedObject {
            key: key.to_string(),
            etag: Some(format!("final-{}", upload_id)),
            size: Some(size),
            version: None,
        })
    }

    async fn abort_multipart(
        &self,
        upload_id: &str,
        _namespace: &str,
        _key: &str,
    ) -> UploadResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Abort {
            upload_id: upload_id.to_string(),
        });
        if let Some(e) = state.abort_failure.take() {
            return Err(e);
        }
        state.sessions.remove(upload_id);
        Ok(())
    }
}
