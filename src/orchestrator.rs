//! Upload orchestrator - drives one file from create to complete
//!
//! `Idle -> Creating -> SendingParts -> Completing -> Done`, with `Aborting`
//! (user cancellation) and `Failed` reachable from any non-terminal phase.
//! A failed upload keeps its ledger record so a later run resumes it; an
//! aborted one does not.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DEFAULT_CHUNK_SIZE};
use crate::error::{UploadError, UploadResult};
use crate::ledger::{UploadClaim, UploadIdentity, UploadLedger};
use crate::progress::{ProgressTracker, TransferKind};
use crate::retry::{BackoffRetrier, RetryPolicy};
use crate::scheduler::PartScheduler;
use crate::source::PartSource;
use crate::store::{CompletedObject, ObjectStore};

/// Capacity of the change-notification channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Phase of a single upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    Creating,
    SendingParts,
    Completing,
    Done,
    Aborting,
    Failed,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Creating => "creating",
            Self::SendingParts => "sending-parts",
            Self::Completing => "completing",
            Self::Done => "done",
            Self::Aborting => "aborting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Notifications emitted while uploads run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Phase {
        identity: UploadIdentity,
        phase: UploadPhase,
    },
    PartSent {
        identity: UploadIdentity,
        part_number: u32,
        total_parts: u32,
    },
}

/// What to upload and where
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub namespace: String,
    pub key: String,
    pub content_type: String,
    pub chunk_size: u64,
}

impl UploadRequest {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            content_type: "application/octet-stream".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Result of a finished upload
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub identity: UploadIdentity,
    pub upload_id: String,
    pub object: CompletedObject,
    pub resumed: bool,
    pub parts_sent: u32,
    pub total_parts: u32,
}

/// Drives multipart uploads end to end. One instance can run many files
/// concurrently, but an identity is driven by at most one upload across all
/// orchestrators sharing a ledger.
pub struct UploadOrchestrator {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<UploadLedger>,
    scheduler: PartScheduler,
    progress: Arc<ProgressTracker>,
    call_retrier: BackoffRetrier,
    part_retrier: BackoffRetrier,
    events: broadcast::Sender<UploadEvent>,
}

impl UploadOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<UploadLedger>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            scheduler: PartScheduler::new(ledger.clone()),
            ledger,
            progress,
            call_retrier: BackoffRetrier::new(RetryPolicy::default()),
            part_retrier: BackoffRetrier::new(RetryPolicy::for_parts()),
            events,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn ObjectStore>,
        ledger: Arc<UploadLedger>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        Self::new(store, ledger, progress)
            .with_retry_policies(config.retry_policy(), config.part_retry_policy())
    }

    /// Policies for create/abort calls and for upload-part calls
    pub fn with_retry_policies(mut self, calls: RetryPolicy, parts: RetryPolicy) -> Self {
        self.call_retrier = BackoffRetrier::new(calls);
        self.part_retrier = BackoffRetrier::new(parts);
        self
    }

    pub fn ledger(&self) -> &Arc<UploadLedger> {
        &self.ledger
    }

    pub fn scheduler(&self) -> &PartScheduler {
        &self.scheduler
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// Upload `source` to `request.namespace/request.key`, resuming a
    /// previous session for the same identity and chunk size when possible.
    pub async fn upload(
        &self,
        request: &UploadRequest,
        source: &dyn PartSource,
        cancel: &CancellationToken,
    ) -> UploadResult<UploadOutcome> {
        if request.chunk_size == 0 {
            return Err(UploadError::InvalidChunkSize);
        }

        let identity = UploadIdentity::new(&request.namespace, &request.key, source.size());
        let _guard = self.claim(&identity)?;
        let transfer_id = identity.storage_key();

        self.progress
            .add_transfer(&transfer_id, &request.key, TransferKind::Upload, identity.size);
        self.transition(&identity, UploadPhase::Idle);

        let mut upload_id = None;
        match self
            .drive(request, &identity, source, cancel, &mut upload_id)
            .await
        {
            Ok(outcome) => {
                self.progress.complete(&transfer_id);
                self.transition(&identity, UploadPhase::Done);
                info!(
                    "Upload complete: {} ({} parts, {} sent this run)",
                    identity, outcome.total_parts, outcome.parts_sent
                );
                Ok(outcome)
            }
            Err(UploadError::Cancelled) => {
                self.transition(&identity, UploadPhase::Aborting);
                if let Some(upload_id) = upload_id {
                    self.abort_session(&identity, &upload_id).await;
                }
                self.ledger.clear(&identity);
                self.progress.cancel(&transfer_id);
                info!("Upload cancelled: {}", identity);
                Err(UploadError::Cancelled)
            }
            Err(e) => {
                self.transition(&identity, UploadPhase::Failed);
                self.progress.fail(&transfer_id, &e.to_string());
                error!("Upload failed: {}: {}", identity, e);
                Err(e)
            }
        }
    }

    /// Abort the recorded session for `identity` (if any) and forget it.
    /// Returns false when nothing was recorded.
    pub async fn abort_pending(&self, identity: &UploadIdentity) -> UploadResult<bool> {
        let _guard = self.claim(identity)?;
        let Some(record) = self.ledger.get_state(identity) else {
            return Ok(false);
        };
        self.transition(identity, UploadPhase::Aborting);
        self.abort_session(identity, &record.upload_id).await;
        self.ledger.clear(identity);
        Ok(true)
    }

    async fn drive(
        &self,
        request: &UploadRequest,
        identity: &UploadIdentity,
        source: &dyn PartSource,
        cancel: &CancellationToken,
        upload_id: &mut Option<String>,
    ) -> UploadResult<UploadOutcome> {
        let chunk_size = request.chunk_size;
        let total_parts = PartScheduler::total_parts(identity.size, chunk_size);
        let transfer_id = identity.storage_key();

        let previous = self.ledger.get_state(identity);
        let resumable = self.ledger.can_resume(identity, chunk_size);

        let (session, resumed) = match previous {
            Some(record) if resumable => {
                info!(
                    "Resuming upload {} at part {}/{}",
                    identity,
                    self.ledger.next_part_number(identity),
                    total_parts
                );
                (record.upload_id, true)
            }
            previous => {
                self.transition(identity, UploadPhase::Creating);
                if let Some(stale) = previous {
                    if self.ledger.get_state(identity).is_some() {
                        // Chunk size changed; the old session can never complete
                        self.abort_session(identity, &stale.upload_id).await;
                        self.ledger.clear(identity);
                    }
                }
                (self.create_session(request, identity, cancel).await?, false)
            }
        };
        *upload_id = Some(session.clone());

        self.transition(identity, UploadPhase::SendingParts);
        let mut uploaded = self.scheduler.completed_bytes(identity, chunk_size);
        self.progress.seed_bytes(&transfer_id, uploaded);

        let store = self.store.as_ref();
        let namespace = request.namespace.as_str();
        let key = request.key.as_str();
        let session_id = session.as_str();
        let mut parts_sent = 0;

        while let Some(plan) = self.scheduler.next_part(identity, chunk_size) {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let part_number = plan.part_number;
            let body = source.read_range(plan.range.clone()).await?;
            let label = format!("Upload part {}/{} of {}", part_number, total_parts, key);

            let etag = self
                .part_retrier
                .run(&label, cancel, |attempt| {
                    if attempt > 1 {
                        debug!("Retrying part {} (attempt {})", part_number, attempt);
                    }
                    store.upload_part(session_id, namespace, key, part_number, body.clone())
                })
                .await?;

            self.ledger.record_part(identity, part_number, &etag);
            let recorded = self
                .ledger
                .get_state(identity)
                .is_some_and(|r| r.has_part(part_number));
            if !recorded {
                return Err(UploadError::RecordLost(identity.to_string()));
            }

            parts_sent += 1;
            uploaded += plan.byte_len();
            self.progress.update_bytes(&transfer_id, uploaded);
            self.notify(UploadEvent::PartSent {
                identity: identity.clone(),
                part_number,
                total_parts,
            });
        }

        let missing = self.scheduler.missing_parts(identity, total_parts);
        if !missing.is_empty() {
            return Err(UploadError::MissingParts { missing });
        }

        self.transition(identity, UploadPhase::Completing);
        let manifest = self.scheduler.assemble_completion_manifest(identity);

        // Never retried: the manifest must be re-verified before another try
        let object = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            r = store.complete_multipart(session_id, namespace, key, &manifest) => r,
        }?;

        self.ledger.clear(identity);

        Ok(UploadOutcome {
            identity: identity.clone(),
            upload_id: session,
            object,
            resumed,
            parts_sent,
            total_parts,
        })
    }

    async fn create_session(
        &self,
        request: &UploadRequest,
        identity: &UploadIdentity,
        cancel: &CancellationToken,
    ) -> UploadResult<String> {
        let store = self.store.as_ref();
        let namespace = request.namespace.as_str();
        let key = request.key.as_str();
        let content_type = request.content_type.as_str();

        let label = format!("Create upload for {}", key);
        let upload_id = self
            .call_retrier
            .run(&label, cancel, |_| {
                store.create_multipart(namespace, key, content_type)
            })
            .await?;

        self.ledger
            .start_upload(identity, &upload_id, request.chunk_size);
        info!("Started multipart upload {} for {}", upload_id, identity);
        Ok(upload_id)
    }

    /// Best effort; failures are logged
    async fn abort_session(&self, identity: &UploadIdentity, upload_id: &str) {
        let store = self.store.as_ref();
        let namespace = identity.namespace.as_str();
        let key = identity.key.as_str();

        // The caller's token may already be cancelled
        let cancel = CancellationToken::new();
        let label = format!("Abort upload {}", upload_id);
        match self
            .call_retrier
            .run(&label, &cancel, |_| {
                store.abort_multipart(upload_id, namespace, key)
            })
            .await
        {
            Ok(()) => info!("Aborted multipart upload {} for {}", upload_id, identity),
            Err(e) => warn!(
                "Failed to abort multipart upload {} for {}: {}",
                upload_id, identity, e
            ),
        }
    }

    /// Claims are held by the ledger, so they cover every orchestrator
    /// sharing it
    fn claim(&self, identity: &UploadIdentity) -> UploadResult<UploadClaim> {
        self.ledger
            .claim(identity)
            .ok_or_else(|| UploadError::AlreadyInProgress(identity.to_string()))
    }

    fn transition(&self, identity: &UploadIdentity, phase: UploadPhase) {
        debug!("{} -> {}", identity, phase);
        self.notify(UploadEvent::Phase {
            identity: identity.clone(),
            phase,
        });
    }

    fn notify(&self, event: UploadEvent) {
        let _ = self.events.send(event);
    }
}
