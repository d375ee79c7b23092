//! Upload ledger - resume bookkeeping for multipart uploads

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::record::{CompletedPart, LedgerData, UploadIdentity, UploadRecord, STORAGE_VERSION};
use super::store::{LedgerStore, MemoryLedgerStore};

/// Default retention window for resumable uploads
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Capacity of the change-notification channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change notifications emitted by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Started {
        identity: UploadIdentity,
        upload_id: String,
    },
    PartRecorded {
        identity: UploadIdentity,
        part_number: u32,
    },
    Cleared {
        identity: UploadIdentity,
    },
    Swept {
        removed: usize,
    },
}

/// Exclusive right to drive one identity; released on drop
#[derive(Debug)]
pub struct UploadClaim {
    active: Arc<Mutex<HashSet<UploadIdentity>>>,
    identity: UploadIdentity,
}

impl UploadClaim {
    pub fn identity(&self) -> &UploadIdentity {
        &self.identity
    }
}

impl Drop for UploadClaim {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.identity);
    }
}

/// Only the version tag, so a foreign schema is rejected before full parsing
#[derive(Deserialize)]
struct VersionTag {
    version: u32,
}

/// Durable record of in-flight multipart uploads.
///
/// Loaded once on open; every mutation is written through to the store while
/// the ledger lock is held. Failed writes are logged and the in-memory state
/// stays authoritative for the rest of the session.
pub struct UploadLedger {
    store: Arc<dyn LedgerStore>,
    retention: Duration,
    records: Mutex<HashMap<UploadIdentity, UploadRecord>>,
    active: Arc<Mutex<HashSet<UploadIdentity>>>,
    events: broadcast::Sender<LedgerEvent>,
}

impl UploadLedger {
    /// Open a ledger backed by `store`. Unreadable, corrupt or mismatched
    /// data yields an empty ledger.
    pub fn open(store: Arc<dyn LedgerStore>, retention: Duration) -> Self {
        let records = load_records(store.as_ref());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            retention,
            records: Mutex::new(records),
            active: Arc::new(Mutex::new(HashSet::new())),
            events,
        }
    }

    /// Ledger that lives only for this process
    pub fn in_memory() -> Self {
        Self::open(
            Arc::new(MemoryLedgerStore::new()),
            Duration::days(DEFAULT_RETENTION_DAYS),
        )
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Receive a notification for every subsequent change
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Claim `identity` for a single driver. `None` while another claim on
    /// the same identity is alive.
    pub fn claim(&self, identity: &UploadIdentity) -> Option<UploadClaim> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(identity.clone()) {
            return None;
        }
        Some(UploadClaim {
            active: self.active.clone(),
            identity: identity.clone(),
        })
    }

    /// Create (or overwrite) the record for a freshly created session
    pub fn start_upload(&self, identity: &UploadIdentity, upload_id: &str, chunk_size: u64) {
        let mut records = self.lock();
        let record = UploadRecord::new(identity, upload_id, chunk_size, now_ms());
        if records.insert(identity.clone(), record).is_some() {
            debug!("Replacing existing upload record for {}", identity);
        }
        self.persist(&records);
        drop(records);

        self.notify(LedgerEvent::Started {
            identity: identity.clone(),
            upload_id: upload_id.to_string(),
        });
    }

    /// Record a confirmed part. Recording the same part number twice is a no-op
    /// apart from refreshing the last-update time.
    pub fn record_part(&self, identity: &UploadIdentity, part_number: u32, etag: &str) {
        if part_number == 0 {
            warn!("Ignoring part number 0 for {}", identity);
            return;
        }

        let mut records = self.lock();
        let Some(record) = records.get_mut(identity) else {
            warn!("Upload not found: {}", identity);
            return;
        };

        let inserted = record.insert_part(CompletedPart::new(part_number, etag));
        record.last_update = now_ms();
        self.persist(&records);
        drop(records);

        if inserted {
            self.notify(LedgerEvent::PartRecorded {
                identity: identity.clone(),
                part_number,
            });
        }
    }

    pub fn get_state(&self, identity: &UploadIdentity) -> Option<UploadRecord> {
        self.lock().get(identity).cloned()
    }

    /// Whether a previous session can be continued with `chunk_size`.
    /// A stale record is evicted as a side effect.
    pub fn can_resume(&self, identity: &UploadIdentity, chunk_size: u64) -> bool {
        let mut records = self.lock();
        let Some(record) = records.get(identity) else {
            return false;
        };

        if record.chunk_size != chunk_size {
            warn!(
                "Chunk size mismatch for {} (recorded {}, requested {}), cannot resume upload",
                identity, record.chunk_size, chunk_size
            );
            return false;
        }

        if record.is_stale(now_ms(), self.retention.num_milliseconds()) {
            warn!("Upload state for {} is too old, clearing", identity);
            records.remove(identity);
            self.persist(&records);
            drop(records);
            self.notify(LedgerEvent::Cleared {
                identity: identity.clone(),
            });
            return false;
        }

        true
    }

    /// `max(completed) + 1`, or 1 when nothing is recorded. Gaps below the
    /// maximum are never revisited here.
    pub fn next_part_number(&self, identity: &UploadIdentity) -> u32 {
        self.lock()
            .get(identity)
            .and_then(UploadRecord::max_part_number)
            .map_or(1, |max| max.saturating_add(1))
    }

    /// Completed parts in ascending part-number order
    pub fn completed_parts(&self, identity: &UploadIdentity) -> Vec<CompletedPart> {
        self.lock()
            .get(identity)
            .map(|r| r.completed_parts.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self, identity: &UploadIdentity) {
        let mut records = self.lock();
        if records.remove(identity).is_none() {
            return;
        }
        self.persist(&records);
        drop(records);

        self.notify(LedgerEvent::Cleared {
            identity: identity.clone(),
        });
    }

    /// Drop every record whose last update is outside the retention window
    pub fn sweep_stale(&self) -> usize {
        let now = now_ms();
        let retention_ms = self.retention.num_milliseconds();

        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| !record.is_stale(now, retention_ms));
        let removed = before - records.len();

        if removed > 0 {
            info!("Cleaned up {} old upload states", removed);
            self.persist(&records);
            drop(records);
            self.notify(LedgerEvent::Swept { removed });
        }

        removed
    }

    /// All records, ordered by identity
    pub fn all_uploads(&self) -> Vec<UploadRecord> {
        let records = self.lock();
        let mut all: Vec<UploadRecord> = records.values().cloned().collect();
        all.sort_by_key(UploadRecord::identity);
        all
    }

    pub fn clear_all(&self) {
        let mut records = self.lock();
        let removed = records.len();
        records.clear();
        self.persist(&records);
        drop(records);

        if removed > 0 {
            self.notify(LedgerEvent::Swept { removed });
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UploadIdentity, UploadRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write the full ledger; failures are logged, never raised
    fn persist(&self, records: &HashMap<UploadIdentity, UploadRecord>) {
        let data = LedgerData::from_records(records.values());
        let content = match serde_json::to_string(&data) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to serialize upload ledger: {}", e);
                return;
            }
        };

        if let Err(e) = self.store.save(&content) {
            error!("Failed to save upload resume data: {}", e);
        }
    }

    fn notify(&self, event: LedgerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn load_records(store: &dyn LedgerStore) -> HashMap<UploadIdentity, UploadRecord> {
    let content = match store.load() {
        Ok(Some(content)) => content,
        Ok(None) => return HashMap::new(),
        Err(e) => {
            error!("Failed to load upload resume data: {}", e);
            return HashMap::new();
        }
    };

    match serde_json::from_str::<VersionTag>(&content) {
        Ok(tag) if tag.version == STORAGE_VERSION => {}
        Ok(tag) => {
            warn!(
                "Upload resume storage version mismatch ({} != {}), clearing old data",
                tag.version, STORAGE_VERSION
            );
            return HashMap::new();
        }
        Err(e) => {
            warn!("Failed to parse upload resume data, starting empty: {}", e);
            return HashMap::new();
        }
    }

    let data: LedgerData = match serde_json::from_str(&content) {
        Ok(data) => data,
        Err(e) => {
            warn!("Failed to parse upload resume data, starting empty: {}", e);
            return HashMap::new();
        }
    };

    data.uploads
        .into_values()
        .filter(|record| {
            if record.chunk_size == 0 {
                warn!("Dropping upload record with zero chunk size: {}", record.identity());
                return false;
            }
            true
        })
        .map(|mut record| {
            record.normalize();
            (record.identity(), record)
        })
        .collect()
}
