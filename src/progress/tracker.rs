//! Progress tracking for active transfers

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the change-notification channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Direction of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Upload,
    Download,
}

/// Lifecycle status of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

/// Observable state of one transfer; never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct TransferState {
    pub id: String,
    pub filename: String,
    pub kind: TransferKind,
    pub file_size: u64,
    /// Percentage, 0-100
    pub progress: f64,
    pub uploaded_bytes: u64,
    /// KB/s
    pub speed: f64,
    /// Milliseconds; `None` while the speed is zero
    pub time_remaining_ms: Option<f64>,
    pub status: TransferStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub error: Option<String>,
}

/// Change notifications emitted by the tracker
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Added(TransferState),
    Updated(TransferState),
    Removed { id: String },
}

struct Entry {
    state: TransferState,
    started: Instant,
    last_sample_at: Instant,
    last_sample_bytes: u64,
    /// bytes per millisecond
    rate: f64,
}

impl Entry {
    fn new(state: TransferState, now: Instant) -> Self {
        Self {
            state,
            started: now,
            last_sample_at: now,
            last_sample_bytes: 0,
            rate: 0.0,
        }
    }

    fn finish(&mut self, status: TransferStatus, now: Instant) {
        self.state.status = status;
        self.state.ended_at = Some(Utc::now());
        self.state.duration = if status == TransferStatus::Completed {
            Some(now.saturating_duration_since(self.started))
        } else {
            None
        };
    }
}

/// Tracks any number of independent transfers
pub struct ProgressTracker {
    transfers: Mutex<Vec<Entry>>,
    events: broadcast::Sender<TransferEvent>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transfers: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    /// Start tracking; an existing transfer with the same id is replaced
    pub fn add_transfer(
        &self,
        id: &str,
        filename: &str,
        kind: TransferKind,
        file_size: u64,
    ) -> TransferState {
        let state = TransferState {
            id: id.to_string(),
            filename: filename.to_string(),
            kind,
            file_size,
            progress: 0.0,
            uploaded_bytes: 0,
            speed: 0.0,
            time_remaining_ms: None,
            status: TransferStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            duration: None,
            error: None,
        };

        let mut transfers = self.lock();
        transfers.retain(|e| e.state.id != id);
        transfers.push(Entry::new(state.clone(), Instant::now()));
        drop(transfers);

        self.notify(TransferEvent::Added(state.clone()));
        state
    }

    /// Account for bytes that were transferred before tracking began (a
    /// resumed upload); they do not count towards speed
    pub fn seed_bytes(&self, id: &str, uploaded_bytes: u64) {
        self.modify(id, |entry, _| {
            let bytes = uploaded_bytes.min(entry.state.file_size);
            entry.state.uploaded_bytes = bytes;
            entry.state.progress = percentage(bytes, entry.state.file_size);
            entry.last_sample_bytes = bytes;
        });
    }

    pub fn update_bytes(&self, id: &str, uploaded_bytes: u64) {
        self.update_bytes_at(id, uploaded_bytes, Instant::now());
    }

    /// Record a new cumulative byte count observed at `now`.
    ///
    /// Speed is the byte delta over the time since the previous sample.
    /// Reaching the full size completes the transfer.
    pub fn update_bytes_at(&self, id: &str, uploaded_bytes: u64, now: Instant) {
        self.modify(id, |entry, _| {
            if entry.state.status != TransferStatus::Active {
                return;
            }

            let bytes = uploaded_bytes.min(entry.state.file_size);
            let elapsed_ms = now
                .saturating_duration_since(entry.last_sample_at)
                .as_secs_f64()
                * 1000.0;

            if elapsed_ms > 0.0 {
                let delta = bytes.saturating_sub(entry.last_sample_bytes) as f64;
                entry.rate = delta / elapsed_ms;
                entry.last_sample_at = now;
                entry.last_sample_bytes = bytes;
            }

            entry.state.uploaded_bytes = bytes;
            entry.state.progress = percentage(bytes, entry.state.file_size);
            entry.state.speed = entry.rate * 1000.0 / 1024.0;
            entry.state.time_remaining_ms = if entry.rate > 0.0 {
                Some((entry.state.file_size - bytes) as f64 / entry.rate)
            } else {
                None
            };

            if entry.state.progress >= 100.0 {
                entry.state.progress = 100.0;
                entry.state.time_remaining_ms = Some(0.0);
                entry.finish(TransferStatus::Completed, now);
            }
        });
    }

    /// Percentage-based update; bytes are derived from the file size
    pub fn update_progress(&self, id: &str, progress: f64) {
        let Some(file_size) = self.get(id).map(|t| t.file_size) else {
            return;
        };
        let progress = progress.clamp(0.0, 100.0);
        let bytes = (file_size as f64 * progress / 100.0).round() as u64;
        self.update_bytes(id, bytes);
    }

    pub fn complete(&self, id: &str) {
        self.modify(id, |entry, now| {
            if entry.state.status == TransferStatus::Completed {
                return;
            }
            entry.state.progress = 100.0;
            entry.state.uploaded_bytes = entry.state.file_size;
            entry.state.time_remaining_ms = Some(0.0);
            entry.finish(TransferStatus::Completed, now);
        });
    }

    pub fn fail(&self, id: &str, error: &str) {
        self.modify(id, |entry, now| {
            entry.state.error = Some(error.to_string());
            entry.finish(TransferStatus::Failed, now);
        });
    }

    pub fn cancel(&self, id: &str) {
        self.modify(id, |entry, now| entry.finish(TransferStatus::Cancelled, now));
    }

    /// Put a failed transfer back to active with counters reset
    pub fn retry_transfer(&self, id: &str) -> bool {
        let mut retried = false;
        self.modify(id, |entry, now| {
            if entry.state.status != TransferStatus::Failed {
                return;
            }
            entry.state.status = TransferStatus::Active;
            entry.state.progress = 0.0;
            entry.state.uploaded_bytes = 0;
            entry.state.speed = 0.0;
            entry.state.time_remaining_ms = None;
            entry.state.error = None;
            entry.state.started_at = Utc::now();
            entry.state.ended_at = None;
            entry.state.duration = None;
            entry.started = now;
            entry.last_sample_at = now;
            entry.last_sample_bytes = 0;
            entry.rate = 0.0;
            retried = true;
        });
        retried
    }

    pub fn remove(&self, id: &str) -> Option<TransferState> {
        let mut transfers = self.lock();
        let index = transfers.iter().position(|e| e.state.id == id)?;
        let entry = transfers.remove(index);
        drop(transfers);

        self.notify(TransferEvent::Removed { id: id.to_string() });
        Some(entry.state)
    }

    pub fn get(&self, id: &str) -> Option<TransferState> {
        self.lock()
            .iter()
            .find(|e| e.state.id == id)
            .map(|e| e.state.clone())
    }

    /// All transfers in the order they were added
    pub fn transfers(&self) -> Vec<TransferState> {
        self.lock().iter().map(|e| e.state.clone()).collect()
    }

    pub fn clear_completed(&self) -> usize {
        let completed: Vec<String> = self
            .lock()
            .iter()
            .filter(|e| e.state.status == TransferStatus::Completed)
            .map(|e| e.state.id.clone())
            .collect();

        for id in &completed {
            self.remove(id);
        }
        completed.len()
    }

    pub fn clear_all(&self) {
        let ids: Vec<String> = self.lock().drain(..).map(|e| e.state.id).collect();
        for id in ids {
            self.notify(TransferEvent::Removed { id });
        }
    }

    /// Mean progress across tracked transfers, rounded
    pub fn total_progress(&self) -> u32 {
        let transfers = self.lock();
        if transfers.is_empty() {
            return 0;
        }
        let sum: f64 = transfers.iter().map(|e| e.state.progress).sum();
        (sum / transfers.len() as f64).round() as u32
    }

    pub fn completed_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.state.progress >= 100.0)
            .count()
    }

    pub fn in_progress_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.state.progress < 100.0)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.transfers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut Entry, Instant)) {
        let mut transfers = self.lock();
        let Some(entry) = transfers.iter_mut().find(|e| e.state.id == id) else {
            debug!("Progress update for unknown transfer {}", id);
            return;
        };
        f(entry, Instant::now());
        let state = entry.state.clone();
        drop(transfers);

        self.notify(TransferEvent::Updated(state));
    }

    fn notify(&self, event: TransferEvent) {
        let _ = self.events.send(event);
    }
}

fn percentage(bytes: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    bytes as f64 / total as f64 * 100.0
}
