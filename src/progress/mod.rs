//! Transfer progress module
//!
//! Byte-level progress, instantaneous speed and ETA per transfer, with a
//! subscription channel for observers (terminal UI, logs).

mod tracker;

pub use tracker::{ProgressTracker, TransferEvent, TransferKind, TransferState, TransferStatus};
