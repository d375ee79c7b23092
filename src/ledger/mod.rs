//! Upload ledger module
//!
//! Durable, versioned record of in-flight multipart uploads and the parts
//! the object store has already confirmed.

mod manager;
mod record;
mod store;

pub use manager::{LedgerEvent, UploadClaim, UploadLedger, DEFAULT_RETENTION_DAYS};
pub use record::{CompletedPart, LedgerData, UploadIdentity, UploadRecord, STORAGE_VERSION};
pub use store::{FileLedgerStore, LedgerStore, MemoryLedgerStore};
