//! partwise library - resumable multipart uploads to an object store

pub mod config;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, ConfigOptions};
pub use error::{UploadError, UploadResult};
pub use ledger::{UploadIdentity, UploadLedger, UploadRecord};
pub use orchestrator::{UploadOrchestrator, UploadOutcome, UploadRequest};
pub use progress::ProgressTracker;
pub use retry::{BackoffRetrier, RetryPolicy};
pub use scheduler::PartScheduler;
pub use source::{FileSource, PartSource};
pub use store::{HttpObjectStore, ObjectStore};
