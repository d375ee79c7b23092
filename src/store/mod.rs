//! Object store module
//!
//! The four multipart operations the upload engine depends on, and an HTTP
//! client for the bucket gateway that exposes them.

mod http;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::UploadResult;
use crate::ledger::CompletedPart;

pub use http::{encode_key, HttpObjectStore};

/// Descriptor of the object produced by a completed upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedObject {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Multipart-capable object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start a new session; returns its upload id
    async fn create_multipart(
        &self,
        namespace: &str,
        key: &str,
        content_type: &str,
    ) -> UploadResult<String>;

    /// Send one part; returns the integrity token (etag) for it
    async fn upload_part(
        &self,
        upload_id: &str,
        namespace: &str,
        key: &str,
        part_number: u32,
        body: Bytes,
    ) -> UploadResult<String>;

    /// Finalize with parts in ascending order
    async fn complete_multipart(
        &self,
        upload_id: &str,
        namespace: &str,
        key: &str,
        parts: &[CompletedPart],
    ) -> UploadResult<CompletedObject>;

    async fn abort_multipart(&self, upload_id: &str, namespace: &str, key: &str)
        -> UploadResult<()>;
}
