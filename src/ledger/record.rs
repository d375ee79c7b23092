//! Ledger data structures

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Persisted format version; any other value discards the stored ledger
pub const STORAGE_VERSION: u32 = 1;

/// Identity of one upload: the same file content sent to the same place
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadIdentity {
    pub namespace: String,
    pub key: String,
    pub size: u64,
}

impl UploadIdentity {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            size,
        }
    }

    /// Map key used in the persisted ledger (`namespace:key:size`)
    pub fn storage_key(&self) -> String {
        format!("{}:{}:{}", self.namespace, self.key, self.size)
    }
}

impl fmt::Display for UploadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// A part the store has acknowledged, with its integrity token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}

/// One in-flight multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub bucket: String,
    pub key: String,
    pub file_size: u64,
    pub upload_id: String,
    pub chunk_size: u64,
    #[serde(default)]
    pub completed_parts: Vec<CompletedPart>,
    /// Epoch milliseconds
    pub start_time: i64,
    /// Epoch milliseconds
    pub last_update: i64,
}

impl UploadRecord {
    pub fn new(identity: &UploadIdentity, upload_id: &str, chunk_size: u64, now_ms: i64) -> Self {
        Self {
            bucket: identity.namespace.clone(),
            key: identity.key.clone(),
            file_size: identity.size,
            upload_id: upload_id.to_string(),
            chunk_size,
            completed_parts: Vec::new(),
            start_time: now_ms,
            last_update: now_ms,
        }
    }

    pub fn identity(&self) -> UploadIdentity {
        UploadIdentity::new(self.bucket.clone(), self.key.clone(), self.file_size)
    }

    pub fn has_part(&self, part_number: u32) -> bool {
        self.completed_parts
            .binary_search_by_key(&part_number, |p| p.part_number)
            .is_ok()
    }

    pub fn max_part_number(&self) -> Option<u32> {
        self.completed_parts.iter().map(|p| p.part_number).max()
    }

    /// Insert keeping ascending order; returns false if the part was already there
    pub(crate) fn insert_part(&mut self, part: CompletedPart) -> bool {
        match self
            .completed_parts
            .binary_search_by_key(&part.part_number, |p| p.part_number)
        {
            Ok(_) => false,
            Err(pos) => {
                self.completed_parts.insert(pos, part);
                true
            }
        }
    }

    /// Restore the sorted, duplicate-free invariant on data read from disk
    pub(crate) fn normalize(&mut self) {
        self.completed_parts.sort_by_key(|p| p.part_number);
        self.completed_parts.dedup_by_key(|p| p.part_number);
    }

    pub fn is_stale(&self, now_ms: i64, retention_ms: i64) -> bool {
        self.last_update < now_ms.saturating_sub(retention_ms)
    }
}

/// On-disk shape of the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerData {
    pub version: u32,
    #[serde(default)]
    pub uploads: BTreeMap<String, UploadRecord>,
}

impl Default for LedgerData {
    fn default() -> Self {
        Self {
            version: STORAGE_VERSION,
            uploads: BTreeMap::new(),
        }
    }
}

impl LedgerData {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a UploadRecord>) -> Self {
        let uploads = records
            .into_iter()
            .map(|r| (r.identity().storage_key(), r.clone()))
            .collect();
        Self {
            version: STORAGE_VERSION,
            uploads,
        }
    }
}
