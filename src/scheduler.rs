//! Part scheduler - part numbering, byte ranges and the completion manifest

use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use crate::ledger::{CompletedPart, UploadIdentity, UploadLedger};

/// The next part to send and the bytes it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    pub part_number: u32,
    pub range: Range<u64>,
}

impl PartPlan {
    pub fn byte_len(&self) -> u64 {
        self.range.end - self.range.start
    }
}

/// Decides which part goes next for an upload, backed by the ledger
#[derive(Clone)]
pub struct PartScheduler {
    ledger: Arc<UploadLedger>,
}

impl PartScheduler {
    pub fn new(ledger: Arc<UploadLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<UploadLedger> {
        &self.ledger
    }

    /// `ceil(file_size / chunk_size)`; an empty file still needs one (empty) part
    pub fn total_parts(file_size: u64, chunk_size: u64) -> u32 {
        if chunk_size == 0 {
            return 0;
        }
        let parts = file_size.div_ceil(chunk_size).max(1);
        u32::try_from(parts).unwrap_or(u32::MAX)
    }

    /// `[(n-1) * chunk_size, n * chunk_size)`, clipped to the file length
    pub fn part_range(part_number: u32, chunk_size: u64, file_size: u64) -> Option<Range<u64>> {
        if part_number == 0 || part_number > Self::total_parts(file_size, chunk_size) {
            return None;
        }
        let start = (u64::from(part_number) - 1) * chunk_size;
        let end = start.saturating_add(chunk_size).min(file_size);
        Some(start..end)
    }

    /// Next part to send, or `None` once every part is recorded.
    ///
    /// Follows the ledger's `max + 1` frontier; after the frontier passes the
    /// last part, any hole left below it is returned lowest first.
    pub fn next_part(&self, identity: &UploadIdentity, chunk_size: u64) -> Option<PartPlan> {
        let total = Self::total_parts(identity.size, chunk_size);
        let frontier = self.ledger.next_part_number(identity);

        let part_number = if frontier <= total {
            frontier
        } else {
            let gap = self.missing_parts(identity, total).into_iter().next()?;
            debug!("Backfilling missing part {} for {}", gap, identity);
            gap
        };

        let range = Self::part_range(part_number, chunk_size, identity.size)?;
        Some(PartPlan { part_number, range })
    }

    /// Part numbers in `1..=total_parts` the ledger has no entry for
    pub fn missing_parts(&self, identity: &UploadIdentity, total_parts: u32) -> Vec<u32> {
        let Some(record) = self.ledger.get_state(identity) else {
            return (1..=total_parts).collect();
        };
        (1..=total_parts).filter(|n| !record.has_part(*n)).collect()
    }

    /// Recorded parts in ascending part-number order, exactly as the store
    /// acknowledged them
    pub fn assemble_completion_manifest(&self, identity: &UploadIdentity) -> Vec<CompletedPart> {
        self.ledger.completed_parts(identity)
    }

    /// Completed-part count over `total_parts`; 0 when unknown
    pub fn progress_fraction(&self, identity: &UploadIdentity, total_parts: u32) -> f64 {
        if total_parts == 0 {
            return 0.0;
        }
        match self.ledger.get_state(identity) {
            Some(record) => record.completed_parts.len() as f64 / f64::from(total_parts),
            None => 0.0,
        }
    }

    /// Bytes already covered by recorded parts
    pub fn completed_bytes(&self, identity: &UploadIdentity, chunk_size: u64) -> u64 {
        self.ledger
            .completed_parts(identity)
            .iter()
            .filter_map(|p| Self::part_range(p.part_number, chunk_size, identity.size))
            .map(|r| r.end - r.start)
            .sum()
    }
}
