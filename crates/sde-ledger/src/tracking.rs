//! Append-only change log per file
//!
//! Every entry carries the SHA-256 of its predecessor, so editing or
//! dropping an entry breaks [`ChangeTracker::verify_integrity`].

use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sde_buffer::{BackupId, ChangeId, DiffOperation, FileId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// What a tracked change did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    /// Diff batch run through the pipeline
    ApplyDiffs,
    /// Restored from a backup on request or after a failed stage
    Rollback,
    /// Restored from the latest backup after an unexpected failure
    EmergencyRollback,
    /// File registered
    Register,
    /// Content committed outside the pipeline
    Commit,
}

impl ChangeOperation {
    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApplyDiffs => "apply_diffs",
            Self::Rollback => "rollback",
            Self::EmergencyRollback => "emergency_rollback",
            Self::Register => "register",
            Self::Commit => "commit",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeTrackingEntry {
    pub id: ChangeId,
    pub file_id: FileId,
    pub timestamp: DateTime<Utc>,
    pub operation: ChangeOperation,
    /// Content before the change
    pub before: String,
    /// Content after the change
    pub after: String,
    pub success: bool,
    pub diffs_applied: Vec<DiffOperation>,
    pub backup_id: Option<BackupId>,
    /// Hash of the previous entry for this file (zeros for the first)
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
}

impl ChangeTrackingEntry {
    /// Start an entry; the tracker fills in the chain fields on record
    #[must_use]
    pub fn new(file_id: FileId, operation: ChangeOperation) -> Self {
        Self {
            id: ChangeId::new(),
            file_id,
            timestamp: Utc::now(),
            operation,
            before: String::new(),
            after: String::new(),
            success: true,
            diffs_applied: Vec::new(),
            backup_id: None,
            prev_hash: [0; 32],
            hash: [0; 32],
        }
    }

    #[must_use]
    pub fn with_contents(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.before = before.into();
        self.after = after.into();
        self
    }

    #[must_use]
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    #[must_use]
    pub fn with_diffs(mut self, diffs: Vec<DiffOperation>) -> Self {
        self.diffs_applied = diffs;
        self
    }

    #[must_use]
    pub fn with_backup(mut self, backup_id: Option<BackupId>) -> Self {
        self.backup_id = backup_id;
        self
    }

    fn compute_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.id.0.to_bytes());
        hasher.update(self.file_id.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.timestamp.timestamp_micros().to_le_bytes());
        hasher.update(self.operation.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.before.as_bytes());
        hasher.update([0]);
        hasher.update(self.after.as_bytes());
        hasher.update([0, u8::from(self.success)]);
        for diff in &self.diffs_applied {
            hasher.update(diff.label().as_bytes());
            hasher.update([0]);
            hasher.update(diff.content.as_bytes());
            hasher.update([0]);
        }
        if let Some(backup_id) = self.backup_id {
            hasher.update(backup_id.0.to_bytes());
        }
        hasher.update(self.prev_hash);
        hasher.finalize().into()
    }
}

/// Per-file hash-chained audit log
#[derive(Debug, Default)]
pub struct ChangeTracker {
    logs: DashMap<FileId, Vec<ChangeTrackingEntry>>,
}

impl ChangeTracker {
    /// Create empty tracker
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, chaining it to the file's previous one
    pub fn record(&self, mut entry: ChangeTrackingEntry) -> ChangeId {
        let mut log = self.logs.entry(entry.file_id.clone()).or_default();
        entry.prev_hash = log.last().map_or([0; 32], |e| e.hash);
        entry.hash = entry.compute_hash();
        let id = entry.id;
        tracing::debug!(
            file = %entry.file_id,
            operation = %entry.operation,
            success = entry.success,
            "change recorded"
        );
        log.push(entry);
        id
    }

    /// All entries for a file, oldest first
    #[must_use]
    pub fn entries(&self, file_id: &FileId) -> Vec<ChangeTrackingEntry> {
        self.logs
            .get(file_id)
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Most recent entry for a file
    #[must_use]
    pub fn latest(&self, file_id: &FileId) -> Option<ChangeTrackingEntry> {
        self.logs.get(file_id).and_then(|log| log.last().cloned())
    }

    /// Number of entries for a file
    #[must_use]
    pub fn len(&self, file_id: &FileId) -> usize {
        self.logs.get(file_id).map_or(0, |log| log.len())
    }

    /// Whether a file has no entries
    #[must_use]
    pub fn is_empty(&self, file_id: &FileId) -> bool {
        self.len(file_id) == 0
    }

    /// Check the hash chain of a file's log
    ///
    /// # Errors
    /// `IntegrityViolation` naming the first entry that does not verify
    pub fn verify_integrity(&self, file_id: &FileId) -> Result<(), LedgerError> {
        let Some(log) = self.logs.get(file_id) else {
            return Ok(());
        };
        let mut prev = [0u8; 32];
        for (index, entry) in log.iter().enumerate() {
            if entry.prev_hash != prev || entry.hash != entry.compute_hash() {
                return Err(LedgerError::IntegrityViolation {
                    file_id: file_id.clone(),
                    index,
                });
            }
            prev = entry.hash;
        }
        Ok(())
    }

    /// Drop a file's log
    pub fn clear(&self, file_id: &FileId) {
        self.logs.remove(file_id);
    }

    #[cfg(test)]
    pub(crate) fn tamper(&self, file_id: &FileId, index: usize, after: &str) {
        if let Some(mut log) = self.logs.get_mut(file_id) {
            log[index].after = after.to_string();
        }
    }
}
