//! Backup ring and rollback
//!
//! Snapshots are full copies of a file's content. Each file keeps at most
//! `max_per_file` of them; the oldest is evicted first. Rolling back only
//! returns the snapshot content, the caller writes it to the file registry.

use crate::error::LedgerError;
use crate::tracking::{ChangeOperation, ChangeTracker, ChangeTrackingEntry};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sde_buffer::{BackupId, ContentHash, FileId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Default ring size per file
pub const DEFAULT_MAX_BACKUPS: usize = 10;

/// Snapshot of one file's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupState {
    pub id: BackupId,
    pub file_id: FileId,
    pub timestamp: DateTime<Utc>,
    /// Full content at capture time
    pub content: String,
    /// File version at capture time
    pub version: u64,
    /// Content size in bytes
    pub size: usize,
    pub line_count: usize,
    pub hash: ContentHash,
}

impl BackupState {
    fn capture(file_id: FileId, content: &str, version: u64) -> Self {
        Self {
            id: BackupId::new(),
            file_id,
            timestamp: Utc::now(),
            content: content.to_string(),
            version,
            size: content.len(),
            line_count: content.lines().count(),
            hash: ContentHash::of_text(content),
        }
    }
}

/// Outcome of a rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    /// Snapshot content on success
    pub restored_content: Option<String>,
    pub errors: Vec<String>,
    /// Backup restored, or requested
    pub backup_id: Option<BackupId>,
}

impl RollbackResult {
    fn failed(backup_id: Option<BackupId>, error: &LedgerError) -> Self {
        Self {
            success: false,
            restored_content: None,
            errors: vec![error.to_string()],
            backup_id,
        }
    }
}

/// Per-file bounded backup store
#[derive(Debug)]
pub struct BackupLedger {
    backups: DashMap<FileId, VecDeque<BackupState>>,
    max_per_file: usize,
    tracker: Arc<ChangeTracker>,
}

impl BackupLedger {
    /// Create ledger recording rollbacks into `tracker`
    #[must_use]
    pub fn new(max_per_file: usize, tracker: Arc<ChangeTracker>) -> Self {
        Self {
            backups: DashMap::new(),
            max_per_file: max_per_file.max(1),
            tracker,
        }
    }

    /// Ring size per file
    #[inline]
    #[must_use]
    pub fn max_per_file(&self) -> usize {
        self.max_per_file
    }

    /// Audit log this ledger writes to
    #[inline]
    #[must_use]
    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    /// Store a snapshot, evicting the oldest beyond the ring size
    pub fn create_backup(&self, file_id: &FileId, content: &str, version: u64) -> BackupId {
        let backup = BackupState::capture(file_id.clone(), content, version);
        let id = backup.id;
        let mut ring = self.backups.entry(file_id.clone()).or_default();
        ring.push_back(backup);
        while ring.len() > self.max_per_file {
            if let Some(evicted) = ring.pop_front() {
                tracing::debug!(file = %file_id, backup = %evicted.id, "backup evicted");
            }
        }
        tracing::info!(file = %file_id, backup = %id, version, "backup created");
        id
    }

    /// Look up a snapshot
    #[must_use]
    pub fn backup(&self, file_id: &FileId, backup_id: BackupId) -> Option<BackupState> {
        self.backups
            .get(file_id)
            .and_then(|ring| ring.iter().find(|b| b.id == backup_id).cloned())
    }

    /// Most recent snapshot of a file
    #[must_use]
    pub fn latest_backup(&self, file_id: &FileId) -> Option<BackupState> {
        self.backups
            .get(file_id)
            .and_then(|ring| ring.back().cloned())
    }

    /// All snapshots of a file, oldest first
    #[must_use]
    pub fn backups(&self, file_id: &FileId) -> Vec<BackupState> {
        self.backups
            .get(file_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every snapshot of a file
    pub fn clear(&self, file_id: &FileId) {
        self.backups.remove(file_id);
    }

    /// Restore a snapshot's content
    ///
    /// `current_content` is only recorded in the audit entry. Unknown files
    /// and backups produce `success: false` with a descriptive error.
    pub fn rollback_to_backup(
        &self,
        file_id: &FileId,
        backup_id: BackupId,
        current_content: &str,
    ) -> RollbackResult {
        self.restore(file_id, Some(backup_id), current_content, ChangeOperation::Rollback)
    }

    /// Restore the most recent snapshot after an unexpected failure
    pub fn emergency_rollback(&self, file_id: &FileId, current_content: &str) -> RollbackResult {
        self.restore(file_id, None, current_content, ChangeOperation::EmergencyRollback)
    }

    fn restore(
        &self,
        file_id: &FileId,
        backup_id: Option<BackupId>,
        current_content: &str,
        operation: ChangeOperation,
    ) -> RollbackResult {
        let found = match backup_id {
            Some(id) => self.backup(file_id, id).ok_or(LedgerError::BackupNotFound {
                file_id: file_id.clone(),
                backup_id: id,
            }),
            None => self
                .latest_backup(file_id)
                .ok_or_else(|| LedgerError::NoBackups(file_id.clone())),
        };

        let result = match found {
            Ok(backup) => {
                tracing::info!(file = %file_id, backup = %backup.id, %operation, "rolled back");
                RollbackResult {
                    success: true,
                    restored_content: Some(backup.content),
                    errors: Vec::new(),
                    backup_id: Some(backup.id),
                }
            }
            Err(error) => {
                tracing::warn!(file = %file_id, %error, "rollback failed");
                RollbackResult::failed(backup_id, &error)
            }
        };

        self.tracker.record(
            ChangeTrackingEntry::new(file_id.clone(), operation)
                .with_contents(
                    current_content,
                    result.restored_content.as_deref().unwrap_or(current_content),
                )
                .with_success(result.success)
                .with_backup(result.backup_id),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(max: usize) -> BackupLedger {
        BackupLedger::new(max, Arc::new(ChangeTracker::new()))
    }

    #[test]
    fn rollback_round_trip() {
        let ledger = ledger(DEFAULT_MAX_BACKUPS);
        let file = FileId::new("f");
        let id = ledger.create_backup(&file, "A", 1);
        let result = ledger.rollback_to_backup(&file, id, "B");
        assert!(result.success);
        assert_eq!(result.restored_content.as_deref(), Some("A"));
        assert_eq!(result.backup_id, Some(id));

        let entry = ledger.tracker().latest(&file).unwrap();
        assert_eq!(entry.operation, ChangeOperation::Rollback);
        assert_eq!(entry.before, "B");
        assert_eq!(entry.after, "A");
    }

    #[test]
    fn ring_evicts_oldest() {
        let ledger = ledger(3);
        let file = FileId::new("f");
        let ids: Vec<BackupId> = (0..5)
            .map(|v| ledger.create_backup(&file, &format!("v{v}"), v))
            .collect();
        let kept: Vec<u64> = ledger.backups(&file).iter().map(|b| b.version).collect();
        assert_eq!(kept, vec![2, 3, 4]);
        assert!(ledger.backup(&file, ids[0]).is_none());
        assert_eq!(ledger.latest_backup(&file).unwrap().id, ids[4]);
    }

    #[test]
    fn unknown_backup_is_non_fatal() {
        let ledger = ledger(3);
        let file = FileId::new("f");
        let missing = BackupId::new();

        let result = ledger.rollback_to_backup(&file, missing, "cur");
        assert!(!result.success);
        assert!(result.errors[0].contains("not found"));

        ledger.create_backup(&file, "A", 1);
        let result = ledger.rollback_to_backup(&file, missing, "cur");
        assert!(!result.success);
        assert_eq!(result.restored_content, None);

        let entries = ledger.tracker().entries(&file);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| !e.success));
    }

    #[test]
    fn emergency_rollback_uses_latest() {
        let ledger = ledger(3);
        let file = FileId::new("f");
        assert!(!ledger.emergency_rollback(&file, "x").success);
        ledger.create_backup(&file, "old", 1);
        ledger.create_backup(&file, "newer", 2);
        let result = ledger.emergency_rollback(&file, "broken");
        assert_eq!(result.restored_content.as_deref(), Some("newer"));
        assert_eq!(
            ledger.tracker().latest(&file).unwrap().operation,
            ChangeOperation::EmergencyRollback
        );
    }

    #[test]
    fn snapshot_metadata() {
        let ledger = ledger(3);
        let file = FileId::new("f");
        let id = ledger.create_backup(&file, "a\nb\n", 7);
        let backup = ledger.backup(&file, id).unwrap();
        assert_eq!(backup.size, 4);
        assert_eq!(backup.line_count, 2);
        assert_eq!(backup.hash, ContentHash::of_text("a\nb\n"));
        ledger.clear(&file);
        assert!(ledger.backups(&file).is_empty());
    }
}
