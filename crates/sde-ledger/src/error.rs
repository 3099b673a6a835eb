//! Ledger errors

use sde_buffer::{BackupId, FileId};

/// Errors from the backup ledger and change tracker
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// File has no backups at all
    #[error("no backups recorded for file {0}")]
    NoBackups(FileId),

    /// Backup id unknown for this file (never taken or already evicted)
    #[error("backup {backup_id} not found for file {file_id}")]
    BackupNotFound { file_id: FileId, backup_id: BackupId },

    /// Audit chain does not verify
    #[error("change log for {file_id} fails integrity check at entry {index}")]
    IntegrityViolation { file_id: FileId, index: usize },
}
