//! SDE Backup/Rollback Ledger
//!
//! Versioned snapshots of file content plus an append-only, hash-chained
//! record of every change made to each file.
//!
//! # Core Concepts
//!
//! - [`BackupLedger`]: bounded per-file snapshot ring; rollback returns the
//!   snapshot content and never writes the file itself
//! - [`ChangeTracker`]: per-file audit log, verifiable with
//!   [`ChangeTracker::verify_integrity`]
//!
//! # Example
//!
//! ```rust
//! use sde_buffer::FileId;
//! use sde_ledger::{BackupLedger, ChangeTracker};
//! use std::sync::Arc;
//!
//! let tracker = Arc::new(ChangeTracker::new());
//! let ledger = BackupLedger::new(10, Arc::clone(&tracker));
//! let file = FileId::new("src/main.rs");
//!
//! let backup = ledger.create_backup(&file, "A", 1);
//! let restored = ledger.rollback_to_backup(&file, backup, "B");
//! assert_eq!(restored.restored_content.as_deref(), Some("A"));
//! assert!(tracker.verify_integrity(&file).is_ok());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod backup;
mod error;
mod tracking;

pub use backup::{BackupLedger, BackupState, RollbackResult, DEFAULT_MAX_BACKUPS};
pub use error::LedgerError;
pub use tracking::{ChangeOperation, ChangeTracker, ChangeTrackingEntry};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
