//! SDE Core
//!
//! Ties the streaming and diff engines together around one explicit
//! [`EngineContext`].
//!
//! # Core Concepts
//!
//! - [`FileStateRegistry`]: per-file content, version and advisory lock
//! - [`SafeApplyPipeline`]: backup, pre-validation, conflict gate,
//!   bottom-up apply, semantic and syntax re-checks, rollback
//! - [`DiffExtractor`]: turns streamed hunk text into diff batches
//! - [`EngineContext`]: owns the registry, ledger, conflict store, session
//!   manager and event sink
//!
//! # Example
//!
//! ```rust
//! use sde_buffer::{DiffOperation, FileId, NullSink};
//! use sde_core::{EngineConfig, EngineContext, ProjectFile};
//! use std::sync::Arc;
//!
//! let engine = EngineContext::new(EngineConfig::default(), Arc::new(NullSink)).unwrap();
//! engine
//!     .register_file(ProjectFile::new("main", "src/main.rs", "rust", "fn main() {\n}\n"))
//!     .unwrap();
//!
//! let id = FileId::new("main");
//! let result = engine
//!     .apply_diffs(&id, vec![DiffOperation::insert(2, "    run();")])
//!     .unwrap();
//! assert!(result.success);
//! assert_eq!(engine.file(&id).unwrap().content, "fn main() {\n    run();\n}\n");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod config;
mod conflicts;
mod context;
mod error;
mod extract;
mod pipeline;
mod registry;
mod sink;

pub use config::{ConfigError, EngineConfig, LedgerConfig, PipelineConfig};
pub use conflicts::ConflictStore;
pub use context::EngineContext;
pub use error::{EngineError, ErrorKind, PipelineError, RegistryError};
pub use extract::{DiffExtractor, ExtractError};
pub use pipeline::{RejectedDiff, SafeApplyPipeline, SafeApplyResult, ValidationResult};
pub use registry::{FileLockGuard, FileState, FileStateRegistry, ProjectFile};
pub use sink::ChannelSink;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
