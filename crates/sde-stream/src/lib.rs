//! SDE Streaming
//!
//! Turns incremental model output into stable, validated content.
//!
//! # Core Concepts
//!
//! - [`ContextBudgeter`]: fits prioritized [`ContextWindow`]s into a token
//!   budget (removal, smart truncation, compression)
//! - [`ChunkCoalescer`] / [`ContentAssembler`]: buffer fragments and rejoin
//!   chunks strictly by sequence number
//! - [`PartialValidator`]: lenient bracket checks while streaming, exact ones
//!   at completion
//! - [`StreamingSession`]: one session's state machine, counters and events
//! - [`SessionManager`]: session arena with heartbeat/timeout timers,
//!   cancellation and the [`TokenSource`] driver loop
//!
//! # Example
//!
//! ```rust
//! use sde_buffer::NullSink;
//! use sde_stream::{BudgetConfig, SessionManager, SessionRequest, StreamConfig, VecSource};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let manager = SessionManager::new(StreamConfig::default(), BudgetConfig::default(), Arc::new(NullSink));
//! let id = manager.create_session(SessionRequest::default()).unwrap();
//! let content = manager.drive(id, VecSource::new(["fn a() ", "{ }\n"])).await.unwrap();
//! assert_eq!(content, "fn a() { }");
//! # });
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod assembler;
pub mod budget;
mod chunk;
mod coalesce;
mod config;
mod error;
mod manager;
pub mod recovery;
mod session;
mod source;
pub mod state;
mod validator;

pub use assembler::{AssemblyUpdate, ContentAssembler};
pub use budget::{BudgetOutcome, BudgetStage, ContextBudgeter, ContextWindow, SourceType};
pub use chunk::{ChunkCategory, StreamChunk};
pub use coalesce::ChunkCoalescer;
pub use config::{BudgetConfig, StreamConfig};
pub use error::{BudgetError, SessionError, TransportError};
pub use manager::{SessionManager, SessionRequest};
pub use recovery::{ErrorContext, RecoveryDecision, RecoveryManager};
pub use session::StreamingSession;
pub use source::{Fragment, StreamSource, TokenSource, VecSource};
pub use state::{StreamState, StreamStatus};
pub use validator::{PartialValidator, ValidationOutcome};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
