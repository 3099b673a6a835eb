//! Channel-backed event sink

use sde_buffer::{EngineEvent, EventSink};
use tokio::sync::mpsc;

/// Forwards events into an unbounded tokio channel
///
/// Emission never blocks; once the receiver is gone events are dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelSink {
    /// Sink plus the receiving end of its channel
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: EngineEvent) {
        if let Err(err) = self.tx.send(event) {
            tracing::trace!(event = err.0.name(), "event receiver closed");
        }
    }
}
