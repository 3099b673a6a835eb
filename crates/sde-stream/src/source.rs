//! Token sources
//!
//! The engine pulls fragments from a [`TokenSource`] one at a time; end of
//! stream is `None`. Any producer works: a recorded transcript, an in-memory
//! list, or a `futures::Stream` from a model client.

use crate::error::TransportError;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use indexmap::IndexMap;
use std::collections::VecDeque;

/// One piece of raw model output
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fragment {
    pub text: String,
    pub metadata: IndexMap<String, serde_json::Value>,
}

impl Fragment {
    #[inline]
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl From<&str> for Fragment {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Fragment {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Pull-based producer of fragments
#[async_trait]
pub trait TokenSource: Send {
    /// Next fragment, a transport failure, or `None` at end of stream
    async fn next_fragment(&mut self) -> Option<Result<Fragment, TransportError>>;
}

/// Source replaying a fixed list of results
#[derive(Debug, Default)]
pub struct VecSource {
    items: VecDeque<Result<Fragment, TransportError>>,
}

impl VecSource {
    /// Source yielding each fragment in order
    #[must_use]
    pub fn new<I, F>(fragments: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Fragment>,
    {
        Self {
            items: fragments.into_iter().map(|f| Ok(f.into())).collect(),
        }
    }

    /// Source yielding the given results, failures included
    #[must_use]
    pub fn from_results(items: impl IntoIterator<Item = Result<Fragment, TransportError>>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    /// Items not yet pulled
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

#[async_trait]
impl TokenSource for VecSource {
    async fn next_fragment(&mut self) -> Option<Result<Fragment, TransportError>> {
        self.items.pop_front()
    }
}

/// Adapter over any `futures::Stream` of fragment results
pub struct StreamSource<S> {
    inner: S,
}

impl<S> StreamSource<S> {
    #[inline]
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> std::fmt::Debug for StreamSource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl<S> TokenSource for StreamSource<S>
where
    S: Stream<Item = Result<Fragment, TransportError>> + Unpin + Send,
{
    async fn next_fragment(&mut self) -> Option<Result<Fragment, TransportError>> {
        self.inner.next().await
    }
}
