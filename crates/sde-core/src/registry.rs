//! File state registry
//!
//! Owns the in-memory state of every file the engine edits. Callers hold
//! [`FileId`] handles; lookups return clones or a `NotFound` error.
//!
//! Mutation goes through an advisory lock: [`FileStateRegistry::lock`]
//! either hands out a [`FileLockGuard`] or fails at once with
//! [`RegistryError::Locked`]. The guard releases the lock when dropped, so
//! early returns never leave a file locked.

use crate::error::RegistryError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sde_buffer::{DiffOperation, FileId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// File record supplied by the project file provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub id: FileId,
    pub name: String,
    pub path: String,
    pub content: String,
    pub language: String,
    pub last_modified: DateTime<Utc>,
}

impl ProjectFile {
    /// Record stamped with the current time; name derived from `path`
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        path: impl Into<String>,
        language: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Self {
            id: FileId::new(id),
            name,
            path,
            content: content.into(),
            language: language.into(),
            last_modified: Utc::now(),
        }
    }
}

/// Live state of one registered file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileState {
    pub id: FileId,
    pub path: String,
    pub name: String,
    pub language: String,
    pub content: String,
    /// Content at registration
    pub original_content: String,
    /// Bumped on every commit
    pub version: u64,
    /// Content differs from `original_content`
    pub has_edits: bool,
    /// Diffs proposed but not yet approved
    pub pending_diffs: Vec<DiffOperation>,
    pub locked: bool,
    pub last_modified: DateTime<Utc>,
}

impl From<ProjectFile> for FileState {
    fn from(file: ProjectFile) -> Self {
        Self {
            id: file.id,
            path: file.path,
            name: file.name,
            language: file.language,
            original_content: file.content.clone(),
            content: file.content,
            version: 0,
            has_edits: false,
            pending_diffs: Vec::new(),
            locked: false,
            last_modified: file.last_modified,
        }
    }
}

/// Releases the advisory lock of one file on drop
#[derive(Debug)]
#[must_use = "dropping the guard releases the lock"]
pub struct FileLockGuard {
    files: Arc<DashMap<FileId, FileState>>,
    file_id: FileId,
}

impl FileLockGuard {
    /// File this guard locks
    #[inline]
    #[must_use]
    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Some(mut state) = self.files.get_mut(&self.file_id) {
            state.locked = false;
            tracing::trace!(file = %self.file_id, "file unlocked");
        }
    }
}

/// Table of file states keyed by id
#[derive(Debug, Clone, Default)]
pub struct FileStateRegistry {
    files: Arc<DashMap<FileId, FileState>>,
}

impl FileStateRegistry {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a file's state
    ///
    /// # Errors
    /// `Locked` if an existing entry is being mutated
    pub fn register(&self, file: ProjectFile) -> Result<FileState, RegistryError> {
        let state = FileState::from(file);
        if let Some(existing) = self.files.get(&state.id) {
            if existing.locked {
                return Err(RegistryError::Locked(state.id.clone()));
            }
        }
        self.files.insert(state.id.clone(), state.clone());
        tracing::debug!(file = %state.id, path = %state.path, "file registered");
        Ok(state)
    }

    /// Snapshot of a file's state
    ///
    /// # Errors
    /// `NotFound` for unknown ids
    pub fn get(&self, file_id: &FileId) -> Result<FileState, RegistryError> {
        self.files
            .get(file_id)
            .map(|state| state.clone())
            .ok_or_else(|| RegistryError::NotFound(file_id.clone()))
    }

    /// Forget a file
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `Locked` while an apply holds it
    pub fn remove(&self, file_id: &FileId) -> Result<FileState, RegistryError> {
        if self.is_locked(file_id)? {
            return Err(RegistryError::Locked(file_id.clone()));
        }
        self.files
            .remove(file_id)
            .map(|(_, state)| state)
            .ok_or_else(|| RegistryError::NotFound(file_id.clone()))
    }

    /// Whether an apply currently holds the file
    ///
    /// # Errors
    /// `NotFound` for unknown ids
    pub fn is_locked(&self, file_id: &FileId) -> Result<bool, RegistryError> {
        self.files
            .get(file_id)
            .map(|state| state.locked)
            .ok_or_else(|| RegistryError::NotFound(file_id.clone()))
    }

    /// Take the advisory lock
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `Locked` if already held (never waits)
    pub fn lock(&self, file_id: &FileId) -> Result<FileLockGuard, RegistryError> {
        let mut state = self
            .files
            .get_mut(file_id)
            .ok_or_else(|| RegistryError::NotFound(file_id.clone()))?;
        if state.locked {
            tracing::debug!(file = %file_id, "lock contention");
            return Err(RegistryError::Locked(file_id.clone()));
        }
        state.locked = true;
        drop(state);
        Ok(FileLockGuard {
            files: Arc::clone(&self.files),
            file_id: file_id.clone(),
        })
    }

    /// Replace a locked file's content, returning the new version
    ///
    /// # Errors
    /// `WrongGuard` if `guard` locks another file, `NotFound` if the file
    /// was removed
    pub fn commit(
        &self,
        file_id: &FileId,
        guard: &FileLockGuard,
        content: impl Into<String>,
    ) -> Result<u64, RegistryError> {
        if guard.file_id != *file_id {
            return Err(RegistryError::WrongGuard {
                guard: guard.file_id.clone(),
                file_id: file_id.clone(),
            });
        }
        let mut state = self
            .files
            .get_mut(file_id)
            .ok_or_else(|| RegistryError::NotFound(file_id.clone()))?;
        state.content = content.into();
        state.version += 1;
        state.has_edits = state.content != state.original_content;
        state.last_modified = Utc::now();
        tracing::debug!(file = %state.id, version = state.version, "content committed");
        Ok(state.version)
    }

    /// Queue diffs for review, returning the number now pending
    ///
    /// # Errors
    /// `NotFound` for unknown ids
    pub fn propose_diffs(
        &self,
        file_id: &FileId,
        diffs: impl IntoIterator<Item = DiffOperation>,
    ) -> Result<usize, RegistryError> {
        let mut state = self
            .files
            .get_mut(file_id)
            .ok_or_else(|| RegistryError::NotFound(file_id.clone()))?;
        state.pending_diffs.extend(diffs);
        Ok(state.pending_diffs.len())
    }

    /// Drain the pending diffs
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `NoPendingDiffs` if nothing is queued
    pub fn take_pending(&self, file_id: &FileId) -> Result<Vec<DiffOperation>, RegistryError> {
        let mut state = self
            .files
            .get_mut(file_id)
            .ok_or_else(|| RegistryError::NotFound(file_id.clone()))?;
        if state.pending_diffs.is_empty() {
            return Err(RegistryError::NoPendingDiffs(file_id.clone()));
        }
        Ok(std::mem::take(&mut state.pending_diffs))
    }

    /// Discard the pending diffs, returning how many were dropped
    ///
    /// # Errors
    /// `NotFound` for unknown ids
    pub fn clear_pending(&self, file_id: &FileId) -> Result<usize, RegistryError> {
        let mut state = self
            .files
            .get_mut(file_id)
            .ok_or_else(|| RegistryError::NotFound(file_id.clone()))?;
        let dropped = state.pending_diffs.len();
        state.pending_diffs.clear();
        Ok(dropped)
    }

    /// Registered ids, sorted
    #[must_use]
    pub fn file_ids(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self.files.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
