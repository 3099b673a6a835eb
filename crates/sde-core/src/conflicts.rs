//! Conflicts awaiting resolution, per file

use dashmap::DashMap;
use sde_buffer::{ConflictId, FileId};
use sde_conflict::Conflict;

/// Conflicts found by the pipeline, kept until resolved or superseded
#[derive(Debug, Default)]
pub struct ConflictStore {
    conflicts: DashMap<FileId, Vec<Conflict>>,
}

impl ConflictStore {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add conflicts for a file
    pub fn extend(&self, file_id: &FileId, conflicts: impl IntoIterator<Item = Conflict>) {
        let mut stored = self.conflicts.entry(file_id.clone()).or_default();
        stored.extend(conflicts);
        tracing::debug!(file = %file_id, stored = stored.len(), "conflicts stored");
    }

    /// Open conflicts of a file, in detection order
    #[must_use]
    pub fn get(&self, file_id: &FileId) -> Vec<Conflict> {
        self.conflicts
            .get(file_id)
            .map(|stored| stored.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn find(&self, file_id: &FileId, conflict_id: ConflictId) -> Option<Conflict> {
        self.conflicts
            .get(file_id)
            .and_then(|stored| stored.iter().find(|c| c.id == conflict_id).cloned())
    }

    /// Remove one conflict, returning it
    pub fn remove(&self, file_id: &FileId, conflict_id: ConflictId) -> Option<Conflict> {
        let mut stored = self.conflicts.get_mut(file_id)?;
        let position = stored.iter().position(|c| c.id == conflict_id)?;
        Some(stored.remove(position))
    }

    /// Drop every conflict of a file, returning how many there were
    pub fn clear(&self, file_id: &FileId) -> usize {
        self.conflicts
            .remove(file_id)
            .map_or(0, |(_, stored)| stored.len())
    }

    /// Open conflicts across all files
    #[must_use]
    pub fn total(&self) -> usize {
        self.conflicts.iter().map(|entry| entry.len()).sum()
    }
}
