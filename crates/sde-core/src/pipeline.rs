//! Safe apply pipeline
//!
//! Applies one diff batch to one file's content in ordered stages:
//!
//! 1. Backup (if enabled)
//! 2. Range and overlap pre-validation
//! 3. Conflict detection; critical conflicts abort
//! 4. Bottom-up apply, audited whatever the outcome
//! 5. Semantic impact re-check
//! 6. Syntax re-check
//! 7. Success: clear tracked conflicts
//!
//! Stages 2 and 3 abort before any mutation. Stages 4 to 6 roll back
//! through the ledger. Stage failures end up in [`SafeApplyResult`]; the
//! pipeline never returns an error. The registry is not touched here, the
//! caller commits `updated_content`.

use crate::config::PipelineConfig;
use crate::conflicts::ConflictStore;
use crate::error::{ErrorKind, PipelineError};
use crate::registry::FileState;
use sde_buffer::{balance, BackupId, DiffOperation, EngineEvent, EventSink, FileId, TextBuffer};
use sde_conflict::{Conflict, ConflictDetector, ConflictType, DangerWarning, SemanticAnalyzer, SemanticImpact};
use sde_ledger::{BackupLedger, ChangeOperation, ChangeTrackingEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Combined post-apply checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// `semantic.is_valid && syntax_valid`
    pub is_valid: bool,
    pub semantic: SemanticImpact,
    pub syntax_valid: bool,
    pub syntax_error: Option<String>,
}

/// A diff left out of the result, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedDiff {
    /// Position in the submitted batch
    pub index: usize,
    pub diff: DiffOperation,
    pub reason: String,
}

/// What one pipeline run did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeApplyResult {
    pub success: bool,
    /// New content on success, otherwise the content the file should keep
    pub updated_content: String,
    pub applied_diffs: Vec<DiffOperation>,
    pub rejected_diffs: Vec<RejectedDiff>,
    /// Present once the apply stage ran
    pub validation_result: Option<ValidationResult>,
    pub backup_id: Option<BackupId>,
    pub conflicts: Vec<Conflict>,
    pub warnings: Vec<DangerWarning>,
    pub errors: Vec<String>,
    /// Content was restored from `backup_id`
    pub rolled_back: bool,
    /// Category of the failure, if any
    pub failure_kind: Option<ErrorKind>,
}

impl SafeApplyResult {
    fn started(current_content: &str) -> Self {
        Self {
            success: false,
            updated_content: current_content.to_string(),
            applied_diffs: Vec::new(),
            rejected_diffs: Vec::new(),
            validation_result: None,
            backup_id: None,
            conflicts: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            rolled_back: false,
            failure_kind: None,
        }
    }

    fn fail(&mut self, kind: ErrorKind, error: impl Into<String>) {
        self.failure_kind.get_or_insert(kind);
        self.errors.push(error.into());
    }

    fn reject(&mut self, diffs: &[DiffOperation], reasons: BTreeMap<usize, String>) {
        self.rejected_diffs.extend(reasons.into_iter().map(|(index, reason)| RejectedDiff {
            index,
            diff: diffs[index].clone(),
            reason,
        }));
    }
}

/// Staged, rollback-safe diff application
#[derive(Debug)]
pub struct SafeApplyPipeline {
    config: PipelineConfig,
    detector: ConflictDetector,
    analyzer: SemanticAnalyzer,
    ledger: Arc<BackupLedger>,
    conflicts: Arc<ConflictStore>,
    sink: Arc<dyn EventSink>,
}

impl SafeApplyPipeline {
    /// Pipeline with the built-in conflict passes
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        ledger: Arc<BackupLedger>,
        conflicts: Arc<ConflictStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let analyzer = SemanticAnalyzer::new().strict(config.reject_breaking_changes);
        Self {
            config,
            detector: ConflictDetector::with_defaults(),
            analyzer,
            ledger,
            conflicts,
            sink,
        }
    }

    /// Replace the conflict detector
    #[inline]
    #[must_use]
    pub fn with_detector(mut self, detector: ConflictDetector) -> Self {
        self.detector = detector;
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &Arc<BackupLedger> {
        &self.ledger
    }

    #[inline]
    #[must_use]
    pub fn conflicts(&self) -> &Arc<ConflictStore> {
        &self.conflicts
    }

    /// Run every stage over `diffs`
    ///
    /// `file_state` must describe `file_id`; its version is recorded with
    /// the backup.
    pub fn safely_apply_diffs(
        &self,
        file_id: &FileId,
        current_content: &str,
        diffs: &[DiffOperation],
        file_state: &FileState,
    ) -> SafeApplyResult {
        let mut result = SafeApplyResult::started(current_content);
        let span = tracing::info_span!("safe_apply", file = %file_id, diffs = diffs.len());
        let _enter = span.enter();

        if file_state.id != *file_id {
            result.fail(
                ErrorKind::State,
                format!("file state {} does not describe {file_id}", file_state.id),
            );
        } else if diffs.is_empty() {
            result.success = true;
        } else if let Err(err) = self.run(file_id, current_content, diffs, file_state, &mut result) {
            tracing::error!(%err, "pipeline failed, emergency rollback");
            result.success = false;
            result.fail(ErrorKind::State, err.to_string());
            if result.backup_id.is_some() {
                self.emergency_rollback(file_id, current_content, &mut result);
            }
        }

        if result.success {
            tracing::info!(applied = result.applied_diffs.len(), "diffs applied");
            self.sink.emit(EngineEvent::DiffsSafelyApplied {
                file_id: file_id.clone(),
                applied: result.applied_diffs.len(),
                backup_id: result.backup_id,
            });
        } else {
            tracing::warn!(
                errors = result.errors.len(),
                rolled_back = result.rolled_back,
                kind = ?result.failure_kind,
                "diffs rejected"
            );
            self.sink.emit(EngineEvent::DiffsApplyFailed {
                file_id: file_id.clone(),
                errors: result.errors.clone(),
                rolled_back: result.rolled_back,
            });
        }
        result
    }

    fn run(
        &self,
        file_id: &FileId,
        current_content: &str,
        diffs: &[DiffOperation],
        file_state: &FileState,
        result: &mut SafeApplyResult,
    ) -> Result<(), PipelineError> {
        // 1. backup
        if self.config.enable_backups {
            let backup_id = self.ledger.create_backup(file_id, current_content, file_state.version);
            result.backup_id = Some(backup_id);
            self.sink.emit(EngineEvent::BackupCreated {
                file_id: file_id.clone(),
                backup_id,
                version: file_state.version,
            });
        }
        let buffer = TextBuffer::from_text(current_content).with_version(file_state.version);

        // 2. pre-validation
        let ranges = self.detector.validate_ranges(&buffer, diffs);
        if !ranges.is_valid() {
            let mut reasons = BTreeMap::new();
            for violation in &ranges.errors {
                reasons.insert(violation.index, violation.error.to_string());
            }
            for overlap in ranges.conflicting() {
                reasons
                    .entry(overlap.second)
                    .or_insert_with(|| format!("overlaps diff {} on lines {}", overlap.first, overlap.lines));
            }
            for message in ranges.messages() {
                result.fail(ErrorKind::Structural, message);
            }
            result.reject(diffs, reasons);
            let conflicts = ranges.to_conflicts(file_id, diffs);
            self.track_conflicts(file_id, &conflicts);
            result.conflicts = conflicts;
            return Ok(());
        }

        // 3. conflict detection
        let report = self.detector.detect(file_id, &buffer, diffs);
        if !report.conflicts.is_empty() {
            self.sink.emit(EngineEvent::ConflictsDetected {
                file_id: file_id.clone(),
                count: report.conflicts.len(),
                critical: report.critical_count(),
            });
        }
        if report.has_critical() {
            let mut reasons = BTreeMap::new();
            for conflict in report.conflicts.iter().filter(|c| c.is_critical()) {
                result.fail(failure_kind(conflict), format!("{}: {}", conflict.conflict_type, conflict.description));
                for &index in &conflict.diff_indices {
                    reasons.entry(index).or_insert_with(|| conflict.description.clone());
                }
            }
            for warning in report.blocking_warnings() {
                result.fail(ErrorKind::Structural, format!("dangerous operation: {}", warning.message));
            }
            result.reject(diffs, reasons);
            self.conflicts.extend(file_id, report.conflicts.iter().cloned());
            result.conflicts = report.conflicts;
            result.warnings = report.warnings;
            return Ok(());
        }
        result.conflicts = report.conflicts;
        result.warnings = report.warnings;

        // 4. apply bottom-up
        let mut scratch = buffer;
        let outcomes = scratch.apply_bottom_up(diffs);
        let after = scratch.text();
        let mut reasons = BTreeMap::new();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(()) => result.applied_diffs.push(diffs[index].clone()),
                Err(err) => {
                    result.fail(ErrorKind::Structural, format!("diff {index} ({}): {err}", diffs[index].label()));
                    reasons.insert(index, err.to_string());
                }
            }
        }
        let all_applied = reasons.is_empty();
        self.ledger.tracker().record(
            ChangeTrackingEntry::new(file_id.clone(), ChangeOperation::ApplyDiffs)
                .with_contents(current_content, after.as_str())
                .with_success(all_applied)
                .with_diffs(result.applied_diffs.clone())
                .with_backup(result.backup_id),
        );
        if !all_applied {
            result.reject(diffs, reasons);
            return self.roll_back(file_id, &after, result);
        }

        // 5 + 6. post-apply checks
        let semantic = self.analyzer.impact(current_content, &after);
        let syntax_error = if balance::scan(current_content).is_balanced() {
            balance::scan(&after).describe()
        } else {
            // already unbalanced input cannot be judged by balance
            None
        };
        let syntax_valid = syntax_error.is_none();
        let semantic_valid = semantic.is_valid;
        for name in &semantic.dangling_references {
            result.fail(ErrorKind::Semantic, format!("removed export `{name}` is still referenced"));
        }
        if !semantic_valid && semantic.dangling_references.is_empty() {
            for change in &semantic.breaking_changes {
                result.fail(ErrorKind::Semantic, format!("breaking change: {}", change.detail));
            }
        }
        if let Some(error) = &syntax_error {
            result.fail(ErrorKind::Structural, format!("syntax check failed: {error}"));
        }
        result.validation_result = Some(ValidationResult {
            is_valid: semantic_valid && syntax_valid,
            semantic,
            syntax_valid,
            syntax_error,
        });
        if !(semantic_valid && syntax_valid) {
            return self.roll_back(file_id, &after, result);
        }

        // 7. success
        let cleared = self.conflicts.clear(file_id);
        if cleared > 0 {
            tracing::debug!(cleared, "tracked conflicts cleared");
        }
        result.updated_content = after;
        result.success = true;
        Ok(())
    }

    fn track_conflicts(&self, file_id: &FileId, conflicts: &[Conflict]) {
        if conflicts.is_empty() {
            return;
        }
        self.sink.emit(EngineEvent::ConflictsDetected {
            file_id: file_id.clone(),
            count: conflicts.len(),
            critical: conflicts.iter().filter(|c| c.is_critical()).count(),
        });
        self.conflicts.extend(file_id, conflicts.iter().cloned());
    }

    /// Restore this run's backup; without one the original content stands
    fn roll_back(
        &self,
        file_id: &FileId,
        mutated: &str,
        result: &mut SafeApplyResult,
    ) -> Result<(), PipelineError> {
        result.applied_diffs.clear();
        let Some(backup_id) = result.backup_id else {
            return Ok(());
        };
        let rollback = self.ledger.rollback_to_backup(file_id, backup_id, mutated);
        if !rollback.success {
            return Err(PipelineError::RollbackFailed {
                backup_id,
                errors: rollback.errors,
            });
        }
        if let Some(restored) = rollback.restored_content {
            result.updated_content = restored;
        }
        result.rolled_back = true;
        self.sink.emit(EngineEvent::RollbackCompleted {
            file_id: file_id.clone(),
            backup_id,
            success: true,
        });
        Ok(())
    }

    fn emergency_rollback(&self, file_id: &FileId, current_content: &str, result: &mut SafeApplyResult) {
        let rollback = self.ledger.emergency_rollback(file_id, current_content);
        if let (true, Some(backup_id)) = (rollback.success, rollback.backup_id) {
            if let Some(restored) = rollback.restored_content {
                result.updated_content = restored;
            }
            result.rolled_back = true;
            self.sink.emit(EngineEvent::RollbackCompleted {
                file_id: file_id.clone(),
                backup_id,
                success: true,
            });
        } else {
            result.errors.extend(rollback.errors);
        }
    }
}

fn failure_kind(conflict: &Conflict) -> ErrorKind {
    match conflict.conflict_type {
        ConflictType::SemanticConflict => ErrorKind::Semantic,
        ConflictType::LineOverlap | ConflictType::DependencyConflict | ConflictType::SyntaxConflict => {
            ErrorKind::Structural
        }
    }
}
