use pretty_assertions::assert_eq;
use sde_buffer::{BackupId, FileId};
use sde_conflict::{ConflictType, ResolutionAction};
use sde_core::{
    ChannelSink, EngineConfig, EngineContext, EngineError, ErrorKind, ProjectFile, RegistryError,
};
use sde_ledger::ChangeOperation;
use sde_stream::{SessionRequest, StreamStatus, VecSource};
use sde_test_utils::{diff, numbered_text, RecordingSink, SAMPLE_TS};
use std::sync::Arc;

fn engine(config: EngineConfig) -> (EngineContext, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let engine = EngineContext::new(config, sink.clone()).unwrap();
    (engine, sink)
}

fn register(engine: &EngineContext, id: &str, content: &str) -> FileId {
    engine
        .register_file(ProjectFile::new(id, format!("src/{id}.ts"), "typescript", content))
        .unwrap()
        .id
}

#[test]
fn bottom_up_apply_preserves_untouched_lines() {
    let (engine, _) = engine(EngineConfig::default());
    let id = register(&engine, "ten", &numbered_text(10));

    let result = engine
        .apply_diffs(&id, vec![diff("replace", 2, 3, "merged"), diff("delete", 7, 8, "")])
        .unwrap();
    assert!(result.success, "{:?}", result.errors);

    let content = engine.file(&id).unwrap().content;
    let survivors: Vec<&str> = content.lines().filter(|l| l.starts_with("line ")).collect();
    assert_eq!(
        survivors,
        vec!["line 1", "line 4", "line 5", "line 6", "line 9", "line 10"]
    );
    assert_eq!(content.lines().nth(1), Some("merged"));
}

#[test]
fn overlap_classification() {
    let (engine, _) = engine(EngineConfig::default());
    let id = register(&engine, "twelve", &numbered_text(12));

    let partial = engine
        .apply_diffs(&id, vec![diff("replace", 5, 10, "a"), diff("replace", 8, 12, "b")])
        .unwrap();
    assert!(!partial.success);
    assert_eq!(partial.conflicts.len(), 1);
    assert!(partial.conflicts[0].description.starts_with("partial"));

    let complete = engine
        .apply_diffs(&id, vec![diff("replace", 5, 10, "a"), diff("replace", 6, 8, "b")])
        .unwrap();
    assert!(complete.conflicts[0].description.starts_with("complete"));
    assert_eq!(complete.conflicts[0].conflict_type, ConflictType::LineOverlap);
    assert_eq!(engine.conflicts(&id).len(), 2);
    assert_eq!(engine.file(&id).unwrap().content, numbered_text(12));
}

#[test]
fn critical_conflict_never_mutates_the_file() {
    let (engine, sink) = engine(EngineConfig::default());
    let id = register(&engine, "sample", SAMPLE_TS);

    // helper is still called from run()
    let result = engine.apply_diffs(&id, vec![diff("delete", 4, 6, "")]).unwrap();

    assert!(!result.success);
    assert_eq!(result.failure_kind, Some(ErrorKind::Semantic));
    assert!(result.conflicts.iter().any(|c| c.is_critical()));
    assert_eq!(result.rejected_diffs.len(), 1);
    let state = engine.file(&id).unwrap();
    assert_eq!(state.content, SAMPLE_TS);
    assert_eq!(state.version, 0);
    assert!(!state.locked);
    assert!(!engine.conflicts(&id).is_empty());
    assert_eq!(sink.names().last(), Some(&"diffs_apply_failed"));
}

#[test]
fn semantic_recheck_rolls_back() {
    let (engine, sink) = engine(EngineConfig::default().with_reject_breaking_changes(true));
    let original = "function greet(name) {\n  return name;\n}\n";
    let id = register(&engine, "greet", original);

    let result = engine
        .apply_diffs(&id, vec![diff("replace", 1, 1, "function greet(name, title) {")])
        .unwrap();

    assert!(!result.success);
    assert!(result.rolled_back);
    assert_eq!(result.failure_kind, Some(ErrorKind::Semantic));
    assert_eq!(result.updated_content, original);
    let validation = result.validation_result.unwrap();
    assert!(!validation.semantic.is_valid);
    assert!(validation.syntax_valid);
    assert_eq!(engine.file(&id).unwrap().content, original);
    assert!(sink.contains("rollback_completed"));

    let ops: Vec<ChangeOperation> = engine.history(&id).iter().map(|e| e.operation).collect();
    assert_eq!(
        ops,
        vec![ChangeOperation::Register, ChangeOperation::ApplyDiffs, ChangeOperation::Rollback]
    );
}

#[test]
fn rollback_round_trip() {
    let (engine, _) = engine(EngineConfig::default());
    let id = register(&engine, "f", "A\n");

    let result = engine.apply_diffs(&id, vec![diff("replace", 1, 1, "B")]).unwrap();
    assert!(result.success);
    assert_eq!(engine.file(&id).unwrap().content, "B\n");

    let backup_id = result.backup_id.unwrap();
    let rollback = engine.rollback(&id, backup_id).unwrap();
    assert!(rollback.success);
    assert_eq!(rollback.restored_content.as_deref(), Some("A\n"));

    let state = engine.file(&id).unwrap();
    assert_eq!(state.content, "A\n");
    assert_eq!(state.version, 2);
    assert!(!state.has_edits);
}

#[test]
fn unknown_backup_is_not_fatal() {
    let (engine, sink) = engine(EngineConfig::default());
    let id = register(&engine, "f", "A\n");

    let rollback = engine.rollback(&id, BackupId::new()).unwrap();
    assert!(!rollback.success);
    assert_eq!(rollback.errors.len(), 1);
    assert_eq!(engine.file(&id).unwrap().content, "A\n");
    assert!(sink.contains("rollback_completed"));

    let missing = engine.rollback(&FileId::new("nope"), BackupId::new()).unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::State);
}

#[test]
fn locked_file_fails_immediately() {
    let (engine, _) = engine(EngineConfig::default());
    let id = register(&engine, "f", "A\n");

    let guard = engine.registry().lock(&id).unwrap();
    let err = engine.apply_diffs(&id, vec![diff("insert", 1, 1, "x")]).unwrap_err();
    assert!(matches!(err, EngineError::Registry(RegistryError::Locked(_))));
    assert!(!err.is_retryable());
    drop(guard);

    assert!(engine.apply_diffs(&id, vec![diff("insert", 1, 1, "x")]).unwrap().success);
}

#[test]
fn audit_chain_verifies() {
    let (engine, _) = engine(EngineConfig::default());
    let id = register(&engine, "f", &numbered_text(4));
    engine.apply_diffs(&id, vec![diff("modify", 1, 1, "first")]).unwrap();
    engine.apply_diffs(&id, vec![diff("delete", 9, 9, "")]).unwrap();
    let applied = engine.apply_diffs(&id, vec![diff("insert", 5, 5, "last")]).unwrap();
    engine.rollback(&id, applied.backup_id.unwrap()).unwrap();

    assert!(engine.history(&id).len() >= 4);
    engine.verify_audit(&id).unwrap();
}

#[test]
fn resolve_conflict_by_merging() {
    let (engine, _) = engine(EngineConfig::default());
    let id = register(&engine, "twelve", &numbered_text(12));

    let failed = engine
        .apply_diffs(&id, vec![diff("replace", 5, 10, "a"), diff("replace", 6, 8, "b")])
        .unwrap();
    let conflict_id = failed.conflicts[0].id;

    assert!(matches!(
        engine.resolve_conflict(&id, conflict_id, ResolutionAction::Manual),
        Err(EngineError::ManualResolutionRequired(_))
    ));
    let merged = engine
        .resolve_conflict(&id, conflict_id, ResolutionAction::Merge)
        .unwrap();
    assert_eq!(merged.len(), 1);
    assert!(engine.conflicts(&id).is_empty());

    let result = engine.apply_diffs(&id, merged).unwrap();
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(engine.file(&id).unwrap().content.lines().count(), 8);

    assert!(matches!(
        engine.resolve_conflict(&id, conflict_id, ResolutionAction::AcceptCurrent),
        Err(EngineError::ConflictNotFound { .. })
    ));
}

#[tokio::test]
async fn streamed_hunks_apply_to_a_file() {
    let (sink, mut events) = ChannelSink::new();
    let engine = EngineContext::new(EngineConfig::default(), Arc::new(sink)).unwrap();
    let id = register(&engine, "ten", &numbered_text(10));

    let source = VecSource::new(["@@ replace 2-3 @@\nmer", "ged\n@@ delete 7", "-8 @@\n"]);
    let result = engine
        .stream_to_file(SessionRequest::default(), source, &id)
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.applied_diffs.len(), 2);
    assert_eq!(engine.file(&id).unwrap().content.lines().count(), 7);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(names.first(), Some(&"streaming_session_created"));
    assert!(names.contains(&"streaming_session_completed"));
    assert_eq!(names.last(), Some(&"diffs_safely_applied"));
}

#[tokio::test]
async fn session_output_requires_completion() {
    let (engine, _) = engine(EngineConfig::default());
    let id = register(&engine, "f", "A\n");
    let session = engine.sessions().create_session(SessionRequest::default()).unwrap();
    engine.sessions().process_stream_chunk(session, "B", Default::default()).unwrap();

    let err = engine.apply_session_output(session, &id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(engine.sessions().state(session).unwrap().status, StreamStatus::Streaming);

    engine.sessions().complete(session).unwrap();
    let result = engine.apply_session_output(session, &id).unwrap();
    assert!(result.success);
    assert_eq!(engine.file(&id).unwrap().content, "B\n");
}

#[test]
fn config_loads_from_toml() {
    let config = EngineConfig::from_toml_str("[ledger]\nmax_backups_per_file = 2\n").unwrap();
    let (engine, _) = engine(config);
    let id = register(&engine, "f", "0\n");
    for n in 1..=4 {
        engine.apply_diffs(&id, vec![diff("replace", 1, 1, &n.to_string())]).unwrap();
    }
    assert_eq!(engine.backups(&id).len(), 2);

    let invalid = EngineConfig::default().with_max_backups(0);
    assert!(matches!(
        EngineContext::new(invalid, Arc::new(RecordingSink::new())),
        Err(EngineError::Config(_))
    ));
}
