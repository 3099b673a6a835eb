use futures::channel::mpsc;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use sde_stream::{
    BudgetConfig, ContentAssembler, ContextBudgeter, ContextWindow, ErrorContext, Fragment, SessionError,
    SessionManager, SessionRequest, SourceType, StreamChunk, StreamConfig, StreamSource, StreamStatus,
    TransportError, VecSource,
};
use sde_test_utils::RecordingSink;
use std::sync::Arc;
use std::time::Duration;

fn manager(config: StreamConfig, sink: Arc<RecordingSink>) -> SessionManager {
    SessionManager::new(config, BudgetConfig::default(), sink)
}

fn source_type() -> impl Strategy<Value = SourceType> {
    prop_oneof![
        Just(SourceType::System),
        Just(SourceType::Task),
        Just(SourceType::User),
        Just(SourceType::Assistant),
        Just(SourceType::FileContext),
        Just(SourceType::Context),
    ]
}

proptest! {
    #[test]
    fn assembly_ignores_arrival_order(
        (texts, order) in prop::collection::vec("[a-z{}();\n ]{0,12}", 1..12)
            .prop_flat_map(|texts| {
                let order: Vec<usize> = (0..texts.len()).collect();
                (Just(texts), Just(order).prop_shuffle())
            })
    ) {
        let mut ordered = ContentAssembler::default();
        for (seq, text) in texts.iter().enumerate() {
            ordered.add_chunk(StreamChunk::new(seq as u64, text.clone(), 4));
        }
        let mut shuffled = ContentAssembler::default();
        for &seq in &order {
            shuffled.add_chunk(StreamChunk::new(seq as u64, texts[seq].clone(), 4));
        }
        prop_assert_eq!(shuffled.finalize(), ordered.finalize());
        prop_assert_eq!(shuffled.finalize(), texts.concat().trim().to_string());
    }

    #[test]
    fn budget_never_exceeds_and_keeps_critical_windows(
        specs in prop::collection::vec((source_type(), 0i32..100, 0usize..2_000), 0..10),
        max_tokens in 1usize..3_000,
    ) {
        let windows: Vec<ContextWindow> = specs
            .iter()
            .enumerate()
            .map(|(i, (source, priority, chars))| {
                ContextWindow::new(format!("w{}", i % 3), *source, *priority, "ab\n".repeat(*chars / 3 + 1), 4)
            })
            .collect();
        let critical: Vec<ContextWindow> = windows.iter().filter(|w| w.is_critical()).cloned().collect();

        match ContextBudgeter::new(BudgetConfig::default()).optimize(windows, max_tokens) {
            Ok(outcome) => {
                prop_assert!(outcome.total_tokens <= max_tokens);
                let sum: usize = outcome.windows.iter().map(|w| w.token_count).sum();
                prop_assert_eq!(sum, outcome.total_tokens);
                let kept: Vec<ContextWindow> =
                    outcome.windows.iter().filter(|w| w.is_critical()).cloned().collect();
                prop_assert_eq!(kept, critical);
            }
            Err(err) => {
                let exceeded = matches!(err, sde_stream::BudgetError::ContextWindowExceeded { .. });
                prop_assert!(exceeded);
            }
        }
    }
}

#[tokio::test]
async fn lifecycle_events_in_order() {
    let sink = Arc::new(RecordingSink::new());
    let manager = manager(StreamConfig::default(), Arc::clone(&sink));
    let id = manager
        .create_session(SessionRequest::default().with_total_chunks(2))
        .unwrap();
    manager
        .drive(id, VecSource::new(["let a = 1;\n", "let b = 2;\n"]))
        .await
        .unwrap();

    assert_eq!(
        sink.names(),
        vec![
            "streaming_session_created",
            "chunk_processed",
            "progress_update",
            "chunk_processed",
            "progress_update",
            "streaming_session_completed",
        ]
    );
    let state = manager.state(id).unwrap();
    assert!((state.progress - 100.0).abs() < f64::EPSILON);
    assert_eq!(state.is_valid, Some(true));
}

#[tokio::test]
async fn coalescing_buffers_small_fragments() {
    let sink = Arc::new(RecordingSink::new());
    let manager = manager(StreamConfig::default().with_min_chunk_size(8), Arc::clone(&sink));
    let id = manager.create_session(SessionRequest::default()).unwrap();
    let content = manager
        .drive(id, VecSource::new(["fn ", "foo", "() {}"]))
        .await
        .unwrap();
    assert_eq!(content, "fn foo() {}");
    assert_eq!(sink.count("chunk_processed"), 1);
}

#[tokio::test]
async fn over_budget_context_is_a_resource_error() {
    let manager = manager(StreamConfig::default(), Arc::new(RecordingSink::new()));
    let request = SessionRequest::new(vec![ContextWindow::new(
        "sys",
        SourceType::System,
        100,
        "x".repeat(4_000),
        4,
    )])
    .with_max_context_tokens(100);
    let err = manager.create_session(request).unwrap_err();
    assert!(err.is_resource());
    assert!(manager.is_empty());
}

#[tokio::test]
async fn context_optimized_event_reports_stages() {
    let sink = Arc::new(RecordingSink::new());
    let manager = manager(StreamConfig::default(), Arc::clone(&sink));
    let request = SessionRequest::new(vec![
        ContextWindow::new("sys", SourceType::System, 100, "s".repeat(200), 4),
        ContextWindow::new("old", SourceType::Context, 1, "c".repeat(2_000), 4),
    ])
    .with_max_context_tokens(200);
    let id = manager.create_session(request).unwrap();
    assert_eq!(
        sink.names()[..2].to_vec(),
        vec!["context_optimized", "streaming_session_created"]
    );
    assert_eq!(manager.windows(id).unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_retry_then_succeed() {
    let sink = Arc::new(RecordingSink::new());
    let manager = manager(StreamConfig::default(), Arc::clone(&sink));
    let id = manager.create_session(SessionRequest::default()).unwrap();
    let source = VecSource::from_results([
        Err(TransportError::new("connection reset after 12ms")),
        Ok(Fragment::new("ok")),
    ]);
    assert_eq!(manager.drive(id, source).await.unwrap(), "ok");
    assert_eq!(sink.count("streaming_error"), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_fails_the_session() {
    let sink = Arc::new(RecordingSink::new());
    let config = StreamConfig::default()
        .with_max_retries(2)
        .with_retry_base_delay(Duration::from_millis(100));
    let manager = manager(config, Arc::clone(&sink));
    let id = manager.create_session(SessionRequest::default()).unwrap();
    let source = VecSource::from_results((1..=3).map(|n| Err(TransportError::new(format!("reset #{n}")))));

    let err = manager.drive(id, source).await.unwrap_err();
    assert_eq!(
        err,
        SessionError::RetriesExhausted {
            context: ErrorContext::ChunkProcessing,
            attempts: 3,
            message: "reset #3".into(),
        }
    );
    assert_eq!(manager.state(id).unwrap().status, StreamStatus::Error);
    assert_eq!(sink.count("streaming_error"), 3);
}

#[tokio::test]
async fn output_ceiling_stops_the_driver() {
    let manager = manager(
        StreamConfig::default().with_max_output_tokens(1),
        Arc::new(RecordingSink::new()),
    );
    let id = manager.create_session(SessionRequest::default()).unwrap();
    let err = manager.drive(id, VecSource::new(["abcdefgh"])).await.unwrap_err();
    assert_eq!(err, SessionError::OutputLimitExceeded { used: 2, max: 1 });
    assert_eq!(manager.state(id).unwrap().status, StreamStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn hard_timeout_ends_a_stalled_session() {
    let sink = Arc::new(RecordingSink::new());
    let config = StreamConfig::default().with_timeouts(Duration::from_secs(1), Duration::from_secs(2));
    let manager = manager(config, Arc::clone(&sink));
    let id = manager.create_session(SessionRequest::default()).unwrap();

    let stalled = StreamSource::new(futures::stream::pending::<Result<Fragment, TransportError>>());
    let err = manager.drive(id, stalled).await.unwrap_err();
    assert_eq!(err, SessionError::Cancelled("hard timeout".into()));
    assert_eq!(manager.state(id).unwrap().status, StreamStatus::Error);
    assert!(sink.contains("streaming_timeout_warning"));
}

#[tokio::test(start_paused = true)]
async fn hard_timeout_settles_an_undriven_session() {
    let sink = Arc::new(RecordingSink::new());
    let config = StreamConfig::default()
        .with_heartbeat_interval(Duration::from_secs(1))
        .with_timeouts(Duration::from_secs(2), Duration::from_millis(2_500));
    let manager = manager(config, Arc::clone(&sink));
    let id = manager.create_session(SessionRequest::default()).unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(manager.state(id).unwrap().status, StreamStatus::Error);
    assert_eq!(sink.count("streaming_heartbeat"), 2);
    assert_eq!(sink.count("streaming_error"), 1);
    assert!(!manager.cancel(id, "late").unwrap());
    let err = manager.drive(id, VecSource::new(["a"])).await.unwrap_err();
    assert_eq!(err, SessionError::Cancelled("hard timeout".into()));
}

#[tokio::test(start_paused = true)]
async fn completion_overflow_is_retried_then_fails() {
    let sink = Arc::new(RecordingSink::new());
    let config = StreamConfig::default()
        .with_min_chunk_size(100)
        .with_max_output_tokens(2)
        .with_max_retries(1)
        .with_retry_base_delay(Duration::from_millis(50));
    let manager = manager(config, Arc::clone(&sink));
    let id = manager.create_session(SessionRequest::default()).unwrap();

    let err = manager.drive(id, VecSource::new(["abcdefgh", "ijkl"])).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::RetriesExhausted {
            context: ErrorContext::SessionCompletion,
            attempts: 2,
            ..
        }
    ));
    assert_eq!(manager.state(id).unwrap().status, StreamStatus::Error);

    let contexts: Vec<String> = sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            sde_buffer::EngineEvent::StreamingError { context, .. } => Some(context),
            _ => None,
        })
        .collect();
    assert_eq!(contexts, vec!["session_completion", "session_completion"]);
}

#[tokio::test(start_paused = true)]
async fn timers_stop_after_completion() {
    let sink = Arc::new(RecordingSink::new());
    let config = StreamConfig::default()
        .with_heartbeat_interval(Duration::from_secs(1))
        .with_timeouts(Duration::from_millis(1_500), Duration::from_secs(10));
    let manager = manager(config, Arc::clone(&sink));
    let id = manager.create_session(SessionRequest::default()).unwrap();

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(sink.count("streaming_heartbeat"), 2);
    assert_eq!(sink.count("streaming_timeout_warning"), 1);

    manager.complete(id).unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(sink.count("streaming_heartbeat"), 2);
    assert_eq!(sink.count("streaming_error"), 0);
}

#[tokio::test]
async fn pause_holds_fragments_until_resume() {
    let manager = Arc::new(manager(StreamConfig::default(), Arc::new(RecordingSink::new())));
    let id = manager.create_session(SessionRequest::default()).unwrap();
    let (tx, rx) = mpsc::unbounded::<Result<Fragment, TransportError>>();

    let driver = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.drive(id, StreamSource::new(rx)).await })
    };

    tx.unbounded_send(Ok(Fragment::new("a"))).unwrap();
    while manager.state(id).unwrap().processed_chunks < 1 {
        tokio::task::yield_now().await;
    }
    assert!(manager.pause(id).unwrap());
    tx.unbounded_send(Ok(Fragment::new("b"))).unwrap();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(manager.state(id).unwrap().processed_chunks, 1);
    assert_eq!(manager.state(id).unwrap().status, StreamStatus::Paused);

    assert!(manager.resume(id).unwrap());
    drop(tx);
    assert_eq!(driver.await.unwrap().unwrap(), "ab");
}

#[tokio::test]
async fn cancel_stops_a_running_driver() {
    let manager = Arc::new(manager(StreamConfig::default(), Arc::new(RecordingSink::new())));
    let id = manager.create_session(SessionRequest::default()).unwrap();
    let (tx, rx) = mpsc::unbounded::<Result<Fragment, TransportError>>();

    let driver = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.drive(id, StreamSource::new(rx)).await })
    };
    tx.unbounded_send(Ok(Fragment::new("partial"))).unwrap();
    while manager.state(id).unwrap().processed_chunks < 1 {
        tokio::task::yield_now().await;
    }
    assert!(manager.cancel(id, "user stop").unwrap());

    let err = driver.await.unwrap().unwrap_err();
    assert_eq!(err, SessionError::Cancelled("user stop".into()));
    assert_eq!(manager.state(id).unwrap().content, "partial");
    drop(tx);
}
