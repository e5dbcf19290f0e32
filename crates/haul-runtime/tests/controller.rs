//! Controller lifecycle scenarios driven through the service with paused time.

use std::sync::Arc;
use std::time::Duration;

use haul_config::ControllerPolicy;
use haul_core::{
    BackendAdapter, BackendKind, DEADLINE_MESSAGE, FailureReason, NativeState, Promotion,
    QueryOutcome, TransferError, TransferHandle, TransferPhase,
};
use haul_runtime::TransferService;
use haul_telemetry::Metrics;
use haul_test_support::mocks::unavailable;
use haul_test_support::{RecordingReporter, ScriptedAdapter, fixtures};
use tokio::time::Instant;

struct Harness {
    service: TransferService,
    adapter: Arc<ScriptedAdapter>,
    reporter: Arc<RecordingReporter>,
    metrics: Metrics,
}

fn policy() -> ControllerPolicy {
    ControllerPolicy {
        backoff_jitter: 0.0,
        ..ControllerPolicy::default()
    }
}

fn harness(adapter: ScriptedAdapter) -> Harness {
    let adapter = Arc::new(adapter);
    let reporter = Arc::new(RecordingReporter::new());
    let metrics = Metrics::new().expect("metrics");
    let service = TransferService::new(policy(), reporter.clone(), metrics.clone())
        .with_adapter(adapter.clone());
    Harness {
        service,
        adapter,
        reporter,
        metrics,
    }
}

#[tokio::test(start_paused = true)]
async fn native_progress_reaches_finished() {
    let h = harness(
        ScriptedAdapter::new(BackendKind::Native)
            .then_query(Ok(fixtures::native(0, Some(1_000), NativeState::Streaming)))
            .then_query(Ok(fixtures::native(250, Some(1_000), NativeState::Streaming)))
            .then_query(Ok(fixtures::native(1_000, Some(1_000), NativeState::Completed))),
    );

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Native))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Finished);
    assert_eq!(status.bytes_done, 1_000);
    assert_eq!(status.bytes_total, 1_000);
    assert_eq!(
        h.reporter.phases(id),
        vec![
            TransferPhase::Pending,
            TransferPhase::Running,
            TransferPhase::Finished
        ]
    );
    let calls = h.adapter.calls();
    assert_eq!(calls.query, 3);
    assert_eq!(calls.remove, vec![false]);
    assert_eq!(calls.cancel, 0);
}

#[tokio::test(start_paused = true)]
async fn torrent_add_retries_until_backend_returns() {
    let h = harness(
        ScriptedAdapter::new(BackendKind::Torrent)
            .add_unavailable(4)
            .then_query(Ok(fixtures::torrent("downloading", 0.5, 4_096)))
            .then_query(Ok(fixtures::torrent("uploading", 1.0, 4_096))),
    );

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Torrent))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    let calls = h.adapter.calls();
    assert_eq!(calls.add, 5);
    assert_eq!(calls.connect, 5);
    assert_eq!(calls.query, 2);
    assert_eq!(status.phase, TransferPhase::Finished);
    let rendered = h.metrics.render().expect("render");
    assert!(rendered.contains(
        "haul_backend_retries_total{backend=\"torrent\",operation=\"add\"} 4"
    ));
}

#[tokio::test(start_paused = true)]
async fn exhausted_add_attempts_fail_as_unreachable() {
    let h = harness(ScriptedAdapter::new(BackendKind::Torrent).add_unavailable(5));

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Torrent))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Failed);
    assert_eq!(status.failure, Some(FailureReason::BackendUnreachable));
    let calls = h.adapter.calls();
    assert_eq!(calls.add, 5);
    assert!(calls.remove.is_empty());
}

#[tokio::test(start_paused = true)]
async fn remote_without_promotion_hits_deadline() {
    let h = harness(ScriptedAdapter::new(BackendKind::Remote).promote_pending(1_000));

    let id = h
        .service
        .start_transfer(fixtures::request_with_deadline(
            BackendKind::Remote,
            Duration::from_secs(60),
        ))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Failed);
    assert_eq!(status.failure, Some(FailureReason::DeadlineExceeded));
    assert_eq!(status.error_message.as_deref(), Some(DEADLINE_MESSAGE));
    let calls = h.adapter.calls();
    assert_eq!(calls.remove, vec![true]);
    assert_eq!(calls.query, 0);
    assert!(calls.promote >= 6);
}

#[tokio::test(start_paused = true)]
async fn remote_polls_after_promotion() {
    let h = harness(
        ScriptedAdapter::new(BackendKind::Remote)
            .promote_pending(2)
            .then_query(Ok(fixtures::remote(500, 1_000, false)))
            .then_query(Ok(fixtures::remote(1_000, 1_000, true))),
    );

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Remote))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Finished);
    assert_eq!(status.name.as_deref(), Some("archive.rar"));
    let calls = h.adapter.calls();
    assert_eq!(calls.promote, 3);
    assert_eq!(calls.query, 2);
    assert_eq!(calls.remove, vec![false]);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_start_backoff_is_prompt() {
    let h = harness(ScriptedAdapter::new(BackendKind::Torrent).add_unavailable(4));

    let started = Instant::now();
    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Torrent))
        .expect("start");
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    h.service.cancel_transfer(id).expect("cancel");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(3));
    let calls = h.adapter.calls();
    assert_eq!(calls.add, 2);
    assert!(calls.remove.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_while_polling_cancels_then_removes() {
    let h = harness(
        ScriptedAdapter::new(BackendKind::Native)
            .then_query(Ok(fixtures::native(250, Some(1_000), NativeState::Streaming))),
    );

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Native))
        .expect("start");
    tokio::time::sleep(Duration::from_secs(12)).await;
    h.service.cancel_transfer(id).expect("cancel");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Cancelled);
    assert_eq!(status.bytes_done, 250);
    let calls = h.adapter.calls();
    assert_eq!(calls.cancel, 1);
    assert_eq!(calls.remove, vec![true]);
    assert_eq!(calls.query, 2);
}

#[tokio::test(start_paused = true)]
async fn repeated_poll_errors_fail_as_unstable() {
    let mut adapter = ScriptedAdapter::new(BackendKind::Torrent);
    for _ in 0..5 {
        adapter = adapter.then_query(Err(unavailable(BackendKind::Torrent, "query_status")));
    }
    let h = harness(adapter);

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Torrent))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Failed);
    assert_eq!(status.failure, Some(FailureReason::PollingUnstable));
    assert_eq!(h.adapter.calls().remove, vec![true]);
}

#[tokio::test(start_paused = true)]
async fn intermittent_poll_errors_are_tolerated() {
    let h = harness(
        ScriptedAdapter::new(BackendKind::Torrent)
            .then_query(Err(unavailable(BackendKind::Torrent, "query_status")))
            .then_query(Err(unavailable(BackendKind::Torrent, "query_status")))
            .then_query(Ok(fixtures::torrent("downloading", 0.25, 1_000)))
            .then_query(Err(unavailable(BackendKind::Torrent, "query_status")))
            .then_query(Ok(fixtures::torrent("stalledUP", 1.0, 1_000))),
    );

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Torrent))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Finished);
    assert!(
        h.metrics
            .render()
            .expect("render")
            .contains("haul_poll_errors_total{backend=\"torrent\"} 3")
    );
}

#[tokio::test(start_paused = true)]
async fn backend_failure_is_forwarded() {
    let h = harness(
        ScriptedAdapter::new(BackendKind::Torrent)
            .then_query(Ok(fixtures::torrent("downloading", 0.2, 1_000)))
            .then_query(Ok(fixtures::torrent("error", 0.2, 1_000))),
    );

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Torrent))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Failed);
    assert_eq!(status.failure, Some(FailureReason::BackendReportedFailure));
    assert_eq!(
        status.error_message.as_deref(),
        Some("torrent client reported state error")
    );
    assert_eq!(h.adapter.calls().remove, vec![true]);
}

#[tokio::test(start_paused = true)]
async fn vanished_handle_fails_without_retry() {
    let h = harness(
        ScriptedAdapter::new(BackendKind::Torrent)
            .then_query(Err(TransferError::not_found("torrent", "haul-tag"))),
    );

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Torrent))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Failed);
    assert_eq!(status.error_message.as_deref(), Some("torrent haul-tag not found"));
    let calls = h.adapter.calls();
    assert_eq!(calls.query, 1);
    assert_eq!(calls.remove, vec![true]);
}

#[tokio::test(start_paused = true)]
async fn second_cleanup_has_no_extra_effect() {
    let h = harness(
        ScriptedAdapter::new(BackendKind::Native)
            .then_query(Ok(fixtures::native(10, Some(10), NativeState::Completed))),
    );

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Native))
        .expect("start");
    let _ = h.service.wait(id).await.expect("terminal status");

    let handle = TransferHandle::Native {
        task_id: id.as_uuid(),
    };
    h.adapter
        .remove(&handle, true)
        .await
        .expect("repeat cleanup succeeds");
    assert_eq!(h.adapter.calls().remove, vec![false, true]);
    assert_eq!(h.adapter.remove_effects(), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_reporter_does_not_affect_transfer() {
    let h = harness(
        ScriptedAdapter::new(BackendKind::Native)
            .then_query(Ok(fixtures::native(64, Some(64), NativeState::Completed))),
    );
    h.reporter.rate_limit_next(3, Duration::from_secs(1));

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Native))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Finished);
    assert_eq!(h.adapter.calls().query, 1);
    assert_eq!(h.reporter.phases(id), vec![TransferPhase::Finished]);
    assert_eq!(h.reporter.attempts(), 4);
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.report_throttled_total, 3);
    assert_eq!(snapshot.report_failures_total, 0);
}

#[tokio::test(start_paused = true)]
async fn persistent_rate_limit_drops_terminal_report() {
    let h = harness(
        ScriptedAdapter::new(BackendKind::Native)
            .then_query(Ok(fixtures::native(64, Some(64), NativeState::Completed))),
    );
    h.reporter.rate_limit_next(50, Duration::from_secs(1));

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Native))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Finished);
    assert!(h.reporter.statuses(id).is_empty());
    assert_eq!(h.metrics.snapshot().report_failures_total, 1);
    assert_eq!(h.service.get_status(id).expect("history").phase, TransferPhase::Finished);
}

#[tokio::test(start_paused = true)]
async fn rejected_add_is_not_retried() {
    let h = harness(ScriptedAdapter::new(BackendKind::Native).then_add(Err(
        TransferError::BackendReportedFailure {
            backend: BackendKind::Native,
            message: Some("source rejected".into()),
        },
    )));

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Native))
        .expect("start");
    let status = h.reporter.wait_terminal(id).await;

    assert_eq!(status.phase, TransferPhase::Failed);
    assert_eq!(status.failure, Some(FailureReason::BackendReportedFailure));
    let calls = h.adapter.calls();
    assert_eq!(calls.add, 1);
    assert!(calls.remove.is_empty());
}

#[tokio::test(start_paused = true)]
async fn promote_retries_transient_errors() {
    let h = harness(
        ScriptedAdapter::new(BackendKind::Remote)
            .then_promote(Err(unavailable(BackendKind::Remote, "promote")))
            .then_promote(Err(unavailable(BackendKind::Remote, "promote")))
            .then_query(Ok(fixtures::remote(1_000, 1_000, true))),
    );

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Remote))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Finished);
    let calls = h.adapter.calls();
    assert_eq!(calls.promote, 3);
    assert_eq!(calls.remove, vec![false]);
    let rendered = h.metrics.render().expect("render");
    assert!(rendered.contains(
        "haul_backend_retries_total{backend=\"remote\",operation=\"promote\"} 2"
    ));
}

#[tokio::test(start_paused = true)]
async fn exhausted_promote_attempts_fail_as_unreachable() {
    let mut adapter = ScriptedAdapter::new(BackendKind::Remote);
    for _ in 0..5 {
        adapter = adapter.then_promote(Err(unavailable(BackendKind::Remote, "promote")));
    }
    let h = harness(adapter.then_promote(Ok(Promotion::Pending)));

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Remote))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Failed);
    assert_eq!(status.failure, Some(FailureReason::BackendUnreachable));
    let calls = h.adapter.calls();
    assert_eq!(calls.promote, 5);
    assert_eq!(calls.query, 0);
    assert_eq!(calls.remove, vec![true]);
}

#[tokio::test(start_paused = true)]
async fn pending_poll_resets_error_streak() {
    let mut adapter = ScriptedAdapter::new(BackendKind::Torrent);
    for _ in 0..4 {
        adapter = adapter.then_query(Err(unavailable(BackendKind::Torrent, "query_status")));
    }
    adapter = adapter.then_query(Ok(QueryOutcome::Pending));
    for _ in 0..4 {
        adapter = adapter.then_query(Err(unavailable(BackendKind::Torrent, "query_status")));
    }
    let h = harness(adapter.then_query(Ok(fixtures::torrent("uploading", 1.0, 2_048))));

    let id = h
        .service
        .start_transfer(fixtures::request(BackendKind::Torrent))
        .expect("start");
    let status = h.service.wait(id).await.expect("terminal status");

    assert_eq!(status.phase, TransferPhase::Finished);
    assert_eq!(h.adapter.calls().query, 10);
    assert!(
        h.metrics
            .render()
            .expect("render")
            .contains("haul_poll_errors_total{backend=\"torrent\"} 8")
    );
}
