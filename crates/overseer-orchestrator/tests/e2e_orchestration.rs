#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end orchestration tests.
//!
//! Drives the Overseer through full task lifecycles: dispatch, worker replies,
//! retries with backoff, human checkpoints, cost alerts, and the in-process
//! dispatcher.

use async_trait::async_trait;
use overseer_audit::{read_jsonl, AuditLog};
use overseer_core::{
    ActionKind, Message, OverseerConfig, OverseerError, Priority, Protocol, ResponseStatus,
};
use overseer_orchestrator::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> OverseerConfig {
    OverseerConfig {
        backoff_base_ms: 1,
        backoff_jitter_ms: 0,
        ..OverseerConfig::default()
    }
}

fn setup() -> (Overseer, mpsc::UnboundedReceiver<Message>) {
    Overseer::new(fast_config(), Arc::new(AuditLog::in_memory()))
}

async fn next_dispatch(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("dispatch timed out")
        .expect("dispatch queue closed")
}

async fn assert_no_dispatch(rx: &mut mpsc::UnboundedReceiver<Message>, wait_ms: u64) {
    let got = tokio::time::timeout(Duration::from_millis(wait_ms), rx.recv()).await;
    assert!(got.is_err(), "unexpected dispatch: {got:?}");
}

fn status_of(overseer: &Overseer, task_id: &str) -> TaskStatus {
    overseer.get_task_status(task_id).unwrap().status
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_scrape_success_completes_task() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("scrape", "source:abc", Priority::Normal, None, false)
        .unwrap();
    assert!(id.starts_with("scrape_"));

    let request = next_dispatch(&mut rx).await;
    assert_eq!(request.agent_to(), "ScraperAgent");

    let reply = Protocol::create_response(&request, ResponseStatus::Success, "result:123", 0.95, 1200);
    let outcome = overseer.handle_response(reply).unwrap();
    assert_eq!(
        outcome,
        ResponseOutcome::Completed {
            output_ref: Some("result:123".into()),
            confidence: Some(0.95),
        }
    );

    let status = overseer.get_task_status(&id).unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert_eq!(status.history_len, 2);
    assert_eq!(status.retry_count, 0);
    assert_eq!(status.current_agent, "ScraperAgent");

    let scraper = overseer
        .get_agent_health()
        .into_iter()
        .find(|a| a.name == "ScraperAgent")
        .unwrap();
    assert_eq!(scraper.tasks_completed, 1);
    assert!((scraper.average_response_ms - 1200.0).abs() < f64::EPSILON);
    assert_eq!(overseer.audit().task_history(&id).len(), 2);
}

#[tokio::test]
async fn test_terminal_task_ignores_later_messages() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("analyze", "data:1", Priority::Normal, None, false)
        .unwrap();
    let request = next_dispatch(&mut rx).await;

    let ok = Protocol::create_response(&request, ResponseStatus::Success, "out:1", 1.0, 10);
    overseer.handle_response(ok.clone()).unwrap();

    let late_error = Protocol::create_error(&request, "TIMEOUT", "too slow", true, false);
    assert_eq!(overseer.handle_response(late_error).unwrap(), ResponseOutcome::Stale);
    assert_eq!(overseer.handle_response(ok).unwrap(), ResponseOutcome::Stale);

    let status = overseer.get_task_status(&id).unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert_eq!(status.history_len, 2);
    // Stale messages are audited but do not count against the agent.
    assert_eq!(overseer.audit().task_history(&id).len(), 4);
    let analyst = overseer
        .get_agent_health()
        .into_iter()
        .find(|a| a.name == "AnalystAgent")
        .unwrap();
    assert_eq!(analyst.tasks_completed, 1);
    assert_eq!(analyst.tasks_failed, 0);
}

#[tokio::test]
async fn test_unknown_task_type_rejected() {
    let (overseer, mut rx) = setup();
    let err = overseer
        .submit_task("bake_cake", "oven:1", Priority::High, None, false)
        .unwrap_err();
    assert!(matches!(err, OverseerError::UnknownTaskType(_)));
    assert_eq!(overseer.snapshot().tasks.total, 0);
    assert!(overseer.audit().is_empty());
    assert_no_dispatch(&mut rx, 20).await;
}

// ---------------------------------------------------------------------------
// Approval checkpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_approval_then_approve_dispatches() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("transform", "resume:42", Priority::Normal, None, true)
        .unwrap();

    assert_no_dispatch(&mut rx, 20).await;
    assert_eq!(status_of(&overseer, &id), TaskStatus::AwaitingCheckpoint);

    let pending = overseer.get_pending_checkpoints();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task_id, id);
    assert_eq!(pending[0].options, vec!["approve", "reject", "modify"]);
    assert_eq!(overseer.audit().human_interventions().len(), 1);

    let resolved = overseer.resolve_checkpoint(&id, "approve").unwrap();
    assert_eq!(resolved.decision(), Some("approve"));
    assert!(overseer.get_pending_checkpoints().is_empty());

    let request = next_dispatch(&mut rx).await;
    assert_eq!(request.task_id(), id);
    assert_eq!(request.agent_to(), "ResumeAgent");
    assert_eq!(status_of(&overseer, &id), TaskStatus::Pending);
}

#[tokio::test]
async fn test_approval_then_reject_cancels() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("transform", "resume:43", Priority::Normal, None, true)
        .unwrap();

    overseer.resolve_checkpoint(&id, "reject").unwrap();
    assert_eq!(status_of(&overseer, &id), TaskStatus::Cancelled);
    assert!(overseer.get_pending_checkpoints().is_empty());
    assert_eq!(overseer.resolved_checkpoints().len(), 1);
    assert_no_dispatch(&mut rx, 20).await;
}

#[tokio::test]
async fn test_checkpoint_misuse_reported() {
    let (overseer, _rx) = setup();
    let id = overseer
        .submit_task("transform", "resume:44", Priority::Normal, None, true)
        .unwrap();

    assert!(matches!(
        overseer.resolve_checkpoint("transform_00000000", "approve"),
        Err(OverseerError::CheckpointNotFound(_))
    ));
    assert!(matches!(
        overseer.resolve_checkpoint(&id, "continue"),
        Err(OverseerError::InvalidDecision { .. })
    ));
    // Misuse leaves the checkpoint in place.
    assert_eq!(overseer.get_pending_checkpoints().len(), 1);
    assert!(overseer.resolve_checkpoint(&id, "modify").is_ok());
    assert_eq!(status_of(&overseer, &id), TaskStatus::AwaitingCheckpoint);
}

// ---------------------------------------------------------------------------
// Retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_responses_retry_then_checkpoint() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("scrape_jobs", "board:7", Priority::Normal, None, false)
        .unwrap();
    let mut request = next_dispatch(&mut rx).await;

    let mut last_delay = 0;
    for expected_attempt in 1..=3 {
        let failed = Protocol::create_response(&request, ResponseStatus::Failed, "", 0.0, 50);
        match overseer.handle_response(failed).unwrap() {
            ResponseOutcome::RetryScheduled { attempt, delay_ms } => {
                assert_eq!(attempt, expected_attempt);
                assert!(delay_ms > last_delay);
                last_delay = delay_ms;
            }
            other => panic!("expected retry, got {other:?}"),
        }
        assert_eq!(
            overseer.get_task_status(&id).unwrap().retry_count,
            expected_attempt
        );
        request = next_dispatch(&mut rx).await;
        assert_eq!(request.task_id(), id);
        assert_eq!(status_of(&overseer, &id), TaskStatus::Pending);
    }

    let failed = Protocol::create_response(&request, ResponseStatus::Failed, "", 0.0, 50);
    let outcome = overseer.handle_response(failed).unwrap();
    assert_eq!(
        outcome,
        ResponseOutcome::CheckpointRaised {
            options: vec!["retry".into(), "redirect".into(), "cancel".into()],
        }
    );
    assert_eq!(status_of(&overseer, &id), TaskStatus::AwaitingCheckpoint);
    assert_eq!(overseer.get_task_status(&id).unwrap().retry_count, 3);

    let pending = overseer.get_pending_checkpoints();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].reason, "Task failed after 3 retries");

    let scraper = overseer
        .get_agent_health()
        .into_iter()
        .find(|a| a.name == "ScraperAgent")
        .unwrap();
    assert_eq!(scraper.tasks_failed, 4);
}

#[tokio::test]
async fn test_retry_decision_then_manual_retry() {
    let config = OverseerConfig {
        max_retries: 0,
        ..fast_config()
    };
    let (overseer, mut rx) = Overseer::new(config, Arc::new(AuditLog::in_memory()));
    let id = overseer
        .submit_task("predict", "model:2", Priority::Normal, None, false)
        .unwrap();
    let request = next_dispatch(&mut rx).await;

    overseer
        .handle_response(Protocol::create_response(&request, ResponseStatus::Failed, "", 0.0, 1))
        .unwrap();
    overseer.resolve_checkpoint(&id, "retry").unwrap();
    // "retry" is recorded; the caller performs it.
    assert_eq!(status_of(&overseer, &id), TaskStatus::AwaitingCheckpoint);
    assert_no_dispatch(&mut rx, 20).await;

    overseer.retry_task(&id).unwrap();
    assert_eq!(next_dispatch(&mut rx).await.task_id(), id);
    let status = overseer.get_task_status(&id).unwrap();
    assert_eq!(status.status, TaskStatus::Pending);
    assert_eq!(status.retry_count, 0);
}

#[tokio::test]
async fn test_redirect_targets_new_agent() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("process_photo", "photo:5", Priority::High, Some("2026-12-01"), false)
        .unwrap();
    next_dispatch(&mut rx).await;

    assert!(matches!(
        overseer.redirect_task(&id, "NobodyAgent"),
        Err(OverseerError::InvalidMessage(_))
    ));

    overseer.redirect_task(&id, "AnalystAgent").unwrap();
    let redirected = next_dispatch(&mut rx).await;
    assert_eq!(redirected.task_id(), id);
    assert_eq!(redirected.agent_to(), "AnalystAgent");
    assert_eq!(redirected.priority(), Priority::High);
    assert_eq!(redirected.param_str("deadline"), Some("2026-12-01"));

    let status = overseer.get_task_status(&id).unwrap();
    assert_eq!(status.current_agent, "AnalystAgent");
    assert_eq!(status.history_len, 2);

    // Retries now go to the new agent.
    overseer
        .handle_response(Protocol::create_response(&redirected, ResponseStatus::Retry, "", 0.0, 1))
        .unwrap();
    assert_eq!(next_dispatch(&mut rx).await.agent_to(), "AnalystAgent");
}

#[tokio::test]
async fn test_cancel_makes_retry_timer_noop() {
    let config = OverseerConfig {
        backoff_base_ms: 25,
        backoff_jitter_ms: 0,
        ..OverseerConfig::default()
    };
    let (overseer, mut rx) = Overseer::new(config, Arc::new(AuditLog::in_memory()));
    let id = overseer
        .submit_task("score", "candidate:1", Priority::Normal, None, false)
        .unwrap();
    let request = next_dispatch(&mut rx).await;

    let error = Protocol::create_error(&request, "RATE_LIMIT", "slow down", true, false);
    assert!(matches!(
        overseer.handle_response(error).unwrap(),
        ResponseOutcome::RetryScheduled { attempt: 1, .. }
    ));
    assert_eq!(status_of(&overseer, &id), TaskStatus::RetryScheduled);

    overseer.cancel_task(&id, "operator abort").unwrap();
    assert_no_dispatch(&mut rx, 150).await;
    assert_eq!(status_of(&overseer, &id), TaskStatus::Cancelled);

    assert!(matches!(
        overseer.cancel_task(&id, "again"),
        Err(OverseerError::InvalidTransition { .. })
    ));
    assert!(matches!(
        overseer.cancel_task("score_missing", "x"),
        Err(OverseerError::TaskNotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// Replies for held tasks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_gated_task_ignores_worker_replies_until_approved() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("transform", "resume:77", Priority::Normal, None, true)
        .unwrap();
    let request = overseer.task_history(&id).unwrap()[0].clone();

    let held = ResponseOutcome::Deferred {
        status: TaskStatus::AwaitingCheckpoint,
    };
    let retry = Protocol::create_response(&request, ResponseStatus::Retry, "", 0.0, 3);
    assert_eq!(overseer.handle_response(retry).unwrap(), held);
    let success = Protocol::create_response(&request, ResponseStatus::Success, "cv:77", 1.0, 3);
    assert_eq!(overseer.handle_response(success).unwrap(), held);

    assert_no_dispatch(&mut rx, 30).await;
    let status = overseer.get_task_status(&id).unwrap();
    assert_eq!(status.status, TaskStatus::AwaitingCheckpoint);
    assert_eq!(status.retry_count, 0);
    assert_eq!(status.history_len, 4);
    assert_eq!(overseer.get_pending_checkpoints()[0].task_id, id);

    overseer.resolve_checkpoint(&id, "approve").unwrap();
    assert_eq!(next_dispatch(&mut rx).await.task_id(), id);
}

#[tokio::test]
async fn test_retry_reply_cannot_skip_human_error_checkpoint() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("transcribe", "audio:8", Priority::Normal, None, false)
        .unwrap();
    let request = next_dispatch(&mut rx).await;

    overseer
        .handle_response(Protocol::create_error(&request, "AMBIGUOUS", "two speakers", true, true))
        .unwrap();
    let retry = Protocol::create_response(&request, ResponseStatus::Retry, "", 0.0, 3);
    assert_eq!(
        overseer.handle_response(retry).unwrap(),
        ResponseOutcome::Deferred {
            status: TaskStatus::AwaitingCheckpoint
        }
    );

    assert_no_dispatch(&mut rx, 30).await;
    let status = overseer.get_task_status(&id).unwrap();
    assert_eq!(status.status, TaskStatus::AwaitingCheckpoint);
    assert_eq!(status.retry_count, 0);
    assert_eq!(overseer.get_pending_checkpoints().len(), 1);
    // Held replies still reach the audit trail and agent stats.
    assert_eq!(overseer.audit().task_history(&id).len(), 4);
    let field = overseer
        .get_agent_health()
        .into_iter()
        .find(|a| a.name == "FieldIntelAgent")
        .unwrap();
    assert_eq!(field.tasks_failed, 2);
}

#[tokio::test]
async fn test_duplicate_failure_does_not_burn_retry_budget() {
    let config = OverseerConfig {
        backoff_base_ms: 25,
        backoff_jitter_ms: 0,
        ..OverseerConfig::default()
    };
    let (overseer, mut rx) = Overseer::new(config, Arc::new(AuditLog::in_memory()));
    let id = overseer
        .submit_task("predict", "model:4", Priority::Normal, None, false)
        .unwrap();
    let request = next_dispatch(&mut rx).await;

    let failed = Protocol::create_response(&request, ResponseStatus::Failed, "", 0.0, 3);
    assert!(matches!(
        overseer.handle_response(failed.clone()).unwrap(),
        ResponseOutcome::RetryScheduled { attempt: 1, .. }
    ));
    assert_eq!(
        overseer.handle_response(failed).unwrap(),
        ResponseOutcome::Deferred {
            status: TaskStatus::RetryScheduled
        }
    );
    assert_eq!(overseer.get_task_status(&id).unwrap().retry_count, 1);

    // One timer, one re-dispatch.
    assert_eq!(next_dispatch(&mut rx).await.task_id(), id);
    assert_no_dispatch(&mut rx, 150).await;
    assert_eq!(status_of(&overseer, &id), TaskStatus::Pending);
}

#[tokio::test]
async fn test_late_success_during_backoff_completes_task() {
    let config = OverseerConfig {
        backoff_base_ms: 25,
        backoff_jitter_ms: 0,
        ..OverseerConfig::default()
    };
    let (overseer, mut rx) = Overseer::new(config, Arc::new(AuditLog::in_memory()));
    let id = overseer
        .submit_task("score", "candidate:5", Priority::Normal, None, false)
        .unwrap();
    let request = next_dispatch(&mut rx).await;

    overseer
        .handle_response(Protocol::create_response(&request, ResponseStatus::Retry, "", 0.0, 3))
        .unwrap();
    let outcome = overseer
        .handle_response(Protocol::create_response(&request, ResponseStatus::Success, "s:5", 0.8, 3))
        .unwrap();
    assert!(matches!(outcome, ResponseOutcome::Completed { .. }));

    assert_no_dispatch(&mut rx, 150).await;
    assert_eq!(status_of(&overseer, &id), TaskStatus::Completed);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_requires_human_takes_precedence_over_retry() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("transcribe", "audio:3", Priority::Normal, None, false)
        .unwrap();
    let request = next_dispatch(&mut rx).await;

    let error = Protocol::create_error(&request, "AMBIGUOUS", "speaker unclear", true, true);
    let outcome = overseer.handle_response(error).unwrap();
    assert_eq!(
        outcome,
        ResponseOutcome::CheckpointRaised {
            options: vec![
                "retry".into(),
                "redirect".into(),
                "cancel".into(),
                "ignore".into()
            ],
        }
    );

    let status = overseer.get_task_status(&id).unwrap();
    assert_eq!(status.retry_count, 0);
    assert_eq!(status.status, TaskStatus::AwaitingCheckpoint);
    assert_eq!(
        overseer.get_pending_checkpoints()[0].reason,
        "Error requires human intervention: speaker unclear"
    );
    assert_no_dispatch(&mut rx, 20).await;
}

#[tokio::test]
async fn test_non_retryable_error_fails_task() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("export", "report:9", Priority::Normal, None, false)
        .unwrap();
    let request = next_dispatch(&mut rx).await;

    let error = Protocol::create_error(&request, "BAD_INPUT", "corrupt file", false, false);
    assert_eq!(overseer.handle_response(error).unwrap(), ResponseOutcome::Failed);
    assert_eq!(status_of(&overseer, &id), TaskStatus::Failed);
    assert_eq!(overseer.audit().errors().len(), 1);
    assert!(overseer.get_pending_checkpoints().is_empty());
}

#[tokio::test]
async fn test_resolve_after_terminal_records_only() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("transcribe", "audio:4", Priority::Normal, None, false)
        .unwrap();
    let request = next_dispatch(&mut rx).await;
    overseer
        .handle_response(Protocol::create_error(&request, "X", "help", false, true))
        .unwrap();
    overseer.cancel_task(&id, "gave up").unwrap();

    let cp = overseer.resolve_checkpoint(&id, "retry").unwrap();
    assert_eq!(cp.decision(), Some("retry"));
    assert_eq!(status_of(&overseer, &id), TaskStatus::Cancelled);
    assert_no_dispatch(&mut rx, 20).await;
}

// ---------------------------------------------------------------------------
// Costs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cost_tracking_and_alert_ladder() {
    let (overseer, _rx) = setup();

    assert!(!overseer.track_api_cost("openai", 4.0, None).unwrap());
    assert!(!overseer.track_api_cost("whisper", 3.0, None).unwrap());
    assert!(overseer.track_api_cost("openai", 3.5, None).unwrap());
    assert!(!overseer.track_api_cost("openai", 1.0, None).unwrap());
    assert!(!overseer.track_api_cost("whisper", 0.5, None).unwrap());

    let report = overseer.cost_report();
    assert!((report.total - 12.0).abs() < 1e-9);
    assert!((report.per_api["openai"] - 8.5).abs() < 1e-9);
    assert!((report.per_api["whisper"] - 3.5).abs() < 1e-9);

    let pending = overseer.get_pending_checkpoints();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task_id, "cost_alert");
    assert_eq!(pending[0].reason, "API costs have reached $10.50");
    assert_eq!(pending[0].options, vec!["continue", "pause", "switch_to_local"]);

    // Next band raises a fresh alert.
    assert!(overseer.track_api_cost("openai", 8.0, None).unwrap());
    assert_eq!(overseer.audit().human_interventions().len(), 2);

    assert!(matches!(
        overseer.track_api_cost("openai", -1.0, None),
        Err(OverseerError::InvalidCost(_))
    ));
}

#[tokio::test]
async fn test_cost_alert_keyed_to_task_is_advisory() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("analyze", "data:2", Priority::Normal, None, false)
        .unwrap();
    let request = next_dispatch(&mut rx).await;

    assert!(overseer.track_api_cost("openai", 11.0, Some(&id)).unwrap());
    assert_eq!(overseer.get_pending_checkpoints()[0].task_id, id);
    assert_eq!(status_of(&overseer, &id), TaskStatus::Pending);

    overseer
        .handle_response(Protocol::create_response(&request, ResponseStatus::Success, "o", 1.0, 1))
        .unwrap();
    assert_eq!(status_of(&overseer, &id), TaskStatus::Completed);
}

// ---------------------------------------------------------------------------
// Dispatcher with in-process workers
// ---------------------------------------------------------------------------

struct EchoWorker;

#[async_trait]
impl AgentHandler for EchoWorker {
    async fn handle(&self, request: Message) -> Message {
        let input = request.param_str("input_ref").unwrap_or_default().to_string();
        Protocol::create_response(
            &request,
            ResponseStatus::Success,
            &format!("echo:{input}"),
            0.8,
            5,
        )
    }
}

#[tokio::test]
async fn test_dispatcher_runs_in_process_worker() {
    let (overseer, rx) = setup();
    overseer.register_agent("ReportAgent", "assessment_generation", Some(Arc::new(EchoWorker)));
    let dispatcher = tokio::spawn(run_dispatcher(overseer.clone(), rx));

    let id = overseer
        .submit_task("generate_report", "assessment:1", Priority::Normal, None, false)
        .unwrap();

    let mut completed = false;
    for _ in 0..100 {
        if status_of(&overseer, &id) == TaskStatus::Completed {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(completed, "worker reply never applied");

    let history = overseer.task_history(&id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].output_ref(), Some("echo:assessment:1"));
    assert_eq!(history[1].action(), ActionKind::Response);

    let report = overseer
        .get_agent_health()
        .into_iter()
        .find(|a| a.name == "ReportAgent")
        .unwrap();
    assert_eq!(report.status, AgentStatus::Healthy);
    assert_eq!(report.tasks_completed, 1);

    dispatcher.abort();
}

// ---------------------------------------------------------------------------
// Audit trail and snapshot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_audit_file_mirrors_orchestration() {
    let tmp = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditLog::new(tmp.path().join("audit")));
    let (overseer, mut rx) = Overseer::new(fast_config(), audit.clone());

    let id = overseer
        .submit_task("transform", "resume:1", Priority::Normal, None, true)
        .unwrap();
    overseer.resolve_checkpoint(&id, "approve").unwrap();
    let request = next_dispatch(&mut rx).await;
    overseer
        .handle_response(Protocol::create_response(&request, ResponseStatus::Success, "cv:1", 0.9, 30))
        .unwrap();

    audit.flush().await;
    let records = read_jsonl(audit.path().unwrap()).await.unwrap();
    let actions: Vec<ActionKind> = records.iter().map(|r| r.message.action()).collect();
    assert_eq!(
        actions,
        vec![
            ActionKind::Request,
            ActionKind::HumanIntervention,
            ActionKind::Response
        ]
    );
    assert!(records.iter().all(|r| r.message.task_id() == id));
    assert_eq!(records[2].wire, records[2].message.to_wire());
}

#[tokio::test]
async fn test_snapshot_counts() {
    let (overseer, mut rx) = setup();
    let done = overseer
        .submit_task("scrape", "a", Priority::Normal, None, false)
        .unwrap();
    overseer
        .submit_task("transform", "b", Priority::Normal, None, true)
        .unwrap();
    overseer
        .submit_task("analyze", "c", Priority::Normal, None, false)
        .unwrap();
    let request = next_dispatch(&mut rx).await;
    assert_eq!(request.task_id(), done);
    overseer
        .handle_response(Protocol::create_response(&request, ResponseStatus::Success, "r", 1.0, 1))
        .unwrap();
    overseer.track_api_cost("openai", 2.0, None).unwrap();

    let snapshot = overseer.snapshot();
    assert_eq!(snapshot.tasks.total, 3);
    assert_eq!(snapshot.tasks.active, 2);
    assert_eq!(snapshot.tasks.queued, 1);
    assert_eq!(snapshot.tasks.awaiting_checkpoint, 1);
    assert_eq!(snapshot.tasks.completed, 1);
    assert_eq!(snapshot.pending_checkpoints.len(), 1);
    assert!((snapshot.costs.total - 2.0).abs() < 1e-9);
    assert_eq!(snapshot.agents.len(), DEFAULT_ROSTER.len());

    let json = overseer.to_json();
    assert_eq!(json["tasks"]["total"], 3);
}

#[tokio::test]
async fn test_wire_reply_round_trip() {
    let (overseer, mut rx) = setup();
    let id = overseer
        .submit_task("score", "candidate:9", Priority::Normal, None, false)
        .unwrap();
    let request = next_dispatch(&mut rx).await;

    let reply = Protocol::create_response(&request, ResponseStatus::Success, "score:9", 0.7, 40);
    let outcome = overseer.handle_wire(&reply.to_wire()).unwrap();
    assert!(matches!(outcome, ResponseOutcome::Completed { .. }));
    assert_eq!(status_of(&overseer, &id), TaskStatus::Completed);

    let err = overseer.handle_wire("Overseer|AnalystAgent").unwrap_err();
    assert!(matches!(err, OverseerError::Protocol(_)));
}

#[tokio::test]
async fn test_heartbeat_and_sweep() {
    let (overseer, _rx) = setup();
    assert!(overseer.heartbeat("ScraperAgent"));
    assert!(!overseer.heartbeat("Ghost"));
    assert_eq!(overseer.sweep_health(), 0);

    assert!(overseer.mark_agent_unavailable("ScraperAgent"));
    let scraper = overseer
        .get_agent_health()
        .into_iter()
        .find(|a| a.name == "ScraperAgent")
        .unwrap();
    assert_eq!(scraper.status, AgentStatus::Unavailable);

    let monitor = overseer.spawn_health_monitor();
    monitor.abort();
}
