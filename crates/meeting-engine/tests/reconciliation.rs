//! Integration tests for videoserver reconciliation.
//!
//! Orphans are produced by editing the stores behind the engine's back,
//! which is what a crash between a videoserver call and a store write
//! leaves behind.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use engine_test_utils::EngineHarness;
use meeting_engine::models::{Meeting, MeetingType};
use meeting_engine::repositories::{MeetingStore, ParticipantStore};
use meeting_engine::services::ReconcileReport;
use meeting_engine::tasks::{run_reconciliation, start_reconciliation};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn orphan_inactive_meeting(harness: &EngineHarness, meeting: &Meeting) {
    ParticipantStore::delete_by_meeting(&harness.store, &meeting.id)
        .await
        .unwrap();
    MeetingStore::update(
        &harness.store,
        &Meeting {
            active: false,
            ..meeting.clone()
        },
    )
    .await
    .unwrap();
}

// ============================================================================
// Single pass
// ============================================================================

#[tokio::test]
async fn test_healthy_meeting_is_left_alone() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness.join(&meeting, &alice).await;
    harness.videoserver.clear_calls();

    let report = run_reconciliation(&harness.engine, &CancellationToken::new()).await;

    assert_eq!(report, ReconcileReport::default());
    assert!(harness.videoserver.calls().is_empty());
    harness.assert_gateway_consistent(&meeting).await;
}

#[tokio::test]
async fn test_session_without_participant_is_released() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let bob = harness.add_member().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness.join(&meeting, &alice).await;
    harness.join(&meeting, &bob).await;

    ParticipantStore::delete(&harness.store, &meeting.id, &alice.user_id)
        .await
        .unwrap();
    harness.videoserver.clear_calls();

    let report = run_reconciliation(&harness.engine, &CancellationToken::new()).await;

    assert_eq!(
        report,
        ReconcileReport {
            meetings: 0,
            sessions: 1
        }
    );
    assert_eq!(harness.videoserver.verb_count("destroy"), 1);
    assert!(harness.meeting(&meeting).await.active);
    harness.assert_gateway_consistent(&meeting).await;
}

#[tokio::test]
async fn test_inactive_meeting_is_torn_down() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness.join(&meeting, &alice).await;
    let meeting = harness.meeting(&meeting).await;

    orphan_inactive_meeting(&harness, &meeting).await;

    let report = run_reconciliation(&harness.engine, &CancellationToken::new()).await;

    assert_eq!(
        report,
        ReconcileReport {
            meetings: 1,
            sessions: 1
        }
    );
    assert_eq!(harness.videoserver.messages("destroy").len(), 2);
    assert!(harness.store.gateway_meetings().is_empty());
    assert!(harness.store.gateway_sessions().is_empty());
    harness.assert_gateway_consistent(&meeting).await;

    // Teardown emits nothing; the domain already considers it stopped
    assert_eq!(
        harness
            .sink
            .count_for_user(&harness.owner.user_id, "MeetingStopped"),
        0
    );
}

#[tokio::test]
async fn test_deleted_meeting_is_torn_down_and_actor_dropped() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness.join(&meeting, &alice).await;
    assert_eq!(harness.engine.actor_count(), 1);

    ParticipantStore::delete_by_meeting(&harness.store, &meeting.id)
        .await
        .unwrap();
    MeetingStore::delete(&harness.store, &meeting.id)
        .await
        .unwrap();

    let report = run_reconciliation(&harness.engine, &CancellationToken::new()).await;

    assert_eq!(
        report,
        ReconcileReport {
            meetings: 1,
            sessions: 1
        }
    );
    assert!(harness.store.gateway_meetings().is_empty());
    assert_eq!(harness.engine.actor_count(), 0);
}

#[tokio::test]
async fn test_unreachable_videoserver_keeps_records_for_next_pass() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness.join(&meeting, &alice).await;
    let meeting = harness.meeting(&meeting).await;
    orphan_inactive_meeting(&harness, &meeting).await;

    harness.videoserver.set_unavailable(true);
    let report = run_reconciliation(&harness.engine, &CancellationToken::new()).await;
    assert_eq!(report, ReconcileReport::default());
    assert_eq!(harness.store.gateway_meetings().len(), 1);

    harness.videoserver.set_unavailable(false);
    let report = run_reconciliation(&harness.engine, &CancellationToken::new()).await;
    assert_eq!(report.meetings, 1);
    assert!(harness.store.gateway_meetings().is_empty());
}

#[tokio::test]
async fn test_cancelled_pass_does_nothing() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness.join(&meeting, &alice).await;
    let meeting = harness.meeting(&meeting).await;
    orphan_inactive_meeting(&harness, &meeting).await;

    let token = CancellationToken::new();
    token.cancel();
    let report = run_reconciliation(&harness.engine, &token).await;

    assert_eq!(report, ReconcileReport::default());
    assert_eq!(harness.store.gateway_meetings().len(), 1);
}

// ============================================================================
// Background task
// ============================================================================

#[tokio::test]
async fn test_background_task_cleans_up_and_exits_on_cancel() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness.join(&meeting, &alice).await;
    let meeting = harness.meeting(&meeting).await;
    orphan_inactive_meeting(&harness, &meeting).await;

    let token = CancellationToken::new();
    let task = tokio::spawn(start_reconciliation(
        Arc::clone(&harness.engine),
        Duration::from_millis(50),
        token.clone(),
    ));

    let cleaned = tokio::time::timeout(Duration::from_secs(5), async {
        while !harness.store.gateway_meetings().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(cleaned.is_ok(), "reconciliation never tore down the meeting");

    token.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), task).await;
    assert!(result.is_ok(), "task should exit promptly on cancel");
    harness.assert_gateway_consistent(&meeting).await;
}
