//! Integration tests for per-meeting serialization.
//!
//! Concurrent calls on one meeting must behave as if run one at a time.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use engine_test_utils::EngineHarness;
use meeting_engine::events::DomainEvent;
use meeting_engine::models::{HandStatusSettings, JoinSettings, MeetingType, Requester};
use meeting_engine::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

async fn members(harness: &EngineHarness, count: usize) -> Vec<Requester> {
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        members.push(harness.add_member().await);
    }
    members
}

// ============================================================================
// Start and stop
// ============================================================================

#[tokio::test]
async fn test_concurrent_joins_start_meeting_once() {
    let harness = EngineHarness::start().await;
    let joiners = members(&harness, 5).await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;

    let meeting_id = meeting.id;
    let mut tasks = JoinSet::new();
    for member in joiners {
        let engine = Arc::clone(&harness.engine);
        tasks.spawn(async move {
            engine
                .insert_participant(
                    &meeting_id,
                    JoinSettings::default(),
                    &member.user_id,
                    &member.session_id,
                )
                .await
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(harness.store.participants().len(), 5);
    assert_eq!(harness.videoserver.messages("create").len(), 2);
    assert_eq!(
        harness
            .sink
            .count_for_user(&harness.owner.user_id, "MeetingStarted"),
        1
    );
    harness.assert_gateway_consistent(&meeting).await;
}

#[tokio::test]
async fn test_concurrent_leaves_stop_meeting_once() {
    let harness = EngineHarness::start().await;
    let leavers = members(&harness, 5).await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    for member in &leavers {
        harness.join(&meeting, member).await;
    }

    let mut tasks = JoinSet::new();
    for member in leavers {
        let engine = Arc::clone(&harness.engine);
        tasks.spawn(async move {
            engine
                .remove_participant_by_session(&member.session_id)
                .await
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert!(!harness.meeting(&meeting).await.active);
    assert!(harness.store.participants().is_empty());
    assert_eq!(
        harness
            .sink
            .count_for_user(&harness.owner.user_id, "MeetingStopped"),
        1
    );
    // Audio and video room, destroyed once each
    assert_eq!(harness.videoserver.messages("destroy").len(), 2);
    harness.assert_gateway_consistent(&meeting).await;
}

// ============================================================================
// Toggles
// ============================================================================

#[tokio::test]
async fn test_concurrent_hand_raises_see_each_other() {
    let harness = EngineHarness::start().await;
    let raisers = members(&harness, 5).await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    for member in &raisers {
        harness.join(&meeting, member).await;
    }

    let meeting_id = meeting.id;
    let mut tasks = JoinSet::new();
    for member in raisers {
        let engine = Arc::clone(&harness.engine);
        tasks.spawn(async move {
            engine
                .update_hand_status(
                    &meeting_id,
                    HandStatusSettings {
                        raised: true,
                        user_to_moderate: None,
                    },
                    &member,
                )
                .await
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    // Each raise observed every earlier one
    let list_sizes: Vec<usize> = harness
        .sink
        .events_for_user(&harness.owner.user_id)
        .into_iter()
        .filter_map(|event| match event {
            DomainEvent::HandRaisedList { user_ids, .. } => Some(user_ids.len()),
            _ => None,
        })
        .collect();
    assert_eq!(list_sizes, vec![1, 2, 3, 4, 5]);
    assert!(harness
        .store
        .participants()
        .iter()
        .all(|p| p.hand_raised_at.is_some()));
}

// ============================================================================
// Timeouts and shutdown
// ============================================================================

#[tokio::test]
async fn test_slow_videoserver_times_out_and_operation_completes_later() {
    let harness = EngineHarness::builder()
        .operation_timeout(Duration::from_millis(200))
        .build()
        .await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness.videoserver.set_delay(Some(Duration::from_secs(1)));

    let err = harness
        .engine
        .update_meeting(&meeting.id, true, &harness.owner)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));
    assert!(err.is_retryable());

    // The actor keeps working on the request that timed out
    harness.videoserver.set_delay(None);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let started = harness
        .engine
        .update_meeting(&meeting.id, true, &harness.owner)
        .await
        .unwrap();
    assert!(started.active);
    assert_eq!(harness.videoserver.messages("create").len(), 2);
    harness.assert_gateway_consistent(&meeting).await;
}

#[tokio::test]
async fn test_shutdown_stops_every_actor() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let permanent = harness.create_meeting(MeetingType::Permanent).await;
    let scheduled = harness.create_meeting(MeetingType::Scheduled).await;
    harness.join(&permanent, &alice).await;
    harness.join(&scheduled, &harness.owner).await;
    assert_eq!(harness.engine.actor_count(), 2);

    harness.engine.shutdown(Duration::from_secs(1)).await;

    assert_eq!(harness.engine.actor_count(), 0);
}
