//! Integration tests for the meeting lifecycle.
//!
//! Covers creation rules, start and stop through `update_meeting`, the
//! videoserver records backing an active meeting, and deletion.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::clock::Clock;
use common::types::MeetingId;
use engine_test_utils::{Destination, EngineHarness};
use meeting_engine::config::RoomSettings;
use meeting_engine::events::DomainEvent;
use meeting_engine::models::{JoinOutcome, JoinSettings, LeaveReason, MeetingType};
use meeting_engine::{EngineError, GatewayError};
use serde_json::json;

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn test_member_creates_inactive_meeting_and_members_are_notified() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;

    let meeting = harness
        .engine
        .create_meeting(&harness.room_id, MeetingType::Permanent, &alice)
        .await
        .unwrap();

    assert!(!meeting.active);
    assert_eq!(meeting.room_id, harness.room_id);
    assert_eq!(meeting.created_at, harness.clock.now());

    for user in [harness.owner.user_id, alice.user_id] {
        assert_eq!(harness.sink.names_for_user(&user), vec!["MeetingCreated"]);
    }
    // Creating does not touch the videoserver
    assert!(harness.videoserver.calls().is_empty());
}

#[tokio::test]
async fn test_outsider_cannot_create_meeting() {
    let harness = EngineHarness::start().await;
    let outsider = harness.outsider();

    let err = harness
        .engine
        .create_meeting(&harness.room_id, MeetingType::Scheduled, &outsider)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Forbidden(_)));
    assert_eq!(err.status_code(), 403);
    assert!(harness.store.meetings().is_empty());
}

#[tokio::test]
async fn test_second_permanent_meeting_conflicts_but_scheduled_do_not() {
    let harness = EngineHarness::start().await;

    harness.create_meeting(MeetingType::Permanent).await;
    let err = harness
        .engine
        .create_meeting(&harness.room_id, MeetingType::Permanent, &harness.owner)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    harness.create_meeting(MeetingType::Scheduled).await;
    harness.create_meeting(MeetingType::Scheduled).await;

    let meetings = harness
        .engine
        .list_meetings_by_room(&harness.room_id)
        .await
        .unwrap();
    assert_eq!(meetings.len(), 3);
}

#[tokio::test]
async fn test_concurrent_permanent_creation_yields_one_meeting() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;

    let (first, second) = tokio::join!(
        harness
            .engine
            .create_meeting(&harness.room_id, MeetingType::Permanent, &harness.owner),
        harness
            .engine
            .create_meeting(&harness.room_id, MeetingType::Permanent, &alice),
    );

    assert_eq!(
        [first.is_ok(), second.is_ok()]
            .iter()
            .filter(|ok| **ok)
            .count(),
        1
    );
    assert_eq!(harness.store.meetings().len(), 1);
}

// ============================================================================
// Start and stop
// ============================================================================

#[tokio::test]
async fn test_start_creates_rooms_with_configured_settings() {
    let harness = EngineHarness::builder()
        .room_settings(RoomSettings {
            sampling_rate: 48_000,
            video_codecs: vec!["vp9".to_string(), "av1".to_string()],
            ..RoomSettings::default()
        })
        .build()
        .await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;

    let started = harness
        .engine
        .update_meeting(&meeting.id, true, &harness.owner)
        .await
        .unwrap();
    assert!(started.active);

    let creates = harness.videoserver.messages("create");
    assert_eq!(creates.len(), 2);
    let audio = creates[0].body.as_ref().unwrap();
    assert_eq!(audio["room"], json!(format!("audio_{}", meeting.id)));
    assert_eq!(audio["sampling_rate"], 48_000);
    assert_eq!(audio["audiolevel_event"], true);
    let video = creates[1].body.as_ref().unwrap();
    assert_eq!(video["room"], json!(format!("video_{}", meeting.id)));
    assert_eq!(video["videocodec"], "vp9,av1");

    let record = harness.store.gateway_meetings().pop().unwrap();
    assert_eq!(record.meeting_id, meeting.id);
    assert_eq!(record.audio_room_id, format!("audio_{}", meeting.id));
    harness.assert_gateway_consistent(&meeting).await;

    assert!(harness
        .sink
        .names_for_user(&harness.owner.user_id)
        .contains(&"MeetingStarted"));
}

#[tokio::test]
async fn test_update_to_current_state_is_a_no_op() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;

    let unchanged = harness
        .engine
        .update_meeting(&meeting.id, false, &harness.owner)
        .await
        .unwrap();
    assert!(!unchanged.active);

    harness
        .engine
        .update_meeting(&meeting.id, true, &harness.owner)
        .await
        .unwrap();
    harness.videoserver.clear_calls();
    harness
        .engine
        .update_meeting(&meeting.id, true, &harness.owner)
        .await
        .unwrap();

    assert!(harness.videoserver.calls().is_empty());
    assert_eq!(
        harness
            .sink
            .count_for_user(&harness.owner.user_id, "MeetingStarted"),
        1
    );
}

#[tokio::test]
async fn test_stop_evicts_participants_then_tears_down_videoserver() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness.join(&meeting, &alice).await;

    let stopped = harness
        .engine
        .update_meeting(&meeting.id, false, &harness.owner)
        .await
        .unwrap();

    assert!(!stopped.active);
    assert!(harness.store.participants().is_empty());
    assert!(harness.store.gateway_meetings().is_empty());
    harness.assert_gateway_consistent(&meeting).await;

    // Participant connection and meeting connection
    assert_eq!(harness.videoserver.verb_count("destroy"), 2);
    assert_eq!(harness.videoserver.messages("destroy").len(), 2);

    let names = harness.sink.names_for_user(&harness.owner.user_id);
    let left = names.iter().position(|n| *n == "ParticipantLeft").unwrap();
    let stopped_at = names.iter().position(|n| *n == "MeetingStopped").unwrap();
    assert!(left < stopped_at);
    assert!(harness
        .sink
        .events_for_user(&alice.user_id)
        .contains(&DomainEvent::ParticipantLeft {
            meeting_id: meeting.id,
            user_id: alice.user_id,
            reason: LeaveReason::MeetingEnded,
        }));
}

#[tokio::test]
async fn test_stop_tolerates_rooms_already_gone() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness
        .engine
        .update_meeting(&meeting.id, true, &harness.owner)
        .await
        .unwrap();

    // Video room answers with its no-such-room code, then the audio room
    harness.videoserver.fail_message_times("destroy", 426, 1);
    harness.videoserver.fail_message_times("destroy", 485, 1);
    let stopped = harness
        .engine
        .update_meeting(&meeting.id, false, &harness.owner)
        .await
        .unwrap();

    assert!(!stopped.active);
    assert_eq!(harness.videoserver.verb_count("detach"), 2);
    harness.assert_gateway_consistent(&meeting).await;
}

#[tokio::test]
async fn test_stop_retry_after_partial_teardown_completes() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness
        .engine
        .update_meeting(&meeting.id, true, &harness.owner)
        .await
        .unwrap();

    // Video room goes away, then the audio room destroy fails
    harness.videoserver.fail_message_times("destroy", 426, 1);
    harness.videoserver.fail_message_times("destroy", 500, 1);
    let err = harness
        .engine
        .update_meeting(&meeting.id, false, &harness.owner)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Gateway(GatewayError::Rejected { code: 500, .. })
    ));
    assert!(harness.meeting(&meeting).await.active);
    harness.assert_gateway_consistent(&meeting).await;

    // The video handle and the connection are no longer known
    harness.videoserver.fail_verb("detach", 459);
    harness.videoserver.fail_verb("destroy", 458);
    let stopped = harness
        .engine
        .update_meeting(&meeting.id, false, &harness.owner)
        .await
        .unwrap();

    assert!(!stopped.active);
    assert!(harness.store.gateway_meetings().is_empty());
    assert_eq!(
        harness
            .sink
            .count_for_user(&harness.owner.user_id, "MeetingStopped"),
        1
    );
    harness.assert_gateway_consistent(&meeting).await;
}

#[tokio::test]
async fn test_failed_start_leaves_meeting_inactive() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness.videoserver.fail_message("create", 486);

    let err = harness
        .engine
        .update_meeting(&meeting.id, true, &harness.owner)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Gateway(GatewayError::Rejected { code: 486, .. })
    ));
    assert_eq!(err.status_code(), 502);
    assert!(!harness.meeting(&meeting).await.active);
    harness.assert_gateway_consistent(&meeting).await;
}

#[tokio::test]
async fn test_unavailable_videoserver_is_retryable() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness.videoserver.set_unavailable(true);

    let err = harness
        .engine
        .update_meeting(&meeting.id, true, &harness.owner)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    harness.videoserver.set_unavailable(false);
    let started = harness
        .engine
        .update_meeting(&meeting.id, true, &harness.owner)
        .await
        .unwrap();
    assert!(started.active);
}

#[tokio::test]
async fn test_outsider_cannot_start_meeting() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;

    let err = harness
        .engine
        .update_meeting(&meeting.id, true, &harness.outsider())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Forbidden(_)));
    assert!(harness.videoserver.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_meeting_does_not_keep_an_actor() {
    let harness = EngineHarness::start().await;

    let err = harness
        .engine
        .update_meeting(&MeetingId::new(), true, &harness.owner)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::MeetingNotFound(_)));
    assert_eq!(err.status_code(), 404);
    assert_eq!(harness.engine.actor_count(), 0);
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn test_owner_deletes_active_meeting() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;
    harness.join(&meeting, &alice).await;

    harness
        .engine
        .delete_meeting(&meeting.id, &harness.owner)
        .await
        .unwrap();

    assert!(harness.store.meetings().is_empty());
    assert!(harness.store.participants().is_empty());
    assert!(harness.store.gateway_meetings().is_empty());
    assert!(harness.store.gateway_sessions().is_empty());
    assert_eq!(harness.engine.actor_count(), 0);

    let names = harness.sink.names_for_user(&alice.user_id);
    assert_eq!(
        &names[names.len() - 3..],
        &["ParticipantLeft", "MeetingStopped", "MeetingDeleted"]
    );

    let err = harness.engine.get_meeting(&meeting.id).await.unwrap_err();
    assert!(matches!(err, EngineError::MeetingNotFound(_)));
}

#[tokio::test]
async fn test_member_cannot_delete_meeting() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let meeting = harness.create_meeting(MeetingType::Permanent).await;

    let err = harness
        .engine
        .delete_meeting(&meeting.id, &alice)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Forbidden(_)));
    assert_eq!(harness.store.meetings().len(), 1);
}

#[tokio::test]
async fn test_delete_rejects_queued_users() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Scheduled).await;
    let guest = harness.outsider();

    let outcome = harness
        .engine
        .insert_participant(
            &meeting.id,
            JoinSettings::default(),
            &guest.user_id,
            &guest.session_id,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, JoinOutcome::Queued(_)));

    harness
        .engine
        .delete_meeting(&meeting.id, &harness.owner)
        .await
        .unwrap();

    assert!(harness.store.waiting_entries().is_empty());
    assert!(harness.sink.deliveries().iter().any(|d| {
        d.destination == Destination::Session(guest.session_id)
            && d.event
                == DomainEvent::WaitingParticipantRejected {
                    meeting_id: meeting.id,
                    user_id: guest.user_id,
                }
    }));
}

#[tokio::test]
async fn test_room_deletion_removes_every_meeting() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let permanent = harness.create_meeting(MeetingType::Permanent).await;
    harness.create_meeting(MeetingType::Scheduled).await;
    harness.join(&permanent, &alice).await;

    harness
        .engine
        .delete_meetings_for_room(&harness.room_id)
        .await
        .unwrap();

    assert!(harness.store.meetings().is_empty());
    assert!(harness.store.gateway_meetings().is_empty());
    assert_eq!(
        harness
            .sink
            .count_for_user(&harness.owner.user_id, "MeetingDeleted"),
        2
    );
    assert_eq!(harness.engine.actor_count(), 0);
}
