//! Integration tests for waiting-room admission to scheduled meetings.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::clock::Clock;
use common::types::{MeetingId, SessionId};
use engine_test_utils::EngineHarness;
use meeting_engine::events::DomainEvent;
use meeting_engine::models::{
    JoinOutcome, JoinSettings, MeetingType, QueueDecision, QueueStatus, Requester,
    WaitingParticipant,
};
use meeting_engine::repositories::RoomDirectory;
use meeting_engine::EngineError;

async fn enqueue(
    harness: &EngineHarness,
    meeting_id: &MeetingId,
    guest: &Requester,
) -> WaitingParticipant {
    let outcome = harness
        .engine
        .insert_participant(
            meeting_id,
            JoinSettings::default(),
            &guest.user_id,
            &guest.session_id,
        )
        .await
        .unwrap();
    match outcome {
        JoinOutcome::Queued(entry) => entry,
        JoinOutcome::Joined(participant) => {
            panic!("expected to be queued, joined: {participant:?}")
        }
    }
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_scheduled_meeting_admission() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let meeting = harness.create_meeting(MeetingType::Scheduled).await;
    let guest = harness.outsider();

    // Guest is queued; nothing starts
    let entry = enqueue(&harness, &meeting.id, &guest).await;
    assert_eq!(entry.status, QueueStatus::Waiting);
    assert_eq!(entry.session_id, guest.session_id);
    assert_eq!(entry.created_at, harness.clock.now());
    assert!(!harness.meeting(&meeting).await.active);
    assert!(harness.videoserver.calls().is_empty());

    // Only owners hear about it
    assert_eq!(
        harness
            .sink
            .count_for_user(&harness.owner.user_id, "WaitingParticipantJoined"),
        1
    );
    assert_eq!(
        harness
            .sink
            .count_for_user(&alice.user_id, "WaitingParticipantJoined"),
        0
    );

    // Only owners see the queue
    assert_eq!(
        harness
            .engine
            .get_queue(&meeting.id, &harness.owner)
            .await
            .unwrap(),
        vec![guest.user_id]
    );
    for requester in [&alice, &guest] {
        let err = harness
            .engine
            .get_queue(&meeting.id, requester)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    // Members cannot admit
    let err = harness
        .engine
        .update_queue(&meeting.id, &guest.user_id, QueueDecision::Accept, &alice)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    harness
        .engine
        .update_queue(
            &meeting.id,
            &guest.user_id,
            QueueDecision::Accept,
            &harness.owner,
        )
        .await
        .unwrap();

    let accepted = DomainEvent::WaitingParticipantAccepted {
        meeting_id: meeting.id,
        user_id: guest.user_id,
    };
    assert!(harness
        .sink
        .events_for_user(&harness.owner.user_id)
        .contains(&accepted));
    assert_eq!(
        harness.sink.events_for_session(&guest.session_id),
        vec![accepted]
    );
    assert!(harness
        .rooms
        .is_member(&harness.room_id, &guest.user_id)
        .await
        .unwrap());
    assert!(harness.store.waiting_entries().is_empty());
    assert!(harness
        .engine
        .get_queue(&meeting.id, &harness.owner)
        .await
        .unwrap()
        .is_empty());

    // Admitted guest now joins and starts the meeting
    let participant = harness.join(&meeting, &guest).await;
    assert_eq!(participant.user_id, guest.user_id);
    assert!(harness.meeting(&meeting).await.active);
    harness.assert_gateway_consistent(&meeting).await;

    // Scheduled joins are announced to the joiner only
    assert_eq!(
        harness
            .sink
            .count_for_user(&guest.user_id, "ParticipantJoined"),
        1
    );
    assert_eq!(
        harness
            .sink
            .count_for_user(&harness.owner.user_id, "ParticipantJoined"),
        0
    );
}

#[tokio::test]
async fn test_members_skip_the_queue() {
    let harness = EngineHarness::start().await;
    let alice = harness.add_member().await;
    let meeting = harness.create_meeting(MeetingType::Scheduled).await;

    harness.join(&meeting, &alice).await;

    assert!(harness.store.waiting_entries().is_empty());
    assert!(harness.meeting(&meeting).await.active);
}

#[tokio::test]
async fn test_queue_keeps_arrival_order() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Scheduled).await;
    let first = harness.outsider();
    let second = harness.outsider();

    enqueue(&harness, &meeting.id, &first).await;
    harness.clock.advance_secs(5);
    enqueue(&harness, &meeting.id, &second).await;

    assert_eq!(
        harness
            .engine
            .get_queue(&meeting.id, &harness.owner)
            .await
            .unwrap(),
        vec![first.user_id, second.user_id]
    );

    harness
        .engine
        .update_queue(
            &meeting.id,
            &first.user_id,
            QueueDecision::Reject,
            &harness.owner,
        )
        .await
        .unwrap();
    assert_eq!(
        harness
            .engine
            .get_queue(&meeting.id, &harness.owner)
            .await
            .unwrap(),
        vec![second.user_id]
    );
}

#[tokio::test]
async fn test_failed_admission_keeps_user_queued() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Scheduled).await;
    let guest = harness.outsider();
    let entry = enqueue(&harness, &meeting.id, &guest).await;

    harness.rooms.set_admissions_failing(true);
    let err = harness
        .engine
        .update_queue(
            &meeting.id,
            &guest.user_id,
            QueueDecision::Accept,
            &harness.owner,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
    assert_eq!(harness.store.waiting_entries(), vec![entry]);
    assert!(harness.sink.events_for_session(&guest.session_id).is_empty());

    // Accepting again once the directory recovers admits the user
    harness.rooms.set_admissions_failing(false);
    harness
        .engine
        .update_queue(
            &meeting.id,
            &guest.user_id,
            QueueDecision::Accept,
            &harness.owner,
        )
        .await
        .unwrap();
    assert!(harness.store.waiting_entries().is_empty());
    assert!(harness
        .rooms
        .is_member(&harness.room_id, &guest.user_id)
        .await
        .unwrap());
}

// ============================================================================
// Rejection and withdrawal
// ============================================================================

#[tokio::test]
async fn test_queued_user_may_withdraw_but_not_self_admit() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Scheduled).await;
    let guest = harness.outsider();
    enqueue(&harness, &meeting.id, &guest).await;

    let err = harness
        .engine
        .update_queue(&meeting.id, &guest.user_id, QueueDecision::Accept, &guest)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    harness
        .engine
        .update_queue(&meeting.id, &guest.user_id, QueueDecision::Reject, &guest)
        .await
        .unwrap();

    let rejected = DomainEvent::WaitingParticipantRejected {
        meeting_id: meeting.id,
        user_id: guest.user_id,
    };
    assert!(harness
        .sink
        .events_for_user(&harness.owner.user_id)
        .contains(&rejected));
    assert_eq!(
        harness.sink.events_for_session(&guest.session_id),
        vec![rejected]
    );
    assert!(harness.store.waiting_entries().is_empty());
    assert!(!harness
        .rooms
        .is_member(&harness.room_id, &guest.user_id)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_deciding_without_entry_is_not_found() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Scheduled).await;
    let stranger = harness.outsider();

    let err = harness
        .engine
        .update_queue(
            &meeting.id,
            &stranger.user_id,
            QueueDecision::Accept,
            &harness.owner,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::WaitingEntryNotFound(_)));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_disconnect_rejects_queued_session() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Scheduled).await;
    let guest = harness.outsider();
    enqueue(&harness, &meeting.id, &guest).await;

    harness
        .engine
        .remove_from_queue(&guest.session_id)
        .await
        .unwrap();
    // Unknown sessions are ignored
    harness
        .engine
        .remove_from_queue(&SessionId::new())
        .await
        .unwrap();

    assert!(harness.store.waiting_entries().is_empty());
    assert_eq!(
        harness
            .sink
            .count_for_user(&harness.owner.user_id, "WaitingParticipantRejected"),
        1
    );
}

// ============================================================================
// Session clashes
// ============================================================================

#[tokio::test]
async fn test_requeue_from_new_session_moves_entry() {
    let harness = EngineHarness::start().await;
    let meeting = harness.create_meeting(MeetingType::Scheduled).await;
    let guest = harness.outsider();
    let first = enqueue(&harness, &meeting.id, &guest).await;

    // Same session again is a no-op
    let again = enqueue(&harness, &meeting.id, &guest).await;
    assert_eq!(again, first);

    let moved_to = Requester::new(guest.user_id, SessionId::new());
    let moved = enqueue(&harness, &meeting.id, &moved_to).await;

    assert_eq!(moved.id, first.id);
    assert_eq!(moved.session_id, moved_to.session_id);
    assert_eq!(
        harness.sink.events_for_session(&guest.session_id),
        vec![DomainEvent::WaitingParticipantClashed {
            meeting_id: meeting.id,
            user_id: guest.user_id,
        }]
    );
    assert_eq!(harness.store.waiting_entries(), vec![moved]);
    assert_eq!(
        harness
            .sink
            .count_for_user(&harness.owner.user_id, "WaitingParticipantJoined"),
        1
    );

    // The decision reaches the new session only
    harness
        .engine
        .update_queue(
            &meeting.id,
            &guest.user_id,
            QueueDecision::Accept,
            &harness.owner,
        )
        .await
        .unwrap();
    assert_eq!(
        harness.sink.names_for_session(&moved_to.session_id),
        vec!["WaitingParticipantAccepted"]
    );
    assert_eq!(
        harness.sink.names_for_session(&guest.session_id),
        vec!["WaitingParticipantClashed"]
    );
}
