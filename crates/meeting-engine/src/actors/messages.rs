//! Messages accepted by a meeting actor.
//!
//! Every message carries a `respond_to` channel. The actor answers exactly
//! once, after the whole operation (videoserver calls, persistence and
//! events) completed.

use crate::errors::EngineError;
use crate::models::{
    AudioStreamSettings, HandStatusSettings, JoinOutcome, JoinSettings, MediaStreamSettings,
    Meeting, QueueDecision, Requester, SubscriptionUpdates,
};
use crate::services::ReconcileReport;
use common::types::{SessionId, UserId};
use tokio::sync::oneshot;

/// Reply channel for a meeting operation.
pub type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

#[derive(Debug)]
pub enum MeetingMessage {
    UpdateMeeting {
        active: bool,
        requester: Requester,
        respond_to: Reply<Meeting>,
    },
    /// `requester` is `None` on the room-deleted path.
    DeleteMeeting {
        requester: Option<Requester>,
        respond_to: Reply<()>,
    },
    InsertParticipant {
        settings: JoinSettings,
        user_id: UserId,
        session_id: SessionId,
        respond_to: Reply<JoinOutcome>,
    },
    RemoveParticipant {
        user_id: UserId,
        respond_to: Reply<()>,
    },
    RemoveParticipantBySession {
        session_id: SessionId,
        respond_to: Reply<()>,
    },
    UpdateMediaStream {
        settings: MediaStreamSettings,
        requester: Requester,
        respond_to: Reply<()>,
    },
    UpdateAudioStream {
        settings: AudioStreamSettings,
        requester: Requester,
        respond_to: Reply<()>,
    },
    UpdateHandStatus {
        settings: HandStatusSettings,
        requester: Requester,
        respond_to: Reply<()>,
    },
    OfferRtcAudioStream {
        sdp: String,
        requester: Requester,
        respond_to: Reply<()>,
    },
    AnswerRtcMediaStream {
        sdp: String,
        requester: Requester,
        respond_to: Reply<()>,
    },
    UpdateSubscriptions {
        updates: SubscriptionUpdates,
        requester: Requester,
        respond_to: Reply<()>,
    },
    UpdateQueue {
        target: UserId,
        decision: QueueDecision,
        requester: Requester,
        respond_to: Reply<()>,
    },
    RemoveFromQueue {
        session_id: SessionId,
        respond_to: Reply<()>,
    },
    Reconcile {
        respond_to: Reply<ReconcileReport>,
    },
}

impl MeetingMessage {
    /// Operation label for logs and metrics.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            MeetingMessage::UpdateMeeting { .. } => "update_meeting",
            MeetingMessage::DeleteMeeting { .. } => "delete_meeting",
            MeetingMessage::InsertParticipant { .. } => "insert_participant",
            MeetingMessage::RemoveParticipant { .. } => "remove_participant",
            MeetingMessage::RemoveParticipantBySession { .. } => "remove_participant_by_session",
            MeetingMessage::UpdateMediaStream { .. } => "update_media_stream",
            MeetingMessage::UpdateAudioStream { .. } => "update_audio_stream",
            MeetingMessage::UpdateHandStatus { .. } => "update_hand_status",
            MeetingMessage::OfferRtcAudioStream { .. } => "offer_rtc_audio_stream",
            MeetingMessage::AnswerRtcMediaStream { .. } => "answer_rtc_media_stream",
            MeetingMessage::UpdateSubscriptions { .. } => "update_subscriptions_media_stream",
            MeetingMessage::UpdateQueue { .. } => "update_queue",
            MeetingMessage::RemoveFromQueue { .. } => "remove_from_queue",
            MeetingMessage::Reconcile { .. } => "reconcile",
        }
    }
}
