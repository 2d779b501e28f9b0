//! Meeting, participant and videoserver records.
//!
//! Records are plain values. Mutation happens through struct-update copies
//! (`Participant { audio_stream_on: true, ..participant }`) and the result is
//! written back through the owning store.

use chrono::{DateTime, Utc};
use common::types::{MeetingId, RoomId, SessionId, UserId, WaitingId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How members reach a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeetingType {
    /// Open to every room member. At most one per room.
    Permanent,
    /// Users outside the room are admitted through the waiting room.
    Scheduled,
}

/// A meeting attached to a chat room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: MeetingId,
    pub room_id: RoomId,
    pub meeting_type: MeetingType,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// One live client connection of a user inside a meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub meeting_id: MeetingId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub audio_stream_on: bool,
    pub video_stream_on: bool,
    pub screen_stream_on: bool,
    /// Present while the hand is raised; orders the raised-hands list.
    pub hand_raised_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Participant {
    /// Whether the given stream is currently published.
    #[must_use]
    pub fn stream_on(&self, media_type: MediaType) -> bool {
        match media_type {
            MediaType::Video => self.video_stream_on,
            MediaType::Screen => self.screen_stream_on,
        }
    }
}

/// Admission state of a waiting-room entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Waiting,
    Accepted,
    Rejected,
}

/// A user waiting for admission to a scheduled meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingParticipant {
    pub id: WaitingId,
    pub meeting_id: MeetingId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
}

/// Moderator decision on a waiting-room entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueDecision {
    Accept,
    Reject,
}

/// Videoserver resources backing an active meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMeeting {
    pub meeting_id: MeetingId,
    pub connection_id: String,
    pub audio_handle_id: String,
    pub video_handle_id: String,
    pub audio_room_id: String,
    pub video_room_id: String,
}

/// Videoserver resources backing one live participant.
///
/// Handles are allocated lazily: the audio handle on the first audio offer,
/// the video-in handle on the first subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySession {
    pub meeting_id: MeetingId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub connection_id: String,
    pub audio_handle_id: Option<String>,
    pub video_in_handle_id: Option<String>,
    pub video_out_handle_id: Option<String>,
    pub screen_handle_id: Option<String>,
    pub audio_stream_on: bool,
    pub video_in_stream_on: bool,
    pub video_out_stream_on: bool,
    pub screen_stream_on: bool,
}

impl GatewaySession {
    /// Whether the given published stream is on.
    #[must_use]
    pub fn stream_on(&self, media_type: MediaType) -> bool {
        match media_type {
            MediaType::Video => self.video_out_stream_on,
            MediaType::Screen => self.screen_stream_on,
        }
    }

    /// Handle carrying the given published stream.
    #[must_use]
    pub fn publisher_handle(&self, media_type: MediaType) -> Option<&str> {
        match media_type {
            MediaType::Video => self.video_out_handle_id.as_deref(),
            MediaType::Screen => self.screen_handle_id.as_deref(),
        }
    }
}

/// Published stream kinds. Audio is mixed separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
    Video,
    Screen,
}

impl MediaType {
    /// Suffix used in videoserver feed ids.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Screen => "screen",
        }
    }
}

/// A published stream in the video room, rendered as `"<userId>/<video|screen>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedId {
    pub user_id: UserId,
    pub media_type: MediaType,
}

impl FeedId {
    #[must_use]
    pub fn new(user_id: UserId, media_type: MediaType) -> Self {
        Self {
            user_id,
            media_type,
        }
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.media_type.as_str())
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Requester {
    pub user_id: UserId,
    pub session_id: SessionId,
}

impl Requester {
    #[must_use]
    pub fn new(user_id: UserId, session_id: SessionId) -> Self {
        Self {
            user_id,
            session_id,
        }
    }
}

/// Initial stream state requested on join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSettings {
    pub audio: bool,
    pub video: bool,
    pub screen: bool,
}

/// Request to publish or unpublish a video or screen stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStreamSettings {
    pub media_type: MediaType,
    pub enabled: bool,
    /// SDP offer, required when enabling.
    pub sdp: Option<String>,
    pub user_to_moderate: Option<UserId>,
}

/// Request to mute or unmute a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamSettings {
    pub enabled: bool,
    pub user_to_moderate: Option<UserId>,
}

/// Request to raise or lower a hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandStatusSettings {
    pub raised: bool,
    pub user_to_moderate: Option<UserId>,
}

/// Feeds to add to and remove from a participant's subscriber handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionUpdates {
    pub subscribe: Vec<FeedId>,
    pub unsubscribe: Vec<FeedId>,
}

impl SubscriptionUpdates {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Result of a join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The caller is now a live participant.
    Joined(Participant),
    /// The caller waits for a room owner to admit them.
    Queued(WaitingParticipant),
}

/// Why a participant left a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaveReason {
    /// The participant asked to leave.
    Left,
    /// The client connection went away.
    Disconnected,
    /// The same user joined from another session.
    Clashed,
    /// The meeting was stopped or deleted.
    MeetingEnded,
}

impl LeaveReason {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::Left => "left",
            LeaveReason::Disconnected => "disconnected",
            LeaveReason::Clashed => "clashed",
            LeaveReason::MeetingEnded => "meeting_ended",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_feed_id_format() {
        let user = UserId(Uuid::nil());
        assert_eq!(
            FeedId::new(user, MediaType::Video).to_string(),
            "00000000-0000-0000-0000-000000000000/video"
        );
        assert_eq!(
            FeedId::new(user, MediaType::Screen).to_string(),
            "00000000-0000-0000-0000-000000000000/screen"
        );
    }

    #[test]
    fn test_struct_update_keeps_equality_by_field() {
        let now = Utc::now();
        let participant = Participant {
            meeting_id: MeetingId::new(),
            user_id: UserId::new(),
            session_id: SessionId::new(),
            audio_stream_on: false,
            video_stream_on: false,
            screen_stream_on: false,
            hand_raised_at: None,
            created_at: now,
            updated_at: now,
        };

        let unmuted = Participant {
            audio_stream_on: true,
            ..participant.clone()
        };
        assert_ne!(unmuted, participant);
        assert_eq!(
            Participant {
                audio_stream_on: false,
                ..unmuted
            },
            participant
        );
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&MeetingType::Scheduled).unwrap(),
            "\"SCHEDULED\""
        );
        assert_eq!(
            serde_json::to_string(&QueueStatus::Waiting).unwrap(),
            "\"WAITING\""
        );
        assert_eq!(serde_json::to_string(&MediaType::Screen).unwrap(), "\"SCREEN\"");
    }

    #[test]
    fn test_subscription_updates_empty() {
        assert!(SubscriptionUpdates::default().is_empty());
        assert!(!SubscriptionUpdates {
            subscribe: vec![FeedId::new(UserId::new(), MediaType::Video)],
            unsubscribe: vec![],
        }
        .is_empty());
    }
}
