//! Domain events delivered to clients.
//!
//! Events serialize with a `type` tag carrying the variant name and
//! camelCase payload fields. Room events belong to the room collaborator;
//! they are defined here so every client-facing event shares one schema.

use crate::gateway::protocol::Jsep;
use crate::models::{LeaveReason, MediaType, Meeting, Participant};
use chrono::{DateTime, Utc};
use common::types::{MeetingId, RoomId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum DomainEvent {
    RoomCreated {
        room_id: RoomId,
    },
    RoomUpdated {
        room_id: RoomId,
    },
    RoomDeleted {
        room_id: RoomId,
    },
    RoomMemberAdded {
        room_id: RoomId,
        user_id: UserId,
    },
    RoomMemberRemoved {
        room_id: RoomId,
        user_id: UserId,
    },
    RoomOwnerPromoted {
        room_id: RoomId,
        user_id: UserId,
    },
    RoomOwnerDemoted {
        room_id: RoomId,
        user_id: UserId,
    },
    RoomMuted {
        room_id: RoomId,
        user_id: UserId,
    },
    RoomUnmuted {
        room_id: RoomId,
        user_id: UserId,
    },
    RoomHistoryCleared {
        room_id: RoomId,
        user_id: UserId,
    },

    MeetingCreated {
        meeting: Meeting,
    },
    MeetingStarted {
        meeting_id: MeetingId,
        room_id: RoomId,
    },
    MeetingStopped {
        meeting_id: MeetingId,
        room_id: RoomId,
    },
    MeetingDeleted {
        meeting_id: MeetingId,
        room_id: RoomId,
    },

    ParticipantJoined {
        participant: Participant,
    },
    ParticipantLeft {
        meeting_id: MeetingId,
        user_id: UserId,
        reason: LeaveReason,
    },
    /// Sent only to the session that was replaced by a newer one.
    ParticipantClashed {
        meeting_id: MeetingId,
        user_id: UserId,
    },

    AudioStreamChanged {
        meeting_id: MeetingId,
        user_id: UserId,
        enabled: bool,
        moderator_id: Option<UserId>,
    },
    MediaStreamChanged {
        meeting_id: MeetingId,
        user_id: UserId,
        media_type: MediaType,
        enabled: bool,
        moderator_id: Option<UserId>,
    },

    HandRaised {
        meeting_id: MeetingId,
        user_id: UserId,
        raised: bool,
        raised_at: Option<DateTime<Utc>>,
        moderator_id: Option<UserId>,
    },
    /// Every raised hand, earliest first.
    HandRaisedList {
        meeting_id: MeetingId,
        user_ids: Vec<UserId>,
    },

    WaitingParticipantJoined {
        meeting_id: MeetingId,
        user_id: UserId,
    },
    WaitingParticipantAccepted {
        meeting_id: MeetingId,
        user_id: UserId,
    },
    WaitingParticipantRejected {
        meeting_id: MeetingId,
        user_id: UserId,
    },
    WaitingParticipantClashed {
        meeting_id: MeetingId,
        user_id: UserId,
    },

    /// Subscriber offer from the videoserver, to be answered by the client.
    SdpOffered {
        meeting_id: MeetingId,
        jsep: Jsep,
    },
    /// Videoserver answer to a publish offer.
    SdpAnswered {
        meeting_id: MeetingId,
        media_type: MediaType,
        jsep: Jsep,
    },
    /// Videoserver answer to an audio room offer.
    AudioAnswered {
        meeting_id: MeetingId,
        jsep: Jsep,
    },
}

impl DomainEvent {
    /// Variant name, as carried in the `type` tag.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::RoomCreated { .. } => "RoomCreated",
            DomainEvent::RoomUpdated { .. } => "RoomUpdated",
            DomainEvent::RoomDeleted { .. } => "RoomDeleted",
            DomainEvent::RoomMemberAdded { .. } => "RoomMemberAdded",
            DomainEvent::RoomMemberRemoved { .. } => "RoomMemberRemoved",
            DomainEvent::RoomOwnerPromoted { .. } => "RoomOwnerPromoted",
            DomainEvent::RoomOwnerDemoted { .. } => "RoomOwnerDemoted",
            DomainEvent::RoomMuted { .. } => "RoomMuted",
            DomainEvent::RoomUnmuted { .. } => "RoomUnmuted",
            DomainEvent::RoomHistoryCleared { .. } => "RoomHistoryCleared",
            DomainEvent::MeetingCreated { .. } => "MeetingCreated",
            DomainEvent::MeetingStarted { .. } => "MeetingStarted",
            DomainEvent::MeetingStopped { .. } => "MeetingStopped",
            DomainEvent::MeetingDeleted { .. } => "MeetingDeleted",
            DomainEvent::ParticipantJoined { .. } => "ParticipantJoined",
            DomainEvent::ParticipantLeft { .. } => "ParticipantLeft",
            DomainEvent::ParticipantClashed { .. } => "ParticipantClashed",
            DomainEvent::AudioStreamChanged { .. } => "AudioStreamChanged",
            DomainEvent::MediaStreamChanged { .. } => "MediaStreamChanged",
            DomainEvent::HandRaised { .. } => "HandRaised",
            DomainEvent::HandRaisedList { .. } => "HandRaisedList",
            DomainEvent::WaitingParticipantJoined { .. } => "WaitingParticipantJoined",
            DomainEvent::WaitingParticipantAccepted { .. } => "WaitingParticipantAccepted",
            DomainEvent::WaitingParticipantRejected { .. } => "WaitingParticipantRejected",
            DomainEvent::WaitingParticipantClashed { .. } => "WaitingParticipantClashed",
            DomainEvent::SdpOffered { .. } => "SdpOffered",
            DomainEvent::SdpAnswered { .. } => "SdpAnswered",
            DomainEvent::AudioAnswered { .. } => "AudioAnswered",
        }
    }

    /// Meeting the event belongs to, if any.
    #[must_use]
    pub fn meeting_id(&self) -> Option<MeetingId> {
        match self {
            DomainEvent::MeetingCreated { meeting } => Some(meeting.id),
            DomainEvent::ParticipantJoined { participant } => Some(participant.meeting_id),
            DomainEvent::MeetingStarted { meeting_id, .. }
            | DomainEvent::MeetingStopped { meeting_id, .. }
            | DomainEvent::MeetingDeleted { meeting_id, .. }
            | DomainEvent::ParticipantLeft { meeting_id, .. }
            | DomainEvent::ParticipantClashed { meeting_id, .. }
            | DomainEvent::AudioStreamChanged { meeting_id, .. }
            | DomainEvent::MediaStreamChanged { meeting_id, .. }
            | DomainEvent::HandRaised { meeting_id, .. }
            | DomainEvent::HandRaisedList { meeting_id, .. }
            | DomainEvent::WaitingParticipantJoined { meeting_id, .. }
            | DomainEvent::WaitingParticipantAccepted { meeting_id, .. }
            | DomainEvent::WaitingParticipantRejected { meeting_id, .. }
            | DomainEvent::WaitingParticipantClashed { meeting_id, .. }
            | DomainEvent::SdpOffered { meeting_id, .. }
            | DomainEvent::SdpAnswered { meeting_id, .. }
            | DomainEvent::AudioAnswered { meeting_id, .. } => Some(*meeting_id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::gateway::protocol::JsepType;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_event_wire_shape() {
        let meeting_id = MeetingId(Uuid::nil());
        let user_id = UserId(Uuid::nil());

        let event = DomainEvent::AudioStreamChanged {
            meeting_id,
            user_id,
            enabled: true,
            moderator_id: None,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "AudioStreamChanged",
                "meetingId": "00000000-0000-0000-0000-000000000000",
                "userId": "00000000-0000-0000-0000-000000000000",
                "enabled": true,
                "moderatorId": null,
            })
        );
    }

    #[test]
    fn test_hand_raised_list_deserializes() {
        let raw = json!({
            "type": "HandRaisedList",
            "meetingId": Uuid::nil(),
            "userIds": [Uuid::nil()],
        });

        let event: DomainEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.name(), "HandRaisedList");
        assert_eq!(event.meeting_id(), Some(MeetingId(Uuid::nil())));
    }

    #[test]
    fn test_sdp_event_carries_jsep() {
        let event = DomainEvent::SdpOffered {
            meeting_id: MeetingId::new(),
            jsep: Jsep {
                kind: JsepType::Offer,
                sdp: "v=0".to_string(),
            },
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["jsep"], json!({"type": "offer", "sdp": "v=0"}));
    }

    #[test]
    fn test_room_events_have_no_meeting() {
        let event = DomainEvent::RoomMemberAdded {
            room_id: RoomId::new(),
            user_id: UserId::new(),
        };
        assert_eq!(event.meeting_id(), None);
        assert_eq!(event.name(), "RoomMemberAdded");
    }
}
