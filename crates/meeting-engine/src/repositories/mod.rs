//! Persistence and room collaborators.
//!
//! The engine owns no storage technology. Every record lives behind one of
//! these traits; failures surface as [`EngineError::Store`]. `memory`
//! provides in-process implementations used by the binary and the tests.

pub mod memory;

use crate::errors::EngineError;
use crate::models::{GatewayMeeting, GatewaySession, Meeting, Participant, WaitingParticipant};
use async_trait::async_trait;
use common::types::{MeetingId, RoomId, SessionId, UserId, WaitingId};

pub use memory::{InMemoryRoomDirectory, InMemoryStore};

#[async_trait]
pub trait MeetingStore: Send + Sync {
    async fn get(&self, id: &MeetingId) -> Result<Option<Meeting>, EngineError>;
    async fn list_by_room(&self, room_id: &RoomId) -> Result<Vec<Meeting>, EngineError>;
    async fn list(&self) -> Result<Vec<Meeting>, EngineError>;
    async fn insert(&self, meeting: &Meeting) -> Result<(), EngineError>;
    async fn update(&self, meeting: &Meeting) -> Result<(), EngineError>;
    async fn delete(&self, id: &MeetingId) -> Result<(), EngineError>;
}

#[async_trait]
pub trait ParticipantStore: Send + Sync {
    async fn get(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<Option<Participant>, EngineError>;

    /// A session belongs to at most one live participant.
    async fn get_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Participant>, EngineError>;

    /// Participants of a meeting, oldest first.
    async fn list_by_meeting(&self, meeting_id: &MeetingId)
        -> Result<Vec<Participant>, EngineError>;

    async fn insert(&self, participant: &Participant) -> Result<(), EngineError>;
    async fn update(&self, participant: &Participant) -> Result<(), EngineError>;
    async fn delete(&self, meeting_id: &MeetingId, user_id: &UserId) -> Result<(), EngineError>;
    async fn delete_by_meeting(&self, meeting_id: &MeetingId) -> Result<(), EngineError>;
}

#[async_trait]
pub trait WaitingStore: Send + Sync {
    async fn insert(&self, entry: &WaitingParticipant) -> Result<(), EngineError>;

    async fn get(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<Option<WaitingParticipant>, EngineError>;

    async fn get_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<WaitingParticipant>, EngineError>;

    /// Entries of a meeting in insertion order.
    async fn list_by_meeting(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<WaitingParticipant>, EngineError>;

    async fn update(&self, entry: &WaitingParticipant) -> Result<(), EngineError>;
    async fn delete(&self, id: &WaitingId) -> Result<(), EngineError>;
}

#[async_trait]
pub trait GatewayMeetingStore: Send + Sync {
    async fn get(&self, meeting_id: &MeetingId) -> Result<Option<GatewayMeeting>, EngineError>;
    async fn insert(&self, record: &GatewayMeeting) -> Result<(), EngineError>;
    async fn delete(&self, meeting_id: &MeetingId) -> Result<(), EngineError>;
    async fn list(&self) -> Result<Vec<GatewayMeeting>, EngineError>;
}

#[async_trait]
pub trait GatewaySessionStore: Send + Sync {
    async fn get(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<Option<GatewaySession>, EngineError>;
    async fn insert(&self, record: &GatewaySession) -> Result<(), EngineError>;
    async fn update(&self, record: &GatewaySession) -> Result<(), EngineError>;
    async fn delete(&self, meeting_id: &MeetingId, user_id: &UserId) -> Result<(), EngineError>;
    async fn list_by_meeting(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<GatewaySession>, EngineError>;
}

/// Room membership, owned by the chat room service.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn is_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool, EngineError>;
    async fn is_owner(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool, EngineError>;
    async fn member_ids(&self, room_id: &RoomId) -> Result<Vec<UserId>, EngineError>;
    async fn owner_ids(&self, room_id: &RoomId) -> Result<Vec<UserId>, EngineError>;
    async fn add_member(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        owner: bool,
        history_cleared: bool,
    ) -> Result<(), EngineError>;
}
