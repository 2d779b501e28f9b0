//! In-memory store and room directory.
//!
//! Backed by `Arc<Mutex<_>>` so clones share state. Used by the binary when
//! no external store is wired in, and by tests, which can also switch a
//! store into a failing mode to exercise error paths.

use super::{
    GatewayMeetingStore, GatewaySessionStore, MeetingStore, ParticipantStore, RoomDirectory,
    WaitingStore,
};
use crate::errors::EngineError;
use crate::models::{GatewayMeeting, GatewaySession, Meeting, Participant, WaitingParticipant};
use async_trait::async_trait;
use common::types::{MeetingId, RoomId, SessionId, UserId, WaitingId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory implementation of every record store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    failing: bool,
    meetings: Vec<Meeting>,
    /// Insertion order breaks `created_at` ties.
    participants: Vec<Participant>,
    waiting: Vec<WaitingParticipant>,
    gateway_meetings: HashMap<MeetingId, GatewayMeeting>,
    gateway_sessions: HashMap<(MeetingId, UserId), GatewaySession>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with [`EngineError::Store`].
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing = failing;
        }
    }

    /// Snapshot of all meetings.
    #[must_use]
    pub fn meetings(&self) -> Vec<Meeting> {
        self.inner
            .lock()
            .map(|inner| inner.meetings.clone())
            .unwrap_or_default()
    }

    /// Snapshot of all live participants.
    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        self.inner
            .lock()
            .map(|inner| inner.participants.clone())
            .unwrap_or_default()
    }

    /// Snapshot of all waiting-room entries.
    #[must_use]
    pub fn waiting_entries(&self) -> Vec<WaitingParticipant> {
        self.inner
            .lock()
            .map(|inner| inner.waiting.clone())
            .unwrap_or_default()
    }

    /// Snapshot of all gateway meeting records.
    #[must_use]
    pub fn gateway_meetings(&self) -> Vec<GatewayMeeting> {
        self.inner
            .lock()
            .map(|inner| inner.gateway_meetings.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of all gateway session records.
    #[must_use]
    pub fn gateway_sessions(&self) -> Vec<GatewaySession> {
        self.inner
            .lock()
            .map(|inner| inner.gateway_sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, EngineError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| EngineError::Store("in-memory store lock poisoned".to_string()))?;
        if inner.failing {
            return Err(EngineError::Store("in-memory store unavailable".to_string()));
        }
        Ok(inner)
    }
}

#[async_trait]
impl MeetingStore for InMemoryStore {
    async fn get(&self, id: &MeetingId) -> Result<Option<Meeting>, EngineError> {
        Ok(self.lock()?.meetings.iter().find(|m| m.id == *id).cloned())
    }

    async fn list_by_room(&self, room_id: &RoomId) -> Result<Vec<Meeting>, EngineError> {
        Ok(self
            .lock()?
            .meetings
            .iter()
            .filter(|m| m.room_id == *room_id)
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<Meeting>, EngineError> {
        Ok(self.lock()?.meetings.clone())
    }

    async fn insert(&self, meeting: &Meeting) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        if inner.meetings.iter().any(|m| m.id == meeting.id) {
            return Err(EngineError::Store(format!(
                "duplicate meeting {}",
                meeting.id
            )));
        }
        inner.meetings.push(meeting.clone());
        Ok(())
    }

    async fn update(&self, meeting: &Meeting) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        let slot = inner
            .meetings
            .iter_mut()
            .find(|m| m.id == meeting.id)
            .ok_or_else(|| EngineError::Store(format!("meeting {} not stored", meeting.id)))?;
        *slot = meeting.clone();
        Ok(())
    }

    async fn delete(&self, id: &MeetingId) -> Result<(), EngineError> {
        self.lock()?.meetings.retain(|m| m.id != *id);
        Ok(())
    }
}

#[async_trait]
impl ParticipantStore for InMemoryStore {
    async fn get(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<Option<Participant>, EngineError> {
        Ok(self
            .lock()?
            .participants
            .iter()
            .find(|p| p.meeting_id == *meeting_id && p.user_id == *user_id)
            .cloned())
    }

    async fn get_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Participant>, EngineError> {
        Ok(self
            .lock()?
            .participants
            .iter()
            .find(|p| p.session_id == *session_id)
            .cloned())
    }

    async fn list_by_meeting(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<Participant>, EngineError> {
        let mut participants: Vec<Participant> = self
            .lock()?
            .participants
            .iter()
            .filter(|p| p.meeting_id == *meeting_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps
        participants.sort_by_key(|p| p.created_at);
        Ok(participants)
    }

    async fn insert(&self, participant: &Participant) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        if inner
            .participants
            .iter()
            .any(|p| p.meeting_id == participant.meeting_id && p.user_id == participant.user_id)
        {
            return Err(EngineError::Store(format!(
                "duplicate participant {} in meeting {}",
                participant.user_id, participant.meeting_id
            )));
        }
        inner.participants.push(participant.clone());
        Ok(())
    }

    async fn update(&self, participant: &Participant) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        let slot = inner
            .participants
            .iter_mut()
            .find(|p| p.meeting_id == participant.meeting_id && p.user_id == participant.user_id)
            .ok_or_else(|| {
                EngineError::Store(format!(
                    "participant {} not stored in meeting {}",
                    participant.user_id, participant.meeting_id
                ))
            })?;
        *slot = participant.clone();
        Ok(())
    }

    async fn delete(&self, meeting_id: &MeetingId, user_id: &UserId) -> Result<(), EngineError> {
        self.lock()?
            .participants
            .retain(|p| !(p.meeting_id == *meeting_id && p.user_id == *user_id));
        Ok(())
    }

    async fn delete_by_meeting(&self, meeting_id: &MeetingId) -> Result<(), EngineError> {
        self.lock()?
            .participants
            .retain(|p| p.meeting_id != *meeting_id);
        Ok(())
    }
}

#[async_trait]
impl WaitingStore for InMemoryStore {
    async fn insert(&self, entry: &WaitingParticipant) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        if inner.waiting.iter().any(|w| w.id == entry.id) {
            return Err(EngineError::Store(format!(
                "duplicate waiting entry {}",
                entry.id
            )));
        }
        inner.waiting.push(entry.clone());
        Ok(())
    }

    async fn get(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<Option<WaitingParticipant>, EngineError> {
        Ok(self
            .lock()?
            .waiting
            .iter()
            .find(|w| w.meeting_id == *meeting_id && w.user_id == *user_id)
            .cloned())
    }

    async fn get_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<WaitingParticipant>, EngineError> {
        Ok(self
            .lock()?
            .waiting
            .iter()
            .find(|w| w.session_id == *session_id)
            .cloned())
    }

    async fn list_by_meeting(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<WaitingParticipant>, EngineError> {
        Ok(self
            .lock()?
            .waiting
            .iter()
            .filter(|w| w.meeting_id == *meeting_id)
            .cloned()
            .collect())
    }

    async fn update(&self, entry: &WaitingParticipant) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        let slot = inner
            .waiting
            .iter_mut()
            .find(|w| w.id == entry.id)
            .ok_or_else(|| EngineError::Store(format!("waiting entry {} not stored", entry.id)))?;
        *slot = entry.clone();
        Ok(())
    }

    async fn delete(&self, id: &WaitingId) -> Result<(), EngineError> {
        self.lock()?.waiting.retain(|w| w.id != *id);
        Ok(())
    }
}

#[async_trait]
impl GatewayMeetingStore for InMemoryStore {
    async fn get(&self, meeting_id: &MeetingId) -> Result<Option<GatewayMeeting>, EngineError> {
        Ok(self.lock()?.gateway_meetings.get(meeting_id).cloned())
    }

    async fn insert(&self, record: &GatewayMeeting) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        if inner.gateway_meetings.contains_key(&record.meeting_id) {
            return Err(EngineError::Store(format!(
                "duplicate gateway meeting {}",
                record.meeting_id
            )));
        }
        inner
            .gateway_meetings
            .insert(record.meeting_id, record.clone());
        Ok(())
    }

    async fn delete(&self, meeting_id: &MeetingId) -> Result<(), EngineError> {
        self.lock()?.gateway_meetings.remove(meeting_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<GatewayMeeting>, EngineError> {
        Ok(self.lock()?.gateway_meetings.values().cloned().collect())
    }
}

#[async_trait]
impl GatewaySessionStore for InMemoryStore {
    async fn get(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<Option<GatewaySession>, EngineError> {
        Ok(self
            .lock()?
            .gateway_sessions
            .get(&(*meeting_id, *user_id))
            .cloned())
    }

    async fn insert(&self, record: &GatewaySession) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        let key = (record.meeting_id, record.user_id);
        if inner.gateway_sessions.contains_key(&key) {
            return Err(EngineError::Store(format!(
                "duplicate gateway session for {} in meeting {}",
                record.user_id, record.meeting_id
            )));
        }
        inner.gateway_sessions.insert(key, record.clone());
        Ok(())
    }

    async fn update(&self, record: &GatewaySession) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        let slot = inner
            .gateway_sessions
            .get_mut(&(record.meeting_id, record.user_id))
            .ok_or_else(|| {
                EngineError::Store(format!(
                    "gateway session for {} not stored in meeting {}",
                    record.user_id, record.meeting_id
                ))
            })?;
        *slot = record.clone();
        Ok(())
    }

    async fn delete(&self, meeting_id: &MeetingId, user_id: &UserId) -> Result<(), EngineError> {
        self.lock()?
            .gateway_sessions
            .remove(&(*meeting_id, *user_id));
        Ok(())
    }

    async fn list_by_meeting(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<GatewaySession>, EngineError> {
        Ok(self
            .lock()?
            .gateway_sessions
            .values()
            .filter(|s| s.meeting_id == *meeting_id)
            .cloned()
            .collect())
    }
}

/// Membership of one room, in join order.
#[derive(Debug, Clone, Default)]
struct RoomMembers {
    members: Vec<Member>,
}

#[derive(Debug, Clone)]
struct Member {
    user_id: UserId,
    owner: bool,
    history_cleared: bool,
}

/// In-memory [`RoomDirectory`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryRoomDirectory {
    rooms: Arc<Mutex<HashMap<RoomId, RoomMembers>>>,
    admissions_failing: Arc<AtomicBool>,
}

impl InMemoryRoomDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain member (builder style, for setup).
    #[must_use]
    pub fn with_member(self, room_id: RoomId, user_id: UserId) -> Self {
        self.put(room_id, user_id, false, false);
        self
    }

    /// Add an owner (builder style, for setup).
    #[must_use]
    pub fn with_owner(self, room_id: RoomId, user_id: UserId) -> Self {
        self.put(room_id, user_id, true, false);
        self
    }

    /// Make `add_member` fail with [`EngineError::Store`].
    pub fn set_admissions_failing(&self, failing: bool) {
        self.admissions_failing.store(failing, Ordering::SeqCst);
    }

    /// Whether the member was added with a cleared history.
    #[must_use]
    pub fn history_cleared(&self, room_id: &RoomId, user_id: &UserId) -> Option<bool> {
        let rooms = self.rooms.lock().ok()?;
        rooms
            .get(room_id)?
            .members
            .iter()
            .find(|m| m.user_id == *user_id)
            .map(|m| m.history_cleared)
    }

    fn put(&self, room_id: RoomId, user_id: UserId, owner: bool, history_cleared: bool) {
        if let Ok(mut rooms) = self.rooms.lock() {
            let room = rooms.entry(room_id).or_default();
            match room.members.iter_mut().find(|m| m.user_id == user_id) {
                Some(existing) => existing.owner |= owner,
                None => room.members.push(Member {
                    user_id,
                    owner,
                    history_cleared,
                }),
            }
        }
    }

    fn with_room<T>(
        &self,
        room_id: &RoomId,
        f: impl FnOnce(Option<&RoomMembers>) -> T,
    ) -> Result<T, EngineError> {
        let rooms = self
            .rooms
            .lock()
            .map_err(|_| EngineError::Store("room directory lock poisoned".to_string()))?;
        Ok(f(rooms.get(room_id)))
    }
}

#[async_trait]
impl RoomDirectory for InMemoryRoomDirectory {
    async fn is_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool, EngineError> {
        self.with_room(room_id, |room| {
            room.is_some_and(|r| r.members.iter().any(|m| m.user_id == *user_id))
        })
    }

    async fn is_owner(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool, EngineError> {
        self.with_room(room_id, |room| {
            room.is_some_and(|r| r.members.iter().any(|m| m.user_id == *user_id && m.owner))
        })
    }

    async fn member_ids(&self, room_id: &RoomId) -> Result<Vec<UserId>, EngineError> {
        self.with_room(room_id, |room| {
            room.map(|r| r.members.iter().map(|m| m.user_id).collect())
                .unwrap_or_default()
        })
    }

    async fn owner_ids(&self, room_id: &RoomId) -> Result<Vec<UserId>, EngineError> {
        self.with_room(room_id, |room| {
            room.map(|r| {
                r.members
                    .iter()
                    .filter(|m| m.owner)
                    .map(|m| m.user_id)
                    .collect()
            })
            .unwrap_or_default()
        })
    }

    async fn add_member(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        owner: bool,
        history_cleared: bool,
    ) -> Result<(), EngineError> {
        if self.admissions_failing.load(Ordering::SeqCst) {
            return Err(EngineError::Store("room directory unavailable".to_string()));
        }
        let mut rooms = self
            .rooms
            .lock()
            .map_err(|_| EngineError::Store("room directory lock poisoned".to_string()))?;
        let room = rooms.entry(*room_id).or_default();
        if !room.members.iter().any(|m| m.user_id == *user_id) {
            room.members.push(Member {
                user_id: *user_id,
                owner,
                history_cleared,
            });
        }
        Ok(())
    }
}
