//! Meeting, participant and waiting-room logic.
//!
//! Services run one read-modify-write-notify sequence per call: load the
//! records, decide, call the videoserver, persist, then emit. They do not
//! serialize themselves; every mutating call must run inside the meeting's
//! actor (see [`crate::actors`]).

pub mod meetings;
pub mod participants;
pub mod waiting_room;

pub use meetings::{MeetingService, ReconcileReport};
pub use participants::ParticipantService;
pub use waiting_room::WaitingRoomService;

use crate::errors::{EngineError, GatewayError};
use crate::events::DomainEvent;
use crate::fanout::{emit_to_users, EventSink};
use crate::gateway::GatewayClient;
use crate::models::{LeaveReason, Meeting, Participant};
use crate::observability::metrics;
use crate::repositories::{MeetingStore, ParticipantStore, RoomDirectory, WaitingStore};
use common::clock::{Clock, IdGenerator};
use common::types::{MeetingId, RoomId};
use std::sync::Arc;
use tracing::{info, warn};

/// The three services, wired to one context.
#[derive(Clone)]
pub struct ServiceSet {
    pub meetings: MeetingService,
    pub participants: ParticipantService,
    pub waiting: WaitingRoomService,
}

impl ServiceSet {
    #[must_use]
    pub fn new(ctx: &EngineContext) -> Self {
        let meetings = MeetingService::new(ctx.clone());
        let waiting = WaitingRoomService::new(ctx.clone());
        let participants = ParticipantService::new(ctx.clone(), meetings.clone(), waiting.clone());
        Self {
            meetings,
            participants,
            waiting,
        }
    }
}

/// Collaborators shared by every service.
#[derive(Clone)]
pub struct EngineContext {
    pub meetings: Arc<dyn MeetingStore>,
    pub participants: Arc<dyn ParticipantStore>,
    pub waiting: Arc<dyn WaitingStore>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub gateway: Arc<GatewayClient>,
    pub sink: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl EngineContext {
    pub(crate) async fn load_meeting(&self, meeting_id: &MeetingId) -> Result<Meeting, EngineError> {
        self.meetings
            .get(meeting_id)
            .await?
            .ok_or_else(|| EngineError::MeetingNotFound(meeting_id.to_string()))
    }

    /// Publish to every member of the room, owners included.
    pub(crate) async fn emit_to_members(
        &self,
        room_id: &RoomId,
        event: &DomainEvent,
    ) -> Result<(), EngineError> {
        let members = self.rooms.member_ids(room_id).await?;
        emit_to_users(self.sink.as_ref(), &members, event);
        Ok(())
    }

    pub(crate) async fn emit_to_owners(
        &self,
        room_id: &RoomId,
        event: &DomainEvent,
    ) -> Result<(), EngineError> {
        let owners = self.rooms.owner_ids(room_id).await?;
        emit_to_users(self.sink.as_ref(), &owners, event);
        Ok(())
    }

    /// Take a live participant out of the meeting.
    ///
    /// Leaves the videoserver first so a transport failure keeps the
    /// participant record for a retry. A session already gone on the
    /// videoserver side does not block removal.
    pub(crate) async fn evict_participant(
        &self,
        meeting: &Meeting,
        participant: &Participant,
        reason: LeaveReason,
    ) -> Result<(), EngineError> {
        match self
            .gateway
            .leave_meeting(&participant.user_id, &meeting.id)
            .await
        {
            Ok(()) => {}
            Err(EngineError::Gateway(
                e @ (GatewayError::SessionMissing { .. } | GatewayError::MeetingMissing { .. }),
            )) => {
                warn!(
                    target: "engine.service.participants",
                    meeting_id = %meeting.id,
                    user_id = %participant.user_id,
                    error = %e,
                    "No videoserver session to leave"
                );
            }
            Err(e) => return Err(e),
        }

        self.participants
            .delete(&meeting.id, &participant.user_id)
            .await?;

        self.emit_to_members(
            &meeting.room_id,
            &DomainEvent::ParticipantLeft {
                meeting_id: meeting.id,
                user_id: participant.user_id,
                reason,
            },
        )
        .await?;

        metrics::record_participant_left(reason.as_str());
        info!(
            target: "engine.service.participants",
            meeting_id = %meeting.id,
            user_id = %participant.user_id,
            reason = reason.as_str(),
            "Participant left meeting"
        );
        Ok(())
    }
}
