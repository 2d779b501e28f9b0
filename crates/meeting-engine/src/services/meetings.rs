//! Meeting lifecycle: create, start, stop, delete.

use super::EngineContext;
use crate::errors::{EngineError, GatewayError};
use crate::events::DomainEvent;
use crate::fanout::emit_to_session;
use crate::models::{LeaveReason, Meeting, MeetingType, Requester};
use crate::observability::metrics;
use common::types::{MeetingId, RoomId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Videoserver resources torn down by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub meetings: usize,
    pub sessions: usize,
}

#[derive(Clone)]
pub struct MeetingService {
    ctx: EngineContext,
    /// Serializes creation, which spans meetings of one room.
    create_lock: Arc<Mutex<()>>,
}

impl MeetingService {
    #[must_use]
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            create_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create an inactive meeting in a room.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the requester is a room member, `Conflict` for a
    /// second permanent meeting in the same room.
    #[instrument(skip_all, name = "engine.meetings.create", fields(room_id = %room_id))]
    pub async fn create_meeting(
        &self,
        room_id: &RoomId,
        meeting_type: MeetingType,
        requester: &Requester,
    ) -> Result<Meeting, EngineError> {
        if !self.ctx.rooms.is_member(room_id, &requester.user_id).await? {
            return Err(EngineError::Forbidden(
                "only room members can create meetings".to_string(),
            ));
        }

        let _guard = self.create_lock.lock().await;

        if meeting_type == MeetingType::Permanent {
            let existing = self.ctx.meetings.list_by_room(room_id).await?;
            if existing
                .iter()
                .any(|m| m.meeting_type == MeetingType::Permanent)
            {
                return Err(EngineError::Conflict(
                    "room already has a permanent meeting".to_string(),
                ));
            }
        }

        let meeting = Meeting {
            id: MeetingId::from(self.ctx.ids.new_id()),
            room_id: *room_id,
            meeting_type,
            active: false,
            created_at: self.ctx.clock.now(),
        };
        self.ctx.meetings.insert(&meeting).await?;

        self.ctx
            .emit_to_members(
                room_id,
                &DomainEvent::MeetingCreated {
                    meeting: meeting.clone(),
                },
            )
            .await?;

        info!(
            target: "engine.service.meetings",
            meeting_id = %meeting.id,
            room_id = %room_id,
            meeting_type = ?meeting_type,
            "Meeting created"
        );
        Ok(meeting)
    }

    pub async fn get_meeting(&self, meeting_id: &MeetingId) -> Result<Meeting, EngineError> {
        self.ctx.load_meeting(meeting_id).await
    }

    pub async fn list_meetings_by_room(&self, room_id: &RoomId) -> Result<Vec<Meeting>, EngineError> {
        self.ctx.meetings.list_by_room(room_id).await
    }

    /// Start or stop a meeting on behalf of a room member.
    ///
    /// Requesting the current state changes nothing.
    #[instrument(skip_all, name = "engine.meetings.update", fields(meeting_id = %meeting_id, active))]
    pub async fn update_meeting(
        &self,
        meeting_id: &MeetingId,
        active: bool,
        requester: &Requester,
    ) -> Result<Meeting, EngineError> {
        let meeting = self.ctx.load_meeting(meeting_id).await?;
        if !self
            .ctx
            .rooms
            .is_member(&meeting.room_id, &requester.user_id)
            .await?
        {
            return Err(EngineError::Forbidden(
                "only room members can start or stop meetings".to_string(),
            ));
        }

        match (meeting.active, active) {
            (false, true) => self.start(&meeting).await,
            (true, false) => self.stop(&meeting).await,
            _ => Ok(meeting),
        }
    }

    /// Delete a meeting on behalf of a room owner.
    #[instrument(skip_all, name = "engine.meetings.delete", fields(meeting_id = %meeting_id))]
    pub async fn delete_meeting(
        &self,
        meeting_id: &MeetingId,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        let meeting = self.ctx.load_meeting(meeting_id).await?;
        if !self
            .ctx
            .rooms
            .is_owner(&meeting.room_id, &requester.user_id)
            .await?
        {
            return Err(EngineError::Forbidden(
                "only room owners can delete meetings".to_string(),
            ));
        }
        self.remove(&meeting).await
    }

    /// Delete a meeting without an authorization check.
    ///
    /// Used when the owning room goes away. A meeting already gone is fine.
    pub async fn purge_meeting(&self, meeting_id: &MeetingId) -> Result<(), EngineError> {
        match self.ctx.meetings.get(meeting_id).await? {
            Some(meeting) => self.remove(&meeting).await,
            None => Ok(()),
        }
    }

    /// Bring up the videoserver meeting and mark the meeting active.
    pub(crate) async fn start(&self, meeting: &Meeting) -> Result<Meeting, EngineError> {
        self.ctx.gateway.start_meeting(&meeting.id).await?;

        let started = Meeting {
            active: true,
            ..meeting.clone()
        };
        self.ctx.meetings.update(&started).await?;
        metrics::meeting_activated();

        self.ctx
            .emit_to_members(
                &started.room_id,
                &DomainEvent::MeetingStarted {
                    meeting_id: started.id,
                    room_id: started.room_id,
                },
            )
            .await?;

        info!(target: "engine.service.meetings", meeting_id = %started.id, "Meeting started");
        Ok(started)
    }

    /// Evict every participant, tear down the videoserver meeting and mark
    /// the meeting inactive.
    pub(crate) async fn stop(&self, meeting: &Meeting) -> Result<Meeting, EngineError> {
        for participant in self.ctx.participants.list_by_meeting(&meeting.id).await? {
            self.ctx
                .evict_participant(meeting, &participant, LeaveReason::MeetingEnded)
                .await?;
        }

        match self.ctx.gateway.stop_meeting(&meeting.id).await {
            Ok(()) => {}
            Err(EngineError::Gateway(e @ GatewayError::MeetingMissing { .. })) => {
                warn!(
                    target: "engine.service.meetings",
                    meeting_id = %meeting.id,
                    error = %e,
                    "Active meeting had no videoserver meeting"
                );
            }
            Err(e) => return Err(e),
        }

        let stopped = Meeting {
            active: false,
            ..meeting.clone()
        };
        self.ctx.meetings.update(&stopped).await?;
        metrics::meeting_deactivated();

        self.ctx
            .emit_to_members(
                &stopped.room_id,
                &DomainEvent::MeetingStopped {
                    meeting_id: stopped.id,
                    room_id: stopped.room_id,
                },
            )
            .await?;

        info!(target: "engine.service.meetings", meeting_id = %stopped.id, "Meeting stopped");
        Ok(stopped)
    }

    /// Tear down videoserver resources no domain record accounts for.
    ///
    /// Sessions without a live participant are left. The gateway meeting is
    /// stopped when its meeting is gone or inactive.
    pub(crate) async fn reconcile(&self, meeting_id: &MeetingId) -> Result<ReconcileReport, EngineError> {
        let mut report = ReconcileReport::default();
        if self.ctx.gateway.gateway_meeting(meeting_id).await?.is_none() {
            return Ok(report);
        }

        let keep = self
            .ctx
            .meetings
            .get(meeting_id)
            .await?
            .is_some_and(|m| m.active);

        for session in self.ctx.gateway.gateway_sessions(meeting_id).await? {
            let live = keep
                && self
                    .ctx
                    .participants
                    .get(meeting_id, &session.user_id)
                    .await?
                    .is_some();
            if !live {
                self.ctx
                    .gateway
                    .leave_meeting(&session.user_id, meeting_id)
                    .await?;
                report.sessions += 1;
            }
        }

        if !keep {
            self.ctx.gateway.stop_meeting(meeting_id).await?;
            report.meetings += 1;
        }

        if report != ReconcileReport::default() {
            warn!(
                target: "engine.service.meetings",
                meeting_id = %meeting_id,
                meetings = report.meetings,
                sessions = report.sessions,
                "Tore down orphaned videoserver resources"
            );
        }
        Ok(report)
    }

    async fn remove(&self, meeting: &Meeting) -> Result<(), EngineError> {
        if meeting.active {
            self.stop(meeting).await?;
        }
        self.ctx.participants.delete_by_meeting(&meeting.id).await?;

        for entry in self.ctx.waiting.list_by_meeting(&meeting.id).await? {
            self.ctx.waiting.delete(&entry.id).await?;
            emit_to_session(
                self.ctx.sink.as_ref(),
                &entry.session_id,
                &DomainEvent::WaitingParticipantRejected {
                    meeting_id: meeting.id,
                    user_id: entry.user_id,
                },
            );
        }

        self.ctx.meetings.delete(&meeting.id).await?;

        self.ctx
            .emit_to_members(
                &meeting.room_id,
                &DomainEvent::MeetingDeleted {
                    meeting_id: meeting.id,
                    room_id: meeting.room_id,
                },
            )
            .await?;

        info!(target: "engine.service.meetings", meeting_id = %meeting.id, "Meeting deleted");
        Ok(())
    }
}
