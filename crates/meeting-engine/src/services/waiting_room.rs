//! FIFO admission queue for scheduled meetings.
//!
//! An entry moves from `Waiting` to `Accepted` or `Rejected` exactly once
//! and is removed right after the decision.

use super::EngineContext;
use crate::errors::EngineError;
use crate::events::DomainEvent;
use crate::fanout::emit_to_session;
use crate::models::{Meeting, QueueDecision, QueueStatus, Requester, WaitingParticipant};
use common::types::{MeetingId, SessionId, UserId, WaitingId};
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct WaitingRoomService {
    ctx: EngineContext,
}

impl WaitingRoomService {
    #[must_use]
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub async fn add_queued_user(&self, entry: &WaitingParticipant) -> Result<(), EngineError> {
        self.ctx.waiting.insert(entry).await
    }

    pub async fn remove_queued_user(&self, id: &WaitingId) -> Result<(), EngineError> {
        self.ctx.waiting.delete(id).await
    }

    /// Persist a status change. Only `Waiting` entries may change, and only
    /// to a decided status.
    pub async fn update_queued_user(&self, entry: &WaitingParticipant) -> Result<(), EngineError> {
        if entry.status == QueueStatus::Waiting {
            return Err(EngineError::BadRequest(
                "a queued user can only be accepted or rejected".to_string(),
            ));
        }
        match self.ctx.waiting.get(&entry.meeting_id, &entry.user_id).await? {
            Some(current) if current.id == entry.id && current.status == QueueStatus::Waiting => {
                self.ctx.waiting.update(entry).await
            }
            _ => Err(EngineError::WaitingEntryNotFound(entry.user_id.to_string())),
        }
    }

    /// Put a user in the meeting's queue, or move their entry to a new
    /// session.
    #[instrument(skip_all, name = "engine.waiting.enqueue", fields(meeting_id = %meeting.id, user_id = %user_id))]
    pub async fn enqueue(
        &self,
        meeting: &Meeting,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<WaitingParticipant, EngineError> {
        if let Some(existing) = self.ctx.waiting.get(&meeting.id, user_id).await? {
            if existing.session_id == *session_id {
                return Ok(existing);
            }

            let moved = WaitingParticipant {
                session_id: *session_id,
                ..existing.clone()
            };
            self.ctx.waiting.update(&moved).await?;
            emit_to_session(
                self.ctx.sink.as_ref(),
                &existing.session_id,
                &DomainEvent::WaitingParticipantClashed {
                    meeting_id: meeting.id,
                    user_id: *user_id,
                },
            );
            debug!(
                target: "engine.service.waiting_room",
                meeting_id = %meeting.id,
                user_id = %user_id,
                "Queued user moved to a new session"
            );
            return Ok(moved);
        }

        let entry = WaitingParticipant {
            id: WaitingId::from(self.ctx.ids.new_id()),
            meeting_id: meeting.id,
            user_id: *user_id,
            session_id: *session_id,
            status: QueueStatus::Waiting,
            created_at: self.ctx.clock.now(),
        };
        self.add_queued_user(&entry).await?;

        self.ctx
            .emit_to_owners(
                &meeting.room_id,
                &DomainEvent::WaitingParticipantJoined {
                    meeting_id: meeting.id,
                    user_id: *user_id,
                },
            )
            .await?;

        info!(
            target: "engine.service.waiting_room",
            meeting_id = %meeting.id,
            user_id = %user_id,
            "User queued for admission"
        );
        Ok(entry)
    }

    /// Waiting users in arrival order. Owners only.
    pub async fn get_queue(
        &self,
        meeting_id: &MeetingId,
        requester: &Requester,
    ) -> Result<Vec<UserId>, EngineError> {
        let meeting = self.ctx.load_meeting(meeting_id).await?;
        if !self
            .ctx
            .rooms
            .is_owner(&meeting.room_id, &requester.user_id)
            .await?
        {
            return Err(EngineError::Forbidden(
                "only room owners can see the queue".to_string(),
            ));
        }

        Ok(self
            .ctx
            .waiting
            .list_by_meeting(meeting_id)
            .await?
            .into_iter()
            .filter(|entry| entry.status == QueueStatus::Waiting)
            .map(|entry| entry.user_id)
            .collect())
    }

    /// Accept or reject a queued user.
    ///
    /// Room owners decide for anyone; a queued user may only reject
    /// themselves.
    #[instrument(skip_all, name = "engine.waiting.update", fields(meeting_id = %meeting_id, target = %target))]
    pub async fn update_queue(
        &self,
        meeting_id: &MeetingId,
        target: &UserId,
        decision: QueueDecision,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        let meeting = self.ctx.load_meeting(meeting_id).await?;

        let self_cancel = requester.user_id == *target && decision == QueueDecision::Reject;
        if !self_cancel
            && !self
                .ctx
                .rooms
                .is_owner(&meeting.room_id, &requester.user_id)
                .await?
        {
            return Err(EngineError::Forbidden(
                "cannot accept or reject a queued user".to_string(),
            ));
        }

        let entry = self
            .ctx
            .waiting
            .get(meeting_id, target)
            .await?
            .filter(|entry| entry.status == QueueStatus::Waiting)
            .ok_or_else(|| EngineError::WaitingEntryNotFound(target.to_string()))?;

        self.decide(&meeting, entry, decision).await
    }

    /// Reject whatever entry the session holds. The disconnect path.
    pub async fn remove_from_queue(&self, session_id: &SessionId) -> Result<(), EngineError> {
        let Some(entry) = self.ctx.waiting.get_by_session(session_id).await? else {
            return Ok(());
        };
        if entry.status != QueueStatus::Waiting {
            return Ok(());
        }
        let meeting = self.ctx.load_meeting(&entry.meeting_id).await?;
        self.decide(&meeting, entry, QueueDecision::Reject).await
    }

    async fn decide(
        &self,
        meeting: &Meeting,
        entry: WaitingParticipant,
        decision: QueueDecision,
    ) -> Result<(), EngineError> {
        let status = match decision {
            QueueDecision::Accept => QueueStatus::Accepted,
            QueueDecision::Reject => QueueStatus::Rejected,
        };
        let decided = WaitingParticipant { status, ..entry };

        // Admit before dropping the entry so a failed admission stays queued
        let event = match decision {
            QueueDecision::Accept => {
                self.ctx
                    .rooms
                    .add_member(&meeting.room_id, &decided.user_id, false, false)
                    .await?;
                DomainEvent::WaitingParticipantAccepted {
                    meeting_id: meeting.id,
                    user_id: decided.user_id,
                }
            }
            QueueDecision::Reject => DomainEvent::WaitingParticipantRejected {
                meeting_id: meeting.id,
                user_id: decided.user_id,
            },
        };
        self.update_queued_user(&decided).await?;
        self.remove_queued_user(&decided.id).await?;

        self.ctx.emit_to_owners(&meeting.room_id, &event).await?;
        emit_to_session(self.ctx.sink.as_ref(), &decided.session_id, &event);

        info!(
            target: "engine.service.waiting_room",
            meeting_id = %meeting.id,
            user_id = %decided.user_id,
            decision = ?decision,
            "Queued user decided"
        );
        Ok(())
    }
}
