//! Participant state machine.
//!
//! Per (meeting, user) a participant is either absent or live on exactly one
//! session. Joining from a second session evicts the first. Stream and hand
//! toggles act on the live participant and are no-ops when nothing changes.

use super::{EngineContext, MeetingService, WaitingRoomService};
use crate::errors::EngineError;
use crate::events::DomainEvent;
use crate::fanout::{emit_to_session, emit_to_user};
use crate::models::{
    AudioStreamSettings, HandStatusSettings, JoinOutcome, JoinSettings, LeaveReason, MediaType,
    MediaStreamSettings, Meeting, MeetingType, Participant, Requester, SubscriptionUpdates,
};
use crate::observability::metrics;
use common::types::{MeetingId, SessionId, UserId};
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct ParticipantService {
    ctx: EngineContext,
    meetings: MeetingService,
    waiting: WaitingRoomService,
}

impl ParticipantService {
    #[must_use]
    pub fn new(ctx: EngineContext, meetings: MeetingService, waiting: WaitingRoomService) -> Self {
        Self {
            ctx,
            meetings,
            waiting,
        }
    }

    /// Join a meeting, or queue for a scheduled one.
    ///
    /// # Errors
    ///
    /// - `MeetingNotFound` if the meeting does not exist
    /// - `Forbidden` if the user may not enter a permanent meeting
    /// - `Conflict` if this session is already the live participant
    #[instrument(skip_all, name = "engine.participants.insert", fields(meeting_id = %meeting_id, user_id = %user_id))]
    pub async fn insert_participant(
        &self,
        meeting_id: &MeetingId,
        settings: &JoinSettings,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<JoinOutcome, EngineError> {
        let meeting = self.ctx.load_meeting(meeting_id).await?;

        let member = self.ctx.rooms.is_owner(&meeting.room_id, user_id).await?
            || self.ctx.rooms.is_member(&meeting.room_id, user_id).await?;
        if !member {
            // Room members count as admitted; only outsiders wait for an owner
            if meeting.meeting_type == MeetingType::Scheduled {
                let entry = self.waiting.enqueue(&meeting, user_id, session_id).await?;
                return Ok(JoinOutcome::Queued(entry));
            }
            return Err(EngineError::Forbidden(
                "user is not a member of the meeting's room".to_string(),
            ));
        }

        if let Some(existing) = self.ctx.participants.get(meeting_id, user_id).await? {
            if existing.session_id == *session_id {
                return Err(EngineError::Conflict(
                    "Participant already inserted".to_string(),
                ));
            }

            self.ctx
                .evict_participant(&meeting, &existing, LeaveReason::Clashed)
                .await?;
            emit_to_session(
                self.ctx.sink.as_ref(),
                &existing.session_id,
                &DomainEvent::ParticipantClashed {
                    meeting_id: *meeting_id,
                    user_id: *user_id,
                },
            );
            info!(
                target: "engine.service.participants",
                meeting_id = %meeting_id,
                user_id = %user_id,
                old_session_id = %existing.session_id,
                "Evicted older session of joining user"
            );
        }

        let meeting = if meeting.active {
            meeting
        } else {
            self.meetings.start(&meeting).await?
        };

        let now = self.ctx.clock.now();
        let participant = Participant {
            meeting_id: *meeting_id,
            user_id: *user_id,
            session_id: *session_id,
            audio_stream_on: settings.audio,
            video_stream_on: settings.video,
            screen_stream_on: settings.screen,
            hand_raised_at: None,
            created_at: now,
            updated_at: now,
        };
        self.ctx.participants.insert(&participant).await?;

        if let Err(e) = self
            .ctx
            .gateway
            .join_meeting(user_id, session_id, meeting_id, settings)
            .await
        {
            if let Err(cleanup) = self.ctx.participants.delete(meeting_id, user_id).await {
                warn!(
                    target: "engine.service.participants",
                    meeting_id = %meeting_id,
                    user_id = %user_id,
                    error = %cleanup,
                    "Failed to drop participant after videoserver join failure"
                );
            }
            return Err(e);
        }

        let joined = DomainEvent::ParticipantJoined {
            participant: participant.clone(),
        };
        match meeting.meeting_type {
            MeetingType::Permanent => self.ctx.emit_to_members(&meeting.room_id, &joined).await?,
            MeetingType::Scheduled => emit_to_user(self.ctx.sink.as_ref(), user_id, &joined),
        }

        metrics::record_participant_joined();
        info!(
            target: "engine.service.participants",
            meeting_id = %meeting_id,
            user_id = %user_id,
            session_id = %session_id,
            "Participant joined meeting"
        );
        Ok(JoinOutcome::Joined(participant))
    }

    /// Leave a meeting. Absent participants succeed silently.
    #[instrument(skip_all, name = "engine.participants.remove", fields(meeting_id = %meeting_id, user_id = %user_id))]
    pub async fn remove_participant(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<(), EngineError> {
        let meeting = self.ctx.load_meeting(meeting_id).await?;
        if !self.ctx.rooms.is_member(&meeting.room_id, user_id).await? {
            return Err(EngineError::Forbidden(
                "user is not a member of the meeting's room".to_string(),
            ));
        }

        let Some(participant) = self.ctx.participants.get(meeting_id, user_id).await? else {
            debug!(
                target: "engine.service.participants",
                meeting_id = %meeting_id,
                user_id = %user_id,
                "No live participant to remove"
            );
            return self.finish_stop_if_empty(&meeting).await;
        };

        self.leave(&meeting, &participant, LeaveReason::Left).await
    }

    /// Remove whichever participant the session holds. The disconnect path.
    pub async fn remove_participant_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<(), EngineError> {
        let Some(participant) = self.ctx.participants.get_by_session(session_id).await? else {
            return Ok(());
        };
        let Some(meeting) = self.ctx.meetings.get(&participant.meeting_id).await? else {
            return self
                .ctx
                .participants
                .delete(&participant.meeting_id, &participant.user_id)
                .await;
        };

        self.leave(&meeting, &participant, LeaveReason::Disconnected)
            .await
    }

    pub async fn get_participants(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<Participant>, EngineError> {
        self.ctx.load_meeting(meeting_id).await?;
        self.ctx.participants.list_by_meeting(meeting_id).await
    }

    /// Publish or unpublish video or screen.
    #[instrument(skip_all, name = "engine.participants.media", fields(meeting_id = %meeting_id, media_type = settings.media_type.as_str(), enabled = settings.enabled))]
    pub async fn update_media_stream(
        &self,
        meeting_id: &MeetingId,
        settings: &MediaStreamSettings,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        let meeting = self.ctx.load_meeting(meeting_id).await?;
        let (participant, moderator_id) = self
            .resolve_target(&meeting, settings.user_to_moderate, settings.enabled, requester)
            .await?;

        if participant.stream_on(settings.media_type) == settings.enabled {
            return Ok(());
        }

        let jsep = self
            .ctx
            .gateway
            .update_media_stream(
                &participant.user_id,
                meeting_id,
                settings.media_type,
                settings.enabled,
                settings.sdp.as_deref(),
            )
            .await?;

        let updated_at = self.ctx.clock.now();
        let updated = match settings.media_type {
            MediaType::Video => Participant {
                video_stream_on: settings.enabled,
                updated_at,
                ..participant
            },
            MediaType::Screen => Participant {
                screen_stream_on: settings.enabled,
                updated_at,
                ..participant
            },
        };
        self.ctx.participants.update(&updated).await?;

        self.ctx
            .emit_to_members(
                &meeting.room_id,
                &DomainEvent::MediaStreamChanged {
                    meeting_id: *meeting_id,
                    user_id: updated.user_id,
                    media_type: settings.media_type,
                    enabled: settings.enabled,
                    moderator_id,
                },
            )
            .await?;

        if let Some(jsep) = jsep {
            emit_to_session(
                self.ctx.sink.as_ref(),
                &updated.session_id,
                &DomainEvent::SdpAnswered {
                    meeting_id: *meeting_id,
                    media_type: settings.media_type,
                    jsep,
                },
            );
        }
        Ok(())
    }

    /// Mute or unmute.
    #[instrument(skip_all, name = "engine.participants.audio", fields(meeting_id = %meeting_id, enabled = settings.enabled))]
    pub async fn update_audio_stream(
        &self,
        meeting_id: &MeetingId,
        settings: &AudioStreamSettings,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        let meeting = self.ctx.load_meeting(meeting_id).await?;
        let (participant, moderator_id) = self
            .resolve_target(&meeting, settings.user_to_moderate, settings.enabled, requester)
            .await?;

        if participant.audio_stream_on == settings.enabled {
            return Ok(());
        }

        self.ctx
            .gateway
            .update_audio_stream(&participant.user_id, meeting_id, settings.enabled)
            .await?;

        let updated = Participant {
            audio_stream_on: settings.enabled,
            updated_at: self.ctx.clock.now(),
            ..participant
        };
        self.ctx.participants.update(&updated).await?;

        self.ctx
            .emit_to_members(
                &meeting.room_id,
                &DomainEvent::AudioStreamChanged {
                    meeting_id: *meeting_id,
                    user_id: updated.user_id,
                    enabled: settings.enabled,
                    moderator_id,
                },
            )
            .await
    }

    /// Raise or lower a hand, then broadcast the full raised list.
    #[instrument(skip_all, name = "engine.participants.hand", fields(meeting_id = %meeting_id, raised = settings.raised))]
    pub async fn update_hand_status(
        &self,
        meeting_id: &MeetingId,
        settings: &HandStatusSettings,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        let meeting = self.ctx.load_meeting(meeting_id).await?;
        let (participant, moderator_id) = self
            .resolve_target(&meeting, settings.user_to_moderate, settings.raised, requester)
            .await?;

        if participant.hand_raised_at.is_some() == settings.raised {
            return Ok(());
        }

        let now = self.ctx.clock.now();
        let updated = Participant {
            hand_raised_at: settings.raised.then_some(now),
            updated_at: now,
            ..participant
        };
        self.ctx.participants.update(&updated).await?;

        // Stable sort keeps join order among equal timestamps
        let mut raised: Vec<Participant> = self
            .ctx
            .participants
            .list_by_meeting(meeting_id)
            .await?
            .into_iter()
            .filter(|p| p.hand_raised_at.is_some())
            .collect();
        raised.sort_by_key(|p| p.hand_raised_at);

        self.ctx
            .emit_to_members(
                &meeting.room_id,
                &DomainEvent::HandRaised {
                    meeting_id: *meeting_id,
                    user_id: updated.user_id,
                    raised: settings.raised,
                    raised_at: updated.hand_raised_at,
                    moderator_id,
                },
            )
            .await?;
        self.ctx
            .emit_to_members(
                &meeting.room_id,
                &DomainEvent::HandRaisedList {
                    meeting_id: *meeting_id,
                    user_ids: raised.iter().map(|p| p.user_id).collect(),
                },
            )
            .await
    }

    /// Send the client's audio offer and relay the answer to its session.
    pub async fn offer_rtc_audio_stream(
        &self,
        meeting_id: &MeetingId,
        sdp: &str,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        let meeting = self.ctx.load_meeting(meeting_id).await?;
        let participant = self.live_participant(&meeting, requester).await?;

        let jsep = self
            .ctx
            .gateway
            .offer_rtc_audio_stream(&participant.user_id, meeting_id, sdp)
            .await?;

        if let Some(jsep) = jsep {
            emit_to_session(
                self.ctx.sink.as_ref(),
                &participant.session_id,
                &DomainEvent::AudioAnswered {
                    meeting_id: *meeting_id,
                    jsep,
                },
            );
        }
        Ok(())
    }

    /// Complete subscriber negotiation with the client's answer.
    pub async fn answer_rtc_media_stream(
        &self,
        meeting_id: &MeetingId,
        sdp: &str,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        let meeting = self.ctx.load_meeting(meeting_id).await?;
        let participant = self.live_participant(&meeting, requester).await?;

        self.ctx
            .gateway
            .answer_rtc_media_stream(&participant.user_id, meeting_id, sdp)
            .await
    }

    /// Change received feeds and relay any new offer to the session.
    pub async fn update_subscriptions_media_stream(
        &self,
        meeting_id: &MeetingId,
        updates: &SubscriptionUpdates,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        let meeting = self.ctx.load_meeting(meeting_id).await?;
        let participant = self.live_participant(&meeting, requester).await?;

        let jsep = self
            .ctx
            .gateway
            .update_subscriptions_media_stream(&participant.user_id, meeting_id, updates)
            .await?;

        if let Some(jsep) = jsep {
            emit_to_session(
                self.ctx.sink.as_ref(),
                &participant.session_id,
                &DomainEvent::SdpOffered {
                    meeting_id: *meeting_id,
                    jsep,
                },
            );
        }
        Ok(())
    }

    /// Evict, then stop the meeting if nobody is left.
    async fn leave(
        &self,
        meeting: &Meeting,
        participant: &Participant,
        reason: LeaveReason,
    ) -> Result<(), EngineError> {
        self.ctx
            .evict_participant(meeting, participant, reason)
            .await?;

        if meeting.active
            && self
                .ctx
                .participants
                .list_by_meeting(&meeting.id)
                .await?
                .is_empty()
        {
            self.meetings.stop(meeting).await?;
        }
        Ok(())
    }

    /// Retry path of a last leave whose stop failed: the participant is
    /// already gone but the meeting is still active.
    async fn finish_stop_if_empty(&self, meeting: &Meeting) -> Result<(), EngineError> {
        if !meeting.active
            || !self
                .ctx
                .participants
                .list_by_meeting(&meeting.id)
                .await?
                .is_empty()
        {
            return Ok(());
        }

        info!(
            target: "engine.service.participants",
            meeting_id = %meeting.id,
            "Stopping active meeting left without participants"
        );
        self.meetings.stop(meeting).await?;
        Ok(())
    }

    /// The requester's own participant, on the requester's session.
    async fn live_participant(
        &self,
        meeting: &Meeting,
        requester: &Requester,
    ) -> Result<Participant, EngineError> {
        self.ctx
            .participants
            .get(&meeting.id, &requester.user_id)
            .await?
            .filter(|p| p.session_id == requester.session_id)
            .ok_or_else(|| EngineError::ParticipantNotFound(requester.user_id.to_string()))
    }

    /// Decide who a toggle acts on and whether it is a moderated action.
    ///
    /// Returns the target participant and the moderator id to attach to
    /// the resulting event.
    async fn resolve_target(
        &self,
        meeting: &Meeting,
        user_to_moderate: Option<UserId>,
        turning_on: bool,
        requester: &Requester,
    ) -> Result<(Participant, Option<UserId>), EngineError> {
        let target = match user_to_moderate {
            Some(target) if target != requester.user_id => target,
            _ => return Ok((self.live_participant(meeting, requester).await?, None)),
        };

        if turning_on {
            return Err(EngineError::BadRequest(
                "cannot perform this action for user".to_string(),
            ));
        }
        if !self
            .ctx
            .rooms
            .is_owner(&meeting.room_id, &requester.user_id)
            .await?
        {
            return Err(EngineError::Forbidden(
                "only room owners can moderate participants".to_string(),
            ));
        }

        let participant = self
            .ctx
            .participants
            .get(&meeting.id, &target)
            .await?
            .ok_or_else(|| EngineError::ParticipantNotFound(target.to_string()))?;
        Ok((participant, Some(requester.user_id)))
    }
}
