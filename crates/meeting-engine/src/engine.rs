//! `MeetingEngine`: the API exposed to callers.
//!
//! Reads go straight to the services. Mutations are routed to the meeting's
//! actor and wait at most the configured operation timeout for the reply.
//! A timed-out operation may still complete inside the actor; callers get
//! `EngineError::Timeout`, which is retryable.

use crate::actors::{MeetingMessage, MeetingSupervisor, Reply};
use crate::config::Config;
use crate::errors::EngineError;
use crate::fanout::EventSink;
use crate::gateway::{GatewayClient, HttpTransport, TransportConfig};
use crate::models::{
    AudioStreamSettings, HandStatusSettings, JoinOutcome, JoinSettings, MediaStreamSettings,
    Meeting, MeetingType, Participant, QueueDecision, Requester, SubscriptionUpdates,
};
use crate::observability::metrics;
use crate::repositories::{
    GatewayMeetingStore, GatewaySessionStore, MeetingStore, ParticipantStore, RoomDirectory,
    WaitingStore,
};
use crate::services::{EngineContext, ReconcileReport, ServiceSet};
use common::clock::{Clock, IdGenerator};
use common::types::{MeetingId, RoomId, SessionId, UserId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Collaborators the engine is built from.
pub struct EngineParts {
    pub meetings: Arc<dyn MeetingStore>,
    pub participants: Arc<dyn ParticipantStore>,
    pub waiting: Arc<dyn WaitingStore>,
    pub gateway_meetings: Arc<dyn GatewayMeetingStore>,
    pub gateway_sessions: Arc<dyn GatewaySessionStore>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub sink: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

pub struct MeetingEngine {
    ctx: EngineContext,
    services: ServiceSet,
    supervisor: MeetingSupervisor,
    operation_timeout: Duration,
}

impl MeetingEngine {
    /// Build the engine and its videoserver client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Gateway` if the HTTP client cannot be built.
    pub fn new(
        config: &Config,
        parts: EngineParts,
        cancel_token: CancellationToken,
    ) -> Result<Self, EngineError> {
        let transport = HttpTransport::new(
            TransportConfig {
                base_url: config.videoserver_url.clone(),
                api_secret: config.videoserver_api_secret.clone(),
                timeout: config.videoserver_timeout,
                connect_timeout: config.videoserver_connect_timeout,
            },
            Arc::clone(&parts.ids),
        )?;
        let gateway = GatewayClient::new(
            transport,
            parts.gateway_meetings,
            parts.gateway_sessions,
            config.room_settings.clone(),
            Arc::clone(&parts.clock),
        );

        let ctx = EngineContext {
            meetings: parts.meetings,
            participants: parts.participants,
            waiting: parts.waiting,
            rooms: parts.rooms,
            gateway: Arc::new(gateway),
            sink: parts.sink,
            clock: parts.clock,
            ids: parts.ids,
        };
        Ok(Self::from_context(ctx, config.operation_timeout, cancel_token))
    }

    /// Build the engine around an already wired context.
    #[must_use]
    pub fn from_context(
        ctx: EngineContext,
        operation_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        let services = ServiceSet::new(&ctx);
        let supervisor = MeetingSupervisor::new(services.clone(), cancel_token);
        Self {
            ctx,
            services,
            supervisor,
            operation_timeout,
        }
    }

    /// Number of running meeting actors.
    #[must_use]
    pub fn actor_count(&self) -> usize {
        self.supervisor.actor_count()
    }

    /// Stop all meeting actors, waiting at most `deadline` for each.
    pub async fn shutdown(&self, deadline: Duration) {
        self.supervisor.shutdown(deadline).await;
    }

    // ------------------------------------------------------------------
    // Meetings
    // ------------------------------------------------------------------

    pub async fn create_meeting(
        &self,
        room_id: &RoomId,
        meeting_type: MeetingType,
        requester: &Requester,
    ) -> Result<Meeting, EngineError> {
        let start = Instant::now();
        let result = self
            .services
            .meetings
            .create_meeting(room_id, meeting_type, requester)
            .await;
        finish("create_meeting", start, &result);
        result
    }

    pub async fn get_meeting(&self, meeting_id: &MeetingId) -> Result<Meeting, EngineError> {
        self.services.meetings.get_meeting(meeting_id).await
    }

    pub async fn list_meetings_by_room(&self, room_id: &RoomId) -> Result<Vec<Meeting>, EngineError> {
        self.services.meetings.list_meetings_by_room(room_id).await
    }

    /// Start (`active = true`) or stop a meeting.
    pub async fn update_meeting(
        &self,
        meeting_id: &MeetingId,
        active: bool,
        requester: &Requester,
    ) -> Result<Meeting, EngineError> {
        self.dispatch("update_meeting", meeting_id, |respond_to| {
            MeetingMessage::UpdateMeeting {
                active,
                requester: *requester,
                respond_to,
            }
        })
        .await
    }

    pub async fn delete_meeting(
        &self,
        meeting_id: &MeetingId,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        self.dispatch("delete_meeting", meeting_id, |respond_to| {
            MeetingMessage::DeleteMeeting {
                requester: Some(*requester),
                respond_to,
            }
        })
        .await?;
        self.supervisor.remove(meeting_id);
        Ok(())
    }

    /// Delete every meeting of a room that is going away.
    ///
    /// Stops at the first failure; meetings already deleted stay deleted.
    pub async fn delete_meetings_for_room(&self, room_id: &RoomId) -> Result<(), EngineError> {
        for meeting in self.services.meetings.list_meetings_by_room(room_id).await? {
            self.dispatch("delete_meeting", &meeting.id, |respond_to| {
                MeetingMessage::DeleteMeeting {
                    requester: None,
                    respond_to,
                }
            })
            .await?;
            self.supervisor.remove(&meeting.id);
        }
        info!(target: "engine.meetings", room_id = %room_id, "Deleted meetings of room");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    pub async fn insert_participant(
        &self,
        meeting_id: &MeetingId,
        settings: JoinSettings,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<JoinOutcome, EngineError> {
        self.dispatch("insert_participant", meeting_id, |respond_to| {
            MeetingMessage::InsertParticipant {
                settings,
                user_id: *user_id,
                session_id: *session_id,
                respond_to,
            }
        })
        .await
    }

    pub async fn remove_participant(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<(), EngineError> {
        self.dispatch("remove_participant", meeting_id, |respond_to| {
            MeetingMessage::RemoveParticipant {
                user_id: *user_id,
                respond_to,
            }
        })
        .await
    }

    /// Disconnect path: drop whichever participant the session holds.
    pub async fn remove_participant_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<(), EngineError> {
        let Some(participant) = self.ctx.participants.get_by_session(session_id).await? else {
            return Ok(());
        };
        self.dispatch(
            "remove_participant_by_session",
            &participant.meeting_id,
            |respond_to| MeetingMessage::RemoveParticipantBySession {
                session_id: *session_id,
                respond_to,
            },
        )
        .await
    }

    pub async fn get_participants(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<Participant>, EngineError> {
        self.services.participants.get_participants(meeting_id).await
    }

    pub async fn update_media_stream(
        &self,
        meeting_id: &MeetingId,
        settings: MediaStreamSettings,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        self.dispatch("update_media_stream", meeting_id, |respond_to| {
            MeetingMessage::UpdateMediaStream {
                settings,
                requester: *requester,
                respond_to,
            }
        })
        .await
    }

    pub async fn update_audio_stream(
        &self,
        meeting_id: &MeetingId,
        settings: AudioStreamSettings,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        self.dispatch("update_audio_stream", meeting_id, |respond_to| {
            MeetingMessage::UpdateAudioStream {
                settings,
                requester: *requester,
                respond_to,
            }
        })
        .await
    }

    pub async fn update_hand_status(
        &self,
        meeting_id: &MeetingId,
        settings: HandStatusSettings,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        self.dispatch("update_hand_status", meeting_id, |respond_to| {
            MeetingMessage::UpdateHandStatus {
                settings,
                requester: *requester,
                respond_to,
            }
        })
        .await
    }

    pub async fn offer_rtc_audio_stream(
        &self,
        meeting_id: &MeetingId,
        sdp: impl Into<String>,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        let sdp = sdp.into();
        self.dispatch("offer_rtc_audio_stream", meeting_id, |respond_to| {
            MeetingMessage::OfferRtcAudioStream {
                sdp,
                requester: *requester,
                respond_to,
            }
        })
        .await
    }

    pub async fn answer_rtc_media_stream(
        &self,
        meeting_id: &MeetingId,
        sdp: impl Into<String>,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        let sdp = sdp.into();
        self.dispatch("answer_rtc_media_stream", meeting_id, |respond_to| {
            MeetingMessage::AnswerRtcMediaStream {
                sdp,
                requester: *requester,
                respond_to,
            }
        })
        .await
    }

    pub async fn update_subscriptions_media_stream(
        &self,
        meeting_id: &MeetingId,
        updates: SubscriptionUpdates,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        self.dispatch(
            "update_subscriptions_media_stream",
            meeting_id,
            |respond_to| MeetingMessage::UpdateSubscriptions {
                updates,
                requester: *requester,
                respond_to,
            },
        )
        .await
    }

    // ------------------------------------------------------------------
    // Waiting room
    // ------------------------------------------------------------------

    pub async fn get_queue(
        &self,
        meeting_id: &MeetingId,
        requester: &Requester,
    ) -> Result<Vec<UserId>, EngineError> {
        self.services.waiting.get_queue(meeting_id, requester).await
    }

    pub async fn update_queue(
        &self,
        meeting_id: &MeetingId,
        target: &UserId,
        decision: QueueDecision,
        requester: &Requester,
    ) -> Result<(), EngineError> {
        self.dispatch("update_queue", meeting_id, |respond_to| {
            MeetingMessage::UpdateQueue {
                target: *target,
                decision,
                requester: *requester,
                respond_to,
            }
        })
        .await
    }

    /// Disconnect path for queued users.
    pub async fn remove_from_queue(&self, session_id: &SessionId) -> Result<(), EngineError> {
        let Some(entry) = self.ctx.waiting.get_by_session(session_id).await? else {
            return Ok(());
        };
        self.dispatch("remove_from_queue", &entry.meeting_id, |respond_to| {
            MeetingMessage::RemoveFromQueue {
                session_id: *session_id,
                respond_to,
            }
        })
        .await
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Every meeting id with a recorded videoserver meeting.
    pub async fn gateway_meeting_ids(&self) -> Result<Vec<MeetingId>, EngineError> {
        Ok(self
            .ctx
            .gateway
            .gateway_meetings()
            .await?
            .into_iter()
            .map(|record| record.meeting_id)
            .collect())
    }

    /// Tear down the meeting's orphaned videoserver resources.
    pub async fn reconcile_meeting(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<ReconcileReport, EngineError> {
        let report = self
            .dispatch("reconcile", meeting_id, |respond_to| {
                MeetingMessage::Reconcile { respond_to }
            })
            .await;

        // Actors of deleted meetings only exist for this pass
        if self.ctx.meetings.get(meeting_id).await?.is_none() {
            self.supervisor.remove(meeting_id);
        }
        report
    }

    async fn dispatch<T>(
        &self,
        operation: &'static str,
        meeting_id: &MeetingId,
        build: impl FnOnce(Reply<T>) -> MeetingMessage,
    ) -> Result<T, EngineError> {
        let start = Instant::now();
        let handle = self.supervisor.get_or_spawn(meeting_id);

        let result = match tokio::time::timeout(self.operation_timeout, handle.request(build)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target: "engine.meetings",
                    meeting_id = %meeting_id,
                    operation,
                    timeout_ms = u64::try_from(self.operation_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Meeting operation timed out"
                );
                Err(EngineError::Timeout(format!(
                    "{operation} did not complete within {:?}",
                    self.operation_timeout
                )))
            }
        };

        if matches!(result, Err(EngineError::MeetingNotFound(_))) {
            self.supervisor.remove(meeting_id);
        }

        finish(operation, start, &result);
        result
    }
}

fn finish<T>(operation: &'static str, start: Instant, result: &Result<T, EngineError>) {
    metrics::record_operation_duration(operation, start.elapsed());
    if let Err(e) = result {
        metrics::record_error(operation, e.error_type_label());
    }
}
