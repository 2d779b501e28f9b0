//! Videoserver operations.
//!
//! Each operation validates its precondition against the gateway records,
//! runs the protocol steps in order, and persists the resulting record only
//! after every step succeeded. A failure part-way through `start_meeting` or
//! `join_meeting` leaves the remote resources created so far in place; the
//! reconciliation task is the cleanup path for those.

use super::protocol::{
    Jsep, AUDIO_NO_SUCH_ROOM, AUDIO_PLUGIN, VIDEO_NO_SUCH_ROOM, VIDEO_PLUGIN,
};
use super::transport::HttpTransport;
use crate::config::RoomSettings;
use crate::errors::{EngineError, GatewayError};
use crate::models::{FeedId, GatewayMeeting, GatewaySession, JoinSettings, MediaType, SubscriptionUpdates};
use crate::repositories::{GatewayMeetingStore, GatewaySessionStore};
use common::clock::Clock;
use common::types::{MeetingId, SessionId, UserId};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Driver for the videoserver connection, handle and room protocol.
#[derive(Clone)]
pub struct GatewayClient {
    transport: HttpTransport,
    meetings: Arc<dyn GatewayMeetingStore>,
    sessions: Arc<dyn GatewaySessionStore>,
    rooms: RoomSettings,
    clock: Arc<dyn Clock>,
}

impl GatewayClient {
    #[must_use]
    pub fn new(
        transport: HttpTransport,
        meetings: Arc<dyn GatewayMeetingStore>,
        sessions: Arc<dyn GatewaySessionStore>,
        rooms: RoomSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            meetings,
            sessions,
            rooms,
            clock,
        }
    }

    /// Gateway record of an active meeting, if any.
    pub async fn gateway_meeting(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Option<GatewayMeeting>, EngineError> {
        self.meetings.get(meeting_id).await
    }

    /// Every recorded gateway meeting.
    pub async fn gateway_meetings(&self) -> Result<Vec<GatewayMeeting>, EngineError> {
        self.meetings.list().await
    }

    /// Sessions recorded under a gateway meeting.
    pub async fn gateway_sessions(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<GatewaySession>, EngineError> {
        self.sessions.list_by_meeting(meeting_id).await
    }

    /// Create the connection, handles and rooms backing a meeting.
    ///
    /// # Errors
    ///
    /// `GatewayError::AlreadyActive` if a gateway meeting is recorded.
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    pub async fn start_meeting(&self, meeting_id: &MeetingId) -> Result<GatewayMeeting, EngineError> {
        if self.meetings.get(meeting_id).await?.is_some() {
            return Err(GatewayError::AlreadyActive {
                meeting_id: meeting_id.to_string(),
            }
            .into());
        }

        let connection_id = self.transport.create().await?;
        let audio_handle_id = self.transport.attach(&connection_id, AUDIO_PLUGIN).await?;
        let video_handle_id = self.transport.attach(&connection_id, VIDEO_PLUGIN).await?;

        let audio_room_id = format!("audio_{meeting_id}");
        let video_room_id = format!("video_{meeting_id}");

        let audio_room = json!({
            "request": "create",
            "room": audio_room_id,
            "permanent": false,
            "is_private": false,
            "record": false,
            "sampling_rate": self.rooms.sampling_rate,
            "audio_active_packets": self.rooms.audio_active_packets,
            "audio_level_average": self.rooms.audio_level_average,
            "audiolevel_event": true,
        });
        self.transport
            .message(&connection_id, &audio_handle_id, &audio_room, None)
            .await?;

        let video_room = json!({
            "request": "create",
            "room": video_room_id,
            "permanent": false,
            "is_private": false,
            "record": false,
            "publishers": self.rooms.video_publishers,
            "bitrate": self.rooms.video_bitrate,
            "bitrate_cap": true,
            "videocodec": self.rooms.video_codecs.join(","),
        });
        self.transport
            .message(&connection_id, &video_handle_id, &video_room, None)
            .await?;

        let record = GatewayMeeting {
            meeting_id: *meeting_id,
            connection_id,
            audio_handle_id,
            video_handle_id,
            audio_room_id,
            video_room_id,
        };
        self.meetings.insert(&record).await?;

        info!(
            target: "engine.gateway",
            meeting_id = %meeting_id,
            connection_id = %record.connection_id,
            "Videoserver meeting started"
        );
        Ok(record)
    }

    /// Tear down a meeting's rooms, handles and connection, in reverse order.
    ///
    /// # Errors
    ///
    /// `GatewayError::MeetingMissing` if no gateway meeting is recorded.
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    pub async fn stop_meeting(&self, meeting_id: &MeetingId) -> Result<(), EngineError> {
        let record = self.require_meeting(meeting_id).await?;

        self.destroy_room(
            &record.connection_id,
            &record.video_handle_id,
            &record.video_room_id,
            VIDEO_NO_SUCH_ROOM,
        )
        .await?;
        self.destroy_room(
            &record.connection_id,
            &record.audio_handle_id,
            &record.audio_room_id,
            AUDIO_NO_SUCH_ROOM,
        )
        .await?;
        match self.transport.destroy(&record.connection_id).await {
            Ok(()) => {}
            Err(e @ GatewayError::Rejected { .. }) => {
                warn!(
                    target: "engine.gateway",
                    meeting_id = %meeting_id,
                    error = %e,
                    "Videoserver connection already gone"
                );
            }
            Err(e) => return Err(e.into()),
        }

        self.meetings.delete(meeting_id).await?;

        info!(
            target: "engine.gateway",
            meeting_id = %meeting_id,
            connection_id = %record.connection_id,
            "Videoserver meeting stopped"
        );
        Ok(())
    }

    /// Open a participant connection and join the video room as publisher
    /// of both the `video` and the `screen` feed.
    ///
    /// # Errors
    ///
    /// `GatewayError::MeetingMissing` without a gateway meeting,
    /// `GatewayError::AlreadyJoined` if the user already has a session.
    #[instrument(skip_all, fields(meeting_id = %meeting_id, user_id = %user_id))]
    pub async fn join_meeting(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        meeting_id: &MeetingId,
        settings: &JoinSettings,
    ) -> Result<GatewaySession, EngineError> {
        let meeting = self.require_meeting(meeting_id).await?;
        if self.sessions.get(meeting_id, user_id).await?.is_some() {
            return Err(GatewayError::AlreadyJoined {
                meeting_id: meeting_id.to_string(),
                user_id: user_id.to_string(),
            }
            .into());
        }

        let connection_id = self.transport.create().await?;
        let video_out_handle_id = self.transport.attach(&connection_id, VIDEO_PLUGIN).await?;
        let screen_handle_id = self.transport.attach(&connection_id, VIDEO_PLUGIN).await?;

        for (handle_id, media_type) in [
            (&video_out_handle_id, MediaType::Video),
            (&screen_handle_id, MediaType::Screen),
        ] {
            let body = json!({
                "request": "join",
                "ptype": "publisher",
                "room": meeting.video_room_id,
                "id": FeedId::new(*user_id, media_type).to_string(),
            });
            self.transport
                .message(&connection_id, handle_id, &body, None)
                .await?;
        }

        let record = GatewaySession {
            meeting_id: *meeting_id,
            user_id: *user_id,
            session_id: *session_id,
            connection_id,
            audio_handle_id: None,
            video_in_handle_id: None,
            video_out_handle_id: Some(video_out_handle_id),
            screen_handle_id: Some(screen_handle_id),
            audio_stream_on: settings.audio,
            video_in_stream_on: false,
            video_out_stream_on: settings.video,
            screen_stream_on: settings.screen,
        };
        self.sessions.insert(&record).await?;

        debug!(
            target: "engine.gateway",
            meeting_id = %meeting_id,
            user_id = %user_id,
            connection_id = %record.connection_id,
            "Joined videoserver meeting"
        );
        Ok(record)
    }

    /// Leave and detach every allocated handle, then destroy the connection.
    ///
    /// # Errors
    ///
    /// `GatewayError::MeetingMissing` or `GatewayError::SessionMissing` if
    /// either record is absent.
    #[instrument(skip_all, fields(meeting_id = %meeting_id, user_id = %user_id))]
    pub async fn leave_meeting(&self, user_id: &UserId, meeting_id: &MeetingId) -> Result<(), EngineError> {
        self.require_meeting(meeting_id).await?;
        let session = self.require_session(meeting_id, user_id).await?;

        let handles = [
            ("audio", session.audio_handle_id.as_deref()),
            ("video_in", session.video_in_handle_id.as_deref()),
            ("video_out", session.video_out_handle_id.as_deref()),
            ("screen", session.screen_handle_id.as_deref()),
        ];
        for (kind, handle_id) in handles {
            if let Some(handle_id) = handle_id {
                self.release_handle(&session.connection_id, handle_id, kind)
                    .await?;
            }
        }

        match self.transport.destroy(&session.connection_id).await {
            Ok(()) => {}
            Err(e @ GatewayError::Rejected { .. }) => {
                warn!(
                    target: "engine.gateway",
                    connection_id = %session.connection_id,
                    error = %e,
                    "Participant connection already gone"
                );
            }
            Err(e) => return Err(e.into()),
        }

        self.sessions.delete(meeting_id, user_id).await?;

        debug!(
            target: "engine.gateway",
            meeting_id = %meeting_id,
            user_id = %user_id,
            "Left videoserver meeting"
        );
        Ok(())
    }

    /// Publish or unpublish the video or screen feed.
    ///
    /// Returns the videoserver's SDP answer when publishing. A request that
    /// matches the recorded state makes no call and returns `None`.
    #[instrument(skip_all, fields(meeting_id = %meeting_id, user_id = %user_id, media_type = media_type.as_str(), enabled))]
    pub async fn update_media_stream(
        &self,
        user_id: &UserId,
        meeting_id: &MeetingId,
        media_type: MediaType,
        enabled: bool,
        sdp: Option<&str>,
    ) -> Result<Option<Jsep>, EngineError> {
        self.require_meeting(meeting_id).await?;
        let session = self.require_session(meeting_id, user_id).await?;

        if session.stream_on(media_type) == enabled {
            return Ok(None);
        }

        let handle_id = session.publisher_handle(media_type).ok_or_else(|| {
            EngineError::Internal(format!(
                "session of {user_id} has no {} handle",
                media_type.as_str()
            ))
        })?;

        let response = if enabled {
            let sdp = sdp.ok_or_else(|| {
                EngineError::BadRequest("an SDP offer is required to publish".to_string())
            })?;
            let offer = Jsep::offer(sdp);
            self.transport
                .message(
                    &session.connection_id,
                    handle_id,
                    &json!({"request": "publish"}),
                    Some(&offer),
                )
                .await?
        } else {
            self.transport
                .message(
                    &session.connection_id,
                    handle_id,
                    &json!({"request": "unpublish"}),
                    None,
                )
                .await?
        };

        let updated = match media_type {
            MediaType::Video => GatewaySession {
                video_out_stream_on: enabled,
                ..session
            },
            MediaType::Screen => GatewaySession {
                screen_stream_on: enabled,
                ..session
            },
        };
        self.sessions.update(&updated).await?;

        Ok(response.jsep)
    }

    /// Mute or unmute the user in the audio room.
    ///
    /// A request that matches the recorded state makes no call.
    #[instrument(skip_all, fields(meeting_id = %meeting_id, user_id = %user_id, enabled))]
    pub async fn update_audio_stream(
        &self,
        user_id: &UserId,
        meeting_id: &MeetingId,
        enabled: bool,
    ) -> Result<(), EngineError> {
        let meeting = self.require_meeting(meeting_id).await?;
        let session = self.require_session(meeting_id, user_id).await?;

        if session.audio_stream_on == enabled {
            return Ok(());
        }

        let body = json!({
            "request": if enabled { "unmute" } else { "mute" },
            "room": meeting.audio_room_id,
            "id": user_id.to_string(),
        });
        self.transport
            .message(&meeting.connection_id, &meeting.audio_handle_id, &body, None)
            .await?;

        self.sessions
            .update(&GatewaySession {
                audio_stream_on: enabled,
                ..session
            })
            .await?;
        Ok(())
    }

    /// Start the subscriber handle with the client's SDP answer.
    #[instrument(skip_all, fields(meeting_id = %meeting_id, user_id = %user_id))]
    pub async fn answer_rtc_media_stream(
        &self,
        user_id: &UserId,
        meeting_id: &MeetingId,
        sdp: &str,
    ) -> Result<(), EngineError> {
        self.require_meeting(meeting_id).await?;
        let session = self.require_session(meeting_id, user_id).await?;

        let handle_id = session.video_in_handle_id.as_deref().ok_or_else(|| {
            EngineError::BadRequest("no subscription to answer".to_string())
        })?;

        let answer = Jsep::answer(sdp);
        self.transport
            .message(
                &session.connection_id,
                handle_id,
                &json!({"request": "start"}),
                Some(&answer),
            )
            .await?;

        if !session.video_in_stream_on {
            self.sessions
                .update(&GatewaySession {
                    video_in_stream_on: true,
                    ..session
                })
                .await?;
        }
        Ok(())
    }

    /// Change the feeds the user receives.
    ///
    /// The first subscription attaches the subscriber handle and joins the
    /// video room with the requested streams; later calls send `update`.
    /// Returns the videoserver's SDP offer when it sends one.
    #[instrument(skip_all, fields(meeting_id = %meeting_id, user_id = %user_id))]
    pub async fn update_subscriptions_media_stream(
        &self,
        user_id: &UserId,
        meeting_id: &MeetingId,
        updates: &SubscriptionUpdates,
    ) -> Result<Option<Jsep>, EngineError> {
        let meeting = self.require_meeting(meeting_id).await?;
        let session = self.require_session(meeting_id, user_id).await?;

        if updates.is_empty() {
            return Ok(None);
        }

        let response = match session.video_in_handle_id.as_deref() {
            Some(handle_id) => {
                let body = json!({
                    "request": "update",
                    "subscribe": feeds(&updates.subscribe),
                    "unsubscribe": feeds(&updates.unsubscribe),
                });
                self.transport
                    .message(&session.connection_id, handle_id, &body, None)
                    .await?
            }
            None => {
                if updates.subscribe.is_empty() {
                    return Ok(None);
                }
                let handle_id = self
                    .transport
                    .attach(&session.connection_id, VIDEO_PLUGIN)
                    .await?;
                // Record the handle before joining so leave can release it
                self.sessions
                    .update(&GatewaySession {
                        video_in_handle_id: Some(handle_id.clone()),
                        ..session.clone()
                    })
                    .await?;

                let body = json!({
                    "request": "join",
                    "ptype": "subscriber",
                    "room": meeting.video_room_id,
                    "streams": feeds(&updates.subscribe),
                });
                self.transport
                    .message(&session.connection_id, &handle_id, &body, None)
                    .await?
            }
        };

        Ok(response.jsep)
    }

    /// Join the audio room with the client's SDP offer.
    ///
    /// The audio handle is attached on first use. Later offers renegotiate
    /// with `configure`. Returns the videoserver's SDP for relay.
    #[instrument(skip_all, fields(meeting_id = %meeting_id, user_id = %user_id))]
    pub async fn offer_rtc_audio_stream(
        &self,
        user_id: &UserId,
        meeting_id: &MeetingId,
        sdp: &str,
    ) -> Result<Option<Jsep>, EngineError> {
        let meeting = self.require_meeting(meeting_id).await?;
        let session = self.require_session(meeting_id, user_id).await?;
        let offer = Jsep::offer(sdp);
        let muted = !session.audio_stream_on;

        let response = match session.audio_handle_id.as_deref() {
            Some(handle_id) => {
                let body = json!({"request": "configure", "muted": muted});
                self.transport
                    .message(&session.connection_id, handle_id, &body, Some(&offer))
                    .await?
            }
            None => {
                let handle_id = self
                    .transport
                    .attach(&session.connection_id, AUDIO_PLUGIN)
                    .await?;
                self.sessions
                    .update(&GatewaySession {
                        audio_handle_id: Some(handle_id.clone()),
                        ..session.clone()
                    })
                    .await?;

                let filename = format!(
                    "{}/audio_{user_id}_{}",
                    self.rooms.recording_dir,
                    self.clock.now().timestamp_millis()
                );
                let body = json!({
                    "request": "join",
                    "room": meeting.audio_room_id,
                    "id": user_id.to_string(),
                    "muted": muted,
                    "filename": filename,
                });
                self.transport
                    .message(&session.connection_id, &handle_id, &body, Some(&offer))
                    .await?
            }
        };

        Ok(response.jsep)
    }

    async fn require_meeting(&self, meeting_id: &MeetingId) -> Result<GatewayMeeting, EngineError> {
        self.meetings.get(meeting_id).await?.ok_or_else(|| {
            GatewayError::MeetingMissing {
                meeting_id: meeting_id.to_string(),
            }
            .into()
        })
    }

    async fn require_session(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<GatewaySession, EngineError> {
        self.sessions.get(meeting_id, user_id).await?.ok_or_else(|| {
            GatewayError::SessionMissing {
                meeting_id: meeting_id.to_string(),
                user_id: user_id.to_string(),
            }
            .into()
        })
    }

    /// Plugin-level destroy, then detach. "No such room" still detaches,
    /// and a rejected detach means an earlier attempt already released the
    /// handle, so a stop can be retried after a partial teardown.
    async fn destroy_room(
        &self,
        connection_id: &str,
        handle_id: &str,
        room_id: &str,
        no_such_room: i64,
    ) -> Result<(), EngineError> {
        let body = json!({"request": "destroy", "room": room_id, "permanent": false});
        match self
            .transport
            .message(connection_id, handle_id, &body, None)
            .await
        {
            Ok(_) => {}
            Err(GatewayError::Rejected { code, reason, .. }) if code == no_such_room => {
                warn!(
                    target: "engine.gateway",
                    room_id = %room_id,
                    code,
                    reason = %reason,
                    "Videoserver room already gone, detaching handle"
                );
            }
            Err(e) => return Err(e.into()),
        }

        match self.transport.detach(connection_id, handle_id).await {
            Ok(()) => Ok(()),
            Err(e @ GatewayError::Rejected { .. }) => {
                warn!(
                    target: "engine.gateway",
                    room_id = %room_id,
                    error = %e,
                    "Videoserver handle already detached"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Plugin-level leave, then detach. Rejections mean the videoserver no
    /// longer holds the resource and are not fatal.
    async fn release_handle(
        &self,
        connection_id: &str,
        handle_id: &str,
        kind: &str,
    ) -> Result<(), EngineError> {
        for step in ["leave", "detach"] {
            let result = if step == "leave" {
                self.transport
                    .message(connection_id, handle_id, &json!({"request": "leave"}), None)
                    .await
                    .map(|_| ())
            } else {
                self.transport.detach(connection_id, handle_id).await
            };

            match result {
                Ok(()) => {}
                Err(e @ GatewayError::Rejected { .. }) => {
                    warn!(
                        target: "engine.gateway",
                        handle = kind,
                        step,
                        error = %e,
                        "Videoserver handle already released"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn feeds(ids: &[FeedId]) -> Vec<Value> {
    ids.iter()
        .map(|feed| json!({"feed": feed.to_string()}))
        .collect()
}
