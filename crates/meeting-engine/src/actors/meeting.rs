//! `MeetingActor`: the unit of serialization for one meeting.
//!
//! Each actor owns a bounded mailbox and handles one message at a time, so
//! every load-decide-call-persist-emit sequence for a meeting runs to
//! completion before the next one starts. Actors for different meetings run
//! concurrently.

use super::messages::{MeetingMessage, Reply};
use super::metrics::MailboxMonitor;
use crate::errors::EngineError;
use crate::services::ServiceSet;
use common::types::MeetingId;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Channel buffer size for the meeting mailbox.
const MEETING_CHANNEL_BUFFER: usize = 256;

/// Handle to a `MeetingActor`.
#[derive(Clone)]
pub struct MeetingActorHandle {
    sender: mpsc::Sender<MeetingMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl MeetingActorHandle {
    /// Send a message built around a fresh reply channel and wait for the
    /// actor's answer.
    ///
    /// # Errors
    ///
    /// The operation's own error, or `EngineError::Internal` if the actor is
    /// gone.
    pub async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> MeetingMessage,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(build(tx)).await {
            self.mailbox.record_dequeue();
            return Err(EngineError::Internal(format!("channel send failed: {e}")));
        }

        rx.await
            .map_err(|e| EngineError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor. Queued messages are answered with an error.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

pub struct MeetingActor {
    meeting_id: MeetingId,
    receiver: mpsc::Receiver<MeetingMessage>,
    /// Child of the supervisor's token.
    cancel_token: CancellationToken,
    services: ServiceSet,
    mailbox: Arc<MailboxMonitor>,
}

impl MeetingActor {
    /// Spawn a meeting actor. Returns its handle and the task join handle.
    pub fn spawn(
        meeting_id: MeetingId,
        services: ServiceSet,
        cancel_token: CancellationToken,
        queued_total: Arc<AtomicUsize>,
    ) -> (MeetingActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(MEETING_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(meeting_id.to_string(), queued_total));

        let actor = Self {
            meeting_id,
            receiver,
            cancel_token: cancel_token.clone(),
            services,
            mailbox: Arc::clone(&mailbox),
        };
        let task_handle = tokio::spawn(actor.run());

        let handle = MeetingActorHandle {
            sender,
            cancel_token,
            mailbox,
        };
        (handle, task_handle)
    }

    #[instrument(skip_all, name = "engine.actor.meeting", fields(meeting_id = %self.meeting_id))]
    async fn run(mut self) {
        debug!(
            target: "engine.actor.meeting",
            meeting_id = %self.meeting_id,
            "MeetingActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "engine.actor.meeting",
                        meeting_id = %self.meeting_id,
                        "MeetingActor received cancellation signal"
                    );
                    self.drain().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            debug!(
                                target: "engine.actor.meeting",
                                meeting_id = %self.meeting_id,
                                "MeetingActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            target: "engine.actor.meeting",
            meeting_id = %self.meeting_id,
            messages_processed = self.mailbox.messages_processed(),
            peak_depth = self.mailbox.peak_depth(),
            "MeetingActor stopped"
        );
    }

    /// Refuse everything still queued so no caller waits on a dead actor.
    async fn drain(&mut self) {
        self.receiver.close();
        while let Some(message) = self.receiver.recv().await {
            let operation = message.operation();
            refuse(
                message,
                &EngineError::Internal(format!("meeting actor stopped before {operation}")),
            );
            self.mailbox.record_dequeue();
        }
    }

    async fn handle_message(&self, message: MeetingMessage) {
        let meeting_id = &self.meeting_id;
        let services = &self.services;

        debug!(
            target: "engine.actor.meeting",
            meeting_id = %meeting_id,
            operation = message.operation(),
            "Handling meeting operation"
        );

        // A dropped receiver means the caller timed out; the outcome stands.
        match message {
            MeetingMessage::UpdateMeeting {
                active,
                requester,
                respond_to,
            } => {
                let result = services
                    .meetings
                    .update_meeting(meeting_id, active, &requester)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::DeleteMeeting {
                requester,
                respond_to,
            } => {
                let result = match requester {
                    Some(requester) => {
                        services
                            .meetings
                            .delete_meeting(meeting_id, &requester)
                            .await
                    }
                    None => services.meetings.purge_meeting(meeting_id).await,
                };
                let _ = respond_to.send(result);
            }

            MeetingMessage::InsertParticipant {
                settings,
                user_id,
                session_id,
                respond_to,
            } => {
                let result = services
                    .participants
                    .insert_participant(meeting_id, &settings, &user_id, &session_id)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::RemoveParticipant {
                user_id,
                respond_to,
            } => {
                let result = services
                    .participants
                    .remove_participant(meeting_id, &user_id)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::RemoveParticipantBySession {
                session_id,
                respond_to,
            } => {
                let result = services
                    .participants
                    .remove_participant_by_session(&session_id)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::UpdateMediaStream {
                settings,
                requester,
                respond_to,
            } => {
                let result = services
                    .participants
                    .update_media_stream(meeting_id, &settings, &requester)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::UpdateAudioStream {
                settings,
                requester,
                respond_to,
            } => {
                let result = services
                    .participants
                    .update_audio_stream(meeting_id, &settings, &requester)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::UpdateHandStatus {
                settings,
                requester,
                respond_to,
            } => {
                let result = services
                    .participants
                    .update_hand_status(meeting_id, &settings, &requester)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::OfferRtcAudioStream {
                sdp,
                requester,
                respond_to,
            } => {
                let result = services
                    .participants
                    .offer_rtc_audio_stream(meeting_id, &sdp, &requester)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::AnswerRtcMediaStream {
                sdp,
                requester,
                respond_to,
            } => {
                let result = services
                    .participants
                    .answer_rtc_media_stream(meeting_id, &sdp, &requester)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::UpdateSubscriptions {
                updates,
                requester,
                respond_to,
            } => {
                let result = services
                    .participants
                    .update_subscriptions_media_stream(meeting_id, &updates, &requester)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::UpdateQueue {
                target,
                decision,
                requester,
                respond_to,
            } => {
                let result = services
                    .waiting
                    .update_queue(meeting_id, &target, decision, &requester)
                    .await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::RemoveFromQueue {
                session_id,
                respond_to,
            } => {
                let result = services.waiting.remove_from_queue(&session_id).await;
                let _ = respond_to.send(result);
            }

            MeetingMessage::Reconcile { respond_to } => {
                let result = services.meetings.reconcile(meeting_id).await;
                let _ = respond_to.send(result);
            }
        }
    }
}

fn refuse(message: MeetingMessage, error: &EngineError) {
    match message {
        MeetingMessage::UpdateMeeting { respond_to, .. } => {
            let _ = respond_to.send(Err(error.clone()));
        }
        MeetingMessage::InsertParticipant { respond_to, .. } => {
            let _ = respond_to.send(Err(error.clone()));
        }
        MeetingMessage::Reconcile { respond_to } => {
            let _ = respond_to.send(Err(error.clone()));
        }
        MeetingMessage::DeleteMeeting { respond_to, .. }
        | MeetingMessage::RemoveParticipant { respond_to, .. }
        | MeetingMessage::RemoveParticipantBySession { respond_to, .. }
        | MeetingMessage::UpdateMediaStream { respond_to, .. }
        | MeetingMessage::UpdateAudioStream { respond_to, .. }
        | MeetingMessage::UpdateHandStatus { respond_to, .. }
        | MeetingMessage::OfferRtcAudioStream { respond_to, .. }
        | MeetingMessage::AnswerRtcMediaStream { respond_to, .. }
        | MeetingMessage::UpdateSubscriptions { respond_to, .. }
        | MeetingMessage::UpdateQueue { respond_to, .. }
        | MeetingMessage::RemoveFromQueue { respond_to, .. } => {
            let _ = respond_to.send(Err(error.clone()));
        }
    }
}
