//! `MeetingSupervisor`: spawns, tracks and stops meeting actors.
//!
//! Actors are spawned lazily on the first mutating operation for a meeting
//! and live until the meeting is deleted or the engine shuts down. Each
//! actor gets a child of the supervisor's cancellation token.

use super::meeting::{MeetingActor, MeetingActorHandle};
use crate::services::ServiceSet;
use common::types::MeetingId;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct ManagedMeeting {
    handle: MeetingActorHandle,
    task_handle: JoinHandle<()>,
}

pub struct MeetingSupervisor {
    services: ServiceSet,
    cancel_token: CancellationToken,
    meetings: Mutex<HashMap<MeetingId, ManagedMeeting>>,
    /// Messages queued or in flight across every actor.
    queued_total: Arc<AtomicUsize>,
}

impl MeetingSupervisor {
    #[must_use]
    pub fn new(services: ServiceSet, cancel_token: CancellationToken) -> Self {
        Self {
            services,
            cancel_token,
            meetings: Mutex::new(HashMap::new()),
            queued_total: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle to the meeting's actor, spawning one if none is running.
    ///
    /// An actor whose task ended (cancelled or panicked) is replaced.
    pub fn get_or_spawn(&self, meeting_id: &MeetingId) -> MeetingActorHandle {
        let mut meetings = self.meetings.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(managed) = meetings.get(meeting_id) {
            if !managed.task_handle.is_finished() && !managed.handle.is_cancelled() {
                return managed.handle.clone();
            }
            warn!(
                target: "engine.actor.supervisor",
                meeting_id = %meeting_id,
                "Meeting actor ended unexpectedly, respawning"
            );
            if let Some(stale) = meetings.remove(meeting_id) {
                report_finished(meeting_id, stale.task_handle);
            }
        }

        let (handle, task_handle) = MeetingActor::spawn(
            *meeting_id,
            self.services.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.queued_total),
        );
        meetings.insert(
            *meeting_id,
            ManagedMeeting {
                handle: handle.clone(),
                task_handle,
            },
        );

        debug!(
            target: "engine.actor.supervisor",
            meeting_id = %meeting_id,
            actors = meetings.len(),
            "Spawned meeting actor"
        );
        handle
    }

    /// Cancel and forget the meeting's actor.
    pub fn remove(&self, meeting_id: &MeetingId) {
        let removed = self
            .meetings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(meeting_id);

        if let Some(managed) = removed {
            managed.handle.cancel();
            debug!(
                target: "engine.actor.supervisor",
                meeting_id = %meeting_id,
                "Removed meeting actor"
            );
        }
    }

    /// Number of tracked actors.
    #[must_use]
    pub fn actor_count(&self) -> usize {
        self.meetings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cancel every actor and wait for their tasks, each bounded by
    /// `deadline`.
    pub async fn shutdown(&self, deadline: Duration) {
        self.cancel_token.cancel();

        let drained: Vec<(MeetingId, ManagedMeeting)> = self
            .meetings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        info!(
            target: "engine.actor.supervisor",
            actors = drained.len(),
            "Shutting down meeting actors"
        );

        for (meeting_id, managed) in drained {
            match tokio::time::timeout(deadline, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "engine.actor.supervisor",
                        meeting_id = %meeting_id,
                        "Meeting actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "engine.actor.supervisor",
                        meeting_id = %meeting_id,
                        error = ?e,
                        "Meeting actor task failed during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "engine.actor.supervisor",
                        meeting_id = %meeting_id,
                        "Meeting actor shutdown timed out"
                    );
                }
            }
        }

        info!(target: "engine.actor.supervisor", "Meeting actors stopped");
    }
}

fn report_finished(meeting_id: &MeetingId, task_handle: JoinHandle<()>) {
    if !task_handle.is_finished() {
        task_handle.abort();
        return;
    }
    let meeting_id = *meeting_id;
    tokio::spawn(async move {
        if let Err(join_error) = task_handle.await {
            if join_error.is_panic() {
                error!(
                    target: "engine.actor.supervisor",
                    meeting_id = %meeting_id,
                    error = ?join_error,
                    "Meeting actor panicked"
                );
            }
        }
    });
}
