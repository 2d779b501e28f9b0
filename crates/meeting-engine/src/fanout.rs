//! Event delivery to connected clients.
//!
//! Two destinations exist: the per-user exchange, seen by every client of
//! that user, and the per-session queue, seen by a single client
//! connection. Publishing is synchronous so that the order of `publish_*`
//! calls for one destination is the order in which its subscribers receive
//! events.

use crate::events::DomainEvent;
use crate::observability::metrics;
use common::types::{SessionId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::trace;

/// Destination for domain events.
pub trait EventSink: Send + Sync {
    /// Deliver to every client of `user_id`.
    fn publish_to_user(&self, user_id: &UserId, event: &DomainEvent);

    /// Deliver to one client connection.
    fn publish_to_session(&self, session_id: &SessionId, event: &DomainEvent);
}

/// Publish `event` to each user in order.
pub fn emit_to_users(sink: &dyn EventSink, user_ids: &[UserId], event: &DomainEvent) {
    for user_id in user_ids {
        emit_to_user(sink, user_id, event);
    }
}

/// Publish `event` to one user.
pub fn emit_to_user(sink: &dyn EventSink, user_id: &UserId, event: &DomainEvent) {
    trace!(
        target: "engine.fanout",
        event = event.name(),
        user_id = %user_id,
        "Publishing event to user"
    );
    sink.publish_to_user(user_id, event);
    metrics::record_event_published("user");
}

/// Publish `event` to one client connection.
pub fn emit_to_session(sink: &dyn EventSink, session_id: &SessionId, event: &DomainEvent) {
    trace!(
        target: "engine.fanout",
        event = event.name(),
        session_id = %session_id,
        "Publishing event to session"
    );
    sink.publish_to_session(session_id, event);
    metrics::record_event_published("session");
}

/// In-process fanout over unbounded channels.
///
/// A user may hold several subscriptions (one per device); a session holds
/// at most one, and subscribing again replaces it. Subscriptions whose
/// receiver was dropped are pruned on the next publish.
#[derive(Debug, Clone, Default)]
pub struct EventFanout {
    inner: Arc<Mutex<FanoutInner>>,
}

#[derive(Debug, Default)]
struct FanoutInner {
    users: HashMap<UserId, Vec<mpsc::UnboundedSender<DomainEvent>>>,
    sessions: HashMap<SessionId, mpsc::UnboundedSender<DomainEvent>>,
}

impl EventFanout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event published to `user_id` from now on.
    pub fn subscribe_user(&self, user_id: UserId) -> mpsc::UnboundedReceiver<DomainEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().users.entry(user_id).or_default().push(tx);
        rx
    }

    /// Receive every event published to `session_id` from now on.
    pub fn subscribe_session(&self, session_id: SessionId) -> mpsc::UnboundedReceiver<DomainEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().sessions.insert(session_id, tx);
        rx
    }

    /// Number of live user subscriptions.
    #[must_use]
    pub fn user_subscription_count(&self) -> usize {
        self.lock().users.values().map(Vec::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FanoutInner> {
        // Senders stay consistent across a panic; keep delivering.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for EventFanout {
    fn publish_to_user(&self, user_id: &UserId, event: &DomainEvent) {
        let mut inner = self.lock();
        let emptied = match inner.users.get_mut(user_id) {
            Some(senders) => {
                senders.retain(|tx| tx.send(event.clone()).is_ok());
                senders.is_empty()
            }
            None => false,
        };
        if emptied {
            inner.users.remove(user_id);
        }
    }

    fn publish_to_session(&self, session_id: &SessionId, event: &DomainEvent) {
        let mut inner = self.lock();
        let closed = inner
            .sessions
            .get(session_id)
            .is_some_and(|tx| tx.send(event.clone()).is_err());
        if closed {
            inner.sessions.remove(session_id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::{MeetingId, RoomId};

    fn started(meeting_id: MeetingId) -> DomainEvent {
        DomainEvent::MeetingStarted {
            meeting_id,
            room_id: RoomId::new(),
        }
    }

    #[tokio::test]
    async fn test_user_subscribers_receive_in_publish_order() {
        let fanout = EventFanout::new();
        let user = UserId::new();
        let mut phone = fanout.subscribe_user(user);
        let mut laptop = fanout.subscribe_user(user);

        let first = started(MeetingId::new());
        let second = started(MeetingId::new());
        emit_to_users(&fanout, &[user], &first);
        emit_to_users(&fanout, &[user], &second);

        for rx in [&mut phone, &mut laptop] {
            assert_eq!(rx.recv().await.unwrap(), first);
            assert_eq!(rx.recv().await.unwrap(), second);
        }
    }

    #[tokio::test]
    async fn test_session_queue_is_point_to_point() {
        let fanout = EventFanout::new();
        let user = UserId::new();
        let session = SessionId::new();
        let mut user_rx = fanout.subscribe_user(user);
        let mut session_rx = fanout.subscribe_session(session);

        let event = DomainEvent::ParticipantClashed {
            meeting_id: MeetingId::new(),
            user_id: user,
        };
        emit_to_session(&fanout, &session, &event);

        assert_eq!(session_rx.recv().await.unwrap(), event);
        assert!(user_rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_receivers_are_pruned() {
        let fanout = EventFanout::new();
        let user = UserId::new();
        let kept = fanout.subscribe_user(user);
        drop(fanout.subscribe_user(user));
        assert_eq!(fanout.user_subscription_count(), 2);

        fanout.publish_to_user(&user, &started(MeetingId::new()));
        assert_eq!(fanout.user_subscription_count(), 1);

        drop(kept);
        fanout.publish_to_user(&user, &started(MeetingId::new()));
        assert_eq!(fanout.user_subscription_count(), 0);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let fanout = EventFanout::new();
        fanout.publish_to_user(&UserId::new(), &started(MeetingId::new()));
        fanout.publish_to_session(&SessionId::new(), &started(MeetingId::new()));
        assert_eq!(fanout.user_subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_resubscribing_session_replaces_queue() {
        let fanout = EventFanout::new();
        let session = SessionId::new();
        let mut old_rx = fanout.subscribe_session(session);
        let mut new_rx = fanout.subscribe_session(session);

        let event = started(MeetingId::new());
        fanout.publish_to_session(&session, &event);

        assert_eq!(new_rx.recv().await.unwrap(), event);
        assert!(old_rx.recv().await.is_none());
    }
}
