//! Event sink that records every delivery.
//!
//! Deliveries are kept in one global order, so tests can assert both what
//! each destination saw and how deliveries to different destinations
//! interleave.

use common::types::{SessionId, UserId};
use meeting_engine::events::DomainEvent;
use meeting_engine::fanout::EventSink;
use std::sync::{Arc, Mutex};

/// Where an event was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    User(UserId),
    Session(SessionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub destination: Destination,
    pub event: DomainEvent,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delivery so far, oldest first.
    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Events delivered to the user's exchange, in order.
    #[must_use]
    pub fn events_for_user(&self, user_id: &UserId) -> Vec<DomainEvent> {
        self.filtered(|d| d == &Destination::User(*user_id))
    }

    /// Events delivered to one session queue, in order.
    #[must_use]
    pub fn events_for_session(&self, session_id: &SessionId) -> Vec<DomainEvent> {
        self.filtered(|d| d == &Destination::Session(*session_id))
    }

    /// Event names delivered to the user, in order.
    #[must_use]
    pub fn names_for_user(&self, user_id: &UserId) -> Vec<&'static str> {
        self.events_for_user(user_id)
            .iter()
            .map(DomainEvent::name)
            .collect()
    }

    /// Event names delivered to the session, in order.
    #[must_use]
    pub fn names_for_session(&self, session_id: &SessionId) -> Vec<&'static str> {
        self.events_for_session(session_id)
            .iter()
            .map(DomainEvent::name)
            .collect()
    }

    /// Events of the given name delivered to the user.
    #[must_use]
    pub fn count_for_user(&self, user_id: &UserId, name: &str) -> usize {
        self.names_for_user(user_id)
            .into_iter()
            .filter(|n| *n == name)
            .count()
    }

    /// Position of the first delivery matching `predicate`.
    #[must_use]
    pub fn position(&self, predicate: impl Fn(&Delivery) -> bool) -> Option<usize> {
        self.deliveries.lock().unwrap().iter().position(predicate)
    }

    pub fn clear(&self) {
        self.deliveries.lock().unwrap().clear();
    }

    fn filtered(&self, keep: impl Fn(&Destination) -> bool) -> Vec<DomainEvent> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| keep(&d.destination))
            .map(|d| d.event.clone())
            .collect()
    }

    fn push(&self, destination: Destination, event: &DomainEvent) {
        self.deliveries.lock().unwrap().push(Delivery {
            destination,
            event: event.clone(),
        });
    }
}

impl EventSink for RecordingSink {
    fn publish_to_user(&self, user_id: &UserId, event: &DomainEvent) {
        self.push(Destination::User(*user_id), event);
    }

    fn publish_to_session(&self, session_id: &SessionId, event: &DomainEvent) {
        self.push(Destination::Session(*session_id), event);
    }
}
