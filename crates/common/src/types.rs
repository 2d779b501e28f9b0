//! Strongly typed identifiers shared by the engine crates.
//!
//! Every identifier wraps a [`Uuid`] and serializes transparently, so it
//! travels over the wire as a plain UUID string.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Borrow the underlying UUID
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a meeting
    MeetingId
);

uuid_id!(
    /// Unique identifier for a chat room that owns meetings
    RoomId
);

uuid_id!(
    /// Unique identifier for a user
    UserId
);

uuid_id!(
    /// Identifier of one client connection ("queue") of a user.
    ///
    /// A user connected from two devices holds two session ids.
    SessionId
);

uuid_id!(
    /// Unique identifier for a waiting-room entry
    WaitingId
);
