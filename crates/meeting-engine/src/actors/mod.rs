//! Per-meeting actors.
//!
//! Every mutating operation on a meeting is a [`MeetingMessage`] handled by
//! that meeting's [`MeetingActor`], one at a time. The
//! [`MeetingSupervisor`] owns the actors and their cancellation tokens.
//!
//! ```text
//! MeetingEngine
//!   └── MeetingSupervisor
//!         ├── MeetingActor (meeting A)
//!         └── MeetingActor (meeting B)
//! ```

pub mod meeting;
pub mod messages;
pub mod metrics;
pub mod supervisor;

pub use meeting::{MeetingActor, MeetingActorHandle};
pub use messages::{MeetingMessage, Reply};
pub use metrics::{MailboxLevel, MailboxMonitor};
pub use supervisor::MeetingSupervisor;
