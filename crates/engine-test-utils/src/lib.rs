//! # Engine Test Utilities
//!
//! Shared test utilities for the meeting session engine.
//!
//! This crate provides fakes and a fully wired engine for isolated testing
//! without a real videoserver.
//!
//! ## Modules
//!
//! - `videoserver` - `FakeVideoServer`, a wiremock server speaking the
//!   videoserver protocol, with call recording and failure injection
//! - `sink` - `RecordingSink`, an event sink keeping every delivery in order
//! - `time` - `ManualClock` and `SequentialIds` for deterministic records
//! - `harness` - `EngineHarness`, the engine wired to the fakes and
//!   in-memory stores
//!
//! ## Usage
//!
//! ```rust,ignore
//! use engine_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = EngineHarness::start().await;
//!     let alice = harness.add_member().await;
//!
//!     let meeting = harness.create_meeting(MeetingType::Permanent).await;
//!     harness.join(&meeting.id, &alice).await;
//!
//!     assert_eq!(harness.videoserver.verb_count("create"), 2);
//!     assert!(harness.sink.names_for_user(&alice.user_id).contains(&"ParticipantJoined"));
//! }
//! ```

pub mod harness;
pub mod sink;
pub mod time;
pub mod videoserver;

pub use harness::*;
pub use sink::*;
pub use time::*;
pub use videoserver::*;
