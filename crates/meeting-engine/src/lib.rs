//! Meeting Session Engine Library
//!
//! Backend session engine for multi-party audio/video meetings inside a chat
//! platform. It turns high-level actions (join, leave, mute, raise hand,
//! admit from the waiting room) into:
//!
//! - a consistent server-side view of who is in a meeting and in what state
//! - a correctly sequenced set of calls to an external WebRTC videoserver
//! - ordered notification of every affected client
//!
//! # Architecture
//!
//! ```text
//! MeetingEngine (facade)
//! ├── reads ──────────────► services ──► stores
//! └── mutations ──► MeetingSupervisor
//!                   └── MeetingActor (one per meeting, serializes operations)
//!                       └── services
//!                           ├── GatewayClient ──► videoserver (HTTP)
//!                           ├── stores / RoomDirectory
//!                           └── EventSink (per-user and per-session delivery)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Per-meeting serialization**: every mutation for a meeting runs inside
//!   its actor, videoserver calls included; meetings never block each other
//! - **Videoserver first, then persist**: a failed videoserver call leaves
//!   the domain records untouched
//! - **Silent leave**: removing an absent participant succeeds with no calls
//!   and no events
//! - **No automatic rollback**: partial videoserver resources are cleaned by
//!   the opt-in reconciliation task
//!
//! # Modules
//!
//! - [`actors`] - Per-meeting actors and their supervisor
//! - [`config`] - Configuration from environment
//! - [`engine`] - The caller-facing [`MeetingEngine`]
//! - [`errors`] - Error taxonomy
//! - [`fanout`] - Event delivery
//! - [`gateway`] - Videoserver protocol client
//! - [`services`] - Meeting, participant and waiting-room logic
//! - [`tasks`] - Background reconciliation

pub mod actors;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod fanout;
pub mod gateway;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod services;
pub mod tasks;

pub use engine::{EngineParts, MeetingEngine};
pub use errors::{EngineError, GatewayError};
