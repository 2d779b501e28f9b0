//! Observability for the meeting engine.
//!
//! # Privacy by Default
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicitly listed
//! fields. SDP bodies and the videoserver `apisecret` are never logged.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `engine_gateway_requests_total` | Counter | `verb`, `status` |
//! | `engine_gateway_request_duration_seconds` | Histogram | `verb` |
//! | `engine_meetings_active` | Gauge | none |
//! | `engine_participants_joined_total` | Counter | none |
//! | `engine_participants_left_total` | Counter | `reason` |
//! | `engine_events_published_total` | Counter | `destination` |
//! | `engine_errors_total` | Counter | `operation`, `error_type` |
//! | `engine_reconciled_resources_total` | Counter | `resource` |
//! | `engine_actor_mailbox_depth` | Gauge | none |
//! | `engine_operation_duration_seconds` | Histogram | `operation` |

pub mod health;
pub mod metrics;

pub use health::{health_router, metrics_router, HealthState};
pub use metrics::init_metrics_recorder;
