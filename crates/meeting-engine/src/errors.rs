//! Meeting engine error types.
//!
//! Every failure a caller can observe is an [`EngineError`]. Callers branch
//! on [`EngineError::kind`] (the taxonomy) and on
//! [`EngineError::is_retryable`]. Internal details are logged server-side
//! and never returned through [`EngineError::client_message`].

use thiserror::Error;

/// Coarse error taxonomy exposed to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Meeting, participant, waiting entry or gateway resource absent.
    NotFound,
    /// Duplicate join with the same session, meeting already active.
    Conflict,
    /// Not a room member/owner, not a moderator.
    Forbidden,
    /// Acting on another user without moderation rights, malformed settings.
    BadRequest,
    /// The videoserver call failed or its precondition was violated.
    Gateway,
    /// Store failure, timeout or internal bug.
    Internal,
}

/// Meeting engine error type.
///
/// Maps to HTTP-style status codes at the API boundary:
/// - `*NotFound`: 404
/// - `Conflict`: 409
/// - `Forbidden`: 403
/// - `BadRequest`: 400
/// - `Gateway`: 404/409 for violated preconditions, 502 for rejections,
///   503/504 for transport failures
/// - `Timeout`: 504
/// - `Store`, `Internal`: 500
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Meeting not found.
    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    /// No live participant for the user or session.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// No waiting-room entry for the user or session.
    #[error("Waiting entry not found: {0}")]
    WaitingEntryNotFound(String),

    /// Conflict error (e.g., session already inserted).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller lacks the membership or ownership the action needs.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request is malformed or targets a user it may not act on.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Videoserver protocol failure.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// The operation did not complete within the configured timeout.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Videoserver failures.
///
/// The first four variants are violated preconditions and are definitive.
/// `Transport`, `Timeout` and `Unavailable` describe the link to the
/// videoserver and may succeed when retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// No gateway meeting is recorded for the meeting.
    #[error("No videoserver meeting for meeting {meeting_id}")]
    MeetingMissing { meeting_id: String },

    /// No gateway session is recorded for the user in the meeting.
    #[error("No videoserver session for user {user_id} in meeting {meeting_id}")]
    SessionMissing { meeting_id: String, user_id: String },

    /// A gateway meeting already exists for the meeting.
    #[error("Videoserver meeting already active for meeting {meeting_id}")]
    AlreadyActive { meeting_id: String },

    /// A gateway session already exists for the user in the meeting.
    #[error("User {user_id} already joined videoserver meeting {meeting_id}")]
    AlreadyJoined { meeting_id: String, user_id: String },

    /// The videoserver answered with an error status.
    #[error("Videoserver rejected {request}: code {code}, {reason}")]
    Rejected {
        request: String,
        code: i64,
        reason: String,
    },

    /// The videoserver answer could not be interpreted.
    #[error("Invalid videoserver response to {request}: {reason}")]
    InvalidResponse { request: String, reason: String },

    /// The HTTP request could not be sent or read.
    #[error("Videoserver transport error: {0}")]
    Transport(String),

    /// The HTTP request exceeded its timeout.
    #[error("Videoserver request timed out")]
    Timeout,

    /// The videoserver answered with a 5xx status.
    #[error("Videoserver unavailable: HTTP {0}")]
    Unavailable(u16),
}

impl GatewayError {
    /// Whether a caller may retry the operation that produced this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport(_) | GatewayError::Timeout | GatewayError::Unavailable(_)
        )
    }

    /// Whether this error reports a violated precondition.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            GatewayError::MeetingMissing { .. }
                | GatewayError::SessionMissing { .. }
                | GatewayError::AlreadyActive { .. }
                | GatewayError::AlreadyJoined { .. }
        )
    }

    /// Bounded label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            GatewayError::MeetingMissing { .. } => "meeting_missing",
            GatewayError::SessionMissing { .. } => "session_missing",
            GatewayError::AlreadyActive { .. } => "already_active",
            GatewayError::AlreadyJoined { .. } => "already_joined",
            GatewayError::Rejected { .. } => "rejected",
            GatewayError::InvalidResponse { .. } => "invalid_response",
            GatewayError::Transport(_) => "transport",
            GatewayError::Timeout => "timeout",
            GatewayError::Unavailable(_) => "unavailable",
        }
    }
}

impl EngineError {
    /// Returns the taxonomy kind for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MeetingNotFound(_)
            | EngineError::ParticipantNotFound(_)
            | EngineError::WaitingEntryNotFound(_) => ErrorKind::NotFound,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::BadRequest(_) => ErrorKind::BadRequest,
            EngineError::Gateway(_) => ErrorKind::Gateway,
            EngineError::Store(_) | EngineError::Timeout(_) | EngineError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Returns the HTTP-style status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::MeetingNotFound(_)
            | EngineError::ParticipantNotFound(_)
            | EngineError::WaitingEntryNotFound(_) => 404,
            EngineError::Conflict(_) => 409,
            EngineError::Forbidden(_) => 403,
            EngineError::BadRequest(_) => 400,
            EngineError::Gateway(e) => match e {
                GatewayError::MeetingMissing { .. } | GatewayError::SessionMissing { .. } => 404,
                GatewayError::AlreadyActive { .. } | GatewayError::AlreadyJoined { .. } => 409,
                GatewayError::Rejected { .. } | GatewayError::InvalidResponse { .. } => 502,
                GatewayError::Transport(_) | GatewayError::Unavailable(_) => 503,
                GatewayError::Timeout => 504,
            },
            EngineError::Timeout(_) => 504,
            EngineError::Store(_) | EngineError::Internal(_) => 500,
        }
    }

    /// Whether the caller may retry the operation.
    ///
    /// Only transport-level gateway failures and operation timeouts qualify.
    /// Validation, authorization and precondition failures never do.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Gateway(e) => e.is_retryable(),
            EngineError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Returns a bounded label string for the error variant (for metrics).
    #[must_use]
    pub fn error_type_label(&self) -> &'static str {
        match self {
            EngineError::MeetingNotFound(_) => "meeting_not_found",
            EngineError::ParticipantNotFound(_) => "participant_not_found",
            EngineError::WaitingEntryNotFound(_) => "waiting_entry_not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::BadRequest(_) => "bad_request",
            EngineError::Gateway(e) => e.label(),
            EngineError::Store(_) => "store",
            EngineError::Timeout(_) => "timeout",
            EngineError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            EngineError::MeetingNotFound(_) => "Meeting not found".to_string(),
            EngineError::ParticipantNotFound(_) => "Participant not found".to_string(),
            EngineError::WaitingEntryNotFound(_) => "Queued user not found".to_string(),
            EngineError::Conflict(msg)
            | EngineError::Forbidden(msg)
            | EngineError::BadRequest(msg) => msg.clone(),
            EngineError::Gateway(e) if e.is_precondition() => e.to_string(),
            EngineError::Gateway(_) => "Media server error, please try again".to_string(),
            EngineError::Timeout(_) => "Request timed out, please try again".to_string(),
            EngineError::Store(_) | EngineError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            EngineError::MeetingNotFound("m".to_string()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            EngineError::ParticipantNotFound("p".to_string()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            EngineError::WaitingEntryNotFound("w".to_string()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            EngineError::Conflict("dup".to_string()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            EngineError::Forbidden("owner only".to_string()).kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            EngineError::BadRequest("bad".to_string()).kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(
            EngineError::Gateway(GatewayError::Timeout).kind(),
            ErrorKind::Gateway
        );
        assert_eq!(
            EngineError::Store("down".to_string()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_gateway_preconditions_map_to_not_found_and_conflict() {
        let missing = EngineError::Gateway(GatewayError::MeetingMissing {
            meeting_id: "m1".to_string(),
        });
        assert_eq!(missing.status_code(), 404);
        assert!(!missing.is_retryable());

        let joined = EngineError::Gateway(GatewayError::AlreadyJoined {
            meeting_id: "m1".to_string(),
            user_id: "u1".to_string(),
        });
        assert_eq!(joined.status_code(), 409);
        assert!(!joined.is_retryable());
    }

    #[test]
    fn test_only_transport_failures_are_retryable() {
        assert!(EngineError::Gateway(GatewayError::Timeout).is_retryable());
        assert!(EngineError::Gateway(GatewayError::Unavailable(503)).is_retryable());
        assert!(EngineError::Gateway(GatewayError::Transport("reset".to_string())).is_retryable());
        assert!(EngineError::Timeout("join".to_string()).is_retryable());

        assert!(!EngineError::Gateway(GatewayError::Rejected {
            request: "create".to_string(),
            code: 427,
            reason: "Room exists".to_string(),
        })
        .is_retryable());
        assert!(!EngineError::Conflict("already inserted".to_string()).is_retryable());
        assert!(!EngineError::Forbidden("nope".to_string()).is_retryable());
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let store_err = EngineError::Store("connection refused at 10.0.0.5:5432".to_string());
        assert_eq!(store_err.client_message(), "An internal error occurred");

        let transport = EngineError::Gateway(GatewayError::Transport(
            "error sending request for url (http://videoserver:8088/janus)".to_string(),
        ));
        assert!(!transport.client_message().contains("videoserver:8088"));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                EngineError::Gateway(GatewayError::Rejected {
                    request: "join".to_string(),
                    code: 426,
                    reason: "No such room".to_string(),
                })
            ),
            "Gateway error: Videoserver rejected join: code 426, No such room"
        );
        assert_eq!(
            format!("{}", EngineError::Conflict("Participant already inserted".to_string())),
            "Conflict: Participant already inserted"
        );
    }

    #[test]
    fn test_from_gateway_error() {
        let err: EngineError = GatewayError::Timeout.into();
        assert!(matches!(err, EngineError::Gateway(GatewayError::Timeout)));
        assert_eq!(err.status_code(), 504);
    }
}
