//! The server-side error vocabulary.
//!
//! Every failure a request can hit maps to one kind string on the wire and
//! one HTTP status. Session-protocol failures (the first four) are fatal for
//! the request and travel as plaintext on status 499; everything else is
//! wrapped in the response envelope when a session key is at hand.

use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RepError {
    #[error("message authentication failed")]
    AuthFail,
    #[error("msg_id {got} does not advance past {last}")]
    Replay { got: u64, last: u64 },
    #[error("unknown session {0}")]
    SessionUnknown(u64),
    #[error("session {0} has expired")]
    SessionExpired(u64),

    #[error("subject '{0}' is suspended")]
    SubjectInactive(String),
    #[error("role '{0}' is not assumed in this session")]
    RoleNotAssumed(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("document ACL denies {0}")]
    AclDenied(String),

    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("{0}")]
    InvariantViolation(String),
    #[error("document '{0}' no longer has a file")]
    DocGone(String),
    #[error("{0}")]
    IntegrityFail(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("unsupported algorithm '{0}'")]
    UnsupportedAlg(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Session-protocol failures answer with this status and a plaintext reason,
/// since no trustworthy session key is available to wrap them.
pub const STATUS_SESSION_FAILURE: u16 = 499;

impl RepError {
    /// The wire spelling of this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RepError::AuthFail => "AUTH_FAIL",
            RepError::Replay { .. } => "REPLAY",
            RepError::SessionUnknown(_) => "SESSION_UNKNOWN",
            RepError::SessionExpired(_) => "SESSION_EXPIRED",
            RepError::SubjectInactive(_) => "SUBJECT_INACTIVE",
            RepError::RoleNotAssumed(_) => "ROLE_NOT_ASSUMED",
            RepError::PermissionDenied(_) => "PERMISSION_DENIED",
            RepError::AclDenied(_) => "ACL_DENIED",
            RepError::NotFound(_) => "NOT_FOUND",
            RepError::Conflict(_) => "CONFLICT",
            RepError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            RepError::DocGone(_) => "DOC_GONE",
            RepError::IntegrityFail(_) => "INTEGRITY_FAIL",
            RepError::BadRequest(_) => "BAD_REQUEST",
            RepError::UnsupportedAlg(_) => "UNSUPPORTED_ALG",
            RepError::Internal(_) => "INTERNAL",
        }
    }

    /// True for failures of the session protocol itself.
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            RepError::AuthFail
                | RepError::Replay { .. }
                | RepError::SessionUnknown(_)
                | RepError::SessionExpired(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RepError::AuthFail
            | RepError::Replay { .. }
            | RepError::SessionUnknown(_)
            | RepError::SessionExpired(_) => {
                StatusCode::from_u16(STATUS_SESSION_FAILURE).expect("499 is a valid status code")
            }
            RepError::SubjectInactive(_)
            | RepError::RoleNotAssumed(_)
            | RepError::PermissionDenied(_)
            | RepError::AclDenied(_)
            | RepError::InvariantViolation(_) => StatusCode::FORBIDDEN,
            RepError::NotFound(_) | RepError::DocGone(_) => StatusCode::NOT_FOUND,
            RepError::Conflict(_) => StatusCode::CONFLICT,
            RepError::BadRequest(_) | RepError::UnsupportedAlg(_) => StatusCode::BAD_REQUEST,
            RepError::IntegrityFail(_) | RepError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<rep_sdk::envelope::EnvelopeError> for RepError {
    fn from(e: rep_sdk::envelope::EnvelopeError) -> Self {
        use rep_sdk::channel::ChannelError;
        use rep_sdk::envelope::EnvelopeError;
        match e {
            EnvelopeError::Channel(ChannelError::AuthFail) => RepError::AuthFail,
            EnvelopeError::Channel(ChannelError::BadNonce(_)) | EnvelopeError::BadHex => {
                RepError::BadRequest("malformed encrypted_data".into())
            }
            EnvelopeError::Key(_) => RepError::AuthFail,
            EnvelopeError::Payload(e) => RepError::BadRequest(format!("invalid payload: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_failures_use_499() {
        for e in [
            RepError::AuthFail,
            RepError::Replay { got: 1, last: 1 },
            RepError::SessionUnknown(9),
            RepError::SessionExpired(9),
        ] {
            assert!(e.is_session_failure());
            assert_eq!(e.status().as_u16(), STATUS_SESSION_FAILURE);
        }
    }

    #[test]
    fn denials_are_forbidden() {
        assert_eq!(
            RepError::PermissionDenied("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            RepError::InvariantViolation("x".into()).status(),
            StatusCode::FORBIDDEN
        );
    }
}
