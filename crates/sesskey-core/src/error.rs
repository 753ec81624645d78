//! Shared error types across sesskey crates.
//!
//! Policy rejections ([`Rejection`]) are an expected outcome of validation and
//! carry enough structure to build an actionable message. Everything else the
//! engine can fail with is a [`SessionError`]; chain failures stay distinct
//! from rejections.

use std::fmt;

use thiserror::Error;

use crate::model::{Condition, LimitKind, PolicyRef, SessionState};
use crate::types::{Address, Amount, SessionId, Selector, Word};

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Expired,
    NoMatchingPolicy,
    ConstraintViolation,
    PerUseLimitExceeded,
    CumulativeLimitExceeded,
    FeeLimitExceeded,
    InvalidSessionState,
    InvalidPolicy,
    Codec,
    UnknownSession,
    NoSessionSelected,
    SubmissionFailed,
    Timeout,
    Config,
    UnsupportedVersion,
    KeyStore,
    Internal,
}

impl ErrorCode {
    /// String representation used in logs, metrics and JSON output.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Expired => "EXPIRED",
            ErrorCode::NoMatchingPolicy => "NO_MATCHING_POLICY",
            ErrorCode::ConstraintViolation => "CONSTRAINT_VIOLATION",
            ErrorCode::PerUseLimitExceeded => "PER_USE_LIMIT_EXCEEDED",
            ErrorCode::CumulativeLimitExceeded => "CUMULATIVE_LIMIT_EXCEEDED",
            ErrorCode::FeeLimitExceeded => "FEE_LIMIT_EXCEEDED",
            ErrorCode::InvalidSessionState => "INVALID_SESSION_STATE",
            ErrorCode::InvalidPolicy => "INVALID_POLICY",
            ErrorCode::Codec => "CODEC",
            ErrorCode::UnknownSession => "UNKNOWN_SESSION",
            ErrorCode::NoSessionSelected => "NO_SESSION_SELECTED",
            ErrorCode::SubmissionFailed => "SUBMISSION_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Config => "CONFIG",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::KeyStore => "KEY_STORE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cumulative cap that a proposal would overrun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitBreach {
    /// Which tracked limit.
    pub policy: PolicyRef,
    pub kind: LimitKind,
    /// Amount the proposal would add.
    pub requested: Amount,
    /// Amount already consumed in the relevant window.
    pub used: Amount,
    pub cap: Amount,
    /// `cap - used`, saturating at zero.
    pub remaining: Amount,
}

impl fmt::Display for LimitBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} limit: requested {}, used {}, cap {}, remaining {}",
            self.policy, self.kind, self.requested, self.used, self.cap, self.remaining
        )
    }
}

/// Why a proposal was not authorized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("session expired at {expires_at} (now {now})")]
    Expired { expires_at: u64, now: u64 },

    #[error("no policy matches target {target}{}", fmt_selector(.selector))]
    NoMatchingPolicy {
        target: Address,
        selector: Option<Selector>,
    },

    #[error("{policy} constraint[{constraint}] not satisfied: argument {argument_index} {condition:?} {reference}")]
    ConstraintViolation {
        policy: PolicyRef,
        constraint: usize,
        condition: Condition,
        argument_index: u64,
        /// `None` when the call data has no such argument slot.
        actual: Option<Word>,
        reference: Word,
    },

    #[error("{policy} per-use limit exceeded: requested {requested}, max {max_per_use}")]
    PerUseLimitExceeded {
        policy: PolicyRef,
        requested: Amount,
        max_per_use: Amount,
    },

    #[error("cumulative limit exceeded: {0}")]
    CumulativeLimitExceeded(LimitBreach),

    #[error("fee limit exceeded: {0}")]
    FeeLimitExceeded(LimitBreach),

    #[error("session {session_id} is {state}")]
    InvalidSessionState {
        session_id: SessionId,
        state: SessionState,
    },
}

impl Rejection {
    pub fn code(&self) -> ErrorCode {
        match self {
            Rejection::Expired { .. } => ErrorCode::Expired,
            Rejection::NoMatchingPolicy { .. } => ErrorCode::NoMatchingPolicy,
            Rejection::ConstraintViolation { .. } => ErrorCode::ConstraintViolation,
            Rejection::PerUseLimitExceeded { .. } => ErrorCode::PerUseLimitExceeded,
            Rejection::CumulativeLimitExceeded(_) => ErrorCode::CumulativeLimitExceeded,
            Rejection::FeeLimitExceeded(_) => ErrorCode::FeeLimitExceeded,
            Rejection::InvalidSessionState { .. } => ErrorCode::InvalidSessionState,
        }
    }

    /// Rejections that no later proposal against the same session can pass.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Rejection::Expired { .. } | Rejection::InvalidSessionState { .. }
        )
    }
}

fn fmt_selector(selector: &Option<Selector>) -> String {
    selector.map(|s| format!(" selector {s}")).unwrap_or_default()
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Unified error type used by core and engine.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("codec: {0}")]
    Codec(String),
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("no session selected")]
    NoSessionSelected,
    #[error("submission failed: {0}")]
    SubmissionFailed(String),
    #[error("timed out after {0} ms waiting for confirmation")]
    Timeout(u64),
    #[error("config: {0}")]
    Config(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("key store: {0}")]
    KeyStore(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl SessionError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::Rejected(r) => r.code(),
            SessionError::InvalidPolicy(_) => ErrorCode::InvalidPolicy,
            SessionError::Codec(_) => ErrorCode::Codec,
            SessionError::UnknownSession(_) => ErrorCode::UnknownSession,
            SessionError::NoSessionSelected => ErrorCode::NoSessionSelected,
            SessionError::SubmissionFailed(_) => ErrorCode::SubmissionFailed,
            SessionError::Timeout(_) => ErrorCode::Timeout,
            SessionError::Config(_) => ErrorCode::Config,
            SessionError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            SessionError::KeyStore(_) => ErrorCode::KeyStore,
            SessionError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            SessionError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}
