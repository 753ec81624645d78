//! sesskey core: the session-key spending-policy model, proposal types, wire
//! codec and error surface.
//!
//! This crate defines the data contracts shared by the engine and by
//! application code: limits, transfer/call policies, argument constraints,
//! session specs and records. It carries no runtime dependencies so it can be
//! reused wherever specs are built or inspected.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Malformed wire data and invalid policy combinations surface as
//! `SessionError` values.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod codec;
pub mod error;
pub mod model;
pub mod proposal;
pub mod types;

/// Shared result type.
pub use error::{ErrorCode, Rejection, Result, SessionError};
pub use model::{
    CallPolicy, Condition, Constraint, CreationRef, Limit, LimitKind, PolicyRef, SessionRecord, SessionSpec,
    SessionState, TransferPolicy,
};
pub use proposal::{Action, TransactionProposal};
pub use types::{Address, Amount, Selector, SessionId, TxHash, Word};
