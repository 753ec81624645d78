//! sesskey engine: validation, usage accounting and session lifecycle.
//!
//! This crate wires the policy validator, the usage ledger and the session
//! manager around injected collaborators (chain client, key store, clock).
//! It is consumed by the `sesskey-engine` binary and by integration tests.
//!
//! Panics, `unwrap`, and `expect` are compile-denied here; chain failures and
//! policy rejections surface as `SessionError` values.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod agent;
pub mod chain;
pub mod check;
pub mod clock;
pub mod config;
pub mod executor;
pub mod keystore;
pub mod obs;
pub mod policy;
pub mod session;
pub mod usage;

pub use agent::{AgentReport, StopReason, TransferAgent};
pub use chain::{ChainClient, Confirmation, EventFilter, ObservedTx, SessionEvent, TransactionRequest};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, WindowAnchor};
pub use executor::{Executor, Receipt};
pub use keystore::{KeyStore, MemoryKeyStore, SessionSecret};
pub use policy::{period_ids, validate, Authorization, Charge, UsageView};
pub use session::SessionManager;
pub use usage::{Reservation, UsageLedger, UsageSnapshot};
