//! Chain client seam.
//!
//! The engine never talks to a node itself. Registration, revocation and
//! transaction submission are awaited through [`ChainClient`]; retries,
//! chunked log scans and receipt polling belong to the implementation.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use sesskey_core::error::Result;
use sesskey_core::{Action, Address, Amount, CreationRef, SessionId, SessionSpec, TxHash};

/// A confirmed on-chain effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub reference: CreationRef,
    /// Block time of the confirming transaction (UNIX seconds).
    pub observed_at: u64,
}

/// Session lifecycle events emitted by the account's validator module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created {
        account: Address,
        session_id: SessionId,
        spec: Arc<SessionSpec>,
        reference: CreationRef,
        observed_at: u64,
    },
    Revoked {
        account: Address,
        session_id: SessionId,
        reference: CreationRef,
        observed_at: u64,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::Created { session_id, .. } | SessionEvent::Revoked { session_id, .. } => *session_id,
        }
    }

    pub fn reference(&self) -> CreationRef {
        match self {
            SessionEvent::Created { reference, .. } | SessionEvent::Revoked { reference, .. } => *reference,
        }
    }
}

/// Which events to return from [`ChainClient::query_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    pub account: Address,
}

impl EventFilter {
    pub fn account(account: Address) -> Self {
        Self { account }
    }
}

/// A transaction signed with a session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub account: Address,
    pub session_id: SessionId,
    pub target: Address,
    pub value: Amount,
    /// `None` for plain transfers.
    pub data: Option<Bytes>,
    /// `abi.encode(spec, periodIds)` for the on-chain validator.
    pub validator_data: Bytes,
}

/// A confirmed transaction previously sent under a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTx {
    pub action: Action,
    pub fee: Amount,
    pub observed_at: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn submit_session_registration(&self, account: Address, spec: &SessionSpec) -> Result<Confirmation>;

    async fn submit_revocation(&self, account: Address, session_id: SessionId) -> Result<Confirmation>;

    async fn submit_transaction(&self, tx: TransactionRequest) -> Result<TxHash>;

    /// Events in chain order.
    async fn query_events(&self, filter: EventFilter) -> Result<Vec<SessionEvent>>;

    async fn estimate_fee(&self, account: Address, action: &Action) -> Result<Amount>;

    /// Confirmed transactions attributable to `session_id`, oldest first.
    async fn session_history(&self, account: Address, session_id: SessionId) -> Result<Vec<ObservedTx>>;
}
