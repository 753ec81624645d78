//! Validate-then-submit pipeline for the selected session.
//!
//! selected session -> fee estimate -> validate and reserve headroom ->
//! submit -> commit (confirmed) or release (failed).

use std::sync::Arc;
use std::time::Instant;

use sesskey_core::error::{Rejection, Result, SessionError};
use sesskey_core::{Action, SessionId, SessionState, TransactionProposal, TxHash};

use crate::chain::{ChainClient, TransactionRequest};
use crate::clock::Clock;
use crate::obs::EngineMetrics;
use crate::policy::{validator_data, Authorization};
use crate::session::SessionManager;
use crate::usage::UsageLedger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub session_id: SessionId,
    pub tx_hash: TxHash,
    pub authorization: Authorization,
}

pub struct Executor {
    manager: Arc<SessionManager>,
    ledger: Arc<UsageLedger>,
    chain: Arc<dyn ChainClient>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
}

impl Executor {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            ledger: manager.ledger(),
            chain: manager.chain(),
            clock: manager.clock(),
            metrics: manager.metrics(),
            manager,
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Send `action` under the selected session.
    ///
    /// Rejections are returned before anything reaches the chain. A failed
    /// submission gives the reserved headroom back; a timed-out one keeps it,
    /// since the transaction may still land.
    pub async fn execute(&self, action: Action) -> Result<Receipt> {
        let record = self.manager.selected().await?.ok_or(SessionError::NoSessionSelected)?;
        let session_id = record.session_id;
        if record.revoked {
            let err: SessionError = Rejection::InvalidSessionState {
                session_id,
                state: SessionState::Revoked,
            }
            .into();
            self.count_outcome(&err);
            return Err(err);
        }

        let fee = self.chain.estimate_fee(record.account, &action).await?;
        let proposal = TransactionProposal::new(action, fee);
        let now = self.clock.now();

        self.ledger.open(&record);
        let anchor = self.ledger.anchor_of(session_id)?;
        let reservation = match self.ledger.try_reserve(session_id, &proposal, now) {
            Ok(r) => r,
            Err(e) => {
                self.count_outcome(&e);
                if matches!(e.rejection(), Some(Rejection::Expired { .. })) {
                    self.ledger.close(session_id);
                    self.manager.clear_selection(session_id, SessionState::Expired)?;
                }
                tracing::debug!(%session_id, code = %e.code(), error = %e, "proposal rejected");
                return Err(e);
            }
        };
        self.metrics.validations.inc(&[("outcome", "ok")]);

        let validator_data = match validator_data(&record.spec, &proposal.action, now, anchor) {
            Ok(d) => d,
            Err(e) => {
                self.ledger.release(reservation)?;
                return Err(e);
            }
        };
        let tx = TransactionRequest {
            account: record.account,
            session_id,
            target: *proposal.action.target(),
            value: proposal.action.value().clone(),
            data: proposal.action.calldata(),
            validator_data,
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.manager.confirm_timeout(), self.chain.submit_transaction(tx)).await;
        self.metrics
            .confirm_duration
            .observe(&[("op", "transaction")], started.elapsed());

        match outcome {
            Ok(Ok(tx_hash)) => {
                self.metrics.submissions.inc(&[("op", "transaction"), ("result", "ok")]);
                let authorization = self.ledger.commit(reservation);
                tracing::info!(%session_id, %tx_hash, matched = %authorization.matched, "transaction confirmed");
                Ok(Receipt {
                    session_id,
                    tx_hash,
                    authorization,
                })
            }
            Ok(Err(e)) => {
                self.metrics.submissions.inc(&[("op", "transaction"), ("result", "failed")]);
                self.ledger.release(reservation)?;
                tracing::warn!(%session_id, code = %e.code(), error = %e, "transaction submission failed");
                Err(e)
            }
            Err(_) => {
                self.metrics.submissions.inc(&[("op", "transaction"), ("result", "timeout")]);
                let _ = self.ledger.commit(reservation);
                let ms = u64::try_from(self.manager.confirm_timeout().as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(%session_id, timeout_ms = ms, "transaction confirmation timed out; usage kept");
                Err(SessionError::Timeout(ms))
            }
        }
    }

    /// Rebuild the selected session's usage from its confirmed history.
    pub async fn sync_usage(&self) -> Result<usize> {
        let record = self.manager.selected().await?.ok_or(SessionError::NoSessionSelected)?;
        let history = self.chain.session_history(record.account, record.session_id).await?;
        self.ledger.replay(&record, &history)
    }

    fn count_outcome(&self, e: &SessionError) {
        self.metrics.validations.inc(&[("outcome", e.code().as_str())]);
    }
}
