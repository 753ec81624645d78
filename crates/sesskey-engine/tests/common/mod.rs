//! In-memory chain client and wiring shared by engine integration tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sesskey_core::error::{Result, SessionError};
use sesskey_core::{Action, Address, Amount, CreationRef, SessionId, SessionSpec, TxHash, Word};
use sesskey_engine::{
    ChainClient, Clock, Confirmation, EngineConfig, EventFilter, ManualClock, MemoryKeyStore, ObservedTx,
    SessionEvent, SessionManager, TransactionRequest, WindowAnchor,
};

pub const NOW: u64 = 1_700_000_000;

/// Address whose low two bytes are `tail` (`addr(0xBEEF)` is `0x…beef`).
pub fn addr(tail: u16) -> Address {
    let mut a = [0u8; 20];
    a[18..].copy_from_slice(&tail.to_be_bytes());
    Address(a)
}

pub fn account() -> Address {
    addr(0xA11C)
}

pub fn signer() -> Address {
    addr(0x5161)
}

#[derive(Default)]
struct ChainState {
    block: u64,
    events: Vec<SessionEvent>,
    txs: Vec<TransactionRequest>,
    history: HashMap<SessionId, Vec<ObservedTx>>,
}

/// Applies every submission immediately at the clock's current time.
pub struct FakeChain {
    clock: Arc<ManualClock>,
    state: Mutex<ChainState>,
    /// Next submission fails without any on-chain effect.
    pub fail_next: AtomicBool,
    /// Submissions take effect but confirm only after a long delay.
    pub slow_confirm: AtomicBool,
    pub fee: u64,
}

impl FakeChain {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            state: Mutex::new(ChainState::default()),
            fail_next: AtomicBool::new(false),
            slow_confirm: AtomicBool::new(false),
            fee: 1,
        }
    }

    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.state.lock().unwrap().txs.clone()
    }

    pub fn event_count(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }

    /// Revocation by another client of the same account.
    pub fn revoke_externally(&self, account: Address, session_id: SessionId) {
        let at = self.clock.now();
        let mut st = self.state.lock().unwrap();
        let reference = next_ref(&mut st);
        st.events.push(SessionEvent::Revoked {
            account,
            session_id,
            reference,
            observed_at: at,
        });
    }

    pub fn push_history(&self, session_id: SessionId, tx: ObservedTx) {
        self.state.lock().unwrap().history.entry(session_id).or_default().push(tx);
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SessionError::SubmissionFailed("execution reverted".into()));
        }
        Ok(())
    }

    async fn maybe_stall(&self) {
        if self.slow_confirm.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

fn next_ref(st: &mut ChainState) -> CreationRef {
    st.block += 1;
    CreationRef {
        block_number: st.block,
        log_index: 0,
        tx_hash: Word::from_u64(st.block),
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn submit_session_registration(&self, account: Address, spec: &SessionSpec) -> Result<Confirmation> {
        self.check_failure()?;
        let session_id = spec.session_id()?;
        let observed_at = self.clock.now();
        let reference = {
            let mut st = self.state.lock().unwrap();
            let reference = next_ref(&mut st);
            st.events.push(SessionEvent::Created {
                account,
                session_id,
                spec: Arc::new(spec.clone()),
                reference,
                observed_at,
            });
            reference
        };
        self.maybe_stall().await;
        Ok(Confirmation { reference, observed_at })
    }

    async fn submit_revocation(&self, account: Address, session_id: SessionId) -> Result<Confirmation> {
        self.check_failure()?;
        let observed_at = self.clock.now();
        let reference = {
            let mut st = self.state.lock().unwrap();
            let reference = next_ref(&mut st);
            st.events.push(SessionEvent::Revoked {
                account,
                session_id,
                reference,
                observed_at,
            });
            reference
        };
        self.maybe_stall().await;
        Ok(Confirmation { reference, observed_at })
    }

    async fn submit_transaction(&self, tx: TransactionRequest) -> Result<TxHash> {
        self.check_failure()?;
        let observed_at = self.clock.now();
        let action = Action::from_calldata(tx.target, tx.value.clone(), tx.data.as_deref().unwrap_or(&[]))?;
        let hash = {
            let mut st = self.state.lock().unwrap();
            let reference = next_ref(&mut st);
            st.history.entry(tx.session_id).or_default().push(ObservedTx {
                action,
                fee: Amount::from(self.fee),
                observed_at,
            });
            st.txs.push(tx);
            reference.tx_hash
        };
        self.maybe_stall().await;
        Ok(hash)
    }

    async fn query_events(&self, filter: EventFilter) -> Result<Vec<SessionEvent>> {
        let st = self.state.lock().unwrap();
        Ok(st
            .events
            .iter()
            .filter(|e| match e {
                SessionEvent::Created { account, .. } | SessionEvent::Revoked { account, .. } => {
                    *account == filter.account
                }
            })
            .cloned()
            .collect())
    }

    async fn estimate_fee(&self, _account: Address, _action: &Action) -> Result<Amount> {
        Ok(Amount::from(self.fee))
    }

    async fn session_history(&self, _account: Address, session_id: SessionId) -> Result<Vec<ObservedTx>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .history
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub chain: Arc<FakeChain>,
    pub keys: Arc<MemoryKeyStore>,
    pub manager: Arc<SessionManager>,
}

pub fn harness() -> Harness {
    harness_with(WindowAnchor::Creation)
}

pub fn harness_with(anchor: WindowAnchor) -> Harness {
    let clock = Arc::new(ManualClock::new(NOW));
    let chain = Arc::new(FakeChain::new(Arc::clone(&clock)));
    let keys = Arc::new(MemoryKeyStore::new());

    let mut cfg = EngineConfig::default();
    cfg.accounting.window_anchor = anchor;
    // Tests bypass validate(); keep timeout waits short.
    cfg.chain.confirm_timeout_ms = 100;

    let manager = Arc::new(SessionManager::new(
        &cfg,
        Arc::clone(&chain) as Arc<dyn ChainClient>,
        Arc::clone(&keys) as Arc<dyn sesskey_engine::KeyStore>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    Harness {
        clock,
        chain,
        keys,
        manager,
    }
}
