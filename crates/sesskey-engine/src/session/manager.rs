//! Session lifecycle manager.
//!
//! - Per-account snapshots are rebuilt from chain events and swapped in whole,
//!   so a reader never sees a half-applied revocation.
//! - Creation and revocation change local state only after the chain client
//!   confirms. A timed-out wait marks the account stale; the next access
//!   re-fetches instead of assuming failure.
//! - At most one session is selected at a time; refreshes drop a selection
//!   that is no longer active.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures_util::future::join_all;
use tokio::time::error::Elapsed;

use sesskey_core::error::{Rejection, Result, SessionError};
use sesskey_core::{Address, SessionId, SessionRecord, SessionSpec, SessionState};

use crate::chain::{ChainClient, EventFilter, SessionEvent};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::keystore::{KeyStore, SessionSecret};
use crate::obs::EngineMetrics;
use crate::usage::UsageLedger;

pub struct SessionManager {
    chain: Arc<dyn ChainClient>,
    keys: Arc<dyn KeyStore>,
    clock: Arc<dyn Clock>,
    ledger: Arc<UsageLedger>,
    metrics: Arc<EngineMetrics>,

    confirm_timeout: Duration,
    max_lifetime_secs: u64,

    snapshots: DashMap<Address, Arc<Vec<SessionRecord>>>,
    stale: DashSet<Address>,
    pending: DashMap<SessionId, Address>,
    selected: Mutex<Option<SessionId>>,
}

impl SessionManager {
    pub fn new(
        cfg: &EngineConfig,
        chain: Arc<dyn ChainClient>,
        keys: Arc<dyn KeyStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            chain,
            keys,
            clock,
            ledger: Arc::new(UsageLedger::new(cfg.accounting.window_anchor)),
            metrics: Arc::new(EngineMetrics::default()),
            confirm_timeout: cfg.chain.confirm_timeout(),
            max_lifetime_secs: cfg.sessions.max_lifetime_secs,
            snapshots: DashMap::new(),
            stale: DashSet::new(),
            pending: DashMap::new(),
            selected: Mutex::new(None),
        }
    }

    pub fn chain(&self) -> Arc<dyn ChainClient> {
        Arc::clone(&self.chain)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn ledger(&self) -> Arc<UsageLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn confirm_timeout(&self) -> Duration {
        self.confirm_timeout
    }

    /// Re-read the account's sessions from chain events.
    ///
    /// Records come back in creation order. Usage tracking is opened for
    /// active sessions and closed for the rest, and the selection is
    /// re-validated against the new snapshot.
    pub async fn list_sessions(&self, account: Address) -> Result<Arc<Vec<SessionRecord>>> {
        let events = self.chain.query_events(EventFilter::account(account)).await?;
        let snapshot = Arc::new(fold_events(account, events));

        self.snapshots.insert(account, Arc::clone(&snapshot));
        self.stale.remove(&account);

        let now = self.clock.now();
        for r in snapshot.iter() {
            if r.is_active(now) {
                self.ledger.open(r);
            } else {
                self.ledger.close(r.session_id);
            }
        }
        self.revalidate_selection(now)?;

        tracing::debug!(%account, sessions = snapshot.len(), "session list refreshed");
        Ok(snapshot)
    }

    /// Select a session for signing. Only active sessions qualify.
    pub async fn select_session(&self, session_id: SessionId) -> Result<()> {
        self.refresh_stale().await?;
        // Checked under the selection lock so a concurrent refresh either
        // lands first or sees the new selection.
        let mut selected = self.lock_selected()?;
        let record = self
            .find_record(session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        record.ensure_active(self.clock.now())?;

        *selected = Some(session_id);
        drop(selected);
        tracing::info!(%session_id, account = %record.account, "session selected");
        Ok(())
    }

    pub fn deselect_session(&self) -> Result<()> {
        if let Some(session_id) = self.lock_selected()?.take() {
            tracing::info!(%session_id, "session deselected");
        }
        Ok(())
    }

    /// The selected session's record, as of the latest snapshot.
    pub async fn selected(&self) -> Result<Option<SessionRecord>> {
        self.refresh_stale().await?;
        let id = *self.lock_selected()?;
        Ok(id.and_then(|id| self.find_record(id)))
    }

    /// Register `spec` on chain for `account` and materialize it once confirmed.
    ///
    /// A failed or timed-out submission leaves no record behind; the caller
    /// retries explicitly. `secret`, if given, is stored only after
    /// confirmation.
    pub async fn create_session(
        &self,
        account: Address,
        spec: SessionSpec,
        secret: Option<SessionSecret>,
    ) -> Result<SessionRecord> {
        let now = self.clock.now();
        if spec.is_expired(now) {
            return Err(SessionError::InvalidPolicy(format!(
                "session already expired (expiresAt {}, now {now})",
                spec.expires_at()
            )));
        }
        if self.max_lifetime_secs > 0 && spec.expires_at() - now > self.max_lifetime_secs {
            return Err(SessionError::InvalidPolicy(format!(
                "session lifetime exceeds {} seconds",
                self.max_lifetime_secs
            )));
        }

        let session_id = spec.session_id()?;
        if let Some(existing) = self.find_record(session_id) {
            return Err(Rejection::InvalidSessionState {
                session_id,
                state: existing.state(now),
            }
            .into());
        }

        let _pending = PendingGuard::register(&self.pending, session_id, account)?;
        tracing::info!(%session_id, %account, "session registration submitted");

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.confirm_timeout,
            self.chain.submit_session_registration(account, &spec),
        )
        .await;
        let confirmation = self.settle("create", account, started, outcome)?;

        let record = SessionRecord {
            session_id,
            account,
            spec: Arc::new(spec),
            creation: confirmation.reference,
            created_at: confirmation.observed_at,
            revoked: false,
        };
        self.update_snapshot(account, |records| {
            if !records.iter().any(|r| r.session_id == session_id) {
                records.push(record.clone());
                records.sort_by_key(|r| r.creation);
            }
        });
        self.ledger.open(&record);

        if let Some(secret) = secret {
            self.keys.store(session_id, secret).await?;
        }

        tracing::info!(%session_id, %account, block = record.creation.block_number, "session created");
        Ok(record)
    }

    /// Revoke a session on chain; mark it revoked once confirmed.
    pub async fn revoke(&self, session_id: SessionId) -> Result<()> {
        self.refresh_stale().await?;
        let record = self
            .find_record(session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        if record.revoked {
            return Err(Rejection::InvalidSessionState {
                session_id,
                state: SessionState::Revoked,
            }
            .into());
        }

        let account = record.account;
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.confirm_timeout, self.chain.submit_revocation(account, session_id)).await;
        self.settle("revoke", account, started, outcome)?;

        self.update_snapshot(account, |records| {
            for r in records.iter_mut().filter(|r| r.session_id == session_id) {
                r.revoked = true;
            }
        });
        self.ledger.close(session_id);
        self.keys.forget(session_id).await?;
        self.clear_selection(session_id, SessionState::Revoked)?;

        tracing::info!(%session_id, %account, "session revoked");
        Ok(())
    }

    /// Newest active session of `account`, optionally for a given signer.
    pub async fn latest_active(&self, account: Address, signer: Option<Address>) -> Result<Option<SessionRecord>> {
        let snapshot = self.snapshot(account).await?;
        let now = self.clock.now();
        Ok(snapshot
            .iter()
            .filter(|r| r.is_active(now))
            .filter(|r| signer.map_or(true, |s| *r.spec.signer() == s))
            .max_by_key(|r| r.creation)
            .cloned())
    }

    /// Lifecycle state, including `Pending` while a registration is in flight.
    pub fn state_of(&self, session_id: SessionId) -> Option<SessionState> {
        if self.pending.contains_key(&session_id) {
            return Some(SessionState::Pending);
        }
        self.find_record(session_id).map(|r| r.state(self.clock.now()))
    }

    pub async fn secret(&self, session_id: SessionId) -> Result<Option<SessionSecret>> {
        self.keys.retrieve(session_id).await
    }

    /// Cached snapshot, re-fetched when missing or stale.
    async fn snapshot(&self, account: Address) -> Result<Arc<Vec<SessionRecord>>> {
        if !self.stale.contains(&account) {
            if let Some(s) = self.snapshots.get(&account) {
                return Ok(Arc::clone(s.value()));
            }
        }
        self.list_sessions(account).await
    }

    async fn refresh_stale(&self) -> Result<()> {
        let stale: Vec<Address> = self.stale.iter().map(|a| *a).collect();
        if stale.is_empty() {
            return Ok(());
        }
        let results = join_all(stale.into_iter().map(|a| self.list_sessions(a))).await;
        for r in results {
            r?;
        }
        Ok(())
    }

    fn find_record(&self, session_id: SessionId) -> Option<SessionRecord> {
        self.snapshots
            .iter()
            .find_map(|e| e.value().iter().find(|r| r.session_id == session_id).cloned())
    }

    /// Copy-on-write update of an account's snapshot. An account never listed
    /// gets a partial snapshot and is marked stale, so the next async access
    /// loads it in full.
    fn update_snapshot(&self, account: Address, f: impl FnOnce(&mut Vec<SessionRecord>)) {
        match self.snapshots.entry(account) {
            Entry::Occupied(mut entry) => {
                let mut next = Vec::clone(entry.get());
                f(&mut next);
                entry.insert(Arc::new(next));
            }
            Entry::Vacant(entry) => {
                let mut next = Vec::new();
                f(&mut next);
                entry.insert(Arc::new(next));
                self.stale.insert(account);
            }
        }
    }

    /// Drop the selection if it is `session_id`. Returns whether it was.
    pub(crate) fn clear_selection(&self, session_id: SessionId, state: SessionState) -> Result<bool> {
        let mut selected = self.lock_selected()?;
        if *selected != Some(session_id) {
            return Ok(false);
        }
        *selected = None;
        self.metrics.selection_cleared.inc(&[("reason", &state.to_string())]);
        tracing::info!(%session_id, %state, "selection cleared");
        Ok(true)
    }

    fn revalidate_selection(&self, now: u64) -> Result<()> {
        let mut selected = self.lock_selected()?;
        let Some(id) = *selected else {
            return Ok(());
        };
        let Some(record) = self.find_record(id) else {
            return Ok(());
        };
        let state = record.state(now);
        if state != SessionState::Active {
            *selected = None;
            self.metrics.selection_cleared.inc(&[("reason", &state.to_string())]);
            tracing::info!(session_id = %id, %state, "selection cleared");
        }
        Ok(())
    }

    fn settle<T>(
        &self,
        op: &'static str,
        account: Address,
        started: Instant,
        outcome: std::result::Result<Result<T>, Elapsed>,
    ) -> Result<T> {
        self.metrics.confirm_duration.observe(&[("op", op)], started.elapsed());
        match outcome {
            Ok(Ok(v)) => {
                self.metrics.submissions.inc(&[("op", op), ("result", "ok")]);
                Ok(v)
            }
            Ok(Err(e)) => {
                self.metrics.submissions.inc(&[("op", op), ("result", "failed")]);
                tracing::warn!(%account, op, code = %e.code(), error = %e, "submission failed");
                Err(e)
            }
            Err(_) => {
                // The effect may still land on chain; re-fetch on next access.
                self.stale.insert(account);
                self.metrics.submissions.inc(&[("op", op), ("result", "timeout")]);
                let ms = u64::try_from(self.confirm_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(%account, op, timeout_ms = ms, "confirmation wait timed out");
                Err(SessionError::Timeout(ms))
            }
        }
    }

    fn lock_selected(&self) -> Result<MutexGuard<'_, Option<SessionId>>> {
        self.selected
            .lock()
            .map_err(|_| SessionError::Internal("selection lock poisoned".into()))
    }
}

/// Build an account's records from its events. Revocation is terminal and
/// applies regardless of event order; a repeated creation keeps the first.
fn fold_events(account: Address, events: Vec<SessionEvent>) -> Vec<SessionRecord> {
    let mut records: Vec<SessionRecord> = Vec::new();
    let mut index: HashMap<SessionId, usize> = HashMap::new();
    let mut revoked: HashSet<SessionId> = HashSet::new();

    for ev in events {
        match ev {
            SessionEvent::Created {
                account: acc,
                session_id,
                spec,
                reference,
                observed_at,
            } if acc == account => {
                if index.contains_key(&session_id) {
                    continue;
                }
                index.insert(session_id, records.len());
                records.push(SessionRecord {
                    session_id,
                    account,
                    spec,
                    creation: reference,
                    created_at: observed_at,
                    revoked: false,
                });
            }
            SessionEvent::Revoked {
                account: acc,
                session_id,
                ..
            } if acc == account => {
                revoked.insert(session_id);
            }
            _ => {}
        }
    }

    for r in records.iter_mut() {
        r.revoked = revoked.contains(&r.session_id);
    }
    records.sort_by_key(|r| r.creation);
    records
}

/// Marks a registration in flight; dropping it discards the pending state.
struct PendingGuard<'a> {
    pending: &'a DashMap<SessionId, Address>,
    session_id: SessionId,
}

impl<'a> PendingGuard<'a> {
    fn register(pending: &'a DashMap<SessionId, Address>, session_id: SessionId, account: Address) -> Result<Self> {
        match pending.entry(session_id) {
            Entry::Occupied(_) => Err(Rejection::InvalidSessionState {
                session_id,
                state: SessionState::Pending,
            }
            .into()),
            Entry::Vacant(v) => {
                v.insert(account);
                Ok(Self { pending, session_id })
            }
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.session_id);
    }
}
