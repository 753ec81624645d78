//! Process-local usage ledger.
//!
//! One entry per open session, each behind its own mutex: validation and
//! booking of a proposal happen under that lock, so two proposals racing for
//! the same headroom cannot both pass. Allowance usage is bucketed by window
//! index from the session's anchor; only the newest window is retained.
//!
//! An entry remembers the reservations it has booked but not yet settled.
//! Replaying history rebuilds the totals in place and books those again, so a
//! proposal in flight during a replay is neither lost nor released twice.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use serde::Serialize;

use sesskey_core::error::{Result, SessionError};
use sesskey_core::types::amount_serde;
use sesskey_core::{Amount, LimitKind, PolicyRef, SessionId, SessionRecord, SessionSpec, TransactionProposal};

use crate::chain::ObservedTx;
use crate::config::WindowAnchor;
use crate::policy::{charges, match_action, validate, Authorization, Charge, UsageView};

/// Usage of one tracked limit at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub policy: PolicyRef,
    pub kind: LimitKind,
    /// Consumed in the current window (whole lifetime for non-allowance limits).
    #[serde(with = "amount_serde")]
    pub used: Amount,
    /// `None` for unlimited.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "opt_amount")]
    pub cap: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "opt_amount")]
    pub remaining: Option<Amount>,
    /// Window index for allowance limits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<u64>,
}

fn opt_amount<S: serde::Serializer>(v: &Option<Amount>, s: S) -> std::result::Result<S::Ok, S::Error> {
    match v {
        Some(a) => amount_serde::serialize(a, s),
        None => s.serialize_none(),
    }
}

/// Charges booked by [`UsageLedger::try_reserve`], pending the submission
/// outcome. Hand it back through [`UsageLedger::commit`] or
/// [`UsageLedger::release`].
#[derive(Debug)]
#[must_use = "a reservation must be committed or released"]
pub struct Reservation {
    id: u64,
    session_id: SessionId,
    authorization: Authorization,
    booked_at: u64,
}

impl Reservation {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn authorization(&self) -> &Authorization {
        &self.authorization
    }
}

#[derive(Debug, Default)]
struct Tracker {
    lifetime: Amount,
    windows: BTreeMap<u64, Amount>,
}

impl Tracker {
    fn add(&mut self, kind: LimitKind, window: u64, amount: &Amount) {
        self.lifetime += amount;
        if kind == LimitKind::Allowance {
            *self.windows.entry(window).or_default() += amount;
            // Older windows can no longer be charged against.
            if let Some(&newest) = self.windows.keys().next_back() {
                self.windows.retain(|w, _| *w >= newest);
            }
        }
    }

    fn sub(&mut self, kind: LimitKind, window: u64, amount: &Amount) {
        self.lifetime = saturating_sub(&self.lifetime, amount);
        if kind == LimitKind::Allowance {
            if let Some(v) = self.windows.get_mut(&window) {
                *v = saturating_sub(v, amount);
            }
        }
    }

    fn used(&self, kind: LimitKind, window: u64) -> Amount {
        match kind {
            LimitKind::Allowance => self.windows.get(&window).cloned().unwrap_or_default(),
            LimitKind::Unlimited | LimitKind::Lifetime => self.lifetime.clone(),
        }
    }
}

fn saturating_sub(a: &Amount, b: &Amount) -> Amount {
    if a > b {
        a - b
    } else {
        Amount::default()
    }
}

struct Outstanding {
    charges: Vec<Charge>,
    booked_at: u64,
}

struct SessionUsage {
    spec: Arc<SessionSpec>,
    anchor: u64,
    trackers: HashMap<PolicyRef, Tracker>,
    /// Booked reservations awaiting commit or release, by reservation id.
    outstanding: HashMap<u64, Outstanding>,
}

impl SessionUsage {
    fn new(spec: Arc<SessionSpec>, anchor: u64) -> Self {
        Self {
            spec,
            anchor,
            trackers: HashMap::new(),
            outstanding: HashMap::new(),
        }
    }

    fn book(&mut self, policy: PolicyRef, amount: &Amount, at: u64) -> Result<()> {
        let limit = self
            .spec
            .limit(policy)
            .ok_or_else(|| SessionError::InvalidPolicy(format!("session has no limit {policy}")))?;
        if amount == &Amount::default() {
            return Ok(());
        }
        let (kind, window) = (limit.kind(), limit.window(at, self.anchor));
        self.trackers.entry(policy).or_default().add(kind, window, amount);
        Ok(())
    }

    fn unbook(&mut self, policy: PolicyRef, amount: &Amount, at: u64) {
        let Some(limit) = self.spec.limit(policy) else {
            return;
        };
        let (kind, window) = (limit.kind(), limit.window(at, self.anchor));
        if let Some(t) = self.trackers.get_mut(&policy) {
            t.sub(kind, window, amount);
        }
    }
}

impl UsageView for SessionUsage {
    fn used(&self, policy: PolicyRef, now: u64) -> Amount {
        let (Some(limit), Some(t)) = (self.spec.limit(policy), self.trackers.get(&policy)) else {
            return Amount::default();
        };
        t.used(limit.kind(), limit.window(now, self.anchor))
    }
}

/// Running totals for every open session.
pub struct UsageLedger {
    anchor: WindowAnchor,
    sessions: DashMap<SessionId, Arc<Mutex<SessionUsage>>>,
    next_reservation: AtomicU64,
}

impl UsageLedger {
    pub fn new(anchor: WindowAnchor) -> Self {
        Self {
            anchor,
            sessions: DashMap::new(),
            next_reservation: AtomicU64::new(1),
        }
    }

    /// Start tracking a session. Existing totals are kept if it is already open.
    pub fn open(&self, record: &SessionRecord) {
        let anchor = self.anchor.resolve(record.created_at);
        self.sessions.entry(record.session_id).or_insert_with(|| {
            tracing::debug!(session_id = %record.session_id, anchor, "usage ledger opened");
            Arc::new(Mutex::new(SessionUsage::new(Arc::clone(&record.spec), anchor)))
        });
    }

    /// Stop tracking a session (revoked or expired).
    pub fn close(&self, session_id: SessionId) {
        if self.sessions.remove(&session_id).is_some() {
            tracing::debug!(%session_id, "usage ledger closed");
        }
    }

    pub fn is_open(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Window anchor of an open session.
    pub fn anchor_of(&self, session_id: SessionId) -> Result<u64> {
        let entry = self.entry(session_id)?;
        let guard = lock(&entry)?;
        Ok(guard.anchor)
    }

    /// Record confirmed usage: `value` against `policy` and `fee` against the
    /// fee limit.
    pub fn record_usage(
        &self,
        session_id: SessionId,
        policy: PolicyRef,
        value: &Amount,
        fee: &Amount,
        observed_at: u64,
    ) -> Result<()> {
        let entry = self.entry(session_id)?;
        let mut guard = lock(&entry)?;
        guard.book(policy, value, observed_at)?;
        guard.book(PolicyRef::Fee, fee, observed_at)
    }

    /// Usage of `policy` in the window containing `now`.
    pub fn current_usage(&self, session_id: SessionId, policy: PolicyRef, now: u64) -> Result<UsageSnapshot> {
        let entry = self.entry(session_id)?;
        let guard = lock(&entry)?;
        let limit = guard
            .spec
            .limit(policy)
            .ok_or_else(|| SessionError::InvalidPolicy(format!("session has no limit {policy}")))?;

        let used = guard.used(policy, now);
        let cap = limit.cap().cloned();
        let remaining = cap.as_ref().map(|c| saturating_sub(c, &used));
        let window = (limit.kind() == LimitKind::Allowance).then(|| limit.window(now, guard.anchor));
        Ok(UsageSnapshot {
            policy,
            kind: limit.kind(),
            used,
            cap,
            remaining,
            window,
        })
    }

    /// Validate `proposal` and book its charges in one critical section.
    pub fn try_reserve(&self, session_id: SessionId, proposal: &TransactionProposal, now: u64) -> Result<Reservation> {
        let entry = self.entry(session_id)?;
        let mut guard = lock(&entry)?;

        let spec = Arc::clone(&guard.spec);
        let authorization = validate(&spec, proposal, &*guard, now)?;
        for c in &authorization.charges {
            guard.book(c.policy, &c.amount, now)?;
        }

        let id = self.next_reservation.fetch_add(1, Ordering::Relaxed);
        guard.outstanding.insert(
            id,
            Outstanding {
                charges: authorization.charges.clone(),
                booked_at: now,
            },
        );
        Ok(Reservation {
            id,
            session_id,
            authorization,
            booked_at: now,
        })
    }

    /// The submission went through; keep the charges.
    pub fn commit(&self, reservation: Reservation) -> Authorization {
        if let Some(entry) = self.sessions.get(&reservation.session_id).map(|e| Arc::clone(e.value())) {
            // Poisoned: the charges stay booked either way.
            if let Ok(mut guard) = entry.lock() {
                guard.outstanding.remove(&reservation.id);
            }
        }
        reservation.authorization
    }

    /// The submission failed; give the headroom back.
    ///
    /// A no-op when the entry no longer holds the reservation (the session
    /// was closed and reopened since it was booked).
    pub fn release(&self, reservation: Reservation) -> Result<()> {
        let Some(entry) = self.sessions.get(&reservation.session_id).map(|e| Arc::clone(e.value())) else {
            // Session closed in the meantime; nothing left to give back to.
            return Ok(());
        };
        let mut guard = lock(&entry)?;
        if guard.outstanding.remove(&reservation.id).is_none() {
            return Ok(());
        }
        for c in &reservation.authorization.charges {
            guard.unbook(c.policy, &c.amount, reservation.booked_at);
        }
        tracing::debug!(session_id = %reservation.session_id, "reservation released");
        Ok(())
    }

    /// Rebuild a session's totals from its confirmed history.
    ///
    /// Each transaction is re-matched against the spec; ones no policy covers
    /// are skipped. Reservations still outstanding are booked on top of the
    /// history until they are committed or released. Returns how many
    /// transactions were applied.
    pub fn replay(&self, record: &SessionRecord, history: &[ObservedTx]) -> Result<usize> {
        let anchor = self.anchor.resolve(record.created_at);
        let entry = Arc::clone(
            self.sessions
                .entry(record.session_id)
                .or_insert_with(|| Arc::new(Mutex::new(SessionUsage::new(Arc::clone(&record.spec), anchor))))
                .value(),
        );
        let mut guard = lock(&entry)?;

        let mut usage = SessionUsage::new(Arc::clone(&record.spec), anchor);
        let mut applied = 0;

        for tx in history {
            let matched = match match_action(&record.spec, &tx.action) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(session_id = %record.session_id, code = %e.code(), "history entry matches no policy");
                    continue;
                }
            };
            // Confirmed history is booked as-is, without re-checking caps.
            let proposal = TransactionProposal::new(tx.action.clone(), tx.fee.clone());
            let charges = charges(matched, &proposal);
            for c in &charges {
                usage.book(c.policy, &c.amount, tx.observed_at)?;
            }
            applied += 1;
        }

        for pending in guard.outstanding.values() {
            for c in &pending.charges {
                usage.book(c.policy, &c.amount, pending.booked_at)?;
            }
        }
        usage.outstanding = std::mem::take(&mut guard.outstanding);
        *guard = usage;

        tracing::info!(
            session_id = %record.session_id,
            applied,
            in_flight = guard.outstanding.len(),
            "usage replayed from history"
        );
        Ok(applied)
    }

    fn entry(&self, session_id: SessionId) -> Result<Arc<Mutex<SessionUsage>>> {
        self.sessions
            .get(&session_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(SessionError::UnknownSession(session_id))
    }
}

fn lock(entry: &Mutex<SessionUsage>) -> Result<MutexGuard<'_, SessionUsage>> {
    // Poisoned mutex means a logic bug; refuse instead of panicking.
    entry
        .lock()
        .map_err(|_| SessionError::Internal("usage ledger lock poisoned".into()))
}
