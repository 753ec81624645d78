//! Policy layer (matching, per-use and cumulative limits).
//!
//! Validation is a pure function of the spec, the proposal, a usage view and
//! the current time. The usage ledger supplies the view and serializes
//! check-then-book sequences around it.

pub mod engine;
pub mod matcher;

use std::collections::BTreeMap;

use sesskey_core::{Amount, PolicyRef};

pub use engine::{charges, period_ids, validate, validator_data, Authorization, Charge};
pub use matcher::{match_action, Matched};

/// Cumulative usage already consumed, per tracked limit.
pub trait UsageView {
    /// Amount used against `policy` in the window containing `now`.
    fn used(&self, policy: PolicyRef, now: u64) -> Amount;
}

/// A session that has spent nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoUsage;

impl UsageView for NoUsage {
    fn used(&self, _policy: PolicyRef, _now: u64) -> Amount {
        Amount::default()
    }
}

/// Fixed totals, independent of time.
impl UsageView for BTreeMap<PolicyRef, Amount> {
    fn used(&self, policy: PolicyRef, _now: u64) -> Amount {
        self.get(&policy).cloned().unwrap_or_default()
    }
}
