//! Usage limits (`Unlimited`, `Lifetime`, `Allowance`).

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::types::{amount_serde, Amount};

/// Limit semantics. Wire ids follow the session module's `LimitType` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Unlimited,
    Lifetime,
    Allowance,
}

impl LimitKind {
    pub fn wire_id(self) -> u8 {
        match self {
            LimitKind::Unlimited => 0,
            LimitKind::Lifetime => 1,
            LimitKind::Allowance => 2,
        }
    }

    pub fn from_wire(id: u8) -> Option<Self> {
        match id {
            0 => Some(LimitKind::Unlimited),
            1 => Some(LimitKind::Lifetime),
            2 => Some(LimitKind::Allowance),
            _ => None,
        }
    }
}

/// A cap on some cumulative quantity.
///
/// Only constructible through the checked constructors: an `Allowance` always
/// has a non-zero period and every other kind has period zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LimitRepr", into = "LimitRepr")]
pub struct Limit {
    kind: LimitKind,
    amount: Amount,
    period: u64,
}

impl Limit {
    pub fn unlimited() -> Self {
        Self {
            kind: LimitKind::Unlimited,
            amount: Amount::default(),
            period: 0,
        }
    }

    /// Caps the sum of all usage for the life of the session.
    pub fn lifetime(amount: impl Into<Amount>) -> Self {
        Self {
            kind: LimitKind::Lifetime,
            amount: amount.into(),
            period: 0,
        }
    }

    /// Caps usage within each `period`-second window.
    pub fn allowance(amount: impl Into<Amount>, period: u64) -> Result<Self> {
        Self::new(LimitKind::Allowance, amount.into(), period)
    }

    /// Generic checked constructor (used by decoders).
    pub fn new(kind: LimitKind, amount: Amount, period: u64) -> Result<Self> {
        match kind {
            LimitKind::Allowance if period == 0 => Err(SessionError::InvalidPolicy(
                "allowance limit requires a non-zero period".into(),
            )),
            LimitKind::Unlimited | LimitKind::Lifetime if period != 0 => {
                Err(SessionError::InvalidPolicy(format!(
                    "{kind:?} limit must have period 0 (got {period})"
                )))
            }
            _ => Ok(Self {
                kind,
                amount,
                period,
            }),
        }
    }

    pub fn kind(&self) -> LimitKind {
        self.kind
    }

    pub fn amount(&self) -> &Amount {
        &self.amount
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn is_unlimited(&self) -> bool {
        self.kind == LimitKind::Unlimited
    }

    /// Enforceable cap, `None` for `Unlimited`.
    pub fn cap(&self) -> Option<&Amount> {
        match self.kind {
            LimitKind::Unlimited => None,
            LimitKind::Lifetime | LimitKind::Allowance => Some(&self.amount),
        }
    }

    /// Window index that `at` falls into, counted from `anchor`.
    ///
    /// Always 0 for non-allowance limits, and for instants before the anchor.
    pub fn window(&self, at: u64, anchor: u64) -> u64 {
        match self.kind {
            LimitKind::Allowance => at.saturating_sub(anchor) / self.period,
            LimitKind::Unlimited | LimitKind::Lifetime => 0,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LimitRepr {
    kind: LimitKind,
    #[serde(default, with = "amount_serde")]
    amount: Amount,
    #[serde(default)]
    period: u64,
}

impl TryFrom<LimitRepr> for Limit {
    type Error = SessionError;

    fn try_from(r: LimitRepr) -> Result<Self> {
        Limit::new(r.kind, r.amount, r.period)
    }
}

impl From<Limit> for LimitRepr {
    fn from(l: Limit) -> Self {
        Self {
            kind: l.kind,
            amount: l.amount,
            period: l.period,
        }
    }
}
