//! Transfer and call policies.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Constraint, Limit};
use crate::types::{amount_serde, Address, Amount, Selector};

/// Authorizes plain native-currency transfers (no call data) to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransferPolicy {
    pub target: Address,
    #[serde(with = "amount_serde")]
    pub max_value_per_use: Amount,
    pub value_limit: Limit,
}

impl TransferPolicy {
    pub fn new(target: Address, max_value_per_use: impl Into<Amount>, value_limit: Limit) -> Self {
        Self {
            target,
            max_value_per_use: max_value_per_use.into(),
            value_limit,
        }
    }
}

/// Authorizes calling `selector` on `target` when every constraint holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CallPolicy {
    pub target: Address,
    pub selector: Selector,
    #[serde(with = "amount_serde")]
    pub max_value_per_use: Amount,
    pub value_limit: Limit,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl CallPolicy {
    pub fn new(
        target: Address,
        selector: Selector,
        max_value_per_use: impl Into<Amount>,
        value_limit: Limit,
    ) -> Self {
        Self {
            target,
            selector,
            max_value_per_use: max_value_per_use.into(),
            value_limit,
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Names one tracked limit inside a session spec.
///
/// Indices are positions in the spec's policy lists; specs are immutable, so
/// a reference stays valid for the life of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum PolicyRef {
    Fee,
    Transfer { index: usize },
    Call { index: usize },
    Constraint { call: usize, index: usize },
}

impl fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyRef::Fee => f.write_str("fee"),
            PolicyRef::Transfer { index } => write!(f, "transfer[{index}]"),
            PolicyRef::Call { index } => write!(f, "call[{index}]"),
            PolicyRef::Constraint { call, index } => write!(f, "call[{call}].constraint[{index}]"),
        }
    }
}
