//! Argument-level predicates on call data.

use serde::{Deserialize, Serialize};

use crate::model::Limit;
use crate::types::Word;

/// Comparison applied between an argument word and the reference value.
///
/// Words compare as unsigned big-endian integers, which is byte-wise
/// lexicographic order on the 32-byte representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Unconstrained,
    Equal,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    NotEqual,
}

impl Condition {
    pub fn wire_id(self) -> u8 {
        match self {
            Condition::Unconstrained => 0,
            Condition::Equal => 1,
            Condition::Greater => 2,
            Condition::Less => 3,
            Condition::GreaterEqual => 4,
            Condition::LessEqual => 5,
            Condition::NotEqual => 6,
        }
    }

    pub fn from_wire(id: u8) -> Option<Self> {
        Some(match id {
            0 => Condition::Unconstrained,
            1 => Condition::Equal,
            2 => Condition::Greater,
            3 => Condition::Less,
            4 => Condition::GreaterEqual,
            5 => Condition::LessEqual,
            6 => Condition::NotEqual,
            _ => return None,
        })
    }

    pub fn holds(self, actual: &Word, reference: &Word) -> bool {
        match self {
            Condition::Unconstrained => true,
            Condition::Equal => actual == reference,
            Condition::NotEqual => actual != reference,
            Condition::Greater => actual > reference,
            Condition::GreaterEqual => actual >= reference,
            Condition::Less => actual < reference,
            Condition::LessEqual => actual <= reference,
        }
    }
}

/// Predicate on one 32-byte argument slot, plus a cumulative cap on the
/// argument's value across uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Constraint {
    pub argument_index: u64,
    pub condition: Condition,
    #[serde(default)]
    pub reference_value: Word,
    #[serde(default = "Limit::unlimited")]
    pub limit: Limit,
}

impl Constraint {
    pub fn new(argument_index: u64, condition: Condition, reference_value: Word) -> Self {
        Self {
            argument_index,
            condition,
            reference_value,
            limit: Limit::unlimited(),
        }
    }

    /// Track cumulative usage of the argument value against `limit`.
    pub fn with_limit(mut self, limit: Limit) -> Self {
        self.limit = limit;
        self
    }

    /// The argument this constraint inspects, if the call data carries it.
    pub fn argument<'a>(&self, args: &'a [Word]) -> Option<&'a Word> {
        usize::try_from(self.argument_index)
            .ok()
            .and_then(|i| args.get(i))
    }

    /// `true` when the argument exists and satisfies the condition.
    pub fn is_satisfied(&self, args: &[Word]) -> bool {
        self.argument(args)
            .is_some_and(|a| self.condition.holds(a, &self.reference_value))
    }
}
