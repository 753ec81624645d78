//! Transaction proposals submitted for validation.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::types::{amount_serde, Address, Amount, Selector, Word};

/// What the session key wants to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Plain native-currency transfer, no call data.
    Transfer {
        target: Address,
        #[serde(with = "amount_serde")]
        value: Amount,
    },
    /// Contract call; `args` are the 32-byte argument words after the selector.
    Call {
        target: Address,
        selector: Selector,
        #[serde(with = "amount_serde")]
        value: Amount,
        #[serde(default)]
        args: Vec<Word>,
    },
}

impl Action {
    pub fn transfer(target: Address, value: impl Into<Amount>) -> Self {
        Action::Transfer {
            target,
            value: value.into(),
        }
    }

    pub fn call(target: Address, selector: Selector, value: impl Into<Amount>, args: Vec<Word>) -> Self {
        Action::Call {
            target,
            selector,
            value: value.into(),
            args,
        }
    }

    /// Split raw call data into selector and argument words.
    ///
    /// Empty data is a plain transfer. A trailing partial word is not
    /// addressable by constraints and is dropped.
    pub fn from_calldata(target: Address, value: impl Into<Amount>, data: &[u8]) -> Result<Self> {
        let value = value.into();
        if data.is_empty() {
            return Ok(Action::Transfer { target, value });
        }
        let (Some(sel), Some(rest)) = (data.get(..4), data.get(4..)) else {
            return Err(SessionError::Codec(format!(
                "call data shorter than a selector ({} bytes)",
                data.len()
            )));
        };
        let selector = Selector::from_slice(sel)?;
        let args = rest
            .chunks_exact(Word::LEN)
            .map(Word::from_slice)
            .collect::<Result<Vec<_>>>()?;
        Ok(Action::Call {
            target,
            selector,
            value,
            args,
        })
    }

    pub fn target(&self) -> &Address {
        match self {
            Action::Transfer { target, .. } | Action::Call { target, .. } => target,
        }
    }

    pub fn value(&self) -> &Amount {
        match self {
            Action::Transfer { value, .. } | Action::Call { value, .. } => value,
        }
    }

    pub fn selector(&self) -> Option<Selector> {
        match self {
            Action::Transfer { .. } => None,
            Action::Call { selector, .. } => Some(*selector),
        }
    }

    /// Re-assemble call data (`None` for transfers).
    pub fn calldata(&self) -> Option<Bytes> {
        match self {
            Action::Transfer { .. } => None,
            Action::Call { selector, args, .. } => {
                let mut buf = BytesMut::with_capacity(4 + args.len() * Word::LEN);
                buf.put_slice(selector.as_bytes());
                for a in args {
                    buf.put_slice(a.as_bytes());
                }
                Some(buf.freeze())
            }
        }
    }
}

/// An action plus the externally estimated network fee it would cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransactionProposal {
    pub action: Action,
    #[serde(default, with = "amount_serde")]
    pub fee: Amount,
}

impl TransactionProposal {
    pub fn new(action: Action, fee: impl Into<Amount>) -> Self {
        Self {
            action,
            fee: fee.into(),
        }
    }
}
