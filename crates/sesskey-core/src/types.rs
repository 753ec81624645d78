//! Fixed-width chain primitives and arbitrary-precision amounts.
//!
//! Addresses, selectors and 32-byte words are parsed from and rendered as
//! `0x`-prefixed hex. Amounts are `BigUint` because on-chain values are
//! `uint256` and routinely exceed 64 bits.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SessionError};

/// Native-currency or token quantity (`uint256` on the wire).
pub type Amount = BigUint;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Byte width on the wire.
            pub const LEN: usize = $len;

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            /// Copy from a slice of exactly `LEN` bytes.
            pub fn from_slice(s: &[u8]) -> Result<Self> {
                let arr: [u8; $len] = s.try_into().map_err(|_| {
                    SessionError::Codec(format!(
                        "{} expects {} bytes, got {}",
                        stringify!($name),
                        $len,
                        s.len()
                    ))
                })?;
                Ok(Self(arr))
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(b: [u8; $len]) -> Self {
                Self(b)
            }
        }

        impl FromStr for $name {
            type Err = SessionError;

            fn from_str(s: &str) -> Result<Self> {
                let raw = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(raw).map_err(|e| {
                    SessionError::Codec(format!("invalid {} hex {s}: {e}", stringify!($name)))
                })?;
                Self::from_slice(&bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({self})", stringify!($name))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                s.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes!(
    /// 20-byte account or contract address.
    Address,
    20
);

fixed_bytes!(
    /// 4-byte function selector.
    Selector,
    4
);

fixed_bytes!(
    /// 32-byte ABI word (argument slot, reference value, hash).
    Word,
    32
);

fixed_bytes!(
    /// Content hash identifying a session spec (`keccak256(abi.encode(spec))`).
    SessionId,
    32
);

/// Transaction hash returned by the chain client.
pub type TxHash = Word;

impl Word {
    /// Big-endian word holding `v`.
    pub fn from_u64(v: u64) -> Self {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&v.to_be_bytes());
        Self(out)
    }

    /// Big-endian word holding `v`; `None` when `v` needs more than 256 bits.
    pub fn from_amount(v: &Amount) -> Option<Self> {
        let be = v.to_bytes_be();
        if be.len() > 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out[32 - be.len()..].copy_from_slice(&be);
        Some(Self(out))
    }

    /// Interpret the word as an unsigned big-endian integer.
    pub fn to_amount(&self) -> Amount {
        BigUint::from_bytes_be(&self.0)
    }
}

/// Serde helpers for [`Amount`]: serialized as a decimal string, accepted as
/// a JSON number, a decimal string, or a `0x` hex string.
pub mod amount_serde {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Num(u64),
        Str(String),
    }

    pub fn serialize<S: Serializer>(v: &Amount, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Amount, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Num(n) => Ok(Amount::from(n)),
            Repr::Str(s) => parse_amount(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// Parse a decimal or `0x`-prefixed hex amount.
pub fn parse_amount(s: &str) -> Result<Amount> {
    let parsed = match s.strip_prefix("0x") {
        Some(h) => BigUint::parse_bytes(h.as_bytes(), 16),
        None => BigUint::parse_bytes(s.as_bytes(), 10),
    };
    parsed.ok_or_else(|| SessionError::Codec(format!("invalid amount: {s}")))
}
