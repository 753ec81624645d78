//! Wire codec for the on-chain session module.
//!
//! Specs travel as Solidity ABI tuples (big-endian 32-byte words). A
//! session's identifier is the keccak256 hash of that encoding, so the same
//! spec hashes to the same id no matter where it is stored.

pub mod abi;

use sha3::{Digest, Keccak256};

use crate::error::Result;
use crate::model::SessionSpec;
use crate::types::SessionId;

pub use abi::{decode_session_spec, encode_session_spec, encode_validator_data};

/// `keccak256(abi.encode(spec))`.
pub fn session_id(spec: &SessionSpec) -> Result<SessionId> {
    let encoded = encode_session_spec(spec)?;
    let mut hasher = Keccak256::new();
    hasher.update(&encoded);
    Ok(SessionId(hasher.finalize().into()))
}
