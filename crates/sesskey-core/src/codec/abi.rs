//! Solidity ABI encoding of session specs (panic-free).
//!
//! Layout of the on-chain `SessionSpec` tuple:
//! `(address signer, uint256 expiresAt, UsageLimit feeLimit, CallSpec[] callPolicies, TransferSpec[] transferPolicies)`
//! where `UsageLimit = (uint8 limitType, uint256 limit, uint256 period)`,
//! `CallSpec = (address target, bytes4 selector, uint256 maxValuePerUse, UsageLimit valueLimit, Constraint[] constraints)`,
//! `Constraint = (uint8 condition, uint64 index, bytes32 refValue, UsageLimit limit)` and
//! `TransferSpec = (address target, uint256 maxValuePerUse, UsageLimit valueLimit)`.
//!
//! Decoding rules:
//! - Never index raw buffers; every read goes through `word_at` bounds checks.
//! - Offsets are added with `checked_add`; array lengths are bounded by the
//!   input size before anything is allocated.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, SessionError};
use crate::model::{
    CallPolicy, Condition, Constraint, Limit, LimitKind, SessionSpec, SessionSpecBuilder, TransferPolicy,
};
use crate::types::{Address, Amount, Selector, Word};

const WORD: usize = 32;
/// Head of the spec tuple: signer, expiresAt, feeLimit (3), two offsets.
const SPEC_HEAD: usize = 7 * WORD;
/// Head of a call spec: target, selector, maxValuePerUse, valueLimit (3), offset.
const CALL_HEAD: usize = 7 * WORD;
const CONSTRAINT_SIZE: usize = 6 * WORD;
const TRANSFER_SIZE: usize = 5 * WORD;

/// `abi.encode(spec)`.
pub fn encode_session_spec(spec: &SessionSpec) -> Result<Bytes> {
    let tuple = encode_spec_tuple(spec)?;
    let mut out = BytesMut::with_capacity(WORD + tuple.len());
    put_usize(&mut out, WORD);
    out.put_slice(&tuple);
    Ok(out.freeze())
}

/// `abi.encode(spec, periodIds)`: the validator data attached to a session
/// transaction's signature.
pub fn encode_validator_data(spec: &SessionSpec, period_ids: &[u64]) -> Result<Bytes> {
    let tuple = encode_spec_tuple(spec)?;
    let head = 2 * WORD;
    let mut out = BytesMut::with_capacity(head + tuple.len() + WORD * (1 + period_ids.len()));
    put_usize(&mut out, head);
    put_usize(&mut out, head + tuple.len());
    out.put_slice(&tuple);
    put_usize(&mut out, period_ids.len());
    for id in period_ids {
        put_u64(&mut out, *id);
    }
    Ok(out.freeze())
}

/// Inverse of [`encode_session_spec`]. The decoded spec goes through the same
/// builder checks as a locally constructed one.
pub fn decode_session_spec(data: &[u8]) -> Result<SessionSpec> {
    let base = read_usize(data, 0)?;
    decode_spec_tuple(data, base)
}

fn encode_spec_tuple(spec: &SessionSpec) -> Result<BytesMut> {
    let calls = spec
        .call_policies()
        .iter()
        .map(encode_call)
        .collect::<Result<Vec<_>>>()?;
    let calls = encode_dynamic_array(&calls);

    let mut transfers = BytesMut::with_capacity(WORD + spec.transfer_policies().len() * TRANSFER_SIZE);
    put_usize(&mut transfers, spec.transfer_policies().len());
    for t in spec.transfer_policies() {
        put_address(&mut transfers, &t.target);
        put_amount(&mut transfers, &t.max_value_per_use)?;
        put_limit(&mut transfers, &t.value_limit)?;
    }

    let mut out = BytesMut::with_capacity(SPEC_HEAD + calls.len() + transfers.len());
    put_address(&mut out, spec.signer());
    put_u64(&mut out, spec.expires_at());
    put_limit(&mut out, spec.fee_limit())?;
    put_usize(&mut out, SPEC_HEAD);
    put_usize(&mut out, SPEC_HEAD + calls.len());
    out.put_slice(&calls);
    out.put_slice(&transfers);
    Ok(out)
}

fn encode_call(p: &CallPolicy) -> Result<BytesMut> {
    let mut out = BytesMut::with_capacity(CALL_HEAD + WORD + p.constraints.len() * CONSTRAINT_SIZE);
    put_address(&mut out, &p.target);
    put_selector(&mut out, &p.selector);
    put_amount(&mut out, &p.max_value_per_use)?;
    put_limit(&mut out, &p.value_limit)?;
    put_usize(&mut out, CALL_HEAD);

    put_usize(&mut out, p.constraints.len());
    for c in &p.constraints {
        put_u64(&mut out, u64::from(c.condition.wire_id()));
        put_u64(&mut out, c.argument_index);
        out.put_slice(c.reference_value.as_bytes());
        put_limit(&mut out, &c.limit)?;
    }
    Ok(out)
}

/// Array of dynamic elements: length, per-element offsets (relative to the
/// first offset slot), then the elements.
fn encode_dynamic_array(items: &[BytesMut]) -> BytesMut {
    let total: usize = items.iter().map(|i| i.len()).sum();
    let mut out = BytesMut::with_capacity(WORD * (1 + items.len()) + total);
    put_usize(&mut out, items.len());
    let mut offset = WORD * items.len();
    for i in items {
        put_usize(&mut out, offset);
        offset += i.len();
    }
    for i in items {
        out.put_slice(i);
    }
    out
}

fn put_u64(out: &mut BytesMut, v: u64) {
    out.put_bytes(0, 24);
    out.put_u64(v);
}

fn put_usize(out: &mut BytesMut, v: usize) {
    put_u64(out, v as u64);
}

fn put_address(out: &mut BytesMut, a: &Address) {
    out.put_bytes(0, 12);
    out.put_slice(a.as_bytes());
}

fn put_selector(out: &mut BytesMut, s: &Selector) {
    out.put_slice(s.as_bytes());
    out.put_bytes(0, 28);
}

fn put_amount(out: &mut BytesMut, v: &Amount) -> Result<()> {
    let w = Word::from_amount(v)
        .ok_or_else(|| SessionError::Codec(format!("amount {v} exceeds uint256")))?;
    out.put_slice(w.as_bytes());
    Ok(())
}

fn put_limit(out: &mut BytesMut, l: &Limit) -> Result<()> {
    put_u64(out, u64::from(l.kind().wire_id()));
    put_amount(out, l.amount())?;
    put_u64(out, l.period());
    Ok(())
}

fn decode_spec_tuple(data: &[u8], base: usize) -> Result<SessionSpec> {
    let signer = read_address(data, base)?;
    let expires_at = read_u64(data, at(base, WORD)?)?;
    let fee_limit = read_limit(data, at(base, 2 * WORD)?)?;
    let calls_at = at(base, read_usize(data, at(base, 5 * WORD)?)?)?;
    let transfers_at = at(base, read_usize(data, at(base, 6 * WORD)?)?)?;

    let mut builder = SessionSpecBuilder::new(signer, expires_at).fee_limit(fee_limit);

    let n_calls = read_len(data, calls_at, WORD)?;
    let slots = at(calls_at, WORD)?;
    for i in 0..n_calls {
        let off = read_usize(data, at(slots, i * WORD)?)?;
        builder = builder.call_policy(decode_call(data, at(slots, off)?)?);
    }

    let n_transfers = read_len(data, transfers_at, TRANSFER_SIZE)?;
    let first = at(transfers_at, WORD)?;
    for i in 0..n_transfers {
        let t = at(first, i * TRANSFER_SIZE)?;
        builder = builder.transfer_policy(TransferPolicy {
            target: read_address(data, t)?,
            max_value_per_use: read_amount(data, at(t, WORD)?)?,
            value_limit: read_limit(data, at(t, 2 * WORD)?)?,
        });
    }

    builder.build()
}

fn decode_call(data: &[u8], base: usize) -> Result<CallPolicy> {
    let target = read_address(data, base)?;
    let selector = read_selector(data, at(base, WORD)?)?;
    let max_value_per_use = read_amount(data, at(base, 2 * WORD)?)?;
    let value_limit = read_limit(data, at(base, 3 * WORD)?)?;
    let constraints_at = at(base, read_usize(data, at(base, 6 * WORD)?)?)?;

    let n = read_len(data, constraints_at, CONSTRAINT_SIZE)?;
    let first = at(constraints_at, WORD)?;
    let mut constraints = Vec::with_capacity(n);
    for i in 0..n {
        let c = at(first, i * CONSTRAINT_SIZE)?;
        let cond_id = read_u8(data, c)?;
        let condition = Condition::from_wire(cond_id)
            .ok_or_else(|| SessionError::Codec(format!("unknown condition {cond_id}")))?;
        constraints.push(Constraint {
            condition,
            argument_index: read_u64(data, at(c, WORD)?)?,
            reference_value: word_at(data, at(c, 2 * WORD)?)?,
            limit: read_limit(data, at(c, 3 * WORD)?)?,
        });
    }

    Ok(CallPolicy {
        target,
        selector,
        max_value_per_use,
        value_limit,
        constraints,
    })
}

fn at(base: usize, off: usize) -> Result<usize> {
    base.checked_add(off)
        .ok_or_else(|| SessionError::Codec("offset overflow".into()))
}

fn word_at(data: &[u8], offset: usize) -> Result<Word> {
    let end = at(offset, WORD)?;
    let slice = data.get(offset..end).ok_or_else(|| {
        SessionError::Codec(format!("word at {offset} out of bounds (len {})", data.len()))
    })?;
    Word::from_slice(slice)
}

fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    let w = word_at(data, offset)?;
    let (high, low) = w.0.split_at(24);
    if high.iter().any(|b| *b != 0) {
        return Err(SessionError::Codec(format!("value at {offset} exceeds uint64")));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(low);
    Ok(u64::from_be_bytes(buf))
}

fn read_u8(data: &[u8], offset: usize) -> Result<u8> {
    let v = read_u64(data, offset)?;
    u8::try_from(v).map_err(|_| SessionError::Codec(format!("value at {offset} exceeds uint8")))
}

fn read_usize(data: &[u8], offset: usize) -> Result<usize> {
    let v = read_u64(data, offset)?;
    usize::try_from(v).map_err(|_| SessionError::Codec(format!("offset {v} exceeds usize")))
}

/// Array length, rejected if the elements cannot possibly fit in `data`.
fn read_len(data: &[u8], offset: usize, elem_size: usize) -> Result<usize> {
    let n = read_usize(data, offset)?;
    let available = data.len().saturating_sub(offset) / elem_size;
    if n > available {
        return Err(SessionError::Codec(format!(
            "array at {offset} claims {n} elements, only room for {available}"
        )));
    }
    Ok(n)
}

fn read_amount(data: &[u8], offset: usize) -> Result<Amount> {
    Ok(word_at(data, offset)?.to_amount())
}

fn read_address(data: &[u8], offset: usize) -> Result<Address> {
    let w = word_at(data, offset)?;
    let (pad, addr) = w.0.split_at(12);
    if pad.iter().any(|b| *b != 0) {
        return Err(SessionError::Codec(format!("dirty address padding at {offset}")));
    }
    Address::from_slice(addr)
}

fn read_selector(data: &[u8], offset: usize) -> Result<Selector> {
    let w = word_at(data, offset)?;
    let (sel, pad) = w.0.split_at(4);
    if pad.iter().any(|b| *b != 0) {
        return Err(SessionError::Codec(format!("dirty bytes4 padding at {offset}")));
    }
    Selector::from_slice(sel)
}

fn read_limit(data: &[u8], offset: usize) -> Result<Limit> {
    let kind_id = read_u8(data, offset)?;
    let kind = LimitKind::from_wire(kind_id)
        .ok_or_else(|| SessionError::Codec(format!("unknown limit type {kind_id}")))?;
    let amount = read_amount(data, at(offset, WORD)?)?;
    let period = read_u64(data, at(offset, 2 * WORD)?)?;
    Limit::new(kind, amount, period)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn spec() -> SessionSpec {
        SessionSpec::builder(Address([0x11; 20]), 1_700_000_000)
            .fee_limit(Limit::lifetime(1_000_000u32))
            .call_policy(
                CallPolicy::new(Address([0xca; 20]), Selector([0xa9, 0x05, 0x9c, 0xbb]), 0u8, Limit::unlimited())
                    .with_constraint(Constraint::new(0, Condition::Equal, Word::from_u64(0x42)))
                    .with_constraint(
                        Constraint::new(1, Condition::Unconstrained, Word::default())
                            .with_limit(Limit::allowance(500u32, 86_400).unwrap()),
                    ),
            )
            .call_policy(CallPolicy::new(
                Address([0xcb; 20]),
                Selector([1, 2, 3, 4]),
                7u8,
                Limit::lifetime(70u8),
            ))
            .transfer_policy(TransferPolicy::new(Address([0xbe; 20]), 100u8, Limit::lifetime(150u8)))
            .build()
            .unwrap()
    }

    #[test]
    fn empty_spec_layout() {
        let s = SessionSpec::builder(Address([0x11; 20]), 5).build().unwrap();
        let enc = encode_session_spec(&s).unwrap();
        // offset + 7 head words + two zero-length arrays
        assert_eq!(enc.len(), WORD + SPEC_HEAD + 2 * WORD);
        assert_eq!(read_usize(&enc, 0).unwrap(), 32);
        assert_eq!(read_u64(&enc, 2 * WORD).unwrap(), 5);
        assert_eq!(read_usize(&enc, WORD + 5 * WORD).unwrap(), SPEC_HEAD);
        assert_eq!(read_usize(&enc, WORD + 6 * WORD).unwrap(), SPEC_HEAD + WORD);
    }

    #[test]
    fn decode_inverts_encode() {
        let s = spec();
        let enc = encode_session_spec(&s).unwrap();
        assert_eq!(enc.len() % WORD, 0);
        assert_eq!(decode_session_spec(&enc).unwrap(), s);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let enc = encode_session_spec(&spec()).unwrap();
        for cut in [0, 31, 100, enc.len() - 1] {
            assert!(decode_session_spec(&enc[..cut]).is_err(), "cut={cut}");
        }
    }

    #[test]
    fn validator_data_appends_period_ids() {
        let s = spec();
        let spec_len = encode_session_spec(&s).unwrap().len() - WORD;
        let enc = encode_validator_data(&s, &[3, 0, 9]).unwrap();
        let ids_at = read_usize(&enc, WORD).unwrap();
        assert_eq!(ids_at, 2 * WORD + spec_len);
        assert_eq!(read_usize(&enc, ids_at).unwrap(), 3);
        assert_eq!(read_u64(&enc, ids_at + 3 * WORD).unwrap(), 9);
    }

    #[test]
    fn rejects_unknown_limit_type() {
        let mut enc = encode_session_spec(&spec()).unwrap().to_vec();
        // feeLimit.limitType lives in the third head word of the tuple
        let slot = WORD + 2 * WORD + 31;
        enc[slot] = 9;
        assert!(decode_session_spec(&enc).is_err());
    }
}
