//! Session spec vectors: JSON parsing, builder checks, ABI layout and ids.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use sesskey_core::codec::{decode_session_spec, encode_session_spec, session_id};
use sesskey_core::SessionSpec;

use vector_loader::load;

#[test]
fn valid_spec_vectors() {
    let files = ["spec_empty.json", "spec_transfer.json", "spec_erc20.json"];

    for f in files {
        let v = load(f);
        let ex = v.expect.expect("missing expect block");
        let spec: SessionSpec = serde_json::from_value(v.spec.clone())
            .unwrap_or_else(|e| panic!("vector={}: {e}", v.description));

        assert_eq!(spec.call_policies().len(), ex.call_policies, "vector={}", v.description);
        assert_eq!(spec.transfer_policies().len(), ex.transfer_policies, "vector={}", v.description);

        let encoded = encode_session_spec(&spec).unwrap();
        assert_eq!(hex::encode(&encoded), ex.abi_hex, "vector={}", v.description);
        assert_eq!(session_id(&spec).unwrap().to_string(), ex.session_id, "vector={}", v.description);

        let decoded = decode_session_spec(&hex::decode(&ex.abi_hex).unwrap()).unwrap();
        assert_eq!(decoded, spec, "vector={}", v.description);
    }
}

#[test]
fn invalid_spec_vectors() {
    let files = [
        "spec_bad_allowance.json",
        "spec_bad_zero_signer.json",
        "spec_bad_unknown_field.json",
        "spec_bad_lifetime_period.json",
    ];

    for f in files {
        let v = load(f);
        let want = v.expect_error.expect("missing expect_error block");
        let err = serde_json::from_value::<SessionSpec>(v.spec)
            .expect_err(&format!("vector={} must fail", v.description));
        assert!(
            err.to_string().contains(&want.contains),
            "vector={}: {err}",
            v.description
        );
    }
}

#[test]
fn json_roundtrip_preserves_id() {
    let v = load("spec_erc20.json");
    let spec: SessionSpec = serde_json::from_value(v.spec).unwrap();
    let again: SessionSpec = serde_json::from_str(&serde_json::to_string(&spec).unwrap()).unwrap();
    assert_eq!(spec.session_id().unwrap(), again.session_id().unwrap());
}
