//! Top-level facade crate for sesskey.
//!
//! Re-exports the policy model (`core`) and the validator, usage ledger and
//! session manager (`engine`) so users can depend on a single crate.

pub mod core {
    pub use sesskey_core::*;
}

pub mod engine {
    pub use sesskey_engine::*;
}
