//! Usage accounting against lifetime and allowance limits.

pub mod ledger;

pub use ledger::{Reservation, UsageLedger, UsageSnapshot};
