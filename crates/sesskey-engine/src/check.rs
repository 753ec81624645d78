//! Offline proposal check: one spec, one proposal, no prior usage.

use serde::Serialize;

use sesskey_core::error::Result;
use sesskey_core::{PolicyRef, SessionSpec, TransactionProposal};

use crate::config::EngineConfig;
use crate::policy::{period_ids, validate, validator_data, Charge, NoUsage};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckReport {
    Authorized {
        session_id: String,
        matched: PolicyRef,
        charges: Vec<Charge>,
        period_ids: Vec<u64>,
        /// `0x`-prefixed `abi.encode(spec, periodIds)`.
        validator_data: String,
    },
    Rejected {
        code: &'static str,
        message: String,
    },
}

impl CheckReport {
    pub fn is_authorized(&self) -> bool {
        matches!(self, CheckReport::Authorized { .. })
    }
}

/// Validate `proposal` at `now` as if the session had just been created.
pub fn check(cfg: &EngineConfig, spec: &SessionSpec, proposal: &TransactionProposal, now: u64) -> Result<CheckReport> {
    let auth = match validate(spec, proposal, &NoUsage, now) {
        Ok(a) => a,
        Err(r) => {
            return Ok(CheckReport::Rejected {
                code: r.code().as_str(),
                message: r.to_string(),
            })
        }
    };

    let anchor = cfg.accounting.window_anchor.resolve(now);
    let ids = period_ids(spec, &proposal.action, now, anchor)?;
    let data = validator_data(spec, &proposal.action, now, anchor)?;
    Ok(CheckReport::Authorized {
        session_id: spec.session_id()?.to_string(),
        matched: auth.matched,
        charges: auth.charges,
        period_ids: ids,
        validator_data: format!("0x{}", hex::encode(&data)),
    })
}
