//! Session specs (the grant) and session records (the observed grant).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{Rejection, Result, SessionError};
use crate::model::{CallPolicy, Limit, PolicyRef, TransferPolicy};
use crate::types::{Address, Amount, SessionId, TxHash};

/// The full grant issued to a session key. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SessionSpecRepr", into = "SessionSpecRepr")]
pub struct SessionSpec {
    signer: Address,
    expires_at: u64,
    fee_limit: Limit,
    call_policies: Vec<CallPolicy>,
    transfer_policies: Vec<TransferPolicy>,
}

impl SessionSpec {
    pub fn builder(signer: Address, expires_at: u64) -> SessionSpecBuilder {
        SessionSpecBuilder::new(signer, expires_at)
    }

    /// Delegated session key (not the primary account).
    pub fn signer(&self) -> &Address {
        &self.signer
    }

    /// Absolute UNIX timestamp; unusable at or after this instant.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    pub fn fee_limit(&self) -> &Limit {
        &self.fee_limit
    }

    pub fn call_policies(&self) -> &[CallPolicy] {
        &self.call_policies
    }

    pub fn transfer_policies(&self) -> &[TransferPolicy] {
        &self.transfer_policies
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Resolve a policy reference to the limit it tracks.
    pub fn limit(&self, policy: PolicyRef) -> Option<&Limit> {
        match policy {
            PolicyRef::Fee => Some(&self.fee_limit),
            PolicyRef::Transfer { index } => self.transfer_policies.get(index).map(|p| &p.value_limit),
            PolicyRef::Call { index } => self.call_policies.get(index).map(|p| &p.value_limit),
            PolicyRef::Constraint { call, index } => self
                .call_policies
                .get(call)
                .and_then(|p| p.constraints.get(index))
                .map(|c| &c.limit),
        }
    }

    /// Every limit reference in the spec, fee first, in list order.
    pub fn policy_refs(&self) -> Vec<PolicyRef> {
        let mut out = vec![PolicyRef::Fee];
        out.extend((0..self.transfer_policies.len()).map(|index| PolicyRef::Transfer { index }));
        for (call, p) in self.call_policies.iter().enumerate() {
            out.push(PolicyRef::Call { index: call });
            out.extend((0..p.constraints.len()).map(|index| PolicyRef::Constraint { call, index }));
        }
        out
    }

    /// Content hash (`keccak256` of the ABI encoding).
    pub fn session_id(&self) -> Result<SessionId> {
        codec::session_id(self)
    }
}

/// Checked construction of a [`SessionSpec`].
#[derive(Debug, Clone)]
pub struct SessionSpecBuilder {
    signer: Address,
    expires_at: u64,
    fee_limit: Limit,
    call_policies: Vec<CallPolicy>,
    transfer_policies: Vec<TransferPolicy>,
}

impl SessionSpecBuilder {
    pub fn new(signer: Address, expires_at: u64) -> Self {
        Self {
            signer,
            expires_at,
            fee_limit: Limit::unlimited(),
            call_policies: Vec::new(),
            transfer_policies: Vec::new(),
        }
    }

    pub fn fee_limit(mut self, limit: Limit) -> Self {
        self.fee_limit = limit;
        self
    }

    pub fn call_policy(mut self, policy: CallPolicy) -> Self {
        self.call_policies.push(policy);
        self
    }

    pub fn transfer_policy(mut self, policy: TransferPolicy) -> Self {
        self.transfer_policies.push(policy);
        self
    }

    pub fn build(self) -> Result<SessionSpec> {
        if self.signer.is_zero() {
            return Err(SessionError::InvalidPolicy("signer must not be the zero address".into()));
        }
        if self.expires_at == 0 {
            return Err(SessionError::InvalidPolicy("expiresAt must be set".into()));
        }

        check_uint256("feeLimit", self.fee_limit.amount())?;
        for (i, p) in self.transfer_policies.iter().enumerate() {
            check_uint256(&format!("transfer[{i}].maxValuePerUse"), &p.max_value_per_use)?;
            check_uint256(&format!("transfer[{i}].valueLimit"), p.value_limit.amount())?;
        }
        for (i, p) in self.call_policies.iter().enumerate() {
            check_uint256(&format!("call[{i}].maxValuePerUse"), &p.max_value_per_use)?;
            check_uint256(&format!("call[{i}].valueLimit"), p.value_limit.amount())?;
            for (j, c) in p.constraints.iter().enumerate() {
                check_uint256(&format!("call[{i}].constraint[{j}].limit"), c.limit.amount())?;
            }
        }

        Ok(SessionSpec {
            signer: self.signer,
            expires_at: self.expires_at,
            fee_limit: self.fee_limit,
            call_policies: self.call_policies,
            transfer_policies: self.transfer_policies,
        })
    }
}

fn check_uint256(field: &str, v: &Amount) -> Result<()> {
    if v.bits() > 256 {
        return Err(SessionError::InvalidPolicy(format!("{field} exceeds uint256")));
    }
    Ok(())
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SessionSpecRepr {
    signer: Address,
    expires_at: u64,
    #[serde(default = "Limit::unlimited")]
    fee_limit: Limit,
    #[serde(default)]
    call_policies: Vec<CallPolicy>,
    #[serde(default)]
    transfer_policies: Vec<TransferPolicy>,
}

impl TryFrom<SessionSpecRepr> for SessionSpec {
    type Error = SessionError;

    fn try_from(r: SessionSpecRepr) -> Result<Self> {
        SessionSpecBuilder {
            signer: r.signer,
            expires_at: r.expires_at,
            fee_limit: r.fee_limit,
            call_policies: r.call_policies,
            transfer_policies: r.transfer_policies,
        }
        .build()
    }
}

impl From<SessionSpec> for SessionSpecRepr {
    fn from(s: SessionSpec) -> Self {
        Self {
            signer: s.signer,
            expires_at: s.expires_at,
            fee_limit: s.fee_limit,
            call_policies: s.call_policies,
            transfer_policies: s.transfer_policies,
        }
    }
}

/// Per-session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Submitted, not yet confirmed on chain.
    Pending,
    Active,
    Expired,
    Revoked,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Pending => "pending",
            SessionState::Active => "active",
            SessionState::Expired => "expired",
            SessionState::Revoked => "revoked",
        })
    }
}

/// Where a session was created on chain. Orders by position in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationRef {
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: TxHash,
}

/// A session observed on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: SessionId,
    /// Primary account that granted the session.
    pub account: Address,
    pub spec: Arc<SessionSpec>,
    pub creation: CreationRef,
    /// Observed creation time (UNIX seconds); anchors allowance windows.
    pub created_at: u64,
    /// Terminal once set.
    pub revoked: bool,
}

impl SessionRecord {
    pub fn state(&self, now: u64) -> SessionState {
        if self.revoked {
            SessionState::Revoked
        } else if self.spec.is_expired(now) {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }

    pub fn is_active(&self, now: u64) -> bool {
        self.state(now) == SessionState::Active
    }

    /// Reject use of a revoked or expired session.
    pub fn ensure_active(&self, now: u64) -> std::result::Result<(), Rejection> {
        match self.state(now) {
            SessionState::Active => Ok(()),
            state => Err(Rejection::InvalidSessionState {
                session_id: self.session_id,
                state,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::model::{Condition, Constraint};
    use crate::types::{Selector, Word};

    fn signer() -> Address {
        Address([0x11; 20])
    }

    #[test]
    fn builder_rejects_zero_signer_and_oversized_amounts() {
        assert!(SessionSpec::builder(Address::default(), 10).build().is_err());
        assert!(SessionSpec::builder(signer(), 0).build().is_err());

        let huge = Amount::from(1u8) << 256;
        let r = SessionSpec::builder(signer(), 10)
            .transfer_policy(TransferPolicy::new(Address([1; 20]), huge, Limit::unlimited()))
            .build();
        assert!(matches!(r, Err(SessionError::InvalidPolicy(_))));
    }

    #[test]
    fn policy_refs_cover_every_limit() {
        let spec = SessionSpec::builder(signer(), 10)
            .transfer_policy(TransferPolicy::new(Address([1; 20]), 1u32, Limit::unlimited()))
            .call_policy(
                CallPolicy::new(Address([2; 20]), Selector([1, 2, 3, 4]), 0u32, Limit::unlimited())
                    .with_constraint(Constraint::new(0, Condition::Unconstrained, Word::default())),
            )
            .build()
            .unwrap();

        let refs = spec.policy_refs();
        assert_eq!(
            refs,
            vec![
                PolicyRef::Fee,
                PolicyRef::Transfer { index: 0 },
                PolicyRef::Call { index: 0 },
                PolicyRef::Constraint { call: 0, index: 0 },
            ]
        );
        assert!(refs.iter().all(|r| spec.limit(*r).is_some()));
        assert!(spec.limit(PolicyRef::Transfer { index: 1 }).is_none());
    }

    #[test]
    fn revoked_wins_over_expired() {
        let spec = SessionSpec::builder(signer(), 100).build().unwrap();
        let mut rec = SessionRecord {
            session_id: SessionId::default(),
            account: Address([9; 20]),
            spec: Arc::new(spec),
            creation: CreationRef {
                block_number: 1,
                log_index: 0,
                tx_hash: TxHash::default(),
            },
            created_at: 0,
            revoked: false,
        };
        assert_eq!(rec.state(99), SessionState::Active);
        assert_eq!(rec.state(100), SessionState::Expired);
        rec.revoked = true;
        assert_eq!(rec.state(50), SessionState::Revoked);
        assert!(rec.ensure_active(50).is_err());
    }
}
