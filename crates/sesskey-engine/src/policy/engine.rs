use bytes::Bytes;
use serde::Serialize;

use sesskey_core::codec::encode_validator_data;
use sesskey_core::error::{LimitBreach, Rejection};
use sesskey_core::types::amount_serde;
use sesskey_core::{Action, Amount, Limit, PolicyRef, SessionSpec, TransactionProposal, Word};

use super::matcher::{match_action, Matched};
use super::UsageView;

/// Amount a proposal adds to one tracked limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Charge {
    pub policy: PolicyRef,
    #[serde(with = "amount_serde")]
    pub amount: Amount,
}

/// Successful validation: the matched policy and every limit it touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authorization {
    pub matched: PolicyRef,
    pub charges: Vec<Charge>,
}

/// Check a proposal against a spec and the usage consumed so far.
///
/// Order: expiry, policy match, per-use cap, the matched policy's value
/// limit, each constraint's limit, then the fee limit. The first failure is
/// returned.
pub fn validate<U: UsageView + ?Sized>(
    spec: &SessionSpec,
    proposal: &TransactionProposal,
    usage: &U,
    now: u64,
) -> Result<Authorization, Rejection> {
    if spec.is_expired(now) {
        return Err(Rejection::Expired {
            expires_at: spec.expires_at(),
            now,
        });
    }

    let matched = match_action(spec, &proposal.action)?;
    let matched_ref = matched.policy_ref();
    let value = proposal.action.value();

    if value > matched.max_value_per_use() {
        return Err(Rejection::PerUseLimitExceeded {
            policy: matched_ref,
            requested: value.clone(),
            max_per_use: matched.max_value_per_use().clone(),
        });
    }

    let charges = charges(matched, proposal);
    for c in &charges {
        let Some(limit) = spec.limit(c.policy) else {
            continue;
        };
        check_cap(limit, c.policy, usage.used(c.policy, now), &c.amount).map_err(|b| match c.policy {
            PolicyRef::Fee => Rejection::FeeLimitExceeded(b),
            _ => Rejection::CumulativeLimitExceeded(b),
        })?;
    }

    Ok(Authorization {
        matched: matched_ref,
        charges,
    })
}

/// Every limit a matched proposal adds to: the policy's value limit, each
/// constraint's limit (charged with the argument's value), then the fee.
pub fn charges(matched: Matched<'_>, proposal: &TransactionProposal) -> Vec<Charge> {
    let mut out = vec![Charge {
        policy: matched.policy_ref(),
        amount: proposal.action.value().clone(),
    }];

    if let (Matched::Call { index, policy }, Action::Call { args, .. }) = (matched, &proposal.action) {
        for (ci, c) in policy.constraints.iter().enumerate() {
            out.push(Charge {
                policy: PolicyRef::Constraint { call: index, index: ci },
                // A matched policy has every constrained argument present.
                amount: c.argument(args).map(Word::to_amount).unwrap_or_default(),
            });
        }
    }

    out.push(Charge {
        policy: PolicyRef::Fee,
        amount: proposal.fee.clone(),
    });
    out
}

fn check_cap(limit: &Limit, policy: PolicyRef, used: Amount, requested: &Amount) -> Result<(), LimitBreach> {
    let Some(cap) = limit.cap() else {
        return Ok(());
    };
    if &(&used + requested) <= cap {
        return Ok(());
    }
    let remaining = if cap > &used { cap - &used } else { Amount::default() };
    Err(LimitBreach {
        policy,
        kind: limit.kind(),
        requested: requested.clone(),
        used,
        cap: cap.clone(),
        remaining,
    })
}

/// Allowance window ids the on-chain validator expects for `action`: the fee
/// limit, the matched policy's value limit, then each constraint limit.
/// Non-allowance limits report window 0.
pub fn period_ids(spec: &SessionSpec, action: &Action, now: u64, anchor: u64) -> Result<Vec<u64>, Rejection> {
    let matched = match_action(spec, action)?;
    let mut ids = vec![spec.fee_limit().window(now, anchor)];
    match matched {
        Matched::Transfer { policy, .. } => ids.push(policy.value_limit.window(now, anchor)),
        Matched::Call { policy, .. } => {
            ids.push(policy.value_limit.window(now, anchor));
            ids.extend(policy.constraints.iter().map(|c| c.limit.window(now, anchor)));
        }
    }
    Ok(ids)
}

/// `abi.encode(spec, periodIds)` for a transaction carrying `action`.
pub fn validator_data(spec: &SessionSpec, action: &Action, now: u64, anchor: u64) -> sesskey_core::Result<Bytes> {
    let ids = period_ids(spec, action, now, anchor)?;
    encode_validator_data(spec, &ids)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::policy::NoUsage;
    use sesskey_core::{Address, CallPolicy, Condition, Constraint, Selector, TransferPolicy};

    const SEL: Selector = Selector([0x09, 0x5e, 0xa7, 0xb3]);

    fn approve_spec() -> SessionSpec {
        SessionSpec::builder(Address([0x11; 20]), 10_000)
            .fee_limit(Limit::allowance(1_000u32, 3_600).unwrap())
            .call_policy(
                CallPolicy::new(Address([0xca; 20]), SEL, 0u32, Limit::unlimited()).with_constraint(
                    Constraint::new(1, Condition::LessEqual, Word::from_u64(500))
                        .with_limit(Limit::lifetime(800u32)),
                ),
            )
            .transfer_policy(TransferPolicy::new(Address([0xbe; 20]), 5u32, Limit::unlimited()))
            .build()
            .unwrap()
    }

    fn approve(amount: u64) -> Action {
        Action::call(Address([0xca; 20]), SEL, 0u32, vec![Word::from_u64(7), Word::from_u64(amount)])
    }

    #[test]
    fn charges_cover_value_constraints_and_fee() {
        let spec = approve_spec();
        let auth = validate(&spec, &TransactionProposal::new(approve(300), 4u32), &NoUsage, 0).unwrap();
        assert_eq!(auth.matched, PolicyRef::Call { index: 0 });
        assert_eq!(
            auth.charges,
            vec![
                Charge { policy: PolicyRef::Call { index: 0 }, amount: Amount::default() },
                Charge { policy: PolicyRef::Constraint { call: 0, index: 0 }, amount: Amount::from(300u32) },
                Charge { policy: PolicyRef::Fee, amount: Amount::from(4u32) },
            ]
        );
    }

    #[test]
    fn constraint_limit_breach_reports_headroom() {
        let spec = approve_spec();
        let mut used = std::collections::BTreeMap::new();
        used.insert(PolicyRef::Constraint { call: 0, index: 0 }, Amount::from(600u32));

        let err = validate(&spec, &TransactionProposal::new(approve(300), 0u32), &used, 0).unwrap_err();
        let Rejection::CumulativeLimitExceeded(b) = err else {
            unreachable!("unexpected {err:?}");
        };
        assert_eq!(b.policy, PolicyRef::Constraint { call: 0, index: 0 });
        assert_eq!(b.remaining, Amount::from(200u32));
        assert_eq!(b.cap, Amount::from(800u32));
    }

    #[test]
    fn period_ids_follow_policy_layout() {
        let spec = approve_spec();
        // fee allowance (hour windows), value limit unlimited, constraint lifetime
        assert_eq!(period_ids(&spec, &approve(1), 7_300, 0).unwrap(), vec![2, 0, 0]);
        assert_eq!(period_ids(&spec, &approve(1), 7_300, 7_000).unwrap(), vec![0, 0, 0]);
        assert_eq!(
            period_ids(&spec, &Action::transfer(Address([0xbe; 20]), 1u32), 3_600, 0).unwrap(),
            vec![1, 0]
        );
    }

    #[test]
    fn validator_data_embeds_spec() {
        let spec = approve_spec();
        let data = validator_data(&spec, &approve(1), 0, 0).unwrap();
        assert_eq!(&data[..32], Word::from_u64(64).as_bytes());
    }
}
