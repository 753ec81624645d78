//! First-match policy selection.
//!
//! Transfers match on target alone. Calls match on `(target, selector)` and
//! every constraint of the policy must hold; the first policy in list order
//! that fully matches wins. No wildcards: a zero target or selector only
//! matches itself.

use sesskey_core::error::Rejection;
use sesskey_core::{Action, CallPolicy, PolicyRef, SessionSpec, TransferPolicy};

#[derive(Debug, Clone, Copy)]
pub enum Matched<'a> {
    Transfer { index: usize, policy: &'a TransferPolicy },
    Call { index: usize, policy: &'a CallPolicy },
}

impl Matched<'_> {
    pub fn policy_ref(&self) -> PolicyRef {
        match self {
            Matched::Transfer { index, .. } => PolicyRef::Transfer { index: *index },
            Matched::Call { index, .. } => PolicyRef::Call { index: *index },
        }
    }

    pub fn max_value_per_use(&self) -> &sesskey_core::Amount {
        match self {
            Matched::Transfer { policy, .. } => &policy.max_value_per_use,
            Matched::Call { policy, .. } => &policy.max_value_per_use,
        }
    }
}

pub fn match_action<'a>(spec: &'a SessionSpec, action: &Action) -> Result<Matched<'a>, Rejection> {
    match action {
        Action::Transfer { target, .. } => spec
            .transfer_policies()
            .iter()
            .enumerate()
            .find(|(_, p)| p.target == *target)
            .map(|(index, policy)| Matched::Transfer { index, policy })
            .ok_or(Rejection::NoMatchingPolicy {
                target: *target,
                selector: None,
            }),
        Action::Call {
            target,
            selector,
            args,
            ..
        } => {
            // Remember the first failing constraint of the first candidate so
            // the caller learns why the closest policy did not apply.
            let mut first_violation: Option<Rejection> = None;

            for (index, policy) in spec.call_policies().iter().enumerate() {
                if policy.target != *target || policy.selector != *selector {
                    continue;
                }
                let failing = policy
                    .constraints
                    .iter()
                    .enumerate()
                    .find(|(_, c)| !c.is_satisfied(args));

                let Some((ci, c)) = failing else {
                    return Ok(Matched::Call { index, policy });
                };
                if first_violation.is_none() {
                    first_violation = Some(Rejection::ConstraintViolation {
                        policy: PolicyRef::Call { index },
                        constraint: ci,
                        condition: c.condition,
                        argument_index: c.argument_index,
                        actual: c.argument(args).copied(),
                        reference: c.reference_value,
                    });
                }
            }

            Err(first_violation.unwrap_or(Rejection::NoMatchingPolicy {
                target: *target,
                selector: Some(*selector),
            }))
        }
    }
}
