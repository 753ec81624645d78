//! Policy data model.
//!
//! Limits, constraints, transfer/call policies and the aggregate session spec.
//! Every type here is constructed through checked constructors or builders, so
//! a value that exists is a value the session module would accept.

mod constraint;
mod limit;
mod policy;
mod session;

pub use constraint::{Condition, Constraint};
pub use limit::{Limit, LimitKind};
pub use policy::{CallPolicy, PolicyRef, TransferPolicy};
pub use session::{CreationRef, SessionRecord, SessionSpec, SessionSpecBuilder, SessionState};
