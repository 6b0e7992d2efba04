//! Authorization context
//!
//! Every mutating identity operation requires the administrative capability.
//! Duplicate-report submission is the only write open to ordinary members.

use rdtk_common::{Error, Result};

/// Identifier of the person performing an operation
pub type OperatorId = i64;

/// Capability check supplied by the hosting platform
pub trait AuthContext: Send + Sync {
    fn operator_id(&self) -> OperatorId;

    fn can_administer(&self) -> bool;
}

/// Fixed authorization context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operator {
    pub id: OperatorId,
    pub administrator: bool,
}

impl Operator {
    pub fn admin(id: OperatorId) -> Self {
        Self {
            id,
            administrator: true,
        }
    }

    pub fn member(id: OperatorId) -> Self {
        Self {
            id,
            administrator: false,
        }
    }
}

impl AuthContext for Operator {
    fn operator_id(&self) -> OperatorId {
        self.id
    }

    fn can_administer(&self) -> bool {
        self.administrator
    }
}

/// Fail with `PermissionDenied` unless the caller may administer
pub fn require_admin(auth: &dyn AuthContext, action: &str) -> Result<()> {
    if auth.can_administer() {
        return Ok(());
    }

    tracing::warn!(
        operator = auth.operator_id(),
        action,
        "Rejected mutating call from non-administrator"
    );
    Err(Error::PermissionDenied(format!(
        "operator {} may not {}",
        auth.operator_id(),
        action
    )))
}
