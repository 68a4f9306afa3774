//! Principal directory and role-based access control
//!
//! The vault only asks membership questions (is this the operator, is this a
//! supervisor, how many supervisors are there). Membership itself is managed
//! outside the vault; [`AccessControl`] is the in-memory directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use types::ids::Principal;

/// Membership checks for vault roles.
pub trait PrincipalDirectory: Send + Sync {
    /// The single operator principal.
    fn operator(&self) -> &Principal;

    fn is_operator(&self, principal: &Principal) -> bool {
        self.operator() == principal
    }

    fn is_supervisor(&self, principal: &Principal) -> bool;

    /// Size of the supervisor set, the denominator of the emergency quorum.
    fn supervisor_count(&self) -> usize;
}

/// Access control roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Defines conditions, activates, collapses
    Operator,
    /// Freezes, unfreezes, votes on emergencies
    Supervisor,
}

/// Role-based access control manager.
///
/// Maps principals to their assigned role. Seeded once at construction and
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct AccessControl {
    roles: HashMap<Principal, Role>,
    operator: Principal,
}

impl AccessControl {
    /// Create access control with an initial operator.
    pub fn new(operator: impl Into<Principal>) -> Self {
        let operator = operator.into();
        let mut roles = HashMap::new();
        roles.insert(operator.clone(), Role::Operator);
        Self { roles, operator }
    }

    /// Builder-style supervisor seeding.
    pub fn with_supervisors<I, P>(mut self, supervisors: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Principal>,
    {
        for s in supervisors {
            let s = s.into();
            if s != self.operator {
                self.roles.insert(s, Role::Supervisor);
            }
        }
        self
    }

    /// Check if a principal has the specified role.
    pub fn has_role(&self, principal: &Principal, role: Role) -> bool {
        self.roles.get(principal).map_or(false, |r| *r == role)
    }
}

impl PrincipalDirectory for AccessControl {
    fn operator(&self) -> &Principal {
        &self.operator
    }

    fn is_supervisor(&self, principal: &Principal) -> bool {
        self.has_role(principal, Role::Supervisor)
    }

    fn supervisor_count(&self) -> usize {
        self.roles.values().filter(|r| **r == Role::Supervisor).count()
    }
}
