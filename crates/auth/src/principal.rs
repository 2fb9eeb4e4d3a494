use serde::{Deserialize, Serialize};

use equiptrack_core::ActorId;

use crate::{Permission, Role};

/// A resolved caller: who is acting and what they were granted.
///
/// Explicit `permissions` are added on top of whatever the roles grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_id: ActorId,
    pub roles: Vec<Role>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Actor {
    pub fn new(actor_id: ActorId, roles: Vec<Role>) -> Self {
        Self {
            actor_id,
            roles,
            permissions: Vec::new(),
        }
    }

    pub fn admin(actor_id: ActorId) -> Self {
        Self::new(actor_id, vec![Role::ADMIN])
    }

    pub fn manager(actor_id: ActorId) -> Self {
        Self::new(actor_id, vec![Role::MANAGER])
    }

    /// Any role without manage rights; used for read-only callers.
    pub fn technician(actor_id: ActorId) -> Self {
        Self::new(actor_id, vec![Role::TECHNICIAN])
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }
}
