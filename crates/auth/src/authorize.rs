use std::collections::BTreeSet;

use thiserror::Error;

use crate::{Actor, Permission};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: actor {actor} lacks permission '{permission}'")]
    Forbidden { actor: String, permission: String },
}

/// Permissions an actor holds through its roles plus explicit grants, sorted.
pub fn effective_permissions(actor: &Actor) -> BTreeSet<String> {
    actor
        .roles
        .iter()
        .flat_map(|role| role.permissions())
        .chain(actor.permissions.iter().cloned())
        .map(|p| p.as_str().to_string())
        .collect()
}

/// Check that `actor` holds `required` (or the wildcard).
///
/// - No IO
/// - No panics
pub fn authorize(actor: &Actor, required: &Permission) -> Result<(), AuthzError> {
    let perms = effective_permissions(actor);

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            actor: actor.actor_id.to_string(),
            permission: required.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use equiptrack_core::ActorId;

    use super::*;
    use crate::Role;

    #[test]
    fn admin_and_manager_can_manage() {
        for actor in [Actor::admin(ActorId::new()), Actor::manager(ActorId::new())] {
            assert!(authorize(&actor, &Permission::INVENTORY_MANAGE).is_ok());
            assert!(authorize(&actor, &Permission::INVENTORY_READ).is_ok());
        }
    }

    #[test]
    fn other_roles_are_read_only() {
        let actor = Actor::technician(ActorId::new());
        assert!(authorize(&actor, &Permission::INVENTORY_READ).is_ok());

        let err = authorize(&actor, &Permission::INVENTORY_MANAGE).unwrap_err();
        assert!(matches!(err, AuthzError::Forbidden { ref permission, .. } if permission == "inventory.manage"));
    }

    #[test]
    fn explicit_grants_extend_roles() {
        let actor = Actor::new(ActorId::new(), vec![Role::new("warehouse")])
            .with_permission(Permission::INVENTORY_MANAGE);
        assert!(authorize(&actor, &Permission::INVENTORY_MANAGE).is_ok());
    }

    #[test]
    fn actor_without_roles_has_nothing() {
        let actor = Actor::new(ActorId::new(), Vec::new());
        assert!(effective_permissions(&actor).is_empty());
        assert!(authorize(&actor, &Permission::INVENTORY_READ).is_err());
    }

    #[test]
    fn actor_deserializes_without_explicit_permissions() {
        let id = ActorId::new();
        let json = format!(r#"{{"actor_id":"{id}","roles":["manager"]}}"#);
        let actor: Actor = serde_json::from_str(&json).unwrap();
        assert_eq!(actor, Actor::manager(id));
    }
}
