use serde::{Deserialize, Serialize};

use stockroom_core::{Actor, TenantId};

use crate::{Permission, Role};

/// A per-user grant or revocation layered over the role defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverride {
    pub permission: Permission,
    pub allow: bool,
}

impl PermissionOverride {
    pub fn allow(permission: Permission) -> Self {
        Self {
            permission,
            allow: true,
        }
    }

    pub fn deny(permission: Permission) -> Self {
        Self {
            permission,
            allow: false,
        }
    }
}

/// A resolved caller: identity, tenant membership and role.
///
/// Built upstream from verified claims; the engine treats it as trusted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub actor: Actor,
    pub tenant_id: TenantId,
    pub role: Role,
    #[serde(default)]
    pub overrides: Vec<PermissionOverride>,
}

impl Principal {
    pub fn new(actor: Actor, tenant_id: TenantId, role: Role) -> Self {
        Self {
            actor,
            tenant_id,
            role,
            overrides: Vec::new(),
        }
    }

    pub fn with_override(mut self, entry: PermissionOverride) -> Self {
        self.overrides.push(entry);
        self
    }
}
