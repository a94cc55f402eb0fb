use std::collections::BTreeSet;

use thiserror::Error;

use stockroom_core::{DomainError, TenantId};

use crate::{Permission, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: {role} lacks permission '{permission}'")]
    Forbidden { role: String, permission: String },
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        DomainError::permission_denied(value.to_string())
    }
}

/// Role defaults with per-user overrides applied in order (later entries win).
pub fn effective_permissions(principal: &Principal) -> BTreeSet<Permission> {
    let mut perms: BTreeSet<Permission> = principal.role.default_permissions().into_iter().collect();
    for entry in &principal.overrides {
        if entry.allow {
            perms.insert(entry.permission.clone());
        } else {
            perms.remove(&entry.permission);
        }
    }
    perms
}

/// Authorize a principal for `required` within `tenant_id`.
///
/// - No IO
/// - No panics
/// - Pure policy check
pub fn authorize(
    principal: &Principal,
    tenant_id: TenantId,
    required: &Permission,
) -> Result<(), AuthzError> {
    if principal.tenant_id != tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    if effective_permissions(principal).contains(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            role: principal.role.to_string(),
            permission: required.to_string(),
        })
    }
}
