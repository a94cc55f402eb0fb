use serde::{Deserialize, Serialize};

use crate::Permission;

/// Organization role, ordered from least to most privileged.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "Standard")]
    Standard,
    #[serde(rename = "Sub-admin")]
    SubAdmin,
    #[serde(rename = "Admin")]
    Admin,
    #[serde(rename = "Master Admin")]
    MasterAdmin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Standard => "Standard",
            Role::SubAdmin => "Sub-admin",
            Role::Admin => "Admin",
            Role::MasterAdmin => "Master Admin",
        }
    }

    /// Permissions granted by the role before per-user overrides.
    pub fn default_permissions(self) -> Vec<Permission> {
        let mut perms = vec![
            Permission::CHECKOUT,
            Permission::CHECKIN,
            Permission::TRANSFER,
            Permission::REPORT_INCIDENT,
        ];
        if self >= Role::SubAdmin {
            perms.push(Permission::MANAGE_ITEMS);
        }
        if self >= Role::Admin {
            perms.push(Permission::MANAGE_KITS);
        }
        if self >= Role::MasterAdmin {
            perms.push(Permission::MASTER_RESET);
        }
        perms
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
