use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "inventory.checkout") so upstream
/// policy layers can grant ones this crate does not know about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const CHECKOUT: Permission = Permission(Cow::Borrowed("inventory.checkout"));
    pub const CHECKIN: Permission = Permission(Cow::Borrowed("inventory.checkin"));
    pub const TRANSFER: Permission = Permission(Cow::Borrowed("inventory.transfer"));
    pub const REPORT_INCIDENT: Permission = Permission(Cow::Borrowed("inventory.incident"));
    pub const MANAGE_ITEMS: Permission = Permission(Cow::Borrowed("inventory.items.manage"));
    pub const MANAGE_KITS: Permission = Permission(Cow::Borrowed("inventory.kits.manage"));
    pub const MASTER_RESET: Permission = Permission(Cow::Borrowed("inventory.master_reset"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
