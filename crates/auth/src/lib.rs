//! `stockroom-auth`: role and permission model for defense-in-depth checks.
//!
//! Authentication and primary authorization happen upstream. The engine
//! re-validates every action against the principal it is handed; privileged
//! ones (item and kit management, master reset) need elevated roles.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, authorize, effective_permissions};
pub use permissions::Permission;
pub use principal::{PermissionOverride, Principal};
pub use roles::Role;
