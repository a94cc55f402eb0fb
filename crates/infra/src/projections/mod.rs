//! Projection implementations (read model builders).
//!
//! Projections fold the Audit Log into query-friendly read models. They are:
//! - **Rebuildable**: replayed from the tenant's log on demand
//! - **Tenant-isolated**: the runner rejects rows from other tenants
//! - **Advisory**: never consulted when authorizing a mutation

pub mod outstanding;

pub use outstanding::{OutstandingItem, OutstandingProjection, derive_outstanding};
