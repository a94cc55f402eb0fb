//! Tenant-scoped storage boundary for items, kits and the Audit Log.
//!
//! The coordinator only talks to [`InventoryStore`]; the in-memory backend
//! serves tests/dev, the Postgres backend serves production.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use r#trait::{ChangeSet, CommitReceipt, Guard, InventoryStore, ItemWrite, KitWrite, StoreError};
