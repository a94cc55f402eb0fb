//! `stockroom-core`: shared building blocks for the inventory engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! tenant-scoped identifiers, the `Barcode` key, optimistic versioning and the
//! domain error taxonomy.

pub mod barcode;
pub mod error;
pub mod id;
pub mod version;

pub use barcode::Barcode;
pub use error::{DomainError, DomainResult, KitShortage, StockShortage};
pub use id::{Actor, BatchId, TenantId, TransactionId};
pub use version::{ExpectedVersion, Versioned};
