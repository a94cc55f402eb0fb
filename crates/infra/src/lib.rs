//! Infrastructure layer: storage backends, the transaction coordinator,
//! read-model projections, retry policy and configuration.

pub mod config;
pub mod coordinator;
pub mod projections;
pub mod retry;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, EngineConfig};
pub use coordinator::{ActionReceipt, EngineError, EngineResult, TransactionCoordinator};
pub use projections::{OutstandingItem, derive_outstanding};
pub use retry::RetryPolicy;
pub use store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, StoreError};
