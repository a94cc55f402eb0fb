//! Inventory domain module.
//!
//! Business rules for items, stock movements and kits, implemented as
//! deterministic domain logic (no IO, no storage). The transaction coordinator
//! in `stockroom-infra` loads snapshots, calls into this crate and commits the
//! outcome atomically.

pub mod barcode;
pub mod item;
pub mod kit;
pub mod stock;

pub use barcode::{derive_prefix, format_barcode, highest_sequence};
pub use item::{Item, ItemPatch, LoanStatus, Location, NewItem};
pub use kit::{KitComponent, KitComponentRow, KitDefinition, ResolvedComponent, ResolvedKit, resolve_kit};
pub use stock::{DeltaOutcome, StockChange, apply_delta};
