//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::barcode::Barcode;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Requested quantity exceeded what is on the shelf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortage {
    pub barcode: Barcode,
    pub name: String,
    pub requested: u32,
    pub available: u32,
}

impl core::fmt::Display for StockShortage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} ({}): requested {}, available {}",
            self.name, self.barcode, self.requested, self.available
        )
    }
}

/// One reason a kit cannot be dispensed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum KitShortage {
    /// The kit references a barcode that is not in the item store.
    MissingComponent { barcode: Barcode },
    /// The component exists but cannot cover `required` units.
    InsufficientComponent {
        barcode: Barcode,
        name: String,
        required: u32,
        available: u32,
    },
}

impl KitShortage {
    pub fn barcode(&self) -> &Barcode {
        match self {
            KitShortage::MissingComponent { barcode } => barcode,
            KitShortage::InsufficientComponent { barcode, .. } => barcode,
        }
    }
}

impl core::fmt::Display for KitShortage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KitShortage::MissingComponent { barcode } => write!(f, "{barcode} is not in inventory"),
            KitShortage::InsufficientComponent {
                barcode,
                name,
                required,
                available,
            } => write!(f, "{name} ({barcode}): requires {required}, available {available}"),
        }
    }
}

fn join_shortages(shortages: &[KitShortage]) -> String {
    shortages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Domain-level error.
///
/// Deterministic business failures only (validation, stock rules, missing
/// records). Store and transport failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A referenced barcode, kit or tenant-scoped record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Requested quantity exceeds `currentStock`.
    #[error("insufficient stock: {0}")]
    InsufficientStock(StockShortage),

    /// The kit cannot be dispensed; lists every offending component.
    #[error("kit '{kit}' is incomplete: {}", join_shortages(.shortages))]
    KitIncomplete {
        kit: String,
        shortages: Vec<KitShortage>,
    },

    /// Malformed request or missing required fields.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A stock or record invariant would be violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A privileged action was attempted without the required role.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl DomainError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn insufficient_stock(
        barcode: &Barcode,
        name: impl Into<String>,
        requested: u32,
        available: u32,
    ) -> Self {
        Self::InsufficientStock(StockShortage {
            barcode: barcode.clone(),
            name: name.into(),
            requested,
            available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kit_incomplete_names_every_component() {
        let err = DomainError::KitIncomplete {
            kit: "Camera Rig".into(),
            shortages: vec![
                KitShortage::InsufficientComponent {
                    barcode: Barcode::parse("TRI-0001").unwrap(),
                    name: "Tripod".into(),
                    required: 2,
                    available: 1,
                },
                KitShortage::MissingComponent {
                    barcode: Barcode::parse("LEN-0009").unwrap(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("Tripod (TRI-0001): requires 2, available 1"));
        assert!(msg.contains("LEN-0009 is not in inventory"));
    }

    #[test]
    fn insufficient_stock_message_names_item() {
        let err = DomainError::insufficient_stock(&Barcode::parse("A").unwrap(), "Arduino", 5, 2);
        assert_eq!(err.to_string(), "insufficient stock: Arduino (A): requested 5, available 2");
    }
}
