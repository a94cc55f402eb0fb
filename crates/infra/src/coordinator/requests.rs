//! Action payloads accepted by the coordinator.
//!
//! Each action kind has its own struct with explicit required fields. Payloads
//! are validated before any store access; failures surface as `InvalidPayload`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use stockroom_audit::{IncidentKind, LoanContext};
use stockroom_core::{Barcode, BatchId};

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// One `{barcode, quantity}` entry of a cart, return or incident batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CartLine {
    pub barcode: Barcode,
    #[validate(range(min = 1))]
    pub quantity: u32,
}

impl CartLine {
    pub fn new(barcode: Barcode, quantity: u32) -> Self {
        Self { barcode, quantity }
    }
}

/// Merge repeated barcodes, summing quantities, keeping first-seen order.
pub fn merge_lines(lines: &[CartLine]) -> Vec<CartLine> {
    let mut order = Vec::new();
    let mut totals: BTreeMap<&Barcode, u32> = BTreeMap::new();
    for line in lines {
        let total = totals.entry(&line.barcode).or_insert_with(|| {
            order.push(line.barcode.clone());
            0
        });
        *total = total.saturating_add(line.quantity);
    }
    order
        .into_iter()
        .map(|barcode| {
            let quantity = totals.get(&barcode).copied().unwrap_or_default();
            CartLine { barcode, quantity }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(custom(function = "not_blank"))]
    pub assignee: String,
    #[validate(length(min = 1), nested)]
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub context: LoanContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct KitCheckoutRequest {
    #[validate(custom(function = "not_blank"))]
    pub kit_name: String,
    #[validate(range(min = 1))]
    pub num_kits: u32,
    #[validate(custom(function = "not_blank"))]
    pub assignee: String,
    #[serde(default)]
    pub context: LoanContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CheckinRequest {
    #[validate(length(min = 1), nested)]
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub returned_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Return of a whole kit, expanded through its definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct KitReturn {
    #[validate(custom(function = "not_blank"))]
    pub kit_name: String,
    #[validate(range(min = 1))]
    pub num_kits: u32,
}

/// Project check-in: explicit lines, or a kit return, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ProjectCheckinRequest {
    #[validate(custom(function = "not_blank"))]
    pub project: String,
    #[serde(default)]
    #[validate(nested)]
    pub items: Vec<CartLine>,
    #[serde(default)]
    #[validate(nested)]
    pub kit: Option<KitReturn>,
    /// Batch of the originating kit checkout, when known.
    #[serde(default)]
    pub checkout_batch: Option<BatchId>,
}

impl ProjectCheckinRequest {
    pub(crate) fn check_source(&self) -> Result<(), String> {
        match (self.items.is_empty(), &self.kit) {
            (true, None) => Err("project check-in needs either items or a kit".into()),
            (false, Some(_)) => Err("project check-in takes items or a kit, not both".into()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TransferRequest {
    #[validate(length(min = 1))]
    pub barcodes: Vec<Barcode>,
    #[validate(custom(function = "not_blank"))]
    pub to_department: String,
    #[serde(default)]
    pub room: Option<String>,
    /// Free-text shelf position, `zone - row`.
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct IncidentRequest {
    pub incident: IncidentKind,
    #[validate(length(min = 1), nested)]
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Master reset. Both `confirmed` and the repeated phrase are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct MasterResetRequest {
    pub confirmed: bool,
    #[validate(custom(function = "not_blank"))]
    pub confirmation: String,
    #[serde(default)]
    pub restore_damaged: bool,
}
