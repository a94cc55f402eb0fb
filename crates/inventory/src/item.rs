use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_audit::{FieldChange, TransactionType};
use stockroom_core::{Actor, Barcode, DomainError, DomainResult};

/// Convenience loan flag; the Audit Log remains the historical truth.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    #[default]
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
}

impl LoanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::In => "IN",
            LoanStatus::Out => "OUT",
        }
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        match raw {
            "IN" => Ok(LoanStatus::In),
            "OUT" => Ok(LoanStatus::Out),
            other => Err(DomainError::invalid_payload(format!("unknown loan status '{other}'"))),
        }
    }
}

/// Shelf position, rendered as `zone - row`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<String>,
}

impl Location {
    /// Parse the `zone - row` free-text form. Blank input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.split_once(" - ") {
            Some((zone, row)) if !row.trim().is_empty() => Some(Self {
                zone: zone.trim().to_string(),
                row: Some(row.trim().to_string()),
            }),
            Some((zone, _)) => Some(Self {
                zone: zone.trim().to_string(),
                row: None,
            }),
            None => Some(Self {
                zone: raw.to_string(),
                row: None,
            }),
        }
    }
}

impl core::fmt::Display for Location {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.row {
            Some(row) => write!(f, "{} - {}", self.zone, row),
            None => f.write_str(&self.zone),
        }
    }
}

/// One stock-keeping unit, keyed by barcode within a tenant.
///
/// Invariant after every committed mutation: `current_stock <= total_stock`
/// and `damaged_stock <= total_stock`. The `last_transaction_*` fields are an
/// advisory pointer to the latest audit row touching this item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub barcode: Barcode,
    pub name: String,
    pub total_stock: u32,
    pub current_stock: u32,
    #[serde(default)]
    pub damaged_stock: u32,
    #[serde(default)]
    pub loan_status: LoanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub is_kit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transaction_type: Option<TransactionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transaction_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transaction_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields accepted when creating or importing an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    /// Supplied barcode; allocated as `PREFIX-NNNN` when absent.
    #[serde(default)]
    pub barcode: Option<Barcode>,
    pub name: String,
    pub total_stock: u32,
    /// Defaults to `total_stock`.
    #[serde(default)]
    pub current_stock: Option<u32>,
    #[serde(default)]
    pub is_kit: bool,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
}

/// Partial update of descriptive fields. Barcode and stock are never patchable.
///
/// For the optional text fields an empty string clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_kit: Option<bool>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.is_kit.is_none()
            && self.department.is_none()
            && self.room.is_none()
            && self.location.is_none()
    }
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Item {
    /// Build a fresh item record from creation fields and a resolved barcode.
    pub fn create(
        barcode: Barcode,
        fields: &NewItem,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = fields.name.trim();
        if name.is_empty() {
            return Err(DomainError::invalid_payload("item name cannot be empty"));
        }
        let current_stock = fields.current_stock.unwrap_or(fields.total_stock);
        if current_stock > fields.total_stock {
            return Err(DomainError::invalid_payload(format!(
                "current stock {current_stock} exceeds total stock {} for '{name}'",
                fields.total_stock
            )));
        }

        let mut item = Self {
            barcode,
            name: name.to_string(),
            total_stock: fields.total_stock,
            current_stock,
            damaged_stock: 0,
            loan_status: LoanStatus::In,
            assigned_to: None,
            is_kit: fields.is_kit,
            department: clean(&fields.department),
            room: clean(&fields.room),
            location: fields.location.clone(),
            last_transaction_type: None,
            last_transaction_by: None,
            last_transaction_date: None,
            created_at: at,
        };
        item.touch(TransactionType::ItemCreated, actor, at);
        Ok(item)
    }

    /// Units neither on the shelf nor written off as damaged.
    pub fn outstanding(&self) -> u32 {
        self.total_stock
            .saturating_sub(self.current_stock)
            .saturating_sub(self.damaged_stock)
    }

    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.current_stock > self.total_stock {
            return Err(DomainError::invariant(format!(
                "{}: current stock {} exceeds total stock {}",
                self.barcode, self.current_stock, self.total_stock
            )));
        }
        if self.damaged_stock > self.total_stock {
            return Err(DomainError::invariant(format!(
                "{}: damaged stock {} exceeds total stock {}",
                self.barcode, self.damaged_stock, self.total_stock
            )));
        }
        Ok(())
    }

    /// Advance the advisory last-transaction pointer.
    pub fn touch(&mut self, kind: TransactionType, actor: &Actor, at: DateTime<Utc>) {
        self.last_transaction_type = Some(kind);
        self.last_transaction_by = Some(actor.display_name().to_string());
        self.last_transaction_date = Some(at);
    }

    /// Apply a descriptive patch, returning the field-level changes.
    pub fn apply_patch(&mut self, patch: &ItemPatch) -> DomainResult<Vec<FieldChange>> {
        let mut changes = Vec::new();

        if let Some(name) = &patch.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(DomainError::invalid_payload("item name cannot be empty"));
            }
            if name != self.name {
                changes.push(FieldChange {
                    field: "name".into(),
                    before: Some(self.name.clone()),
                    after: Some(name.to_string()),
                });
                self.name = name.to_string();
            }
        }

        if let Some(is_kit) = patch.is_kit {
            if is_kit != self.is_kit {
                changes.push(FieldChange {
                    field: "is_kit".into(),
                    before: Some(self.is_kit.to_string()),
                    after: Some(is_kit.to_string()),
                });
                self.is_kit = is_kit;
            }
        }

        if patch.department.is_some() {
            let next = clean(&patch.department);
            if next != self.department {
                changes.push(FieldChange {
                    field: "department".into(),
                    before: self.department.take(),
                    after: next.clone(),
                });
                self.department = next;
            }
        }

        if patch.room.is_some() {
            let next = clean(&patch.room);
            if next != self.room {
                changes.push(FieldChange {
                    field: "room".into(),
                    before: self.room.take(),
                    after: next.clone(),
                });
                self.room = next;
            }
        }

        if let Some(raw) = &patch.location {
            let next = Location::parse(raw);
            if next != self.location {
                changes.push(FieldChange {
                    field: "location".into(),
                    before: self.location.as_ref().map(ToString::to_string),
                    after: next.as_ref().map(ToString::to_string),
                });
                self.location = next;
            }
        }

        Ok(changes)
    }

    /// Move the item to another department/room/shelf (intradepartment transfer).
    pub fn relocate(
        &mut self,
        department: &str,
        room: Option<&str>,
        location: Option<Location>,
        actor: &Actor,
        at: DateTime<Utc>,
    ) {
        self.department = Some(department.trim().to_string());
        if let Some(room) = room {
            self.room = Some(room.trim().to_string()).filter(|r| !r.is_empty());
        }
        if location.is_some() {
            self.location = location;
        }
        self.touch(TransactionType::Transfer, actor, at);
    }
}
