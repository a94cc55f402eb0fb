use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{Actor, Barcode, BatchId, TenantId, TransactionId};

/// Audit row type, as shown in history views and `lastTransactionType`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "Check-Out")]
    CheckOut,
    #[serde(rename = "Kit Check-Out")]
    KitCheckOut,
    #[serde(rename = "Check-In")]
    CheckIn,
    #[serde(rename = "Project Check-In")]
    ProjectCheckIn,
    #[serde(rename = "Intradepartment Transfer")]
    Transfer,
    #[serde(rename = "Lost")]
    Lost,
    #[serde(rename = "Damaged")]
    Damaged,
    #[serde(rename = "Item Created")]
    ItemCreated,
    #[serde(rename = "Item Updated")]
    ItemUpdated,
    #[serde(rename = "Kit Saved")]
    KitSaved,
    #[serde(rename = "Kit Deleted")]
    KitDeleted,
}

impl TransactionType {
    pub const ALL: [TransactionType; 11] = [
        TransactionType::CheckOut,
        TransactionType::KitCheckOut,
        TransactionType::CheckIn,
        TransactionType::ProjectCheckIn,
        TransactionType::Transfer,
        TransactionType::Lost,
        TransactionType::Damaged,
        TransactionType::ItemCreated,
        TransactionType::ItemUpdated,
        TransactionType::KitSaved,
        TransactionType::KitDeleted,
    ];

    /// Inverse of [`TransactionType::label`].
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.label() == label)
    }

    pub fn label(self) -> &'static str {
        match self {
            TransactionType::CheckOut => "Check-Out",
            TransactionType::KitCheckOut => "Kit Check-Out",
            TransactionType::CheckIn => "Check-In",
            TransactionType::ProjectCheckIn => "Project Check-In",
            TransactionType::Transfer => "Intradepartment Transfer",
            TransactionType::Lost => "Lost",
            TransactionType::Damaged => "Damaged",
            TransactionType::ItemCreated => "Item Created",
            TransactionType::ItemUpdated => "Item Updated",
            TransactionType::KitSaved => "Kit Saved",
            TransactionType::KitDeleted => "Kit Deleted",
        }
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Loss/damage incident classification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentKind {
    /// Permanent shrinkage: leaves both `currentStock` and `totalStock`.
    Lost,
    /// Out of circulation only: `totalStock` is unchanged.
    Damaged,
}

impl IncidentKind {
    pub fn transaction_type(self) -> TransactionType {
        match self {
            IncidentKind::Lost => TransactionType::Lost,
            IncidentKind::Damaged => TransactionType::Damaged,
        }
    }
}

/// One item moved by an action.
///
/// `quantity` is what the caller asked for; `stock_delta`/`total_delta` are the
/// changes actually applied (a clamped check-in records the clamped amount), so
/// summing deltas over the log reproduces live stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLine {
    pub barcode: Barcode,
    pub name: String,
    pub quantity: u32,
    pub stock_delta: i64,
    #[serde(default)]
    pub total_delta: i64,
}

/// Free-form loan context captured at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

/// Before/after value of an edited item field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Action-specific payload of an audit row (tagged union per action kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionDetails {
    ItemCreated {
        line: TransactionLine,
    },
    ItemUpdated {
        barcode: Barcode,
        name: String,
        changes: Vec<FieldChange>,
    },
    CheckOut {
        assignee: String,
        lines: Vec<TransactionLine>,
        #[serde(default)]
        context: LoanContext,
    },
    KitCheckOut {
        kit_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kit_barcode: Option<Barcode>,
        num_kits: u32,
        assignee: String,
        lines: Vec<TransactionLine>,
        #[serde(default)]
        context: LoanContext,
    },
    CheckIn {
        line: TransactionLine,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        returned_by: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    ProjectCheckIn {
        project: String,
        line: TransactionLine,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checkout_batch: Option<BatchId>,
        note: String,
    },
    Transfer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_department: Option<String>,
        to_department: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
        lines: Vec<TransactionLine>,
    },
    Incident {
        incident: IncidentKind,
        lines: Vec<TransactionLine>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    KitSaved {
        kit_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kit_barcode: Option<Barcode>,
        kit_quantity: u32,
        components: Vec<Barcode>,
    },
    KitDeleted {
        kit_name: String,
    },
}

impl TransactionDetails {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            TransactionDetails::ItemCreated { .. } => TransactionType::ItemCreated,
            TransactionDetails::ItemUpdated { .. } => TransactionType::ItemUpdated,
            TransactionDetails::CheckOut { .. } => TransactionType::CheckOut,
            TransactionDetails::KitCheckOut { .. } => TransactionType::KitCheckOut,
            TransactionDetails::CheckIn { .. } => TransactionType::CheckIn,
            TransactionDetails::ProjectCheckIn { .. } => TransactionType::ProjectCheckIn,
            TransactionDetails::Transfer { .. } => TransactionType::Transfer,
            TransactionDetails::Incident { incident, .. } => incident.transaction_type(),
            TransactionDetails::KitSaved { .. } => TransactionType::KitSaved,
            TransactionDetails::KitDeleted { .. } => TransactionType::KitDeleted,
        }
    }

    /// Item lines moved by this row (empty for kit definition changes).
    pub fn lines(&self) -> &[TransactionLine] {
        match self {
            TransactionDetails::ItemCreated { line }
            | TransactionDetails::CheckIn { line, .. }
            | TransactionDetails::ProjectCheckIn { line, .. } => core::slice::from_ref(line),
            TransactionDetails::CheckOut { lines, .. }
            | TransactionDetails::KitCheckOut { lines, .. }
            | TransactionDetails::Transfer { lines, .. }
            | TransactionDetails::Incident { lines, .. } => lines,
            TransactionDetails::ItemUpdated { .. }
            | TransactionDetails::KitSaved { .. }
            | TransactionDetails::KitDeleted { .. } => &[],
        }
    }
}

/// An audit row ready to be committed (not yet assigned a sequence number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub transaction_id: TransactionId,
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
    pub details: TransactionDetails,
}

impl NewTransaction {
    pub fn new(
        tenant_id: TenantId,
        batch_id: BatchId,
        actor: &Actor,
        occurred_at: DateTime<Utc>,
        details: TransactionDetails,
    ) -> Self {
        Self {
            transaction_id: TransactionId::new(),
            tenant_id,
            batch_id,
            actor: actor.clone(),
            occurred_at,
            details,
        }
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.details.transaction_type()
    }

    /// Stamp with the commit position assigned by the store.
    pub fn into_record(self, sequence: u64, recorded_at: DateTime<Utc>) -> TransactionRecord {
        TransactionRecord {
            transaction_id: self.transaction_id,
            tenant_id: self.tenant_id,
            batch_id: self.batch_id,
            sequence,
            actor: self.actor,
            occurred_at: self.occurred_at,
            recorded_at,
            details: self.details,
        }
    }
}

/// A committed, immutable audit row.
///
/// `sequence` is assigned by the store at commit and is strictly increasing per
/// tenant; it defines Audit Log order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: TransactionId,
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub sequence: u64,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub details: TransactionDetails,
}

impl TransactionRecord {
    pub fn transaction_type(&self) -> TransactionType {
        self.details.transaction_type()
    }

    pub fn lines(&self) -> &[TransactionLine] {
        self.details.lines()
    }
}
