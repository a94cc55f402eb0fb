use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_audit::{Projection, ProjectionError, ProjectionRunner, TransactionDetails, TransactionLine, TransactionRecord};
use stockroom_core::{Barcode, BatchId, TenantId};
use stockroom_inventory::LoanStatus;

/// Read model row: stock of one barcode currently out on loan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutstandingItem {
    pub barcode: Barcode,
    pub name: String,
    pub status: LoanStatus,
    /// Assignee of the most recent checkout.
    pub holder: String,
    pub quantity: u32,
    /// Batch of the most recent checkout; groups kit components into one return unit.
    pub batch_id: Option<BatchId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kit_name: Option<String>,
    pub out_since: DateTime<Utc>,
}

/// "Who currently has what", folded from the Audit Log.
///
/// Checkouts add to a barcode's outstanding quantity; check-ins (individual
/// or project) subtract and drop the row once nothing is left out. Other row
/// kinds are ignored. Advisory only: live item stock stays authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutstandingProjection {
    rows: BTreeMap<Barcode, OutstandingItem>,
}

impl OutstandingProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, barcode: &Barcode) -> Option<&OutstandingItem> {
        self.rows.get(barcode)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows ordered by barcode.
    pub fn into_rows(self) -> Vec<OutstandingItem> {
        self.rows.into_values().collect()
    }

    fn lend(
        &mut self,
        record: &TransactionRecord,
        holder: &str,
        kit_name: Option<&str>,
        lines: &[TransactionLine],
    ) {
        for line in lines {
            let row = self
                .rows
                .entry(line.barcode.clone())
                .or_insert_with(|| OutstandingItem {
                    barcode: line.barcode.clone(),
                    name: line.name.clone(),
                    status: LoanStatus::Out,
                    holder: String::new(),
                    quantity: 0,
                    batch_id: None,
                    kit_name: None,
                    out_since: record.occurred_at,
                });
            row.name = line.name.clone();
            row.holder = holder.to_string();
            row.quantity = row.quantity.saturating_add(line.quantity);
            row.batch_id = Some(record.batch_id);
            row.kit_name = kit_name.map(str::to_string);
        }
    }

    fn give_back(&mut self, line: &TransactionLine) {
        let Some(row) = self.rows.get_mut(&line.barcode) else {
            return;
        };
        row.quantity = row.quantity.saturating_sub(line.quantity);
        if row.quantity == 0 {
            self.rows.remove(&line.barcode);
        }
    }
}

impl Projection for OutstandingProjection {
    fn apply(&mut self, record: &TransactionRecord) {
        match &record.details {
            TransactionDetails::CheckOut { assignee, lines, .. } => {
                self.lend(record, assignee, None, lines);
            }
            TransactionDetails::KitCheckOut {
                kit_name,
                assignee,
                lines,
                ..
            } => {
                self.lend(record, assignee, Some(kit_name), lines);
            }
            TransactionDetails::CheckIn { line, .. } | TransactionDetails::ProjectCheckIn { line, .. } => {
                self.give_back(line);
            }
            _ => {}
        }
    }
}

/// Replay a tenant's full log into the outstanding-items view.
pub fn derive_outstanding(
    tenant_id: TenantId,
    records: &[TransactionRecord],
) -> Result<Vec<OutstandingItem>, ProjectionError> {
    let projection = ProjectionRunner::rebuild_from_scratch(tenant_id, OutstandingProjection::new, records)?;
    Ok(projection.into_rows())
}
