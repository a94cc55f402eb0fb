//! Intradepartment transfer.

use async_trait::async_trait;
use tracing::instrument;
use validator::Validate;

use stockroom_audit::TransactionDetails;
use stockroom_auth::{Permission, Principal};
use stockroom_core::{Barcode, TenantId};
use stockroom_inventory::{Location, StockChange};

use super::{
    Action, ActionContext, ActionReceipt, EngineError, EngineResult, Outcome, Plan, TransactionCoordinator,
    TransferRequest, load_snapshot,
};
use crate::store::{ChangeSet, InventoryStore};

struct Transfer<'a> {
    request: &'a TransferRequest,
    barcodes: Vec<Barcode>,
}

#[async_trait]
impl<'a> Action for Transfer<'a> {
    type Output = Outcome;

    async fn plan(&self, store: &dyn InventoryStore, ctx: &ActionContext) -> EngineResult<Plan<Outcome>> {
        let mut snapshot = load_snapshot(store, ctx.tenant_id, &self.barcodes).await?;

        let missing: Vec<&str> = self
            .barcodes
            .iter()
            .filter(|b| !snapshot.contains_key(*b))
            .map(Barcode::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::NotFound(format!(
                "One or more items could not be found: {}",
                missing.join(", ")
            )));
        }

        let to_department = self.request.to_department.trim();
        let room = self.request.room.as_deref().map(str::trim);
        let location = self.request.location.as_deref().and_then(Location::parse);

        let mut changes = ChangeSet::new(ctx.tenant_id);
        let mut from_departments: Vec<String> = Vec::new();
        let mut moved = Vec::with_capacity(self.barcodes.len());
        for barcode in &self.barcodes {
            let Some(current) = snapshot.remove(barcode) else {
                continue;
            };
            let expected = current.expected();
            let mut item = current.value;
            if let Some(from) = &item.department {
                if !from_departments.contains(from) {
                    from_departments.push(from.clone());
                }
            }
            item.relocate(to_department, room, location.clone(), &ctx.actor, ctx.at);

            let mut change = StockChange::unchanged(&item);
            change.requested = item.total_stock;
            moved.push(change);
            changes.write_item(item, expected);
        }

        let from_department = (!from_departments.is_empty()).then(|| from_departments.join(", "));
        changes.record(ctx.entry(TransactionDetails::Transfer {
            from_department: from_department.clone(),
            to_department: to_department.to_string(),
            room: room.filter(|r| !r.is_empty()).map(str::to_string),
            location: location.as_ref().map(ToString::to_string),
            lines: moved.iter().map(StockChange::to_line).collect(),
        }));

        let names: Vec<&str> = moved.iter().map(|c| c.name.as_str()).collect();
        let summary = match from_department {
            Some(from) => format!("Transferred {} from {from} to {to_department}", names.join(", ")),
            None => format!("Transferred {} to {to_department}", names.join(", ")),
        };

        Ok(Plan {
            changes,
            output: Outcome {
                summary,
                changes: moved,
                skipped: Vec::new(),
            },
        })
    }
}

impl<S> TransactionCoordinator<S>
where
    S: InventoryStore,
{
    /// Move items to another department, room or shelf.
    ///
    /// Every named item must exist or nothing moves. One summary row covers the
    /// whole batch. Stock levels are untouched.
    #[instrument(
        skip(self, principal, request),
        fields(tenant_id = %tenant_id, action = "transfer", batch_id = tracing::field::Empty)
    )]
    pub async fn transfer(
        &self,
        tenant_id: TenantId,
        principal: &Principal,
        request: TransferRequest,
    ) -> EngineResult<ActionReceipt> {
        request.validate()?;
        let ctx = self.member_context(tenant_id, principal, &Permission::TRANSFER)?;

        let mut barcodes: Vec<Barcode> = Vec::with_capacity(request.barcodes.len());
        for barcode in &request.barcodes {
            if !barcodes.contains(barcode) {
                barcodes.push(barcode.clone());
            }
        }
        let action = Transfer {
            request: &request,
            barcodes,
        };
        self.run_stock_action("transfer", &action, &ctx).await
    }
}

#[cfg(test)]
mod tests {
    use stockroom_audit::TransactionType;
    use stockroom_auth::Role;

    use super::super::fixtures::*;
    use super::*;

    fn request(barcodes: &[&str], to: &str) -> TransferRequest {
        TransferRequest {
            barcodes: barcodes.iter().map(|b| bc(b)).collect(),
            to_department: to.into(),
            room: Some("Room 204".into()),
            location: Some("Cabinet B - Shelf 3".into()),
        }
    }

    #[tokio::test]
    async fn moves_every_item_with_one_summary_row() {
        let (coordinator, tenant) = coordinator_with(&[("A", "Arduino", 10, 10), ("B", "Breadboard", 5, 2)]).await;
        let receipt = coordinator
            .transfer(tenant, &principal(tenant, Role::Standard), request(&["A", "B", "A"], "Physics"))
            .await
            .unwrap();

        assert_eq!(receipt.records.len(), 1);
        match &receipt.records[0].details {
            TransactionDetails::Transfer {
                to_department,
                location,
                lines,
                ..
            } => {
                assert_eq!(to_department, "Physics");
                assert_eq!(location.as_deref(), Some("Cabinet B - Shelf 3"));
                assert_eq!(lines.len(), 2);
                assert!(lines.iter().all(|l| l.stock_delta == 0));
            }
            other => panic!("unexpected details: {other:?}"),
        }

        let b = coordinator.find_item(tenant, &bc("B")).await.unwrap();
        assert_eq!(b.department.as_deref(), Some("Physics"));
        assert_eq!(b.room.as_deref(), Some("Room 204"));
        assert_eq!(b.location.as_ref().and_then(|l| l.row.as_deref()), Some("Shelf 3"));
        assert_eq!(b.current_stock, 2);
        assert_eq!(b.last_transaction_type, Some(TransactionType::Transfer));
    }

    #[tokio::test]
    async fn records_the_departments_items_left() {
        let (coordinator, tenant) = coordinator_with(&[("A", "Arduino", 1, 1)]).await;
        let who = principal(tenant, Role::Standard);
        coordinator.transfer(tenant, &who, request(&["A"], "Chemistry")).await.unwrap();
        let receipt = coordinator.transfer(tenant, &who, request(&["A"], "Physics")).await.unwrap();

        match &receipt.records[0].details {
            TransactionDetails::Transfer { from_department, .. } => {
                assert_eq!(from_department.as_deref(), Some("Chemistry"));
            }
            other => panic!("unexpected details: {other:?}"),
        }
        assert_eq!(receipt.summary, "Transferred Arduino from Chemistry to Physics");
    }

    #[tokio::test]
    async fn any_missing_item_aborts_the_transfer() {
        let (coordinator, tenant) = coordinator_with(&[("A", "Arduino", 10, 10)]).await;
        let err = coordinator
            .transfer(tenant, &principal(tenant, Role::Standard), request(&["A", "X", "Y"], "Physics"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            EngineError::NotFound("One or more items could not be found: X, Y".into())
        );
        assert_eq!(coordinator.find_item(tenant, &bc("A")).await.unwrap().department, None);
        assert!(coordinator.audit_log(tenant).await.unwrap().is_empty());
    }
}
