//! Loss and damage reports.

use async_trait::async_trait;
use tracing::{instrument, warn};
use validator::Validate;

use stockroom_audit::{IncidentKind, TransactionDetails};
use stockroom_auth::{Permission, Principal};
use stockroom_core::{Barcode, TenantId};

use super::{
    Action, ActionContext, ActionReceipt, CartLine, EngineError, EngineResult, IncidentRequest, Outcome,
    Plan, TransactionCoordinator, describe, load_snapshot, merge_lines,
};
use crate::store::{ChangeSet, InventoryStore};

struct ReportIncident<'a> {
    request: &'a IncidentRequest,
    lines: Vec<CartLine>,
}

#[async_trait]
impl<'a> Action for ReportIncident<'a> {
    type Output = Outcome;

    async fn plan(&self, store: &dyn InventoryStore, ctx: &ActionContext) -> EngineResult<Plan<Outcome>> {
        let barcodes: Vec<Barcode> = self.lines.iter().map(|l| l.barcode.clone()).collect();
        let mut snapshot = load_snapshot(store, ctx.tenant_id, &barcodes).await?;
        let incident = self.request.incident;

        let mut changes = ChangeSet::new(ctx.tenant_id);
        let mut moved = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let current = snapshot
                .remove(&line.barcode)
                .ok_or_else(|| EngineError::NotFound(format!("item {}", line.barcode)))?;
            let expected = current.expected();
            let mut item = current.value;
            moved.push(item.write_off(line.quantity, incident, &ctx.actor, ctx.at)?);
            changes.write_item(item, expected);
        }

        changes.record(ctx.entry(TransactionDetails::Incident {
            incident,
            lines: moved.iter().map(|c| c.to_line()).collect(),
            notes: self
                .request
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        }));

        let verb = match incident {
            IncidentKind::Lost => "lost",
            IncidentKind::Damaged => "damaged",
        };
        Ok(Plan {
            changes,
            output: Outcome {
                summary: format!("Reported {verb}: {}", describe(&moved)),
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
    /// Record lost or damaged units.
    ///
    /// Lost units leave `total_stock` too; damaged units stay counted but are
    /// taken out of circulation. One row covers the whole incident batch.
    #[instrument(
        skip(self, principal, request),
        fields(
            tenant_id = %tenant_id,
            action = "report_incident",
            incident = ?request.incident,
            batch_id = tracing::field::Empty
        )
    )]
    pub async fn report_incident(
        &self,
        tenant_id: TenantId,
        principal: &Principal,
        request: IncidentRequest,
    ) -> EngineResult<ActionReceipt> {
        request.validate()?;
        let ctx = self.member_context(tenant_id, principal, &Permission::REPORT_INCIDENT)?;
        let action = ReportIncident {
            lines: merge_lines(&request.items),
            request: &request,
        };
        let receipt = self.run_stock_action("report_incident", &action, &ctx).await?;
        if request.incident == IncidentKind::Lost {
            warn!(batch_id = %receipt.batch_id, summary = %receipt.summary, "stock written off as lost");
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use stockroom_audit::TransactionType;
    use stockroom_auth::Role;
    use stockroom_inventory::LoanStatus;

    use super::super::fixtures::*;
    use super::*;

    fn request(incident: IncidentKind, entries: &[(&str, u32)]) -> IncidentRequest {
        IncidentRequest {
            incident,
            items: lines(entries),
            notes: Some("dropped during lab".into()),
        }
    }

    #[tokio::test]
    async fn lost_units_leave_total_stock_and_clear_the_assignee() {
        let (coordinator, tenant) = coordinator_with(&[("A", "Arduino", 10, 10)]).await;
        let who = principal(tenant, Role::Standard);
        coordinator
            .checkout(tenant, &who, checkout_request("Jane Doe", &[("A", 8)]))
            .await
            .unwrap();

        let receipt = coordinator
            .report_incident(tenant, &who, request(IncidentKind::Lost, &[("A", 2)]))
            .await
            .unwrap();

        let item = coordinator.find_item(tenant, &bc("A")).await.unwrap();
        assert_eq!(item.current_stock, 0);
        assert_eq!(item.total_stock, 8);
        assert_eq!(item.loan_status, LoanStatus::In);
        assert_eq!(item.assigned_to, None);

        assert_eq!(receipt.records.len(), 1);
        assert_eq!(receipt.records[0].transaction_type(), TransactionType::Lost);
        assert_eq!(receipt.records[0].lines()[0].total_delta, -2);
    }

    #[tokio::test]
    async fn damaged_units_stay_in_total_stock() {
        let (coordinator, tenant) = coordinator_with(&[("A", "Arduino", 10, 6), ("B", "Breadboard", 4, 4)]).await;
        let receipt = coordinator
            .report_incident(
                tenant,
                &principal(tenant, Role::Standard),
                request(IncidentKind::Damaged, &[("A", 1), ("B", 2)]),
            )
            .await
            .unwrap();

        let a = coordinator.find_item(tenant, &bc("A")).await.unwrap();
        assert_eq!((a.current_stock, a.total_stock, a.damaged_stock), (5, 10, 1));
        assert_eq!(receipt.records.len(), 1);
        assert_eq!(receipt.records[0].lines().len(), 2);
        assert_eq!(receipt.records[0].transaction_type(), TransactionType::Damaged);
    }

    #[tokio::test]
    async fn incident_beyond_shelf_stock_is_rejected() {
        let (coordinator, tenant) = coordinator_with(&[("A", "Arduino", 10, 1), ("B", "Breadboard", 4, 4)]).await;
        let err = coordinator
            .report_incident(
                tenant,
                &principal(tenant, Role::Standard),
                request(IncidentKind::Lost, &[("B", 1), ("A", 2)]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock(s) if s.barcode == bc("A")));
        assert_eq!(coordinator.find_item(tenant, &bc("B")).await.unwrap().total_stock, 4);
        assert!(coordinator.audit_log(tenant).await.unwrap().is_empty());
    }
}
