//! Checkout and bulk kit checkout.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::instrument;
use validator::Validate;

use stockroom_audit::{TransactionDetails, TransactionType};
use stockroom_auth::{Permission, Principal};
use stockroom_core::{Barcode, TenantId};
use stockroom_inventory::{Item, resolve_kit};

use super::{
    Action, ActionContext, ActionReceipt, CartLine, CheckoutRequest, EngineError, EngineResult,
    KitCheckoutRequest, Outcome, Plan, TransactionCoordinator, describe, load_snapshot, merge_lines,
};
use crate::store::{ChangeSet, InventoryStore};

struct Checkout<'a> {
    request: &'a CheckoutRequest,
    lines: Vec<CartLine>,
}

#[async_trait]
impl<'a> Action for Checkout<'a> {
    type Output = Outcome;

    async fn plan(&self, store: &dyn InventoryStore, ctx: &ActionContext) -> EngineResult<Plan<Outcome>> {
        let barcodes: Vec<Barcode> = self.lines.iter().map(|l| l.barcode.clone()).collect();
        let mut snapshot = load_snapshot(store, ctx.tenant_id, &barcodes).await?;
        let assignee = self.request.assignee.trim();

        let mut changes = ChangeSet::new(ctx.tenant_id);
        let mut moved = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let current = snapshot
                .remove(&line.barcode)
                .ok_or_else(|| EngineError::NotFound(format!("item {}", line.barcode)))?;
            let expected = current.expected();
            let mut item = current.value;
            moved.push(item.check_out(line.quantity, assignee, TransactionType::CheckOut, &ctx.actor, ctx.at)?);
            changes.write_item(item, expected);
        }

        changes.record(ctx.entry(TransactionDetails::CheckOut {
            assignee: assignee.to_string(),
            lines: moved.iter().map(|c| c.to_line()).collect(),
            context: self.request.context.clone(),
        }));

        Ok(Plan {
            changes,
            output: Outcome {
                summary: format!("Checked out {} to {assignee}", describe(&moved)),
                changes: moved,
                skipped: Vec::new(),
            },
        })
    }
}

struct KitCheckout<'a> {
    request: &'a KitCheckoutRequest,
}

#[async_trait]
impl<'a> Action for KitCheckout<'a> {
    type Output = Outcome;

    async fn plan(&self, store: &dyn InventoryStore, ctx: &ActionContext) -> EngineResult<Plan<Outcome>> {
        let kit_name = self.request.kit_name.trim();
        let kit = store
            .load_kit(ctx.tenant_id, kit_name)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("kit '{kit_name}'")))?;

        let mut snapshot = load_snapshot(store, ctx.tenant_id, &kit.value.component_barcodes()).await?;
        let live: HashMap<Barcode, Item> = snapshot
            .iter()
            .map(|(barcode, v)| (barcode.clone(), v.value.clone()))
            .collect();
        // Fails closed on any missing or short component before stock is touched.
        let resolved = resolve_kit(&kit.value, &live, self.request.num_kits)?;

        let assignee = self.request.assignee.trim();
        let mut changes = ChangeSet::new(ctx.tenant_id);
        changes.guard_kit(kit_name, kit.expected());

        let mut moved = Vec::with_capacity(resolved.components.len());
        for component in &resolved.components {
            let current = snapshot
                .remove(&component.barcode)
                .ok_or_else(|| EngineError::NotFound(format!("item {}", component.barcode)))?;
            let expected = current.expected();
            let mut item = current.value;
            moved.push(item.check_out(
                component.total_quantity,
                assignee,
                TransactionType::KitCheckOut,
                &ctx.actor,
                ctx.at,
            )?);
            changes.write_item(item, expected);
        }

        changes.record(ctx.entry(TransactionDetails::KitCheckOut {
            kit_name: resolved.kit_name.clone(),
            kit_barcode: resolved.kit_barcode.clone(),
            num_kits: resolved.num_kits,
            assignee: assignee.to_string(),
            lines: moved.iter().map(|c| c.to_line()).collect(),
            context: self.request.context.clone(),
        }));

        Ok(Plan {
            changes,
            output: Outcome {
                summary: format!(
                    "Checked out {} × kit '{}' to {assignee}: {}",
                    resolved.num_kits,
                    resolved.kit_name,
                    describe(&moved)
                ),
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
    /// Check out a cart of items to one assignee.
    ///
    /// Repeated barcodes are merged first. Any missing item or short line
    /// aborts the whole cart; one `Check-Out` row covers the batch.
    #[instrument(
        skip(self, principal, request),
        fields(tenant_id = %tenant_id, action = "checkout", batch_id = tracing::field::Empty)
    )]
    pub async fn checkout(
        &self,
        tenant_id: TenantId,
        principal: &Principal,
        request: CheckoutRequest,
    ) -> EngineResult<ActionReceipt> {
        request.validate()?;
        let ctx = self.member_context(tenant_id, principal, &Permission::CHECKOUT)?;
        let action = Checkout {
            lines: merge_lines(&request.items),
            request: &request,
        };
        self.run_stock_action("checkout", &action, &ctx).await
    }

    /// Dispense `num_kits` complete kits.
    ///
    /// The kit is resolved against live stock before anything is mutated;
    /// an incomplete kit fails with every offending component listed.
    #[instrument(
        skip(self, principal, request),
        fields(
            tenant_id = %tenant_id,
            action = "kit_checkout",
            kit = %request.kit_name,
            batch_id = tracing::field::Empty
        )
    )]
    pub async fn kit_checkout(
        &self,
        tenant_id: TenantId,
        principal: &Principal,
        request: KitCheckoutRequest,
    ) -> EngineResult<ActionReceipt> {
        request.validate()?;
        let ctx = self.member_context(tenant_id, principal, &Permission::CHECKOUT)?;
        self.run_stock_action("kit_checkout", &KitCheckout { request: &request }, &ctx)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stockroom_audit::LoanContext;
    use stockroom_auth::Role;
    use stockroom_core::{ExpectedVersion, KitShortage};
    use stockroom_inventory::LoanStatus;

    use super::super::fixtures::*;
    use super::*;
    use crate::store::{InMemoryInventoryStore, KitWrite};

    fn kit_request(kit: &str, num_kits: u32) -> KitCheckoutRequest {
        KitCheckoutRequest {
            kit_name: kit.into(),
            num_kits,
            assignee: "Jane Doe".into(),
            context: LoanContext::default(),
        }
    }

    #[tokio::test]
    async fn checkout_decrements_and_assigns() {
        let (coordinator, tenant) = coordinator_with(&[("A", "Arduino", 10, 10)]).await;
        let receipt = coordinator
            .checkout(tenant, &principal(tenant, Role::Standard), checkout_request("Jane Doe", &[("A", 3)]))
            .await
            .unwrap();

        let item = coordinator.find_item(tenant, &bc("A")).await.unwrap();
        assert_eq!(item.current_stock, 7);
        assert_eq!(item.loan_status, LoanStatus::Out);
        assert_eq!(item.assigned_to.as_deref(), Some("Jane Doe"));

        assert_eq!(receipt.records.len(), 1);
        let record = &receipt.records[0];
        assert_eq!(record.transaction_type(), TransactionType::CheckOut);
        assert_eq!(record.batch_id, receipt.batch_id);
        assert_eq!(record.lines()[0].quantity, 3);
        assert_eq!(record.lines()[0].stock_delta, -3);
        assert_eq!(receipt.summary, "Checked out 3 × Arduino (A) to Jane Doe");
    }

    #[tokio::test]
    async fn one_short_line_aborts_the_whole_cart() {
        let (coordinator, tenant) = coordinator_with(&[
            ("A", "Arduino", 10, 10),
            ("B", "Breadboard", 5, 1),
            ("C", "Cable", 8, 8),
        ])
        .await;
        let before = coordinator.list_items(tenant).await.unwrap();

        let err = coordinator
            .checkout(
                tenant,
                &principal(tenant, Role::Standard),
                checkout_request("Jane", &[("A", 2), ("B", 2), ("C", 2)]),
            )
            .await
            .unwrap_err();

        match err {
            EngineError::InsufficientStock(shortage) => {
                assert_eq!(shortage.barcode, bc("B"));
                assert_eq!(shortage.requested, 2);
                assert_eq!(shortage.available, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(coordinator.list_items(tenant).await.unwrap(), before);
        assert!(coordinator.audit_log(tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_lines_are_merged_before_the_stock_check() {
        let (coordinator, tenant) = coordinator_with(&[("A", "Arduino", 10, 4)]).await;
        let err = coordinator
            .checkout(tenant, &principal(tenant, Role::Standard), checkout_request("Jane", &[("A", 3), ("A", 2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock(s) if s.requested == 5));

        let receipt = coordinator
            .checkout(tenant, &principal(tenant, Role::Standard), checkout_request("Jane", &[("A", 1), ("A", 3)]))
            .await
            .unwrap();
        assert_eq!(receipt.records[0].lines().len(), 1);
        assert_eq!(coordinator.find_item(tenant, &bc("A")).await.unwrap().current_stock, 0);
    }

    #[tokio::test]
    async fn unknown_barcode_and_bad_payload_are_rejected() {
        let (coordinator, tenant) = coordinator_with(&[("A", "Arduino", 10, 10)]).await;
        let who = principal(tenant, Role::Standard);

        let err = coordinator
            .checkout(tenant, &who, checkout_request("Jane", &[("A", 1), ("NOPE", 1)]))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::NotFound("item NOPE".into()));

        let err = coordinator
            .checkout(tenant, &who, checkout_request("", &[("A", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));
        assert_eq!(coordinator.find_item(tenant, &bc("A")).await.unwrap().current_stock, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checkouts_never_double_spend() {
        for _ in 0..10 {
            let tenant = TenantId::new();
            let store = Arc::new(InMemoryInventoryStore::new());
            seed_items(&*store, tenant, &[("A", "Arduino", 5, 5)]).await;
            let coordinator = Arc::new(TransactionCoordinator::new(store).with_retry_policy(fast_retry()));

            let tasks: Vec<_> = [3u32, 4]
                .into_iter()
                .map(|qty| {
                    let coordinator = Arc::clone(&coordinator);
                    tokio::spawn(async move {
                        coordinator
                            .checkout(
                                tenant,
                                &principal(tenant, Role::Standard),
                                checkout_request("Jane", &[("A", qty)]),
                            )
                            .await
                    })
                })
                .collect();

            let mut ok = 0;
            let mut short = 0;
            for task in tasks {
                match task.await.unwrap() {
                    Ok(_) => ok += 1,
                    Err(EngineError::InsufficientStock(_)) => short += 1,
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }
            assert_eq!((ok, short), (1, 1));

            let item = coordinator.find_item(tenant, &bc("A")).await.unwrap();
            assert!(item.current_stock == 2 || item.current_stock == 1);
            assert_eq!(coordinator.audit_log(tenant).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn kit_checkout_dispenses_every_component() {
        let (coordinator, tenant) =
            coordinator_with(&[("TRI-0001", "Tripod", 6, 6), ("CAM-0001", "Camera", 3, 3)]).await;
        seed_kit(coordinator.store(), tenant, "Camera Rig", &[("TRI-0001", 2), ("CAM-0001", 1)]).await;

        let receipt = coordinator
            .kit_checkout(tenant, &principal(tenant, Role::Standard), kit_request("Camera Rig", 2))
            .await
            .unwrap();

        assert_eq!(coordinator.find_item(tenant, &bc("TRI-0001")).await.unwrap().current_stock, 2);
        assert_eq!(coordinator.find_item(tenant, &bc("CAM-0001")).await.unwrap().current_stock, 1);

        assert_eq!(receipt.records.len(), 1);
        match &receipt.records[0].details {
            TransactionDetails::KitCheckOut {
                kit_name,
                num_kits,
                lines,
                ..
            } => {
                assert_eq!(kit_name, "Camera Rig");
                assert_eq!(*num_kits, 2);
                assert_eq!(lines.len(), 2);
                assert_eq!(lines[0].quantity, 4);
            }
            other => panic!("unexpected details: {other:?}"),
        }
        let tripod = coordinator.find_item(tenant, &bc("TRI-0001")).await.unwrap();
        assert_eq!(tripod.last_transaction_type, Some(TransactionType::KitCheckOut));
    }

    #[tokio::test]
    async fn kit_recreated_mid_checkout_dispenses_the_new_definition() {
        let tenant = TenantId::new();
        let inner = InMemoryInventoryStore::new();
        seed_items(&inner, tenant, &[("TRI-0001", "Tripod", 6, 6), ("MIC-0001", "Microphone", 4, 4)]).await;
        seed_kit(&inner, tenant, "Rig", &[("TRI-0001", 2)]).await;

        let mut delete = ChangeSet::new(tenant);
        delete.write_kit(KitWrite::Delete {
            name: "Rig".into(),
            expected: ExpectedVersion::Exact(1),
        });
        let mut resave = ChangeSet::new(tenant);
        resave.write_kit(KitWrite::Replace {
            definition: kit("Rig", &[("MIC-0001", 1)]),
            expected: ExpectedVersion::Absent,
        });
        let store = Arc::new(Interleaved::new(inner, ReadPoint::Kit, vec![delete, resave]));
        let coordinator = TransactionCoordinator::new(store.clone()).with_retry_policy(fast_retry());

        coordinator
            .kit_checkout(tenant, &principal(tenant, Role::Standard), kit_request("Rig", 1))
            .await
            .unwrap();

        assert_eq!(coordinator.find_item(tenant, &bc("TRI-0001")).await.unwrap().current_stock, 6);
        assert_eq!(coordinator.find_item(tenant, &bc("MIC-0001")).await.unwrap().current_stock, 3);
    }

    #[tokio::test]
    async fn incomplete_kit_touches_nothing() {
        let (coordinator, tenant) =
            coordinator_with(&[("TRI-0001", "Tripod", 1, 1), ("CAM-0001", "Camera", 3, 3)]).await;
        seed_kit(coordinator.store(), tenant, "Camera Rig", &[("TRI-0001", 2), ("CAM-0001", 1)]).await;

        let err = coordinator
            .kit_checkout(tenant, &principal(tenant, Role::Standard), kit_request("Camera Rig", 1))
            .await
            .unwrap_err();

        match err {
            EngineError::KitIncomplete { kit, shortages } => {
                assert_eq!(kit, "Camera Rig");
                assert_eq!(shortages.len(), 1);
                assert!(matches!(
                    &shortages[0],
                    KitShortage::InsufficientComponent { name, required: 2, available: 1, .. } if name == "Tripod"
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(coordinator.find_item(tenant, &bc("TRI-0001")).await.unwrap().current_stock, 1);
        assert_eq!(coordinator.find_item(tenant, &bc("CAM-0001")).await.unwrap().current_stock, 3);
        assert!(coordinator.audit_log(tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_kit_is_not_found() {
        let (coordinator, tenant) = coordinator_with(&[]).await;
        let err = coordinator
            .kit_checkout(tenant, &principal(tenant, Role::Standard), kit_request("Ghost", 1))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::NotFound("kit 'Ghost'".into()));
    }
}
