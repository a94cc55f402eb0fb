//! Master reset: every item back on the shelf, Audit Log purged.

use async_trait::async_trait;
use tracing::{instrument, warn};
use validator::Validate;

use stockroom_auth::{Permission, Principal};
use stockroom_core::TenantId;

use super::{
    Action, ActionContext, ActionReceipt, EngineError, EngineResult, MasterResetRequest, Outcome, Plan,
    TransactionCoordinator,
};
use crate::store::{ChangeSet, InventoryStore};

struct MasterReset {
    restore_damaged: bool,
}

#[async_trait]
impl Action for MasterReset {
    type Output = Outcome;

    async fn plan(&self, store: &dyn InventoryStore, ctx: &ActionContext) -> EngineResult<Plan<Outcome>> {
        // Read first: an item created after this point fails the commit.
        let catalog = store.load_catalog_version(ctx.tenant_id).await?;
        let items = store.load_all_items(ctx.tenant_id).await?;

        let mut changes = ChangeSet::new(ctx.tenant_id);
        changes.guard_catalog(catalog);
        changes.purge_audit_log = true;

        let mut restored = Vec::with_capacity(items.len());
        for current in items {
            let expected = current.expected();
            let mut item = current.value;
            restored.push(item.reset(self.restore_damaged));
            changes.write_item(item, expected);
        }

        let returned: i64 = restored.iter().map(|c| c.applied).sum();
        Ok(Plan {
            changes,
            output: Outcome {
                summary: format!(
                    "Reset {} item(s); {returned} unit(s) returned to stock; audit log cleared",
                    restored.len()
                ),
                changes: restored,
                skipped: Vec::new(),
            },
        })
    }
}

impl<S> TransactionCoordinator<S>
where
    S: InventoryStore,
{
    /// Tenant-wide reset. Destructive and irreversible.
    ///
    /// Requires the master-reset permission, `confirmed = true` and the
    /// configured confirmation phrase repeated verbatim. Sets every item's
    /// `current_stock` to `total_stock`, clears assignments, optionally clears
    /// the damage tally, and deletes the tenant's whole Audit Log. No audit row
    /// survives the reset, including one for the reset itself.
    #[instrument(
        skip(self, principal, request),
        fields(tenant_id = %tenant_id, action = "master_reset", batch_id = tracing::field::Empty)
    )]
    pub async fn master_reset(
        &self,
        tenant_id: TenantId,
        principal: &Principal,
        request: MasterResetRequest,
    ) -> EngineResult<ActionReceipt> {
        let ctx = self.privileged_context(tenant_id, principal, &Permission::MASTER_RESET)?;
        request.validate()?;
        if !request.confirmed || request.confirmation.trim() != self.confirmation_phrase {
            return Err(EngineError::InvalidPayload(
                "master reset was not confirmed with the required phrase".into(),
            ));
        }

        warn!(
            tenant_id = %tenant_id,
            actor = %principal.actor,
            restore_damaged = request.restore_damaged,
            "master reset requested"
        );
        let action = MasterReset {
            restore_damaged: request.restore_damaged,
        };
        let receipt = self.run_stock_action("master_reset", &action, &ctx).await?;
        warn!(tenant_id = %tenant_id, summary = %receipt.summary, "master reset committed");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use stockroom_audit::IncidentKind;
    use stockroom_auth::Role;
    use stockroom_core::{Actor, ExpectedVersion};
    use stockroom_inventory::{Item, LoanStatus, NewItem};

    use super::super::fixtures::*;
    use super::super::IncidentRequest;
    use super::*;
    use crate::config::DEFAULT_CONFIRMATION_PHRASE;
    use crate::store::InMemoryInventoryStore;

    fn confirmed(restore_damaged: bool) -> MasterResetRequest {
        MasterResetRequest {
            confirmed: true,
            confirmation: DEFAULT_CONFIRMATION_PHRASE.into(),
            restore_damaged,
        }
    }

    async fn with_history() -> (TransactionCoordinator<InMemoryInventoryStore>, TenantId) {
        let (coordinator, tenant) = coordinator_with(&[("A", "Arduino", 10, 10), ("B", "Breadboard", 5, 5)]).await;
        let who = principal(tenant, Role::Standard);
        coordinator
            .checkout(tenant, &who, checkout_request("Jane", &[("A", 4), ("B", 5)]))
            .await
            .unwrap();
        coordinator
            .report_incident(
                tenant,
                &who,
                IncidentRequest {
                    incident: IncidentKind::Damaged,
                    items: lines(&[("A", 2)]),
                    notes: None,
                },
            )
            .await
            .unwrap();
        (coordinator, tenant)
    }

    #[tokio::test]
    async fn reset_restores_stock_and_empties_the_log() {
        let (coordinator, tenant) = with_history().await;
        let receipt = coordinator
            .master_reset(tenant, &principal(tenant, Role::MasterAdmin), confirmed(false))
            .await
            .unwrap();

        for item in coordinator.list_items(tenant).await.unwrap() {
            assert_eq!(item.current_stock, item.total_stock);
            assert_eq!(item.loan_status, LoanStatus::In);
            assert_eq!(item.assigned_to, None);
        }
        assert_eq!(coordinator.find_item(tenant, &bc("A")).await.unwrap().damaged_stock, 2);
        assert!(coordinator.audit_log(tenant).await.unwrap().is_empty());
        assert!(receipt.records.is_empty());
        assert!(coordinator.outstanding(tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_can_restore_damaged_units() {
        let (coordinator, tenant) = with_history().await;
        coordinator
            .master_reset(tenant, &principal(tenant, Role::MasterAdmin), confirmed(true))
            .await
            .unwrap();
        let a = coordinator.find_item(tenant, &bc("A")).await.unwrap();
        assert_eq!((a.current_stock, a.total_stock, a.damaged_stock), (10, 10, 0));
    }

    #[tokio::test]
    async fn reset_requires_master_admin_and_double_confirmation() {
        let (coordinator, tenant) = with_history().await;

        let err = coordinator
            .master_reset(tenant, &principal(tenant, Role::Admin), confirmed(false))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied(_)));

        let master = principal(tenant, Role::MasterAdmin);
        let mut request = confirmed(false);
        request.confirmed = false;
        let err = coordinator.master_reset(tenant, &master, request).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));

        let mut request = confirmed(false);
        request.confirmation = "reset everything".into();
        let err = coordinator.master_reset(tenant, &master, request).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));

        assert_eq!(coordinator.audit_log(tenant).await.unwrap().len(), 2);
        assert_eq!(coordinator.find_item(tenant, &bc("A")).await.unwrap().current_stock, 4);
    }

    #[tokio::test]
    async fn item_created_mid_reset_is_reset_too() {
        let tenant = TenantId::new();
        let inner = InMemoryInventoryStore::new();
        seed_items(&inner, tenant, &[("A", "Arduino", 10, 4)]).await;

        let mut late = ChangeSet::new(tenant);
        late.write_item(
            Item::create(
                bc("B"),
                &NewItem {
                    name: "Breadboard".into(),
                    total_stock: 5,
                    current_stock: Some(1),
                    ..NewItem::default()
                },
                &Actor::new("seed", ""),
                Utc::now(),
            )
            .unwrap(),
            ExpectedVersion::Absent,
        );
        let store = Arc::new(Interleaved::new(inner, ReadPoint::AllItems, vec![late]));
        let coordinator = TransactionCoordinator::new(store.clone()).with_retry_policy(fast_retry());

        let receipt = coordinator
            .master_reset(tenant, &principal(tenant, Role::MasterAdmin), confirmed(false))
            .await
            .unwrap();

        assert_eq!(receipt.changes.len(), 2);
        for item in coordinator.list_items(tenant).await.unwrap() {
            assert_eq!(item.current_stock, item.total_stock);
        }
    }

    #[tokio::test]
    async fn reset_leaves_other_tenants_alone() {
        let (coordinator, tenant) = with_history().await;
        let other = TenantId::new();
        seed_items(coordinator.store(), other, &[("A", "Arduino", 3, 3)]).await;
        coordinator
            .checkout(other, &principal(other, Role::Standard), checkout_request("Sam", &[("A", 1)]))
            .await
            .unwrap();

        coordinator
            .master_reset(tenant, &principal(tenant, Role::MasterAdmin), confirmed(false))
            .await
            .unwrap();

        assert_eq!(coordinator.audit_log(other).await.unwrap().len(), 1);
        assert_eq!(coordinator.find_item(other, &bc("A")).await.unwrap().current_stock, 2);
    }
}
