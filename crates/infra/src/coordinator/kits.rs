//! Kit definition management (privileged).

use async_trait::async_trait;
use tracing::{info, instrument};

use stockroom_audit::TransactionDetails;
use stockroom_auth::{Permission, Principal};
use stockroom_core::{Barcode, ExpectedVersion, TenantId};
use stockroom_inventory::KitDefinition;

use super::{
    Action, ActionContext, EngineError, EngineResult, Plan, TransactionCoordinator, load_snapshot,
};
use crate::store::{ChangeSet, InventoryStore, KitWrite};

struct SaveKit<'a> {
    definition: &'a KitDefinition,
}

#[async_trait]
impl<'a> Action for SaveKit<'a> {
    type Output = KitDefinition;

    async fn plan(&self, store: &dyn InventoryStore, ctx: &ActionContext) -> EngineResult<Plan<KitDefinition>> {
        let mut definition = self.definition.clone();
        definition.name = definition.name.trim().to_string();

        let existing = store.load_kit(ctx.tenant_id, &definition.name).await?;
        let snapshot = load_snapshot(store, ctx.tenant_id, &definition.component_barcodes()).await?;

        let missing: Vec<&str> = definition
            .components
            .iter()
            .filter(|c| !snapshot.contains_key(&c.barcode))
            .map(|c| c.barcode.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::NotFound(format!(
                "kit '{}' references unknown item(s): {}",
                definition.name,
                missing.join(", ")
            )));
        }

        let mut changes = ChangeSet::new(ctx.tenant_id);
        for component in &mut definition.components {
            if let Some(item) = snapshot.get(&component.barcode) {
                component.name = item.value.name.clone();
                changes.guard_item(component.barcode.clone(), item.expected());
            }
        }

        changes.write_kit(KitWrite::Replace {
            definition: definition.clone(),
            expected: existing.as_ref().map_or(ExpectedVersion::Absent, |k| k.expected()),
        });
        changes.record(ctx.entry(TransactionDetails::KitSaved {
            kit_name: definition.name.clone(),
            kit_barcode: definition.kit_barcode.clone(),
            kit_quantity: definition.kit_quantity,
            components: definition.component_barcodes(),
        }));

        Ok(Plan {
            changes,
            output: definition,
        })
    }
}

struct DeleteKit<'a> {
    name: &'a str,
}

#[async_trait]
impl<'a> Action for DeleteKit<'a> {
    type Output = Vec<Barcode>;

    async fn plan(&self, store: &dyn InventoryStore, ctx: &ActionContext) -> EngineResult<Plan<Vec<Barcode>>> {
        let existing = store
            .load_kit(ctx.tenant_id, self.name)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("kit '{}'", self.name)))?;

        let mut changes = ChangeSet::new(ctx.tenant_id);
        changes.write_kit(KitWrite::Delete {
            name: existing.value.name.clone(),
            expected: existing.expected(),
        });
        changes.record(ctx.entry(TransactionDetails::KitDeleted {
            kit_name: existing.value.name.clone(),
        }));

        Ok(Plan {
            changes,
            output: existing.value.component_barcodes(),
        })
    }
}

impl<S> TransactionCoordinator<S>
where
    S: InventoryStore,
{
    /// Create or replace a kit definition as a whole.
    ///
    /// Every component must exist; component names are refreshed from the
    /// live items. Requires kit-management permission.
    #[instrument(
        skip(self, principal, definition),
        fields(
            tenant_id = %tenant_id,
            action = "save_kit",
            kit = %definition.name,
            batch_id = tracing::field::Empty
        )
    )]
    pub async fn save_kit(
        &self,
        tenant_id: TenantId,
        principal: &Principal,
        definition: KitDefinition,
    ) -> EngineResult<KitDefinition> {
        let ctx = self.privileged_context(tenant_id, principal, &Permission::MANAGE_KITS)?;
        definition.validate()?;
        let (saved, _) = self.execute("save_kit", &SaveKit { definition: &definition }, &ctx).await?;
        info!(kit = %saved.name, components = saved.components.len(), "kit saved");
        Ok(saved)
    }

    /// Remove a kit definition and all its component rows.
    #[instrument(
        skip(self, principal),
        fields(tenant_id = %tenant_id, action = "delete_kit", batch_id = tracing::field::Empty)
    )]
    pub async fn delete_kit(&self, tenant_id: TenantId, principal: &Principal, name: &str) -> EngineResult<()> {
        let ctx = self.privileged_context(tenant_id, principal, &Permission::MANAGE_KITS)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidPayload("kit name cannot be empty".into()));
        }
        let (components, _) = self.execute("delete_kit", &DeleteKit { name }, &ctx).await?;
        info!(kit = name, components = components.len(), "kit deleted");
        Ok(())
    }
}
