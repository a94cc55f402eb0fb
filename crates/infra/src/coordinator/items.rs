//! Item creation, bulk import and descriptive updates.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tracing::{debug, instrument};

use stockroom_audit::{TransactionDetails, TransactionLine, TransactionType};
use stockroom_auth::{Permission, Principal};
use stockroom_core::{Barcode, ExpectedVersion, TenantId};
use stockroom_inventory::{Item, ItemPatch, NewItem, derive_prefix, format_barcode};

use super::{Action, ActionContext, EngineError, EngineResult, Plan, TransactionCoordinator, load_snapshot};
use crate::store::{ChangeSet, InventoryStore};

fn created_line(item: &Item) -> TransactionLine {
    TransactionLine {
        barcode: item.barcode.clone(),
        name: item.name.clone(),
        quantity: item.current_stock,
        stock_delta: i64::from(item.current_stock),
        total_delta: i64::from(item.total_stock),
    }
}

/// Allocate `PREFIX-NNNN` barcodes for the entries of `fields` that lack one.
///
/// Numbers come from the store's per-prefix counter; any that collide with a
/// barcode supplied in the same batch are skipped and replaced.
async fn allocate_barcodes(
    store: &dyn InventoryStore,
    tenant_id: TenantId,
    fields: &[NewItem],
    taken: &mut HashSet<Barcode>,
) -> EngineResult<Vec<Option<Barcode>>> {
    let mut by_prefix: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, entry) in fields.iter().enumerate() {
        if entry.barcode.is_none() {
            by_prefix.entry(derive_prefix(&entry.name)).or_default().push(idx);
        }
    }

    let mut allocated = vec![None; fields.len()];
    for (prefix, slots) in by_prefix {
        let mut pending = slots.as_slice();
        while !pending.is_empty() {
            let count = u32::try_from(pending.len())
                .map_err(|_| EngineError::InvalidPayload("too many items in one import".into()))?;
            let first = store.reserve_barcode_sequence(tenant_id, &prefix, count).await?;

            let mut used = 0;
            for sequence in first..first + u64::from(count) {
                let candidate = format_barcode(&prefix, sequence)?;
                if !taken.insert(candidate.clone()) {
                    debug!(barcode = %candidate, "allocated barcode already supplied in batch, skipping");
                    continue;
                }
                allocated[pending[used]] = Some(candidate);
                used += 1;
            }
            pending = &pending[used..];
        }
    }
    Ok(allocated)
}

struct ImportItems<'a> {
    fields: &'a [NewItem],
}

#[async_trait]
impl<'a> Action for ImportItems<'a> {
    type Output = Vec<Item>;

    async fn plan(&self, store: &dyn InventoryStore, ctx: &ActionContext) -> EngineResult<Plan<Vec<Item>>> {
        let supplied: Vec<Barcode> = self.fields.iter().filter_map(|f| f.barcode.clone()).collect();
        let mut taken: HashSet<Barcode> = HashSet::with_capacity(self.fields.len());
        for barcode in &supplied {
            if !taken.insert(barcode.clone()) {
                return Err(EngineError::InvalidPayload(format!(
                    "barcode {barcode} appears more than once in the import"
                )));
            }
        }

        let existing = load_snapshot(store, ctx.tenant_id, &supplied).await?;
        if let Some(barcode) = supplied.iter().find(|b| existing.contains_key(*b)) {
            return Err(EngineError::InvalidPayload(format!("barcode {barcode} is already in use")));
        }

        let allocated = allocate_barcodes(store, ctx.tenant_id, self.fields, &mut taken).await?;

        let mut changes = ChangeSet::new(ctx.tenant_id);
        let mut created = Vec::with_capacity(self.fields.len());
        for (fields, generated) in self.fields.iter().zip(allocated) {
            let barcode = fields
                .barcode
                .clone()
                .or(generated)
                .ok_or_else(|| EngineError::InvariantViolation("no barcode allocated".into()))?;
            let item = Item::create(barcode, fields, &ctx.actor, ctx.at)?;
            changes.record(ctx.entry(TransactionDetails::ItemCreated {
                line: created_line(&item),
            }));
            // Absent: a concurrent creation of the same barcode conflicts.
            changes.write_item(item.clone(), ExpectedVersion::Absent);
            created.push(item);
        }

        Ok(Plan {
            changes,
            output: created,
        })
    }
}

struct UpdateItem<'a> {
    barcode: &'a Barcode,
    patch: &'a ItemPatch,
}

#[async_trait]
impl<'a> Action for UpdateItem<'a> {
    type Output = Item;

    async fn plan(&self, store: &dyn InventoryStore, ctx: &ActionContext) -> EngineResult<Plan<Item>> {
        let current = store
            .load_items(ctx.tenant_id, std::slice::from_ref(self.barcode))
            .await?
            .pop()
            .ok_or_else(|| EngineError::NotFound(format!("item {}", self.barcode)))?;
        let expected = current.expected();
        let mut item = current.value;

        let changes_made = item.apply_patch(self.patch)?;
        let mut changes = ChangeSet::new(ctx.tenant_id);
        if changes_made.is_empty() {
            return Ok(Plan { changes, output: item });
        }

        item.touch(TransactionType::ItemUpdated, &ctx.actor, ctx.at);
        changes.record(ctx.entry(TransactionDetails::ItemUpdated {
            barcode: item.barcode.clone(),
            name: item.name.clone(),
            changes: changes_made,
        }));
        changes.write_item(item.clone(), expected);
        Ok(Plan { changes, output: item })
    }
}

impl<S> TransactionCoordinator<S>
where
    S: InventoryStore,
{
    /// Create one item, allocating a barcode when none is supplied.
    #[instrument(skip(self, principal, entry), fields(tenant_id = %tenant_id, action = "create_item"))]
    pub async fn create_item(&self, tenant_id: TenantId, principal: &Principal, entry: NewItem) -> EngineResult<Item> {
        let mut created = self.import_items(tenant_id, principal, vec![entry]).await?;
        created
            .pop()
            .ok_or_else(|| EngineError::InvariantViolation("import returned no item".into()))
    }

    /// Create many items in one unit and one batch.
    ///
    /// Supplied barcodes must be unique in the batch and unused in the tenant.
    /// Missing barcodes are allocated sequentially per prefix.
    #[instrument(
        skip(self, principal, entries),
        fields(
            tenant_id = %tenant_id,
            action = "import_items",
            count = entries.len(),
            batch_id = tracing::field::Empty
        )
    )]
    pub async fn import_items(
        &self,
        tenant_id: TenantId,
        principal: &Principal,
        entries: Vec<NewItem>,
    ) -> EngineResult<Vec<Item>> {
        let ctx = self.privileged_context(tenant_id, principal, &Permission::MANAGE_ITEMS)?;
        if entries.is_empty() {
            return Err(EngineError::InvalidPayload("nothing to import".into()));
        }
        let (created, _) = self
            .execute("import_items", &ImportItems { fields: &entries }, &ctx)
            .await?;
        Ok(created)
    }

    /// Edit descriptive fields. Barcode and stock levels are never patchable.
    #[instrument(
        skip(self, principal, patch),
        fields(tenant_id = %tenant_id, action = "update_item", barcode = %barcode, batch_id = tracing::field::Empty)
    )]
    pub async fn update_item(
        &self,
        tenant_id: TenantId,
        principal: &Principal,
        barcode: &Barcode,
        patch: ItemPatch,
    ) -> EngineResult<Item> {
        let ctx = self.privileged_context(tenant_id, principal, &Permission::MANAGE_ITEMS)?;
        if patch.is_empty() {
            return Err(EngineError::InvalidPayload("update has no fields".into()));
        }
        let (item, _) = self
            .execute("update_item", &UpdateItem { barcode, patch: &patch }, &ctx)
            .await?;
        Ok(item)
    }
}
