//! Check-in: individual returns and project (kit) returns.

use async_trait::async_trait;
use tracing::{instrument, warn};
use validator::Validate;

use stockroom_audit::{TransactionDetails, TransactionType};
use stockroom_auth::{Permission, Principal};
use stockroom_core::{Barcode, ExpectedVersion, TenantId};

use super::{
    Action, ActionContext, ActionReceipt, CartLine, CheckinRequest, EngineError, EngineResult, Outcome,
    Plan, ProjectCheckinRequest, TransactionCoordinator, describe, load_snapshot, merge_lines,
};
use crate::store::{ChangeSet, InventoryStore};

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

struct Checkin<'a> {
    request: &'a CheckinRequest,
    lines: Vec<CartLine>,
}

#[async_trait]
impl<'a> Action for Checkin<'a> {
    type Output = Outcome;

    async fn plan(&self, store: &dyn InventoryStore, ctx: &ActionContext) -> EngineResult<Plan<Outcome>> {
        let barcodes: Vec<Barcode> = self.lines.iter().map(|l| l.barcode.clone()).collect();
        let mut snapshot = load_snapshot(store, ctx.tenant_id, &barcodes).await?;
        let returned_by = clean(&self.request.returned_by);
        let notes = clean(&self.request.notes);

        let mut changes = ChangeSet::new(ctx.tenant_id);
        let mut moved = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            let current = snapshot
                .remove(&line.barcode)
                .ok_or_else(|| EngineError::NotFound(format!("item {}", line.barcode)))?;
            let expected = current.expected();
            let mut item = current.value;
            let change = item.check_in(line.quantity, TransactionType::CheckIn, &ctx.actor, ctx.at)?;
            changes.write_item(item, expected);
            changes.record(ctx.entry(TransactionDetails::CheckIn {
                line: change.to_line(),
                returned_by: returned_by.clone(),
                notes: notes.clone(),
            }));
            moved.push(change);
        }

        Ok(Plan {
            changes,
            output: Outcome {
                summary: format!("Checked in {}", describe(&moved)),
                changes: moved,
                skipped: Vec::new(),
            },
        })
    }
}

struct ProjectCheckin<'a> {
    request: &'a ProjectCheckinRequest,
}

impl ProjectCheckin<'_> {
    /// Lines to return and the kit they came from, if any.
    async fn lines(
        &self,
        store: &dyn InventoryStore,
        ctx: &ActionContext,
        changes: &mut ChangeSet,
    ) -> EngineResult<(Vec<CartLine>, Option<String>)> {
        let Some(kit) = &self.request.kit else {
            return Ok((merge_lines(&self.request.items), None));
        };

        let kit_name = kit.kit_name.trim();
        let definition = store
            .load_kit(ctx.tenant_id, kit_name)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("kit '{kit_name}'")))?;
        changes.guard_kit(kit_name, definition.expected());

        let lines = definition
            .value
            .expand(kit.num_kits)
            .into_iter()
            .map(|(barcode, quantity)| CartLine { barcode, quantity })
            .collect();
        Ok((lines, Some(definition.value.name)))
    }
}

#[async_trait]
impl<'a> Action for ProjectCheckin<'a> {
    type Output = Outcome;

    async fn plan(&self, store: &dyn InventoryStore, ctx: &ActionContext) -> EngineResult<Plan<Outcome>> {
        let project = self.request.project.trim();
        let mut changes = ChangeSet::new(ctx.tenant_id);
        let (lines, kit_name) = self.lines(store, ctx, &mut changes).await?;

        let barcodes: Vec<Barcode> = lines.iter().map(|l| l.barcode.clone()).collect();
        let mut snapshot = load_snapshot(store, ctx.tenant_id, &barcodes).await?;
        let note = match &kit_name {
            Some(kit) => format!("Returned from project {project} (kit '{kit}')"),
            None => format!("Returned from project {project}"),
        };

        let mut moved = Vec::with_capacity(lines.len());
        let mut skipped = Vec::new();
        for line in &lines {
            let Some(current) = snapshot.remove(&line.barcode) else {
                warn!(
                    tenant_id = %ctx.tenant_id,
                    batch_id = %ctx.batch_id,
                    barcode = %line.barcode,
                    project,
                    "component not in inventory, skipping"
                );
                // Still absent at commit, or the unit is re-planned.
                changes.guard_item(line.barcode.clone(), ExpectedVersion::Absent);
                skipped.push(line.barcode.clone());
                continue;
            };
            let expected = current.expected();
            let mut item = current.value;
            let change = item.check_in(line.quantity, TransactionType::ProjectCheckIn, &ctx.actor, ctx.at)?;
            changes.write_item(item, expected);
            changes.record(ctx.entry(TransactionDetails::ProjectCheckIn {
                project: project.to_string(),
                line: change.to_line(),
                checkout_batch: self.request.checkout_batch,
                note: note.clone(),
            }));
            moved.push(change);
        }

        let mut summary = if moved.is_empty() {
            format!("Nothing returned for project {project}")
        } else {
            format!("Returned {} from project {project}", describe(&moved))
        };
        if !skipped.is_empty() {
            let list: Vec<&str> = skipped.iter().map(Barcode::as_str).collect();
            summary.push_str(&format!("; skipped unknown {}", list.join(", ")));
        }

        Ok(Plan {
            changes,
            output: Outcome {
                summary,
                changes: moved,
                skipped,
            },
        })
    }
}

impl<S> TransactionCoordinator<S>
where
    S: InventoryStore,
{
    /// Return individual items. Over-returns clamp at `total_stock`.
    ///
    /// One `Check-In` row per item, all under one batch.
    #[instrument(
        skip(self, principal, request),
        fields(tenant_id = %tenant_id, action = "checkin", batch_id = tracing::field::Empty)
    )]
    pub async fn checkin(
        &self,
        tenant_id: TenantId,
        principal: &Principal,
        request: CheckinRequest,
    ) -> EngineResult<ActionReceipt> {
        request.validate()?;
        let ctx = self.member_context(tenant_id, principal, &Permission::CHECKIN)?;
        let action = Checkin {
            lines: merge_lines(&request.items),
            request: &request,
        };
        self.run_stock_action("checkin", &action, &ctx).await
    }

    /// Return a project's items, or whole kits expanded through their definition.
    ///
    /// Components missing from inventory are skipped with a warning and listed
    /// in the receipt; the rest of the return proceeds.
    #[instrument(
        skip(self, principal, request),
        fields(
            tenant_id = %tenant_id,
            action = "project_checkin",
            project = %request.project,
            batch_id = tracing::field::Empty
        )
    )]
    pub async fn project_checkin(
        &self,
        tenant_id: TenantId,
        principal: &Principal,
        request: ProjectCheckinRequest,
    ) -> EngineResult<ActionReceipt> {
        request.validate()?;
        request.check_source().map_err(EngineError::InvalidPayload)?;
        let ctx = self.member_context(tenant_id, principal, &Permission::CHECKIN)?;
        self.run_stock_action("project_checkin", &ProjectCheckin { request: &request }, &ctx)
            .await
    }
}
