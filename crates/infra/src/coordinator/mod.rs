//! Transaction Coordinator.
//!
//! Wraps one logical user action into one atomic unit spanning the Item Store,
//! kit definitions and the Audit Log.
//!
//! ## Execution flow
//!
//! ```text
//! request
//!   ↓
//! 1. validate payload and caller (no store access yet)
//!   ↓
//! 2. plan: read snapshots, run domain rules, build a ChangeSet
//!   ↓
//! 3. commit the ChangeSet (the store re-validates every version it carries)
//!   ↓
//! 4. on Conflict: back off, re-read, re-plan; otherwise return
//! ```
//!
//! Planning is pure with respect to the store: nothing is written until the
//! commit, so any failure before it leaves no trace. No in-process lock is held
//! across store I/O; concurrent actors are serialised by the store's commit-time
//! version checks.

mod error;
mod incidents;
mod items;
mod kits;
mod loans;
mod requests;
mod reset;
mod returns;
mod transfer;

#[cfg(test)]
mod fixtures;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use stockroom_audit::{NewTransaction, TransactionDetails, TransactionRecord};
use stockroom_auth::{Permission, Principal, authorize};
use stockroom_core::{Actor, Barcode, BatchId, TenantId, Versioned};
use stockroom_inventory::{Item, KitDefinition, StockChange};

use crate::config::{DEFAULT_CONFIRMATION_PHRASE, EngineConfig};
use crate::projections::{OutstandingItem, derive_outstanding};
use crate::retry::RetryPolicy;
use crate::store::{ChangeSet, CommitReceipt, InventoryStore, StoreError};

pub use error::{EngineError, EngineResult};
pub use requests::{
    CartLine, CheckinRequest, CheckoutRequest, IncidentRequest, KitCheckoutRequest, KitReturn,
    MasterResetRequest, ProjectCheckinRequest, TransferRequest, merge_lines,
};

/// Who acts, for which tenant, under which batch.
///
/// Fixed for the lifetime of one call: every retry of the unit reuses the same
/// batch id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionContext {
    pub tenant_id: TenantId,
    pub actor: Actor,
    pub batch_id: BatchId,
    pub at: DateTime<Utc>,
}

impl ActionContext {
    pub fn new(tenant_id: TenantId, actor: Actor) -> Self {
        Self {
            tenant_id,
            actor,
            batch_id: BatchId::new(),
            at: Utc::now(),
        }
    }

    /// An audit row for this action.
    pub fn entry(&self, details: TransactionDetails) -> NewTransaction {
        NewTransaction::new(self.tenant_id, self.batch_id, &self.actor, self.at, details)
    }
}

/// What an action decided: the unit to commit plus its result.
#[derive(Debug)]
pub(crate) struct Plan<T> {
    pub changes: ChangeSet,
    pub output: T,
}

/// One kind of atomic unit. `plan` may run several times if commits conflict.
#[async_trait]
pub(crate) trait Action: Send + Sync {
    type Output: Send;

    async fn plan(
        &self,
        store: &dyn InventoryStore,
        ctx: &ActionContext,
    ) -> EngineResult<Plan<Self::Output>>;
}

/// Result of a stock-moving action, before the store stamps it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Outcome {
    pub summary: String,
    pub changes: Vec<StockChange>,
    pub skipped: Vec<Barcode>,
}

/// Confirmation returned to the caller after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReceipt {
    pub batch_id: BatchId,
    /// Human-readable confirmation naming what changed.
    pub summary: String,
    pub changes: Vec<StockChange>,
    /// Components skipped by a project check-in because they are not in inventory.
    pub skipped: Vec<Barcode>,
    /// Audit rows as committed.
    pub records: Vec<TransactionRecord>,
}

impl ActionReceipt {
    fn new(ctx: &ActionContext, outcome: Outcome, receipt: CommitReceipt) -> Self {
        Self {
            batch_id: ctx.batch_id,
            summary: outcome.summary,
            changes: outcome.changes,
            skipped: outcome.skipped,
            records: receipt.records,
        }
    }
}

/// Read the named items, keyed by barcode. Missing barcodes are absent.
pub(crate) async fn load_snapshot(
    store: &dyn InventoryStore,
    tenant_id: TenantId,
    barcodes: &[Barcode],
) -> EngineResult<HashMap<Barcode, Versioned<Item>>> {
    let items = store.load_items(tenant_id, barcodes).await?;
    Ok(items
        .into_iter()
        .map(|v| (v.value.barcode.clone(), v))
        .collect())
}

/// Render `3 × Arduino (A)` style fragments for summaries.
pub(crate) fn describe(changes: &[StockChange]) -> String {
    changes
        .iter()
        .map(|c| format!("{} × {} ({})", c.requested, c.name, c.barcode))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Entry point for every inventory action.
///
/// Generic over the store so tests run against [`crate::store::InMemoryInventoryStore`]
/// and production against [`crate::store::PostgresInventoryStore`].
#[derive(Debug)]
pub struct TransactionCoordinator<S> {
    store: S,
    retry: RetryPolicy,
    confirmation_phrase: String,
}

impl<S> TransactionCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            confirmation_phrase: DEFAULT_CONFIRMATION_PHRASE.to_string(),
        }
    }

    pub fn from_config(store: S, config: &EngineConfig) -> Self {
        Self {
            store,
            retry: config.retry.policy(),
            confirmation_phrase: config.reset.confirmation_phrase.clone(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl<S> TransactionCoordinator<S>
where
    S: InventoryStore,
{
    /// Plan and commit `action`, re-planning on write conflicts.
    pub(crate) async fn execute<A>(
        &self,
        name: &'static str,
        action: &A,
        ctx: &ActionContext,
    ) -> EngineResult<(A::Output, CommitReceipt)>
    where
        A: Action,
    {
        let mut retries = 0u32;
        loop {
            let attempt = match action.plan(&self.store, ctx).await {
                Ok(Plan { changes, output }) if changes.is_empty() => {
                    return Ok((output, CommitReceipt::default()));
                }
                Ok(Plan { changes, output }) => self.store.commit(changes).await.map(|r| (output, r)),
                Err(EngineError::Store(err)) => Err(err),
                Err(err) => return Err(err),
            };

            match attempt {
                Ok((output, receipt)) => {
                    info!(
                        action = name,
                        tenant_id = %ctx.tenant_id,
                        batch_id = %ctx.batch_id,
                        records = receipt.records.len(),
                        retries,
                        "committed"
                    );
                    return Ok((output, receipt));
                }
                Err(StoreError::Conflict(reason)) => {
                    if !self.retry.should_retry(retries) {
                        warn!(action = name, batch_id = %ctx.batch_id, %reason, "retry budget exhausted");
                        return Err(EngineError::ConflictRetryExhausted {
                            attempts: retries + 1,
                        });
                    }
                    retries += 1;
                    let delay = self.retry.delay_for_attempt(retries);
                    warn!(
                        action = name,
                        batch_id = %ctx.batch_id,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "write conflict, re-planning"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(
                        action = name,
                        tenant_id = %ctx.tenant_id,
                        batch_id = %ctx.batch_id,
                        error = %err,
                        "store failure"
                    );
                    return Err(err.into());
                }
            }
        }
    }

    /// Context for an ordinary action. Every role holds these permissions
    /// unless a per-user override revokes them.
    fn member_context(
        &self,
        tenant_id: TenantId,
        principal: &Principal,
        permission: &Permission,
    ) -> EngineResult<ActionContext> {
        if principal.tenant_id != tenant_id {
            return Err(EngineError::PermissionDenied(format!(
                "{} does not belong to tenant {tenant_id}",
                principal.actor
            )));
        }
        authorize(principal, tenant_id, permission)?;
        Ok(self.start(tenant_id, principal))
    }

    /// Context for a privileged action, re-validating the permission.
    fn privileged_context(
        &self,
        tenant_id: TenantId,
        principal: &Principal,
        permission: &Permission,
    ) -> EngineResult<ActionContext> {
        if let Err(err) = authorize(principal, tenant_id, permission) {
            warn!(tenant_id = %tenant_id, actor = %principal.actor, %permission, "privileged action refused");
            return Err(err.into());
        }
        Ok(self.start(tenant_id, principal))
    }

    fn start(&self, tenant_id: TenantId, principal: &Principal) -> ActionContext {
        let ctx = ActionContext::new(tenant_id, principal.actor.clone());
        tracing::Span::current().record("batch_id", tracing::field::display(ctx.batch_id));
        ctx
    }

    async fn run_stock_action<A>(
        &self,
        name: &'static str,
        action: &A,
        ctx: &ActionContext,
    ) -> EngineResult<ActionReceipt>
    where
        A: Action<Output = Outcome>,
    {
        let (outcome, receipt) = self.execute(name, action, ctx).await?;
        Ok(ActionReceipt::new(ctx, outcome, receipt))
    }

    // Read side. Reads are tenant-scoped but not permission-gated.

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn find_item(&self, tenant_id: TenantId, barcode: &Barcode) -> EngineResult<Item> {
        let mut found = self.store.load_items(tenant_id, std::slice::from_ref(barcode)).await?;
        found
            .pop()
            .map(|v| v.value)
            .ok_or_else(|| EngineError::NotFound(format!("item {barcode}")))
    }

    /// Partial results: the caller detects gaps.
    pub async fn find_items(
        &self,
        tenant_id: TenantId,
        barcodes: &[Barcode],
    ) -> EngineResult<HashMap<Barcode, Item>> {
        let snapshot = load_snapshot(&self.store, tenant_id, barcodes).await?;
        Ok(snapshot.into_iter().map(|(b, v)| (b, v.value)).collect())
    }

    pub async fn list_items(&self, tenant_id: TenantId) -> EngineResult<Vec<Item>> {
        let items = self.store.load_all_items(tenant_id).await?;
        Ok(items.into_iter().map(|v| v.value).collect())
    }

    pub async fn find_kit(&self, tenant_id: TenantId, name: &str) -> EngineResult<KitDefinition> {
        self.store
            .load_kit(tenant_id, name)
            .await?
            .map(|v| v.value)
            .ok_or_else(|| EngineError::NotFound(format!("kit '{name}'")))
    }

    pub async fn list_kits(&self, tenant_id: TenantId) -> EngineResult<Vec<KitDefinition>> {
        let kits = self.store.list_kits(tenant_id).await?;
        Ok(kits.into_iter().map(|v| v.value).collect())
    }

    /// The tenant's Audit Log in commit order.
    pub async fn audit_log(&self, tenant_id: TenantId) -> EngineResult<Vec<TransactionRecord>> {
        Ok(self.store.load_log(tenant_id).await?)
    }

    /// Who currently has what, replayed from the Audit Log.
    ///
    /// Advisory only; never consulted when authorizing a mutation.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn outstanding(&self, tenant_id: TenantId) -> EngineResult<Vec<OutstandingItem>> {
        let log = self.store.load_log(tenant_id).await?;
        Ok(derive_outstanding(tenant_id, &log)?)
    }
}
