use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use stockroom_audit::{NewTransaction, TransactionRecord};
use stockroom_core::{Barcode, ExpectedVersion, TenantId, Versioned};
use stockroom_inventory::{Item, KitDefinition};

/// A record the unit read but does not write; validated at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    Item {
        barcode: Barcode,
        expected: ExpectedVersion,
    },
    Kit {
        name: String,
        expected: ExpectedVersion,
    },
    /// The tenant's set of barcodes; moves whenever an item is created.
    Catalog { expected: ExpectedVersion },
}

/// Full replacement of one item record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemWrite {
    pub item: Item,
    /// `Absent` creates the item.
    pub expected: ExpectedVersion,
}

/// Kit definitions are only ever replaced or removed as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KitWrite {
    Replace {
        definition: KitDefinition,
        expected: ExpectedVersion,
    },
    Delete {
        name: String,
        expected: ExpectedVersion,
    },
}

impl KitWrite {
    pub fn name(&self) -> &str {
        match self {
            KitWrite::Replace { definition, .. } => &definition.name,
            KitWrite::Delete { name, .. } => name,
        }
    }
}

/// One atomic unit: every guard and write is validated, then everything is
/// applied, or nothing is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub tenant_id: TenantId,
    pub guards: Vec<Guard>,
    pub item_writes: Vec<ItemWrite>,
    pub kit_writes: Vec<KitWrite>,
    pub audit_entries: Vec<NewTransaction>,
    /// Delete the tenant's whole Audit Log before appending `audit_entries`.
    pub purge_audit_log: bool,
}

impl ChangeSet {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            guards: Vec::new(),
            item_writes: Vec::new(),
            kit_writes: Vec::new(),
            audit_entries: Vec::new(),
            purge_audit_log: false,
        }
    }

    pub fn guard_item(&mut self, barcode: Barcode, expected: ExpectedVersion) -> &mut Self {
        self.guards.push(Guard::Item { barcode, expected });
        self
    }

    pub fn guard_kit(&mut self, name: impl Into<String>, expected: ExpectedVersion) -> &mut Self {
        self.guards.push(Guard::Kit {
            name: name.into(),
            expected,
        });
        self
    }

    /// Fail the unit if any item was created since `version` was read.
    pub fn guard_catalog(&mut self, version: u64) -> &mut Self {
        self.guards.push(Guard::Catalog {
            expected: ExpectedVersion::Exact(version),
        });
        self
    }

    pub fn write_item(&mut self, item: Item, expected: ExpectedVersion) -> &mut Self {
        self.item_writes.push(ItemWrite { item, expected });
        self
    }

    pub fn write_kit(&mut self, write: KitWrite) -> &mut Self {
        self.kit_writes.push(write);
        self
    }

    pub fn record(&mut self, entry: NewTransaction) -> &mut Self {
        self.audit_entries.push(entry);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.item_writes.is_empty()
            && self.kit_writes.is_empty()
            && self.audit_entries.is_empty()
            && !self.purge_audit_log
    }

    /// Reject units that mix tenants or write the same record twice.
    pub fn check_shape(&self) -> Result<(), StoreError> {
        for (idx, entry) in self.audit_entries.iter().enumerate() {
            if entry.tenant_id != self.tenant_id {
                return Err(StoreError::TenantIsolation(format!(
                    "audit entry {idx} belongs to another tenant"
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for w in &self.item_writes {
            if !seen.insert(&w.item.barcode) {
                return Err(StoreError::Corrupt(format!(
                    "item {} written twice in one unit",
                    w.item.barcode
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for w in &self.kit_writes {
            if !seen.insert(w.name()) {
                return Err(StoreError::Corrupt(format!(
                    "kit '{}' written twice in one unit",
                    w.name()
                )));
            }
        }
        Ok(())
    }
}

/// What the store assigned while committing a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Audit rows as stored, with their sequence numbers.
    pub records: Vec<TransactionRecord>,
}

/// Store operation error.
///
/// Infrastructure failures only; business rule failures are `DomainError`s and
/// never reach the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A guarded record changed since it was read. Safe to re-plan and retry.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("store backend failure: {0}")]
    Backend(String),

    /// Persisted data could not be decoded or a unit was malformed.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Tenant-scoped Item Store, kit definitions and Audit Log behind one commit
/// primitive.
///
/// Reads return records with the version they were read at. Mutations happen
/// only through [`InventoryStore::commit`], which validates every guard and
/// expected version in the unit against the live state and applies all writes
/// plus the audit rows atomically. A stale read surfaces as
/// [`StoreError::Conflict`]; the caller re-reads and re-plans.
///
/// Implementations must:
/// - keep tenants fully isolated on read and write
/// - assign audit `sequence` numbers strictly increasing per tenant, at commit
/// - never expose a partially applied unit
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Load the named items. Missing barcodes are simply absent from the result.
    async fn load_items(
        &self,
        tenant_id: TenantId,
        barcodes: &[Barcode],
    ) -> Result<Vec<Versioned<Item>>, StoreError>;

    async fn load_all_items(&self, tenant_id: TenantId) -> Result<Vec<Versioned<Item>>, StoreError>;

    /// Counter bumped by every commit that creates an item. Read it before
    /// [`InventoryStore::load_all_items`] and guard on it to cover the whole set.
    async fn load_catalog_version(&self, tenant_id: TenantId) -> Result<u64, StoreError>;

    /// A deleted kit reads as absent; re-saving it continues its version.
    async fn load_kit(
        &self,
        tenant_id: TenantId,
        name: &str,
    ) -> Result<Option<Versioned<KitDefinition>>, StoreError>;

    async fn list_kits(&self, tenant_id: TenantId) -> Result<Vec<Versioned<KitDefinition>>, StoreError>;

    /// The tenant's Audit Log in commit order.
    async fn load_log(&self, tenant_id: TenantId) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Reserve `count` consecutive barcode numbers for `prefix` and return the first.
    ///
    /// The counter is per tenant and prefix, seeded from the highest numeric
    /// suffix already in use, and never hands out the same number twice.
    async fn reserve_barcode_sequence(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        count: u32,
    ) -> Result<u64, StoreError>;

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError>;
}

#[async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    async fn load_items(
        &self,
        tenant_id: TenantId,
        barcodes: &[Barcode],
    ) -> Result<Vec<Versioned<Item>>, StoreError> {
        (**self).load_items(tenant_id, barcodes).await
    }

    async fn load_all_items(&self, tenant_id: TenantId) -> Result<Vec<Versioned<Item>>, StoreError> {
        (**self).load_all_items(tenant_id).await
    }

    async fn load_catalog_version(&self, tenant_id: TenantId) -> Result<u64, StoreError> {
        (**self).load_catalog_version(tenant_id).await
    }

    async fn load_kit(
        &self,
        tenant_id: TenantId,
        name: &str,
    ) -> Result<Option<Versioned<KitDefinition>>, StoreError> {
        (**self).load_kit(tenant_id, name).await
    }

    async fn list_kits(&self, tenant_id: TenantId) -> Result<Vec<Versioned<KitDefinition>>, StoreError> {
        (**self).list_kits(tenant_id).await
    }

    async fn load_log(&self, tenant_id: TenantId) -> Result<Vec<TransactionRecord>, StoreError> {
        (**self).load_log(tenant_id).await
    }

    async fn reserve_barcode_sequence(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        count: u32,
    ) -> Result<u64, StoreError> {
        (**self).reserve_barcode_sequence(tenant_id, prefix, count).await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        (**self).commit(changes).await
    }
}
