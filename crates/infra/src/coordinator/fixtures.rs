//! Shared setup for coordinator tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use stockroom_audit::{LoanContext, TransactionRecord};
use stockroom_auth::{Principal, Role};
use stockroom_core::{Actor, Barcode, ExpectedVersion, TenantId, Versioned};
use stockroom_inventory::{Item, KitComponent, KitDefinition, NewItem};

use super::{CartLine, CheckoutRequest, TransactionCoordinator};
use crate::retry::RetryPolicy;
use crate::store::{ChangeSet, CommitReceipt, InMemoryInventoryStore, InventoryStore, KitWrite, StoreError};

pub fn bc(raw: &str) -> Barcode {
    Barcode::parse(raw).unwrap()
}

pub fn principal(tenant: TenantId, role: Role) -> Principal {
    Principal::new(Actor::new("u1", "staff@school.org"), tenant, role)
}

pub fn lines(entries: &[(&str, u32)]) -> Vec<CartLine> {
    entries.iter().map(|(b, q)| CartLine::new(bc(b), *q)).collect()
}

pub fn checkout_request(assignee: &str, entries: &[(&str, u32)]) -> CheckoutRequest {
    CheckoutRequest {
        assignee: assignee.to_string(),
        items: lines(entries),
        context: LoanContext::default(),
    }
}

/// Insert items directly, without audit rows: `(barcode, name, total, current)`.
pub async fn seed_items(store: &dyn InventoryStore, tenant: TenantId, items: &[(&str, &str, u32, u32)]) {
    let mut changes = ChangeSet::new(tenant);
    for (barcode, name, total, current) in items {
        let item = Item::create(
            bc(barcode),
            &NewItem {
                name: name.to_string(),
                total_stock: *total,
                current_stock: Some(*current),
                ..NewItem::default()
            },
            &Actor::new("seed", ""),
            Utc::now(),
        )
        .unwrap();
        changes.write_item(item, ExpectedVersion::Absent);
    }
    store.commit(changes).await.unwrap();
}

/// Insert a kit definition directly: `(barcode, required_quantity)` components.
pub async fn seed_kit(store: &dyn InventoryStore, tenant: TenantId, name: &str, components: &[(&str, u32)]) {
    let mut changes = ChangeSet::new(tenant);
    changes.write_kit(KitWrite::Replace {
        definition: kit(name, components),
        expected: ExpectedVersion::Absent,
    });
    store.commit(changes).await.unwrap();
}

pub fn kit(name: &str, components: &[(&str, u32)]) -> KitDefinition {
    KitDefinition {
        name: name.to_string(),
        kit_barcode: None,
        kit_quantity: 1,
        components: components
            .iter()
            .map(|(b, q)| KitComponent {
                barcode: bc(b),
                name: String::new(),
                required_quantity: *q,
            })
            .collect(),
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::fixed(20, Duration::from_millis(1))
}

/// A coordinator over a fresh in-memory store seeded with `items`.
pub async fn coordinator_with(
    items: &[(&str, &str, u32, u32)],
) -> (TransactionCoordinator<InMemoryInventoryStore>, TenantId) {
    let tenant = TenantId::new();
    let store = InMemoryInventoryStore::new();
    seed_items(&store, tenant, items).await;
    (TransactionCoordinator::new(store).with_retry_policy(fast_retry()), tenant)
}

/// Which read lets a concurrent writer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPoint {
    AllItems,
    Kit,
}

/// In-memory store where another writer commits `pending` right after the
/// first read at `after`, as if it raced the action being planned.
pub struct Interleaved {
    pub inner: InMemoryInventoryStore,
    after: ReadPoint,
    pending: Mutex<Vec<ChangeSet>>,
}

impl Interleaved {
    pub fn new(inner: InMemoryInventoryStore, after: ReadPoint, pending: Vec<ChangeSet>) -> Self {
        Self {
            inner,
            after,
            pending: Mutex::new(pending),
        }
    }

    async fn interleave(&self, at: ReadPoint) {
        if at != self.after {
            return;
        }
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        for changes in pending {
            self.inner.commit(changes).await.unwrap();
        }
    }
}

#[async_trait]
impl InventoryStore for Interleaved {
    async fn load_items(&self, tenant_id: TenantId, barcodes: &[Barcode]) -> Result<Vec<Versioned<Item>>, StoreError> {
        self.inner.load_items(tenant_id, barcodes).await
    }

    async fn load_all_items(&self, tenant_id: TenantId) -> Result<Vec<Versioned<Item>>, StoreError> {
        let items = self.inner.load_all_items(tenant_id).await;
        self.interleave(ReadPoint::AllItems).await;
        items
    }

    async fn load_catalog_version(&self, tenant_id: TenantId) -> Result<u64, StoreError> {
        self.inner.load_catalog_version(tenant_id).await
    }

    async fn load_kit(&self, tenant_id: TenantId, name: &str) -> Result<Option<Versioned<KitDefinition>>, StoreError> {
        let kit = self.inner.load_kit(tenant_id, name).await;
        self.interleave(ReadPoint::Kit).await;
        kit
    }

    async fn list_kits(&self, tenant_id: TenantId) -> Result<Vec<Versioned<KitDefinition>>, StoreError> {
        self.inner.list_kits(tenant_id).await
    }

    async fn load_log(&self, tenant_id: TenantId) -> Result<Vec<TransactionRecord>, StoreError> {
        self.inner.load_log(tenant_id).await
    }

    async fn reserve_barcode_sequence(&self, tenant_id: TenantId, prefix: &str, count: u32) -> Result<u64, StoreError> {
        self.inner.reserve_barcode_sequence(tenant_id, prefix, count).await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        self.inner.commit(changes).await
    }
}
