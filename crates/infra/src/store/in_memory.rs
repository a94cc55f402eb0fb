use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use stockroom_audit::TransactionRecord;
use stockroom_core::{Barcode, ExpectedVersion, TenantId, Versioned};
use stockroom_inventory::{highest_sequence, Item, KitComponentRow, KitDefinition};

use super::r#trait::{ChangeSet, CommitReceipt, Guard, InventoryStore, KitWrite, StoreError};

#[derive(Debug, Default)]
struct TenantState {
    items: HashMap<Barcode, Versioned<Item>>,
    /// Flattened component rows per kit name.
    kits: HashMap<String, Versioned<Vec<KitComponentRow>>>,
    /// Last version of each deleted kit, so a re-save never reuses one.
    kit_tombstones: HashMap<String, u64>,
    /// Bumped once per commit that creates at least one item.
    catalog_version: u64,
    log: Vec<TransactionRecord>,
    /// Last assigned audit sequence; survives a purge.
    log_head: u64,
    sequences: HashMap<String, u64>,
}

impl TenantState {
    fn item_version(&self, barcode: &Barcode) -> u64 {
        self.items.get(barcode).map(|v| v.version).unwrap_or(0)
    }

    fn kit_version(&self, name: &str) -> u64 {
        self.kits.get(name).map(|v| v.version).unwrap_or(0)
    }

    /// Version the next write of kit `name` gets, live or deleted.
    fn next_kit_version(&self, name: &str) -> u64 {
        let last = self.kit_tombstones.get(name).copied().unwrap_or(0);
        self.kit_version(name).max(last) + 1
    }

    fn kit(&self, name: &str) -> Result<Option<Versioned<KitDefinition>>, StoreError> {
        let Some(rows) = self.kits.get(name) else {
            return Ok(None);
        };
        let definition = KitDefinition::from_rows(rows.value.clone())
            .ok_or_else(|| StoreError::Corrupt(format!("kit '{name}' has no component rows")))?;
        Ok(Some(Versioned::new(definition, rows.version)))
    }
}

fn conflict(what: impl std::fmt::Display, expected: ExpectedVersion, actual: u64) -> StoreError {
    StoreError::Conflict(format!("{what}: expected {expected:?}, found {actual}"))
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// In-memory inventory store.
///
/// Intended for tests/dev. One write lock serialises commits; it is never held
/// across an `.await`.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    tenants: RwLock<HashMap<TenantId, TenantState>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, tenant_id: TenantId, f: impl FnOnce(&TenantState) -> T) -> Result<T, StoreError> {
        let tenants = self.tenants.read().map_err(|_| poisoned())?;
        Ok(match tenants.get(&tenant_id) {
            Some(state) => f(state),
            None => f(&TenantState::default()),
        })
    }

    fn apply(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        changes.check_shape()?;

        let mut tenants = self.tenants.write().map_err(|_| poisoned())?;
        let state = tenants.entry(changes.tenant_id).or_default();

        // Validate the whole unit before touching anything.
        for guard in &changes.guards {
            match guard {
                Guard::Item { barcode, expected } => {
                    let actual = state.item_version(barcode);
                    if !expected.matches(actual) {
                        return Err(conflict(format_args!("item {barcode}"), *expected, actual));
                    }
                }
                Guard::Kit { name, expected } => {
                    let actual = state.kit_version(name);
                    if !expected.matches(actual) {
                        return Err(conflict(format_args!("kit '{name}'"), *expected, actual));
                    }
                }
                Guard::Catalog { expected } => {
                    if !expected.matches(state.catalog_version) {
                        return Err(conflict("item catalog", *expected, state.catalog_version));
                    }
                }
            }
        }
        for write in &changes.item_writes {
            let actual = state.item_version(&write.item.barcode);
            if !write.expected.matches(actual) {
                return Err(conflict(
                    format_args!("item {}", write.item.barcode),
                    write.expected,
                    actual,
                ));
            }
            write
                .item
                .check_invariants()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        }
        for write in &changes.kit_writes {
            let (name, expected) = match write {
                KitWrite::Replace { definition, expected } => (definition.name.as_str(), *expected),
                KitWrite::Delete { name, expected } => (name.as_str(), *expected),
            };
            let actual = state.kit_version(name);
            if !expected.matches(actual) {
                return Err(conflict(format_args!("kit '{name}'"), expected, actual));
            }
        }

        if changes.purge_audit_log {
            state.log.clear();
        }

        if changes
            .item_writes
            .iter()
            .any(|w| state.item_version(&w.item.barcode) == 0)
        {
            state.catalog_version += 1;
        }
        for write in changes.item_writes {
            let next = state.item_version(&write.item.barcode) + 1;
            state
                .items
                .insert(write.item.barcode.clone(), Versioned::new(write.item, next));
        }

        for write in changes.kit_writes {
            match write {
                KitWrite::Replace { definition, .. } => {
                    let next = state.next_kit_version(&definition.name);
                    state.kit_tombstones.remove(&definition.name);
                    state
                        .kits
                        .insert(definition.name.clone(), Versioned::new(definition.to_rows(), next));
                }
                KitWrite::Delete { name, .. } => {
                    let next = state.next_kit_version(&name);
                    if state.kits.remove(&name).is_some() {
                        state.kit_tombstones.insert(name, next);
                    }
                }
            }
        }

        let recorded_at = Utc::now();
        let mut receipt = CommitReceipt::default();
        for entry in changes.audit_entries {
            state.log_head += 1;
            let record = entry.into_record(state.log_head, recorded_at);
            state.log.push(record.clone());
            receipt.records.push(record);
        }

        Ok(receipt)
    }

    fn reserve(&self, tenant_id: TenantId, prefix: &str, count: u32) -> Result<u64, StoreError> {
        let mut tenants = self.tenants.write().map_err(|_| poisoned())?;
        let state = tenants.entry(tenant_id).or_default();

        let highest = highest_sequence(prefix, state.items.keys());
        let counter = state.sequences.entry(prefix.to_string()).or_insert(0);
        let last = (*counter).max(highest);
        *counter = last + u64::from(count);
        Ok(last + 1)
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn load_items(
        &self,
        tenant_id: TenantId,
        barcodes: &[Barcode],
    ) -> Result<Vec<Versioned<Item>>, StoreError> {
        self.read(tenant_id, |state| {
            barcodes
                .iter()
                .filter_map(|b| state.items.get(b).cloned())
                .collect()
        })
    }

    async fn load_all_items(&self, tenant_id: TenantId) -> Result<Vec<Versioned<Item>>, StoreError> {
        self.read(tenant_id, |state| {
            let mut items: Vec<_> = state.items.values().cloned().collect();
            items.sort_by(|a, b| a.value.barcode.cmp(&b.value.barcode));
            items
        })
    }

    async fn load_catalog_version(&self, tenant_id: TenantId) -> Result<u64, StoreError> {
        self.read(tenant_id, |state| state.catalog_version)
    }

    async fn load_kit(
        &self,
        tenant_id: TenantId,
        name: &str,
    ) -> Result<Option<Versioned<KitDefinition>>, StoreError> {
        self.read(tenant_id, |state| state.kit(name))?
    }

    async fn list_kits(&self, tenant_id: TenantId) -> Result<Vec<Versioned<KitDefinition>>, StoreError> {
        self.read(tenant_id, |state| {
            let mut names: Vec<&String> = state.kits.keys().collect();
            names.sort();
            names
                .into_iter()
                .filter_map(|name| state.kit(name).transpose())
                .collect::<Result<Vec<_>, _>>()
        })?
    }

    async fn load_log(&self, tenant_id: TenantId) -> Result<Vec<TransactionRecord>, StoreError> {
        self.read(tenant_id, |state| state.log.clone())
    }

    async fn reserve_barcode_sequence(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        count: u32,
    ) -> Result<u64, StoreError> {
        self.reserve(tenant_id, prefix, count)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        self.apply(changes)
    }
}
