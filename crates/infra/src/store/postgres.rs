//! Postgres-backed inventory store.
//!
//! Items, kit definitions (as flattened component rows) and the Audit Log live
//! in the tables declared in `migrations/0001_inventory.sql`. A commit runs in a
//! single database transaction:
//!
//! 1. read-only guards are checked under `FOR SHARE` row locks
//! 2. item and kit writes are version-conditional (`UPDATE ... WHERE version = $n`,
//!    or `INSERT` for records expected to be absent)
//! 3. audit sequence numbers are taken from `tenant_log_heads`, whose row lock
//!    serialises appends per tenant
//!
//! Deleted kits stay in `kits` with `deleted = TRUE`, so their version keeps
//! counting up when the name is reused. `tenant_catalogs.version` moves on every
//! commit that may insert an item.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |----------------------|------------|----------|
//! | `23505` | `Conflict` | Concurrent insert of the same barcode or kit |
//! | `40001` / `40P01` | `Conflict` | Serialization failure or deadlock |
//! | `23514` | `Corrupt` | A stock check constraint would be violated |
//! | Any other | `Backend` | Connection, pool or query failure |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, warn, Span};

use stockroom_audit::{TransactionDetails, TransactionRecord, TransactionType};
use stockroom_core::{Actor, Barcode, BatchId, ExpectedVersion, TenantId, TransactionId, Versioned};
use stockroom_inventory::{Item, KitComponentRow, KitDefinition, LoanStatus, Location};

use super::r#trait::{ChangeSet, CommitReceipt, Guard, InventoryStore, ItemWrite, KitWrite, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_inventory.sql");

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

const ITEM_COLUMNS: &str = r#"
    barcode, version, name, total_stock, current_stock, damaged_stock, loan_status,
    assigned_to, is_kit, department, room, location, last_transaction_type,
    last_transaction_by, last_transaction_date, created_at
"#;

const INSERT_ITEM: &str = r#"
    INSERT INTO items (
        tenant_id, barcode, name, total_stock, current_stock, damaged_stock, loan_status,
        assigned_to, is_kit, department, room, location, last_transaction_type,
        last_transaction_by, last_transaction_date, created_at, version
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, 1)
"#;

const UPSERT_ITEM_SUFFIX: &str = r#"
    ON CONFLICT (tenant_id, barcode) DO UPDATE SET
        name = EXCLUDED.name,
        total_stock = EXCLUDED.total_stock,
        current_stock = EXCLUDED.current_stock,
        damaged_stock = EXCLUDED.damaged_stock,
        loan_status = EXCLUDED.loan_status,
        assigned_to = EXCLUDED.assigned_to,
        is_kit = EXCLUDED.is_kit,
        department = EXCLUDED.department,
        room = EXCLUDED.room,
        location = EXCLUDED.location,
        last_transaction_type = EXCLUDED.last_transaction_type,
        last_transaction_by = EXCLUDED.last_transaction_by,
        last_transaction_date = EXCLUDED.last_transaction_date,
        version = items.version + 1
"#;

const UPDATE_ITEM: &str = r#"
    UPDATE items SET
        name = $3,
        total_stock = $4,
        current_stock = $5,
        damaged_stock = $6,
        loan_status = $7,
        assigned_to = $8,
        is_kit = $9,
        department = $10,
        room = $11,
        location = $12,
        last_transaction_type = $13,
        last_transaction_by = $14,
        last_transaction_date = $15,
        created_at = $16,
        version = version + 1
    WHERE tenant_id = $1 AND barcode = $2 AND version = $17
"#;

const KIT_ROW_COLUMNS: &str = r#"
    k.kit_name, k.version, c.position, c.kit_barcode, c.kit_quantity,
    c.component_barcode, c.component_name, c.required_quantity
"#;

/// Postgres-backed implementation of [`InventoryStore`].
///
/// Every query is scoped by `tenant_id`. `PostgresInventoryStore` is
/// `Send + Sync`; the pool handles connection sharing.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the schema if it does not exist yet. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(skip(self, barcodes), fields(tenant_id = %tenant_id, requested = barcodes.len(), found = tracing::field::Empty), err)]
    async fn select_items(
        &self,
        tenant_id: TenantId,
        barcodes: &[Barcode],
    ) -> Result<Vec<Versioned<Item>>, StoreError> {
        let keys: Vec<String> = barcodes.iter().map(|b| b.as_str().to_string()).collect();
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE tenant_id = $1 AND barcode = ANY($2) ORDER BY barcode"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(&keys)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_items", e))?;

        let items = rows.iter().map(item_from_row).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("found", items.len());
        Ok(items)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn select_all_items(&self, tenant_id: TenantId) -> Result<Vec<Versioned<Item>>, StoreError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE tenant_id = $1 ORDER BY barcode");
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_all_items", e))?;

        rows.iter().map(item_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn select_kits(
        &self,
        tenant_id: TenantId,
        name: Option<&str>,
    ) -> Result<Vec<Versioned<KitDefinition>>, StoreError> {
        let sql = format!(
            r#"
            SELECT {KIT_ROW_COLUMNS}
            FROM kits k
            JOIN kit_components c ON c.tenant_id = k.tenant_id AND c.kit_name = k.kit_name
            WHERE k.tenant_id = $1 AND NOT k.deleted AND ($2::text IS NULL OR k.kit_name = $2)
            ORDER BY k.kit_name, c.position
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(name)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_kits", e))?;

        let mut grouped: Vec<(u64, Vec<KitComponentRow>)> = Vec::new();
        let mut last_name: Option<String> = None;
        for row in &rows {
            let (version, component) = kit_row_from_row(row)?;
            if last_name.as_deref() != Some(component.kit_name.as_str()) {
                last_name = Some(component.kit_name.clone());
                grouped.push((version, Vec::new()));
            }
            if let Some((_, group)) = grouped.last_mut() {
                group.push(component);
            }
        }

        grouped
            .into_iter()
            .map(|(version, rows)| {
                KitDefinition::from_rows(rows)
                    .map(|def| Versioned::new(def, version))
                    .ok_or_else(|| StoreError::Corrupt("kit without component rows".to_string()))
            })
            .collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn select_catalog_version(&self, tenant_id: TenantId) -> Result<u64, StoreError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM tenant_catalogs WHERE tenant_id = $1")
                .bind(tenant_id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("load_catalog_version", e))?;
        version.map_or(Ok(0), |v| as_u64(v, "version"))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, record_count = tracing::field::Empty), err)]
    async fn select_log(&self, tenant_id: TenantId) -> Result<Vec<TransactionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                tenant_id, sequence, transaction_id, batch_id, actor_uid, actor_email,
                occurred_at, recorded_at, details
            FROM transactions
            WHERE tenant_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_log", e))?;

        let records = rows.iter().map(record_from_row).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("record_count", records.len());
        Ok(records)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn next_barcode_sequence(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        count: u32,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            WITH seed AS (
                SELECT COALESCE(MAX(substring(barcode FROM char_length($2) + 2)::BIGINT), 0) AS highest
                FROM items
                WHERE tenant_id = $1 AND barcode ~ ('^' || $2 || '-[0-9]{1,18}$')
            )
            INSERT INTO barcode_sequences (tenant_id, prefix, last_value)
            SELECT $1, $2, seed.highest + $3 FROM seed
            ON CONFLICT (tenant_id, prefix) DO UPDATE
            SET last_value = GREATEST(barcode_sequences.last_value, (SELECT highest FROM seed)) + $3
            RETURNING last_value
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(prefix)
        .bind(i64::from(count))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reserve_barcode_sequence", e))?;

        let last: i64 = column(&row, "last_value")?;
        Ok(as_u64(last, "last_value")? + 1 - u64::from(count))
    }

    /// Apply one unit in a single database transaction.
    #[instrument(
        skip(self, changes),
        fields(
            tenant_id = %changes.tenant_id,
            guards = changes.guards.len(),
            item_writes = changes.item_writes.len(),
            kit_writes = changes.kit_writes.len(),
            audit_entries = changes.audit_entries.len(),
            purge = changes.purge_audit_log
        ),
        err
    )]
    pub async fn commit_unit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        changes.check_shape()?;
        for write in &changes.item_writes {
            write
                .item
                .check_invariants()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        match apply_unit(&mut tx, changes).await {
            Ok(receipt) => {
                tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
                Ok(receipt)
            }
            Err(err) => {
                // The unit's own error is what the caller acts on.
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, cause = %err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

async fn apply_unit(
    tx: &mut Transaction<'_, Postgres>,
    changes: ChangeSet,
) -> Result<CommitReceipt, StoreError> {
    let tenant_id = changes.tenant_id;

    check_guards(tx, tenant_id, &changes.guards).await?;

    if changes.purge_audit_log {
        sqlx::query("DELETE FROM transactions WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("purge_audit_log", e))?;
    }

    for write in &changes.item_writes {
        write_item(tx, tenant_id, write).await?;
    }
    if changes
        .item_writes
        .iter()
        .any(|w| !matches!(w.expected, ExpectedVersion::Exact(_)))
    {
        bump_catalog_version(tx, tenant_id).await?;
    }

    for write in &changes.kit_writes {
        write_kit(tx, tenant_id, write).await?;
    }

    append_audit(tx, tenant_id, changes.audit_entries).await
}

async fn check_guards(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    guards: &[Guard],
) -> Result<(), StoreError> {
    let mut item_keys = Vec::new();
    let mut kit_keys = Vec::new();
    let mut catalog_guarded = false;
    for guard in guards {
        match guard {
            Guard::Item { barcode, .. } => item_keys.push(barcode.as_str().to_string()),
            Guard::Kit { name, .. } => kit_keys.push(name.clone()),
            Guard::Catalog { .. } => catalog_guarded = true,
        }
    }

    // Upsert rather than select, so the row exists to lock against the first insert.
    let mut catalog_version = 0;
    if catalog_guarded {
        let row = sqlx::query(
            r#"
            INSERT INTO tenant_catalogs (tenant_id, version) VALUES ($1, 0)
            ON CONFLICT (tenant_id) DO UPDATE SET version = tenant_catalogs.version
            RETURNING version
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("guard_catalog", e))?;
        let version: i64 = column(&row, "version")?;
        catalog_version = as_u64(version, "version")?;
    }

    let mut item_versions: HashMap<String, u64> = HashMap::new();
    if !item_keys.is_empty() {
        let rows = sqlx::query(
            "SELECT barcode, version FROM items WHERE tenant_id = $1 AND barcode = ANY($2) FOR SHARE",
        )
        .bind(tenant_id.as_uuid())
        .bind(&item_keys)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("guard_items", e))?;
        for row in &rows {
            let version: i64 = column(row, "version")?;
            item_versions.insert(column(row, "barcode")?, as_u64(version, "version")?);
        }
    }

    let mut kit_versions: HashMap<String, u64> = HashMap::new();
    if !kit_keys.is_empty() {
        let rows = sqlx::query(
            r#"
            SELECT kit_name, CASE WHEN deleted THEN 0 ELSE version END AS version
            FROM kits WHERE tenant_id = $1 AND kit_name = ANY($2) FOR SHARE
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(&kit_keys)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("guard_kits", e))?;
        for row in &rows {
            let version: i64 = column(row, "version")?;
            kit_versions.insert(column(row, "kit_name")?, as_u64(version, "version")?);
        }
    }

    for guard in guards {
        let (what, expected, actual) = match guard {
            Guard::Item { barcode, expected } => (
                format!("item {barcode}"),
                *expected,
                item_versions.get(barcode.as_str()).copied().unwrap_or(0),
            ),
            Guard::Kit { name, expected } => (
                format!("kit '{name}'"),
                *expected,
                kit_versions.get(name).copied().unwrap_or(0),
            ),
            Guard::Catalog { expected } => ("item catalog".to_string(), *expected, catalog_version),
        };
        if !expected.matches(actual) {
            return Err(StoreError::Conflict(format!(
                "{what}: expected {expected:?}, found {actual}"
            )));
        }
    }
    Ok(())
}

fn bind_item<'q>(query: PgQuery<'q>, tenant_id: TenantId, item: &'q Item) -> PgQuery<'q> {
    query
        .bind(*tenant_id.as_uuid())
        .bind(item.barcode.as_str())
        .bind(item.name.as_str())
        .bind(i64::from(item.total_stock))
        .bind(i64::from(item.current_stock))
        .bind(i64::from(item.damaged_stock))
        .bind(item.loan_status.as_str())
        .bind(item.assigned_to.as_deref())
        .bind(item.is_kit)
        .bind(item.department.as_deref())
        .bind(item.room.as_deref())
        .bind(item.location.as_ref().map(ToString::to_string))
        .bind(item.last_transaction_type.map(TransactionType::label))
        .bind(item.last_transaction_by.as_deref())
        .bind(item.last_transaction_date)
        .bind(item.created_at)
}

async fn write_item(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    write: &ItemWrite,
) -> Result<(), StoreError> {
    let item = &write.item;
    let result = match write.expected {
        ExpectedVersion::Absent => bind_item(sqlx::query(INSERT_ITEM), tenant_id, item)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_item", e))?,
        ExpectedVersion::Any => {
            let sql = format!("{INSERT_ITEM} {UPSERT_ITEM_SUFFIX}");
            bind_item(sqlx::query(&sql), tenant_id, item)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("upsert_item", e))?
        }
        ExpectedVersion::Exact(version) => bind_item(sqlx::query(UPDATE_ITEM), tenant_id, item)
            .bind(version as i64)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_item", e))?,
    };

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!(
            "item {}: expected {:?}, record changed",
            item.barcode, write.expected
        )));
    }
    Ok(())
}

async fn write_kit(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    write: &KitWrite,
) -> Result<(), StoreError> {
    match write {
        KitWrite::Replace { definition, expected } => {
            let name = definition.name.as_str();
            bump_kit_version(tx, tenant_id, name, *expected).await?;

            sqlx::query("DELETE FROM kit_components WHERE tenant_id = $1 AND kit_name = $2")
                .bind(tenant_id.as_uuid())
                .bind(name)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("clear_kit_components", e))?;

            for row in definition.to_rows() {
                sqlx::query(
                    r#"
                    INSERT INTO kit_components (
                        tenant_id, kit_name, position, kit_barcode, kit_quantity,
                        component_barcode, component_name, required_quantity
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(&row.kit_name)
                .bind(row.position as i32)
                .bind(row.kit_barcode.as_ref().map(Barcode::as_str))
                .bind(i64::from(row.kit_quantity))
                .bind(row.component_barcode.as_str())
                .bind(&row.component_name)
                .bind(i64::from(row.required_quantity))
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("insert_kit_component", e))?;
            }
            Ok(())
        }
        KitWrite::Delete { name, expected } => {
            let version = match expected {
                ExpectedVersion::Exact(v) => Some(*v as i64),
                ExpectedVersion::Any => None,
                ExpectedVersion::Absent => {
                    return Err(StoreError::Corrupt(format!(
                        "kit '{name}': delete expects an existing record"
                    )));
                }
            };
            let result = sqlx::query(
                r#"
                UPDATE kits SET deleted = TRUE, version = version + 1
                WHERE tenant_id = $1 AND kit_name = $2 AND NOT deleted
                    AND ($3::bigint IS NULL OR version = $3)
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(name)
            .bind(version)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("delete_kit", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!(
                    "kit '{name}': expected {expected:?}, record changed"
                )));
            }

            sqlx::query("DELETE FROM kit_components WHERE tenant_id = $1 AND kit_name = $2")
                .bind(tenant_id.as_uuid())
                .bind(name)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("clear_kit_components", e))?;
            Ok(())
        }
    }
}

async fn bump_kit_version(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    name: &str,
    expected: ExpectedVersion,
) -> Result<(), StoreError> {
    let result = match expected {
        ExpectedVersion::Absent => sqlx::query(
            r#"
            INSERT INTO kits (tenant_id, kit_name, version) VALUES ($1, $2, 1)
            ON CONFLICT (tenant_id, kit_name) DO UPDATE SET version = kits.version + 1, deleted = FALSE
            WHERE kits.deleted
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(name)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_kit", e))?,
        ExpectedVersion::Any => sqlx::query(
            r#"
            INSERT INTO kits (tenant_id, kit_name, version) VALUES ($1, $2, 1)
            ON CONFLICT (tenant_id, kit_name) DO UPDATE SET version = kits.version + 1, deleted = FALSE
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(name)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_kit", e))?,
        ExpectedVersion::Exact(version) => sqlx::query(
            r#"
            UPDATE kits SET version = version + 1
            WHERE tenant_id = $1 AND kit_name = $2 AND version = $3 AND NOT deleted
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(name)
        .bind(version as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_kit", e))?,
    };

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!(
            "kit '{name}': expected {expected:?}, record changed"
        )));
    }
    Ok(())
}

async fn bump_catalog_version(tx: &mut Transaction<'_, Postgres>, tenant_id: TenantId) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO tenant_catalogs (tenant_id, version) VALUES ($1, 1)
        ON CONFLICT (tenant_id) DO UPDATE SET version = tenant_catalogs.version + 1
        "#,
    )
    .bind(tenant_id.as_uuid())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("bump_catalog_version", e))?;
    Ok(())
}

async fn append_audit(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    entries: Vec<stockroom_audit::NewTransaction>,
) -> Result<CommitReceipt, StoreError> {
    let mut receipt = CommitReceipt::default();
    if entries.is_empty() {
        return Ok(receipt);
    }

    let count = entries.len() as i64;
    let row = sqlx::query(
        r#"
        INSERT INTO tenant_log_heads (tenant_id, last_sequence) VALUES ($1, $2)
        ON CONFLICT (tenant_id) DO UPDATE
        SET last_sequence = tenant_log_heads.last_sequence + EXCLUDED.last_sequence
        RETURNING last_sequence
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(count)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("advance_log_head", e))?;

    let last: i64 = column(&row, "last_sequence")?;
    let mut next = as_u64(last - count + 1, "last_sequence")?;
    let recorded_at = Utc::now();

    for entry in entries {
        let details = serde_json::to_value(&entry.details)
            .map_err(|e| StoreError::Corrupt(format!("audit payload serialization failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO transactions (
                tenant_id, sequence, transaction_id, batch_id, transaction_type,
                actor_uid, actor_email, occurred_at, recorded_at, details
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(next as i64)
        .bind(entry.transaction_id.as_uuid())
        .bind(entry.batch_id.as_uuid())
        .bind(entry.transaction_type().label())
        .bind(&entry.actor.uid)
        .bind(&entry.actor.email)
        .bind(entry.occurred_at)
        .bind(recorded_at)
        .bind(&details)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;

        receipt.records.push(entry.into_record(next, recorded_at));
        next += 1;
    }

    Ok(receipt)
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn load_items(
        &self,
        tenant_id: TenantId,
        barcodes: &[Barcode],
    ) -> Result<Vec<Versioned<Item>>, StoreError> {
        if barcodes.is_empty() {
            return Ok(Vec::new());
        }
        self.select_items(tenant_id, barcodes).await
    }

    async fn load_all_items(&self, tenant_id: TenantId) -> Result<Vec<Versioned<Item>>, StoreError> {
        self.select_all_items(tenant_id).await
    }

    async fn load_catalog_version(&self, tenant_id: TenantId) -> Result<u64, StoreError> {
        self.select_catalog_version(tenant_id).await
    }

    async fn load_kit(
        &self,
        tenant_id: TenantId,
        name: &str,
    ) -> Result<Option<Versioned<KitDefinition>>, StoreError> {
        Ok(self.select_kits(tenant_id, Some(name)).await?.into_iter().next())
    }

    async fn list_kits(&self, tenant_id: TenantId) -> Result<Vec<Versioned<KitDefinition>>, StoreError> {
        self.select_kits(tenant_id, None).await
    }

    async fn load_log(&self, tenant_id: TenantId) -> Result<Vec<TransactionRecord>, StoreError> {
        self.select_log(tenant_id).await
    }

    async fn reserve_barcode_sequence(
        &self,
        tenant_id: TenantId,
        prefix: &str,
        count: u32,
    ) -> Result<u64, StoreError> {
        self.next_barcode_sequence(tenant_id, prefix, count).await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        self.commit_unit(changes).await
    }
}

// Row decoding

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("failed to read column {name}: {e}")))
}

fn as_u64(value: i64, name: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{name} is negative: {value}")))
}

fn as_u32(value: i64, name: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{name} out of range: {value}")))
}

fn barcode(raw: String) -> Result<Barcode, StoreError> {
    Barcode::parse(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn item_from_row(row: &PgRow) -> Result<Versioned<Item>, StoreError> {
    let version: i64 = column(row, "version")?;
    let loan_status: String = column(row, "loan_status")?;
    let location: Option<String> = column(row, "location")?;
    let last_type: Option<String> = column(row, "last_transaction_type")?;
    let last_transaction_type = match last_type {
        Some(label) => Some(
            TransactionType::parse(&label)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown transaction type '{label}'")))?,
        ),
        None => None,
    };

    let item = Item {
        barcode: barcode(column(row, "barcode")?)?,
        name: column(row, "name")?,
        total_stock: as_u32(column(row, "total_stock")?, "total_stock")?,
        current_stock: as_u32(column(row, "current_stock")?, "current_stock")?,
        damaged_stock: as_u32(column(row, "damaged_stock")?, "damaged_stock")?,
        loan_status: LoanStatus::parse(&loan_status).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        assigned_to: column(row, "assigned_to")?,
        is_kit: column(row, "is_kit")?,
        department: column(row, "department")?,
        room: column(row, "room")?,
        location: location.as_deref().and_then(Location::parse),
        last_transaction_type,
        last_transaction_by: column(row, "last_transaction_by")?,
        last_transaction_date: column::<Option<DateTime<Utc>>>(row, "last_transaction_date")?,
        created_at: column(row, "created_at")?,
    };
    Ok(Versioned::new(item, as_u64(version, "version")?))
}

fn kit_row_from_row(row: &PgRow) -> Result<(u64, KitComponentRow), StoreError> {
    let version: i64 = column(row, "version")?;
    let position: i32 = column(row, "position")?;
    let kit_barcode: Option<String> = column(row, "kit_barcode")?;

    let component = KitComponentRow {
        kit_name: column(row, "kit_name")?,
        kit_barcode: kit_barcode.map(barcode).transpose()?,
        kit_quantity: as_u32(column(row, "kit_quantity")?, "kit_quantity")?,
        position: as_u32(i64::from(position), "position")?,
        component_barcode: barcode(column(row, "component_barcode")?)?,
        component_name: column(row, "component_name")?,
        required_quantity: as_u32(column(row, "required_quantity")?, "required_quantity")?,
    };
    Ok((as_u64(version, "version")?, component))
}

fn record_from_row(row: &PgRow) -> Result<TransactionRecord, StoreError> {
    let sequence: i64 = column(row, "sequence")?;
    let details: serde_json::Value = column(row, "details")?;
    let details: TransactionDetails = serde_json::from_value(details)
        .map_err(|e| StoreError::Corrupt(format!("failed to decode audit payload: {e}")))?;
    let actor_uid: String = column(row, "actor_uid")?;
    let actor_email: String = column(row, "actor_email")?;

    Ok(TransactionRecord {
        transaction_id: TransactionId::from_uuid(column(row, "transaction_id")?),
        tenant_id: TenantId::from_uuid(column(row, "tenant_id")?),
        batch_id: BatchId::from_uuid(column(row, "batch_id")?),
        sequence: as_u64(sequence, "sequence")?,
        actor: Actor::new(actor_uid, actor_email),
        occurred_at: column(row, "occurred_at")?,
        recorded_at: column(row, "recorded_at")?,
        details,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation, serialization failure, deadlock
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                // Check constraint violation
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
