//! Postgres-backed inventory store.
//!
//! Schema: `crates/infra/migrations/0001_inventory.sql`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError | Scenario |
//! |------------|-----------------|------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Two commits produced the same `(instance, version)` movement |
//! | Database (foreign key violation) | `23503` | `NotFound` | Unknown equipment type, warehouse or client |
//! | Database (check violation) | `23514` | `Backend` | Row failed a schema invariant |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / Other | N/A | `Backend` | Network errors, connection failures, etc. |
//!
//! Serial/IMEI collisions never surface as `23505`: instance inserts use
//! `ON CONFLICT DO NOTHING` and report every skipped row as `Duplicate`.
//!
//! ## Concurrency
//!
//! Instance writes lock the row (`SELECT ... FOR UPDATE`), compare the stored
//! version with the caller's expectation, then update with
//! `WHERE version = $expected`. The movement insert shares the transaction.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use equiptrack_core::{
    ActorId, AggregateRoot, ClientId, EquipmentTypeId, ExpectedVersion, InstanceId, MovementId,
    ServiceOrderId, WarehouseId,
};
use equiptrack_inventory::{
    EquipmentCatalogEntry, EquipmentInstance, InstanceRecord, InstanceState, MovementType,
    StockMovement, UncommittedMovement,
};

use super::query::{InstanceFilter, MovementFilter, Page, Pagination};
use super::r#trait::{InventoryStore, StoreError};
use crate::config::DatabaseConfig;
use crate::reference::ReferenceData;

const SCHEMA: &str = include_str!("../../migrations/0001_inventory.sql");

const INSTANCE_COLUMNS: &str = r#"
    id, equipment_type_id, serial_number, imei, status, condition,
    location_warehouse_id, assigned_client_id, installation_date, warranty_expiry,
    last_maintenance_at, created_at, updated_at, deleted_at, version
"#;

const MOVEMENT_COLUMNS: &str = r#"
    id, sequence, equipment_instance_id, movement_type, quantity,
    from_warehouse_id, to_warehouse_id, client_id, service_order_id, reason,
    performed_by, previous_status, resulting_status, resulting_warehouse_id,
    resulting_client_id, instance_version, created_at
"#;

const MOVEMENT_WHERE: &str = r#"
    ($1::uuid IS NULL OR equipment_instance_id = $1)
    AND ($2::uuid IS NULL OR from_warehouse_id = $2 OR to_warehouse_id = $2)
    AND ($3::uuid IS NULL OR client_id = $3)
    AND ($4::text IS NULL OR movement_type = $4)
    AND ($5::timestamptz IS NULL OR created_at >= $5)
    AND ($6::timestamptz IS NULL OR created_at <= $6)
"#;

const INSTANCE_WHERE: &str = r#"
    ($1::uuid IS NULL OR equipment_type_id = $1)
    AND ($2::text IS NULL OR status = $2)
    AND ($3::uuid IS NULL OR location_warehouse_id = $3)
    AND ($4::uuid IS NULL OR assigned_client_id = $4)
    AND ($5 OR deleted_at IS NULL)
"#;

/// Open a connection pool from configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| StoreError::Backend("database.url is not configured".to_string()))?;

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Postgres-backed registry + ledger storage.
///
/// `Send + Sync`; the SQLx pool handles connection sharing. The synchronous
/// [`InventoryStore`] impl must be driven from inside a multi-threaded tokio
/// runtime.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables, indexes and the append-only trigger if missing.
    #[instrument(skip(self), err)]
    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
        Ok(())
    }

    /// Insert-if-absent for a batch of instances plus their accompanying movements.
    #[instrument(
        skip(self, instances, movements),
        fields(
            instance_count = instances.len(),
            movement_count = movements.len(),
            committed_movements = tracing::field::Empty
        ),
        err
    )]
    pub async fn insert_batch(
        &self,
        instances: Vec<EquipmentInstance>,
        movements: Vec<UncommittedMovement>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut collisions = Vec::new();
        for instance in &instances {
            let sql = format!(
                "INSERT INTO equipment_instances ({INSTANCE_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                 ON CONFLICT DO NOTHING
                 RETURNING id"
            );
            let inserted = bind_instance(sqlx::query(&sql), instance)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_instance", e))?;
            if inserted.is_none() {
                collisions.push(instance.serial_number().to_string());
            }
        }

        if !collisions.is_empty() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Duplicate { serials: collisions });
        }

        let mut committed = Vec::with_capacity(movements.len());
        for movement in movements {
            committed.push(insert_movement(&mut tx, movement).await?);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("committed_movements", committed.len());
        Ok(committed)
    }

    #[instrument(skip(self), fields(instance_id = %id), err)]
    pub async fn fetch_instance(&self, id: InstanceId) -> Result<Option<EquipmentInstance>, StoreError> {
        let sql = format!("SELECT {INSTANCE_COLUMNS} FROM equipment_instances WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_instance", e))?;

        row.map(|row| instance_from_row(&row)).transpose()
    }

    #[instrument(
        skip(self, instance),
        fields(instance_id = %instance.id(), expected_version = ?expected_version),
        err
    )]
    pub async fn store_instance(
        &self,
        instance: &EquipmentInstance,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = lock_instance_version(&mut tx, instance.id(), expected_version).await?;
        write_instance(&mut tx, instance, current).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    /// Append one movement and update its instance in one transaction.
    #[instrument(
        skip(self, movement, instance),
        fields(
            instance_id = %instance.id(),
            movement_type = %movement.movement_type,
            expected_version = ?expected_version,
            sequence = tracing::field::Empty
        ),
        err
    )]
    pub async fn append_movement(
        &self,
        movement: UncommittedMovement,
        instance: &EquipmentInstance,
        expected_version: ExpectedVersion,
    ) -> Result<StockMovement, StoreError> {
        if movement.equipment_instance_id != instance.id() {
            return Err(StoreError::Backend(format!(
                "movement {} targets instance {}, not {}",
                movement.id,
                movement.equipment_instance_id,
                instance.id()
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = lock_instance_version(&mut tx, instance.id(), expected_version).await?;
        write_instance(&mut tx, instance, current).await?;
        let committed = insert_movement(&mut tx, movement).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("sequence", committed.sequence);
        Ok(committed)
    }

    #[instrument(skip(self), fields(movement_id = %id), err)]
    pub async fn fetch_movement(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_movement", e))?;

        row.map(|row| movement_from_row(&row)).transpose()
    }

    #[instrument(skip(self), fields(instance_id = %instance_id), err)]
    pub async fn fetch_latest_movement(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements
             WHERE equipment_instance_id = $1
             ORDER BY sequence DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::from(instance_id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("latest_movement", e))?;

        row.map(|row| movement_from_row(&row)).transpose()
    }

    #[instrument(skip(self), fields(instance_id = %instance_id), err)]
    pub async fn fetch_instance_movements(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements
             WHERE equipment_instance_id = $1
             ORDER BY sequence ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(Uuid::from(instance_id))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("instance_movements", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn search_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<StockMovement>, StoreError> {
        let count_sql = format!("SELECT COUNT(*) AS total FROM stock_movements WHERE {MOVEMENT_WHERE}");
        let count_row = bind_movement_filter(sqlx::query(&count_sql), filter)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_movements", e))?;
        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| StoreError::Backend(format!("failed to read count: {e}")))?;

        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements
             WHERE {MOVEMENT_WHERE}
             ORDER BY created_at DESC, sequence DESC
             LIMIT $7 OFFSET $8"
        );
        let rows = bind_movement_filter(sqlx::query(&sql), filter)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_movements", e))?;

        let items = rows.iter().map(movement_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total as u64, pagination))
    }

    #[instrument(skip(self), err)]
    pub async fn count_movements(
        &self,
        filter: &MovementFilter,
    ) -> Result<Vec<(MovementType, u64)>, StoreError> {
        let sql = format!(
            "SELECT movement_type, COUNT(*) AS n FROM stock_movements
             WHERE {MOVEMENT_WHERE}
             GROUP BY movement_type"
        );
        let rows = bind_movement_filter(sqlx::query(&sql), filter)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("movement_counts", e))?;

        rows.iter()
            .map(|row| {
                let ty: String = row.try_get("movement_type").map_err(decode_error)?;
                let n: i64 = row.try_get("n").map_err(decode_error)?;
                Ok((parse_column(&ty)?, n as u64))
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    pub async fn search_instances(
        &self,
        filter: &InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<EquipmentInstance>, StoreError> {
        let count_sql = format!("SELECT COUNT(*) AS total FROM equipment_instances WHERE {INSTANCE_WHERE}");
        let count_row = bind_instance_filter(sqlx::query(&count_sql), filter)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_instances", e))?;
        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| StoreError::Backend(format!("failed to read count: {e}")))?;

        let sql = format!(
            "SELECT {INSTANCE_COLUMNS} FROM equipment_instances
             WHERE {INSTANCE_WHERE}
             ORDER BY serial_number ASC, id ASC
             LIMIT $6 OFFSET $7"
        );
        let rows = bind_instance_filter(sqlx::query(&sql), filter)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_instances", e))?;

        let items = rows.iter().map(instance_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total as u64, pagination))
    }

    #[instrument(skip(self), fields(equipment_type_id = %equipment_type_id), err)]
    pub async fn fetch_instances_of_type(
        &self,
        equipment_type_id: EquipmentTypeId,
    ) -> Result<Vec<EquipmentInstance>, StoreError> {
        let sql = format!(
            "SELECT {INSTANCE_COLUMNS} FROM equipment_instances
             WHERE equipment_type_id = $1 AND deleted_at IS NULL"
        );
        let rows = sqlx::query(&sql)
            .bind(Uuid::from(equipment_type_id))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("instances_of_type", e))?;

        rows.iter().map(instance_from_row).collect()
    }
}

/// Drive an async store call from the synchronous trait.
fn run<T>(fut: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Backend(
            "PostgresInventoryStore requires a tokio runtime; call it from within a runtime context"
                .to_string(),
        )
    })?;
    // block_in_place panics on a current-thread runtime.
    if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::CurrentThread {
        return Err(StoreError::Backend(
            "PostgresInventoryStore requires a multi-threaded tokio runtime".to_string(),
        ));
    }
    tokio::task::block_in_place(|| handle.block_on(fut))
}

impl InventoryStore for PostgresInventoryStore {
    fn insert_instances(
        &self,
        instances: Vec<EquipmentInstance>,
        movements: Vec<UncommittedMovement>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        run(self.insert_batch(instances, movements))
    }

    fn load_instance(&self, id: InstanceId) -> Result<Option<EquipmentInstance>, StoreError> {
        run(self.fetch_instance(id))
    }

    fn update_instance(
        &self,
        instance: &EquipmentInstance,
        expected_version: ExpectedVersion,
    ) -> Result<(), StoreError> {
        run(self.store_instance(instance, expected_version))
    }

    fn commit_movement(
        &self,
        movement: UncommittedMovement,
        instance: &EquipmentInstance,
        expected_version: ExpectedVersion,
    ) -> Result<StockMovement, StoreError> {
        run(self.append_movement(movement, instance, expected_version))
    }

    fn load_movement(&self, id: MovementId) -> Result<Option<StockMovement>, StoreError> {
        run(self.fetch_movement(id))
    }

    fn latest_movement(&self, instance_id: InstanceId) -> Result<Option<StockMovement>, StoreError> {
        run(self.fetch_latest_movement(instance_id))
    }

    fn instance_movements(&self, instance_id: InstanceId) -> Result<Vec<StockMovement>, StoreError> {
        run(self.fetch_instance_movements(instance_id))
    }

    fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<StockMovement>, StoreError> {
        run(self.search_movements(filter, pagination))
    }

    fn movement_counts(&self, filter: &MovementFilter) -> Result<Vec<(MovementType, u64)>, StoreError> {
        run(self.count_movements(filter))
    }

    fn query_instances(
        &self,
        filter: &InstanceFilter,
        pagination: Pagination,
    ) -> Result<Page<EquipmentInstance>, StoreError> {
        run(self.search_instances(filter, pagination))
    }

    fn instances_of_type(
        &self,
        equipment_type_id: EquipmentTypeId,
    ) -> Result<Vec<EquipmentInstance>, StoreError> {
        run(self.fetch_instances_of_type(equipment_type_id))
    }
}

/// Reference tables (`equipment_types`, `warehouses`, `clients`) read from Postgres.
#[derive(Debug, Clone)]
pub struct PostgresReferenceData {
    pool: Arc<PgPool>,
}

impl PostgresReferenceData {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn fetch_catalog_entry(
        &self,
        id: EquipmentTypeId,
    ) -> Result<Option<EquipmentCatalogEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, category, subcategory, price, minimum_stock, critical_stock
            FROM equipment_types
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("catalog_entry", e))?;

        row.map(|row| {
            let row = CatalogRow::from_row(&row).map_err(decode_error)?;
            Ok(EquipmentCatalogEntry {
                id: EquipmentTypeId::from_uuid(row.id),
                name: row.name,
                category: row.category,
                subcategory: row.subcategory,
                price: row.price.max(0) as u64,
                minimum_stock: row.minimum_stock.max(0) as u32,
                critical_stock: row.critical_stock.max(0) as u32,
            })
        })
        .transpose()
    }

    async fn exists(&self, table: &'static str, id: Uuid) -> Result<bool, StoreError> {
        let sql = format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1) AS found");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(table, e))?;
        row.try_get("found").map_err(decode_error)
    }
}

impl ReferenceData for PostgresReferenceData {
    fn catalog_entry(&self, id: EquipmentTypeId) -> Result<Option<EquipmentCatalogEntry>, StoreError> {
        run(self.fetch_catalog_entry(id))
    }

    fn warehouse_exists(&self, id: WarehouseId) -> Result<bool, StoreError> {
        run(self.exists("warehouses", id.into()))
    }

    fn client_exists(&self, id: ClientId) -> Result<bool, StoreError> {
        run(self.exists("clients", id.into()))
    }
}

/// Lock the instance row and check the caller's version expectation.
async fn lock_instance_version(
    tx: &mut Transaction<'_, Postgres>,
    id: InstanceId,
    expected_version: ExpectedVersion,
) -> Result<u64, StoreError> {
    let row = sqlx::query("SELECT version FROM equipment_instances WHERE id = $1 FOR UPDATE")
        .bind(Uuid::from(id))
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_instance", e))?
        .ok_or_else(|| StoreError::NotFound(format!("instance {id}")))?;

    let version: i64 = row.try_get("version").map_err(decode_error)?;
    let version = version as u64;
    if !expected_version.matches(version) {
        return Err(StoreError::Concurrency(format!(
            "instance {id}: expected {expected_version:?}, found {version}"
        )));
    }
    Ok(version)
}

async fn write_instance(
    tx: &mut Transaction<'_, Postgres>,
    instance: &EquipmentInstance,
    current_version: u64,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE equipment_instances SET
            status = $2,
            condition = $3,
            location_warehouse_id = $4,
            assigned_client_id = $5,
            installation_date = $6,
            last_maintenance_at = $7,
            updated_at = $8,
            deleted_at = $9,
            version = $10
        WHERE id = $1 AND version = $11
        "#,
    )
    .bind(Uuid::from(instance.id()))
    .bind(instance.status().as_str())
    .bind(instance.condition().as_str())
    .bind(instance.location_warehouse_id().map(Uuid::from))
    .bind(instance.assigned_client_id().map(Uuid::from))
    .bind(instance.installation_date())
    .bind(instance.last_maintenance_at())
    .bind(instance.updated_at())
    .bind(instance.deleted_at())
    .bind(instance.version() as i64)
    .bind(current_version as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_instance", e))?;

    if result.rows_affected() != 1 {
        return Err(StoreError::Concurrency(format!(
            "instance {} changed while it was locked",
            instance.id()
        )));
    }
    Ok(())
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    movement: UncommittedMovement,
) -> Result<StockMovement, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, equipment_instance_id, movement_type, quantity,
            from_warehouse_id, to_warehouse_id, client_id, service_order_id, reason,
            performed_by, previous_status, resulting_status, resulting_warehouse_id,
            resulting_client_id, instance_version, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        RETURNING sequence
        "#,
    )
    .bind(Uuid::from(movement.id))
    .bind(Uuid::from(movement.equipment_instance_id))
    .bind(movement.movement_type.as_str())
    .bind(movement.quantity as i32)
    .bind(movement.from_warehouse_id.map(Uuid::from))
    .bind(movement.to_warehouse_id.map(Uuid::from))
    .bind(movement.client_id.map(Uuid::from))
    .bind(movement.service_order_id.map(Uuid::from))
    .bind(&movement.reason)
    .bind(Uuid::from(movement.performed_by))
    .bind(movement.previous_status.as_str())
    .bind(movement.resulting.status.as_str())
    .bind(movement.resulting.location_warehouse_id.map(Uuid::from))
    .bind(movement.resulting.assigned_client_id.map(Uuid::from))
    .bind(movement.instance_version as i64)
    .bind(movement.created_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;

    let sequence: i64 = row.try_get("sequence").map_err(decode_error)?;
    Ok(movement.commit(sequence as u64))
}

fn bind_instance<'q>(
    query: Query<'q, Postgres, PgArguments>,
    instance: &'q EquipmentInstance,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(Uuid::from(instance.id()))
        .bind(Uuid::from(instance.equipment_type_id()))
        .bind(instance.serial_number())
        .bind(instance.imei())
        .bind(instance.status().as_str())
        .bind(instance.condition().as_str())
        .bind(instance.location_warehouse_id().map(Uuid::from))
        .bind(instance.assigned_client_id().map(Uuid::from))
        .bind(instance.installation_date())
        .bind(instance.warranty_expiry())
        .bind(instance.last_maintenance_at())
        .bind(instance.created_at())
        .bind(instance.updated_at())
        .bind(instance.deleted_at())
        .bind(instance.version() as i64)
}

fn bind_movement_filter<'q>(
    query: Query<'q, Postgres, PgArguments>,
    filter: &MovementFilter,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(filter.instance_id.map(Uuid::from))
        .bind(filter.warehouse_id.map(Uuid::from))
        .bind(filter.client_id.map(Uuid::from))
        .bind(filter.movement_type.map(|t| t.as_str()))
        .bind(filter.created_after)
        .bind(filter.created_before)
}

fn bind_instance_filter<'q>(
    query: Query<'q, Postgres, PgArguments>,
    filter: &InstanceFilter,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(filter.equipment_type_id.map(Uuid::from))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.warehouse_id.map(Uuid::from))
        .bind(filter.client_id.map(Uuid::from))
        .bind(filter.include_retired)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Concurrency(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

fn parse_column<T>(value: &str) -> Result<T, StoreError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StoreError::Backend(format!("corrupt column value '{value}': {e}")))
}

// SQLx row types

#[derive(Debug)]
struct InstanceRow {
    id: Uuid,
    equipment_type_id: Uuid,
    serial_number: String,
    imei: Option<String>,
    status: String,
    condition: String,
    location_warehouse_id: Option<Uuid>,
    assigned_client_id: Option<Uuid>,
    installation_date: Option<DateTime<Utc>>,
    warranty_expiry: Option<NaiveDate>,
    last_maintenance_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for InstanceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InstanceRow {
            id: row.try_get("id")?,
            equipment_type_id: row.try_get("equipment_type_id")?,
            serial_number: row.try_get("serial_number")?,
            imei: row.try_get("imei")?,
            status: row.try_get("status")?,
            condition: row.try_get("condition")?,
            location_warehouse_id: row.try_get("location_warehouse_id")?,
            assigned_client_id: row.try_get("assigned_client_id")?,
            installation_date: row.try_get("installation_date")?,
            warranty_expiry: row.try_get("warranty_expiry")?,
            last_maintenance_at: row.try_get("last_maintenance_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<InstanceRow> for EquipmentInstance {
    type Error = StoreError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        let record = InstanceRecord {
            id: InstanceId::from_uuid(row.id),
            equipment_type_id: EquipmentTypeId::from_uuid(row.equipment_type_id),
            serial_number: row.serial_number,
            imei: row.imei,
            status: parse_column(&row.status)?,
            condition: parse_column(&row.condition)?,
            location_warehouse_id: row.location_warehouse_id.map(WarehouseId::from_uuid),
            assigned_client_id: row.assigned_client_id.map(ClientId::from_uuid),
            installation_date: row.installation_date,
            warranty_expiry: row.warranty_expiry,
            last_maintenance_at: row.last_maintenance_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
            version: row.version.max(0) as u64,
        };
        EquipmentInstance::try_from(record)
            .map_err(|e| StoreError::Backend(format!("stored instance {} is invalid: {e}", row.id)))
    }
}

fn instance_from_row(row: &PgRow) -> Result<EquipmentInstance, StoreError> {
    InstanceRow::from_row(row).map_err(decode_error)?.try_into()
}

#[derive(Debug)]
struct MovementRow {
    id: Uuid,
    sequence: i64,
    equipment_instance_id: Uuid,
    movement_type: String,
    quantity: i32,
    from_warehouse_id: Option<Uuid>,
    to_warehouse_id: Option<Uuid>,
    client_id: Option<Uuid>,
    service_order_id: Option<Uuid>,
    reason: String,
    performed_by: Uuid,
    previous_status: String,
    resulting_status: String,
    resulting_warehouse_id: Option<Uuid>,
    resulting_client_id: Option<Uuid>,
    instance_version: i64,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            sequence: row.try_get("sequence")?,
            equipment_instance_id: row.try_get("equipment_instance_id")?,
            movement_type: row.try_get("movement_type")?,
            quantity: row.try_get("quantity")?,
            from_warehouse_id: row.try_get("from_warehouse_id")?,
            to_warehouse_id: row.try_get("to_warehouse_id")?,
            client_id: row.try_get("client_id")?,
            service_order_id: row.try_get("service_order_id")?,
            reason: row.try_get("reason")?,
            performed_by: row.try_get("performed_by")?,
            previous_status: row.try_get("previous_status")?,
            resulting_status: row.try_get("resulting_status")?,
            resulting_warehouse_id: row.try_get("resulting_warehouse_id")?,
            resulting_client_id: row.try_get("resulting_client_id")?,
            instance_version: row.try_get("instance_version")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(StockMovement {
            id: MovementId::from_uuid(row.id),
            sequence: row.sequence as u64,
            equipment_instance_id: InstanceId::from_uuid(row.equipment_instance_id),
            movement_type: parse_column(&row.movement_type)?,
            quantity: row.quantity.max(0) as u32,
            from_warehouse_id: row.from_warehouse_id.map(WarehouseId::from_uuid),
            to_warehouse_id: row.to_warehouse_id.map(WarehouseId::from_uuid),
            client_id: row.client_id.map(ClientId::from_uuid),
            service_order_id: row.service_order_id.map(ServiceOrderId::from_uuid),
            reason: row.reason,
            performed_by: ActorId::from_uuid(row.performed_by),
            previous_status: parse_column(&row.previous_status)?,
            resulting: InstanceState {
                status: parse_column(&row.resulting_status)?,
                location_warehouse_id: row.resulting_warehouse_id.map(WarehouseId::from_uuid),
                assigned_client_id: row.resulting_client_id.map(ClientId::from_uuid),
            },
            instance_version: row.instance_version as u64,
            created_at: row.created_at,
        })
    }
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    MovementRow::from_row(row).map_err(decode_error)?.try_into()
}

#[derive(Debug)]
struct CatalogRow {
    id: Uuid,
    name: String,
    category: String,
    subcategory: Option<String>,
    price: i64,
    minimum_stock: i32,
    critical_stock: i32,
}

impl<'r> FromRow<'r, PgRow> for CatalogRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CatalogRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            category: row.try_get("category")?,
            subcategory: row.try_get("subcategory")?,
            price: row.try_get("price")?,
            minimum_stock: row.try_get("minimum_stock")?,
            critical_stock: row.try_get("critical_stock")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use equiptrack_inventory::InstanceStatus;

    use super::*;

    #[test]
    fn closed_pool_is_a_backend_error() {
        let err = map_sqlx_error("load_instance", sqlx::Error::PoolClosed);
        assert_eq!(err, StoreError::Backend("connection pool closed in load_instance".to_string()));
    }

    #[test]
    fn corrupt_enum_columns_are_reported() {
        let err = parse_column::<InstanceStatus>("on_loan").unwrap_err();
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("on_loan")));
        assert_eq!(parse_column::<InstanceStatus>("installed").unwrap(), InstanceStatus::Installed);
    }

    #[test]
    fn sync_calls_outside_a_runtime_fail_cleanly() {
        let err = run(async { Ok::<_, StoreError>(()) }).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn sync_calls_on_a_current_thread_runtime_fail_cleanly() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = runtime
            .block_on(async { run(async { Ok::<_, StoreError>(()) }) })
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Backend("PostgresInventoryStore requires a multi-threaded tokio runtime".to_string())
        );
    }
}
