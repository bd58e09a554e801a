//! Postgres storage for ingested exports: pool setup, migrations and
//! batched replace-all writes. Report queries live in [`reports`].

use std::time::Duration;

use fitrep_core::{EntityKind, PackageRecord, SaleRecord, ServiceRecord};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::query_builder::Separated;
use sqlx::{Postgres, QueryBuilder};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use sqlx::PgPool;

pub mod reports;

pub const CRATE_NAME: &str = "fitrep-storage";

/// Rows per `INSERT` statement.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Postgres accepts at most this many bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = u16::MAX as usize;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

pub async fn connect(database_url: &str, config: &PoolConfig) -> StorageResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Pool that opens connections on first use.
pub fn connect_lazy(database_url: &str, config: &PoolConfig) -> StorageResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_lazy(database_url)?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> StorageResult<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// A record that maps onto one full-replace table.
pub trait TableRecord: Send + Sync {
    const KIND: EntityKind;
    const COLUMNS: &'static [&'static str];

    fn push_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>);
}

impl TableRecord for ServiceRecord {
    const KIND: EntityKind = EntityKind::Services;
    const COLUMNS: &'static [&'static str] = &[
        "id", "name", "division", "trainer", "client", "basis", "comment", "datetime", "price",
    ];

    fn push_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.id.clone())
            .push_bind(self.name.clone())
            .push_bind(self.division.clone())
            .push_bind(self.trainer.clone())
            .push_bind(self.client.clone())
            .push_bind(self.basis.clone())
            .push_bind(self.comment.clone())
            .push_bind(self.datetime)
            .push_bind(self.price);
    }
}

impl TableRecord for SaleRecord {
    const KIND: EntityKind = EntityKind::Sales;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "datetime",
        "division",
        "name",
        "client",
        "author",
        "trainer",
        "type",
        "order_count",
        "order_price",
        "refund_count",
        "refund_price",
        "final_price",
    ];

    fn push_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.id.clone())
            .push_bind(self.datetime)
            .push_bind(self.division.clone())
            .push_bind(self.name.clone())
            .push_bind(self.client.clone())
            .push_bind(self.author.clone())
            .push_bind(self.trainer.clone())
            .push_bind(self.sale_type.clone())
            .push_bind(self.order_count)
            .push_bind(self.order_price)
            .push_bind(self.refund_count)
            .push_bind(self.refund_price)
            .push_bind(self.final_price);
    }
}

impl TableRecord for PackageRecord {
    const KIND: EntityKind = EntityKind::Packages;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "date_sale",
        "date_activation",
        "date_closing",
        "name",
        "division",
        "comment",
        "client",
        "client_birthday",
        "client_phone",
        "trainer",
        "price",
        "count",
        "date_prodl",
        "status",
    ];

    fn push_row(&self, row: &mut Separated<'_, '_, Postgres, &'static str>) {
        row.push_bind(self.id.clone())
            .push_bind(self.date_sale)
            .push_bind(self.date_activation)
            .push_bind(self.date_closing)
            .push_bind(self.name.clone())
            .push_bind(self.division.clone())
            .push_bind(self.comment.clone())
            .push_bind(self.client.clone())
            .push_bind(self.client_birthday)
            .push_bind(self.client_phone.clone())
            .push_bind(self.trainer.clone())
            .push_bind(self.price)
            .push_bind(self.count)
            .push_bind(self.date_prodl)
            .push_bind(self.status.clone());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub deleted: u64,
    pub inserted: u64,
    /// Rows dropped by the `id` uniqueness constraint.
    pub skipped: u64,
}

/// Requested batch size, clamped to 1..=rows that fit in one statement.
pub fn effective_batch_size<R: TableRecord>(requested: usize) -> usize {
    requested.clamp(1, MAX_BIND_PARAMS / R::COLUMNS.len())
}

fn insert_prefix<R: TableRecord>() -> String {
    format!(
        "INSERT INTO {} ({}) ",
        R::KIND.table(),
        R::COLUMNS.join(", ")
    )
}

/// Delete every row of the record's table, then insert `records` in
/// batches. Duplicate ids are skipped, not errors.
///
/// Not transactional: readers can observe the emptied table while the
/// batches are being written.
pub async fn replace_all<R: TableRecord>(
    pool: &PgPool,
    records: &[R],
    batch_size: usize,
) -> StorageResult<ReplaceSummary> {
    let table = R::KIND.table();
    let deleted = sqlx::query(&format!("DELETE FROM {table}"))
        .execute(pool)
        .await?
        .rows_affected();
    info!(table, deleted, "cleared table");

    let mut summary = ReplaceSummary {
        deleted,
        ..Default::default()
    };
    let requested = batch_size;
    let batch_size = effective_batch_size::<R>(requested);
    if batch_size < requested {
        warn!(table, requested, batch_size, "batch size exceeds bind parameter limit, clamping");
    }
    for (idx, chunk) in records.chunks(batch_size).enumerate() {
        let first = idx * batch_size + 1;
        debug!(
            table,
            "inserting rows {}-{} / {}",
            first,
            first + chunk.len() - 1,
            records.len()
        );
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(insert_prefix::<R>());
        qb.push_values(chunk.iter(), |mut row, record| record.push_row(&mut row));
        qb.push(" ON CONFLICT (id) DO NOTHING");
        let inserted = qb.build().execute(pool).await?.rows_affected();
        summary.inserted += inserted;
        summary.skipped += chunk.len() as u64 - inserted;
    }
    Ok(summary)
}

pub async fn count_rows(pool: &PgPool, kind: EntityKind) -> StorageResult<i64> {
    let count: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", kind.table()))
        .fetch_one(pool)
        .await?;
    Ok(count.0)
}
