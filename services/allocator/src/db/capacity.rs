//! Postgres-backed capacity ledger.

use async_trait::async_trait;
use hostalloc_id::HostId;
use hostalloc_messages::CpuMemoryCapacity;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::DbError;
use crate::ledger::{CapacityStore, HostCapacity, LedgerError};

const SELECT_COLUMNS: &str =
    "host_id, total_cpu, available_cpu, total_memory, available_memory";

#[derive(Clone)]
pub struct PgCapacityStore {
    pool: PgPool,
}

fn capacity_from_row(row: &PgRow) -> Result<HostCapacity, DbError> {
    let raw_id: String = row.try_get("host_id")?;
    let host_id = raw_id
        .parse::<HostId>()
        .map_err(|e| DbError::corrupt("host_capacity", "host_id", &raw_id, e))?;

    Ok(HostCapacity {
        host_id,
        total_cpu: row.try_get("total_cpu")?,
        available_cpu: row.try_get("available_cpu")?,
        total_memory: row.try_get("total_memory")?,
        available_memory: row.try_get("available_memory")?,
    })
}

impl PgCapacityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_row(&self, capacity: &HostCapacity) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO host_capacity (
                host_id, total_cpu, available_cpu, total_memory, available_memory, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (host_id) DO UPDATE SET
                total_cpu = EXCLUDED.total_cpu,
                available_cpu = EXCLUDED.available_cpu,
                total_memory = EXCLUDED.total_memory,
                available_memory = EXCLUDED.available_memory,
                updated_at = now()
            "#,
        )
        .bind(capacity.host_id.to_string())
        .bind(capacity.total_cpu)
        .bind(capacity.available_cpu)
        .bind(capacity.total_memory)
        .bind(capacity.available_memory)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_row(&self, host_id: &HostId) -> Result<Option<HostCapacity>, DbError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM host_capacity WHERE host_id = $1"
        ))
        .bind(host_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(capacity_from_row).transpose()
    }

    /// Runs in its own transaction with the row locked `FOR UPDATE`, so it
    /// commits regardless of what the caller does next and concurrent
    /// returns to one host serialize.
    async fn add_returned(
        &self,
        host_id: &HostId,
        cpu: i64,
        memory: i64,
    ) -> Result<Option<HostCapacity>, DbError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM host_capacity WHERE host_id = $1 FOR UPDATE"
        ))
        .bind(host_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let updated = capacity_from_row(&row)?.with_returned(cpu, memory);

        sqlx::query(
            r#"
            UPDATE host_capacity
            SET available_cpu = $2, available_memory = $3, updated_at = now()
            WHERE host_id = $1
            "#,
        )
        .bind(host_id.to_string())
        .bind(updated.available_cpu)
        .bind(updated.available_memory)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn sum_rows(&self, host_ids: &[HostId]) -> Result<CpuMemoryCapacity, DbError> {
        let ids: Vec<String> = host_ids.iter().map(ToString::to_string).collect();

        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(total_cpu), 0)::BIGINT AS total_cpu,
                COALESCE(SUM(available_cpu), 0)::BIGINT AS available_cpu,
                COALESCE(SUM(total_memory), 0)::BIGINT AS total_memory,
                COALESCE(SUM(available_memory), 0)::BIGINT AS available_memory
            FROM host_capacity
            WHERE host_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_one(&self.pool)
        .await?;

        Ok(CpuMemoryCapacity {
            total_cpu: row.try_get("total_cpu")?,
            available_cpu: row.try_get("available_cpu")?,
            total_memory: row.try_get("total_memory")?,
            available_memory: row.try_get("available_memory")?,
        })
    }

    async fn all_rows(&self) -> Result<Vec<HostCapacity>, DbError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM host_capacity ORDER BY host_id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(capacity_from_row).collect()
    }
}

#[async_trait]
impl CapacityStore for PgCapacityStore {
    #[instrument(skip(self, capacity), fields(host_id = %capacity.host_id))]
    async fn upsert(&self, capacity: HostCapacity) -> Result<(), LedgerError> {
        Ok(self.write_row(&capacity).await?)
    }

    async fn get(&self, host_id: &HostId) -> Result<Option<HostCapacity>, LedgerError> {
        Ok(self.read_row(host_id).await?)
    }

    #[instrument(skip(self))]
    async fn return_capacity(
        &self,
        host_id: &HostId,
        cpu: i64,
        memory: i64,
    ) -> Result<Option<HostCapacity>, LedgerError> {
        Ok(self.add_returned(host_id, cpu, memory).await?)
    }

    async fn sum(&self, host_ids: &[HostId]) -> Result<CpuMemoryCapacity, LedgerError> {
        Ok(self.sum_rows(host_ids).await?)
    }

    async fn list(&self) -> Result<Vec<HostCapacity>, LedgerError> {
        Ok(self.all_rows().await?)
    }
}
