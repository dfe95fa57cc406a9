//! Reservation totals read from `host_capacity_reservations`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use super::DbError;
use crate::capacity::{CapacityScope, ReservationError, ReservationGateway, ReservedCapacity};

#[derive(Clone)]
pub struct PgReservationGateway {
    pool: PgPool,
}

impl PgReservationGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn sum_reserved(&self, scope: &CapacityScope) -> Result<ReservedCapacity, DbError> {
        let (filter, ids): (&str, Vec<String>) = match scope {
            CapacityScope::Hosts(ids) => (
                "r.host_id = ANY($1)",
                ids.iter().map(ToString::to_string).collect(),
            ),
            CapacityScope::Clusters(ids) => (
                "h.cluster_id = ANY($1)",
                ids.iter().map(ToString::to_string).collect(),
            ),
            CapacityScope::Zones(ids) => (
                "h.zone_id = ANY($1)",
                ids.iter().map(ToString::to_string).collect(),
            ),
        };

        let row = sqlx::query(&format!(
            r#"
            SELECT
                COALESCE(SUM(r.reserved_cpu), 0)::BIGINT AS reserved_cpu,
                COALESCE(SUM(r.reserved_memory), 0)::BIGINT AS reserved_memory
            FROM host_capacity_reservations r
            LEFT JOIN hosts h ON h.host_id = r.host_id
            WHERE {filter}
            "#
        ))
        .bind(&ids)
        .fetch_one(&self.pool)
        .await?;

        let reserved = ReservedCapacity {
            reserved_cpu: row.try_get("reserved_cpu")?,
            reserved_memory: row.try_get("reserved_memory")?,
        };
        debug!(
            scope = scope.kind(),
            reserved_cpu = reserved.reserved_cpu,
            reserved_memory = reserved.reserved_memory,
            "Loaded reservations"
        );
        Ok(reserved)
    }
}

#[async_trait]
impl ReservationGateway for PgReservationGateway {
    async fn reserved_capacity(
        &self,
        scope: &CapacityScope,
    ) -> Result<ReservedCapacity, ReservationError> {
        Ok(self.sum_reserved(scope).await?)
    }
}
