//! Host topology read from the `hosts` table.

use std::collections::HashMap;

use async_trait::async_trait;
use hostalloc_id::{ClusterId, HostId, ZoneId};
use sqlx::{PgPool, Row};

use super::DbError;
use crate::capacity::{HostPlacement, HostTopology, TopologyError};

#[derive(Clone)]
pub struct PgHostTopology {
    pool: PgPool,
}

fn parse_column<T>(column: &'static str, raw: &str) -> Result<T, DbError>
where
    T: std::str::FromStr,
    T::Err: ToString,
{
    raw.parse().map_err(|e| DbError::corrupt("hosts", column, raw, e))
}

impl PgHostTopology {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn hosts_where(&self, column: &str, ids: Vec<String>) -> Result<Vec<HostId>, DbError> {
        let rows: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT host_id FROM hosts WHERE {column} = ANY($1) ORDER BY host_id"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|raw| parse_column("host_id", raw)).collect()
    }

    async fn placement_rows(
        &self,
        host_ids: &[HostId],
    ) -> Result<HashMap<HostId, HostPlacement>, DbError> {
        let ids: Vec<String> = host_ids.iter().map(ToString::to_string).collect();
        let rows = sqlx::query(
            "SELECT host_id, cluster_id, zone_id FROM hosts WHERE host_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut placements = HashMap::with_capacity(rows.len());
        for row in rows {
            let host_id: String = row.try_get("host_id")?;
            let cluster_id: String = row.try_get("cluster_id")?;
            let zone_id: String = row.try_get("zone_id")?;
            placements.insert(
                parse_column("host_id", &host_id)?,
                HostPlacement {
                    cluster_id: parse_column("cluster_id", &cluster_id)?,
                    zone_id: parse_column("zone_id", &zone_id)?,
                },
            );
        }
        Ok(placements)
    }
}

#[async_trait]
impl HostTopology for PgHostTopology {
    async fn hosts_in_clusters(
        &self,
        cluster_ids: &[ClusterId],
    ) -> Result<Vec<HostId>, TopologyError> {
        let ids = cluster_ids.iter().map(ToString::to_string).collect();
        Ok(self.hosts_where("cluster_id", ids).await?)
    }

    async fn hosts_in_zones(&self, zone_ids: &[ZoneId]) -> Result<Vec<HostId>, TopologyError> {
        let ids = zone_ids.iter().map(ToString::to_string).collect();
        Ok(self.hosts_where("zone_id", ids).await?)
    }

    async fn placements(
        &self,
        host_ids: &[HostId],
    ) -> Result<HashMap<HostId, HostPlacement>, TopologyError> {
        if host_ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self.placement_rows(host_ids).await?)
    }
}
