//! Host topology lookup: which cluster and zone a host belongs to.

use std::collections::HashMap;

use async_trait::async_trait;
use hostalloc_id::{ClusterId, HostId, ZoneId};
use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("topology store error: {0}")]
    Database(#[from] DbError),
}

/// Where a host sits in the placement hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPlacement {
    pub cluster_id: ClusterId,
    pub zone_id: ZoneId,
}

/// Resolves clusters and zones to hosts. Owned by the topology subsystem;
/// the allocator only reads it.
#[async_trait]
pub trait HostTopology: Send + Sync {
    async fn hosts_in_clusters(&self, cluster_ids: &[ClusterId])
        -> Result<Vec<HostId>, TopologyError>;

    async fn hosts_in_zones(&self, zone_ids: &[ZoneId]) -> Result<Vec<HostId>, TopologyError>;

    /// Placements for the given hosts in one lookup. Hosts without a
    /// topology entry are absent from the map.
    async fn placements(
        &self,
        host_ids: &[HostId],
    ) -> Result<HashMap<HostId, HostPlacement>, TopologyError>;
}

/// Fixed, in-memory topology.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    hosts: HashMap<HostId, HostPlacement>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_host(mut self, host_id: HostId, cluster_id: ClusterId, zone_id: ZoneId) -> Self {
        self.insert(host_id, cluster_id, zone_id);
        self
    }

    pub fn insert(&mut self, host_id: HostId, cluster_id: ClusterId, zone_id: ZoneId) {
        self.hosts.insert(
            host_id,
            HostPlacement {
                cluster_id,
                zone_id,
            },
        );
    }

    fn hosts_matching(&self, predicate: impl Fn(&HostPlacement) -> bool) -> Vec<HostId> {
        let mut hosts: Vec<HostId> = self
            .hosts
            .iter()
            .filter(|(_, placement)| predicate(placement))
            .map(|(host_id, _)| *host_id)
            .collect();
        hosts.sort();
        hosts
    }
}

#[async_trait]
impl HostTopology for StaticTopology {
    async fn hosts_in_clusters(
        &self,
        cluster_ids: &[ClusterId],
    ) -> Result<Vec<HostId>, TopologyError> {
        Ok(self.hosts_matching(|p| cluster_ids.contains(&p.cluster_id)))
    }

    async fn hosts_in_zones(&self, zone_ids: &[ZoneId]) -> Result<Vec<HostId>, TopologyError> {
        Ok(self.hosts_matching(|p| zone_ids.contains(&p.zone_id)))
    }

    async fn placements(
        &self,
        host_ids: &[HostId],
    ) -> Result<HashMap<HostId, HostPlacement>, TopologyError> {
        Ok(host_ids
            .iter()
            .filter_map(|id| self.hosts.get(id).map(|placement| (*id, *placement)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_topology_lookups() {
        let zone = ZoneId::new();
        let (c1, c2) = (ClusterId::new(), ClusterId::new());
        let (h1, h2, h3) = (HostId::new(), HostId::new(), HostId::new());
        let topology = StaticTopology::new()
            .with_host(h1, c1, zone)
            .with_host(h2, c1, zone)
            .with_host(h3, c2, ZoneId::new());

        // Ids minted in the same millisecond carry no creation order.
        let mut expected = vec![h1, h2];
        expected.sort();

        assert_eq!(topology.hosts_in_clusters(&[c1]).await.unwrap(), expected);
        assert_eq!(topology.hosts_in_zones(&[zone]).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_placements_skip_unknown_hosts() {
        let (cluster, zone) = (ClusterId::new(), ZoneId::new());
        let (known, unknown) = (HostId::new(), HostId::new());
        let topology = StaticTopology::new().with_host(known, cluster, zone);

        let placements = topology.placements(&[known, unknown]).await.unwrap();
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[&known].cluster_id, cluster);
        assert!(!placements.contains_key(&unknown));
        assert!(topology.placements(&[]).await.unwrap().is_empty());
    }
}
