//! Scoped capacity queries.
//!
//! A query sums the ledger over a set of hosts (given directly, or resolved
//! from clusters or zones through the host topology), then subtracts the
//! reservations held against the same scope. Raw availability always comes
//! first; reservations only ever lower the reported figure and never touch
//! the stored ledger.

mod reservation;
mod topology;

pub use reservation::{NoReservations, ReservationError, ReservationGateway, ReservedCapacity};
pub use topology::{HostPlacement, HostTopology, StaticTopology, TopologyError};

use std::sync::Arc;

use hostalloc_id::{ClusterId, HostId, ZoneId};
use hostalloc_messages::{codes, CpuMemoryCapacity, ErrorCode, GetCpuMemoryCapacity};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::ledger::{CapacityLedger, LedgerError};

#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("one of host_ids, cluster_ids or zone_ids must be supplied")]
    MissingScope,

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("topology: {0}")]
    Topology(#[from] TopologyError),

    #[error("reservations: {0}")]
    Reservation(#[from] ReservationError),
}

impl CapacityError {
    pub fn to_error_code(&self) -> ErrorCode {
        let code = match self {
            CapacityError::MissingScope => codes::MISSING_SCOPE,
            _ => codes::CAPACITY_UNAVAILABLE,
        };
        ErrorCode::new(code, self.to_string())
    }
}

/// The set of hosts a capacity query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapacityScope {
    Hosts(Vec<HostId>),
    Clusters(Vec<ClusterId>),
    Zones(Vec<ZoneId>),
}

impl CapacityScope {
    /// Picks the scope from a query's filters: hosts, then clusters, then
    /// zones. Empty lists count as absent.
    pub fn from_query(query: GetCpuMemoryCapacity) -> Result<Self, CapacityError> {
        if !query.host_ids.is_empty() {
            Ok(Self::Hosts(query.host_ids))
        } else if !query.cluster_ids.is_empty() {
            Ok(Self::Clusters(query.cluster_ids))
        } else if !query.zone_ids.is_empty() {
            Ok(Self::Zones(query.zone_ids))
        } else {
            Err(CapacityError::MissingScope)
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hosts(_) => "hosts",
            Self::Clusters(_) => "clusters",
            Self::Zones(_) => "zones",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Hosts(ids) => ids.len(),
            Self::Clusters(ids) => ids.len(),
            Self::Zones(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Subtracts reservations from raw availability, flooring at zero.
pub fn net_out_reservations(raw: CpuMemoryCapacity, reserved: ReservedCapacity) -> CpuMemoryCapacity {
    CpuMemoryCapacity {
        available_cpu: raw.available_cpu.saturating_sub(reserved.reserved_cpu).max(0),
        available_memory: raw
            .available_memory
            .saturating_sub(reserved.reserved_memory)
            .max(0),
        ..raw
    }
}

pub struct CapacityAggregator {
    ledger: CapacityLedger,
    topology: Arc<dyn HostTopology>,
    reservations: Arc<dyn ReservationGateway>,
}

impl CapacityAggregator {
    pub fn new(
        ledger: CapacityLedger,
        topology: Arc<dyn HostTopology>,
        reservations: Arc<dyn ReservationGateway>,
    ) -> Self {
        Self {
            ledger,
            topology,
            reservations,
        }
    }

    #[instrument(skip_all, fields(scope = scope.kind(), scope_len = scope.len()))]
    pub async fn query_capacity(
        &self,
        scope: &CapacityScope,
    ) -> Result<CpuMemoryCapacity, CapacityError> {
        let host_ids = match scope {
            CapacityScope::Hosts(ids) => ids.clone(),
            CapacityScope::Clusters(ids) => self.topology.hosts_in_clusters(ids).await?,
            CapacityScope::Zones(ids) => self.topology.hosts_in_zones(ids).await?,
        };

        let raw = self.ledger.sum(&host_ids).await?;
        let reserved = self.reservations.reserved_capacity(scope).await?;

        debug!(
            hosts = host_ids.len(),
            raw_available_cpu = raw.available_cpu,
            raw_available_memory = raw.available_memory,
            reserved_cpu = reserved.reserved_cpu,
            reserved_memory = reserved.reserved_memory,
            "Computed scoped capacity"
        );

        Ok(net_out_reservations(raw, reserved))
    }
}
