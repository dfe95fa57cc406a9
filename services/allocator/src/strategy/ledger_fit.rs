//! `ledger-fit`: first host, by id, whose free capacity covers the demand.

use std::sync::Arc;

use hostalloc_messages::{codes, ErrorCode, HostDescriptor};
use tracing::{debug, Instrument};

use super::{
    describe_host, AllocationError, AllocationSpec, AllocatorStrategy, Completion,
    StrategyFactory, StrategyType,
};
use crate::capacity::HostTopology;
use crate::ledger::CapacityLedger;

pub const LEDGER_FIT: &str = "ledger-fit";

pub struct LedgerFitFactory {
    strategy: Arc<LedgerFitStrategy>,
}

impl LedgerFitFactory {
    pub fn new(ledger: CapacityLedger, topology: Arc<dyn HostTopology>) -> Self {
        Self {
            strategy: Arc::new(LedgerFitStrategy { ledger, topology }),
        }
    }
}

impl StrategyFactory for LedgerFitFactory {
    fn strategy_type(&self) -> StrategyType {
        LEDGER_FIT.into()
    }

    fn strategy(&self) -> Arc<dyn AllocatorStrategy> {
        self.strategy.clone()
    }
}

/// Reads the ledger, never writes it.
pub struct LedgerFitStrategy {
    ledger: CapacityLedger,
    topology: Arc<dyn HostTopology>,
}

impl LedgerFitStrategy {
    async fn candidates(
        ledger: &CapacityLedger,
        topology: &dyn HostTopology,
        spec: &AllocationSpec,
    ) -> Result<Vec<HostDescriptor>, AllocationError> {
        let rows = ledger.snapshot().await.map_err(|e| {
            AllocationError::Strategy(ErrorCode::new(codes::CAPACITY_UNAVAILABLE, e.to_string()))
        })?;

        let fitting: Vec<_> = rows
            .into_iter()
            .filter(|row| spec.admits_host(&row.host_id) && spec.fits(row))
            .collect();
        if fitting.is_empty() {
            return Ok(Vec::new());
        }

        let host_ids: Vec<_> = fitting.iter().map(|row| row.host_id).collect();
        let placements = topology.placements(&host_ids).await.map_err(|e| {
            AllocationError::Strategy(ErrorCode::new(codes::CAPACITY_UNAVAILABLE, e.to_string()))
        })?;

        let candidates: Vec<HostDescriptor> = fitting
            .iter()
            .filter_map(|row| {
                let placement = placements.get(&row.host_id);
                spec.admits_placement(placement)
                    .then(|| describe_host(row, placement))
            })
            .collect();

        debug!(candidates = candidates.len(), "Evaluated ledger-fit candidates");
        Ok(candidates)
    }
}

impl AllocatorStrategy for LedgerFitStrategy {
    fn allocate(&self, spec: AllocationSpec, completion: Completion<HostDescriptor>) {
        let ledger = self.ledger.clone();
        let topology = self.topology.clone();

        tokio::spawn(
            async move {
                let result = Self::candidates(&ledger, topology.as_ref(), &spec)
                    .await
                    .and_then(|hosts| {
                        hosts.into_iter().next().ok_or_else(|| {
                            AllocationError::NoEligibleHost(format!(
                                "no host can fit cpu[{}], memory[{}]",
                                spec.cpu, spec.memory
                            ))
                        })
                    });
                completion.complete(result);
            }
            .in_current_span(),
        );
    }

    fn dry_run(&self, spec: AllocationSpec, completion: Completion<Vec<HostDescriptor>>) {
        let ledger = self.ledger.clone();
        let topology = self.topology.clone();

        tokio::spawn(
            async move {
                let result = Self::candidates(&ledger, topology.as_ref(), &spec).await;
                completion.complete(result);
            }
            .in_current_span(),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use hostalloc_id::{ClusterId, HostId, RequestId, ZoneId};
    use hostalloc_messages::{AllocateHost, PlacementConstraints, ReportHostCapacity};

    use super::*;
    use crate::capacity::{HostPlacement, StaticTopology, TopologyError};
    use crate::ledger::MemoryCapacityStore;
    use crate::strategy::completion;

    fn spec(cpu: i64, memory: i64, constraints: PlacementConstraints) -> AllocationSpec {
        AllocationSpec::from_request(
            RequestId::new(),
            &AllocateHost {
                cpu,
                memory,
                extra_resources: BTreeMap::new(),
                strategy_type: LEDGER_FIT.to_string(),
                dry_run: false,
                constraints,
            },
        )
    }

    async fn report(ledger: &CapacityLedger, host_id: HostId, cpu: i64, memory: i64) {
        ledger
            .report_capacity(&ReportHostCapacity {
                host_id,
                total_cpu: cpu,
                used_cpu: 0,
                total_memory: memory,
                used_memory: 0,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_allocate_picks_lowest_fitting_host() {
        let ledger = CapacityLedger::new(Arc::new(MemoryCapacityStore::new()));
        let mut hosts = vec![HostId::new(), HostId::new(), HostId::new()];
        hosts.sort();
        report(&ledger, hosts[0], 1, 1024).await;
        report(&ledger, hosts[1], 4, 8192).await;
        report(&ledger, hosts[2], 8, 16384).await;

        let factory = LedgerFitFactory::new(ledger.clone(), Arc::new(StaticTopology::new()));
        let strategy = factory.strategy();

        let (tx, rx) = completion::channel();
        strategy.allocate(spec(2, 2048, PlacementConstraints::default()), tx);
        assert_eq!(rx.wait().await.unwrap().host_id, hosts[1]);

        let (tx, rx) = completion::channel();
        strategy.allocate(
            spec(
                2,
                2048,
                PlacementConstraints {
                    avoid_host_ids: vec![hosts[1]],
                    ..Default::default()
                },
            ),
            tx,
        );
        assert_eq!(rx.wait().await.unwrap().host_id, hosts[2]);
    }

    #[tokio::test]
    async fn test_allocate_without_fit_fails() {
        let ledger = CapacityLedger::new(Arc::new(MemoryCapacityStore::new()));
        report(&ledger, HostId::new(), 2, 1024).await;

        let strategy = LedgerFitFactory::new(ledger, Arc::new(StaticTopology::new())).strategy();
        let (tx, rx) = completion::channel();
        strategy.allocate(spec(4, 1024, PlacementConstraints::default()), tx);

        let err = rx.wait().await.unwrap_err();
        assert_eq!(err.to_error_code().code, codes::NO_ELIGIBLE_HOST);
    }

    #[tokio::test]
    async fn test_dry_run_honours_zone_and_leaves_ledger_alone() {
        let ledger = CapacityLedger::new(Arc::new(MemoryCapacityStore::new()));
        let zone = ZoneId::new();
        let (inside, outside, unplaced) = (HostId::new(), HostId::new(), HostId::new());
        for host in [inside, outside, unplaced] {
            report(&ledger, host, 8, 8192).await;
        }
        let topology = StaticTopology::new()
            .with_host(inside, ClusterId::new(), zone)
            .with_host(outside, ClusterId::new(), ZoneId::new());

        let before = ledger.snapshot().await.unwrap();
        let strategy = LedgerFitFactory::new(ledger.clone(), Arc::new(topology)).strategy();
        let (tx, rx) = completion::channel();
        strategy.dry_run(
            spec(
                1,
                512,
                PlacementConstraints {
                    zone_ids: vec![zone],
                    ..Default::default()
                },
            ),
            tx,
        );

        let hosts = rx.wait().await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host_id, inside);
        assert_eq!(hosts[0].zone_id, Some(zone));
        assert_eq!(ledger.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_dry_run_on_empty_ledger_is_empty_list() {
        let ledger = CapacityLedger::new(Arc::new(MemoryCapacityStore::new()));
        let strategy = LedgerFitFactory::new(ledger, Arc::new(StaticTopology::new())).strategy();
        let (tx, rx) = completion::channel();
        strategy.dry_run(spec(1, 1, PlacementConstraints::default()), tx);
        assert!(rx.wait().await.unwrap().is_empty());
    }

    /// Counts placement lookups and how many hosts each one asked for.
    struct CountingTopology {
        inner: StaticTopology,
        lookups: AtomicUsize,
        hosts_requested: AtomicUsize,
    }

    #[async_trait]
    impl HostTopology for CountingTopology {
        async fn hosts_in_clusters(
            &self,
            cluster_ids: &[ClusterId],
        ) -> Result<Vec<HostId>, TopologyError> {
            self.inner.hosts_in_clusters(cluster_ids).await
        }

        async fn hosts_in_zones(&self, zone_ids: &[ZoneId]) -> Result<Vec<HostId>, TopologyError> {
            self.inner.hosts_in_zones(zone_ids).await
        }

        async fn placements(
            &self,
            host_ids: &[HostId],
        ) -> Result<HashMap<HostId, HostPlacement>, TopologyError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.hosts_requested.fetch_add(host_ids.len(), Ordering::SeqCst);
            self.inner.placements(host_ids).await
        }
    }

    #[tokio::test]
    async fn test_placements_are_looked_up_once_per_evaluation() {
        let ledger = CapacityLedger::new(Arc::new(MemoryCapacityStore::new()));
        let zone = ZoneId::new();
        let mut inner = StaticTopology::new();
        for _ in 0..50 {
            let host = HostId::new();
            report(&ledger, host, 8, 8192).await;
            inner.insert(host, ClusterId::new(), zone);
        }
        // Too small to fit; must not be part of the lookup.
        report(&ledger, HostId::new(), 1, 8192).await;

        let topology = Arc::new(CountingTopology {
            inner,
            lookups: AtomicUsize::new(0),
            hosts_requested: AtomicUsize::new(0),
        });
        let strategy = LedgerFitFactory::new(ledger, topology.clone()).strategy();

        let (tx, rx) = completion::channel();
        strategy.dry_run(spec(2, 512, PlacementConstraints::default()), tx);
        let hosts = rx.wait().await.unwrap();

        assert_eq!(hosts.len(), 50);
        assert!(hosts.iter().all(|h| h.zone_id == Some(zone)));
        assert_eq!(topology.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(topology.hosts_requested.load(Ordering::SeqCst), 50);
    }
}
