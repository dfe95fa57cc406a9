//! Wiring of the allocator's components.

use std::sync::Arc;

use tracing::info;

use crate::capacity::{
    CapacityAggregator, HostTopology, NoReservations, ReservationGateway, StaticTopology,
};
use crate::config::AllocatorConfig;
use crate::db::Database;
use crate::dispatcher::{AllocationDispatcher, DispatcherConfig};
use crate::ledger::{CapacityLedger, CapacityStore, MemoryCapacityStore};
use crate::strategy::{RegistryError, StrategyContext, StrategyRegistry};

/// Storage and collaborator views the allocator runs against.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn CapacityStore>,
    pub topology: Arc<dyn HostTopology>,
    pub reservations: Arc<dyn ReservationGateway>,
}

impl Backends {
    /// Memory-only backends with the given topology and no reservations.
    pub fn in_memory(topology: StaticTopology) -> Self {
        Self {
            store: Arc::new(MemoryCapacityStore::new()),
            topology: Arc::new(topology),
            reservations: Arc::new(NoReservations),
        }
    }

    pub fn postgres(db: &Database) -> Self {
        Self {
            store: Arc::new(db.capacity_store()),
            topology: Arc::new(db.host_topology()),
            reservations: Arc::new(db.reservation_gateway()),
        }
    }
}

/// Builds the dispatcher, populating the strategy registry from config.
/// Fails on unknown or duplicate strategy names.
pub fn build_dispatcher(
    backends: Backends,
    config: &AllocatorConfig,
) -> Result<AllocationDispatcher, RegistryError> {
    let ledger = CapacityLedger::new(backends.store);
    let context = StrategyContext {
        ledger: ledger.clone(),
        topology: backends.topology.clone(),
    };
    let registry = StrategyRegistry::populate(&config.strategies, &context)?;
    info!(
        strategies = ?registry.exposed_types(),
        "Allocator strategy registry populated"
    );

    let aggregator = Arc::new(CapacityAggregator::new(
        ledger.clone(),
        backends.topology,
        backends.reservations,
    ));

    Ok(AllocationDispatcher::new(
        ledger,
        aggregator,
        registry,
        DispatcherConfig {
            strategy_timeout: config.strategy_timeout,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::LEDGER_FIT;

    #[test]
    fn test_duplicate_strategy_is_fatal() {
        let config = AllocatorConfig {
            strategies: vec![LEDGER_FIT.to_string(), LEDGER_FIT.to_string()],
            ..Default::default()
        };
        let result = build_dispatcher(Backends::in_memory(StaticTopology::new()), &config);
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateFactory { .. })
        ));
    }

    #[test]
    fn test_unknown_strategy_is_fatal() {
        let config = AllocatorConfig {
            strategies: vec!["best-fit".to_string()],
            ..Default::default()
        };
        let result = build_dispatcher(Backends::in_memory(StaticTopology::new()), &config);
        assert!(matches!(result, Err(RegistryError::UnknownBuiltin(_))));
    }

    #[test]
    fn test_default_config_registers_ledger_fit() {
        let dispatcher = build_dispatcher(
            Backends::in_memory(StaticTopology::new()),
            &AllocatorConfig::default(),
        )
        .unwrap();
        assert_eq!(dispatcher.registry().exposed_types(), vec![LEDGER_FIT]);
    }
}
