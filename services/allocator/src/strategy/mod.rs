//! Pluggable placement strategies.
//!
//! A strategy picks hosts for a resource demand. The allocator knows nothing
//! about how: it resolves a [`StrategyFactory`] by type from the
//! [`StrategyRegistry`], asks it for an [`AllocatorStrategy`], and hands the
//! strategy an [`AllocationSpec`] plus a one-shot [`Completion`] that the
//! strategy resolves whenever and wherever it finishes.

pub mod completion;
mod ledger_fit;
mod registry;

pub use completion::{Completion, PendingCompletion};
pub use ledger_fit::{LedgerFitFactory, LedgerFitStrategy, LEDGER_FIT};
pub use registry::{RegistryError, StrategyRegistry, StrategyRegistryBuilder};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hostalloc_id::{HostId, RequestId};
use hostalloc_messages::{codes, AllocateHost, ErrorCode, HostDescriptor, PlacementConstraints};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capacity::{HostPlacement, HostTopology};
use crate::ledger::{CapacityLedger, HostCapacity};

/// Identifier of a strategy type, e.g. `ledger-fit`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyType(String);

impl StrategyType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StrategyType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Errors a strategy (or the allocator, on its behalf) reports for one
/// allocation request. All of them end up in the reply, never as a panic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("unable to find allocator strategy factory with type [{0}]")]
    StrategyNotFound(StrategyType),

    #[error("no eligible host: {0}")]
    NoEligibleHost(String),

    #[error("strategy dropped its completion without a result")]
    Abandoned,

    #[error("strategy panicked while evaluating the request")]
    Panicked,

    #[error("strategy did not complete within {0:?}")]
    TimedOut(Duration),

    /// Failure reported by the strategy with its own code.
    #[error("{0}")]
    Strategy(ErrorCode),
}

impl AllocationError {
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            AllocationError::Strategy(error) => error.clone(),
            AllocationError::StrategyNotFound(_) => {
                ErrorCode::new(codes::STRATEGY_NOT_FOUND, self.to_string())
            }
            AllocationError::NoEligibleHost(_) => {
                ErrorCode::new(codes::NO_ELIGIBLE_HOST, self.to_string())
            }
            AllocationError::Abandoned | AllocationError::Panicked => {
                ErrorCode::new(codes::STRATEGY_ABANDONED, self.to_string())
            }
            AllocationError::TimedOut(_) => ErrorCode::new(codes::STRATEGY_TIMEOUT, self.to_string()),
        }
    }
}

/// Normalized description of one allocation request, built by the
/// dispatcher and moved into the strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationSpec {
    pub request_id: RequestId,
    pub strategy_type: StrategyType,
    pub cpu: i64,
    pub memory: i64,
    pub extra_resources: BTreeMap<String, i64>,
    pub constraints: PlacementConstraints,
    pub dry_run: bool,
}

impl AllocationSpec {
    pub fn from_request(request_id: RequestId, request: &AllocateHost) -> Self {
        Self {
            request_id,
            strategy_type: StrategyType::new(request.strategy_type.as_str()),
            cpu: request.cpu.max(0),
            memory: request.memory.max(0),
            extra_resources: request.extra_resources.clone(),
            constraints: request.constraints.clone(),
            dry_run: request.dry_run,
        }
    }

    /// Host-level constraints: the required-host list and the avoid list.
    pub fn admits_host(&self, host_id: &HostId) -> bool {
        let constraints = &self.constraints;
        if constraints.avoid_host_ids.contains(host_id) {
            return false;
        }
        constraints.host_ids.is_empty() || constraints.host_ids.contains(host_id)
    }

    /// Cluster and zone constraints. A host with unknown placement only
    /// passes when neither is constrained.
    pub fn admits_placement(&self, placement: Option<&HostPlacement>) -> bool {
        let constraints = &self.constraints;
        let cluster_ok = constraints.cluster_ids.is_empty()
            || placement.is_some_and(|p| constraints.cluster_ids.contains(&p.cluster_id));
        let zone_ok = constraints.zone_ids.is_empty()
            || placement.is_some_and(|p| constraints.zone_ids.contains(&p.zone_id));
        cluster_ok && zone_ok
    }

    pub fn fits(&self, capacity: &HostCapacity) -> bool {
        capacity.available_cpu >= self.cpu && capacity.available_memory >= self.memory
    }
}

/// Builds the wire descriptor for a ledger row.
pub fn describe_host(capacity: &HostCapacity, placement: Option<&HostPlacement>) -> HostDescriptor {
    HostDescriptor {
        host_id: capacity.host_id,
        cluster_id: placement.map(|p| p.cluster_id),
        zone_id: placement.map(|p| p.zone_id),
        total_cpu: capacity.total_cpu,
        available_cpu: capacity.available_cpu,
        total_memory: capacity.total_memory,
        available_memory: capacity.available_memory,
    }
}

/// A placement algorithm.
///
/// Both operations return immediately; the result is delivered through the
/// completion, possibly from another task. Dropping the completion without
/// resolving it is reported to the caller as abandoned.
pub trait AllocatorStrategy: Send + Sync {
    /// Selects a single host.
    fn allocate(&self, spec: AllocationSpec, completion: Completion<HostDescriptor>);

    /// Lists eligible hosts without reserving anything.
    fn dry_run(&self, spec: AllocationSpec, completion: Completion<Vec<HostDescriptor>>);
}

/// Produces configured strategy instances for one strategy type.
pub trait StrategyFactory: Send + Sync {
    fn strategy_type(&self) -> StrategyType;

    fn strategy(&self) -> Arc<dyn AllocatorStrategy>;

    /// Lets the factory amend the spec from the raw request before the
    /// strategy sees it.
    fn marshal_spec(&self, _spec: &mut AllocationSpec, _request: &AllocateHost) {}

    /// Whether the type is listed by `get_allocator_strategies`.
    fn is_exposed(&self) -> bool {
        true
    }

    /// Implementation name, used in duplicate registration errors.
    fn implementation(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// What built-in factories are constructed with.
#[derive(Clone)]
pub struct StrategyContext {
    pub ledger: CapacityLedger,
    pub topology: Arc<dyn HostTopology>,
}

/// Constructs the built-in factory registered under `name`.
pub fn builtin_factory(
    name: &str,
    context: &StrategyContext,
) -> Result<Arc<dyn StrategyFactory>, RegistryError> {
    match name {
        LEDGER_FIT => Ok(Arc::new(LedgerFitFactory::new(
            context.ledger.clone(),
            context.topology.clone(),
        ))),
        other => Err(RegistryError::UnknownBuiltin(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use hostalloc_id::{ClusterId, ZoneId};

    use super::*;

    fn spec(constraints: PlacementConstraints) -> AllocationSpec {
        AllocationSpec::from_request(
            RequestId::new(),
            &AllocateHost {
                cpu: 2,
                memory: 1024,
                extra_resources: BTreeMap::new(),
                strategy_type: LEDGER_FIT.to_string(),
                dry_run: false,
                constraints,
            },
        )
    }

    #[test]
    fn test_avoid_list_wins_over_required_hosts() {
        let host = HostId::new();
        let spec = spec(PlacementConstraints {
            host_ids: vec![host],
            avoid_host_ids: vec![host],
            ..Default::default()
        });
        assert!(!spec.admits_host(&host));
    }

    #[test]
    fn test_unconstrained_spec_admits_everything() {
        let spec = spec(PlacementConstraints::default());
        assert!(spec.admits_host(&HostId::new()));
        assert!(spec.admits_placement(None));
    }

    #[test]
    fn test_zone_constraint_requires_known_placement() {
        let zone = ZoneId::new();
        let spec = spec(PlacementConstraints {
            zone_ids: vec![zone],
            ..Default::default()
        });
        let inside = HostPlacement {
            cluster_id: ClusterId::new(),
            zone_id: zone,
        };
        let outside = HostPlacement {
            cluster_id: ClusterId::new(),
            zone_id: ZoneId::new(),
        };
        assert!(spec.admits_placement(Some(&inside)));
        assert!(!spec.admits_placement(Some(&outside)));
        assert!(!spec.admits_placement(None));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AllocationError::StrategyNotFound("bogus".into())
                .to_error_code()
                .code,
            codes::STRATEGY_NOT_FOUND
        );
        assert_eq!(
            AllocationError::TimedOut(Duration::from_secs(1))
                .to_error_code()
                .code,
            codes::STRATEGY_TIMEOUT
        );
        let custom = ErrorCode::new("gpu_exhausted", "no gpu left");
        assert_eq!(
            AllocationError::Strategy(custom.clone()).to_error_code(),
            custom
        );
    }

    #[test]
    fn test_unknown_builtin_is_rejected() {
        let context = StrategyContext {
            ledger: CapacityLedger::new(Arc::new(crate::ledger::MemoryCapacityStore::new())),
            topology: Arc::new(crate::capacity::StaticTopology::new()),
        };
        assert!(matches!(
            builtin_factory("round-robin", &context),
            Err(RegistryError::UnknownBuiltin(name)) if name == "round-robin"
        ));
        assert!(builtin_factory(LEDGER_FIT, &context).is_ok());
    }
}
