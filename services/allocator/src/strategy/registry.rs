//! Strategy registry.
//!
//! Populated once at startup through [`StrategyRegistryBuilder`], then frozen
//! behind an `Arc` and shared by every worker without locking.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use super::{builtin_factory, AllocationError, StrategyContext, StrategyFactory, StrategyType};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(
        "duplicate allocator strategy factory [{existing}, {duplicate}] for type [{strategy_type}]"
    )]
    DuplicateFactory {
        strategy_type: StrategyType,
        existing: &'static str,
        duplicate: &'static str,
    },

    #[error("unknown built-in allocator strategy [{0}]")]
    UnknownBuiltin(String),
}

#[derive(Default)]
pub struct StrategyRegistryBuilder {
    factories: HashMap<StrategyType, Arc<dyn StrategyFactory>>,
}

impl StrategyRegistryBuilder {
    /// Adds a factory. A second factory for an already registered type is a
    /// configuration error.
    pub fn register(&mut self, factory: Arc<dyn StrategyFactory>) -> Result<(), RegistryError> {
        let strategy_type = factory.strategy_type();
        if let Some(existing) = self.factories.get(&strategy_type) {
            return Err(RegistryError::DuplicateFactory {
                strategy_type,
                existing: existing.implementation(),
                duplicate: factory.implementation(),
            });
        }

        info!(
            strategy_type = %strategy_type,
            implementation = factory.implementation(),
            "Registered allocator strategy factory"
        );
        self.factories.insert(strategy_type, factory);
        Ok(())
    }

    /// Chaining form of [`register`](Self::register).
    pub fn with(mut self, factory: Arc<dyn StrategyFactory>) -> Result<Self, RegistryError> {
        self.register(factory)?;
        Ok(self)
    }

    pub fn build(self) -> StrategyRegistry {
        StrategyRegistry {
            factories: Arc::new(self.factories),
        }
    }
}

/// Immutable map from strategy type to factory. Cheap to clone.
#[derive(Clone)]
pub struct StrategyRegistry {
    factories: Arc<HashMap<StrategyType, Arc<dyn StrategyFactory>>>,
}

impl StrategyRegistry {
    pub fn builder() -> StrategyRegistryBuilder {
        StrategyRegistryBuilder::default()
    }

    /// Builds a registry from a list of built-in strategy names.
    pub fn populate(names: &[String], context: &StrategyContext) -> Result<Self, RegistryError> {
        let mut builder = Self::builder();
        for name in names {
            builder.register(builtin_factory(name, context)?)?;
        }
        Ok(builder.build())
    }

    pub fn resolve(
        &self,
        strategy_type: &StrategyType,
    ) -> Result<Arc<dyn StrategyFactory>, AllocationError> {
        self.factories
            .get(strategy_type)
            .cloned()
            .ok_or_else(|| AllocationError::StrategyNotFound(strategy_type.clone()))
    }

    /// Names of exposed strategy types, sorted.
    pub fn exposed_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .factories
            .iter()
            .filter(|(_, factory)| factory.is_exposed())
            .map(|(strategy_type, _)| strategy_type.to_string())
            .collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use hostalloc_messages::HostDescriptor;

    use super::*;
    use crate::capacity::StaticTopology;
    use crate::ledger::{CapacityLedger, MemoryCapacityStore};
    use crate::strategy::{AllocationSpec, AllocatorStrategy, Completion, LEDGER_FIT};

    struct Idle;

    impl AllocatorStrategy for Idle {
        fn allocate(&self, _spec: AllocationSpec, completion: Completion<HostDescriptor>) {
            completion.fail(AllocationError::NoEligibleHost("idle".to_string()));
        }

        fn dry_run(&self, _spec: AllocationSpec, completion: Completion<Vec<HostDescriptor>>) {
            completion.success(Vec::new());
        }
    }

    struct NamedFactory {
        name: &'static str,
        exposed: bool,
    }

    impl StrategyFactory for NamedFactory {
        fn strategy_type(&self) -> StrategyType {
            self.name.into()
        }

        fn strategy(&self) -> Arc<dyn AllocatorStrategy> {
            Arc::new(Idle)
        }

        fn is_exposed(&self) -> bool {
            self.exposed
        }
    }

    struct OtherFactory;

    impl StrategyFactory for OtherFactory {
        fn strategy_type(&self) -> StrategyType {
            "spread".into()
        }

        fn strategy(&self) -> Arc<dyn AllocatorStrategy> {
            Arc::new(Idle)
        }
    }

    fn context() -> StrategyContext {
        StrategyContext {
            ledger: CapacityLedger::new(Arc::new(MemoryCapacityStore::new())),
            topology: Arc::new(StaticTopology::new()),
        }
    }

    #[test]
    fn test_duplicate_registration_names_both_implementations() {
        let err = StrategyRegistry::builder()
            .with(Arc::new(NamedFactory {
                name: "spread",
                exposed: true,
            }))
            .unwrap()
            .with(Arc::new(OtherFactory))
            .err()
            .unwrap();

        let message = err.to_string();
        assert!(message.contains("NamedFactory"), "{message}");
        assert!(message.contains("OtherFactory"), "{message}");
        assert!(message.contains("[spread]"), "{message}");
    }

    #[test]
    fn test_populate_rejects_repeated_builtin() {
        let names = vec![LEDGER_FIT.to_string(), LEDGER_FIT.to_string()];
        let result = StrategyRegistry::populate(&names, &context());
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateFactory { .. })
        ));
    }

    #[test]
    fn test_resolve_unknown_type() {
        let registry = StrategyRegistry::populate(&[LEDGER_FIT.to_string()], &context()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve(&LEDGER_FIT.into()).is_ok());

        let err = registry.resolve(&"bin-pack".into()).err().unwrap();
        assert_eq!(err, AllocationError::StrategyNotFound("bin-pack".into()));
    }

    #[test]
    fn test_exposed_types_are_sorted_and_filtered() {
        let registry = StrategyRegistry::builder()
            .with(Arc::new(NamedFactory {
                name: "zeta",
                exposed: true,
            }))
            .and_then(|b| {
                b.with(Arc::new(NamedFactory {
                    name: "alpha",
                    exposed: true,
                }))
            })
            .and_then(|b| {
                b.with(Arc::new(NamedFactory {
                    name: "internal",
                    exposed: false,
                }))
            })
            .unwrap()
            .build();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.exposed_types(), vec!["alpha", "zeta"]);
    }
}
