//! Object resolver and constructor-plan cache.
//!
//! Handler containers and query objects are instantiated per message by an
//! [`ObjectResolver`]. Two strategies exist:
//!
//! - **External**: every instance comes from a host-supplied [`ObjectFactory`]
//!   (typically a DI container). The pipeline never releases these.
//! - **Internal**: the resolver constructs registered [`Injectable`] types
//!   itself. Each declared dependency is taken from the factory first and
//!   constructed internally otherwise, recursively up to a depth limit.
//!   Internally constructed instances are released by the resolving stage's
//!   post-hook, whatever the outcome.
//!
//! Constructor plans (the declared dependency list of a type) are computed once
//! per `(type, stage)` and cached for the lifetime of the resolver.

use crate::metrics::ResolverMetrics;
use crate::registry::DynInstance;
use courier_core::error::PipelineError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Shared, type-erased instance.
pub type Instance = Arc<DynInstance>;

/// Host callback producing instances by type; `None` when it cannot.
pub type ObjectFactory = Arc<dyn Fn(TypeId, &'static str) -> Option<Instance> + Send + Sync>;

/// Where handler instances come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Host factory only; instances are never released by the pipeline.
    External,
    /// Registered constructors; instances are released after each message.
    #[default]
    Internal,
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "external" => Ok(Self::External),
            "internal" => Ok(Self::Internal),
            other => Err(format!("unknown resolution strategy `{other}`")),
        }
    }
}

/// A declared constructor dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    type_id: TypeId,
    type_name: &'static str,
}

impl Dependency {
    /// Dependency on `T`.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }
}

/// Dependencies handed to [`Injectable::construct`], in declared order.
pub struct ResolvedArguments {
    values: VecDeque<(Instance, &'static str)>,
}

impl ResolvedArguments {
    /// Take the next dependency.
    ///
    /// # Errors
    ///
    /// Fails if the arguments are exhausted or the next one is not a `T`.
    pub fn next<T: Any + Send + Sync>(&mut self) -> anyhow::Result<Arc<T>> {
        let (value, name) = self
            .values
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no more constructor arguments, wanted {}", type_name::<T>()))?;
        value
            .downcast::<T>()
            .map_err(|_| anyhow::anyhow!("constructor argument is {name}, wanted {}", type_name::<T>()))
    }
}

/// A type the resolver can construct itself.
pub trait Injectable: Any + Send + Sync + Sized {
    /// Constructor dependencies, in the order `construct` takes them.
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    /// Build an instance from resolved dependencies.
    ///
    /// # Errors
    ///
    /// A failing constructor rejects the message with `CannotResolve`.
    fn construct(arguments: &mut ResolvedArguments) -> anyhow::Result<Self>;

    /// Dispose of an internally constructed instance.
    fn release(&self) {}
}

#[derive(Clone, Copy)]
struct Registration {
    type_name: &'static str,
    dependencies: fn() -> Vec<Dependency>,
    construct: fn(&mut ResolvedArguments) -> anyhow::Result<Instance>,
    release: fn(&DynInstance),
}

fn construct_erased<T: Injectable>(arguments: &mut ResolvedArguments) -> anyhow::Result<Instance> {
    Ok(Arc::new(T::construct(arguments)?))
}

fn release_erased<T: Injectable>(instance: &DynInstance) {
    if let Some(instance) = instance.downcast_ref::<T>() {
        instance.release();
    }
}

struct ConstructorPlan {
    registration: Registration,
    dependencies: Vec<Dependency>,
}

/// An instance produced by the resolver, plus everything it owns.
pub struct ResolvedInstance {
    instance: Instance,
    type_name: &'static str,
    owned: Vec<(Instance, fn(&DynInstance))>,
}

impl ResolvedInstance {
    /// Wrap a caller-supplied instance; it is never released.
    #[must_use]
    pub fn external(instance: Instance, type_name: &'static str) -> Self {
        Self {
            instance,
            type_name,
            owned: Vec::new(),
        }
    }

    /// The instance.
    #[must_use]
    pub fn get(&self) -> &DynInstance {
        self.instance.as_ref()
    }

    /// Shared handle to the instance.
    #[must_use]
    pub fn shared(&self) -> Instance {
        Arc::clone(&self.instance)
    }

    /// Resolved type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the resolver constructed this instance.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        !self.owned.is_empty()
    }

    /// Release every internally constructed object, root first.
    pub fn release(self) {
        release_all(&self.owned);
    }
}

impl fmt::Debug for ResolvedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedInstance")
            .field("type_name", &self.type_name)
            .field("internal", &self.is_internal())
            .finish()
    }
}

/// Builds an [`ObjectResolver`].
#[derive(Default)]
pub struct ObjectResolverBuilder {
    strategy: ResolutionStrategy,
    factory: Option<ObjectFactory>,
    registrations: HashMap<TypeId, Registration>,
    max_depth: Option<usize>,
}

impl ObjectResolverBuilder {
    /// Choose the strategy.
    #[must_use]
    pub const fn strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Install the host factory.
    #[must_use]
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(TypeId, &'static str) -> Option<Instance> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Register a type the resolver may construct.
    #[must_use]
    pub fn injectable<T: Injectable>(mut self) -> Self {
        self.registrations.insert(
            TypeId::of::<T>(),
            Registration {
                type_name: type_name::<T>(),
                dependencies: T::dependencies,
                construct: construct_erased::<T>,
                release: release_erased::<T>,
            },
        );
        self
    }

    /// Limit on nested dependency construction.
    #[must_use]
    pub const fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Finish.
    #[must_use]
    pub fn build(self) -> ObjectResolver {
        ObjectResolver {
            strategy: self.strategy,
            factory: self.factory,
            registrations: self.registrations,
            plans: RwLock::new(HashMap::new()),
            max_depth: self.max_depth.unwrap_or(ObjectResolver::DEFAULT_MAX_DEPTH),
        }
    }
}

/// Instantiates handler containers and query objects.
pub struct ObjectResolver {
    strategy: ResolutionStrategy,
    factory: Option<ObjectFactory>,
    registrations: HashMap<TypeId, Registration>,
    plans: RwLock<HashMap<(TypeId, String), Arc<ConstructorPlan>>>,
    max_depth: usize,
}

impl ObjectResolver {
    /// Nesting limit used when none is configured.
    pub const DEFAULT_MAX_DEPTH: usize = 16;

    /// Start building a resolver.
    #[must_use]
    pub fn builder() -> ObjectResolverBuilder {
        ObjectResolverBuilder::default()
    }

    /// Active strategy.
    #[must_use]
    pub const fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Number of cached constructor plans.
    #[must_use]
    pub fn cached_plans(&self) -> usize {
        self.plans.read().len()
    }

    /// Drop every cached plan.
    pub fn clear_cache(&self) {
        self.plans.write().clear();
    }

    /// Resolve an instance of `type_id` for `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CannotResolve`] when the factory has no
    /// instance, the type is not registered, a dependency cannot be satisfied,
    /// a constructor fails, or the dependency chain is deeper than the limit.
    pub fn resolve(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        stage: &str,
    ) -> Result<ResolvedInstance, PipelineError> {
        match self.strategy {
            ResolutionStrategy::External => self
                .from_factory(type_id, type_name)
                .map(|instance| ResolvedInstance::external(instance, type_name))
                .ok_or_else(|| cannot_resolve(type_name, "the object factory returned no instance")),
            ResolutionStrategy::Internal => {
                let mut owned = Vec::new();
                match self.construct(type_id, type_name, stage, 0, &mut owned) {
                    Ok(instance) => Ok(ResolvedInstance {
                        instance,
                        type_name,
                        owned,
                    }),
                    Err(error) => {
                        // Dependencies built before the failure are still ours to release.
                        release_all(&owned);
                        tracing::debug!(type_name, released = owned.len(), "Released partially resolved dependencies");
                        Err(error)
                    }
                }
            }
        }
    }

    /// Resolve and downcast in one step.
    ///
    /// # Errors
    ///
    /// See [`ObjectResolver::resolve`].
    pub fn resolve_as<T: Any + Send + Sync>(&self, stage: &str) -> Result<(Arc<T>, ResolvedInstance), PipelineError> {
        let resolved = self.resolve(TypeId::of::<T>(), type_name::<T>(), stage)?;
        let typed = resolved
            .shared()
            .downcast::<T>()
            .map_err(|_| cannot_resolve(type_name::<T>(), "resolved instance has another type"))?;
        Ok((typed, resolved))
    }

    fn from_factory(&self, type_id: TypeId, type_name: &'static str) -> Option<Instance> {
        self.factory.as_ref().and_then(|factory| factory(type_id, type_name))
    }

    fn plan(&self, type_id: TypeId, type_name: &'static str, stage: &str) -> Result<Arc<ConstructorPlan>, PipelineError> {
        let key = (type_id, stage.to_string());
        if let Some(plan) = self.plans.read().get(&key) {
            return Ok(Arc::clone(plan));
        }
        let registration = *self
            .registrations
            .get(&type_id)
            .ok_or_else(|| cannot_resolve(type_name, "no constructor is registered"))?;
        let plan = Arc::new(ConstructorPlan {
            registration,
            dependencies: (registration.dependencies)(),
        });
        ResolverMetrics::record_plan_built();
        tracing::debug!(
            type_name = registration.type_name,
            stage,
            dependencies = plan.dependencies.len(),
            "Built constructor plan"
        );
        Ok(Arc::clone(self.plans.write().entry(key).or_insert(plan)))
    }

    fn construct(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        stage: &str,
        depth: usize,
        owned: &mut Vec<(Instance, fn(&DynInstance))>,
    ) -> Result<Instance, PipelineError> {
        if depth > self.max_depth {
            return Err(cannot_resolve(
                type_name,
                &format!("dependency chain exceeds {} levels", self.max_depth),
            ));
        }
        let plan = self.plan(type_id, type_name, stage)?;

        let mut values = VecDeque::with_capacity(plan.dependencies.len());
        for dependency in &plan.dependencies {
            let value = match self.from_factory(dependency.type_id, dependency.type_name) {
                Some(value) => value,
                None => self
                    .construct(dependency.type_id, dependency.type_name, stage, depth + 1, owned)
                    .map_err(|error| {
                        cannot_resolve(type_name, &format!("dependency {} failed: {error}", dependency.type_name))
                    })?,
            };
            values.push_back((value, dependency.type_name));
        }

        let mut arguments = ResolvedArguments { values };
        let instance = (plan.registration.construct)(&mut arguments)
            .map_err(|error| cannot_resolve(type_name, &format!("constructor failed: {error:#}")))?;
        owned.push((Arc::clone(&instance), plan.registration.release));
        Ok(instance)
    }
}

impl fmt::Debug for ObjectResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectResolver")
            .field("strategy", &self.strategy)
            .field("has_factory", &self.factory.is_some())
            .field("registrations", &self.registrations.len())
            .field("cached_plans", &self.cached_plans())
            .finish()
    }
}

/// Release in reverse construction order, so dependents go before their dependencies.
fn release_all(owned: &[(Instance, fn(&DynInstance))]) {
    for (instance, release) in owned.iter().rev() {
        release(instance.as_ref());
    }
}

fn cannot_resolve(type_name: &str, reason: &str) -> PipelineError {
    PipelineError::CannotResolve {
        type_name: type_name.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on resolution errors
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static RELEASED: AtomicUsize = AtomicUsize::new(0);

    struct Clock;

    struct Repository {
        clock: Arc<Clock>,
    }

    impl Injectable for Repository {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::of::<Clock>()]
        }

        fn construct(arguments: &mut ResolvedArguments) -> anyhow::Result<Self> {
            Ok(Self {
                clock: arguments.next::<Clock>()?,
            })
        }
    }

    struct Service {
        repository: Arc<Repository>,
    }

    impl Injectable for Service {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::of::<Repository>()]
        }

        fn construct(arguments: &mut ResolvedArguments) -> anyhow::Result<Self> {
            Ok(Self {
                repository: arguments.next::<Repository>()?,
            })
        }

        fn release(&self) {
            RELEASED.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Cyclic;

    impl Injectable for Cyclic {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::of::<Cyclic>()]
        }

        fn construct(_arguments: &mut ResolvedArguments) -> anyhow::Result<Self> {
            Ok(Self)
        }
    }

    fn clock_factory(type_id: TypeId, _name: &'static str) -> Option<Instance> {
        (type_id == TypeId::of::<Clock>()).then(|| Arc::new(Clock) as Instance)
    }

    #[test]
    fn internal_strategy_builds_the_dependency_graph() {
        let resolver = ObjectResolver::builder()
            .factory(clock_factory)
            .injectable::<Repository>()
            .injectable::<Service>()
            .build();

        let (service, resolved) = resolver.resolve_as::<Service>("resolver").unwrap();
        assert!(resolved.is_internal());
        assert!(Arc::strong_count(&service.repository.clock) >= 1);

        let before = RELEASED.load(Ordering::SeqCst);
        resolved.release();
        assert_eq!(RELEASED.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn plans_are_cached_per_type_and_stage() {
        let resolver = ObjectResolver::builder()
            .factory(clock_factory)
            .injectable::<Repository>()
            .build();

        resolver.resolve(TypeId::of::<Repository>(), "Repository", "a").unwrap();
        resolver.resolve(TypeId::of::<Repository>(), "Repository", "a").unwrap();
        assert_eq!(resolver.cached_plans(), 1);

        resolver.resolve(TypeId::of::<Repository>(), "Repository", "b").unwrap();
        assert_eq!(resolver.cached_plans(), 2);

        resolver.clear_cache();
        assert_eq!(resolver.cached_plans(), 0);
    }

    #[test]
    fn external_instances_are_not_owned() {
        let resolver = ObjectResolver::builder()
            .strategy(ResolutionStrategy::External)
            .factory(clock_factory)
            .build();

        let resolved = resolver.resolve(TypeId::of::<Clock>(), "Clock", "resolver").unwrap();
        assert!(!resolved.is_internal());

        let missing = resolver.resolve(TypeId::of::<Service>(), "Service", "resolver");
        assert!(matches!(missing, Err(PipelineError::CannotResolve { .. })));
    }

    #[test]
    fn unsatisfiable_dependency_cannot_resolve() {
        let resolver = ObjectResolver::builder().injectable::<Repository>().build();
        let error = resolver
            .resolve(TypeId::of::<Repository>(), "Repository", "resolver")
            .unwrap_err();
        assert!(error.to_string().contains("Clock"), "{error}");
    }

    #[test]
    fn cycles_hit_the_depth_limit() {
        let resolver = ObjectResolver::builder().injectable::<Cyclic>().max_depth(4).build();
        let error = resolver.resolve(TypeId::of::<Cyclic>(), "Cyclic", "resolver").unwrap_err();
        assert!(error.to_string().contains("exceeds 4 levels"), "{error}");
    }

    static LEDGERS_RELEASED: AtomicUsize = AtomicUsize::new(0);

    struct Ledger;

    impl Injectable for Ledger {
        fn construct(_arguments: &mut ResolvedArguments) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn release(&self) {
            LEDGERS_RELEASED.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Auditor;

    impl Injectable for Auditor {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::of::<Ledger>(), Dependency::of::<Ledger>()]
        }

        fn construct(_arguments: &mut ResolvedArguments) -> anyhow::Result<Self> {
            anyhow::bail!("auditor is offline")
        }
    }

    #[test]
    fn failed_constructor_releases_the_dependencies_already_built() {
        let resolver = ObjectResolver::builder()
            .injectable::<Ledger>()
            .injectable::<Auditor>()
            .build();

        let error = resolver.resolve(TypeId::of::<Auditor>(), "Auditor", "resolver").unwrap_err();

        assert!(error.to_string().contains("auditor is offline"), "{error}");
        assert_eq!(LEDGERS_RELEASED.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn strategy_parses_from_configuration_strings() {
        assert_eq!("External".parse(), Ok(ResolutionStrategy::External));
        assert_eq!(" internal ".parse(), Ok(ResolutionStrategy::Internal));
        assert!("pooled".parse::<ResolutionStrategy>().is_err());
    }
}
