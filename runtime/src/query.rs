//! Query invocation capture.
//!
//! A query is a method call on a *query object*. Methods are registered
//! explicitly on a [`QueryObject<T>`], which hands back a typed
//! [`QueryMethod<T, A, R>`] handle. Calling the handle with a complete argument
//! tuple captures a [`QueryCall<T, R>`] that the query pipeline executes.
//!
//! The same registrations back the dynamic path: a message whose content type
//! is `"Owner.method"` and whose payload is a name → value map is matched
//! against the [`QueryRegistry`], and each argument is coerced into the
//! declared parameter type. Both paths converge on the same stored adapter,
//! so a dynamic call with `{"a": 10, "b": 20}` behaves exactly like the typed
//! call `sum.call((10, 20))`.
//!
//! # Example
//!
//! ```
//! use courier_runtime::query::{QueryObject, QueryRegistry};
//!
//! struct Calculator;
//!
//! let mut calculator = QueryObject::<Calculator>::named("Math.Calculator");
//! let sum = calculator.method("sum", &["a", "b"], |_: &Calculator, (a, b): (i64, i64)| Ok(a + b));
//!
//! let mut builder = QueryRegistry::builder();
//! builder.object(calculator).unwrap();
//! let registry = builder.build();
//!
//! assert_eq!(sum.descriptor().content_type(), "Math.Calculator.sum");
//! assert!(registry.locate("Math.Calculator.sum", None).is_ok());
//! ```

use crate::registry::DynInstance;
use crate::resolver::Instance;
use courier_core::error::PipelineError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Argument tuples accepted by query methods (arity 0 to 6).
pub trait QueryArgs: Send + Sized + 'static {
    /// Number of parameters.
    const ARITY: usize;

    /// Parameter type names, in order.
    fn type_names() -> Vec<&'static str>;

    /// Serialize into a parameter name → value map.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ArgumentBinding`] if a value fails to serialize.
    fn to_arguments(&self, method: &str, parameters: &[&'static str]) -> Result<Map<String, Value>, PipelineError>;

    /// Coerce a name → value map into the tuple.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ArgumentBinding`] naming the first parameter
    /// that cannot be coerced.
    fn bind(method: &str, parameters: &[&'static str], arguments: &Map<String, Value>) -> Result<Self, PipelineError>;
}

/// Serialize one typed argument, refusing values whose JSON form does not bind
/// back (non-finite floats serialize as `null`).
fn serialize_argument<V: Serialize + DeserializeOwned>(
    method: &str,
    parameter: &str,
    value: &V,
) -> Result<Value, PipelineError> {
    let refused = |reason: String| PipelineError::ArgumentBinding {
        method: method.to_string(),
        parameter: parameter.to_string(),
        reason,
    };
    let encoded = serde_json::to_value(value).map_err(|error| refused(error.to_string()))?;
    serde_json::from_value::<V>(encoded.clone())
        .map_err(|error| refused(format!("value has no JSON representation that binds back ({error})")))?;
    Ok(encoded)
}

fn bind_argument<V: DeserializeOwned>(
    method: &str,
    parameter: &str,
    arguments: &Map<String, Value>,
) -> Result<V, PipelineError> {
    let value = arguments.get(parameter).cloned().unwrap_or(Value::Null);
    let direct = serde_json::from_value::<V>(value.clone());
    match (direct, &value) {
        (Ok(bound), _) => Ok(bound),
        // Untyped input (query strings, forms) carries scalars as text.
        (Err(error), Value::String(text)) => serde_json::from_str::<V>(text).map_err(|_| binding_error(method, parameter, &error)),
        (Err(error), _) => Err(binding_error(method, parameter, &error)),
    }
}

fn binding_error(method: &str, parameter: &str, error: &serde_json::Error) -> PipelineError {
    PipelineError::ArgumentBinding {
        method: method.to_string(),
        parameter: parameter.to_string(),
        reason: error.to_string(),
    }
}

impl QueryArgs for () {
    const ARITY: usize = 0;

    fn type_names() -> Vec<&'static str> {
        Vec::new()
    }

    fn to_arguments(&self, _method: &str, _parameters: &[&'static str]) -> Result<Map<String, Value>, PipelineError> {
        Ok(Map::new())
    }

    fn bind(_method: &str, _parameters: &[&'static str], _arguments: &Map<String, Value>) -> Result<Self, PipelineError> {
        Ok(())
    }
}

macro_rules! impl_query_args {
    ($arity:expr; $($ty:ident $var:ident),+) => {
        impl<$($ty),+> QueryArgs for ($($ty,)+)
        where
            $($ty: Serialize + DeserializeOwned + Send + 'static),+
        {
            const ARITY: usize = $arity;

            fn type_names() -> Vec<&'static str> {
                vec![$(type_name::<$ty>()),+]
            }

            fn to_arguments(&self, method: &str, parameters: &[&'static str]) -> Result<Map<String, Value>, PipelineError> {
                let ($($var,)+) = self;
                let mut names = parameters.iter().copied();
                let mut arguments = Map::new();
                $(
                    let name = names.next().unwrap_or_default();
                    arguments.insert(name.to_string(), serialize_argument(method, name, $var)?);
                )+
                Ok(arguments)
            }

            fn bind(method: &str, parameters: &[&'static str], arguments: &Map<String, Value>) -> Result<Self, PipelineError> {
                let mut names = parameters.iter().copied();
                Ok(($(bind_argument::<$ty>(method, names.next().unwrap_or_default(), arguments)?,)+))
            }
        }
    };
}

impl_query_args!(1; A a);
impl_query_args!(2; A a, B b);
impl_query_args!(3; A a, B b, C c);
impl_query_args!(4; A a, B b, C c, D d);
impl_query_args!(5; A a, B b, C c, D d, E e);
impl_query_args!(6; A a, B b, C c, D d, E e, F f);

/// Static description of a registered query method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMethodDescriptor {
    owner_type: TypeId,
    owner_type_name: &'static str,
    owner: String,
    method: &'static str,
    parameters: Vec<&'static str>,
    parameter_types: Vec<&'static str>,
    result_type: &'static str,
}

impl QueryMethodDescriptor {
    /// `TypeId` of the declaring query object.
    #[must_use]
    pub const fn owner_type(&self) -> TypeId {
        self.owner_type
    }

    /// Rust type name of the declaring query object.
    #[must_use]
    pub const fn owner_type_name(&self) -> &'static str {
        self.owner_type_name
    }

    /// Registered owner name.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Method name.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        self.method
    }

    /// Parameter names, in order.
    #[must_use]
    pub fn parameters(&self) -> &[&'static str] {
        &self.parameters
    }

    /// Parameter type names, in order.
    #[must_use]
    pub fn parameter_types(&self) -> &[&'static str] {
        &self.parameter_types
    }

    /// Result type name.
    #[must_use]
    pub const fn result_type(&self) -> &'static str {
        self.result_type
    }

    /// `"Owner.method"`, the content type of query messages.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("{}.{}", self.owner, self.method)
    }

    fn accepts(&self, arguments: &Map<String, Value>) -> bool {
        self.parameters.len() == arguments.len() && self.parameters.iter().all(|p| arguments.contains_key(*p))
    }
}

type Invoke = Box<dyn Fn(&QueryMethodDescriptor, &DynInstance, &Map<String, Value>) -> Result<Box<DynInstance>, PipelineError> + Send + Sync>;

/// Registered adapter: the descriptor plus type-erased invoke and projection.
pub struct QueryMethodEntry {
    descriptor: QueryMethodDescriptor,
    invoke: Invoke,
    project: fn(&DynInstance) -> Option<Result<Value, serde_json::Error>>,
}

impl QueryMethodEntry {
    /// Method description.
    #[must_use]
    pub const fn descriptor(&self) -> &QueryMethodDescriptor {
        &self.descriptor
    }

    /// Bind `arguments` and call the method on `target`.
    ///
    /// # Errors
    ///
    /// `CannotResolve` if `target` is not the owner type, `ArgumentBinding` if
    /// an argument cannot be coerced, `HandlerExecution` if the method fails.
    pub fn invoke(&self, target: &DynInstance, arguments: &Map<String, Value>) -> Result<Box<DynInstance>, PipelineError> {
        (self.invoke)(&self.descriptor, target, arguments)
    }

    /// JSON projection of an output produced by [`QueryMethodEntry::invoke`].
    #[must_use]
    pub fn project(&self, output: &DynInstance) -> Option<Result<Value, serde_json::Error>> {
        (self.project)(output)
    }
}

impl fmt::Debug for QueryMethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QueryMethodEntry").field(&self.descriptor).finish()
    }
}

fn project<R: Serialize + Any>(output: &DynInstance) -> Option<Result<Value, serde_json::Error>> {
    output.downcast_ref::<R>().map(serde_json::to_value)
}

/// Method registrations for one query object type.
pub struct QueryObject<T> {
    name: String,
    methods: Vec<Arc<QueryMethodEntry>>,
    _owner: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> QueryObject<T> {
    /// Register under the Rust type name of `T`.
    #[must_use]
    pub fn new() -> Self {
        Self::named(type_name::<T>())
    }

    /// Register under an explicit owner name, e.g. `"Reports.Sales"`.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            _owner: PhantomData,
        }
    }

    /// Owner name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a method and return its typed handle.
    ///
    /// `parameters` names the tuple elements of `A` in order; the names are
    /// the keys of dynamic argument maps.
    pub fn method<A, R, F>(&mut self, name: &'static str, parameters: &[&'static str], method: F) -> QueryMethod<T, A, R>
    where
        A: QueryArgs,
        R: Serialize + Send + Sync + 'static,
        F: Fn(&T, A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let descriptor = QueryMethodDescriptor {
            owner_type: TypeId::of::<T>(),
            owner_type_name: type_name::<T>(),
            owner: self.name.clone(),
            method: name,
            parameters: parameters.to_vec(),
            parameter_types: A::type_names(),
            result_type: type_name::<R>(),
        };
        let invoke: Invoke = Box::new(move |descriptor, target, arguments| {
            let target = target.downcast_ref::<T>().ok_or_else(|| PipelineError::CannotResolve {
                type_name: type_name::<T>().to_string(),
                reason: "query target has another type".to_string(),
            })?;
            let arguments = A::bind(&descriptor.content_type(), &descriptor.parameters, arguments)?;
            let output = method(target, arguments).map_err(PipelineError::HandlerExecution)?;
            Ok(Box::new(output) as Box<DynInstance>)
        });
        let entry = Arc::new(QueryMethodEntry {
            descriptor,
            invoke,
            project: project::<R>,
        });
        self.methods.push(Arc::clone(&entry));
        QueryMethod {
            entry,
            _signature: PhantomData,
        }
    }
}

impl<T: Any + Send + Sync> Default for QueryObject<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed handle to a registered query method.
pub struct QueryMethod<T, A, R> {
    entry: Arc<QueryMethodEntry>,
    _signature: PhantomData<fn(&T, A) -> R>,
}

impl<T, A: QueryArgs, R> QueryMethod<T, A, R> {
    /// Capture a call with a complete argument tuple.
    #[must_use]
    pub fn call(&self, arguments: A) -> QueryCall<T, R> {
        let descriptor = self.entry.descriptor();
        QueryCall {
            arguments: arguments.to_arguments(&descriptor.content_type(), descriptor.parameters()),
            entry: Arc::clone(&self.entry),
            _signature: PhantomData,
        }
    }

    /// Method description.
    #[must_use]
    pub fn descriptor(&self) -> &QueryMethodDescriptor {
        self.entry.descriptor()
    }
}

impl<T, A, R> Clone for QueryMethod<T, A, R> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            _signature: PhantomData,
        }
    }
}

impl<T, A, R> fmt::Debug for QueryMethod<T, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QueryMethod").field(self.entry.descriptor()).finish()
    }
}

/// A fully captured invocation of a query method on `T` returning `R`.
pub struct QueryCall<T, R> {
    entry: Arc<QueryMethodEntry>,
    arguments: Result<Map<String, Value>, PipelineError>,
    _signature: PhantomData<fn(&T) -> R>,
}

impl<T, R> QueryCall<T, R> {
    /// Method description.
    #[must_use]
    pub fn descriptor(&self) -> &QueryMethodDescriptor {
        self.entry.descriptor()
    }

    pub(crate) fn into_parts(self) -> (Arc<QueryMethodEntry>, Result<Map<String, Value>, PipelineError>) {
        (self.entry, self.arguments)
    }
}

impl<T, R> fmt::Debug for QueryCall<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCall")
            .field("method", &self.entry.descriptor().content_type())
            .field("arguments", &self.arguments.as_ref().ok())
            .finish()
    }
}

/// The method and optional pre-constructed target of a query message.
#[derive(Clone)]
pub struct QueryInvocation {
    method: Arc<QueryMethodEntry>,
    target: Option<Instance>,
}

impl QueryInvocation {
    /// Invocation of `method` on a target resolved later.
    #[must_use]
    pub const fn new(method: Arc<QueryMethodEntry>) -> Self {
        Self { method, target: None }
    }

    /// Invocation on a caller-supplied target.
    #[must_use]
    pub fn with_target(mut self, target: Instance) -> Self {
        self.target = Some(target);
        self
    }

    /// The method adapter.
    #[must_use]
    pub fn method(&self) -> &Arc<QueryMethodEntry> {
        &self.method
    }

    /// The caller-supplied target, if any.
    #[must_use]
    pub const fn target(&self) -> Option<&Instance> {
        self.target.as_ref()
    }
}

impl fmt::Debug for QueryInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryInvocation")
            .field("method", &self.method.descriptor().content_type())
            .field("has_target", &self.target.is_some())
            .finish()
    }
}

/// Collects query objects.
#[derive(Default)]
pub struct QueryRegistryBuilder {
    objects: HashMap<String, (TypeId, Vec<Arc<QueryMethodEntry>>)>,
}

impl QueryRegistryBuilder {
    /// Register every method of `object`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] if the owner name is taken by
    /// another type, a method's parameter names do not match its arity, or two
    /// methods share a name and parameter list.
    pub fn object<T: Any + Send + Sync>(&mut self, object: QueryObject<T>) -> Result<&mut Self, PipelineError> {
        let (owner_type, methods) = self
            .objects
            .entry(object.name.clone())
            .or_insert_with(|| (TypeId::of::<T>(), Vec::new()));
        if *owner_type != TypeId::of::<T>() {
            return Err(PipelineError::Configuration(format!(
                "query object name `{}` is already registered for another type",
                object.name
            )));
        }
        for entry in object.methods {
            let descriptor = entry.descriptor();
            if descriptor.parameters.len() != descriptor.parameter_types.len() {
                return Err(PipelineError::Configuration(format!(
                    "{} declares {} parameter names for {} arguments",
                    descriptor.content_type(),
                    descriptor.parameters.len(),
                    descriptor.parameter_types.len()
                )));
            }
            let duplicate = methods.iter().any(|existing| {
                existing.descriptor().method == descriptor.method
                    && existing.descriptor().parameters == descriptor.parameters
            });
            if duplicate {
                return Err(PipelineError::Configuration(format!(
                    "{} is registered twice with the same parameters",
                    descriptor.content_type()
                )));
            }
            methods.push(entry);
        }
        Ok(self)
    }

    /// Freeze the registrations.
    #[must_use]
    pub fn build(self) -> QueryRegistry {
        QueryRegistry {
            objects: self.objects.into_iter().map(|(name, (_, methods))| (name, methods)).collect(),
        }
    }
}

/// Owner name → registered query methods.
#[derive(Default)]
pub struct QueryRegistry {
    objects: HashMap<String, Vec<Arc<QueryMethodEntry>>>,
}

impl QueryRegistry {
    /// Start collecting query objects.
    #[must_use]
    pub fn builder() -> QueryRegistryBuilder {
        QueryRegistryBuilder::default()
    }

    /// Find the method named by `content_type` (`"Owner.method"`).
    ///
    /// Overloads are chosen by name, then by matching parameter count and
    /// names against `arguments`. Without arguments the first overload wins.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::HandlerNotFound`] for unknown owners, methods,
    /// or when no overload fits the arguments.
    pub fn locate(&self, content_type: &str, arguments: Option<&Map<String, Value>>) -> Result<Arc<QueryMethodEntry>, PipelineError> {
        let not_found = || PipelineError::HandlerNotFound {
            message_type: content_type.to_string(),
        };
        let (owner, method) = content_type.rsplit_once('.').ok_or_else(not_found)?;
        let candidates: Vec<_> = self
            .objects
            .get(owner)
            .ok_or_else(not_found)?
            .iter()
            .filter(|entry| entry.descriptor().method == method)
            .collect();

        let chosen = match (candidates.as_slice(), arguments) {
            ([], _) => None,
            ([only], _) => Some(*only),
            ([first, ..], None) => Some(*first),
            (many, Some(arguments)) => many
                .iter()
                .find(|entry| entry.descriptor().accepts(arguments))
                .or_else(|| {
                    many.iter()
                        .find(|entry| entry.descriptor().parameters.len() == arguments.len())
                })
                .copied(),
        };
        chosen.map(Arc::clone).ok_or_else(not_found)
    }

    /// Number of registered owners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl fmt::Debug for QueryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.objects.keys()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on registration errors
mod tests {
    use super::*;
    use serde_json::json;

    struct Calculator {
        offset: i64,
    }

    impl Calculator {
        const fn sum(&self, a: i64, b: i64) -> i64 {
            a + b + self.offset
        }
    }

    fn registry() -> (QueryRegistry, QueryMethod<Calculator, (i64, i64), i64>) {
        let mut calculator = QueryObject::<Calculator>::named("Math.Calculator");
        let sum = calculator.method("sum", &["a", "b"], |c: &Calculator, (a, b): (i64, i64)| Ok(c.sum(a, b)));
        calculator.method("sum", &["values"], |_: &Calculator, (values,): (Vec<i64>,)| {
            Ok(values.iter().sum::<i64>())
        });
        calculator.method("zero", &[], |_: &Calculator, (): ()| Ok(0_i64));
        let mut builder = QueryRegistry::builder();
        builder.object(calculator).unwrap();
        (builder.build(), sum)
    }

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn run(entry: &QueryMethodEntry, arguments: &Map<String, Value>) -> Result<Value, PipelineError> {
        let target = Calculator { offset: 0 };
        let output = entry.invoke(&target, arguments)?;
        Ok(entry.project(output.as_ref()).unwrap().unwrap())
    }

    #[test]
    fn typed_call_captures_owner_and_arguments() {
        let (_, sum) = registry();
        let call = sum.call((2, 3));

        assert_eq!(call.descriptor().owner_type(), TypeId::of::<Calculator>());
        assert_eq!(call.descriptor().content_type(), "Math.Calculator.sum");
        assert_eq!(call.descriptor().parameter_types(), ["i64", "i64"]);
        let (entry, arguments) = call.into_parts();
        let arguments = arguments.unwrap();
        assert_eq!(Value::Object(arguments.clone()), json!({"a": 2, "b": 3}));
        assert_eq!(run(&entry, &arguments).unwrap(), json!(5));
    }

    #[test]
    fn dynamic_call_picks_the_overload_by_argument_names() {
        let (registry, _) = registry();

        let pair = map(json!({"a": 10, "b": 20}));
        let entry = registry.locate("Math.Calculator.sum", Some(&pair)).unwrap();
        assert_eq!(run(&entry, &pair).unwrap(), json!(30));

        let list = map(json!({"values": [1, 2, 3]}));
        let entry = registry.locate("Math.Calculator.sum", Some(&list)).unwrap();
        assert_eq!(run(&entry, &list).unwrap(), json!(6));
    }

    #[test]
    fn textual_scalars_are_coerced() {
        let (registry, _) = registry();
        let arguments = map(json!({"a": "10", "b": 5}));
        let entry = registry.locate("Math.Calculator.sum", Some(&arguments)).unwrap();
        assert_eq!(run(&entry, &arguments).unwrap(), json!(15));
    }

    #[test]
    fn uncoercible_argument_names_the_parameter() {
        let (registry, _) = registry();
        let arguments = map(json!({"a": "ten", "b": 5}));
        let entry = registry.locate("Math.Calculator.sum", Some(&arguments)).unwrap();

        match run(&entry, &arguments) {
            Err(PipelineError::ArgumentBinding { method, parameter, .. }) => {
                assert_eq!(method, "Math.Calculator.sum");
                assert_eq!(parameter, "a");
            }
            other => unreachable!("expected a binding error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_owner_or_method_is_not_found() {
        let (registry, _) = registry();
        for content_type in ["Math.Abacus.sum", "Math.Calculator.product", "sum"] {
            assert!(matches!(
                registry.locate(content_type, None),
                Err(PipelineError::HandlerNotFound { .. })
            ));
        }
        assert!(registry.locate("Math.Calculator.zero", Some(&Map::new())).is_ok());
    }

    #[test]
    fn mismatched_parameter_names_are_a_configuration_error() {
        let mut object = QueryObject::<Calculator>::new();
        object.method("sum", &["a"], |c: &Calculator, (a, b): (i64, i64)| Ok(c.sum(a, b)));
        let mut builder = QueryRegistry::builder();
        assert!(matches!(builder.object(object), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn owner_names_are_unique_per_type() {
        struct Other;
        let mut builder = QueryRegistry::builder();
        builder.object(QueryObject::<Calculator>::named("Shared")).unwrap();
        let error = builder.object(QueryObject::<Other>::named("Shared")).err();
        assert!(matches!(error, Some(PipelineError::Configuration(_))));
    }
}
