//! Pipeline facades.
//!
//! [`CommandPipeline`], [`EventPipeline`] and [`QueryPipeline`] wrap a
//! [`MessagePipeline`] with typed entry points and a default middleware chain
//! built from shared [`PipelineComponents`]. A [`PipelineContainer`] holds at
//! most one pipeline of each kind and forwards to it.
//!
//! # Example
//!
//! ```
//! use courier_runtime::pipelines::{CommandPipeline, PipelineComponents};
//! use courier_runtime::registry::{HandlerRegistry, SelfHandling};
//! use serde::Serialize;
//!
//! #[derive(Debug, Serialize)]
//! struct Tick { count: u32 }
//!
//! impl SelfHandling for Tick {
//!     fn handle(&mut self) -> anyhow::Result<()> {
//!         self.count += 1;
//!         Ok(())
//!     }
//! }
//!
//! let mut handlers = HandlerRegistry::builder();
//! handlers.self_handling::<Tick>();
//! let components = PipelineComponents::default().with_handlers(handlers.build());
//!
//! let pipeline = CommandPipeline::with_default_middlewares(&components);
//! let tick = pipeline.handle(Tick { count: 1 }).unwrap();
//! assert_eq!(tick.count, 2);
//! ```

use crate::blocking::BlockingDriver;
use crate::config::PipelineConfig;
use crate::middleware::{
    HandlerExecutorMiddleware, HandlerLocatorMiddleware, HandlerResolverMiddleware, QueryExecutorMiddleware,
    QueryObjectResolverMiddleware, RepositoryMiddleware, ValidationMiddleware, keys,
};
use crate::pipeline::MessagePipeline;
use crate::query::{QueryCall, QueryInvocation, QueryRegistry};
use crate::registry::{DynInstance, HandlerRegistry};
use crate::repository::DiscardRepository;
use crate::resolver::{Instance, ObjectResolver};
use crate::validation::Validators;
use courier_core::environment::{Clock, SystemClock};
use courier_core::error::{MessageError, PipelineError};
use courier_core::message::{Content, Message, MessageKind, ProcessingStatus};
use courier_core::repository::MessageRepository;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Why a typed pipeline call produced no value.
#[derive(Error, Debug)]
pub enum PipelineFailure {
    /// The message was rejected or failed.
    #[error("Message {id} {status}: {}", error.message)]
    Unsuccessful {
        /// Message id.
        id: Uuid,
        /// Terminal status.
        status: ProcessingStatus,
        /// Captured error.
        error: MessageError,
    },

    /// The message ended without completing and without an error.
    #[error("Message {id} ended as {status}")]
    Incomplete {
        /// Message id.
        id: Uuid,
        /// Final status.
        status: ProcessingStatus,
    },

    /// The message completed but produced no value of the expected type.
    #[error("Message {0} completed without the expected result")]
    MissingResult(Uuid),

    /// The call was refused before submission.
    #[error("Invalid call: {0}")]
    InvalidCall(#[source] PipelineError),

    /// No pipeline of this kind is configured.
    #[error("No {0} pipeline is configured")]
    NotConfigured(MessageKind),
}

impl PipelineFailure {
    /// Captured error of an unsuccessful message.
    #[must_use]
    pub const fn message_error(&self) -> Option<&MessageError> {
        match self {
            Self::Unsuccessful { error, .. } => Some(error),
            _ => None,
        }
    }
}

fn outcome(message: &Message) -> Result<(), PipelineFailure> {
    match (message.status(), message.error()) {
        (ProcessingStatus::Completed, _) => Ok(()),
        (status, Some(error)) => Err(PipelineFailure::Unsuccessful {
            id: message.id(),
            status,
            error: error.clone(),
        }),
        (status, None) => Err(PipelineFailure::Incomplete {
            id: message.id(),
            status,
        }),
    }
}

fn into_content<C: Any>(message: Message) -> Result<C, PipelineFailure> {
    outcome(&message)?;
    let id = message.id();
    message.into_content::<C>().ok_or(PipelineFailure::MissingResult(id))
}

/// Collaborators shared by the default middleware chains.
#[derive(Clone)]
pub struct PipelineComponents {
    handlers: Arc<HandlerRegistry>,
    queries: Arc<QueryRegistry>,
    resolver: Arc<ObjectResolver>,
    validators: Arc<Validators>,
    repository: Arc<dyn MessageRepository>,
    clock: Arc<dyn Clock>,
    driver: BlockingDriver,
    config: PipelineConfig,
}

impl PipelineComponents {
    /// Empty registries, a resolver preset from `config`, no persistence
    /// target and the system clock.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            handlers: Arc::new(HandlerRegistry::default()),
            queries: Arc::new(QueryRegistry::default()),
            resolver: Arc::new(config.resolver().build()),
            validators: Arc::new(Validators::new()),
            repository: Arc::new(DiscardRepository),
            clock: Arc::new(SystemClock),
            driver: BlockingDriver::new(),
            config,
        }
    }

    /// Set the handler registry
    #[must_use]
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    /// Set the query registry
    #[must_use]
    pub fn with_queries(mut self, queries: QueryRegistry) -> Self {
        self.queries = Arc::new(queries);
        self
    }

    /// Set the object resolver
    #[must_use]
    pub fn with_resolver(mut self, resolver: ObjectResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Set the validators
    #[must_use]
    pub fn with_validators(mut self, validators: Validators) -> Self {
        self.validators = Arc::new(validators);
        self
    }

    /// Set the repository
    #[must_use]
    pub fn with_repository(mut self, repository: Arc<dyn MessageRepository>) -> Self {
        self.repository = repository;
        self
    }

    /// Set the clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run async handlers and repository writes of blocking calls on `handle`
    ///
    /// By default the runtime current at construction is used, if any.
    #[must_use]
    pub fn with_runtime(mut self, handle: tokio::runtime::Handle) -> Self {
        self.driver = BlockingDriver::with_handle(handle);
        self
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Object resolver.
    #[must_use]
    pub const fn resolver(&self) -> &Arc<ObjectResolver> {
        &self.resolver
    }

    fn handler_chain(&self, locator: HandlerLocatorMiddleware) -> MessagePipeline {
        let mut pipeline = MessagePipeline::new();
        pipeline
            .add_middleware(ValidationMiddleware::new(Arc::clone(&self.validators)))
            .add_middleware(locator)
            .add_middleware(HandlerResolverMiddleware::new(Arc::clone(&self.resolver)))
            .add_middleware(
                HandlerExecutorMiddleware::new()
                    .with_duration(self.config.include_execution_duration)
                    .with_driver(self.driver.clone()),
            );
        self.persistence(&mut pipeline);
        pipeline
    }

    fn query_chain(&self) -> MessagePipeline {
        let mut pipeline = MessagePipeline::new();
        pipeline
            .add_middleware(QueryObjectResolverMiddleware::new(
                Arc::clone(&self.queries),
                Arc::clone(&self.resolver),
            ))
            .add_middleware(QueryExecutorMiddleware::new().with_duration(self.config.include_execution_duration));
        self.persistence(&mut pipeline);
        pipeline
    }

    fn persistence(&self, pipeline: &mut MessagePipeline) {
        if self.config.persist_messages {
            pipeline.add_middleware(RepositoryMiddleware::new(Arc::clone(&self.repository)).with_driver(self.driver.clone()));
        }
    }
}

impl Default for PipelineComponents {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl fmt::Debug for PipelineComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineComponents")
            .field("handlers", &self.handlers)
            .field("queries", &self.queries)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Command entry point.
#[derive(Clone)]
pub struct CommandPipeline {
    pipeline: MessagePipeline,
    clock: Arc<dyn Clock>,
}

impl CommandPipeline {
    /// Wrap a custom chain.
    #[must_use]
    pub fn new(pipeline: MessagePipeline, clock: Arc<dyn Clock>) -> Self {
        Self { pipeline, clock }
    }

    /// validation → locator (single) → resolver → executor → repository.
    #[must_use]
    pub fn with_default_middlewares(components: &PipelineComponents) -> Self {
        Self::new(
            components.handler_chain(HandlerLocatorMiddleware::single(Arc::clone(&components.handlers))),
            Arc::clone(&components.clock),
        )
    }

    /// The wrapped chain.
    #[must_use]
    pub const fn pipeline(&self) -> &MessagePipeline {
        &self.pipeline
    }

    /// Wrap `command` in a message stamped by the clock.
    #[must_use]
    pub fn message<C: Content>(&self, command: C) -> Message {
        Message::command(command).with_created_at(self.clock.now())
    }

    /// Process a command and return it as left by its handler.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure`] if the command was rejected or failed.
    pub fn handle<C: Content>(&self, command: C) -> Result<C, PipelineFailure> {
        into_content(self.pipeline.process(self.message(command)))
    }

    /// Suspension-capable form of [`CommandPipeline::handle`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure`] if the command was rejected, failed or cancelled.
    pub async fn handle_async<C: Content>(&self, command: C, cancel: &CancellationToken) -> Result<C, PipelineFailure> {
        into_content(self.pipeline.process_async(self.message(command), cancel).await)
    }

    /// Process a prepared message, returning it in its final state.
    #[must_use]
    pub fn process(&self, message: Message) -> Message {
        self.pipeline.process(message)
    }
}

impl fmt::Debug for CommandPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CommandPipeline").field(&self.pipeline).finish()
    }
}

/// Event entry point; every registered handler receives the event.
#[derive(Clone)]
pub struct EventPipeline {
    pipeline: MessagePipeline,
    clock: Arc<dyn Clock>,
}

impl EventPipeline {
    /// Wrap a custom chain.
    #[must_use]
    pub fn new(pipeline: MessagePipeline, clock: Arc<dyn Clock>) -> Self {
        Self { pipeline, clock }
    }

    /// validation → locator (all) → resolver → executor → repository.
    #[must_use]
    pub fn with_default_middlewares(components: &PipelineComponents) -> Self {
        Self::new(
            components.handler_chain(HandlerLocatorMiddleware::all(Arc::clone(&components.handlers))),
            Arc::clone(&components.clock),
        )
    }

    /// The wrapped chain.
    #[must_use]
    pub const fn pipeline(&self) -> &MessagePipeline {
        &self.pipeline
    }

    /// Wrap `event` in a message stamped by the clock.
    #[must_use]
    pub fn message<E: Content>(&self, event: E) -> Message {
        Message::event(event).with_created_at(self.clock.now())
    }

    /// Raise an event.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure`] if no handler exists or one of them failed.
    pub fn raise<E: Content>(&self, event: E) -> Result<E, PipelineFailure> {
        into_content(self.pipeline.process(self.message(event)))
    }

    /// Suspension-capable form of [`EventPipeline::raise`].
    ///
    /// # Errors
    ///
    /// See [`EventPipeline::raise`].
    pub async fn raise_async<E: Content>(&self, event: E, cancel: &CancellationToken) -> Result<E, PipelineFailure> {
        into_content(self.pipeline.process_async(self.message(event), cancel).await)
    }

    /// Process a prepared message, returning it in its final state.
    #[must_use]
    pub fn process(&self, message: Message) -> Message {
        self.pipeline.process(message)
    }
}

impl fmt::Debug for EventPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventPipeline").field(&self.pipeline).finish()
    }
}

/// Query entry point.
#[derive(Clone)]
pub struct QueryPipeline {
    pipeline: MessagePipeline,
    clock: Arc<dyn Clock>,
}

impl QueryPipeline {
    /// Wrap a custom chain.
    #[must_use]
    pub fn new(pipeline: MessagePipeline, clock: Arc<dyn Clock>) -> Self {
        Self { pipeline, clock }
    }

    /// query resolver → query executor → repository.
    #[must_use]
    pub fn with_default_middlewares(components: &PipelineComponents) -> Self {
        Self::new(components.query_chain(), Arc::clone(&components.clock))
    }

    /// The wrapped chain.
    #[must_use]
    pub const fn pipeline(&self) -> &MessagePipeline {
        &self.pipeline
    }

    /// Start a typed query against objects of type `T`.
    #[must_use]
    pub fn query<T: Any + Send + Sync>(&self) -> QueryRequest<'_, T> {
        QueryRequest {
            pipeline: self,
            target: None,
            _owner: PhantomData,
        }
    }

    /// Process a dynamic query (`"Owner.method"` plus an argument map).
    ///
    /// The result is left in [`Message::result`].
    #[must_use]
    pub fn process_raw(&self, message: Message) -> Message {
        self.pipeline.process(message)
    }

    /// Suspension-capable form of [`QueryPipeline::process_raw`].
    pub async fn process_raw_async(&self, message: Message, cancel: &CancellationToken) -> Message {
        self.pipeline.process_async(message, cancel).await
    }

    fn prepare<T, R>(&self, call: QueryCall<T, R>, target: Option<Instance>) -> Result<Message, PipelineFailure> {
        let (method, arguments) = call.into_parts();
        let arguments = arguments.map_err(PipelineFailure::InvalidCall)?;
        let mut message =
            Message::query(method.descriptor().content_type(), arguments).with_created_at(self.clock.now());
        let invocation = QueryInvocation::new(method);
        let invocation = match target {
            Some(target) => invocation.with_target(target),
            None => invocation,
        };
        message.items_mut().insert(keys::QUERY_INVOCATION, invocation);
        Ok(message)
    }
}

fn query_output<R: Any>(mut message: Message) -> Result<R, PipelineFailure> {
    outcome(&message)?;
    message
        .items_mut()
        .take::<Box<DynInstance>>(keys::QUERY_OUTPUT)
        .and_then(|output| output.downcast::<R>().ok())
        .map(|output| *output)
        .ok_or_else(|| PipelineFailure::MissingResult(message.id()))
}

impl fmt::Debug for QueryPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QueryPipeline").field(&self.pipeline).finish()
    }
}

/// A typed query being prepared; see [`QueryPipeline::query`].
pub struct QueryRequest<'p, T> {
    pipeline: &'p QueryPipeline,
    target: Option<Instance>,
    _owner: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> QueryRequest<'_, T> {
    /// Run against a pre-constructed object instead of resolving one.
    #[must_use]
    pub fn on(mut self, target: Arc<T>) -> Self {
        self.target = Some(target);
        self
    }

    /// Execute `call` and return its typed result.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure`] if the query was refused, rejected or failed.
    pub fn with<R: Any>(self, call: QueryCall<T, R>) -> Result<R, PipelineFailure> {
        let message = self.pipeline.prepare(call, self.target)?;
        query_output(self.pipeline.pipeline.process(message))
    }

    /// Suspension-capable form of [`QueryRequest::with`].
    ///
    /// # Errors
    ///
    /// See [`QueryRequest::with`].
    pub async fn with_async<R: Any>(self, call: QueryCall<T, R>, cancel: &CancellationToken) -> Result<R, PipelineFailure> {
        let message = self.pipeline.prepare(call, self.target)?;
        query_output(self.pipeline.pipeline.process_async(message, cancel).await)
    }
}

/// At most one pipeline per message kind.
#[derive(Debug, Clone, Default)]
pub struct PipelineContainer {
    commands: Option<CommandPipeline>,
    events: Option<EventPipeline>,
    queries: Option<QueryPipeline>,
}

fn install<P>(slot: &mut Option<P>, pipeline: P, kind: MessageKind) -> Result<(), PipelineError> {
    if slot.is_some() {
        return Err(PipelineError::Configuration(format!("a {kind} pipeline is already registered")));
    }
    *slot = Some(pipeline);
    Ok(())
}

impl PipelineContainer {
    /// Empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One default pipeline of each kind.
    #[must_use]
    pub fn with_default_pipelines(components: &PipelineComponents) -> Self {
        Self {
            commands: Some(CommandPipeline::with_default_middlewares(components)),
            events: Some(EventPipeline::with_default_middlewares(components)),
            queries: Some(QueryPipeline::with_default_middlewares(components)),
        }
    }

    /// Register the command pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] if one is already registered.
    pub fn add_command_pipeline(&mut self, pipeline: CommandPipeline) -> Result<&mut Self, PipelineError> {
        install(&mut self.commands, pipeline, MessageKind::Command)?;
        Ok(self)
    }

    /// Register the event pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] if one is already registered.
    pub fn add_event_pipeline(&mut self, pipeline: EventPipeline) -> Result<&mut Self, PipelineError> {
        install(&mut self.events, pipeline, MessageKind::Event)?;
        Ok(self)
    }

    /// Register the query pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] if one is already registered.
    pub fn add_query_pipeline(&mut self, pipeline: QueryPipeline) -> Result<&mut Self, PipelineError> {
        install(&mut self.queries, pipeline, MessageKind::Query)?;
        Ok(self)
    }

    /// The command pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure::NotConfigured`] if none is registered.
    pub fn commands(&self) -> Result<&CommandPipeline, PipelineFailure> {
        self.commands.as_ref().ok_or(PipelineFailure::NotConfigured(MessageKind::Command))
    }

    /// The event pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure::NotConfigured`] if none is registered.
    pub fn events(&self) -> Result<&EventPipeline, PipelineFailure> {
        self.events.as_ref().ok_or(PipelineFailure::NotConfigured(MessageKind::Event))
    }

    /// The query pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure::NotConfigured`] if none is registered.
    pub fn queries(&self) -> Result<&QueryPipeline, PipelineFailure> {
        self.queries.as_ref().ok_or(PipelineFailure::NotConfigured(MessageKind::Query))
    }

    /// Forward to [`CommandPipeline::handle`].
    ///
    /// # Errors
    ///
    /// See [`CommandPipeline::handle`].
    pub fn handle<C: Content>(&self, command: C) -> Result<C, PipelineFailure> {
        self.commands()?.handle(command)
    }

    /// Forward to [`EventPipeline::raise`].
    ///
    /// # Errors
    ///
    /// See [`EventPipeline::raise`].
    pub fn raise<E: Content>(&self, event: E) -> Result<E, PipelineFailure> {
        self.events()?.raise(event)
    }

    /// Route a prepared message by kind.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure::NotConfigured`] if no pipeline handles the kind.
    pub fn process(&self, message: Message) -> Result<Message, PipelineFailure> {
        Ok(self.route(message.kind())?.process(message))
    }

    /// Route a prepared message by kind in suspension-capable mode.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure::NotConfigured`] if no pipeline handles the kind.
    pub async fn process_async(&self, message: Message, cancel: &CancellationToken) -> Result<Message, PipelineFailure> {
        Ok(self.route(message.kind())?.process_async(message, cancel).await)
    }

    fn route(&self, kind: MessageKind) -> Result<&MessagePipeline, PipelineFailure> {
        match kind {
            MessageKind::Command => self.commands().map(CommandPipeline::pipeline),
            MessageKind::Event => self.events().map(EventPipeline::pipeline),
            MessageKind::Query => self.queries().map(QueryPipeline::pipeline),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on pipeline errors
mod tests {
    use super::*;
    use crate::query::QueryObject;
    use crate::registry::MessageHandler;
    use crate::repository::InMemoryRepository;
    use crate::resolver::{Injectable, ResolvedArguments};
    use chrono::{TimeZone, Utc};
    use courier_core::error::ErrorKind;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct Rename {
        name: String,
    }

    struct Names;

    impl Injectable for Names {
        fn construct(_arguments: &mut ResolvedArguments) -> anyhow::Result<Self> {
            Ok(Self)
        }
    }

    impl MessageHandler<Rename> for Names {
        fn handle(&self, message: &mut Rename) -> anyhow::Result<()> {
            message.name = message.name.to_uppercase();
            Ok(())
        }
    }

    struct Fixed;

    impl Clock for Fixed {
        fn now(&self) -> chrono::DateTime<Utc> {
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        }
    }

    fn components(repository: &InMemoryRepository) -> PipelineComponents {
        let mut handlers = HandlerRegistry::builder();
        handlers.handler::<Names, Rename>("handle");
        let config = PipelineConfig::default();
        PipelineComponents::new(config.clone())
            .with_handlers(handlers.build())
            .with_resolver(config.resolver().injectable::<Names>().build())
            .with_repository(Arc::new(repository.clone()))
            .with_clock(Arc::new(Fixed))
    }

    #[test]
    fn command_is_handled_stamped_and_persisted() {
        let repository = InMemoryRepository::new();
        let pipeline = CommandPipeline::with_default_middlewares(&components(&repository));

        let renamed = pipeline.handle(Rename { name: "ada".into() }).unwrap();

        assert_eq!(renamed.name, "ADA");
        let stored = repository.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, ProcessingStatus::Completed);
        assert_eq!(stored[0].created_at, Fixed.now());
    }

    #[test]
    fn unhandled_event_is_reported() {
        #[derive(Debug, Serialize)]
        struct Orphan;

        let repository = InMemoryRepository::new();
        let pipeline = EventPipeline::with_default_middlewares(&components(&repository));

        let failure = pipeline.raise(Orphan).unwrap_err();

        let error = failure.message_error().unwrap();
        assert_eq!(error.error_type, ErrorKind::HandlerNotFound.as_str());
        assert_eq!(repository.snapshot()[0].status, ProcessingStatus::Rejected);
    }

    #[test]
    fn typed_query_on_a_supplied_target() {
        struct Greeter {
            greeting: &'static str,
        }

        let mut greeter = QueryObject::<Greeter>::new();
        let greet = greeter.method("greet", &["name"], |g: &Greeter, (name,): (String,)| {
            Ok(format!("{}, {name}", g.greeting))
        });
        let pipeline = QueryPipeline::with_default_middlewares(&PipelineComponents::default());

        let greeting = pipeline
            .query::<Greeter>()
            .on(Arc::new(Greeter { greeting: "hello" }))
            .with(greet.call(("ada".to_string(),)))
            .unwrap();
        assert_eq!(greeting, "hello, ada");
    }

    #[test]
    fn non_finite_float_arguments_are_refused_before_submission() {
        struct Scale;

        let mut scale = QueryObject::<Scale>::new();
        let times = scale.method("times", &["factor"], |_: &Scale, (factor,): (f64,)| Ok(factor * 2.0));
        let repository = InMemoryRepository::new();
        let pipeline = QueryPipeline::with_default_middlewares(&components(&repository));

        let failure = pipeline
            .query::<Scale>()
            .on(Arc::new(Scale))
            .with(times.call((f64::NAN,)))
            .unwrap_err();

        assert!(
            matches!(&failure, PipelineFailure::InvalidCall(PipelineError::ArgumentBinding { parameter, .. }) if parameter == "factor"),
            "{failure}"
        );
        assert!(repository.snapshot().is_empty());

        let doubled = pipeline.query::<Scale>().on(Arc::new(Scale)).with(times.call((1.5,))).unwrap();
        assert!((doubled - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn container_allows_one_pipeline_per_kind() {
        let components = PipelineComponents::default();
        let mut container = PipelineContainer::new();
        container
            .add_command_pipeline(CommandPipeline::with_default_middlewares(&components))
            .unwrap();

        let error = container
            .add_command_pipeline(CommandPipeline::with_default_middlewares(&components))
            .err();
        assert!(matches!(error, Some(PipelineError::Configuration(_))));
        assert!(matches!(
            container.raise(Rename { name: String::new() }),
            Err(PipelineFailure::NotConfigured(MessageKind::Event))
        ));
    }

    #[test]
    fn persistence_can_be_disabled() {
        let components = PipelineComponents::new(PipelineConfig::default().with_persistence(false));
        let pipeline = CommandPipeline::with_default_middlewares(&components);
        assert!(!pipeline.pipeline().stage_ids().contains(&"repository"));
    }
}
