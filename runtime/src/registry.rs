//! Handler registry.
//!
//! Handlers are registered explicitly, either one by one on a
//! [`HandlerRegistryBuilder`] or grouped into [`HandlerUnit`]s that register a
//! whole module at once. The built [`HandlerRegistry`] is immutable and maps a
//! message `TypeId` to an ordered list of [`HandlerEntry`]s.
//!
//! Three handler shapes are supported:
//!
//! - [`MessageHandler<C>`]: a container type with a synchronous method
//! - [`AsyncMessageHandler<C>`]: a container type returning a boxed future
//! - [`SelfHandling`]: the message handles itself, no container instance needed
//!
//! # Example
//!
//! ```
//! use courier_runtime::registry::{HandlerRegistry, MessageHandler};
//! use serde::Serialize;
//!
//! #[derive(Debug, Serialize)]
//! struct CreateTask { title: String }
//!
//! struct TaskHandlers;
//!
//! impl MessageHandler<CreateTask> for TaskHandlers {
//!     fn handle(&self, command: &mut CreateTask) -> anyhow::Result<()> {
//!         command.title = command.title.trim().to_string();
//!         Ok(())
//!     }
//! }
//!
//! let mut builder = HandlerRegistry::builder();
//! builder.handler::<TaskHandlers, CreateTask>("handle");
//! let registry = builder.build();
//! assert!(registry.contains::<CreateTask>());
//! ```

use courier_core::error::PipelineError;
use courier_core::message::Content;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Boxed future returned by asynchronous handlers.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// A container type handling messages of type `C` synchronously.
pub trait MessageHandler<C>: Send + Sync + 'static {
    /// Handle one message.
    ///
    /// # Errors
    ///
    /// Any error fails the message with `HandlerExecutionError`.
    fn handle(&self, message: &mut C) -> anyhow::Result<()>;
}

/// A container type handling messages of type `C` asynchronously.
pub trait AsyncMessageHandler<C>: Send + Sync + 'static {
    /// Handle one message.
    fn handle<'a>(&'a self, message: &'a mut C, cancel: &'a CancellationToken) -> HandlerFuture<'a>;
}

/// A message that carries its own handling logic.
pub trait SelfHandling: Send + Sync + 'static {
    /// Handle this message.
    ///
    /// # Errors
    ///
    /// Any error fails the message with `HandlerExecutionError`.
    fn handle(&mut self) -> anyhow::Result<()>;
}

/// Type-erased handler instance.
pub type DynInstance = dyn Any + Send + Sync;

/// Type-erased call into a registered handler method.
#[derive(Clone, Copy)]
pub enum Invoker {
    /// Synchronous method on a container instance.
    Sync(fn(&DynInstance, &mut DynInstance) -> anyhow::Result<()>),
    /// Asynchronous method on a container instance.
    Async(for<'a> fn(&'a DynInstance, &'a mut DynInstance, &'a CancellationToken) -> HandlerFuture<'a>),
    /// The message handles itself.
    SelfHandling(fn(&mut DynInstance) -> anyhow::Result<()>),
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync(_) => "Sync",
            Self::Async(_) => "Async",
            Self::SelfHandling(_) => "SelfHandling",
        })
    }
}

fn mismatch(expected: &str) -> anyhow::Error {
    anyhow::anyhow!("handler invoked with a value that is not {expected}")
}

fn invoke_sync<H, C>(handler: &DynInstance, message: &mut DynInstance) -> anyhow::Result<()>
where
    H: MessageHandler<C>,
    C: Any,
{
    let handler = handler
        .downcast_ref::<H>()
        .ok_or_else(|| mismatch(type_name::<H>()))?;
    let message = message
        .downcast_mut::<C>()
        .ok_or_else(|| mismatch(type_name::<C>()))?;
    MessageHandler::<C>::handle(handler, message)
}

fn invoke_async<'a, H, C>(
    handler: &'a DynInstance,
    message: &'a mut DynInstance,
    cancel: &'a CancellationToken,
) -> HandlerFuture<'a>
where
    H: AsyncMessageHandler<C>,
    C: Any + Send,
{
    match (handler.downcast_ref::<H>(), message.downcast_mut::<C>()) {
        (Some(handler), Some(message)) => AsyncMessageHandler::<C>::handle(handler, message, cancel),
        (None, _) => Box::pin(async { Err(mismatch(type_name::<H>())) }),
        (_, None) => Box::pin(async { Err(mismatch(type_name::<C>())) }),
    }
}

fn invoke_self<C: SelfHandling>(message: &mut DynInstance) -> anyhow::Result<()> {
    message
        .downcast_mut::<C>()
        .ok_or_else(|| mismatch(type_name::<C>()))?
        .handle()
}

/// One registered handler method.
#[derive(Debug, Clone)]
pub struct HandlerEntry {
    owner_type: TypeId,
    owner_name: &'static str,
    method: &'static str,
    message_name: &'static str,
    invoker: Invoker,
}

impl HandlerEntry {
    /// `TypeId` of the declaring container (the message type for self-handling entries).
    #[must_use]
    pub const fn owner_type(&self) -> TypeId {
        self.owner_type
    }

    /// Declaring container type name.
    #[must_use]
    pub const fn owner_name(&self) -> &'static str {
        self.owner_name
    }

    /// Method name, for diagnostics.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        self.method
    }

    /// Handled message type name.
    #[must_use]
    pub const fn message_name(&self) -> &'static str {
        self.message_name
    }

    /// How to call the handler.
    #[must_use]
    pub const fn invoker(&self) -> Invoker {
        self.invoker
    }

    /// Whether no container instance is needed.
    #[must_use]
    pub const fn is_self_handling(&self) -> bool {
        matches!(self.invoker, Invoker::SelfHandling(_))
    }
}

/// A group of handlers registered together, typically one per module.
pub trait HandlerUnit {
    /// Unit name, used in configuration errors.
    fn name(&self) -> &str;

    /// Register this unit's handlers.
    ///
    /// # Errors
    ///
    /// A unit may refuse registration; the registry then fails to build.
    fn register(&self, builder: &mut HandlerRegistryBuilder) -> Result<(), PipelineError>;
}

/// Collects handler registrations.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<TypeId, Vec<HandlerEntry>>,
    self_handling: HashMap<TypeId, HandlerEntry>,
}

impl HandlerRegistryBuilder {
    fn push(&mut self, message_type: TypeId, entry: HandlerEntry) {
        let entries = self.handlers.entry(message_type).or_default();
        let duplicate = entries
            .iter()
            .any(|e| e.owner_type == entry.owner_type && e.method == entry.method);
        if duplicate {
            tracing::debug!(
                owner = entry.owner_name,
                method = entry.method,
                "Ignoring duplicate handler registration"
            );
        } else {
            entries.push(entry);
        }
    }

    /// Register `H::handle` as a synchronous handler for `C`.
    pub fn handler<H, C>(&mut self, method: &'static str) -> &mut Self
    where
        H: MessageHandler<C>,
        C: Content,
    {
        self.push(
            TypeId::of::<C>(),
            HandlerEntry {
                owner_type: TypeId::of::<H>(),
                owner_name: type_name::<H>(),
                method,
                message_name: type_name::<C>(),
                invoker: Invoker::Sync(invoke_sync::<H, C>),
            },
        );
        self
    }

    /// Register `H::handle` as an asynchronous handler for `C`.
    pub fn async_handler<H, C>(&mut self, method: &'static str) -> &mut Self
    where
        H: AsyncMessageHandler<C>,
        C: Content,
    {
        self.push(
            TypeId::of::<C>(),
            HandlerEntry {
                owner_type: TypeId::of::<H>(),
                owner_name: type_name::<H>(),
                method,
                message_name: type_name::<C>(),
                invoker: Invoker::Async(invoke_async::<H, C>),
            },
        );
        self
    }

    /// Register `C` as handling itself.
    pub fn self_handling<C>(&mut self) -> &mut Self
    where
        C: SelfHandling + Content,
    {
        self.self_handling.insert(
            TypeId::of::<C>(),
            HandlerEntry {
                owner_type: TypeId::of::<C>(),
                owner_name: type_name::<C>(),
                method: "handle",
                message_name: type_name::<C>(),
                invoker: Invoker::SelfHandling(invoke_self::<C>),
            },
        );
        self
    }

    /// Register every handler of `unit`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] naming the unit if it fails.
    pub fn unit(&mut self, unit: &dyn HandlerUnit) -> Result<&mut Self, PipelineError> {
        unit.register(self).map_err(|error| {
            PipelineError::Configuration(format!(
                "handler unit `{}` failed to register: {error}",
                unit.name()
            ))
        })?;
        tracing::debug!(unit = unit.name(), "Registered handler unit");
        Ok(self)
    }

    /// Freeze the registrations.
    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
            self_handling: self.self_handling,
        }
    }
}

/// Immutable message type → handler index.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TypeId, Vec<HandlerEntry>>,
    self_handling: HashMap<TypeId, HandlerEntry>,
}

impl HandlerRegistry {
    /// Start collecting registrations.
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Index a set of handler units.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] if any unit fails to register.
    pub fn index<'a, I>(units: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = &'a dyn HandlerUnit>,
    {
        let mut builder = Self::builder();
        for unit in units {
            builder.unit(unit)?;
        }
        Ok(builder.build())
    }

    /// The handler for a command or query: self-handling first, then the first
    /// registered entry.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::HandlerNotFound`] when nothing handles the type.
    pub fn find(&self, message_type: TypeId, content_type: &str) -> Result<&HandlerEntry, PipelineError> {
        self.self_handling
            .get(&message_type)
            .or_else(|| self.handlers.get(&message_type).and_then(|e| e.first()))
            .ok_or_else(|| PipelineError::HandlerNotFound {
                message_type: content_type.to_string(),
            })
    }

    /// Every handler for an event, self-handling first, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::HandlerNotFound`] when nothing handles the type.
    pub fn find_all(&self, message_type: TypeId, content_type: &str) -> Result<Vec<&HandlerEntry>, PipelineError> {
        let entries: Vec<_> = self
            .self_handling
            .get(&message_type)
            .into_iter()
            .chain(self.handlers.get(&message_type).into_iter().flatten())
            .collect();
        if entries.is_empty() {
            Err(PipelineError::HandlerNotFound {
                message_type: content_type.to_string(),
            })
        } else {
            Ok(entries)
        }
    }

    /// Whether anything handles `C`.
    #[must_use]
    pub fn contains<C: Any>(&self) -> bool {
        let id = TypeId::of::<C>();
        self.self_handling.contains_key(&id) || self.handlers.contains_key(&id)
    }

    /// Number of handled message types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers
            .keys()
            .chain(self.self_handling.keys())
            .collect::<std::collections::HashSet<_>>()
            .len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.self_handling.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message_types", &self.len())
            .finish()
    }
}
