//! # Courier Runtime
//!
//! Pipeline engine and stock middleware for the Courier message pipeline.
//!
//! This crate turns the message model of `courier-core` into running
//! pipelines: an ordered chain of middleware stages per message kind, the
//! handler and query registries they dispatch to, and the resolver that
//! instantiates handler objects per message.
//!
//! ## Core Components
//!
//! - **Pipeline engine** ([`pipeline`]): runs stages in order, captures every
//!   failure into the message, runs post-hooks in reverse
//! - **Handler registry** ([`registry`]): message type → handler methods
//! - **Object resolver** ([`resolver`]): external factory or internal
//!   construction with a cached constructor plan per type and stage
//! - **Query capture** ([`query`]): typed call objects and dynamic
//!   `"Owner.method"` invocation over the same registrations
//! - **Validation** ([`validation`]): declarative per-type rules
//! - **Middleware** ([`middleware`]): locator, resolver, executor, query,
//!   validation and repository stages
//! - **Facades** ([`pipelines`]): command, event and query pipelines plus a
//!   container holding one of each
//! - **Repositories** ([`repository`]): discard and in-memory storage
//!
//! ## Example
//!
//! ```
//! use courier_runtime::pipelines::{PipelineComponents, PipelineContainer};
//! use courier_runtime::query::{QueryObject, QueryRegistry};
//! use courier_runtime::resolver::{Injectable, ResolvedArguments};
//! use courier_runtime::PipelineConfig;
//!
//! struct Calculator;
//!
//! impl Injectable for Calculator {
//!     fn construct(_arguments: &mut ResolvedArguments) -> anyhow::Result<Self> {
//!         Ok(Calculator)
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut calculator = QueryObject::<Calculator>::named("Math.Calculator");
//! let sum = calculator.method("sum", &["a", "b"], |_: &Calculator, (a, b): (i32, i32)| Ok(a + b));
//! let mut queries = QueryRegistry::builder();
//! queries.object(calculator)?;
//!
//! let config = PipelineConfig::default();
//! let components = PipelineComponents::new(config.clone())
//!     .with_queries(queries.build())
//!     .with_resolver(config.resolver().injectable::<Calculator>().build());
//! let container = PipelineContainer::with_default_pipelines(&components);
//!
//! let five = container.queries()?.query::<Calculator>().with(sum.call((2, 3)))?;
//! assert_eq!(five, 5);
//! # Ok(())
//! # }
//! ```

pub mod blocking;

/// Pipeline configuration
pub mod config;

/// Prometheus metrics for observability
pub mod metrics;

pub mod middleware;
pub mod pipeline;
pub mod pipelines;
pub mod query;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod validation;

pub use blocking::BlockingDriver;
pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{MessagePipeline, Middleware, Stage};
pub use pipelines::{CommandPipeline, EventPipeline, PipelineComponents, PipelineContainer, PipelineFailure, QueryPipeline};
