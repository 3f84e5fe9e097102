//! Query object resolution and execution stages.

use super::keys;
use crate::pipeline::Middleware;
use crate::query::{QueryInvocation, QueryRegistry};
use crate::registry::DynInstance;
use crate::resolver::{ObjectResolver, ResolvedInstance};
use courier_core::error::PipelineError;
use courier_core::message::Message;
use serde_json::Map;
use std::sync::Arc;
use std::time::Instant;

/// Finds the query method of a message and resolves its target.
///
/// Typed queries arrive with a [`QueryInvocation`] already stored; dynamic
/// ones are matched against the [`QueryRegistry`] by content type and
/// argument names.
#[derive(Debug, Clone)]
pub struct QueryObjectResolverMiddleware {
    queries: Arc<QueryRegistry>,
    resolver: Arc<ObjectResolver>,
}

impl QueryObjectResolverMiddleware {
    /// Locate through `queries`, construct targets through `resolver`.
    #[must_use]
    pub const fn new(queries: Arc<QueryRegistry>, resolver: Arc<ObjectResolver>) -> Self {
        Self { queries, resolver }
    }
}

impl Middleware for QueryObjectResolverMiddleware {
    fn id(&self) -> &str {
        "query-resolver"
    }

    fn handle(&self, message: &mut Message) -> Result<(), PipelineError> {
        let invocation = match message.items().get::<QueryInvocation>(keys::QUERY_INVOCATION) {
            Some(invocation) => invocation.clone(),
            None => {
                let method = self
                    .queries
                    .locate(message.content_type(), message.payload().as_arguments())?;
                let invocation = QueryInvocation::new(method);
                message.items_mut().insert(keys::QUERY_INVOCATION, invocation.clone());
                invocation
            }
        };
        if invocation.target().is_some() {
            return Ok(());
        }

        let descriptor = invocation.method().descriptor();
        let instance = self
            .resolver
            .resolve(descriptor.owner_type(), descriptor.owner_type_name(), self.id())?;
        tracing::debug!(
            content_type = message.content_type(),
            internal = instance.is_internal(),
            "Resolved query target"
        );
        message.items_mut().insert(keys::QUERY_INSTANCE, instance);
        Ok(())
    }

    fn post_handle(&self, message: &mut Message) {
        if let Some(instance) = message.items_mut().take::<ResolvedInstance>(keys::QUERY_INSTANCE) {
            instance.release();
        }
    }
}

/// Invokes the query method, stores the typed output and its JSON projection.
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutorMiddleware {
    include_duration: bool,
}

impl QueryExecutorMiddleware {
    /// Executor recording the execution duration.
    #[must_use]
    pub const fn new() -> Self {
        Self { include_duration: true }
    }

    /// Whether to record the execution duration on the message.
    #[must_use]
    pub const fn with_duration(mut self, include: bool) -> Self {
        self.include_duration = include;
        self
    }
}

impl Default for QueryExecutorMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for QueryExecutorMiddleware {
    fn id(&self) -> &str {
        "query-executor"
    }

    fn handle(&self, message: &mut Message) -> Result<(), PipelineError> {
        let invocation = message
            .items()
            .get::<QueryInvocation>(keys::QUERY_INVOCATION)
            .cloned()
            .ok_or_else(|| PipelineError::Configuration("query executor runs before the query resolver".into()))?;
        let target = match invocation.target() {
            Some(target) => Arc::clone(target),
            None => message
                .items()
                .get::<ResolvedInstance>(keys::QUERY_INSTANCE)
                .map(ResolvedInstance::shared)
                .ok_or_else(|| PipelineError::CannotResolve {
                    type_name: invocation.method().descriptor().owner_type_name().to_string(),
                    reason: "no query target was resolved".to_string(),
                })?,
        };

        let started = Instant::now();
        let empty = Map::new();
        let arguments = message.payload().as_arguments().unwrap_or(&empty);
        let outcome = invocation.method().invoke(target.as_ref(), arguments);
        if self.include_duration {
            message.set_execution_duration(started.elapsed());
        }
        let output = outcome?;

        match invocation.method().project(output.as_ref()) {
            Some(Ok(result)) => message.set_result(result),
            Some(Err(error)) => {
                return Err(PipelineError::HandlerExecution(
                    anyhow::Error::new(error).context("query result is not serializable"),
                ));
            }
            None => tracing::warn!(content_type = message.content_type(), "Query output has an unexpected type"),
        }
        message.items_mut().insert::<Box<DynInstance>>(keys::QUERY_OUTPUT, output);
        message.complete();
        Ok(())
    }
}
