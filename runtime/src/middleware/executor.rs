//! Handler execution stage.

use super::keys;
use crate::blocking::BlockingDriver;
use crate::pipeline::{Middleware, StageFuture};
use crate::registry::{DynInstance, HandlerEntry, Invoker};
use crate::resolver::ResolvedInstance;
use courier_core::error::PipelineError;
use courier_core::message::{Items, Message};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Invokes the located handlers and completes the message.
///
/// Handlers run in registration order; the first failure stops the remaining
/// handlers and fails the message.
#[derive(Debug, Clone)]
pub struct HandlerExecutorMiddleware {
    include_duration: bool,
    driver: BlockingDriver,
}

impl HandlerExecutorMiddleware {
    /// Executor recording the execution duration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            include_duration: true,
            driver: BlockingDriver::new(),
        }
    }

    /// Whether to record the execution duration on the message.
    #[must_use]
    pub const fn with_duration(mut self, include: bool) -> Self {
        self.include_duration = include;
        self
    }

    /// Drive async handlers in blocking mode with `driver`.
    #[must_use]
    pub fn with_driver(mut self, driver: BlockingDriver) -> Self {
        self.driver = driver;
        self
    }

    fn finish(&self, message: &mut Message, started: Instant, outcome: Result<(), PipelineError>) -> Result<(), PipelineError> {
        if self.include_duration {
            message.set_execution_duration(started.elapsed());
        }
        outcome?;
        message.complete();
        Ok(())
    }
}

impl Default for HandlerExecutorMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

type Targets<'m> = (&'m [HandlerEntry], &'m [Option<ResolvedInstance>]);

fn targets(items: &Items) -> Result<Targets<'_>, PipelineError> {
    let entries = items
        .get::<Vec<HandlerEntry>>(keys::HANDLERS)
        .ok_or_else(|| PipelineError::Configuration("handler executor runs before the handler locator".into()))?;
    let instances = items
        .get::<Vec<Option<ResolvedInstance>>>(keys::INSTANCES)
        .map_or(&[][..], Vec::as_slice);
    Ok((entries, instances))
}

fn instance<'m>(instances: &'m [Option<ResolvedInstance>], index: usize, entry: &HandlerEntry) -> Result<&'m DynInstance, PipelineError> {
    instances
        .get(index)
        .and_then(Option::as_ref)
        .map(ResolvedInstance::get)
        .ok_or_else(|| PipelineError::CannotResolve {
            type_name: entry.owner_name().to_string(),
            reason: "no instance was resolved for this handler".to_string(),
        })
}

fn split(message: &mut Message) -> Result<(&mut DynInstance, &Items), PipelineError> {
    let content_type = message.content_type().to_string();
    let (payload, items) = message.payload_and_items_mut();
    let content = payload
        .and_then(|payload| payload.as_any_mut())
        .ok_or(PipelineError::HandlerNotFound { message_type: content_type })?;
    Ok((content, items))
}

fn invoke_all(message: &mut Message, driver: &BlockingDriver) -> Result<(), PipelineError> {
    let (content, items) = split(message)?;
    let (entries, instances) = targets(items)?;
    for (index, entry) in entries.iter().enumerate() {
        let outcome = match entry.invoker() {
            Invoker::SelfHandling(invoke) => invoke(content),
            Invoker::Sync(invoke) => invoke(instance(instances, index, entry)?, content),
            Invoker::Async(invoke) => {
                let cancel = CancellationToken::new();
                driver.block_on(invoke(instance(instances, index, entry)?, content, &cancel))?
            }
        };
        outcome.map_err(PipelineError::HandlerExecution)?;
        tracing::trace!(owner = entry.owner_name(), method = entry.method(), "Handler returned");
    }
    Ok(())
}

async fn invoke_all_async(message: &mut Message, cancel: &CancellationToken) -> Result<(), PipelineError> {
    let (content, items) = split(message)?;
    let (entries, instances) = targets(items)?;
    for (index, entry) in entries.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let outcome = match entry.invoker() {
            Invoker::SelfHandling(invoke) => invoke(&mut *content),
            Invoker::Sync(invoke) => invoke(instance(instances, index, entry)?, &mut *content),
            Invoker::Async(invoke) => invoke(instance(instances, index, entry)?, &mut *content, cancel).await,
        };
        outcome.map_err(PipelineError::HandlerExecution)?;
        tracing::trace!(owner = entry.owner_name(), method = entry.method(), "Handler returned");
    }
    Ok(())
}

impl Middleware for HandlerExecutorMiddleware {
    fn id(&self) -> &str {
        "handler-executor"
    }

    fn handle(&self, message: &mut Message) -> Result<(), PipelineError> {
        let started = Instant::now();
        let outcome = invoke_all(message, &self.driver);
        self.finish(message, started, outcome)
    }

    fn handle_async<'a>(&'a self, message: &'a mut Message, cancel: &'a CancellationToken) -> StageFuture<'a> {
        Box::pin(async move {
            let started = Instant::now();
            let outcome = invoke_all_async(message, cancel).await;
            self.finish(message, started, outcome)
        })
    }
}
