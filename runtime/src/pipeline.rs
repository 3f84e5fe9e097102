//! The pipeline engine.
//!
//! A [`MessagePipeline`] is an ordered list of [`Middleware`] stages. Processing
//! a message runs every stage in registration order and then every entered
//! stage's post-hook in reverse order.
//!
//! # Failure model
//!
//! A stage reports failure by returning a [`PipelineError`] (or by panicking).
//! The engine never propagates it: the error is recorded into the message, the
//! status moves to `Rejected` or `Failed`, and from then on only
//! [`Stage::Finalizing`] stages run. Post-hooks of every entered stage still run
//! exactly once, so resources acquired by early stages are always released.
//!
//! ```text
//! handle:  [1] ─► [2] ─► [3 ✗] ─► (4 skipped) ─► [5 finalizing]
//! post:    [5] ─► [3] ─► [2] ─► [1]
//! ```

use crate::metrics::PipelineMetrics;
use courier_core::error::PipelineError;
use courier_core::message::{Message, ProcessingStatus};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Boxed future returned by [`Middleware::handle_async`].
pub type StageFuture<'a> = Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send + 'a>>;

/// When a stage runs relative to failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    /// Regular stage, skipped once the message is rejected or failed.
    #[default]
    Handling,
    /// Always runs, even after rejection or failure (persistence, auditing).
    Finalizing,
}

/// One step of a pipeline.
pub trait Middleware: Send + Sync {
    /// Stage identifier, used in logs and as the resolver cache key.
    fn id(&self) -> &str;

    /// Scheduling class of this stage.
    fn stage(&self) -> Stage {
        Stage::Handling
    }

    /// Process the message.
    ///
    /// # Errors
    ///
    /// The returned error is recorded into the message by the engine.
    fn handle(&self, message: &mut Message) -> Result<(), PipelineError>;

    /// Process the message in suspension-capable mode.
    ///
    /// Defaults to [`Middleware::handle`].
    fn handle_async<'a>(
        &'a self,
        message: &'a mut Message,
        _cancel: &'a CancellationToken,
    ) -> StageFuture<'a> {
        Box::pin(async move { self.handle(message) })
    }

    /// Runs after all stages, in reverse order, once per entered stage.
    fn post_handle(&self, _message: &mut Message) {}
}

/// Ordered middleware chain.
#[derive(Clone, Default)]
pub struct MessagePipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MessagePipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn add_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Append several stages, keeping their order.
    pub fn add_middlewares<I>(&mut self, middlewares: I) -> &mut Self
    where
        I: IntoIterator<Item = Arc<dyn Middleware>>,
    {
        self.middlewares.extend(middlewares);
        self
    }

    /// Append a stage (builder form).
    #[must_use]
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.add_middleware(middleware);
        self
    }

    /// Stage ids in execution order.
    #[must_use]
    pub fn stage_ids(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.id()).collect()
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run `message` through every stage on the calling thread.
    #[tracing::instrument(skip(self, message), name = "pipeline_process", fields(message_id = %message.id()))]
    pub fn process(&self, mut message: Message) -> Message {
        let started = Instant::now();
        message.transition(ProcessingStatus::Processing);

        let mut entered = Vec::with_capacity(self.middlewares.len());
        for (index, middleware) in self.middlewares.iter().enumerate() {
            if !should_run(&message, middleware.as_ref()) {
                continue;
            }
            entered.push(index);
            let outcome = catch_unwind(AssertUnwindSafe(|| middleware.handle(&mut message)));
            settle(&mut message, middleware.id(), outcome);
        }

        self.run_post_handlers(&mut message, &entered);
        finish(&mut message, started);
        message
    }

    /// Run `message` through every stage, awaiting suspension-capable stages.
    ///
    /// The token is checked before each stage. A cancelled, non-terminal message
    /// is marked `Failed` with a `Cancelled` error; finalizing stages still run.
    #[tracing::instrument(skip(self, message, cancel), name = "pipeline_process_async", fields(message_id = %message.id()))]
    pub async fn process_async(&self, mut message: Message, cancel: &CancellationToken) -> Message {
        let started = Instant::now();
        message.transition(ProcessingStatus::Processing);

        let mut entered = Vec::with_capacity(self.middlewares.len());
        for (index, middleware) in self.middlewares.iter().enumerate() {
            if cancel.is_cancelled() && message.record_error(&PipelineError::Cancelled) {
                tracing::warn!("Processing cancelled before stage {}", middleware.id());
            }
            if !should_run(&message, middleware.as_ref()) {
                continue;
            }
            entered.push(index);
            let outcome = AssertUnwindSafe(middleware.handle_async(&mut message, cancel))
                .catch_unwind()
                .await;
            settle(&mut message, middleware.id(), outcome);
        }

        self.run_post_handlers(&mut message, &entered);
        finish(&mut message, started);
        message
    }

    fn run_post_handlers(&self, message: &mut Message, entered: &[usize]) {
        for &index in entered.iter().rev() {
            let middleware = &self.middlewares[index];
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| middleware.post_handle(message))) {
                tracing::error!(
                    stage = middleware.id(),
                    panic = %panic_message(panic.as_ref()),
                    "Post-handler panicked"
                );
            }
        }
    }
}

impl fmt::Debug for MessagePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePipeline")
            .field("stages", &self.stage_ids())
            .finish()
    }
}

fn should_run(message: &Message, middleware: &dyn Middleware) -> bool {
    if message.status().is_unsuccessful() && middleware.stage() == Stage::Handling {
        tracing::debug!(stage = middleware.id(), status = %message.status(), "Skipping stage");
        return false;
    }
    true
}

fn settle(
    message: &mut Message,
    stage: &str,
    outcome: Result<Result<(), PipelineError>, Box<dyn Any + Send>>,
) {
    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error,
        Err(panic) => PipelineError::HandlerExecution(anyhow::anyhow!(
            "stage `{stage}` panicked: {}",
            panic_message(panic.as_ref())
        )),
    };
    tracing::debug!(stage, error = %error, "Stage reported an error");
    PipelineMetrics::record_stage_failure(stage);
    if !message.record_error(&error) {
        tracing::warn!(
            stage,
            status = %message.status(),
            error = %error,
            "Error raised after the message reached a terminal status"
        );
    }
}

fn finish(message: &mut Message, started: Instant) {
    if message.status() == ProcessingStatus::Processing {
        message.complete();
    }
    let elapsed = started.elapsed();
    match message.error() {
        None => tracing::info!(
            kind = %message.kind(),
            content_type = message.content_type(),
            elapsed = ?elapsed,
            "Message completed"
        ),
        Some(error) => tracing::error!(
            kind = %message.kind(),
            content_type = message.content_type(),
            status = %message.status(),
            error_type = %error.error_type,
            error = %error.message,
            "Message {}",
            message.status()
        ),
    }
    PipelineMetrics::record_processed(message.kind(), message.status(), elapsed);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
#[allow(clippy::panic)] // Panics: stages panic on purpose to exercise isolation
mod tests {
    use super::*;
    use courier_core::error::ErrorKind;
    use parking_lot::Mutex;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct Ping;

    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn push(&self, entry: String) {
            self.0.lock().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    enum Behaviour {
        Pass,
        Reject,
        Fail,
        Panic,
    }

    struct Step {
        id: &'static str,
        stage: Stage,
        behaviour: Behaviour,
        journal: Journal,
    }

    impl Step {
        fn new(id: &'static str, behaviour: Behaviour, journal: &Journal) -> Self {
            Self {
                id,
                stage: Stage::Handling,
                behaviour,
                journal: journal.clone(),
            }
        }

        fn finalizing(mut self) -> Self {
            self.stage = Stage::Finalizing;
            self
        }
    }

    impl Middleware for Step {
        fn id(&self) -> &str {
            self.id
        }

        fn stage(&self) -> Stage {
            self.stage
        }

        fn handle(&self, _message: &mut Message) -> Result<(), PipelineError> {
            self.journal.push(format!("handle:{}", self.id));
            match self.behaviour {
                Behaviour::Pass => Ok(()),
                Behaviour::Reject => Err(PipelineError::HandlerNotFound {
                    message_type: "Ping".into(),
                }),
                Behaviour::Fail => Err(PipelineError::HandlerExecution(anyhow::anyhow!("boom"))),
                Behaviour::Panic => panic!("stage exploded"),
            }
        }

        fn post_handle(&self, _message: &mut Message) {
            self.journal.push(format!("post:{}", self.id));
        }
    }

    #[test]
    fn stages_run_in_order_and_post_hooks_in_reverse() {
        let journal = Journal::default();
        let pipeline = MessagePipeline::new()
            .with_middleware(Step::new("a", Behaviour::Pass, &journal))
            .with_middleware(Step::new("b", Behaviour::Pass, &journal));

        let message = pipeline.process(Message::command(Ping));

        assert_eq!(message.status(), ProcessingStatus::Completed);
        assert_eq!(journal.entries(), ["handle:a", "handle:b", "post:b", "post:a"]);
    }

    #[test]
    fn rejection_skips_later_handling_stages_but_not_finalizing_ones() {
        let journal = Journal::default();
        let pipeline = MessagePipeline::new()
            .with_middleware(Step::new("a", Behaviour::Pass, &journal))
            .with_middleware(Step::new("b", Behaviour::Reject, &journal))
            .with_middleware(Step::new("c", Behaviour::Pass, &journal))
            .with_middleware(Step::new("store", Behaviour::Pass, &journal).finalizing());

        let message = pipeline.process(Message::command(Ping));

        assert_eq!(message.status(), ProcessingStatus::Rejected);
        assert_eq!(
            message.error().map(|e| e.error_type.as_str()),
            Some(ErrorKind::HandlerNotFound.as_str())
        );
        assert_eq!(
            journal.entries(),
            ["handle:a", "handle:b", "handle:store", "post:store", "post:b", "post:a"]
        );
    }

    #[test]
    fn panicking_stage_fails_the_message() {
        let journal = Journal::default();
        let pipeline = MessagePipeline::new()
            .with_middleware(Step::new("a", Behaviour::Panic, &journal))
            .with_middleware(Step::new("b", Behaviour::Pass, &journal));

        let message = pipeline.process(Message::command(Ping));

        assert_eq!(message.status(), ProcessingStatus::Failed);
        let error = message.error().map(|e| e.message.clone()).unwrap_or_default();
        assert!(error.contains("stage exploded"), "{error}");
        assert_eq!(journal.entries(), ["handle:a", "post:a"]);
    }

    #[test]
    fn first_failure_is_kept() {
        let journal = Journal::default();
        let pipeline = MessagePipeline::new()
            .with_middleware(Step::new("a", Behaviour::Fail, &journal))
            .with_middleware(Step::new("audit", Behaviour::Reject, &journal).finalizing());

        let message = pipeline.process(Message::command(Ping));

        assert_eq!(message.status(), ProcessingStatus::Failed);
        assert_eq!(
            message.error().map(|e| e.error_type.as_str()),
            Some("HandlerExecutionError")
        );
    }

    #[tokio::test]
    async fn cancelled_token_fails_message_and_runs_finalizers() {
        let journal = Journal::default();
        let pipeline = MessagePipeline::new()
            .with_middleware(Step::new("a", Behaviour::Pass, &journal))
            .with_middleware(Step::new("store", Behaviour::Pass, &journal).finalizing());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let message = pipeline.process_async(Message::command(Ping), &cancel).await;

        assert_eq!(message.status(), ProcessingStatus::Failed);
        assert_eq!(message.error().map(|e| e.error_type.as_str()), Some("Cancelled"));
        assert_eq!(journal.entries(), ["handle:store", "post:store"]);
    }

    #[tokio::test]
    async fn async_mode_matches_sync_mode() {
        let journal = Journal::default();
        let pipeline = MessagePipeline::new()
            .with_middleware(Step::new("a", Behaviour::Pass, &journal))
            .with_middleware(Step::new("b", Behaviour::Reject, &journal))
            .with_middleware(Step::new("c", Behaviour::Pass, &journal));

        let message = pipeline
            .process_async(Message::command(Ping), &CancellationToken::new())
            .await;

        assert_eq!(message.status(), ProcessingStatus::Rejected);
        assert_eq!(journal.entries(), ["handle:a", "handle:b", "post:b", "post:a"]);
    }

    #[test]
    fn empty_pipeline_completes() {
        let message = MessagePipeline::new().process(Message::event(Ping));
        assert_eq!(message.status(), ProcessingStatus::Completed);
        assert!(message.error().is_none());
    }
}
