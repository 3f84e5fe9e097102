//! Persistence stage.

use crate::blocking::BlockingDriver;
use crate::metrics::RepositoryMetrics;
use crate::pipeline::{Middleware, Stage, StageFuture};
use courier_core::error::PipelineError;
use courier_core::message::Message;
use courier_core::record::MessageRecord;
use courier_core::repository::{MessageRepository, RepositoryError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Persists the final state of every message.
///
/// Runs as a [`Stage::Finalizing`] stage so rejected and failed messages are
/// stored too. Persistence errors are logged and counted; they never change
/// the message status.
#[derive(Clone)]
pub struct RepositoryMiddleware {
    repository: Arc<dyn MessageRepository>,
    driver: BlockingDriver,
}

impl RepositoryMiddleware {
    /// Persist into `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn MessageRepository>) -> Self {
        Self {
            repository,
            driver: BlockingDriver::new(),
        }
    }

    /// Drive blocking writes with `driver`.
    #[must_use]
    pub fn with_driver(mut self, driver: BlockingDriver) -> Self {
        self.driver = driver;
        self
    }

    fn record(message: &Message) -> Option<MessageRecord> {
        match MessageRecord::from_message(message) {
            Ok(record) => Some(record),
            Err(error) => {
                RepositoryMetrics::record_error();
                tracing::error!(message_id = %message.id(), error = %error, "Cannot build message record");
                None
            }
        }
    }

    fn settle(id: uuid::Uuid, outcome: Result<(), RepositoryError>) {
        match outcome {
            Ok(()) => {
                RepositoryMetrics::record_write();
                tracing::debug!(message_id = %id, "Message persisted");
            }
            Err(error) => {
                RepositoryMetrics::record_error();
                tracing::error!(message_id = %id, error = %error, "Failed to persist message");
            }
        }
    }
}

impl std::fmt::Debug for RepositoryMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryMiddleware").finish_non_exhaustive()
    }
}

impl Middleware for RepositoryMiddleware {
    fn id(&self) -> &str {
        "repository"
    }

    fn stage(&self) -> Stage {
        Stage::Finalizing
    }

    fn handle(&self, message: &mut Message) -> Result<(), PipelineError> {
        if let Some(record) = Self::record(message) {
            let outcome = self
                .driver
                .block_on(self.repository.add(record))
                .unwrap_or_else(|error| Err(RepositoryError::DatabaseError(error.to_string())));
            Self::settle(message.id(), outcome);
        }
        Ok(())
    }

    fn handle_async<'a>(&'a self, message: &'a mut Message, _cancel: &'a CancellationToken) -> StageFuture<'a> {
        Box::pin(async move {
            if let Some(record) = Self::record(message) {
                Self::settle(message.id(), self.repository.add(record).await);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on missing records
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use courier_core::message::ProcessingStatus;
    use courier_core::repository::MessageQuery;
    use serde::Serialize;
    use std::future::Future;
    use std::pin::Pin;

    #[derive(Debug, Serialize)]
    struct Note {
        text: &'static str,
    }

    struct Unavailable;

    impl MessageRepository for Unavailable {
        fn add(&self, _record: MessageRecord) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
            Box::pin(async { Err(RepositoryError::DatabaseError("connection refused".into())) })
        }

        fn query(
            &self,
            _query: MessageQuery,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<MessageRecord>, RepositoryError>> + Send + '_>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    #[test]
    fn stores_the_message_state() {
        let repository = InMemoryRepository::new();
        let stage = RepositoryMiddleware::new(Arc::new(repository.clone()));
        let mut message = Message::command(Note { text: "hi" });
        message.transition(ProcessingStatus::Processing);
        message.complete();

        stage.handle(&mut message).unwrap();

        let stored = repository.get(message.id()).unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert_eq!(stored.content, serde_json::json!({"text": "hi"}));
        assert_eq!(stage.stage(), Stage::Finalizing);
    }

    struct Throttled(InMemoryRepository);

    impl MessageRepository for Throttled {
        fn add(&self, record: MessageRecord) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                self.0.add(record).await
            })
        }

        fn query(
            &self,
            query: MessageQuery,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<MessageRecord>, RepositoryError>> + Send + '_>> {
            self.0.query(query)
        }
    }

    #[test]
    fn blocking_writes_run_inside_a_tokio_context() {
        let repository = InMemoryRepository::new();
        let stage = RepositoryMiddleware::new(Arc::new(Throttled(repository.clone())));
        let mut message = Message::command(Note { text: "timed" });
        message.transition(ProcessingStatus::Processing);
        message.complete();

        stage.handle(&mut message).unwrap();

        assert_eq!(repository.get(message.id()).unwrap().status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn write_failures_leave_the_status_alone() {
        let stage = RepositoryMiddleware::new(Arc::new(Unavailable));
        let mut message = Message::event(Note { text: "lost" });
        message.transition(ProcessingStatus::Processing);

        stage
            .handle_async(&mut message, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(message.status(), ProcessingStatus::Processing);
        assert!(message.error().is_none());
    }
}
