//! Process-local message repositories.
//!
//! - [`DiscardRepository`]: accepts every record and stores nothing
//! - [`InMemoryRepository`]: keeps records in insertion order behind a
//!   `parking_lot::RwLock`; reads work on a snapshot
//!
//! # Example
//!
//! ```
//! use courier_core::repository::{MessageQuery, MessageRepository};
//! use courier_runtime::repository::InMemoryRepository;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = InMemoryRepository::new();
//! let stored = repository.query(MessageQuery::new().take(10)).await?;
//! assert!(stored.is_empty());
//! # Ok(())
//! # }
//! ```

use courier_core::record::MessageRecord;
use courier_core::repository::{MessageQuery, MessageRepository, RepositoryError};
use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Repository that drops every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardRepository;

impl MessageRepository for DiscardRepository {
    fn add(&self, record: MessageRecord) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
        tracing::trace!(id = %record.id, "Discarding message record");
        Box::pin(async { Ok(()) })
    }

    fn query(
        &self,
        _query: MessageQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MessageRecord>, RepositoryError>> + Send + '_>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// In-memory repository for tests and tooling.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    records: Arc<RwLock<Vec<MessageRecord>>>,
}

impl InMemoryRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Copy of every stored record, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MessageRecord> {
        self.records.read().clone()
    }

    /// The record stored under `id`.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<MessageRecord> {
        self.records.read().iter().find(|r| r.id == id).cloned()
    }

    /// Drop every record (for test isolation).
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl MessageRepository for InMemoryRepository {
    fn add(&self, record: MessageRecord) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self.records.write();
            if records.iter().any(|r| r.id == record.id) {
                return Err(RepositoryError::Duplicate(record.id));
            }
            records.push(record);
            Ok(())
        })
    }

    fn query(
        &self,
        query: MessageQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MessageRecord>, RepositoryError>> + Send + '_>> {
        Box::pin(async move {
            let mut matching: Vec<_> = self.snapshot().into_iter().filter(|r| query.matches(r)).collect();
            matching.sort_by_key(|r| r.created_at);
            Ok(query.page(matching))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on repository errors
mod tests {
    use super::*;
    use courier_core::message::{MessageKind, ProcessingStatus};
    use courier_testing::fixtures::record;

    #[tokio::test]
    async fn query_filters_and_pages_oldest_first() {
        let repository = InMemoryRepository::new();
        for status in [ProcessingStatus::Completed, ProcessingStatus::Failed, ProcessingStatus::Completed] {
            let mut stored = record(MessageKind::Command);
            stored.status = status;
            repository.add(stored).await.unwrap();
        }

        let completed = repository
            .query(MessageQuery::new().with_status(ProcessingStatus::Completed))
            .await
            .unwrap();
        assert_eq!(completed.len(), 2);

        let paged = repository.query(MessageQuery::new().skip(1).take(1)).await.unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn duplicate_ids_are_refused() {
        let repository = InMemoryRepository::new();
        let stored = record(MessageKind::Event);
        repository.add(stored.clone()).await.unwrap();

        let error = repository.add(stored.clone()).await.unwrap_err();
        assert!(matches!(error, RepositoryError::Duplicate(id) if id == stored.id));
        assert_eq!(repository.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_are_all_kept() {
        let repository = InMemoryRepository::new();
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let repository = repository.clone();
                tokio::spawn(async move { repository.add(record(MessageKind::Query)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(repository.len(), 64);
    }

    #[tokio::test]
    async fn discard_keeps_nothing() {
        let repository = DiscardRepository;
        repository.add(record(MessageKind::Command)).await.unwrap();
        assert!(repository.query(MessageQuery::new()).await.unwrap().is_empty());
    }
}
