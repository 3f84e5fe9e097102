//! Message repository contract.
//!
//! A repository stores the final state of every processed message and serves
//! filtered reads for diagnostics and replay.
//!
//! # Implementations
//!
//! - `DiscardRepository` (in `courier-runtime`): accepts and drops everything
//! - `InMemoryRepository` (in `courier-runtime`): process-local, for tests and tooling
//! - `PostgresMessageRepository` (in `courier-postgres`): relational storage
//!
//! # Example
//!
//! ```no_run
//! use courier_core::message::ProcessingStatus;
//! use courier_core::repository::{MessageQuery, MessageRepository, RepositoryError};
//!
//! async fn failures<R: MessageRepository>(repository: &R) -> Result<usize, RepositoryError> {
//!     let query = MessageQuery::new()
//!         .with_status(ProcessingStatus::Failed)
//!         .take(50);
//!     Ok(repository.query(query).await?.len())
//! }
//! ```

use crate::message::{MessageKind, ProcessingStatus};
use crate::protocol::ProtocolError;
use crate::record::MessageRecord;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during repository operations.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database connection or statement error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored blob could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The query could not be rendered.
    #[error("Query error: {0}")]
    Query(String),

    /// A record with the same id already exists.
    #[error("Duplicate message id: {0}")]
    Duplicate(Uuid),
}

/// Filter for [`MessageRepository::query`]. Empty filters match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageQuery {
    /// Restrict to these ids.
    pub ids: Vec<Uuid>,
    /// Restrict to one message kind.
    pub kind: Option<MessageKind>,
    /// Restrict to one status.
    pub status: Option<ProcessingStatus>,
    /// Content type must contain this substring.
    pub content_type: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_to: Option<DateTime<Utc>>,
    /// Inclusive lower bound on execution duration (ms).
    pub min_duration: Option<i32>,
    /// Inclusive upper bound on execution duration (ms).
    pub max_duration: Option<i32>,
    /// Rows to skip after filtering.
    pub skip: Option<u64>,
    /// Maximum rows to return.
    pub take: Option<u64>,
}

impl MessageQuery {
    /// Match everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a single id.
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.ids.push(id);
        self
    }

    /// Restrict to a message kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restrict to a status.
    #[must_use]
    pub const fn with_status(mut self, status: ProcessingStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict to content types containing `fragment`.
    #[must_use]
    pub fn with_content_type(mut self, fragment: impl Into<String>) -> Self {
        self.content_type = Some(fragment.into());
        self
    }

    /// Restrict to `from <= created_at < to`.
    #[must_use]
    pub const fn created_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_to = Some(to);
        self
    }

    /// Restrict to executions taking at least `millis`.
    #[must_use]
    pub const fn slower_than(mut self, millis: i32) -> Self {
        self.min_duration = Some(millis);
        self
    }

    /// Restrict to executions taking at most `millis`.
    #[must_use]
    pub const fn faster_than(mut self, millis: i32) -> Self {
        self.max_duration = Some(millis);
        self
    }

    /// Skip `n` matching rows.
    #[must_use]
    pub const fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    /// Return at most `n` rows.
    #[must_use]
    pub const fn take(mut self, n: u64) -> Self {
        self.take = Some(n);
        self
    }

    /// Whether `record` passes every filter (paging is not considered).
    #[must_use]
    pub fn matches(&self, record: &MessageRecord) -> bool {
        (self.ids.is_empty() || self.ids.contains(&record.id))
            && self.kind.is_none_or(|kind| kind == record.kind)
            && self.status.is_none_or(|status| status == record.status)
            && self
                .content_type
                .as_deref()
                .is_none_or(|fragment| record.content_type.contains(fragment))
            && self.created_from.is_none_or(|from| record.created_at >= from)
            && self.created_to.is_none_or(|to| record.created_at < to)
            && self.min_duration.is_none_or(|min| record.execution_duration >= min)
            && self.max_duration.is_none_or(|max| record.execution_duration <= max)
    }

    /// Apply skip/take to an already filtered sequence.
    pub fn page<I: IntoIterator<Item = MessageRecord>>(&self, records: I) -> Vec<MessageRecord> {
        let skip = usize::try_from(self.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let take = self
            .take
            .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
        records.into_iter().skip(skip).take(take).collect()
    }
}

/// Storage for processed messages.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so the
/// trait stays dyn-compatible and can sit behind `Arc<dyn MessageRepository>`.
pub trait MessageRepository: Send + Sync {
    /// Store one record.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the record cannot be stored.
    fn add(
        &self,
        record: MessageRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>>;

    /// Load records matching `query`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the read fails.
    fn query(
        &self,
        query: MessageQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MessageRecord>, RepositoryError>> + Send + '_>>;
}
