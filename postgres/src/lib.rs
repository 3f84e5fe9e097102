//! `PostgreSQL` message repository for Courier.
//!
//! This crate provides a [`MessageRepository`] backed by a single `PostgreSQL`
//! table. Every record is stored twice over: a handful of indexed columns used
//! for filtering, and the complete record encoded with the chunked binary
//! protocol from `courier-core` in the `data` column. Reads filter on the
//! columns and rebuild records from the blob, so nothing is lost to column
//! precision (timestamps keep their nanoseconds).
//!
//! ```text
//! id UUID PRIMARY KEY | type SMALLINT | content_type TEXT | status SMALLINT
//! created_at TIMESTAMPTZ | execution_duration INTEGER | data BYTEA
//! ```
//!
//! Filtering statements are rendered with the [`Postgres`] dialect of the
//! core `SELECT` builder; inserts use bound parameters.
//!
//! # Example
//!
//! ```no_run
//! use courier_postgres::PostgresMessageRepository;
//! use courier_core::repository::{MessageQuery, MessageRepository};
//! use courier_core::message::ProcessingStatus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = PostgresMessageRepository::connect("postgres://localhost/courier").await?;
//! repository.create_schema().await?;
//!
//! let failed = repository
//!     .query(MessageQuery::new().with_status(ProcessingStatus::Failed).take(50))
//!     .await?;
//! println!("Failed messages: {}", failed.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use courier_core::protocol::{decode_record, encode_record};
use courier_core::record::MessageRecord;
use courier_core::repository::{MessageQuery, MessageRepository, RepositoryError};
use courier_core::sql::{Dialect, Operator, OrderDirection, Postgres, SelectBuilder, SqlValue};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// Table used when none is configured.
pub const DEFAULT_TABLE: &str = "messages";

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// `PostgreSQL`-backed message repository.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresMessageRepository {
    pool: PgPool,
    table: String,
}

impl PostgresMessageRepository {
    /// Wrap an existing pool, storing into [`DEFAULT_TABLE`].
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE.to_string(),
        }
    }

    /// Connect with a small default pool.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DatabaseError`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(database_error)?;
        Ok(Self::new(pool))
    }

    /// Store into `table` instead (may be schema-qualified, `audit.messages`).
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// The connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The table name, unquoted.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn quoted_table(&self) -> String {
        Postgres.quote_identifier(&self.table)
    }

    /// Create the table and its indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DatabaseError`] if a statement fails.
    pub async fn create_schema(&self) -> Result<(), RepositoryError> {
        let table = self.quoted_table();
        let index_prefix = self.table.replace('.', "_");

        sqlx::query(&format!(
            r"
            CREATE TABLE IF NOT EXISTS {table} (
                id UUID PRIMARY KEY,
                type SMALLINT NOT NULL,
                content_type TEXT NOT NULL,
                status SMALLINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                execution_duration INTEGER NOT NULL,
                data BYTEA NOT NULL
            )
            "
        ))
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        for column in ["created_at", "status", "content_type"] {
            let index = Postgres.quote_segment(&format!("idx_{index_prefix}_{column}"));
            sqlx::query(&format!("CREATE INDEX IF NOT EXISTS {index} ON {table}({column})"))
                .execute(&self.pool)
                .await
                .map_err(database_error)?;
        }

        tracing::info!(table = %self.table, "Message table ready");
        Ok(())
    }

    async fn insert(&self, record: MessageRecord) -> Result<(), RepositoryError> {
        let data = encode_record(&record)?;
        let statement = format!(
            "INSERT INTO {} (id, type, content_type, status, created_at, execution_duration, data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            self.quoted_table()
        );

        let outcome = sqlx::query(&statement)
            .bind(record.id)
            .bind(i16::from(record.kind.code()))
            .bind(&record.content_type)
            .bind(i16::from(record.status.code()))
            .bind(record.created_at)
            .bind(record.execution_duration)
            .bind(&data)
            .execute(&self.pool)
            .await;

        match outcome {
            Ok(_) => {
                tracing::debug!(message_id = %record.id, bytes = data.len(), "Record inserted");
                #[allow(clippy::cast_precision_loss)] // Blob sizes are far below 2^52
                metrics::histogram!("courier_postgres_record_bytes").record(data.len() as f64);
                Ok(())
            }
            Err(sqlx::Error::Database(error)) if error.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(RepositoryError::Duplicate(record.id))
            }
            Err(error) => Err(database_error(error)),
        }
    }

    /// Render the `SELECT` for `query`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if the statement cannot be rendered.
    pub fn select_statement(&self, query: &MessageQuery) -> Result<String, RepositoryError> {
        let mut select = SelectBuilder::new(Postgres).column("data").from(self.table.as_str());

        if !query.ids.is_empty() {
            select = select.and_where("id", Operator::In, query.ids.clone());
        }
        if let Some(kind) = query.kind {
            select = select.and_where("type", Operator::Eq, kind.code());
        }
        if let Some(status) = query.status {
            select = select.and_where("status", Operator::Eq, status.code());
        }
        if let Some(fragment) = &query.content_type {
            select = select.and_where("content_type", Operator::Like, format!("%{}%", escape_like(fragment)));
        }
        if let Some(from) = query.created_from {
            select = select.and_where("created_at", Operator::Ge, timestamp(from));
        }
        if let Some(to) = query.created_to {
            select = select.and_where("created_at", Operator::Lt, timestamp(to));
        }
        if let Some(min) = query.min_duration {
            select = select.and_where("execution_duration", Operator::Ge, min);
        }
        if let Some(max) = query.max_duration {
            select = select.and_where("execution_duration", Operator::Le, max);
        }

        select = select
            .order_by("created_at", OrderDirection::Ascending)
            .order_by("id", OrderDirection::Ascending);
        if let Some(skip) = query.skip {
            select = select.skip(skip);
        }
        if let Some(take) = query.take {
            select = select.take(take);
        }

        select.build().map_err(|error| RepositoryError::Query(error.to_string()))
    }

    async fn load(&self, query: MessageQuery) -> Result<Vec<MessageRecord>, RepositoryError> {
        let statement = self.select_statement(&query)?;
        tracing::trace!(sql = %statement, "Loading records");

        let rows = sqlx::query(&statement)
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;

        let records = rows
            .iter()
            .map(|row| {
                let data: Vec<u8> = row.try_get("data").map_err(database_error)?;
                decode_record(&data)?
                    .ok_or_else(|| RepositoryError::DatabaseError("row holds an empty record blob".into()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        metrics::counter!("courier_postgres_records_loaded_total").increment(records.len() as u64);
        Ok(records)
    }
}

impl MessageRepository for PostgresMessageRepository {
    fn add(&self, record: MessageRecord) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>> {
        Box::pin(self.insert(record))
    }

    fn query(
        &self,
        query: MessageQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MessageRecord>, RepositoryError>> + Send + '_>> {
        Box::pin(self.load(query))
    }
}

fn database_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::DatabaseError(error.to_string())
}

/// Timestamps are compared at full precision rather than as second-truncated text.
fn timestamp(value: chrono::DateTime<chrono::Utc>) -> SqlValue {
    SqlValue::Raw(format!("'{}'::timestamptz", value.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)))
}

fn escape_like(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on rendering errors
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use courier_core::message::{MessageKind, ProcessingStatus};

    fn repository() -> PostgresMessageRepository {
        PostgresMessageRepository::new(PgPoolOptions::new().connect_lazy("postgres://localhost/courier").unwrap())
    }

    #[tokio::test]
    async fn empty_query_selects_every_blob_in_order() {
        let sql = repository().select_statement(&MessageQuery::new()).unwrap();
        assert_eq!(
            sql,
            "SELECT \"data\"\nFROM \"messages\"\nORDER BY \"created_at\", \"id\""
        );
    }

    #[tokio::test]
    async fn filters_render_as_conditions() {
        let query = MessageQuery::new()
            .with_kind(MessageKind::Query)
            .with_status(ProcessingStatus::Rejected)
            .with_content_type("50%_off")
            .skip(20)
            .take(10);

        let sql = repository().with_table("audit.messages").select_statement(&query).unwrap();

        assert!(sql.contains("FROM \"audit\".\"messages\""));
        assert!(sql.contains("(\"type\" = 2)"));
        assert!(sql.contains("(\"status\" = 4)"));
        assert!(sql.contains(r#"("content_type" LIKE '%50\%\_off%')"#));
        assert!(sql.ends_with("LIMIT 10\nOFFSET 20"));
    }

    #[tokio::test]
    async fn time_bounds_keep_sub_second_precision() {
        let from = Utc.timestamp_nanos(1_700_000_000_123_456_789);
        let sql = repository()
            .select_statement(&MessageQuery::new().created_between(from, from))
            .unwrap();
        assert!(sql.contains("'2023-11-14T22:13:20.123456789Z'::timestamptz"));
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like(r"a_b%c\d"), r"a\_b\%c\\d");
    }
}
