//! Minimal dialect-aware `SELECT` builder.
//!
//! Only what the relational message repository needs: column lists,
//! `DISTINCT`, joins, `WHERE` conditions combined with `AND`, `GROUP BY`,
//! `ORDER BY` and paging. Values are rendered as literals, so callers that
//! accept untrusted input should prefer bound parameters for the `WHERE` part.
//!
//! # Example
//!
//! ```
//! use courier_core::sql::{MySql, Operator, OrderDirection, SelectBuilder};
//!
//! let sql = SelectBuilder::new(MySql)
//!     .from("messages")
//!     .and_where("status", Operator::Eq, 2)
//!     .order_by("created_at", OrderDirection::Descending)
//!     .skip(10)
//!     .take(20)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(
//!     sql,
//!     "SELECT *\nFROM `messages`\nWHERE (`status` = 2)\nORDER BY `created_at` DESC\nLIMIT 10, 20"
//! );
//! ```

mod dialect;

pub use dialect::{Dialect, MySql, Postgres, SqlServer};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while rendering a statement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqlError {
    /// `build` was called without any `FROM` table.
    #[error("SELECT requires at least one table")]
    MissingTable,

    /// NULL can only be compared with `=` or `<>`.
    #[error("Cannot compare {column} with NULL using {operator}")]
    NullComparison {
        /// Column in the condition.
        column: String,
        /// Offending operator.
        operator: &'static str,
    },

    /// The operand shape does not fit the operator (list without `IN`, scalar with `IN`).
    #[error("Operator {operator} cannot be applied to {column} with this operand")]
    InvalidOperand {
        /// Column in the condition.
        column: String,
        /// Offending operator.
        operator: &'static str,
    },

    /// `IN` with an empty list.
    #[error("IN list for {0} is empty")]
    EmptyList(String),

    /// A join without any `ON` condition.
    #[error("JOIN {0} has no ON condition")]
    MissingJoinCondition(String),

    /// Floats that SQL cannot represent.
    #[error("Non-finite number cannot be rendered as SQL")]
    NonFiniteNumber,

    /// The dialect does not support the requested construct.
    #[error("{dialect} does not support {feature}")]
    Unsupported {
        /// Dialect name.
        dialect: &'static str,
        /// What was requested.
        feature: &'static str,
    },
}

/// Comparison operators usable in `WHERE` and `ON`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `LIKE`
    Like,
    /// `NOT LIKE`
    NotLike,
    /// `IN (...)`
    In,
}

impl Operator {
    /// SQL spelling.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::In => "IN",
        }
    }
}

/// A literal or reference on the right-hand side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// `NULL`
    Null,
    /// Dialect boolean literal.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// Single-quoted string.
    Text(String),
    /// UUID rendered as a quoted string.
    Uuid(Uuid),
    /// Timestamp rendered as `'yyyy-mm-dd HH:MM:SS'`.
    DateTime(DateTime<Utc>),
    /// Parenthesized list, only valid with [`Operator::In`].
    List(Vec<SqlValue>),
    /// Expression passed through unwrapped.
    Raw(String),
    /// Identifier, quoted like a column.
    Column(String),
}

impl SqlValue {
    fn render<D: Dialect + ?Sized>(&self, dialect: &D) -> Result<String, SqlError> {
        Ok(match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(value) => dialect.boolean(*value).to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) if value.is_finite() => value.to_string(),
            Self::Float(_) => return Err(SqlError::NonFiniteNumber),
            Self::Text(value) => quote_text(value),
            Self::Uuid(value) => format!("'{value}'"),
            Self::DateTime(value) => format!("'{}'", value.format("%Y-%m-%d %H:%M:%S")),
            Self::List(values) => {
                let rendered = values
                    .iter()
                    .map(|value| value.render(dialect))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("({})", rendered.join(", "))
            }
            Self::Raw(expression) => expression.clone(),
            Self::Column(column) => dialect.quote_identifier(column),
        })
    }
}

fn quote_text(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u8> for SqlValue {
    fn from(value: u8) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

impl<T: Into<Self>> From<Vec<T>> for SqlValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Join flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
    /// `FULL JOIN`
    Full,
}

impl JoinKind {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
        }
    }
}

/// A joined table and its `ON` conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    kind: JoinKind,
    table: String,
    conditions: Vec<(String, Operator, String)>,
}

impl JoinClause {
    /// Join `table` with the given kind.
    #[must_use]
    pub fn new(kind: JoinKind, table: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            conditions: Vec::new(),
        }
    }

    /// `INNER JOIN table`
    #[must_use]
    pub fn inner(table: impl Into<String>) -> Self {
        Self::new(JoinKind::Inner, table)
    }

    /// `LEFT JOIN table`
    #[must_use]
    pub fn left(table: impl Into<String>) -> Self {
        Self::new(JoinKind::Left, table)
    }

    /// `RIGHT JOIN table`
    #[must_use]
    pub fn right(table: impl Into<String>) -> Self {
        Self::new(JoinKind::Right, table)
    }

    /// `FULL JOIN table`
    #[must_use]
    pub fn full(table: impl Into<String>) -> Self {
        Self::new(JoinKind::Full, table)
    }

    /// Add an `ON left op right` condition; both sides are column references.
    #[must_use]
    pub fn on(mut self, left: impl Into<String>, operator: Operator, right: impl Into<String>) -> Self {
        self.conditions.push((left.into(), operator, right.into()));
        self
    }

    fn render<D: Dialect + ?Sized>(&self, dialect: &D) -> Result<String, SqlError> {
        if self.kind == JoinKind::Full && !dialect.supports_full_join() {
            return Err(SqlError::Unsupported {
                dialect: dialect.name(),
                feature: "FULL JOIN",
            });
        }
        if self.conditions.is_empty() {
            return Err(SqlError::MissingJoinCondition(self.table.clone()));
        }
        let conditions = self
            .conditions
            .iter()
            .map(|(left, operator, right)| {
                format!(
                    "{} {} {}",
                    dialect.quote_identifier(left),
                    operator.as_sql(),
                    dialect.quote_identifier(right)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        Ok(format!(
            "{} {} ON {conditions}",
            self.kind.as_sql(),
            dialect.quote_identifier(&self.table)
        ))
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Smallest first (rendered without a keyword).
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
enum Column {
    Named(String),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Condition {
    column: String,
    operator: Operator,
    value: SqlValue,
}

impl Condition {
    fn render<D: Dialect + ?Sized>(&self, dialect: &D) -> Result<String, SqlError> {
        let column = dialect.quote_identifier(&self.column);
        match (&self.value, self.operator) {
            (SqlValue::Null, Operator::Eq) => Ok(format!("{column} IS NULL")),
            (SqlValue::Null, Operator::Ne) => Ok(format!("{column} IS NOT NULL")),
            (SqlValue::Null, operator) => Err(SqlError::NullComparison {
                column: self.column.clone(),
                operator: operator.as_sql(),
            }),
            (SqlValue::List(values), Operator::In) if values.is_empty() => {
                Err(SqlError::EmptyList(self.column.clone()))
            }
            (SqlValue::List(_), Operator::In) => Ok(format!("{column} IN {}", self.value.render(dialect)?)),
            (SqlValue::List(_), operator) | (_, operator @ Operator::In) => Err(SqlError::InvalidOperand {
                column: self.column.clone(),
                operator: operator.as_sql(),
            }),
            (value, operator) => Ok(format!("{column} {} {}", operator.as_sql(), value.render(dialect)?)),
        }
    }
}

/// Builds a single `SELECT` statement for dialect `D`.
#[derive(Debug, Clone)]
pub struct SelectBuilder<D> {
    dialect: D,
    distinct: bool,
    columns: Vec<Column>,
    tables: Vec<String>,
    joins: Vec<JoinClause>,
    conditions: Vec<Condition>,
    group_by: Vec<String>,
    order_by: Vec<(String, OrderDirection)>,
    skip: Option<u64>,
    take: Option<u64>,
}

impl<D: Dialect> SelectBuilder<D> {
    /// Start an empty `SELECT` for `dialect`.
    #[must_use]
    pub const fn new(dialect: D) -> Self {
        Self {
            dialect,
            distinct: false,
            columns: Vec::new(),
            tables: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            skip: None,
            take: None,
        }
    }

    /// `SELECT DISTINCT`
    #[must_use]
    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Select a column; dotted names are quoted per segment.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(Column::Named(column.into()));
        self
    }

    /// Select several columns.
    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns
            .extend(columns.into_iter().map(|c| Column::Named(c.into())));
        self
    }

    /// Select an unquoted expression such as `COUNT(*)`.
    #[must_use]
    pub fn raw_column(mut self, expression: impl Into<String>) -> Self {
        self.columns.push(Column::Raw(expression.into()));
        self
    }

    /// Add a `FROM` table.
    #[must_use]
    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.tables.push(table.into());
        self
    }

    /// Add a join.
    #[must_use]
    pub fn join(mut self, join: JoinClause) -> Self {
        self.joins.push(join);
        self
    }

    /// Add a `WHERE` condition, combined with the others by `AND`.
    #[must_use]
    pub fn and_where(
        mut self,
        column: impl Into<String>,
        operator: Operator,
        value: impl Into<SqlValue>,
    ) -> Self {
        self.conditions.push(Condition {
            column: column.into(),
            operator,
            value: value.into(),
        });
        self
    }

    /// Add a `GROUP BY` column.
    #[must_use]
    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    /// Add an `ORDER BY` column.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by.push((column.into(), direction));
        self
    }

    /// Skip the first `n` rows.
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

    /// Render the statement.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError`] for a missing table, NULL used with an ordering
    /// operator, malformed `IN` operands, joins without conditions, and
    /// constructs the dialect cannot express.
    pub fn build(&self) -> Result<String, SqlError> {
        if self.tables.is_empty() {
            return Err(SqlError::MissingTable);
        }
        let dialect = &self.dialect;

        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            let columns = self
                .columns
                .iter()
                .map(|column| match column {
                    Column::Named(name) => dialect.quote_identifier(name),
                    Column::Raw(expression) => expression.clone(),
                })
                .collect::<Vec<_>>();
            sql.push_str(&columns.join(", "));
        }

        let tables = self
            .tables
            .iter()
            .map(|table| dialect.quote_identifier(table))
            .collect::<Vec<_>>();
        sql.push_str("\nFROM ");
        sql.push_str(&tables.join(", "));

        for join in &self.joins {
            sql.push('\n');
            sql.push_str(&join.render(dialect)?);
        }

        if !self.conditions.is_empty() {
            let conditions = self
                .conditions
                .iter()
                .map(|condition| condition.render(dialect).map(|c| format!("({c})")))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str("\nWHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if !self.group_by.is_empty() {
            let columns = self
                .group_by
                .iter()
                .map(|column| dialect.quote_identifier(column))
                .collect::<Vec<_>>();
            sql.push_str("\nGROUP BY ");
            sql.push_str(&columns.join(", "));
        }

        if !self.order_by.is_empty() {
            let columns = self
                .order_by
                .iter()
                .map(|(column, direction)| match direction {
                    OrderDirection::Ascending => dialect.quote_identifier(column),
                    OrderDirection::Descending => format!("{} DESC", dialect.quote_identifier(column)),
                })
                .collect::<Vec<_>>();
            sql.push_str("\nORDER BY ");
            sql.push_str(&columns.join(", "));
        }

        dialect.paging(&mut sql, self.skip, self.take, !self.order_by.is_empty())?;
        Ok(sql)
    }
}
