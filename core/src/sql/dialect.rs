//! Dialect-specific rendering rules.

use super::SqlError;

/// How a database spells identifiers, literals and paging.
pub trait Dialect {
    /// Dialect name used in error messages.
    fn name(&self) -> &'static str;

    /// Quote a single identifier segment (no dots).
    fn quote_segment(&self, segment: &str) -> String;

    /// Render a boolean literal.
    fn boolean(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    /// Whether `FULL JOIN` is available.
    fn supports_full_join(&self) -> bool {
        true
    }

    /// Append the paging clause, if any, to `sql`.
    ///
    /// # Errors
    ///
    /// Dialects that cannot express the requested paging return [`SqlError`].
    fn paging(
        &self,
        sql: &mut String,
        skip: Option<u64>,
        take: Option<u64>,
        has_order: bool,
    ) -> Result<(), SqlError>;

    /// Quote a possibly dotted identifier, segment by segment. `*` is left bare.
    fn quote_identifier(&self, identifier: &str) -> String {
        identifier
            .split('.')
            .map(|segment| {
                if segment == "*" {
                    segment.to_string()
                } else {
                    self.quote_segment(segment)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// MySQL / MariaDB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn quote_segment(&self, segment: &str) -> String {
        format!("`{}`", segment.replace('`', "``"))
    }

    fn supports_full_join(&self) -> bool {
        false
    }

    fn paging(
        &self,
        sql: &mut String,
        skip: Option<u64>,
        take: Option<u64>,
        _has_order: bool,
    ) -> Result<(), SqlError> {
        match (skip, take) {
            (Some(skip), Some(take)) => sql.push_str(&format!("\nLIMIT {skip}, {take}")),
            (None, Some(take)) => sql.push_str(&format!("\nLIMIT {take}")),
            // MySQL has no OFFSET without LIMIT; the documented idiom is the max row count.
            (Some(skip), None) => sql.push_str(&format!("\nLIMIT {skip}, {}", u64::MAX)),
            (None, None) => {}
        }
        Ok(())
    }
}

/// PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_segment(&self, segment: &str) -> String {
        format!("\"{}\"", segment.replace('"', "\"\""))
    }

    fn boolean(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    fn paging(
        &self,
        sql: &mut String,
        skip: Option<u64>,
        take: Option<u64>,
        _has_order: bool,
    ) -> Result<(), SqlError> {
        if let Some(take) = take {
            sql.push_str(&format!("\nLIMIT {take}"));
        }
        if let Some(skip) = skip {
            sql.push_str(&format!("\nOFFSET {skip}"));
        }
        Ok(())
    }
}

/// Microsoft SQL Server (2012+ paging syntax).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServer;

impl Dialect for SqlServer {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn quote_segment(&self, segment: &str) -> String {
        format!("[{}]", segment.replace(']', "]]"))
    }

    fn paging(
        &self,
        sql: &mut String,
        skip: Option<u64>,
        take: Option<u64>,
        has_order: bool,
    ) -> Result<(), SqlError> {
        if skip.is_none() && take.is_none() {
            return Ok(());
        }
        if !has_order {
            sql.push_str("\nORDER BY (SELECT NULL)");
        }
        sql.push_str(&format!("\nOFFSET {} ROWS", skip.unwrap_or(0)));
        if let Some(take) = take {
            sql.push_str(&format!(" FETCH NEXT {take} ROWS ONLY"));
        }
        Ok(())
    }
}
