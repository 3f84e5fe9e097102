//! Stock middleware stages.
//!
//! Default chains, assembled by the pipeline facades:
//!
//! | Pipeline | Stages |
//! |----------|--------|
//! | Command | validation → locator (single) → resolver → executor → repository |
//! | Event | validation → locator (all) → resolver → executor → repository |
//! | Query | query resolver → query executor → repository |
//!
//! Stages exchange intermediate results through the message [`Items`]
//! under the keys in [`keys`].
//!
//! [`Items`]: courier_core::message::Items

mod executor;
mod locator;
mod query;
mod repository;
mod resolver;
mod validation;

pub use executor::HandlerExecutorMiddleware;
pub use locator::{HandlerLocatorMiddleware, LocateMode};
pub use query::{QueryExecutorMiddleware, QueryObjectResolverMiddleware};
pub use repository::RepositoryMiddleware;
pub use resolver::HandlerResolverMiddleware;
pub use validation::ValidationMiddleware;

/// Item keys shared between stages.
pub mod keys {
    /// `Vec<HandlerEntry>` chosen by the locator.
    pub const HANDLERS: &str = "courier.handlers";
    /// `Vec<Option<ResolvedInstance>>`, aligned with [`HANDLERS`].
    pub const INSTANCES: &str = "courier.instances";
    /// `QueryInvocation` of a query message.
    pub const QUERY_INVOCATION: &str = "courier.query.invocation";
    /// `ResolvedInstance` of the query target.
    pub const QUERY_INSTANCE: &str = "courier.query.instance";
    /// `Box<DynInstance>` holding the typed query output.
    pub const QUERY_OUTPUT: &str = "courier.query.output";
}
