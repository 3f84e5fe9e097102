//! # Courier Core
//!
//! Message model and persistence primitives for the Courier message pipeline.
//!
//! Courier processes **commands**, **queries** and **events** through an
//! ordered chain of middleware stages. This crate holds everything the
//! runtime and the storage back ends share:
//!
//! - [`message`]: the [`Message`](message::Message) envelope and its status state machine
//! - [`error`]: the per-message error taxonomy
//! - [`record`]: the storable projection of a message
//! - [`protocol`]: the chunked binary encoding of records
//! - [`sql`]: a small dialect-aware `SELECT` builder
//! - [`repository`]: the storage contract
//! - [`environment`]: injected dependencies such as the clock
//!
//! ## Message lifecycle
//!
//! ```text
//! Created ──► Processing ──► Completed | Rejected | Failed
//! ```
//!
//! A message reaches exactly one terminal status. `Rejected` means the message
//! never reached business logic (no handler, invalid input, unresolvable
//! dependency); `Failed` means the handler itself raised.
//!
//! ## Example
//!
//! ```
//! use courier_core::message::{Message, MessageKind, ProcessingStatus};
//! use serde::Serialize;
//!
//! #[derive(Debug, Serialize)]
//! struct RegisterUser {
//!     email: String,
//! }
//!
//! let message = Message::command(RegisterUser { email: "ada@example.com".into() });
//! assert_eq!(message.kind(), MessageKind::Command);
//! assert_eq!(message.status(), ProcessingStatus::Created);
//! ```

pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod error;
pub mod message;
pub mod protocol;
pub mod record;
pub mod repository;
pub mod sql;

/// Environment traits for dependency injection.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Pipelines stamp `created_at` through a `Clock` so tests can pin time
    /// with a fixed clock.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
