//! # Courier Testing
//!
//! Testing utilities and helpers for Courier pipelines.
//!
//! This crate provides:
//! - Mock implementations of environment traits ([`mocks`])
//! - Record and message fixtures ([`fixtures`])
//! - A probe middleware that journals stage activity ([`probe`])
//! - Property-based testing strategies ([`properties`])
//! - A fluent Given-When-Then harness for pipelines ([`PipelineTest`])
//!
//! ## Example
//!
//! ```
//! use courier_core::message::{Message, ProcessingStatus};
//! use courier_runtime::MessagePipeline;
//! use courier_testing::PipelineTest;
//! use courier_testing::probe::{Journal, ProbeMiddleware};
//!
//! let journal = Journal::default();
//! let pipeline = MessagePipeline::new()
//!     .with_middleware(ProbeMiddleware::pass("audit", &journal));
//!
//! PipelineTest::new(pipeline)
//!     .when_message(Message::command(42_u32))
//!     .then_status(ProcessingStatus::Completed)
//!     .run();
//!
//! assert_eq!(journal.entries(), ["handle:audit", "post:audit"]);
//! ```


pub use pipeline_test::{PipelineTest, assertions};

use chrono::{DateTime, Utc};
use courier_core::environment::Clock;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making `created_at` stamps reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use courier_testing::mocks::FixedClock;
    /// use courier_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Record fixtures.
pub mod fixtures {
    use super::mocks::test_clock;
    use super::Clock;
    use courier_core::error::{ErrorDetails, ErrorKind};
    use courier_core::message::{MessageKind, ProcessingStatus};
    use courier_core::record::MessageRecord;
    use serde_json::json;
    use uuid::Uuid;

    /// A completed record with a fresh id, stamped by [`test_clock`].
    #[must_use]
    pub fn record(kind: MessageKind) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            kind,
            content_type: "fixtures::Sample".into(),
            content: json!({"sample": true}),
            data: None,
            error_details: None,
            error_message: String::new(),
            error_type: String::new(),
            created_at: test_clock().now(),
            execution_duration: 3,
            status: ProcessingStatus::Completed,
        }
    }

    /// A record that ended with `error`.
    #[must_use]
    pub fn failed_record(kind: MessageKind, error: ErrorKind, message: &str) -> MessageRecord {
        MessageRecord {
            error_details: Some(ErrorDetails {
                kind: error.as_str().to_string(),
                message: message.to_string(),
                ..ErrorDetails::default()
            }),
            error_message: message.to_string(),
            error_type: error.as_str().to_string(),
            status: error.terminal_status(),
            ..record(kind)
        }
    }
}

/// Stage journaling.
pub mod probe {
    use courier_core::error::PipelineError;
    use courier_core::message::Message;
    use courier_runtime::{Middleware, Stage};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Shared, ordered log of stage activity.
    #[derive(Debug, Clone, Default)]
    pub struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        /// Append an entry.
        pub fn push(&self, entry: impl Into<String>) {
            self.0.lock().push(entry.into());
        }

        /// Copy of every entry.
        #[must_use]
        pub fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }

        /// Forget every entry.
        pub fn clear(&self) {
            self.0.lock().clear();
        }
    }

    /// What a probe does when it runs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Outcome {
        /// Succeed.
        Pass,
        /// Reject with `HandlerNotFound`.
        Reject,
        /// Fail with a handler error.
        Fail,
    }

    /// Middleware that records `handle:<id>` and `post:<id>` into a [`Journal`].
    #[derive(Debug, Clone)]
    pub struct ProbeMiddleware {
        id: String,
        stage: Stage,
        outcome: Outcome,
        journal: Journal,
    }

    impl ProbeMiddleware {
        /// A probe with the given outcome.
        #[must_use]
        pub fn new(id: impl Into<String>, outcome: Outcome, journal: &Journal) -> Self {
            Self {
                id: id.into(),
                stage: Stage::Handling,
                outcome,
                journal: journal.clone(),
            }
        }

        /// A passing probe.
        #[must_use]
        pub fn pass(id: impl Into<String>, journal: &Journal) -> Self {
            Self::new(id, Outcome::Pass, journal)
        }

        /// Run as a finalizing stage.
        #[must_use]
        pub fn finalizing(mut self) -> Self {
            self.stage = Stage::Finalizing;
            self
        }
    }

    impl Middleware for ProbeMiddleware {
        fn id(&self) -> &str {
            &self.id
        }

        fn stage(&self) -> Stage {
            self.stage
        }

        fn handle(&self, message: &mut Message) -> Result<(), PipelineError> {
            self.journal.push(format!("handle:{}", self.id));
            match self.outcome {
                Outcome::Pass => Ok(()),
                Outcome::Reject => Err(PipelineError::HandlerNotFound {
                    message_type: message.content_type().to_string(),
                }),
                Outcome::Fail => Err(PipelineError::HandlerExecution(anyhow::anyhow!("probe `{}` failed", self.id))),
            }
        }

        fn post_handle(&self, _message: &mut Message) {
            self.journal.push(format!("post:{}", self.id));
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use chrono::{TimeZone, Utc};
    use courier_core::error::ErrorDetails;
    use courier_core::message::{MessageKind, ProcessingStatus};
    use courier_core::record::MessageRecord;
    use proptest::prelude::*;
    use serde_json::{Value, json};
    use uuid::Uuid;

    /// Any message kind.
    pub fn arb_kind() -> impl Strategy<Value = MessageKind> {
        prop_oneof![
            Just(MessageKind::Command),
            Just(MessageKind::Query),
            Just(MessageKind::Event)
        ]
    }

    /// Any terminal status.
    pub fn arb_terminal_status() -> impl Strategy<Value = ProcessingStatus> {
        prop_oneof![
            Just(ProcessingStatus::Completed),
            Just(ProcessingStatus::Rejected),
            Just(ProcessingStatus::Failed)
        ]
    }

    /// Any record a pipeline could persist.
    pub fn arb_record() -> impl Strategy<Value = MessageRecord> {
        (
            any::<u128>(),
            arb_kind(),
            "[a-z]{1,8}(::[A-Z][a-z]{1,8}){1,2}",
            arb_terminal_status(),
            proptest::option::of(prop::collection::btree_map("[a-z]{1,6}", ".{0,8}", 0..4)),
            -1_000_000_000_000_000_000_i64..4_000_000_000_000_000_000,
            0_i32..60_000,
            proptest::option::of(any::<i32>()),
        )
            .prop_map(|(id, kind, content_type, status, data, nanos, duration, content)| {
                let failed = status != ProcessingStatus::Completed;
                MessageRecord {
                    id: Uuid::from_u128(id),
                    kind,
                    content_type,
                    content: content.map_or(Value::Null, |n| json!({ "n": n })),
                    data,
                    error_details: failed.then(|| ErrorDetails {
                        kind: "HandlerExecutionError".into(),
                        message: "boom".into(),
                        ..ErrorDetails::default()
                    }),
                    error_message: if failed { "boom".into() } else { String::new() },
                    error_type: if failed { "HandlerExecutionError".into() } else { String::new() },
                    created_at: Utc.timestamp_nanos(nanos),
                    execution_duration: duration,
                    status,
                }
            })
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a test tracing subscriber honouring `RUST_LOG`; repeated calls are no-ops.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::message::MessageKind;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn failed_fixture_carries_its_error() {
        let record = fixtures::failed_record(
            MessageKind::Command,
            courier_core::error::ErrorKind::ValidationFailed,
            "name is required",
        );
        assert!(record.has_error());
        assert_eq!(record.status, courier_core::message::ProcessingStatus::Rejected);
    }
}
