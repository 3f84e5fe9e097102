//! Handler lookup stage.

use super::keys;
use crate::pipeline::Middleware;
use crate::registry::{HandlerEntry, HandlerRegistry};
use courier_core::error::PipelineError;
use courier_core::message::Message;
use std::sync::Arc;

/// How many handlers a message is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateMode {
    /// Exactly one handler (commands).
    Single,
    /// Every registered handler (events).
    All,
}

/// Looks up the handlers of the message payload type.
#[derive(Debug, Clone)]
pub struct HandlerLocatorMiddleware {
    registry: Arc<HandlerRegistry>,
    mode: LocateMode,
}

impl HandlerLocatorMiddleware {
    /// Locate one handler per message.
    #[must_use]
    pub const fn single(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            mode: LocateMode::Single,
        }
    }

    /// Locate every handler of the message.
    #[must_use]
    pub const fn all(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            mode: LocateMode::All,
        }
    }

    /// Dispatch mode.
    #[must_use]
    pub const fn mode(&self) -> LocateMode {
        self.mode
    }
}

impl Middleware for HandlerLocatorMiddleware {
    fn id(&self) -> &str {
        "handler-locator"
    }

    fn handle(&self, message: &mut Message) -> Result<(), PipelineError> {
        let type_id = message.payload().content_type_id();
        let entries: Vec<HandlerEntry> = match self.mode {
            LocateMode::Single => vec![self.registry.find(type_id, message.content_type())?.clone()],
            LocateMode::All => self
                .registry
                .find_all(type_id, message.content_type())?
                .into_iter()
                .cloned()
                .collect(),
        };
        tracing::debug!(
            content_type = message.content_type(),
            handlers = entries.len(),
            "Located handlers"
        );
        message.items_mut().insert(keys::HANDLERS, entries);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on missing items
mod tests {
    use super::*;
    use crate::registry::MessageHandler;
    use courier_core::error::ErrorKind;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct Shipped;

    struct Mailer;
    struct Billing;

    impl MessageHandler<Shipped> for Mailer {
        fn handle(&self, _message: &mut Shipped) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl MessageHandler<Shipped> for Billing {
        fn handle(&self, _message: &mut Shipped) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registry() -> Arc<HandlerRegistry> {
        let mut builder = HandlerRegistry::builder();
        builder
            .handler::<Mailer, Shipped>("handle")
            .handler::<Billing, Shipped>("handle");
        Arc::new(builder.build())
    }

    #[test]
    fn single_mode_stores_one_entry() {
        let mut message = Message::command(Shipped);
        HandlerLocatorMiddleware::single(registry()).handle(&mut message).unwrap();
        let entries = message.items().get::<Vec<HandlerEntry>>(keys::HANDLERS).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn all_mode_stores_every_entry() {
        let mut message = Message::event(Shipped);
        HandlerLocatorMiddleware::all(registry()).handle(&mut message).unwrap();
        let entries = message.items().get::<Vec<HandlerEntry>>(keys::HANDLERS).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut message = Message::command(7_u32);
        let error = HandlerLocatorMiddleware::single(registry())
            .handle(&mut message)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::HandlerNotFound);
        assert!(error.to_string().contains("u32"));
    }
}
