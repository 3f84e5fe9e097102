//! Handler instance resolution stage and its release post-hook.

use super::keys;
use crate::pipeline::Middleware;
use crate::registry::HandlerEntry;
use crate::resolver::{ObjectResolver, ResolvedInstance};
use courier_core::error::PipelineError;
use courier_core::message::Message;
use std::sync::Arc;

/// Resolves the container instance of every located handler.
///
/// Internally constructed instances are released by the post-hook, whatever
/// the outcome of the message.
#[derive(Debug, Clone)]
pub struct HandlerResolverMiddleware {
    resolver: Arc<ObjectResolver>,
}

impl HandlerResolverMiddleware {
    /// Resolve through `resolver`.
    #[must_use]
    pub const fn new(resolver: Arc<ObjectResolver>) -> Self {
        Self { resolver }
    }
}

impl Middleware for HandlerResolverMiddleware {
    fn id(&self) -> &str {
        "handler-resolver"
    }

    fn handle(&self, message: &mut Message) -> Result<(), PipelineError> {
        let items = message.items_mut();
        let entries = items
            .get::<Vec<HandlerEntry>>(keys::HANDLERS)
            .ok_or_else(|| PipelineError::Configuration("handler resolver runs before the handler locator".into()))?;

        let mut instances: Vec<Option<ResolvedInstance>> = Vec::with_capacity(entries.len());
        let mut failure = None;
        for entry in entries {
            if entry.is_self_handling() {
                instances.push(None);
                continue;
            }
            match self.resolver.resolve(entry.owner_type(), entry.owner_name(), self.id()) {
                Ok(instance) => instances.push(Some(instance)),
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        // Partial results are stored so the post-hook releases them.
        items.insert(keys::INSTANCES, instances);
        failure.map_or(Ok(()), Err)
    }

    fn post_handle(&self, message: &mut Message) {
        let Some(instances) = message
            .items_mut()
            .take::<Vec<Option<ResolvedInstance>>>(keys::INSTANCES)
        else {
            return;
        };
        for instance in instances.into_iter().flatten() {
            if instance.is_internal() {
                tracing::trace!(type_name = instance.type_name(), "Releasing handler instance");
            }
            instance.release();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on missing items
mod tests {
    use super::*;
    use crate::middleware::HandlerLocatorMiddleware;
    use crate::registry::{HandlerRegistry, MessageHandler};
    use crate::resolver::{Injectable, ResolvedArguments};
    use courier_core::error::ErrorKind;
    use serde::Serialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static RELEASED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Serialize)]
    struct Archive;

    struct Archiver;

    impl Injectable for Archiver {
        fn construct(_arguments: &mut ResolvedArguments) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn release(&self) {
            RELEASED.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl MessageHandler<Archive> for Archiver {
        fn handle(&self, _message: &mut Archive) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn located(message: &mut Message) {
        let mut builder = HandlerRegistry::builder();
        builder.handler::<Archiver, Archive>("handle");
        HandlerLocatorMiddleware::single(Arc::new(builder.build()))
            .handle(message)
            .unwrap();
    }

    #[test]
    fn post_hook_releases_internal_instances() {
        let stage = HandlerResolverMiddleware::new(Arc::new(
            ObjectResolver::builder().injectable::<Archiver>().build(),
        ));
        let mut message = Message::command(Archive);
        located(&mut message);

        stage.handle(&mut message).unwrap();
        let before = RELEASED.load(Ordering::SeqCst);
        stage.post_handle(&mut message);

        assert_eq!(RELEASED.load(Ordering::SeqCst), before + 1);
        assert!(!message.items().contains_key(keys::INSTANCES));
    }

    #[test]
    fn unregistered_container_cannot_be_resolved() {
        let stage = HandlerResolverMiddleware::new(Arc::new(ObjectResolver::builder().build()));
        let mut message = Message::command(Archive);
        located(&mut message);

        let error = stage.handle(&mut message).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::CannotResolve);
    }

    #[test]
    fn missing_locator_is_a_configuration_error() {
        let stage = HandlerResolverMiddleware::new(Arc::new(ObjectResolver::builder().build()));
        let error = stage.handle(&mut Message::command(Archive)).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }
}
