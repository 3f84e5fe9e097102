//! Validation stage for typed payloads.

use crate::pipeline::Middleware;
use crate::validation::Validators;
use courier_core::error::PipelineError;
use courier_core::message::{Message, Payload};
use std::sync::Arc;

/// Rejects typed payloads that violate their declared rules.
///
/// Argument-map payloads are not validated.
#[derive(Debug, Clone)]
pub struct ValidationMiddleware {
    validators: Arc<Validators>,
}

impl ValidationMiddleware {
    /// Validate with `validators`.
    #[must_use]
    pub const fn new(validators: Arc<Validators>) -> Self {
        Self { validators }
    }
}

impl Middleware for ValidationMiddleware {
    fn id(&self) -> &str {
        "validation"
    }

    fn handle(&self, message: &mut Message) -> Result<(), PipelineError> {
        let Payload::Object(content) = message.payload() else {
            return Ok(());
        };
        let content = content.as_any();
        let type_id = message.payload().content_type_id();
        if let Err(error) = self.validators.validate(type_id, content) {
            tracing::debug!(content_type = message.content_type(), error = %error, "Validation failed");
            return Err(error);
        }
        Ok(())
    }
}
