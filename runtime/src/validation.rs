//! Declarative validation rules.
//!
//! Rules are attached to a message type with [`Rules<C>`] and collected in a
//! [`Validators`] registry. Every rule is evaluated; the message is rejected
//! with a single `ValidationFailed` error listing all violations.
//!
//! # Example
//!
//! ```
//! use courier_runtime::validation::{Rules, Validators};
//! use serde::Serialize;
//!
//! #[derive(Debug, Serialize)]
//! struct Register { email: String, password: String, confirm: String }
//!
//! # fn example() -> Result<(), courier_core::error::PipelineError> {
//! let rules = Rules::<Register>::new()
//!     .required("email", |r| Some(r.email.as_str()))
//!     .pattern("email", r"^[^@\s]+@[^@\s]+$", |r| &r.email)?
//!     .min_length("password", 8, |r| &r.password)
//!     .matches_field("confirm", "password", |r| (&r.confirm, &r.password));
//!
//! let validators = Validators::new().with(rules);
//! let register = Register {
//!     email: "ada".into(),
//!     password: "short".into(),
//!     confirm: "other".into(),
//! };
//! let errors = validators.check(&register).unwrap_err();
//! assert_eq!(errors.len(), 3);
//! # Ok(())
//! # }
//! ```

use crate::registry::DynInstance;
use courier_core::error::{PipelineError, ValidationErrors, Violation};
use regex::Regex;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Check<C> = Box<dyn Fn(&C) -> Option<Violation> + Send + Sync>;

/// Validation rules for messages of type `C`.
pub struct Rules<C> {
    checks: Vec<Check<C>>,
}

impl<C: 'static> Rules<C> {
    /// No rules.
    #[must_use]
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    fn rule(mut self, check: impl Fn(&C) -> Option<Violation> + Send + Sync + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    /// The field must be present and not blank.
    #[must_use]
    pub fn required<F>(self, field: &'static str, get: F) -> Self
    where
        F: Fn(&C) -> Option<&str> + Send + Sync + 'static,
    {
        self.rule(move |c| match get(c) {
            Some(value) if !value.trim().is_empty() => None,
            _ => Some(Violation::new(field, "required", format!("{field} is required"))),
        })
    }

    /// The field must have at least `min` characters.
    #[must_use]
    pub fn min_length<F>(self, field: &'static str, min: usize, get: F) -> Self
    where
        F: Fn(&C) -> &str + Send + Sync + 'static,
    {
        self.rule(move |c| {
            (get(c).chars().count() < min).then(|| {
                Violation::new(field, "min_length", format!("{field} must have at least {min} characters"))
            })
        })
    }

    /// The field must have at most `max` characters.
    #[must_use]
    pub fn max_length<F>(self, field: &'static str, max: usize, get: F) -> Self
    where
        F: Fn(&C) -> &str + Send + Sync + 'static,
    {
        self.rule(move |c| {
            (get(c).chars().count() > max).then(|| {
                Violation::new(field, "max_length", format!("{field} must have at most {max} characters"))
            })
        })
    }

    /// The field must match a regular expression.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] if `pattern` does not compile.
    pub fn pattern<F>(self, field: &'static str, pattern: &str, get: F) -> Result<Self, PipelineError>
    where
        F: Fn(&C) -> &str + Send + Sync + 'static,
    {
        let regex = Regex::new(pattern).map_err(|error| {
            PipelineError::Configuration(format!("invalid pattern for {}.{field}: {error}", type_name::<C>()))
        })?;
        Ok(self.rule(move |c| {
            (!regex.is_match(get(c))).then(|| {
                Violation::new(field, "pattern", format!("{field} does not match {}", regex.as_str()))
            })
        }))
    }

    /// Two fields must be equal. `get` returns `(field, other)`.
    #[must_use]
    pub fn matches_field<F, V>(self, field: &'static str, other: &'static str, get: F) -> Self
    where
        F: Fn(&C) -> (&V, &V) + Send + Sync + 'static,
        V: PartialEq + ?Sized,
    {
        self.rule(move |c| {
            let (value, expected) = get(c);
            (value != expected)
                .then(|| Violation::new(field, "matches_field", format!("{field} must match {other}")))
        })
    }

    /// Arbitrary check returning an explanation on failure.
    #[must_use]
    pub fn custom<F>(self, field: &'static str, rule: &'static str, check: F) -> Self
    where
        F: Fn(&C) -> Result<(), String> + Send + Sync + 'static,
    {
        self.rule(move |c| check(c).err().map(|message| Violation::new(field, rule, message)))
    }

    /// Evaluate every rule.
    #[must_use]
    pub fn evaluate(&self, content: &C) -> ValidationErrors {
        ValidationErrors(self.checks.iter().filter_map(|check| check(content)).collect())
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Whether no rule is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl<C: 'static> Default for Rules<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for Rules<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rules")
            .field("type", &type_name::<C>())
            .field("rules", &self.checks.len())
            .finish()
    }
}

/// Type-erased rule set.
pub trait Validate: Send + Sync {
    /// Evaluate against a payload; payloads of another type pass.
    fn validate(&self, content: &DynInstance) -> ValidationErrors;
}

impl<C: Any + Send + Sync> Validate for Rules<C> {
    fn validate(&self, content: &DynInstance) -> ValidationErrors {
        content
            .downcast_ref::<C>()
            .map(|content| self.evaluate(content))
            .unwrap_or_default()
    }
}

/// Message type → rule sets.
#[derive(Clone, Default)]
pub struct Validators {
    rules: HashMap<TypeId, Vec<Arc<dyn Validate>>>,
}

impl Validators {
    /// No validators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rules for `C` (builder form).
    #[must_use]
    pub fn with<C: Any + Send + Sync>(mut self, rules: Rules<C>) -> Self {
        self.register(rules);
        self
    }

    /// Add rules for `C`. Several rule sets for one type are all evaluated.
    pub fn register<C: Any + Send + Sync>(&mut self, rules: Rules<C>) -> &mut Self {
        self.rules.entry(TypeId::of::<C>()).or_default().push(Arc::new(rules));
        self
    }

    /// Whether rules exist for `type_id`.
    #[must_use]
    pub fn covers(&self, type_id: TypeId) -> bool {
        self.rules.contains_key(&type_id)
    }

    /// Validate a type-erased payload.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ValidationFailed`] with every violation.
    pub fn validate(&self, type_id: TypeId, content: &DynInstance) -> Result<(), PipelineError> {
        let violations: Vec<_> = self
            .rules
            .get(&type_id)
            .into_iter()
            .flatten()
            .flat_map(|rules| rules.validate(content).0)
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::ValidationFailed(ValidationErrors(violations)))
        }
    }

    /// Validate a typed value.
    ///
    /// # Errors
    ///
    /// Returns every violation.
    pub fn check<C: Any + Send + Sync>(&self, content: &C) -> Result<(), ValidationErrors> {
        match self.validate(TypeId::of::<C>(), content) {
            Err(PipelineError::ValidationFailed(errors)) => Err(errors),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Validators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validators").field("types", &self.rules.len()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on invalid patterns
mod tests {
    use super::*;

    struct Signup {
        name: Option<String>,
        code: String,
        pin: u32,
        pin_again: u32,
    }

    fn rules() -> Rules<Signup> {
        Rules::<Signup>::new()
            .required("name", |s| s.name.as_deref())
            .max_length("code", 4, |s| &s.code)
            .pattern("code", "^[A-Z]+$", |s| &s.code)
            .unwrap()
            .matches_field("pin_again", "pin", |s| (&s.pin_again, &s.pin))
            .custom("pin", "range", |s| {
                if s.pin < 10_000 { Ok(()) } else { Err("pin has more than four digits".into()) }
            })
    }

    #[test]
    fn valid_message_has_no_violations() {
        let signup = Signup {
            name: Some("Ada".into()),
            code: "ABC".into(),
            pin: 1234,
            pin_again: 1234,
        };
        assert!(rules().evaluate(&signup).is_empty());
    }

    #[test]
    fn every_violation_is_reported() {
        let signup = Signup {
            name: Some("   ".into()),
            code: "abcdef".into(),
            pin: 123_456,
            pin_again: 1,
        };
        let errors = rules().evaluate(&signup);
        let rules: Vec<_> = errors.iter().map(|v| v.rule.as_str()).collect();
        assert_eq!(rules, ["required", "max_length", "pattern", "matches_field", "range"]);
    }

    #[test]
    fn registry_aggregates_rule_sets_into_one_error() {
        let validators = Validators::new()
            .with(rules())
            .with(Rules::<Signup>::new().min_length("code", 2, |s| &s.code));
        let signup = Signup {
            name: None,
            code: "A".into(),
            pin: 1,
            pin_again: 1,
        };

        let error = validators.validate(TypeId::of::<Signup>(), &signup).unwrap_err();
        let PipelineError::ValidationFailed(errors) = error else {
            unreachable!("validation error expected");
        };
        assert_eq!(errors.len(), 2);
        assert!(validators.covers(TypeId::of::<Signup>()));
    }

    #[test]
    fn invalid_pattern_is_a_configuration_error() {
        let result = Rules::<Signup>::new().pattern("code", "(", |s| &s.code);
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn unrelated_types_pass() {
        let validators = Validators::new().with(rules());
        assert!(validators.validate(TypeId::of::<u8>(), &7_u8).is_ok());
    }
}
