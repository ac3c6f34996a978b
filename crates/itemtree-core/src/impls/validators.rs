//! SchemaValidator implementations for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{AspectType, RemoteError};
use crate::ports::{SchemaValidator, ValidationOutcome};

/// Accepts every payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllValidator;

#[async_trait]
impl SchemaValidator for AcceptAllValidator {
    async fn validate(
        &self,
        _aspect: &AspectType,
        _payload: &serde_json::Value,
    ) -> Result<ValidationOutcome, RemoteError> {
        Ok(ValidationOutcome::Valid)
    }
}

/// Requires a JSON object carrying the configured top-level fields per aspect.
///
/// Aspects without an entry only need to be objects.
#[derive(Debug, Clone, Default)]
pub struct RequiredFieldsValidator {
    required: HashMap<AspectType, Vec<String>>,
}

impl RequiredFieldsValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require<I, S>(mut self, aspect: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required
            .entry(AspectType::new(aspect))
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl SchemaValidator for RequiredFieldsValidator {
    async fn validate(
        &self,
        aspect: &AspectType,
        payload: &serde_json::Value,
    ) -> Result<ValidationOutcome, RemoteError> {
        let Some(object) = payload.as_object() else {
            return Ok(ValidationOutcome::Invalid(vec![format!(
                "{aspect}: payload must be a JSON object"
            )]));
        };
        let missing: Vec<String> = self
            .required
            .get(aspect)
            .into_iter()
            .flatten()
            .filter(|field| !object.contains_key(field.as_str()))
            .map(|field| format!("{aspect}: missing required field '{field}'"))
            .collect();
        if missing.is_empty() {
            Ok(ValidationOutcome::Valid)
        } else {
            Ok(ValidationOutcome::Invalid(missing))
        }
    }
}
