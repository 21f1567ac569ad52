//! Validation Support
//!
//! Models report schema validation failures as [`ValidationErrors`], a per-path collection
//! of [`ValidationError`]s. The translation chain turns them into a 422 response with one
//! body entry per failing path.
//!
//! # Example
//!
//! ```rust,ignore
//! use crudline::validation::{ValidationError, ValidationErrors};
//!
//! let mut errors = ValidationErrors::new();
//! errors.add(ValidationError::required("name"));
//! errors.result()?;
//! ```

use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;

use crate::errors::ErrorEntry;

/// Validation error for a single document path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    /// The path that failed validation
    pub path: String,
    /// Human-readable error message
    pub message: String,
    /// Validator kind, e.g. `required`, `cast`, `enum`
    pub kind: String,
    /// The offending value, if there was one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ValidationError {
    #[must_use]
    pub fn new(path: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind: kind.into(),
            value: None,
        }
    }

    /// A `required` failure with the conventional message
    #[must_use]
    pub fn required(path: &str) -> Self {
        Self::new(path, "required", format!("Path `{path}` is required."))
    }

    /// A failed type cast
    #[must_use]
    pub fn cast(path: &str, expected: &str, value: Value) -> Self {
        Self::new(
            path,
            "cast",
            format!("Cast to {expected} failed for value {value} at path \"{path}\""),
        )
        .with_value(value)
    }

    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Body entry for this failure
    #[must_use]
    pub fn to_entry(&self) -> ErrorEntry {
        let mut entry = ErrorEntry::new("ValidatorError", self.message.clone())
            .with_path(self.path.clone())
            .with_type(self.kind.clone());
        entry.kind = Some(self.kind.clone());
        entry.value = self.value.clone();
        entry.properties = Some(json!({
            "path": self.path,
            "type": self.kind,
            "message": self.message,
        }));
        entry
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Collection of validation errors, at most one per path
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Add a validation error, replacing an earlier one for the same path
    pub fn add(&mut self, error: ValidationError) {
        if let Some(existing) = self.errors.iter_mut().find(|e| e.path == error.path) {
            *existing = error;
        } else {
            self.errors.push(error);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Error for one path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&ValidationError> {
        self.errors.iter().find(|e| e.path == path)
    }

    /// Convert to Result
    ///
    /// # Errors
    ///
    /// Returns `self` when at least one error was recorded.
    pub fn result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed with {} error(s):", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}
