use serde::Deserialize;
use serde_json::Value;

use crate::errors::ApiError;

/// One path to populate with referenced documents
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Populate {
    pub path: String,
    /// Projection for the populated documents
    #[serde(default)]
    pub select: Option<String>,
}

impl Populate {
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            select: None,
        }
    }

    /// Parse the `populate` query parameter.
    ///
    /// Accepted forms: a space-separated list of paths, a JSON object
    /// `{"path": ..., "select": ...}`, or a JSON array mixing path strings and objects.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for malformed JSON or entries without a path.
    pub fn parse(param: &str) -> Result<Vec<Self>, ApiError> {
        let trimmed = param.trim();
        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return Ok(trimmed.split_whitespace().map(Self::path).collect());
        }

        let parsed: Value = serde_json::from_str(trimmed)
            .map_err(|e| ApiError::bad_request(format!("The populate parameter is not valid JSON ({e})")))?;
        let items = match parsed {
            Value::Array(items) => items,
            other => vec![other],
        };
        items.into_iter().map(Self::from_value).collect()
    }

    fn from_value(value: Value) -> Result<Self, ApiError> {
        match value {
            Value::String(path) if !path.is_empty() => Ok(Self::path(path)),
            Value::Object(_) => serde_json::from_value::<Self>(value)
                .map_err(|e| ApiError::bad_request(format!("Invalid populate entry ({e})"))),
            _ => Err(ApiError::bad_request("Each populate entry needs a path")),
        }
    }
}
