use sea_orm::sea_query::Order;
use serde_json::Value;

use crate::errors::ApiError;

/// Ordered list of sort keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sort {
    keys: Vec<(String, Order)>,
}

/// Convert a sort direction token to `Order`
fn parse_order(token: &Value) -> Option<Order> {
    match token {
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(Order::Asc),
            Some(-1) => Some(Order::Desc),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" | "1" => Some(Order::Asc),
            "desc" | "descending" | "-1" => Some(Order::Desc),
            _ => None,
        },
        _ => None,
    }
}

impl Sort {
    /// Parse a sort spec.
    ///
    /// Accepts the space-separated form (`-lastModified name`) and the JSON object form
    /// (`{"lastModified": -1, "name": "asc"}`).
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for malformed JSON or unknown directions.
    pub fn parse(spec: &str) -> Result<Self, ApiError> {
        let trimmed = spec.trim();
        let mut sort = Self::default();
        if trimmed.starts_with('{') {
            let parsed: serde_json::Map<String, Value> = serde_json::from_str(trimmed)
                .map_err(|e| ApiError::bad_request(format!("The sort parameter is not valid JSON ({e})")))?;
            for (path, direction) in &parsed {
                let order = parse_order(direction).ok_or_else(|| {
                    ApiError::bad_request(format!("Invalid sort direction for \"{path}\""))
                })?;
                sort.set(path, order);
            }
        } else {
            for token in trimmed.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty()) {
                match token.strip_prefix('-') {
                    Some(path) if !path.is_empty() => sort.set(path, Order::Desc),
                    Some(_) => return Err(ApiError::bad_request("Invalid sort parameter")),
                    None => sort.set(token.trim_start_matches('+'), Order::Asc),
                }
            }
        }
        Ok(sort)
    }

    fn set(&mut self, path: &str, order: Order) {
        if let Some(slot) = self.keys.iter_mut().find(|(p, _)| p == path) {
            slot.1 = order;
        } else {
            self.keys.push((path.to_string(), order));
        }
    }

    /// Layer `other` on top: keys already present change direction in place, new keys
    /// are appended.
    pub fn merge(&mut self, other: &Self) {
        for (path, order) in &other.keys {
            self.set(path, order.clone());
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> &[(String, Order)] {
        &self.keys
    }
}
