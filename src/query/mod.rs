//! # Query Handle
//!
//! [`Query`] is the backend-neutral description of a read: the conditions plus every
//! refinement a request may apply (projection, ordering, population, pagination, hints,
//! comments, explain mode). Controllers build it during the query stage; models execute
//! it.
//!
//! ## Query-string parameters
//!
//! ```text
//! GET /vegetables?conditions={"color":"green"}&select=name&sort=-lastModified&limit=10
//! GET /vegetables?populate=[{"path":"farmer"}]&skip=20
//! GET /vegetables?count=true
//! GET /vegetables?distinct=color
//! GET /vegetables?hint={"name":1}&comment=dashboard
//! ```

use serde_json::{Map, Value};

use crate::model::Conditions;

pub mod options;
pub mod populate;
pub mod select;
pub mod sort;

pub use options::QueryOptions;
pub use populate::Populate;
pub use select::{Inclusion, Projection};
pub use sort::Sort;

/// A database read under construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub conditions: Conditions,
    pub select: Projection,
    pub sort: Sort,
    pub populate: Vec<Populate>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub hint: Option<Map<String, Value>>,
    pub comment: Option<String>,
    pub explain: bool,
}

impl Query {
    #[must_use]
    pub fn new(conditions: Conditions) -> Self {
        Self {
            conditions,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn select(mut self, projection: &Projection) -> Self {
        self.select.merge(projection);
        self
    }

    #[must_use]
    pub fn sort(mut self, sort: &Sort) -> Self {
        self.sort.merge(sort);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_layers_refinements() {
        let conditions = json!({"color": "green"}).as_object().cloned().unwrap();
        let query = Query::new(conditions.clone())
            .select(&Projection::parse("-secret"))
            .select(&Projection::parse("name"))
            .sort(&Sort::parse("name").unwrap())
            .limit(5);
        assert_eq!(query.conditions, conditions);
        assert_eq!(query.select.fields().count(), 2);
        assert_eq!(query.sort.keys().len(), 1);
        assert_eq!(query.limit, Some(5));
        assert!(!query.explain);
    }
}
