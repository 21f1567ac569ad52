//! # Model Capability
//!
//! Controllers never talk to a database directly. They consume a [`Model`]: an async
//! capability that can find, count, insert, save, update and remove JSON documents, and
//! that describes itself through a [`Schema`].
//!
//! Any store can back a model. Implementations built on sea-orm report their native
//! [`DbErr`] through [`ModelError::Database`], which the translation chain understands
//! (unique violations become 422 responses, unknown failures become 500s).
//! [`MemoryModel`] is a complete in-process implementation used by the tests and demos.
//!
//! ## Implementing a model
//!
//! ```rust,ignore
//! use crudline::model::{Model, ModelError, Schema, DocumentStream};
//!
//! struct Vegetables { schema: Schema, db: DatabaseConnection }
//!
//! #[async_trait::async_trait]
//! impl Model for Vegetables {
//!     fn schema(&self) -> &Schema { &self.schema }
//!
//!     async fn find(&self, query: &Query) -> Result<DocumentStream, ModelError> {
//!         // translate query.conditions into a Condition, stream rows as JSON
//!     }
//!     // ...
//! }
//! ```

use async_trait::async_trait;
use futures::stream::BoxStream;
use sea_orm::DbErr;
use serde_json::{Map, Value};

use crate::query::Query;
use crate::validation::ValidationErrors;

pub mod matching;
pub mod memory;
pub mod schema;

pub use memory::MemoryModel;
pub use schema::{Discriminator, PathInfo, PathKind, Schema, SchemaBuilder};

/// A stored document
pub type Document = Value;

/// A query filter, e.g. `{"name": {"$in": ["Radish", "Kale"]}}`
pub type Conditions = Map<String, Value>;

/// Cursor over the documents matched by a query
pub type DocumentStream = BoxStream<'static, Result<Document, ModelError>>;

/// Failures reported by a model
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Backend failure, including duplicate keys and rejected hints
    #[error(transparent)]
    Database(#[from] DbErr),

    /// Schema validation rejected the document
    #[error("{0}")]
    Validation(ValidationErrors),

    /// The stored version no longer matches the one the write was based on
    #[error("No matching document found for id \"{id}\" version {version}")]
    VersionConflict { id: String, version: i64 },
}

/// Which constructor a document is built with.
///
/// Resolved once from the payload's discriminator tag; an unknown tag is rejected before a
/// model is ever asked to build anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentKind {
    Base,
    Variant(String),
}

impl DocumentKind {
    /// Resolve the kind of an incoming payload against the schema's discriminator.
    ///
    /// Returns `None` when the payload names a variant the schema does not know.
    #[must_use]
    pub fn resolve(schema: &Schema, payload: &Value) -> Option<Self> {
        let Some(discriminator) = schema.discriminator() else {
            return Some(Self::Base);
        };
        match payload.get(&discriminator.key) {
            None | Some(Value::Null) => Some(Self::Base),
            Some(Value::String(tag)) if tag == schema.singular() => Some(Self::Base),
            Some(Value::String(tag)) => discriminator
                .variants
                .iter()
                .any(|v| v == tag)
                .then(|| Self::Variant(tag.clone())),
            Some(_) => None,
        }
    }
}

/// The capability a controller needs from its backing store.
///
/// All methods are async and must not block other requests.
#[async_trait]
pub trait Model: Send + Sync {
    /// Resource metadata
    fn schema(&self) -> &Schema;

    /// Open a cursor over the documents matching `query`
    async fn find(&self, query: &Query) -> Result<DocumentStream, ModelError>;

    /// Number of documents matching `query`
    async fn count(&self, query: &Query) -> Result<u64, ModelError>;

    /// Distinct values of `path` among the documents matching `conditions`
    async fn distinct(&self, path: &str, conditions: &Conditions) -> Result<Vec<Value>, ModelError>;

    /// Validate and persist a new document, returning it as stored
    async fn insert(&self, kind: &DocumentKind, doc: Document) -> Result<Document, ModelError>;

    /// Validate and persist a modified document.
    ///
    /// When `expected_version` is set the store must reject the write with
    /// [`ModelError::VersionConflict`] unless the stored version still equals it.
    async fn save(&self, doc: Document, expected_version: Option<i64>) -> Result<Document, ModelError>;

    /// Apply an operator update such as `{"$push": {"tags": "x"}}` to every match,
    /// bypassing schema validation. Returns the number of documents modified.
    async fn update(&self, conditions: &Conditions, update: &Document) -> Result<u64, ModelError>;

    /// Remove one stored document, matched by its identity key. Returns whether a
    /// document was removed.
    async fn remove(&self, doc: &Document) -> Result<bool, ModelError>;
}
