//! In-process model backed by a vector of JSON documents.
//!
//! `MemoryModel` implements the full [`Model`] capability so a controller can be served
//! without a database: validation against the [`Schema`], unique indexes, optimistic
//! versioning, the operator updates, hints, explain output and population of referenced
//! resources. Its failures mimic a document store's (duplicate keys and rejected hints
//! are reported as database error text), so the same translation rules apply to it as to
//! a real backend.
//!
//! # Example
//! ```rust,ignore
//! let vegetables = Arc::new(
//!     MemoryModel::new(
//!         Schema::builder("vegetable")
//!             .path("name", PathInfo::string().required().unique())
//!             .build(),
//!     )
//!     .with_index(["color", "name"]),
//! );
//! vegetables.seed([json!({"name": "Kale"}), json!({"name": "Radish"})])?;
//! ```

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use sea_orm::sea_query::Order;
use sea_orm::{DbErr, RuntimeErr};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use uuid::Uuid;

use super::matching::{cmp_values, get_path, matches, remove_path, set_path, values_equal};
use super::{Conditions, Document, DocumentKind, DocumentStream, Model, ModelError, PathKind, Schema};
use crate::query::{Populate, Projection, Query};
use crate::validation::{ValidationError, ValidationErrors};

const DATABASE: &str = "crudline";

/// In-memory implementation of [`Model`]
pub struct MemoryModel {
    schema: Schema,
    documents: RwLock<Vec<Document>>,
    indexes: Vec<Vec<String>>,
    references: Vec<(String, Arc<MemoryModel>)>,
}

impl MemoryModel {
    /// Create an empty collection. The identity key and every unique path get an index.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        let indexes = schema
            .paths()
            .filter(|(name, info)| info.unique || *name == schema.id_key())
            .map(|(name, _)| vec![name.to_string()])
            .collect();
        Self {
            schema,
            documents: RwLock::new(Vec::new()),
            indexes,
            references: Vec::new(),
        }
    }

    /// Declare a compound index usable as a query hint
    #[must_use]
    pub fn with_index<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes.push(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Resolve `path` against `model` when a query populates it
    #[must_use]
    pub fn with_reference(mut self, path: impl Into<String>, model: Arc<MemoryModel>) -> Self {
        self.references.push((path.into(), model));
        self
    }

    /// Insert documents through the normal validation path
    ///
    /// # Errors
    ///
    /// Fails on the first document that does not validate or collides with a unique key.
    pub fn seed<I>(&self, docs: I) -> Result<Vec<Document>, ModelError>
    where
        I: IntoIterator<Item = Value>,
    {
        docs.into_iter()
            .map(|doc| self.insert_document(&DocumentKind::Base, doc))
            .collect()
    }

    /// Snapshot of every stored document, unprojected
    #[must_use]
    pub fn documents(&self) -> Vec<Document> {
        self.documents.read().to_vec()
    }

    // ============================================================================
    // Writes
    // ============================================================================

    fn next_id(&self, stored: &[Document]) -> Value {
        let id_key = self.schema.id_key();
        match self.schema.path(id_key).map(|p| p.kind) {
            Some(PathKind::Number) => {
                let max = stored
                    .iter()
                    .filter_map(|d| d.get(id_key).and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0);
                json!(max + 1)
            }
            _ => {
                let hex = Uuid::new_v4().simple().to_string();
                Value::String(hex[..24].to_string())
            }
        }
    }

    fn insert_document(&self, kind: &DocumentKind, doc: Document) -> Result<Document, ModelError> {
        let Value::Object(mut fields) = doc else {
            return Err(not_an_object(&self.schema));
        };
        let mut documents = self.documents.write();
        let id_key = self.schema.id_key().to_string();
        if !fields.contains_key(&id_key) {
            fields.insert(id_key, self.next_id(&documents));
        }
        if let (DocumentKind::Variant(tag), Some(discriminator)) = (kind, self.schema.discriminator()) {
            fields.insert(discriminator.key.clone(), Value::String(tag.clone()));
        }
        fields.insert(self.schema.version_key().to_string(), json!(0));

        let doc = Value::Object(fields);
        self.validate(&doc)?;
        self.check_unique(&doc, &documents, None)?;
        documents.push(doc.clone());
        Ok(doc)
    }

    fn validate(&self, doc: &Document) -> Result<(), ModelError> {
        let mut errors = ValidationErrors::new();
        for (path, info) in self.schema.paths() {
            match get_path(doc, path) {
                None | Some(Value::Null) if info.required => errors.add(ValidationError::required(path)),
                Some(value) if !info.kind.accepts(value) => {
                    errors.add(ValidationError::cast(path, info.kind.type_name(), value.clone()));
                }
                _ => {}
            }
        }
        errors.result().map_err(ModelError::Validation)
    }

    fn check_unique(&self, doc: &Document, stored: &[Document], skip: Option<usize>) -> Result<(), ModelError> {
        let unique_paths = self.schema.paths().filter(|(name, info)| info.unique || *name == self.schema.id_key());
        for (path, _) in unique_paths {
            let Some(value) = get_path(doc, path).filter(|v| !v.is_null()) else {
                continue;
            };
            let taken = stored
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != skip)
                .any(|(_, other)| get_path(other, path).is_some_and(|v| values_equal(v, value)));
            if taken {
                return Err(duplicate_key(self.schema.plural(), path, value));
            }
        }
        Ok(())
    }

    fn position(&self, stored: &[Document], doc: &Document) -> Option<usize> {
        let id_key = self.schema.id_key();
        let id = doc.get(id_key)?;
        stored
            .iter()
            .position(|d| d.get(id_key).is_some_and(|v| values_equal(v, id)))
    }

    // ============================================================================
    // Reads
    // ============================================================================

    fn check_hint(&self, query: &Query) -> Result<(), ModelError> {
        let Some(hint) = &query.hint else {
            return Ok(());
        };
        let keys: Vec<&String> = hint.keys().collect();
        let known = self
            .indexes
            .iter()
            .any(|index| index.len() == keys.len() && index.iter().zip(&keys).all(|(a, b)| a == *b));
        if known {
            Ok(())
        } else {
            Err(ModelError::Database(DbErr::Query(RuntimeErr::Internal(
                "planner returned error: bad hint".to_string(),
            ))))
        }
    }

    fn select_matching(&self, conditions: &Conditions) -> Result<Vec<Document>, ModelError> {
        let documents = self.documents.read();
        let mut matched = Vec::new();
        for doc in documents.iter() {
            if matches(doc, conditions)? {
                matched.push(doc.clone());
            }
        }
        Ok(matched)
    }

    fn populate(&self, doc: &mut Document, populate: &Populate) {
        let Some((_, model)) = self.references.iter().find(|(path, _)| *path == populate.path) else {
            tracing::debug!(path = %populate.path, "No reference declared for populated path");
            return;
        };
        let projection = populate.select.as_deref().map(Projection::parse).unwrap_or_default();
        let hidden = model.schema.deselected();
        let id_key = model.schema.id_key();
        let resolve = |id: &Value| -> Value {
            model
                .documents
                .read()
                .iter()
                .find(|d| d.get(id_key).is_some_and(|v| values_equal(v, id)))
                .map_or(Value::Null, |d| projection.apply(d, id_key, &hidden))
        };
        let replacement = match get_path(doc, &populate.path) {
            Some(Value::Array(ids)) => Value::Array(ids.iter().map(resolve).collect()),
            Some(id) => resolve(id),
            None => return,
        };
        set_path(doc, &populate.path, replacement);
    }

    fn explain(&self, query: &Query, matched: usize, examined: usize) -> Document {
        json!({
            "queryPlanner": {
                "namespace": format!("{DATABASE}.{}", self.schema.plural()),
                "parsedQuery": query.conditions,
                "indexUsed": query.hint,
            },
            "executionStats": {
                "nReturned": matched,
                "totalDocsExamined": examined,
            }
        })
    }
}

fn not_an_object(schema: &Schema) -> ModelError {
    let mut errors = ValidationErrors::new();
    errors.add(ValidationError::new(
        schema.singular(),
        "cast",
        format!("A {} must be a JSON object", schema.singular()),
    ));
    ModelError::Validation(errors)
}

fn duplicate_key(collection: &str, path: &str, value: &Value) -> ModelError {
    ModelError::Database(DbErr::Exec(RuntimeErr::Internal(format!(
        "E11000 duplicate key error collection: {DATABASE}.{collection} index: {path}_1 dup key: {{ {path}: {value} }}"
    ))))
}

fn operator_error(message: String) -> ModelError {
    ModelError::Database(DbErr::Custom(message))
}

fn array_at<'a>(doc: &'a mut Document, path: &str, operator: &str) -> Result<&'a mut Vec<Value>, ModelError> {
    if get_path(doc, path).is_none() {
        set_path(doc, path, Value::Array(Vec::new()));
    }
    let mut current = doc;
    for segment in path.split('.') {
        current = current
            .as_object_mut()
            .and_then(|map| map.get_mut(segment))
            .ok_or_else(|| operator_error(format!("Cannot apply {operator} to path `{path}`")))?;
    }
    current
        .as_array_mut()
        .ok_or_else(|| operator_error(format!("Cannot apply {operator} to a non-array field `{path}`")))
}

/// `{"$each": [...]}` expands to its members, anything else is a single value
fn each(value: &Value) -> Vec<Value> {
    match value.get("$each") {
        Some(Value::Array(items)) => items.clone(),
        _ => vec![value.clone()],
    }
}

fn apply_operator(doc: &mut Document, operator: &str, fields: &Map<String, Value>) -> Result<(), ModelError> {
    for (path, value) in fields {
        match operator {
            "$set" => set_path(doc, path, value.clone()),
            "$unset" => {
                remove_path(doc, path);
            }
            "$inc" => {
                let current = get_path(doc, path).and_then(Value::as_f64).unwrap_or(0.0);
                let by = value
                    .as_f64()
                    .ok_or_else(|| operator_error(format!("Cannot increment `{path}` by a non-number")))?;
                let next = current + by;
                #[allow(clippy::cast_possible_truncation)]
                let next = if next.fract() == 0.0 && next.abs() < 9.0e15 {
                    json!(next as i64)
                } else {
                    json!(next)
                };
                set_path(doc, path, next);
            }
            "$push" => array_at(doc, path, operator)?.extend(each(value)),
            "$pushAll" => {
                let items = value
                    .as_array()
                    .ok_or_else(|| operator_error(format!("$pushAll requires an array for `{path}`")))?;
                array_at(doc, path, operator)?.extend(items.iter().cloned());
            }
            "$addToSet" => {
                let array = array_at(doc, path, operator)?;
                for item in each(value) {
                    if !array.iter().any(|existing| values_equal(existing, &item)) {
                        array.push(item);
                    }
                }
            }
            "$pull" => {
                let array = array_at(doc, path, operator)?;
                match value {
                    Value::Object(conditions) => {
                        let mut kept = Vec::with_capacity(array.len());
                        for item in array.drain(..) {
                            if !matches(&item, conditions)? {
                                kept.push(item);
                            }
                        }
                        *array = kept;
                    }
                    _ => array.retain(|item| !values_equal(item, value)),
                }
            }
            "$pullAll" => {
                let items = value
                    .as_array()
                    .ok_or_else(|| operator_error(format!("$pullAll requires an array for `{path}`")))?;
                array_at(doc, path, operator)?.retain(|item| !items.iter().any(|v| values_equal(item, v)));
            }
            "$pop" => {
                let array = array_at(doc, path, operator)?;
                if value.as_i64() == Some(-1) {
                    if !array.is_empty() {
                        array.remove(0);
                    }
                } else {
                    array.pop();
                }
            }
            other => return Err(operator_error(format!("Unsupported update operator {other}"))),
        }
    }
    Ok(())
}

#[async_trait]
impl Model for MemoryModel {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn find(&self, query: &Query) -> Result<DocumentStream, ModelError> {
        self.check_hint(query)?;
        if let Some(comment) = &query.comment {
            tracing::trace!(collection = %self.schema.plural(), %comment, "Query comment");
        }

        let examined = self.documents.read().len();
        let mut matched = self.select_matching(&query.conditions)?;
        for (path, order) in query.sort.keys().iter().rev() {
            matched.sort_by(|a, b| {
                let ordering = cmp_values(
                    get_path(a, path).unwrap_or(&Value::Null),
                    get_path(b, path).unwrap_or(&Value::Null),
                );
                if matches!(order, Order::Desc) {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let skip = usize::try_from(query.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let page: Vec<Document> = matched.into_iter().skip(skip).take(limit).collect();

        if query.explain {
            let plan = self.explain(query, page.len(), examined);
            return Ok(futures::stream::iter(vec![Ok(plan)]).boxed());
        }

        let hidden = self.schema.deselected();
        let id_key = self.schema.id_key();
        let docs: Vec<Result<Document, ModelError>> = page
            .iter()
            .map(|doc| {
                let mut projected = query.select.apply(doc, id_key, &hidden);
                for populate in &query.populate {
                    self.populate(&mut projected, populate);
                }
                Ok(projected)
            })
            .collect();
        Ok(futures::stream::iter(docs).boxed())
    }

    async fn count(&self, query: &Query) -> Result<u64, ModelError> {
        self.check_hint(query)?;
        let matched = self.select_matching(&query.conditions)?;
        Ok(matched.len() as u64)
    }

    async fn distinct(&self, path: &str, conditions: &Conditions) -> Result<Vec<Value>, ModelError> {
        let mut values: Vec<Value> = Vec::new();
        for doc in self.select_matching(conditions)? {
            let candidates = match get_path(&doc, path) {
                Some(Value::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };
            for candidate in candidates {
                if !values.iter().any(|v| values_equal(v, &candidate)) {
                    values.push(candidate);
                }
            }
        }
        Ok(values)
    }

    async fn insert(&self, kind: &DocumentKind, doc: Document) -> Result<Document, ModelError> {
        self.insert_document(kind, doc)
    }

    async fn save(&self, doc: Document, expected_version: Option<i64>) -> Result<Document, ModelError> {
        if !doc.is_object() {
            return Err(not_an_object(&self.schema));
        }
        let mut documents = self.documents.write();
        let version_key = self.schema.version_key();
        let id = doc
            .get(self.schema.id_key())
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .unwrap_or_default();

        let Some(index) = self.position(&documents, &doc) else {
            return Err(match expected_version {
                Some(version) => ModelError::VersionConflict { id, version },
                None => ModelError::Database(DbErr::RecordNotFound(format!(
                    "{} {id} not found",
                    self.schema.singular()
                ))),
            });
        };
        if let Some(version) = expected_version {
            let stored = documents[index].get(version_key).and_then(Value::as_i64);
            if stored != Some(version) {
                return Err(ModelError::VersionConflict { id, version });
            }
        }

        self.validate(&doc)?;
        self.check_unique(&doc, &documents, Some(index))?;
        documents[index] = doc.clone();
        Ok(doc)
    }

    async fn update(&self, conditions: &Conditions, update: &Document) -> Result<u64, ModelError> {
        let operators = update
            .as_object()
            .ok_or_else(|| operator_error("An update must be an object of operators".to_string()))?;
        let mut documents = self.documents.write();

        let mut changed: Vec<(usize, Document)> = Vec::new();
        for (index, doc) in documents.iter().enumerate() {
            if !matches(doc, conditions)? {
                continue;
            }
            let mut next = doc.clone();
            for (operator, fields) in operators {
                let fields = fields
                    .as_object()
                    .ok_or_else(|| operator_error(format!("{operator} needs an object of paths")))?;
                apply_operator(&mut next, operator, fields)?;
            }
            changed.push((index, next));
        }

        let mut staged = documents.to_vec();
        for (index, next) in &changed {
            staged[*index] = next.clone();
        }
        for (index, next) in &changed {
            self.check_unique(next, &staged, Some(*index))?;
        }
        *documents = staged;
        Ok(changed.len() as u64)
    }

    async fn remove(&self, doc: &Document) -> Result<bool, ModelError> {
        let mut documents = self.documents.write();
        let Some(index) = self.position(&documents, doc) else {
            return Ok(false);
        };
        documents.remove(index);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PathInfo;
    use crate::query::Sort;

    fn vegetables() -> MemoryModel {
        MemoryModel::new(
            Schema::builder("vegetable")
                .path("name", PathInfo::string().required().unique())
                .path("calories", PathInfo::number())
                .path("tags", PathInfo::array())
                .path("secret", PathInfo::string().deselected())
                .locking(true)
                .build(),
        )
        .with_index(["calories", "name"])
    }

    fn conditions(value: Value) -> Conditions {
        value.as_object().cloned().unwrap()
    }

    async fn collect(model: &MemoryModel, query: &Query) -> Vec<Document> {
        model
            .find(query)
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_insert_assigns_identity_and_version() {
        let model = vegetables();
        let doc = model.insert(&DocumentKind::Base, json!({"name": "Kale"})).await.unwrap();
        let id = doc["_id"].as_str().unwrap();
        assert_eq!(id.len(), 24);
        assert_eq!(doc["__v"], json!(0));
    }

    #[tokio::test]
    async fn test_insert_validates() {
        let model = vegetables();
        let err = model
            .insert(&DocumentKind::Base, json!({"calories": "many"}))
            .await
            .unwrap_err();
        let ModelError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert_eq!(errors.get("name").unwrap().kind, "required");
        assert_eq!(errors.get("calories").unwrap().kind, "cast");
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates() {
        let model = vegetables();
        model.seed([json!({"name": "Kale"})]).unwrap();
        let err = model.insert(&DocumentKind::Base, json!({"name": "Kale"})).await.unwrap_err();
        assert!(err.to_string().contains("E11000 duplicate key error"));
        assert!(err.to_string().contains("name_1"));
    }

    #[tokio::test]
    async fn test_find_sorts_pages_and_hides_deselected() {
        let model = vegetables();
        model
            .seed([
                json!({"name": "Kale", "calories": 49, "secret": "x"}),
                json!({"name": "Leek", "calories": 61}),
                json!({"name": "Radish", "calories": 16}),
            ])
            .unwrap();
        let query = Query {
            sort: Sort::parse("-calories").unwrap(),
            skip: Some(1),
            limit: Some(1),
            ..Query::default()
        };
        let docs = collect(&model, &query).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["name"], "Kale");
        assert!(docs[0].get("secret").is_none());
    }

    #[tokio::test]
    async fn test_hint_must_name_an_index() {
        let model = vegetables();
        let good = Query {
            hint: Some(conditions(json!({"calories": 1, "name": 1}))),
            ..Query::default()
        };
        assert!(model.find(&good).await.is_ok());

        let bad = Query {
            hint: Some(conditions(json!({"color": 1}))),
            ..Query::default()
        };
        let Err(err) = model.find(&bad).await else {
            panic!("expected bad hint");
        };
        assert!(err.to_string().contains("bad hint"));
    }

    #[tokio::test]
    async fn test_save_checks_version() {
        let model = vegetables();
        let mut doc = model.seed([json!({"name": "Kale"})]).unwrap().remove(0);
        doc["__v"] = json!(1);
        let saved = model.save(doc.clone(), Some(0)).await.unwrap();
        assert_eq!(saved["__v"], json!(1));

        let err = model.save(doc, Some(0)).await.unwrap_err();
        assert!(matches!(err, ModelError::VersionConflict { version: 0, .. }));
    }

    #[tokio::test]
    async fn test_update_operators() {
        let model = vegetables();
        model.seed([json!({"name": "Kale", "tags": ["green"]})]).unwrap();
        let target = conditions(json!({"name": "Kale"}));

        let n = model
            .update(&target, &json!({"$push": {"tags": "leafy"}}))
            .await
            .unwrap();
        assert_eq!(n, 1);
        model
            .update(&target, &json!({"$addToSet": {"tags": {"$each": ["green", "raw"]}}}))
            .await
            .unwrap();
        model.update(&target, &json!({"$pull": {"tags": "green"}})).await.unwrap();
        model.update(&target, &json!({"$pop": {"tags": -1}})).await.unwrap();

        let stored = model.documents().remove(0);
        assert_eq!(stored["tags"], json!(["raw"]));
    }

    #[tokio::test]
    async fn test_update_rejects_non_array_push() {
        let model = vegetables();
        model.seed([json!({"name": "Kale"})]).unwrap();
        let err = model
            .update(&conditions(json!({})), &json!({"$push": {"name": "x"}}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-array"));
    }

    #[tokio::test]
    async fn test_distinct_flattens_arrays() {
        let model = vegetables();
        model
            .seed([
                json!({"name": "Kale", "tags": ["green", "leafy"]}),
                json!({"name": "Leek", "tags": ["green"]}),
            ])
            .unwrap();
        let values = model.distinct("tags", &Conditions::new()).await.unwrap();
        assert_eq!(values, vec![json!("green"), json!("leafy")]);
    }

    #[tokio::test]
    async fn test_populate_reference() {
        let farmers = Arc::new(MemoryModel::new(
            Schema::builder("farmer").path("name", PathInfo::string()).build(),
        ));
        let farmer = farmers.seed([json!({"name": "Ann"})]).unwrap().remove(0);
        let model = MemoryModel::new(
            Schema::builder("vegetable")
                .path("farmer", PathInfo::object_id().reference("farmers"))
                .build(),
        )
        .with_reference("farmer", Arc::clone(&farmers));
        model.seed([json!({"farmer": farmer["_id"]})]).unwrap();

        let query = Query {
            populate: vec![Populate::path("farmer")],
            ..Query::default()
        };
        let docs = collect(&model, &query).await;
        assert_eq!(docs[0]["farmer"]["name"], "Ann");
    }

    #[tokio::test]
    async fn test_explain() {
        let model = vegetables();
        model.seed([json!({"name": "Kale"})]).unwrap();
        let query = Query {
            explain: true,
            ..Query::default()
        };
        let docs = collect(&model, &query).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["executionStats"]["nReturned"], json!(1));
    }

    #[tokio::test]
    async fn test_remove_reports_whether_a_document_was_removed() {
        let model = vegetables();
        let kale = model.seed([json!({"name": "Kale"})]).unwrap().remove(0);

        assert!(!model.remove(&json!({"name": "Kale"})).await.unwrap());
        assert_eq!(model.documents().len(), 1);

        assert!(model.remove(&kale).await.unwrap());
        assert!(!model.remove(&kale).await.unwrap());
        assert!(model.documents().is_empty());
    }
}
