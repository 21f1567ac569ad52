use serde_json::Value;

/// Declared type of a document path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    ObjectId,
    Number,
    String,
    Boolean,
    Date,
    Array,
    Object,
    Mixed,
}

impl PathKind {
    /// Name used in cast error messages
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Self::ObjectId => "ObjectId",
            Self::Number => "Number",
            Self::String => "String",
            Self::Boolean => "Boolean",
            Self::Date => "Date",
            Self::Array => "Array",
            Self::Object => "Object",
            Self::Mixed => "Mixed",
        }
    }

    /// Whether a JSON value can be stored under this kind
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (Self::Mixed, _) => true,
            (Self::ObjectId, Value::String(s)) => is_object_id(s),
            (Self::Number, Value::Number(_))
            | (Self::String, Value::String(_))
            | (Self::Boolean, Value::Bool(_))
            | (Self::Array, Value::Array(_))
            | (Self::Object, Value::Object(_)) => true,
            (Self::Date, Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
            (Self::Date, Value::Number(_)) => true,
            _ => false,
        }
    }

    /// Whether `id` is the lexical form of a value of this kind, as it appears in a URL.
    ///
    /// Only object-ids and numbers are constrained; anything else accepts any id.
    #[must_use]
    pub fn accepts_id(self, id: &str) -> bool {
        match self {
            Self::ObjectId => is_object_id(id),
            Self::Number => id.trim().parse::<f64>().is_ok_and(f64::is_finite),
            _ => true,
        }
    }
}

/// 24 hexadecimal characters
#[must_use]
pub fn is_object_id(s: &str) -> bool {
    s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Metadata for one document path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub kind: PathKind,
    pub unique: bool,
    pub required: bool,
    /// `false` hides the path from every response unless explicitly re-included
    pub selected: bool,
    /// Plural name of the resource this path references, for population
    pub reference: Option<String>,
}

impl PathInfo {
    #[must_use]
    pub fn new(kind: PathKind) -> Self {
        Self {
            kind,
            unique: false,
            required: false,
            selected: true,
            reference: None,
        }
    }

    #[must_use]
    pub fn string() -> Self {
        Self::new(PathKind::String)
    }

    #[must_use]
    pub fn number() -> Self {
        Self::new(PathKind::Number)
    }

    #[must_use]
    pub fn boolean() -> Self {
        Self::new(PathKind::Boolean)
    }

    #[must_use]
    pub fn date() -> Self {
        Self::new(PathKind::Date)
    }

    #[must_use]
    pub fn array() -> Self {
        Self::new(PathKind::Array)
    }

    #[must_use]
    pub fn object_id() -> Self {
        Self::new(PathKind::ObjectId)
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Hide this path from responses by default
    #[must_use]
    pub fn deselected(mut self) -> Self {
        self.selected = false;
        self
    }

    /// Mark this path as holding the id(s) of another resource
    #[must_use]
    pub fn reference(mut self, plural: impl Into<String>) -> Self {
        self.reference = Some(plural.into());
        self
    }
}

/// Discriminator key and the sub-model names it may carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discriminator {
    pub key: String,
    pub variants: Vec<String>,
}

/// Resource metadata exposed by a model
#[derive(Debug, Clone)]
pub struct Schema {
    singular: String,
    plural: String,
    id_key: String,
    paths: Vec<(String, PathInfo)>,
    discriminator: Option<Discriminator>,
    locking: bool,
    version_key: String,
    last_modified: Option<String>,
}

impl Schema {
    pub fn builder(singular: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(singular)
    }

    #[must_use]
    pub fn singular(&self) -> &str {
        &self.singular
    }

    #[must_use]
    pub fn plural(&self) -> &str {
        &self.plural
    }

    /// Identity key, `_id` unless configured otherwise
    #[must_use]
    pub fn id_key(&self) -> &str {
        &self.id_key
    }

    #[must_use]
    pub fn path(&self, name: &str) -> Option<&PathInfo> {
        self.paths.iter().find(|(n, _)| n == name).map(|(_, info)| info)
    }

    pub fn paths(&self) -> impl Iterator<Item = (&str, &PathInfo)> {
        self.paths.iter().map(|(n, info)| (n.as_str(), info))
    }

    /// Whether `path` is the identity key or declared unique
    #[must_use]
    pub fn is_unique(&self, path: &str) -> bool {
        path == self.id_key || self.path(path).is_some_and(|p| p.unique)
    }

    /// Paths with `selected: false`
    #[must_use]
    pub fn deselected(&self) -> Vec<String> {
        self.paths
            .iter()
            .filter(|(_, info)| !info.selected)
            .map(|(n, _)| n.clone())
            .collect()
    }

    #[must_use]
    pub fn discriminator(&self) -> Option<&Discriminator> {
        self.discriminator.as_ref()
    }

    /// Whether writes use optimistic locking on the version key
    #[must_use]
    pub fn locking(&self) -> bool {
        self.locking
    }

    #[must_use]
    pub fn version_key(&self) -> &str {
        &self.version_key
    }

    /// Path holding each document's modification time, if any
    #[must_use]
    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }
}

/// Builder for [`Schema`]
///
/// # Example
/// ```rust,ignore
/// let schema = Schema::builder("vegetable")
///     .path("name", PathInfo::string().required().unique())
///     .path("secret", PathInfo::string().deselected())
///     .last_modified("lastModified")
///     .locking(true)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    fn new(singular: impl Into<String>) -> Self {
        let singular = singular.into();
        let plural = pluralize(&singular);
        Self {
            schema: Schema {
                singular,
                plural,
                id_key: "_id".to_string(),
                paths: vec![("_id".to_string(), PathInfo::object_id().unique())],
                discriminator: None,
                locking: false,
                version_key: "__v".to_string(),
                last_modified: None,
            },
        }
    }

    #[must_use]
    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.schema.plural = plural.into();
        self
    }

    /// Replace the identity path
    #[must_use]
    pub fn id(mut self, key: impl Into<String>, kind: PathKind) -> Self {
        let key = key.into();
        let old = std::mem::replace(&mut self.schema.id_key, key.clone());
        self.schema.paths.retain(|(n, _)| *n != old);
        self.schema.paths.insert(0, (key, PathInfo::new(kind).unique()));
        self
    }

    /// Declare (or redeclare) a path
    #[must_use]
    pub fn path(mut self, name: impl Into<String>, info: PathInfo) -> Self {
        let name = name.into();
        if let Some(slot) = self.schema.paths.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = info;
        } else {
            self.schema.paths.push((name, info));
        }
        self
    }

    #[must_use]
    pub fn discriminator<I, S>(mut self, key: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema.discriminator = Some(Discriminator {
            key: key.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        });
        self
    }

    #[must_use]
    pub fn locking(mut self, enabled: bool) -> Self {
        self.schema.locking = enabled;
        self
    }

    #[must_use]
    pub fn version_key(mut self, key: impl Into<String>) -> Self {
        self.schema.version_key = key.into();
        self
    }

    #[must_use]
    pub fn last_modified(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if self.schema.path(&path).is_none() {
            self.schema.paths.push((path.clone(), PathInfo::date()));
        }
        self.schema.last_modified = Some(path);
        self
    }

    #[must_use]
    pub fn build(mut self) -> Schema {
        let version_key = self.schema.version_key.clone();
        if self.schema.path(&version_key).is_none() {
            self.schema.paths.push((version_key, PathInfo::number()));
        }
        self.schema
    }
}

/// English plural for a resource name
fn pluralize(singular: &str) -> String {
    let lower = singular.to_ascii_lowercase();
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{singular}es")
    } else if let Some(stem) = singular.strip_suffix('y')
        && !stem.ends_with(['a', 'e', 'i', 'o', 'u'])
    {
        format!("{stem}ies")
    } else {
        format!("{singular}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("vegetable"), "vegetables");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("berry"), "berries");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("bus"), "buses");
    }

    #[test]
    fn test_object_id_lexical_form() {
        assert!(PathKind::ObjectId.accepts_id("507f1f77bcf86cd799439011"));
        assert!(!PathKind::ObjectId.accepts_id("507f1f77bcf86cd79943901"));
        assert!(!PathKind::ObjectId.accepts_id("507f1f77bcf86cd79943901z"));
    }

    #[test]
    fn test_numeric_lexical_form() {
        assert!(PathKind::Number.accepts_id("42"));
        assert!(PathKind::Number.accepts_id("-4.5"));
        assert!(!PathKind::Number.accepts_id("forty-two"));
        assert!(!PathKind::Number.accepts_id("inf"));
        assert!(PathKind::String.accepts_id("anything goes"));
    }

    #[test]
    fn test_accepts_values() {
        assert!(PathKind::Number.accepts(&json!(3)));
        assert!(!PathKind::Number.accepts(&json!("3")));
        assert!(PathKind::Date.accepts(&json!("2024-01-01T00:00:00Z")));
        assert!(!PathKind::Date.accepts(&json!("yesterday")));
        assert!(PathKind::String.accepts(&Value::Null));
    }

    #[test]
    fn test_builder_defaults() {
        let schema = Schema::builder("vegetable")
            .path("name", PathInfo::string().unique())
            .path("secret", PathInfo::string().deselected())
            .build();
        assert_eq!(schema.plural(), "vegetables");
        assert_eq!(schema.id_key(), "_id");
        assert!(schema.is_unique("_id"));
        assert!(schema.is_unique("name"));
        assert!(!schema.is_unique("secret"));
        assert_eq!(schema.deselected(), vec!["secret".to_string()]);
        assert!(schema.path("__v").is_some());
    }

    #[test]
    fn test_custom_id() {
        let schema = Schema::builder("sensor").id("serial", PathKind::Number).build();
        assert_eq!(schema.id_key(), "serial");
        assert!(schema.path("_id").is_none());
        assert_eq!(schema.path("serial").unwrap().kind, PathKind::Number);
    }
}
