use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

/// Query-string parameters recognised by every generated endpoint.
///
/// All values arrive as raw strings; each is validated by the read-refinement stage that
/// consumes it so that failures carry a precise message.
///
/// # Filtering
/// `conditions` is a JSON-encoded filter object:
/// ```json
/// {"name": {"$in": ["Radish", "Kale"]}}
/// ```
///
/// # Projection and ordering
/// `select` and `sort` take space-separated path lists, `-path` meaning exclusion or
/// descending order respectively.
///
/// # Pagination
/// `skip` (non-negative) and `limit` (positive) integers.
#[derive(Debug, Clone, Deserialize, IntoParams, ToSchema, Default)]
#[into_params(parameter_in = Query)]
pub struct QueryOptions {
    /// JSON-encoded filter.
    ///
    /// Example: `{"color": "green"}`
    #[param(example = json!({"color": "green"}))]
    pub conditions: Option<String>,
    /// Paths to include (`name`) or exclude (`-name`).
    #[param(example = "name color")]
    pub select: Option<String>,
    /// Sort order, e.g. `-lastModified name`.
    #[param(example = "-lastModified name")]
    pub sort: Option<String>,
    /// Path name, `{"path": ..., "select": ...}` object, or an array of either.
    #[param(example = "farmer")]
    pub populate: Option<String>,
    /// Number of documents to skip.
    #[param(example = "0")]
    pub skip: Option<String>,
    /// Maximum number of documents to return.
    #[param(example = "10")]
    pub limit: Option<String>,
    /// `true` to return the number of matches instead of documents.
    #[param(example = "true")]
    pub count: Option<String>,
    /// Path whose distinct values should be returned.
    #[param(example = "color")]
    pub distinct: Option<String>,
    /// JSON index hint, e.g. `{"name": 1}`.
    #[param(example = json!({"name": 1}))]
    pub hint: Option<String>,
    /// Free-form comment attached to the query.
    #[param(example = "dashboard")]
    pub comment: Option<String>,
}
