use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use semver::Version;
use serde_json::Value;
use std::sync::Arc;

use super::Controller;
use crate::api::ApiOptions;
use crate::formatters::{Negotiated, Registry};
use crate::model::{Conditions, Document};
use crate::pipeline::Pipeline;
use crate::query::{Query, QueryOptions};
use crate::routing::{Endpoint, Verb};

/// A request body already decoded by an upstream layer.
///
/// Insert it into the request extensions and the controller uses it instead of parsing
/// the raw body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody(pub Value);

/// Per-request state threaded through every stage of a controller.
///
/// Created fresh for each request and dropped with the response. Middleware reads and
/// writes it freely; later stages see what earlier ones left behind.
pub struct RequestContext {
    pub method: Method,
    pub verb: Verb,
    pub endpoint: Endpoint,
    /// Raw `:id` path segment for instance requests
    pub id: Option<String>,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub params: QueryOptions,
    pub body: Bytes,
    pub parsed_body: Option<Value>,

    /// Filter for the documents this request targets
    pub conditions: Conditions,
    /// Read under construction, set in the query stage
    pub query: Option<Query>,
    /// Replaces the query result when set
    pub documents: Option<Vec<Document>>,
    pub incoming: Pipeline,
    pub outgoing: Pipeline,
    /// Reply with a bare count instead of documents
    pub count: bool,
    /// Execute the query in explain mode
    pub explain: bool,
    /// Permit `select` inside `populate`; off unless middleware opts in
    pub allow_populate_select: bool,
    /// Release the request resolved to
    pub release: Version,
    pub controller: Arc<Controller>,
    pub registry: Arc<Registry>,
    pub options: Arc<ApiOptions>,
    /// Response formatter, once negotiated
    pub formatter: Option<Negotiated>,

    /// Status for a successful response, 200 unless set
    pub status: Option<StatusCode>,
    pub response_headers: HeaderMap,
    pub(crate) halted: Option<(StatusCode, Value)>,
    pub(crate) committed: Vec<Value>,
}

impl RequestContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        method: Method,
        endpoint: Endpoint,
        id: Option<String>,
        uri: Uri,
        headers: HeaderMap,
        params: QueryOptions,
        body: Bytes,
        parsed_body: Option<Value>,
        release: Version,
        controller: Arc<Controller>,
        registry: Arc<Registry>,
        options: Arc<ApiOptions>,
    ) -> Self {
        let verb = Verb::from_method(&method).unwrap_or(Verb::All);
        Self {
            method,
            verb,
            endpoint,
            id,
            uri,
            headers,
            params,
            body,
            parsed_body,
            conditions: Conditions::new(),
            query: None,
            documents: None,
            incoming: Pipeline::new(),
            outgoing: Pipeline::new(),
            count: false,
            explain: false,
            allow_populate_select: false,
            release,
            controller,
            registry,
            options,
            formatter: None,
            status: None,
            response_headers: HeaderMap::new(),
            halted: None,
            committed: Vec::new(),
        }
    }

    /// Request header as a string, if present and printable
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set a response header, ignoring values that are not valid header text
    pub fn set_header(&mut self, name: &str, value: impl AsRef<str>) {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value.as_ref())) {
            (Ok(name), Ok(value)) => {
                self.response_headers.insert(name, value);
            }
            _ => tracing::warn!(header = name, "Dropping invalid response header"),
        }
    }

    /// End the request now with `status` and a JSON `body`; no later middleware runs
    pub fn halt(&mut self, status: StatusCode, body: Value) {
        self.halted = Some((status, body));
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// The request's query, created on first use
    pub fn query_mut(&mut self) -> &mut Query {
        self.query.get_or_insert_with(|| Query::new(self.conditions.clone()))
    }

    /// Path of the collection this request addresses, e.g. `/api/vegetables`
    #[must_use]
    pub fn collection_path(&self) -> String {
        let path = self.uri.path().trim_end_matches('/');
        match (&self.id, self.endpoint) {
            (Some(id), Endpoint::Instance) => path
                .strip_suffix(id.as_str())
                .map_or_else(|| path.to_string(), |p| p.trim_end_matches('/').to_string()),
            _ => path.to_string(),
        }
    }
}
