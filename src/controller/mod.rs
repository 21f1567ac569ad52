//! # Resource Controllers
//!
//! A [`Controller`] owns everything the API needs to serve one resource: the backing
//! [`Model`], the URL fragment, the lookup key, default projection and ordering, which
//! verbs and update operators are enabled, and the user middleware registered for each
//! stage. It is configured through a [`ControllerBuilder`] and frozen by
//! [`ControllerBuilder::build`]; once built it is shared read-only between requests.
//!
//! ## Stages
//!
//! Every request runs four stages strictly in sequence. Built-in steps run first in
//! each stage, followed by the user middleware registered for it:
//!
//! | Stage | Built-in steps |
//! |---|---|
//! | initial | `Allow` header, id validation, disabled verbs, unsupported verb/endpoint pairs |
//! | request | conditions from the query string and URL id, empty transform pipelines |
//! | query | query construction and refinement, streaming create, update |
//! | finalize | (user middleware first) response assembly |
//!
//! Any step may fail; the error goes through [`translation`](crate::translation) and the
//! rest of the chain is skipped.
//!
//! # Example
//! ```rust,ignore
//! let vegetables = Controller::builder(model)
//!     .find_by("name")
//!     .select("-secret")
//!     .sort("name")
//!     .operators("$push $pull", &["tags"])
//!     .empty_collection(200)
//!     .request(None, Some("post put"), require_api_key)
//!     .build()?;
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use semver::VersionReq;
use std::fmt;
use std::sync::Arc;

use crate::errors::{ApiError, Misconfigured};
use crate::model::{Model, Schema};
use crate::query::{Inclusion, Projection, Sort};
use crate::routing::{self, Middleware, Route, Stage, Verb};
use crate::translation;

pub mod context;
pub mod create;
pub mod finalize;
pub mod refine;
pub mod request;
pub mod update;

pub use context::{ParsedBody, RequestContext};

/// Operators accepted in the `Update-Operator` header
pub const UPDATE_OPERATORS: [&str; 7] = ["$set", "$push", "$pull", "$addToSet", "$pop", "$pushAll", "$pullAll"];

/// Immutable per-resource configuration and middleware chain
pub struct Controller {
    model: Arc<dyn Model>,
    fragment: String,
    find_by: String,
    select: Projection,
    sort: Sort,
    versions: VersionReq,
    disabled: Vec<Verb>,
    operators: Vec<(String, Vec<String>)>,
    hints: bool,
    comments: bool,
    explain: bool,
    empty_collection: StatusCode,
    handle_errors: bool,
    deselected: Vec<String>,
    routes: Vec<Route>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("resource", &self.model.schema().singular())
            .field("fragment", &self.fragment)
            .field("find_by", &self.find_by)
            .field("versions", &self.versions.to_string())
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Start configuring a controller for `model`
    pub fn builder(model: Arc<dyn Model>) -> ControllerBuilder {
        ControllerBuilder::new(model)
    }

    // ============================================================================
    // Accessors
    // ============================================================================

    #[must_use]
    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.model.schema()
    }

    /// URL segment the resource is mounted at, without slashes
    #[must_use]
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    #[must_use]
    pub fn find_by(&self) -> &str {
        &self.find_by
    }

    #[must_use]
    pub fn select(&self) -> &Projection {
        &self.select
    }

    #[must_use]
    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    #[must_use]
    pub fn versions(&self) -> &VersionReq {
        &self.versions
    }

    #[must_use]
    pub fn is_enabled(&self, verb: Verb) -> bool {
        !self.disabled.contains(&verb)
    }

    /// Enabled verbs in `Allow` header order
    #[must_use]
    pub fn allowed(&self) -> Vec<Verb> {
        Verb::SERVED.into_iter().filter(|v| self.is_enabled(*v)).collect()
    }

    /// Whitelisted paths for an update operator; `None` when it is disabled
    #[must_use]
    pub fn operator_paths(&self, operator: &str) -> Option<&[String]> {
        self.operators
            .iter()
            .find(|(op, _)| op == operator)
            .map(|(_, paths)| paths.as_slice())
    }

    #[must_use]
    pub fn hints(&self) -> bool {
        self.hints
    }

    #[must_use]
    pub fn comments(&self) -> bool {
        self.comments
    }

    #[must_use]
    pub fn explain(&self) -> bool {
        self.explain
    }

    #[must_use]
    pub fn empty_collection(&self) -> StatusCode {
        self.empty_collection
    }

    #[must_use]
    pub fn handle_errors(&self) -> bool {
        self.handle_errors
    }

    /// Paths never sent to clients: schema-hidden paths the default select does not
    /// force back in, plus paths the default select excludes
    #[must_use]
    pub fn deselected(&self) -> &[String] {
        &self.deselected
    }

    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    // ============================================================================
    // Dispatch
    // ============================================================================

    /// Run the full chain for one request
    pub async fn handle(mut ctx: RequestContext) -> Response {
        tracing::debug!(
            method = %ctx.method,
            uri = %ctx.uri,
            release = %ctx.release,
            resource = %ctx.controller.schema().singular(),
            "Dispatching request"
        );
        match Self::run(&mut ctx).await {
            Ok(response) => response,
            Err(err) => translation::respond(translation::translate(err), &ctx),
        }
    }

    async fn run(ctx: &mut RequestContext) -> Result<Response, ApiError> {
        let controller = Arc::clone(&ctx.controller);

        request::allow(ctx);
        request::validate_id(ctx)?;
        request::check_method(ctx)?;
        request::check_endpoint(ctx)?;
        if let Some(response) = controller.run_stage(Stage::Initial, ctx).await? {
            return Ok(response);
        }

        request::build_conditions(ctx)?;
        request::install_pipelines(ctx);
        if let Some(response) = controller.run_stage(Stage::Request, ctx).await? {
            return Ok(response);
        }

        refine::build_query(ctx);
        refine::distinct(ctx).await?;
        refine::sort(ctx)?;
        refine::select(ctx)?;
        refine::populate(ctx)?;
        refine::skip(ctx)?;
        refine::limit(ctx)?;
        refine::count(ctx)?;
        refine::comment(ctx);
        refine::hint(ctx)?;
        create::create(ctx).await?;
        update::update(ctx).await?;
        if let Some(response) = controller.run_stage(Stage::Query, ctx).await? {
            return Ok(response);
        }

        if let Some(response) = controller.run_stage(Stage::Finalize, ctx).await? {
            return Ok(response);
        }
        finalize::respond(ctx).await
    }

    async fn run_stage(&self, stage: Stage, ctx: &mut RequestContext) -> Result<Option<Response>, ApiError> {
        let (endpoint, verb) = (ctx.endpoint, ctx.verb);
        for route in self.routes.iter().filter(|r| r.matches(stage, endpoint, verb)) {
            (route.handler)(ctx).await?;
            if let Some((status, body)) = ctx.halted.take() {
                return Ok(Some((status, ctx.response_headers.clone(), Json(body)).into_response()));
            }
        }
        Ok(None)
    }
}

/// Mutable configuration for a [`Controller`].
///
/// Setters never fail; the first misconfiguration is reported by [`build`](Self::build).
pub struct ControllerBuilder {
    model: Arc<dyn Model>,
    fragment: Option<String>,
    find_by: Option<String>,
    select: String,
    sort: String,
    versions: String,
    disabled: Vec<Verb>,
    operators: Vec<(String, Vec<String>)>,
    hints: bool,
    comments: bool,
    explain: bool,
    empty_collection: u16,
    handle_errors: bool,
    routes: Vec<Route>,
    errors: Vec<Misconfigured>,
}

impl ControllerBuilder {
    fn new(model: Arc<dyn Model>) -> Self {
        Self {
            model,
            fragment: None,
            find_by: None,
            select: String::new(),
            sort: String::new(),
            versions: "*".to_string(),
            disabled: Vec::new(),
            operators: Vec::new(),
            hints: false,
            comments: false,
            explain: false,
            empty_collection: 200,
            handle_errors: true,
            routes: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// URL segment to mount at; defaults to the plural resource name
    #[must_use]
    pub fn fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    /// Unique path `:id` is resolved against; defaults to the identity key
    #[must_use]
    pub fn find_by(mut self, path: impl Into<String>) -> Self {
        self.find_by = Some(path.into());
        self
    }

    /// Default projection, e.g. `-secret +hiddenButWanted`
    #[must_use]
    pub fn select(mut self, spec: impl Into<String>) -> Self {
        self.select = spec.into();
        self
    }

    /// Default ordering, e.g. `-lastModified name`
    #[must_use]
    pub fn sort(mut self, spec: impl Into<String>) -> Self {
        self.sort = spec.into();
        self
    }

    /// Semver range of releases this controller serves
    #[must_use]
    pub fn versions(mut self, range: impl Into<String>) -> Self {
        self.versions = range.into();
        self
    }

    /// Enable or disable a whitespace-separated list of verbs (`*` for all)
    #[must_use]
    pub fn methods(mut self, list: &str, enabled: bool) -> Self {
        match Verb::parse_list(list) {
            Ok(verbs) => {
                let verbs: Vec<Verb> = if verbs.contains(&Verb::All) {
                    Verb::SERVED.to_vec()
                } else {
                    verbs
                };
                for verb in verbs {
                    self.disabled.retain(|v| *v != verb);
                    if !enabled {
                        self.disabled.push(verb);
                    }
                }
            }
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Whitelist `paths` for each operator in `list`; an empty whitelist disables them
    #[must_use]
    pub fn operators(mut self, list: &str, paths: &[&str]) -> Self {
        for operator in list.split_whitespace() {
            if !UPDATE_OPERATORS.contains(&operator) {
                self.errors
                    .push(Misconfigured::new(format!("Unrecognized update operator \"{operator}\"")));
                continue;
            }
            self.operators.retain(|(op, _)| op != operator);
            if !paths.is_empty() {
                let paths = paths.iter().map(|p| (*p).to_string()).collect();
                self.operators.push((operator.to_string(), paths));
            }
        }
        self
    }

    #[must_use]
    pub fn hints(mut self, enabled: bool) -> Self {
        self.hints = enabled;
        self
    }

    #[must_use]
    pub fn comments(mut self, enabled: bool) -> Self {
        self.comments = enabled;
        self
    }

    /// Allow `$explain` in request conditions
    #[must_use]
    pub fn explain(mut self, enabled: bool) -> Self {
        self.explain = enabled;
        self
    }

    /// Status for a collection read that matches nothing: 200 (`[]`), 204, or anything
    /// else for a `NotFound` error
    #[must_use]
    pub fn empty_collection(mut self, status: u16) -> Self {
        self.empty_collection = status;
        self
    }

    /// When off, errors still set the status but the body is plain text
    #[must_use]
    pub fn handle_errors(mut self, enabled: bool) -> Self {
        self.handle_errors = enabled;
        self
    }

    /// Register middleware for any stage
    #[must_use]
    pub fn route(
        mut self,
        stage: &str,
        endpoint: Option<&str>,
        methods: Option<&str>,
        middleware: Vec<Middleware>,
    ) -> Self {
        match routing::expand(Some(stage), endpoint, methods, middleware) {
            Ok(routes) => self.routes.extend(routes),
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Register request-stage middleware
    #[must_use]
    pub fn request(self, endpoint: Option<&str>, methods: Option<&str>, middleware: Middleware) -> Self {
        self.route("request", endpoint, methods, vec![middleware])
    }

    /// Register query-stage middleware
    #[must_use]
    pub fn query(self, endpoint: Option<&str>, methods: Option<&str>, middleware: Middleware) -> Self {
        self.route("query", endpoint, methods, vec![middleware])
    }

    /// Register finalize-stage middleware; it runs before the response is assembled
    #[must_use]
    pub fn finalize(self, endpoint: Option<&str>, methods: Option<&str>, middleware: Middleware) -> Self {
        self.route("finalize", endpoint, methods, vec![middleware])
    }

    /// Validate the configuration and freeze it
    ///
    /// # Errors
    ///
    /// Returns the first `Misconfigured` recorded while chaining, or one for a
    /// non-unique `find_by`, an invalid version range, an invalid default sort or an
    /// empty fragment.
    pub fn build(self) -> Result<Controller, Misconfigured> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }

        let schema = self.model.schema();
        let find_by = self.find_by.unwrap_or_else(|| schema.id_key().to_string());
        if !schema.is_unique(&find_by) {
            return Err(Misconfigured::new(format!(
                "`findBy` path for model \"{}\" must be unique",
                schema.singular()
            )));
        }

        let versions = VersionReq::parse(&self.versions).map_err(|e| {
            Misconfigured::new(format!(
                "Controller version range \"{}\" was not a valid semver range ({e})",
                self.versions
            ))
        })?;

        let fragment = self
            .fragment
            .unwrap_or_else(|| schema.plural().to_string())
            .trim_matches('/')
            .to_string();
        if fragment.is_empty() || fragment.contains('/') {
            return Err(Misconfigured::new(format!(
                "Fragment for model \"{}\" must be a single path segment",
                schema.singular()
            )));
        }

        let select = Projection::parse(&self.select);
        let sort = Sort::parse(&self.sort)
            .map_err(|e| Misconfigured::new(format!("Invalid default sort \"{}\": {e}", self.sort)))?;

        let forced: Vec<&str> = select.paths(Inclusion::Force).collect();
        let mut deselected: Vec<String> = schema
            .deselected()
            .into_iter()
            .filter(|path| !forced.contains(&path.as_str()))
            .collect();
        for path in select.paths(Inclusion::Exclude) {
            if !deselected.iter().any(|p| p == path) {
                deselected.push(path.to_string());
            }
        }

        let empty_collection = StatusCode::from_u16(self.empty_collection)
            .map_err(|_| Misconfigured::new(format!("Invalid empty collection status {}", self.empty_collection)))?;

        Ok(Controller {
            model: self.model,
            fragment,
            find_by,
            select,
            sort,
            versions,
            disabled: self.disabled,
            operators: self.operators,
            hints: self.hints,
            comments: self.comments,
            explain: self.explain,
            empty_collection,
            handle_errors: self.handle_errors,
            deselected,
            routes: self.routes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemoryModel, PathInfo};

    fn model() -> Arc<dyn Model> {
        Arc::new(MemoryModel::new(
            Schema::builder("vegetable")
                .path("name", PathInfo::string().required().unique())
                .path("color", PathInfo::string())
                .path("secret", PathInfo::string().deselected())
                .path("hidden", PathInfo::string().deselected())
                .build(),
        ))
    }

    #[test]
    fn test_defaults() {
        let controller = Controller::builder(model()).build().unwrap();
        assert_eq!(controller.fragment(), "vegetables");
        assert_eq!(controller.find_by(), "_id");
        assert_eq!(controller.empty_collection(), StatusCode::OK);
        assert!(controller.handle_errors());
        assert_eq!(controller.allowed(), Verb::SERVED.to_vec());
    }

    #[test]
    fn test_find_by_must_be_unique() {
        let err = Controller::builder(model()).find_by("color").build().unwrap_err();
        assert!(err.to_string().contains("must be unique"));
        assert!(Controller::builder(model()).find_by("missing").build().is_err());
        assert!(Controller::builder(model()).find_by("name").build().is_ok());
    }

    #[test]
    fn test_invalid_versions() {
        assert!(Controller::builder(model()).versions("not a range").build().is_err());
        assert!(Controller::builder(model()).versions("~3").build().is_ok());
    }

    #[test]
    fn test_methods_toggle() {
        let controller = Controller::builder(model())
            .methods("post delete", false)
            .build()
            .unwrap();
        assert_eq!(controller.allowed(), vec![Verb::Head, Verb::Get, Verb::Put]);

        let reenabled = Controller::builder(model())
            .methods("*", false)
            .methods("get", true)
            .build()
            .unwrap();
        assert_eq!(reenabled.allowed(), vec![Verb::Get]);
        assert!(Controller::builder(model()).methods("patch", false).build().is_err());
    }

    #[test]
    fn test_operators() {
        let controller = Controller::builder(model())
            .operators("$push $pull", &["tags"])
            .operators("$pull", &[])
            .build()
            .unwrap();
        assert_eq!(controller.operator_paths("$push"), Some(&["tags".to_string()][..]));
        assert_eq!(controller.operator_paths("$pull"), None);
        assert!(Controller::builder(model()).operators("$rename", &["x"]).build().is_err());
    }

    #[test]
    fn test_deselected_set() {
        let controller = Controller::builder(model()).select("+hidden -color").build().unwrap();
        assert_eq!(controller.deselected(), &["secret".to_string(), "color".to_string()]);
    }

    #[test]
    fn test_fragment_is_trimmed() {
        let controller = Controller::builder(model()).fragment("/greens/").build().unwrap();
        assert_eq!(controller.fragment(), "greens");
        assert!(Controller::builder(model()).fragment("a/b").build().is_err());
    }

    #[test]
    fn test_bad_route_is_deferred() {
        let noop = routing::middleware(|_ctx| Box::pin(async { Ok(()) }));
        let err = Controller::builder(model())
            .request(Some("everything"), None, noop)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("instance"));
    }
}
