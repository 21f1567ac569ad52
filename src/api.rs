//! # API Router
//!
//! An [`Api`] owns the release history and the registered [`Controller`]s, and mounts
//! them on an axum [`Router`]. Each request goes through version resolution before any
//! controller sees it:
//!
//! 1. The `API-Version` request header (default `*`) is parsed as a semver range.
//! 2. Releases satisfying it are tried from highest to lowest.
//! 3. The first release served by a controller mounted at the requested fragment wins;
//!    among controllers serving the same release, the first registered wins.
//!
//! The resolved release is echoed in the `API-Version` response header along with
//! `Vary: API-Version`.
//!
//! # Example
//! ```rust,ignore
//! let app = Api::new()
//!     .release("1.0.0")?
//!     .release("2.1.0")?
//!     .rest(vegetables_v1)
//!     .rest(vegetables_v2)
//!     .into_router()?;
//!
//! let router = Router::new().nest("/api", app);
//! ```

use axum::{
    Router,
    body::to_bytes,
    extract::{OriginalUri, Query as QueryString, Request},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    response::Response,
    routing::any,
};
use semver::{Version, VersionReq};
use serde::Deserialize;
use std::sync::Arc;

use crate::controller::{Controller, ParsedBody, RequestContext};
use crate::errors::{ApiError, Misconfigured};
use crate::formatters::Registry;
use crate::query::QueryOptions;
use crate::routing::Endpoint;
use crate::translation;

/// Request header carrying the requested range and response header carrying the release
pub const API_VERSION: HeaderName = HeaderName::from_static("api-version");

/// Release exposed when none was registered
pub const DEFAULT_RELEASE: Version = Version::new(0, 0, 1);

/// Request handling options shared by every controller of an [`Api`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiOptions {
    /// Largest request body accepted, in bytes
    pub body_limit: usize,
    /// Media type assumed when a request has no `Accept` or `Content-Type` header
    pub default_media_type: String,
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            body_limit: 1024 * 1024,
            default_media_type: mime::APPLICATION_JSON.to_string(),
        }
    }
}

/// Releases, controllers and the shared formatter registry
pub struct Api {
    releases: Vec<Version>,
    controllers: Vec<Arc<Controller>>,
    registry: Arc<Registry>,
    options: Arc<ApiOptions>,
}

impl Default for Api {
    fn default() -> Self {
        Self::new()
    }
}

impl Api {
    #[must_use]
    pub fn new() -> Self {
        Self {
            releases: Vec::new(),
            controllers: Vec::new(),
            registry: Arc::new(Registry::default()),
            options: Arc::new(ApiOptions::default()),
        }
    }

    /// Use `registry` for content negotiation instead of the default JSON/NDJSON one
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ApiOptions) -> Self {
        self.options = Arc::new(options);
        self
    }

    /// Append a release to the history; registering one twice has no effect
    ///
    /// # Errors
    ///
    /// Returns `Misconfigured` if `version` is not valid semver.
    pub fn release(mut self, version: &str) -> Result<Self, Misconfigured> {
        let version = Version::parse(version.trim())
            .map_err(|e| Misconfigured::new(format!("Release \"{version}\" was not a valid semver version ({e})")))?;
        if !self.releases.contains(&version) {
            self.releases.push(version);
        }
        Ok(self)
    }

    /// Register a controller; earlier registrations take priority
    #[must_use]
    pub fn rest(mut self, controller: Controller) -> Self {
        self.controllers.push(Arc::new(controller));
        self
    }

    /// Releases in registration order, or the default release when none were added
    #[must_use]
    pub fn releases(&self) -> Vec<Version> {
        if self.releases.is_empty() {
            vec![DEFAULT_RELEASE]
        } else {
            self.releases.clone()
        }
    }

    #[must_use]
    pub fn controllers(&self) -> &[Arc<Controller>] {
        &self.controllers
    }

    /// Pick the release and controller for a request.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if `requested` is not a semver range or no release satisfies it
    /// - `NotFound` if no controller at `fragment` serves any satisfying release
    pub fn resolve(&self, requested: Option<&str>, fragment: &str) -> Result<(Version, Arc<Controller>), ApiError> {
        let requested = requested.unwrap_or("*").trim();
        let range = VersionReq::parse(requested).map_err(|_| {
            ApiError::bad_request(format!(
                "The requested API version range \"{requested}\" was not a valid semver range"
            ))
        })?;

        let mut satisfying: Vec<Version> = self.releases().into_iter().filter(|r| range.matches(r)).collect();
        if satisfying.is_empty() {
            return Err(ApiError::bad_request(format!(
                "The requested API version range \"{requested}\" could not be satisfied"
            )));
        }
        satisfying.sort_unstable_by(|a, b| b.cmp(a));

        satisfying
            .into_iter()
            .find_map(|release| {
                self.controllers
                    .iter()
                    .find(|c| c.fragment() == fragment && c.versions().matches(&release))
                    .map(|c| (release, Arc::clone(c)))
            })
            .ok_or_else(|| {
                ApiError::not_found(format!(
                    "Nothing is served at \"/{fragment}\" for API version range \"{requested}\""
                ))
            })
    }

    /// Mount every controller at `/{fragment}` and `/{fragment}/{id}`
    ///
    /// # Errors
    ///
    /// Returns `Misconfigured` when a controller's version range matches no release.
    pub fn into_router(self) -> Result<Router, Misconfigured> {
        let releases = self.releases();
        for controller in &self.controllers {
            if !releases.iter().any(|r| controller.versions().matches(r)) {
                return Err(Misconfigured::new(format!(
                    "Controller \"{}\" with version range \"{}\" matches no release",
                    controller.fragment(),
                    controller.versions()
                )));
            }
        }

        let mut fragments: Vec<String> = Vec::new();
        for controller in &self.controllers {
            if !fragments.iter().any(|f| f == controller.fragment()) {
                fragments.push(controller.fragment().to_string());
            }
        }

        let api = Arc::new(self);
        let mut router = Router::new();
        for fragment in fragments {
            tracing::debug!(%fragment, "Mounting resource");
            let collection = {
                let api = Arc::clone(&api);
                let fragment = fragment.clone();
                move |request: Request| {
                    let api = Arc::clone(&api);
                    let fragment = fragment.clone();
                    async move { api.dispatch(&fragment, None, request).await }
                }
            };
            let instance = {
                let api = Arc::clone(&api);
                let fragment = fragment.clone();
                move |axum::extract::Path(id): axum::extract::Path<String>, request: Request| {
                    let api = Arc::clone(&api);
                    let fragment = fragment.clone();
                    async move { api.dispatch(&fragment, Some(id), request).await }
                }
            };
            router = router
                .route(&format!("/{fragment}"), any(collection))
                .route(&format!("/{fragment}/{{id}}"), any(instance));
        }
        Ok(router)
    }

    async fn dispatch(&self, fragment: &str, id: Option<String>, request: Request) -> Response {
        let (parts, body) = request.into_parts();

        let requested = match parts.headers.get(&API_VERSION).map(HeaderValue::to_str).transpose() {
            Ok(requested) => requested,
            Err(_) => {
                return translation::respond_unrouted(
                    ApiError::bad_request("The API-Version header must be text"),
                    HeaderMap::new(),
                );
            }
        };
        let (release, controller) = match self.resolve(requested, fragment) {
            Ok(resolved) => resolved,
            Err(err) => return translation::respond_unrouted(err, HeaderMap::new()),
        };

        let mut version_headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&release.to_string()) {
            version_headers.insert(API_VERSION, value);
        }
        version_headers.insert(header::VARY, HeaderValue::from_static("API-Version"));

        let uri = parts
            .extensions
            .get::<OriginalUri>()
            .map_or_else(|| parts.uri.clone(), |original| original.0.clone());
        let params = match QueryString::<QueryOptions>::try_from_uri(&uri) {
            Ok(QueryString(params)) => params,
            Err(e) => {
                return translation::respond_unrouted(
                    ApiError::bad_request(format!("The query string could not be parsed: {e}")),
                    version_headers,
                );
            }
        };
        let body = match to_bytes(body, self.options.body_limit).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return translation::respond_unrouted(
                    ApiError::bad_request(format!("The request body could not be read: {e}")),
                    version_headers,
                );
            }
        };
        let parsed_body = parts.extensions.get::<ParsedBody>().map(|parsed| parsed.0.clone());
        let endpoint = if id.is_some() {
            Endpoint::Instance
        } else {
            Endpoint::Collection
        };

        let mut ctx = RequestContext::new(
            parts.method,
            endpoint,
            id,
            uri,
            parts.headers,
            params,
            body,
            parsed_body,
            release,
            controller,
            Arc::clone(&self.registry),
            Arc::clone(&self.options),
        );
        ctx.response_headers.extend(version_headers);
        Controller::handle(ctx).await
    }
}
