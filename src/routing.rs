//! # Route Definitions
//!
//! Middleware is registered against a terse declaration: a stage, an optional endpoint
//! kind and an optional verb list. [`expand`] flattens that into one [`Route`] per
//! (endpoint, verb) pair so the controller can filter its chain with a plain comparison
//! at dispatch time.
//!
//! ```rust,ignore
//! // both endpoint kinds, every verb
//! expand(Some("request"), None, None, vec![audit])?;
//! // collection only, GET and HEAD
//! expand(Some("query"), Some("collection"), Some("get head"), vec![scope_to_user])?;
//! ```

use axum::http::Method;
use futures::future::BoxFuture;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::controller::RequestContext;
use crate::errors::{ApiError, Misconfigured};

/// The four ordered phases every request passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Initial,
    Request,
    Query,
    Finalize,
}

impl FromStr for Stage {
    type Err = Misconfigured;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "request" => Ok(Self::Request),
            "query" => Ok(Self::Query),
            "finalize" => Ok(Self::Finalize),
            other => Err(Misconfigured::new(format!("Unrecognized stage \"{other}\""))),
        }
    }
}

/// Whether a URL addresses one document or the whole collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Instance,
    Collection,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Instance => "instance",
            Self::Collection => "collection",
        })
    }
}

/// A verb a route can be registered for. `All` matches every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    All,
    Head,
    Get,
    Put,
    Post,
    Delete,
}

impl Verb {
    /// Verbs in `Allow` header order
    pub const SERVED: [Verb; 5] = [Verb::Head, Verb::Get, Verb::Post, Verb::Put, Verb::Delete];

    /// Map an HTTP method; anything not served is `None`
    #[must_use]
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::HEAD => Some(Self::Head),
            Method::GET => Some(Self::Get),
            Method::PUT => Some(Self::Put),
            Method::POST => Some(Self::Post),
            Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "head" => Some(Self::Head),
            "get" => Some(Self::Get),
            "put" => Some(Self::Put),
            "post" => Some(Self::Post),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Head => "HEAD",
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }

    /// Parse a whitespace-separated verb list, `*` meaning [`Verb::All`]
    ///
    /// # Errors
    ///
    /// Returns `Misconfigured` if no verb in the list is recognized.
    pub fn parse_list(methods: &str) -> Result<Vec<Self>, Misconfigured> {
        if methods.trim() == "*" {
            return Ok(vec![Self::All]);
        }
        let mut verbs: Vec<Self> = Vec::new();
        for verb in methods.split_whitespace().filter_map(Self::parse) {
            if !verbs.contains(&verb) {
                verbs.push(verb);
            }
        }
        if verbs.is_empty() {
            return Err(Misconfigured::new(format!(
                "No recognized methods in \"{methods}\" (expected all, head, get, put, post or delete)"
            )));
        }
        Ok(verbs)
    }
}

/// Async middleware run against the request context
pub type Middleware =
    Arc<dyn for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<(), ApiError>> + Send + Sync>;

/// Box a closure as [`Middleware`]
///
/// # Example
/// ```rust,ignore
/// let tag = middleware(|ctx| Box::pin(async move {
///     ctx.set_header("X-Resource", "vegetables");
///     Ok(())
/// }));
/// ```
pub fn middleware<F>(f: F) -> Middleware
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, Result<(), ApiError>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One expanded registration
#[derive(Clone)]
pub struct Route {
    pub stage: Stage,
    pub endpoint: Endpoint,
    pub verb: Verb,
    pub handler: Middleware,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("stage", &self.stage)
            .field("endpoint", &self.endpoint)
            .field("verb", &self.verb)
            .finish_non_exhaustive()
    }
}

impl Route {
    /// Whether this route runs for a request. GET routes also serve HEAD.
    #[must_use]
    pub fn matches(&self, stage: Stage, endpoint: Endpoint, verb: Verb) -> bool {
        self.stage == stage
            && self.endpoint == endpoint
            && (self.verb == Verb::All || self.verb == verb || (self.verb == Verb::Get && verb == Verb::Head))
    }
}

/// Expand a route declaration into one [`Route`] per endpoint and verb
///
/// # Errors
///
/// Returns `Misconfigured` when the stage is missing or unknown, the endpoint is neither
/// `instance` nor `collection`, no method is recognized, or no middleware was given.
pub fn expand(
    stage: Option<&str>,
    endpoint: Option<&str>,
    methods: Option<&str>,
    middleware: Vec<Middleware>,
) -> Result<Vec<Route>, Misconfigured> {
    let stage: Stage = stage
        .ok_or_else(|| Misconfigured::new("The middleware stage was not provided"))?
        .parse()?;

    let endpoints = match endpoint {
        None => vec![Endpoint::Instance, Endpoint::Collection],
        Some("instance") => vec![Endpoint::Instance],
        Some("collection") => vec![Endpoint::Collection],
        Some(other) => {
            return Err(Misconfigured::new(format!(
                "End-point type must be either \"instance\" or \"collection,\" not \"{other}\""
            )));
        }
    };

    let verbs = match methods {
        None => vec![Verb::All],
        Some(list) => Verb::parse_list(list)?,
    };

    if middleware.is_empty() {
        return Err(Misconfigured::new("Middleware must be a function or a list of functions"));
    }

    let mut routes = Vec::with_capacity(endpoints.len() * verbs.len() * middleware.len());
    for endpoint in endpoints {
        for verb in &verbs {
            for handler in &middleware {
                routes.push(Route {
                    stage,
                    endpoint,
                    verb: *verb,
                    handler: Arc::clone(handler),
                });
            }
        }
    }
    Ok(routes)
}
