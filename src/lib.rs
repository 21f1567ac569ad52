//! # crudline
//!
//! Staged request pipelines that serve REST CRUD endpoints on axum. Each resource gets a
//! [`Controller`] that turns requests into [`Model`] queries in four stages (initial,
//! request, query, finalize), streams documents through per-request transform
//! [`Pipeline`]s, negotiates formats through a [`Registry`], and funnels every failure
//! through one [error translation chain](translation).
//!
//! ```rust,ignore
//! use crudline::{Api, Controller, model::{MemoryModel, PathInfo, Schema}};
//!
//! let schema = Schema::builder("vegetable")
//!     .path("name", PathInfo::string().required().unique())
//!     .build();
//! let vegetables = Controller::builder(Arc::new(MemoryModel::new(schema)))
//!     .find_by("name")
//!     .build()?;
//!
//! let app = Router::new().nest("/api", Api::new().release("1.0.0")?.rest(vegetables).into_router()?);
//! ```

pub mod api;
pub mod controller;
pub mod errors;
pub mod formatters;
pub mod model;
pub mod pipeline;
pub mod query;
pub mod routing;
pub mod translation;
pub mod validation;

pub use api::{Api, ApiOptions};
pub use controller::{Controller, ControllerBuilder, ParsedBody, RequestContext};
pub use errors::{ApiError, ErrorEntry, Misconfigured};
pub use formatters::Registry;
pub use model::{Model, ModelError};
pub use pipeline::{Envelope, Pipeline};
pub use routing::middleware;
