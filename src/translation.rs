//! # Error Translation
//!
//! Every error raised while serving a request passes through [`translate`], a fixed
//! chain of rewriting steps. Each step recognizes one kind of model failure and turns it
//! into a REST error; anything it does not recognize passes through untouched:
//!
//! 1. rejected query hints → `400 Bad Request`
//! 2. duplicate unique keys → `422 Unprocessable Entity` with one entry naming the path
//! 3. schema validation → `422 Unprocessable Entity` with one entry per path
//! 4. version conflicts → `409 Conflict`
//! 5. missing records → `404 Not Found`
//! 6. anything else from the model → `500 Internal Server Error`, details logged only
//!
//! [`respond`] then writes the result: the status always, and the body through the
//! negotiated formatter unless the controller has error handling turned off.
//!
//! ## Duplicate key messages
//!
//! The path and value are scraped from the backend's text. Recognized shapes:
//!
//! ```text
//! E11000 duplicate key error index: test.vegetables.$name_1  dup key: { : "Radish" }
//! E11000 duplicate key error collection: test.vegetables index: name_1 dup key: { name: "Radish" }
//! UNIQUE constraint failed: vegetables.name
//! Key (name)=(Radish) already exists.
//! Duplicate entry 'Radish' for key 'vegetables.name'
//! ```

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use regex::Regex;
use sea_orm::{DbErr, SqlErr};
use serde_json::Value;
use std::sync::LazyLock;

use crate::controller::RequestContext;
use crate::errors::{ApiError, ErrorEntry};
use crate::model::ModelError;

type Step = fn(ApiError) -> ApiError;

const CHAIN: [Step; 6] = [bad_hint, duplicate_key, validation, version_conflict, missing_record, unrecognized];

static MONGO_INDEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"index:\s+(?:\S+\.\$)?([A-Za-z0-9_.]+?)_-?1\b").ok());
static MONGO_VALUE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"dup key:\s*\{\s*[^:]*:\s*(.+?)\s*\}\s*$").ok());
static SQLITE_PATH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"UNIQUE constraint failed: (?:[^.\s,]+\.)?([A-Za-z0-9_]+)").ok());
static POSTGRES_KEY: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"Key \(([^)]+)\)=\(([^)]*)\)").ok());
static MYSQL_ENTRY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Duplicate entry '([^']*)' for key '(?:[^'.]+\.)?([^']+)'").ok());

fn capture<'a>(regex: &LazyLock<Option<Regex>>, text: &'a str, group: usize) -> Option<&'a str> {
    regex
        .as_ref()?
        .captures(text)?
        .get(group)
        .map(|m| m.as_str())
}

/// Path and offending value named by a duplicate key message
#[must_use]
pub fn scrape_duplicate(message: &str) -> (Option<String>, Option<Value>) {
    if let Some(path) = capture(&MONGO_INDEX, message, 1) {
        let value = capture(&MONGO_VALUE, message, 1)
            .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())));
        return (Some(path.to_string()), value);
    }
    if let Some(path) = capture(&POSTGRES_KEY, message, 1) {
        let value = capture(&POSTGRES_KEY, message, 2).map(|v| Value::String(v.to_string()));
        return (Some(path.to_string()), value);
    }
    if let Some(path) = capture(&MYSQL_ENTRY, message, 2) {
        let value = capture(&MYSQL_ENTRY, message, 1).map(|v| Value::String(v.to_string()));
        return (Some(path.to_string()), value);
    }
    (capture(&SQLITE_PATH, message, 1).map(str::to_string), None)
}

fn database_error(err: &ApiError) -> Option<&DbErr> {
    match err {
        ApiError::Model(ModelError::Database(db)) => Some(db),
        _ => None,
    }
}

// ============================================================================
// Chain
// ============================================================================

fn bad_hint(err: ApiError) -> ApiError {
    match database_error(&err) {
        Some(db) if db.to_string().trim_end().ends_with("bad hint") => {
            ApiError::bad_request("The requested query hint is invalid")
        }
        _ => err,
    }
}

fn duplicate_key(err: ApiError) -> ApiError {
    let Some(db) = database_error(&err) else {
        return err;
    };
    let original = match db.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => detail,
        _ => {
            let text = db.to_string();
            if !text.contains("E11000") {
                return err;
            }
            text
        }
    };

    let (path, value) = scrape_duplicate(&original);
    let shown = match &value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let message = match &path {
        Some(path) if value.is_some() => format!("Path `{path}` ({shown}) must be unique."),
        Some(path) => format!("Path `{path}` must be unique."),
        None => "A unique field of this document is already in use.".to_string(),
    };

    let mut entry = ErrorEntry::new("DuplicateKey", message.clone()).with_type("unique");
    entry.original_message = Some(original);
    if let Some(path) = path {
        entry = entry.with_path(path);
    }
    if let Some(value) = value {
        entry = entry.with_value(value);
    }
    ApiError::unprocessable_with(message, vec![entry])
}

fn validation(err: ApiError) -> ApiError {
    match err {
        ApiError::Model(ModelError::Validation(errors)) => {
            let entries = errors.errors().iter().map(|e| e.to_entry()).collect();
            ApiError::unprocessable_with(errors.to_string(), entries)
        }
        other => other,
    }
}

fn version_conflict(err: ApiError) -> ApiError {
    match err {
        ApiError::Model(ModelError::VersionConflict { .. }) => ApiError::lock_conflict(
            "The version of the document to update did not match the version in the request body",
        ),
        other => other,
    }
}

fn missing_record(err: ApiError) -> ApiError {
    match database_error(&err) {
        Some(DbErr::RecordNotFound(_)) => ApiError::not_found("Nothing matched the requested query"),
        _ => err,
    }
}

fn unrecognized(err: ApiError) -> ApiError {
    match err {
        ApiError::Model(inner) => ApiError::internal("An internal server error occurred", Some(format!("{inner:?}"))),
        other => other,
    }
}

/// Rewrite model failures into REST errors
#[must_use]
pub fn translate(err: ApiError) -> ApiError {
    CHAIN.iter().fold(err, |err, step| step(err))
}

// ============================================================================
// Response
// ============================================================================

/// Write a translated error as the response.
///
/// Headers describing a successful result (`Location`, `Etag`, `Last-Modified`,
/// `Trailer`) are dropped; `Allow` and the version headers are kept. When a create batch
/// stored documents before failing, an extra `PartialCommit` entry lists their ids.
pub fn respond(err: ApiError, ctx: &RequestContext) -> Response {
    err.log_internal();
    let status = err.status_code();

    let mut headers = ctx.response_headers.clone();
    for name in [header::LOCATION, header::ETAG, header::LAST_MODIFIED, header::TRAILER] {
        headers.remove(name);
    }

    if !ctx.controller.handle_errors() {
        return (status, headers, err.to_string()).into_response();
    }

    let mut entries = err.entries();
    if !ctx.committed.is_empty() {
        entries.push(
            ErrorEntry::new(
                "PartialCommit",
                format!(
                    "{} document(s) were stored before the request failed",
                    ctx.committed.len()
                ),
            )
            .with_value(Value::Array(ctx.committed.clone())),
        );
    }

    let accept = ctx
        .header(header::ACCEPT.as_str())
        .unwrap_or(ctx.options.default_media_type.as_str());
    let negotiated = ctx
        .registry
        .formatter_for(accept)
        .or_else(|_| ctx.registry.formatter_for(mime::APPLICATION_JSON.as_ref()));
    let body = serde_json::to_value(&entries).unwrap_or(Value::Null);

    match negotiated.and_then(|n| n.formatter.single(&body).map(|bytes| (n, bytes))) {
        Ok((negotiated, bytes)) => {
            let mut response = (status, headers, bytes).into_response();
            if let Ok(content_type) = negotiated.media_type.as_ref().parse() {
                response.headers_mut().insert(header::CONTENT_TYPE, content_type);
            }
            response
        }
        Err(_) => (status, headers, axum::Json(entries)).into_response(),
    }
}

/// Translate and write an error raised before any controller was chosen
pub(crate) fn respond_unrouted(err: ApiError, headers: axum::http::HeaderMap) -> Response {
    let err = translate(err);
    err.log_internal();
    (err.status_code(), headers, axum::Json(err.entries())).into_response()
}
