//! Response assembly.
//!
//! Collections are streamed: the body is written item by item as the cursor yields, the
//! `Etag` is a SHA-256 over every byte written and goes out as a trailer together with
//! `Last-Modified`. Instance responses know their content up front and send both as
//! headers.

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use http_body_util::StreamBody;
use hyper::body::Frame;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::io;
use std::sync::Arc;

use super::RequestContext;
use crate::errors::ApiError;
use crate::formatters::{Formatter, Negotiated};
use crate::model::matching::{get_path, remove_path};
use crate::pipeline::{Envelope, ItemStream, from_values};
use crate::query::{Projection, Query};
use crate::routing::{Endpoint, Verb};

type DocStream = BoxStream<'static, Result<Value, ApiError>>;

/// Quoted hex SHA-256 of a response body
#[must_use]
pub fn etag(bytes: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(bytes)))
}

/// RFC 7231 date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`
#[must_use]
pub fn http_date(at: &DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn modified_at(doc: &Value, path: &str) -> Option<DateTime<Utc>> {
    match get_path(doc, path)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn latest<'a>(docs: impl IntoIterator<Item = &'a Value>, path: Option<&str>) -> Option<DateTime<Utc>> {
    let path = path?;
    docs.into_iter().filter_map(|doc| modified_at(doc, path)).max()
}

fn strip(mut doc: Value, hidden: &[String]) -> Value {
    for path in hidden {
        remove_path(&mut doc, path);
    }
    doc
}

fn header_value(value: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(value).ok()
}

/// Final response from status, body and everything the chain put in the context
fn reply(ctx: &RequestContext, negotiated: &Negotiated, status: StatusCode, body: Body) -> Response {
    let body = if ctx.verb == Verb::Head { Body::empty() } else { body };
    let mut response = body.into_response();
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in &ctx.response_headers {
        headers.insert(name.clone(), value.clone());
    }
    if let Some(content_type) = header_value(negotiated.media_type.as_ref()) {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    response
}

fn caching_headers(ctx: &mut RequestContext, body: &[u8], modified: Option<DateTime<Utc>>) {
    ctx.set_header(header::ETAG.as_str(), etag(body));
    if let Some(at) = modified {
        ctx.set_header(header::LAST_MODIFIED.as_str(), http_date(&at));
    }
}

/// Empty result: the configured status for collections, `NotFound` for instances
fn empty(ctx: &RequestContext, negotiated: &Negotiated) -> Result<Response, ApiError> {
    if ctx.endpoint == Endpoint::Instance {
        return Err(ApiError::not_found("Nothing matched the requested query"));
    }
    match ctx.controller.empty_collection() {
        StatusCode::NO_CONTENT => Ok(reply(ctx, negotiated, StatusCode::NO_CONTENT, Body::empty())),
        StatusCode::OK => {
            let body = negotiated.formatter.collection(&[])?;
            Ok(reply(ctx, negotiated, StatusCode::OK, Body::from(body)))
        }
        _ => Err(ApiError::not_found("Nothing matched the requested query")),
    }
}

// ============================================================================
// Streaming collection body
// ============================================================================

enum Phase {
    Open,
    Items,
    Trailers,
    Done,
}

/// Writes a collection as body frames, then the `Etag`/`Last-Modified` trailers
struct CollectionWriter {
    docs: DocStream,
    formatter: Arc<dyn Formatter>,
    index: usize,
    hasher: Sha256,
    last_modified_path: Option<String>,
    last_modified: Option<DateTime<Utc>>,
    phase: Phase,
}

impl CollectionWriter {
    fn data(&mut self, bytes: Bytes) -> Result<Frame<Bytes>, io::Error> {
        self.hasher.update(&bytes);
        Ok(Frame::data(bytes))
    }

    fn abort(mut self, err: &ApiError) -> Option<(Result<Frame<Bytes>, io::Error>, Self)> {
        tracing::error!(error = %err, "Response stream failed after headers were sent");
        self.phase = Phase::Done;
        Some((Err(io::Error::other(err.to_string())), self))
    }

    fn trailers(&mut self) -> HeaderMap {
        let mut trailers = HeaderMap::new();
        let digest = std::mem::take(&mut self.hasher).finalize();
        if let Some(value) = header_value(&format!("\"{}\"", hex::encode(digest))) {
            trailers.insert(header::ETAG, value);
        }
        if let Some(value) = self.last_modified.as_ref().and_then(|at| header_value(&http_date(at))) {
            trailers.insert(header::LAST_MODIFIED, value);
        }
        trailers
    }

    async fn next_frame(mut self) -> Option<(Result<Frame<Bytes>, io::Error>, Self)> {
        match self.phase {
            Phase::Open => {
                self.phase = Phase::Items;
                let frame = self.data(self.formatter.open());
                Some((frame, self))
            }
            Phase::Items => {
                let next = self.docs.next().await;
                match next {
                    Some(Ok(doc)) => {
                        if let Some(path) = &self.last_modified_path
                            && let Some(at) = modified_at(&doc, path)
                        {
                            self.last_modified = Some(self.last_modified.map_or(at, |seen| seen.max(at)));
                        }
                        match self.formatter.item(self.index, &doc) {
                            Ok(bytes) => {
                                self.index += 1;
                                let frame = self.data(bytes);
                                Some((frame, self))
                            }
                            Err(err) => self.abort(&err),
                        }
                    }
                    Some(Err(err)) => self.abort(&err),
                    None => {
                        self.phase = Phase::Trailers;
                        let frame = self.data(self.formatter.close());
                        Some((frame, self))
                    }
                }
            }
            Phase::Trailers => {
                self.phase = Phase::Done;
                let trailers = self.trailers();
                Some((Ok(Frame::trailers(trailers)), self))
            }
            Phase::Done => None,
        }
    }
}

fn stream_collection(ctx: &mut RequestContext, negotiated: &Negotiated, docs: DocStream) -> Response {
    let last_modified_path = ctx.controller.schema().last_modified().map(str::to_string);
    let trailer = if last_modified_path.is_some() { "Etag, Last-Modified" } else { "Etag" };
    ctx.set_header(header::TRAILER.as_str(), trailer);

    let writer = CollectionWriter {
        docs,
        formatter: Arc::clone(&negotiated.formatter),
        index: 0,
        hasher: Sha256::new(),
        last_modified_path,
        last_modified: None,
        phase: Phase::Open,
    };
    let frames = stream::unfold(writer, CollectionWriter::next_frame);
    let status = ctx.status.unwrap_or(StatusCode::OK);
    reply(ctx, negotiated, status, Body::new(StreamBody::new(frames)))
}

// ============================================================================
// Finalize
// ============================================================================

/// Execute the request's read and write the response.
///
/// The formatter is negotiated first. A count request replies with the bare number
/// and skips the outgoing pipeline.
///
/// # Errors
///
/// Returns `NotAcceptable`, `NotFound` for empty results (per the empty-collection
/// setting on collections), or any model or transform failure raised before the first
/// byte is written.
pub async fn respond(ctx: &mut RequestContext) -> Result<Response, ApiError> {
    let accept = ctx
        .header(header::ACCEPT.as_str())
        .unwrap_or(ctx.options.default_media_type.as_str())
        .to_string();
    let negotiated = ctx.registry.formatter_for(&accept)?;
    ctx.formatter = Some(negotiated.clone());

    let controller = Arc::clone(&ctx.controller);
    let model = Arc::clone(controller.model());
    let mut query = ctx
        .query
        .clone()
        .unwrap_or_else(|| Query::new(ctx.conditions.clone()));
    if ctx.verb == Verb::Delete {
        // Removal addresses stored documents by identity, so read them whole
        query.select = Projection::default();
        query.populate.clear();
    }

    if ctx.count {
        let count = model.count(&query).await?;
        let body = negotiated.formatter.single(&json!(count))?;
        return Ok(reply(ctx, &negotiated, StatusCode::OK, Body::from(body)));
    }

    let mut source: ItemStream = match ctx.documents.take() {
        Some(docs) => from_values(docs, Envelope::document),
        None => model
            .find(&query)
            .await?
            .map(|item| item.map(Envelope::document).map_err(ApiError::from))
            .boxed(),
    };

    let Some(first) = source.next().await.transpose()? else {
        return empty(ctx, &negotiated);
    };
    let items = ctx.outgoing.apply(stream::iter([Ok(first)]).chain(source).boxed());
    let raw: DocStream = items
        .try_filter_map(|envelope| future::ready(Ok(envelope.doc)))
        .boxed();

    if ctx.verb == Verb::Delete {
        let mut raw = raw;
        let mut removed: u64 = 0;
        while let Some(doc) = raw.try_next().await? {
            if model.remove(&doc).await? {
                removed += 1;
            }
        }
        let body = negotiated.formatter.single(&json!(removed))?;
        let status = ctx.status.unwrap_or(StatusCode::OK);
        return Ok(reply(ctx, &negotiated, status, Body::from(body)));
    }

    let hidden = controller.deselected().to_vec();
    let docs: DocStream = raw.map_ok(move |doc| strip(doc, &hidden)).boxed();
    let status = ctx.status.unwrap_or(StatusCode::OK);
    let last_modified = controller.schema().last_modified();

    match (ctx.verb, ctx.endpoint) {
        (Verb::Get, Endpoint::Collection) => Ok(stream_collection(ctx, &negotiated, docs)),
        (Verb::Get | Verb::Head, Endpoint::Instance) => {
            let docs: Vec<Value> = docs.try_collect().await?;
            let Some(doc) = docs.first() else {
                return Err(ApiError::not_found("Nothing matched the requested query"));
            };
            let body = negotiated.formatter.single(doc)?;
            caching_headers(ctx, &body, latest([doc], last_modified));
            Ok(reply(ctx, &negotiated, status, Body::from(body)))
        }
        (Verb::Head, Endpoint::Collection) => {
            let docs: Vec<Value> = docs.try_collect().await?;
            let body = negotiated.formatter.collection(&docs)?;
            caching_headers(ctx, &body, latest(&docs, last_modified));
            Ok(reply(ctx, &negotiated, status, Body::empty()))
        }
        _ => {
            let docs: Vec<Value> = docs.try_collect().await?;
            let body = match docs.as_slice() {
                [doc] => negotiated.formatter.single(doc)?,
                _ => negotiated.formatter.collection(&docs)?,
            };
            Ok(reply(ctx, &negotiated, status, Body::from(body)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_is_quoted_sha256() {
        let tag = etag(b"[]");
        assert!(tag.starts_with('"') && tag.ends_with('"'));
        assert_eq!(tag.len(), 66);
        assert_eq!(tag, etag(b"[]"));
        assert_ne!(tag, etag(b"[1]"));
    }

    #[test]
    fn test_http_date() {
        let at = DateTime::parse_from_rfc3339("1994-11-06T08:49:37Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(http_date(&at), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_latest_modification() {
        let docs = [
            json!({"lastModified": "2024-01-01T00:00:00Z"}),
            json!({"lastModified": "2024-03-01T00:00:00Z"}),
            json!({"lastModified": "not a date"}),
        ];
        let at = latest(&docs, Some("lastModified")).unwrap();
        assert_eq!(http_date(&at), "Fri, 01 Mar 2024 00:00:00 GMT");
        assert!(latest(&docs, None).is_none());
    }

    #[test]
    fn test_strip_hidden_paths() {
        let doc = json!({"name": "Kale", "secret": 1, "nested": {"hidden": 2, "shown": 3}});
        let hidden = vec!["secret".to_string(), "nested.hidden".to_string()];
        assert_eq!(strip(doc, &hidden), json!({"name": "Kale", "nested": {"shown": 3}}));
    }
}
