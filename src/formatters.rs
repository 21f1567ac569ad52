//! # Formatters and Parsers
//!
//! A [`Registry`] maps media types to response [`Formatter`]s and request-body [`Parser`]s.
//! It is built once by the application and shared with every controller through the
//! [`Api`](crate::api::Api); nothing here is global, so independent APIs in one process can
//! speak different formats.
//!
//! The default registry speaks `application/json` and `application/x-ndjson`.
//!
//! ## Negotiation
//!
//! - [`Registry::formatter_for`] walks the `Accept` header in descending `q` order and
//!   picks the first registered formatter the range covers (`*/*` and `type/*` included).
//!   Nothing acceptable is a `406 Not Acceptable`.
//! - [`Registry::parser_for`] matches the `Content-Type` essence exactly. Nothing
//!   registered is a `415 Unsupported Media Type`.

use axum::body::Bytes;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use mime::Mime;
use serde_json::Value;
use std::sync::Arc;

use crate::errors::{ApiError, Misconfigured};

/// Serialise values for one media type.
///
/// Collections are written incrementally as `open`, one `item` per document, then
/// `close`; everything else goes through `single`.
pub trait Formatter: Send + Sync {
    /// Encode a standalone value
    ///
    /// # Errors
    ///
    /// Returns an internal error when the value cannot be encoded.
    fn single(&self, value: &Value) -> Result<Bytes, ApiError>;

    /// Bytes written before the first collection item
    fn open(&self) -> Bytes;

    /// Encode the `index`th collection item
    ///
    /// # Errors
    ///
    /// Returns an internal error when the value cannot be encoded.
    fn item(&self, index: usize, value: &Value) -> Result<Bytes, ApiError>;

    /// Bytes written after the last collection item
    fn close(&self) -> Bytes;

    /// Encode a whole collection at once
    ///
    /// # Errors
    ///
    /// Returns an internal error when an item cannot be encoded.
    fn collection(&self, values: &[Value]) -> Result<Bytes, ApiError> {
        let mut out = self.open().to_vec();
        for (index, value) in values.iter().enumerate() {
            out.extend_from_slice(&self.item(index, value)?);
        }
        out.extend_from_slice(&self.close());
        Ok(Bytes::from(out))
    }
}

/// Stream of values decoded from a request body
pub type ValueStream = BoxStream<'static, Result<Value, ApiError>>;

/// Decode a request body into a stream of JSON values
pub trait Parser: Send + Sync {
    fn parse(&self, body: Bytes) -> ValueStream;
}

fn encode(value: &Value) -> Result<Vec<u8>, ApiError> {
    serde_json::to_vec(value)
        .map_err(|e| ApiError::internal("Failed to serialise response", Some(e.to_string())))
}

// ============================================================================
// JSON
// ============================================================================

/// `application/json`: a single value, or an array for collections
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn single(&self, value: &Value) -> Result<Bytes, ApiError> {
        encode(value).map(Bytes::from)
    }

    fn open(&self) -> Bytes {
        Bytes::from_static(b"[")
    }

    fn item(&self, index: usize, value: &Value) -> Result<Bytes, ApiError> {
        let mut out = if index == 0 { Vec::new() } else { vec![b','] };
        out.extend(encode(value)?);
        Ok(Bytes::from(out))
    }

    fn close(&self) -> Bytes {
        Bytes::from_static(b"]")
    }
}

/// `application/json` bodies: an array yields each element, anything else yields itself
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn parse(&self, body: Bytes) -> ValueStream {
        let values = match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Array(items)) => items.into_iter().map(Ok).collect(),
            Ok(value) => vec![Ok(value)],
            Err(e) => vec![Err(ApiError::bad_request(format!(
                "The body of this request was invalid and could not be parsed. \"{e}\""
            )))],
        };
        stream::iter(values).boxed()
    }
}

// ============================================================================
// NDJSON
// ============================================================================

/// `application/x-ndjson`: one value per line
#[derive(Debug, Clone, Copy, Default)]
pub struct NdjsonFormatter;

impl Formatter for NdjsonFormatter {
    fn single(&self, value: &Value) -> Result<Bytes, ApiError> {
        let mut out = encode(value)?;
        out.push(b'\n');
        Ok(Bytes::from(out))
    }

    fn open(&self) -> Bytes {
        Bytes::new()
    }

    fn item(&self, _index: usize, value: &Value) -> Result<Bytes, ApiError> {
        self.single(value)
    }

    fn close(&self) -> Bytes {
        Bytes::new()
    }
}

/// `application/x-ndjson` bodies, decoded line by line as the stream is polled
#[derive(Debug, Clone, Copy, Default)]
pub struct NdjsonParser;

impl Parser for NdjsonParser {
    fn parse(&self, body: Bytes) -> ValueStream {
        stream::unfold((body, 0usize), |(body, offset)| async move {
            let mut start = offset;
            loop {
                if start >= body.len() {
                    return None;
                }
                let end = body[start..]
                    .iter()
                    .position(|b| *b == b'\n')
                    .map_or(body.len(), |i| start + i);
                let line = &body[start..end];
                let next = end + 1;
                if line.iter().all(u8::is_ascii_whitespace) {
                    start = next;
                    continue;
                }
                let item = serde_json::from_slice::<Value>(line).map_err(|e| {
                    ApiError::bad_request(format!(
                        "The body of this request was invalid and could not be parsed. \"{e}\""
                    ))
                });
                return Some((item, (body, next)));
            }
        })
        .boxed()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Formatter chosen for a response
#[derive(Clone)]
pub struct Negotiated {
    pub media_type: Mime,
    pub formatter: Arc<dyn Formatter>,
}

impl std::fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiated").field("media_type", &self.media_type).finish()
    }
}

/// Media-type keyed formatters and parsers
#[derive(Clone)]
pub struct Registry {
    formatters: Vec<(Mime, Arc<dyn Formatter>)>,
    parsers: Vec<(Mime, Arc<dyn Parser>)>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty()
            .with_formatter(mime::APPLICATION_JSON, JsonFormatter)
            .with_formatter(ndjson(), NdjsonFormatter)
            .with_parser(mime::APPLICATION_JSON, JsonParser)
            .with_parser(ndjson(), NdjsonParser)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let formatters: Vec<&str> = self.formatters.iter().map(|(m, _)| m.essence_str()).collect();
        let parsers: Vec<&str> = self.parsers.iter().map(|(m, _)| m.essence_str()).collect();
        f.debug_struct("Registry")
            .field("formatters", &formatters)
            .field("parsers", &parsers)
            .finish()
    }
}

fn ndjson() -> Mime {
    "application/x-ndjson".parse().unwrap_or(mime::APPLICATION_JSON)
}

fn quality(range: &Mime) -> f32 {
    range
        .get_param("q")
        .and_then(|q| q.as_str().parse::<f32>().ok())
        .unwrap_or(1.0)
}

fn covers(range: &Mime, media_type: &Mime) -> bool {
    (range.type_() == mime::STAR || range.type_() == media_type.type_())
        && (range.subtype() == mime::STAR || range.subtype() == media_type.subtype())
}

impl Registry {
    /// A registry with nothing registered
    #[must_use]
    pub fn empty() -> Self {
        Self {
            formatters: Vec::new(),
            parsers: Vec::new(),
        }
    }

    fn with_formatter(mut self, media_type: Mime, formatter: impl Formatter + 'static) -> Self {
        self.formatters.retain(|(m, _)| m.essence_str() != media_type.essence_str());
        self.formatters.push((media_type, Arc::new(formatter)));
        self
    }

    fn with_parser(mut self, media_type: Mime, parser: impl Parser + 'static) -> Self {
        self.parsers.retain(|(m, _)| m.essence_str() != media_type.essence_str());
        self.parsers.push((media_type, Arc::new(parser)));
        self
    }

    /// Register (or replace) the formatter for `media_type`
    ///
    /// # Errors
    ///
    /// Returns `Misconfigured` if `media_type` is not a valid media type.
    pub fn formatter(self, media_type: &str, formatter: impl Formatter + 'static) -> Result<Self, Misconfigured> {
        let parsed = media_type
            .parse::<Mime>()
            .map_err(|e| Misconfigured::new(format!("Invalid media type \"{media_type}\": {e}")))?;
        Ok(self.with_formatter(parsed, formatter))
    }

    /// Register (or replace) the parser for `media_type`
    ///
    /// # Errors
    ///
    /// Returns `Misconfigured` if `media_type` is not a valid media type.
    pub fn parser(self, media_type: &str, parser: impl Parser + 'static) -> Result<Self, Misconfigured> {
        let parsed = media_type
            .parse::<Mime>()
            .map_err(|e| Misconfigured::new(format!("Invalid media type \"{media_type}\": {e}")))?;
        Ok(self.with_parser(parsed, parser))
    }

    /// Pick a formatter for an `Accept` header value
    ///
    /// # Errors
    ///
    /// Returns `NotAcceptable` when no registered formatter satisfies any range.
    pub fn formatter_for(&self, accept: &str) -> Result<Negotiated, ApiError> {
        let mut ranges: Vec<Mime> = accept
            .split(',')
            .filter_map(|part| part.trim().parse::<Mime>().ok())
            .filter(|range| quality(range) > 0.0)
            .collect();
        ranges.sort_by(|a, b| quality(b).total_cmp(&quality(a)));

        ranges
            .iter()
            .find_map(|range| {
                self.formatters
                    .iter()
                    .find(|(media_type, _)| covers(range, media_type))
            })
            .map(|(media_type, formatter)| Negotiated {
                media_type: media_type.clone(),
                formatter: Arc::clone(formatter),
            })
            .ok_or_else(|| ApiError::not_acceptable("The requested content type could not be provided"))
    }

    /// Pick a parser for a `Content-Type` header value
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedMediaType` when nothing is registered for the essence.
    pub fn parser_for(&self, content_type: &str) -> Result<Arc<dyn Parser>, ApiError> {
        let parsed = content_type.trim().parse::<Mime>().map_err(|_| {
            ApiError::unsupported_media_type(format!("The Content-Type \"{content_type}\" is not valid"))
        })?;
        self.parsers
            .iter()
            .find(|(media_type, _)| media_type.essence_str() == parsed.essence_str())
            .map(|(_, parser)| Arc::clone(parser))
            .ok_or_else(|| {
                ApiError::unsupported_media_type(format!(
                    "The Content-Type \"{}\" is not supported",
                    parsed.essence_str()
                ))
            })
    }
}
