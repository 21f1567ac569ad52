//! Streaming create for `POST` on a collection.

use axum::http::{StatusCode, header};
use futures::StreamExt;
use serde_json::{Value, json};

use super::RequestContext;
use crate::errors::{ApiError, ErrorEntry};
use crate::formatters::ValueStream;
use crate::model::DocumentKind;
use crate::pipeline::{Envelope, ItemStream};
use crate::routing::{Endpoint, Verb};

/// Raw incoming values, from a pre-parsed body or the negotiated parser
///
/// # Errors
///
/// Returns `UnsupportedMediaType` when no parser handles the `Content-Type`.
pub(crate) fn incoming_values(ctx: &RequestContext) -> Result<ValueStream, ApiError> {
    if let Some(parsed) = &ctx.parsed_body {
        let values = match parsed {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        return Ok(futures::stream::iter(values.into_iter().map(Ok)).boxed());
    }
    let content_type = ctx
        .header(header::CONTENT_TYPE.as_str())
        .unwrap_or(ctx.options.default_media_type.as_str());
    let parser = ctx.registry.parser_for(content_type)?;
    Ok(parser.parse(ctx.body.clone()))
}

/// Wrap incoming values as envelopes and run the incoming pipeline over them
pub(crate) fn incoming_envelopes(ctx: &RequestContext, values: ValueStream, doc: Option<Value>) -> ItemStream {
    let wrapped: ItemStream = values
        .map(move |item| {
            item.map(|incoming| Envelope {
                incoming: Some(incoming),
                doc: doc.clone(),
            })
        })
        .boxed();
    ctx.incoming.apply(wrapped)
}

fn discriminator_mismatch(ctx: &RequestContext, payload: &Value) -> ApiError {
    let mut entry = ErrorEntry::new(
        "UnprocessableEntity",
        "A document's type did not match any known discriminators for this resource",
    )
    .with_type("discriminator");
    if let Some(discriminator) = ctx.controller.schema().discriminator() {
        entry = entry.with_path(discriminator.key.clone());
        if let Some(tag) = payload.get(&discriminator.key) {
            entry = entry.with_value(tag.clone());
        }
    }
    ApiError::unprocessable_with(entry.message.clone(), vec![entry])
}

fn display_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Percent-encode an id as a single URL path segment
fn path_segment(id: &str) -> String {
    url::form_urlencoded::byte_serialize(id.as_bytes())
        .map(|chunk| if chunk == "+" { "%20" } else { chunk })
        .collect()
}

/// Create one document per incoming value, then point the read-back at them.
///
/// Fail-fast: the first failing document aborts the request. Documents stored before it
/// stay stored and are reported alongside the error.
///
/// # Errors
///
/// Returns `UnsupportedMediaType`, `BadRequest` for an unparsable body,
/// `UnprocessableEntity` for a non-object payload, an unknown discriminator or an empty
/// batch, or the model's failure.
pub async fn create(ctx: &mut RequestContext) -> Result<(), ApiError> {
    if !(ctx.verb == Verb::Post && ctx.endpoint == Endpoint::Collection) {
        return Ok(());
    }

    let controller = std::sync::Arc::clone(&ctx.controller);
    let schema = controller.schema();
    let find_by = controller.find_by();

    let values = incoming_values(ctx)?;
    let mut items = incoming_envelopes(ctx, values, None);
    let mut ids: Vec<Value> = Vec::new();

    while let Some(item) = items.next().await {
        let payload = item?
            .incoming
            .ok_or_else(|| ApiError::unprocessable("A transform removed the document body"))?;
        if !payload.is_object() {
            return Err(ApiError::unprocessable("Each document in the request body must be an object"));
        }
        let kind = DocumentKind::resolve(schema, &payload).ok_or_else(|| discriminator_mismatch(ctx, &payload))?;

        match controller.model().insert(&kind, payload).await {
            Ok(created) => {
                let id = created.get(find_by).cloned().unwrap_or(Value::Null);
                ctx.committed.push(created.get(schema.id_key()).cloned().unwrap_or(Value::Null));
                ids.push(id);
            }
            Err(e) => {
                if !ctx.committed.is_empty() {
                    tracing::warn!(
                        resource = %schema.singular(),
                        stored = ctx.committed.len(),
                        "Create batch failed after documents were stored"
                    );
                }
                return Err(e.into());
            }
        }
    }
    ctx.committed.clear();

    if ids.is_empty() {
        return Err(ApiError::unprocessable(
            "The request body must contain at least one document",
        ));
    }

    let base = ctx.collection_path();
    let location = if let [id] = ids.as_slice() {
        format!("{base}/{}", path_segment(&display_id(id)))
    } else {
        let filter = json!({ find_by: { "$in": ids } }).to_string();
        let encoded: String = url::form_urlencoded::byte_serialize(filter.as_bytes()).collect();
        format!("{base}?conditions={encoded}")
    };
    ctx.set_header(header::LOCATION.as_str(), location);
    ctx.status = Some(StatusCode::CREATED);

    let narrowed = json!({ "$in": ids });
    ctx.conditions.insert(find_by.to_string(), narrowed.clone());
    ctx.query_mut().conditions.insert(find_by.to_string(), narrowed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_id() {
        assert_eq!(display_id(&json!("abc")), "abc");
        assert_eq!(display_id(&json!(7)), "7");
    }

    #[test]
    fn test_path_segment() {
        assert_eq!(path_segment("Kale"), "Kale");
        assert_eq!(path_segment("Épinard"), "%C3%89pinard");
        assert_eq!(path_segment("bok choy/2+1"), "bok%20choy%2F2%2B1");
    }
}
