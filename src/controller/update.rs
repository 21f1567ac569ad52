//! `PUT` on an instance: whole-document updates and operator updates.

use futures::{StreamExt, TryStreamExt};
use serde_json::{Map, Value, json};
use std::sync::Arc;

use super::create::{incoming_envelopes, incoming_values};
use super::{Controller, RequestContext, UPDATE_OPERATORS};
use crate::errors::ApiError;
use crate::model::Document;
use crate::model::matching::values_equal;
use crate::pipeline::Envelope;
use crate::query::{Projection, Query};
use crate::routing::{Endpoint, Verb};

/// Header selecting operator mode
pub const UPDATE_OPERATOR_HEADER: &str = "update-operator";

fn version_of(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64).filter(|v| v.is_finite())
}

fn missing_version() -> ApiError {
    ApiError::unprocessable("Locking is enabled, but the target version was not provided in the request body.")
}

/// Apply a whole-document or operator update to the addressed document
///
/// # Errors
///
/// See [`default_update`] and [`operator_update`].
pub async fn update(ctx: &mut RequestContext) -> Result<(), ApiError> {
    if !(ctx.verb == Verb::Put && ctx.endpoint == Endpoint::Instance) {
        return Ok(());
    }
    match ctx.header(UPDATE_OPERATOR_HEADER).map(str::to_string) {
        Some(operator) => operator_update(ctx, &operator).await,
        None => default_update(ctx).await,
    }
}

/// Load the document, check the body against it, merge and save.
///
/// # Errors
///
/// - `NotFound` if nothing matches the conditions
/// - `UnprocessableEntity` if the body's lookup key differs from the URL id, a required
///   version is missing, or the body holds other than exactly one document
/// - `BadRequest` if the loaded document has no version
/// - `LockConflict` if the body's version is stale
pub async fn default_update(ctx: &mut RequestContext) -> Result<(), ApiError> {
    let controller = Arc::clone(&ctx.controller);
    let schema = controller.schema();
    let locking = schema.locking();
    let version_key = schema.version_key().to_string();

    // Loaded whole so the save keeps hidden paths; the version check uses what the
    // controller and request select
    let hidden = schema.deselected();
    let selection = ctx
        .query
        .as_ref()
        .map_or_else(|| controller.select().clone(), |query| query.select.clone());
    let full = Projection::forcing(&hidden);
    let load = Query::new(ctx.conditions.clone()).select(&full).limit(1);
    let mut cursor = controller.model().find(&load).await?;
    let loaded = cursor
        .next()
        .await
        .transpose()?
        .ok_or_else(|| ApiError::not_found("Nothing matched the requested query"))?;
    drop(cursor);

    let values = incoming_values(ctx)?;
    let mut items = incoming_envelopes(ctx, values, Some(loaded.clone()));
    let mut update: Option<Document> = None;

    while let Some(item) = items.next().await {
        let Envelope { incoming, doc } = item?;
        let mut patch = incoming.ok_or_else(|| ApiError::unprocessable("A transform removed the document body"))?;
        let mut target = doc.unwrap_or_else(|| loaded.clone());
        if update.is_some() {
            return Err(ApiError::unprocessable("The request body must contain exactly one document"));
        }
        check_find_by(ctx, &controller, &patch)?;
        let sent = version_of(&patch, &version_key);

        let Value::Object(fields) = &mut patch else {
            return Err(ApiError::unprocessable("The request body must be an object"));
        };
        if locking {
            let sent = sent.ok_or_else(missing_version)?;
            let selected = selection.apply(&target, schema.id_key(), &hidden);
            let current = version_of(&selected, &version_key).ok_or_else(|| {
                ApiError::bad_request("Locking is enabled, but the version key was not selected on the document")
            })?;
            if sent != current {
                return Err(ApiError::lock_conflict(
                    "The version of the document to update did not match the version in the request body",
                ));
            }
        }
        fields.remove(&version_key);

        merge(&mut target, fields, schema.id_key());
        update = Some(target);
    }

    let mut target =
        update.ok_or_else(|| ApiError::unprocessable("The request body must contain exactly one document"))?;
    let expected = if locking {
        let current = loaded.get(&version_key).and_then(Value::as_i64).unwrap_or(0);
        if let Some(map) = target.as_object_mut() {
            map.insert(version_key.clone(), json!(current + 1));
        }
        Some(current)
    } else {
        None
    };

    let saved = controller.model().save(target, expected).await?;
    ctx.documents = Some(vec![saved]);
    Ok(())
}

fn check_find_by(ctx: &RequestContext, controller: &Controller, patch: &Value) -> Result<(), ApiError> {
    let find_by = controller.find_by();
    match (patch.get(find_by), ctx.conditions.get(find_by)) {
        (Some(sent), Some(addressed)) if !values_equal(sent, addressed) => Err(ApiError::unprocessable(format!(
            "The ID of the update document did not match the URL's document ID ({find_by})"
        ))),
        _ => Ok(()),
    }
}

/// Top-level merge of `fields` into `target`, never touching the identity key
fn merge(target: &mut Document, fields: &Map<String, Value>, id_key: &str) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in fields {
            if key != id_key {
                map.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Apply `{operator: patch}` to everything the conditions match, bypassing validation.
///
/// # Errors
///
/// - `NotImplemented` for an unrecognized operator
/// - `Forbidden` if the operator is disabled or a path is not whitelisted for it
/// - `UnprocessableEntity` for other than exactly one document or a missing version
/// - `NotFound` if a locked update matched nothing because nothing matches the conditions
/// - `LockConflict` if a locked update matched nothing because the version is stale
pub async fn operator_update(ctx: &mut RequestContext, operator: &str) -> Result<(), ApiError> {
    if !UPDATE_OPERATORS.contains(&operator) {
        return Err(ApiError::not_implemented(format!(
            "The requested update operator \"{operator}\" is not supported"
        )));
    }
    let controller = Arc::clone(&ctx.controller);
    let Some(whitelist) = controller.operator_paths(operator) else {
        return Err(ApiError::forbidden(format!(
            "The requested update operator \"{operator}\" is not enabled for this resource"
        )));
    };
    let schema = controller.schema();
    let locking = schema.locking();
    let version_key = schema.version_key();

    let values = incoming_values(ctx)?;
    let envelopes: Vec<Envelope> = incoming_envelopes(ctx, values, None).try_collect().await?;
    let [Envelope { incoming, .. }] = envelopes.as_slice() else {
        return Err(ApiError::unprocessable("The request body must contain exactly one document"));
    };
    let Some(Value::Object(patch)) = incoming.clone() else {
        return Err(ApiError::unprocessable("The request body must be an object"));
    };

    let mut patch = patch;
    let version = patch.remove(version_key);
    if let Some(path) = patch.keys().find(|path| !whitelist.iter().any(|allowed| allowed == *path)) {
        return Err(ApiError::forbidden(format!(
            "This update path is forbidden for the requested update operator \"{operator}\" ({path})"
        )));
    }

    let mut conditions = ctx.conditions.clone();
    let mut update = Map::new();
    update.insert(operator.to_string(), Value::Object(patch));
    if locking {
        let version = version
            .as_ref()
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
            .ok_or_else(missing_version)?;
        conditions.insert(version_key.to_string(), json!(version));
        update.insert("$inc".to_string(), json!({ version_key: 1 }));
    }

    let modified = controller.model().update(&conditions, &Value::Object(update)).await?;
    if locking && modified == 0 {
        let unversioned = Query::new(ctx.conditions.clone());
        if controller.model().count(&unversioned).await? == 0 {
            return Err(ApiError::not_found("Nothing matched the requested query"));
        }
        return Err(ApiError::lock_conflict(
            "The version of the document to update did not match the version in the request body",
        ));
    }
    Ok(())
}
