//! Initial and request stage built-ins.

use serde_json::Value;

use super::RequestContext;
use crate::errors::ApiError;
use crate::model::PathKind;
use crate::pipeline::Pipeline;
use crate::routing::{Endpoint, Verb};

/// Set the `Allow` header from the enabled verbs
pub fn allow(ctx: &mut RequestContext) {
    let allowed: Vec<&str> = ctx.controller.allowed().into_iter().map(Verb::as_str).collect();
    ctx.set_header("allow", allowed.join(","));
}

/// Reject an `:id` that cannot be a value of the lookup key's type
///
/// # Errors
///
/// Returns `BadRequest` for a malformed object id or a non-numeric id on a numeric key.
pub fn validate_id(ctx: &mut RequestContext) -> Result<(), ApiError> {
    let Some(id) = &ctx.id else {
        return Ok(());
    };
    let find_by = ctx.controller.find_by();
    let kind = ctx.controller.schema().path(find_by).map(|p| p.kind);
    match kind {
        Some(kind) if !kind.accepts_id(id) => Err(ApiError::bad_request(format!(
            "The requested document ID \"{id}\" is not a valid document ID"
        ))),
        _ => Ok(()),
    }
}

/// Reject verbs disabled on the controller
///
/// # Errors
///
/// Returns `MethodNotAllowed` for a disabled or unserved verb.
pub fn check_method(ctx: &mut RequestContext) -> Result<(), ApiError> {
    if ctx.verb == Verb::All || !ctx.controller.is_enabled(ctx.verb) {
        return Err(ApiError::method_not_allowed(format!(
            "The requested method has been disabled for this resource ({})",
            ctx.method
        )));
    }
    Ok(())
}

/// Reject POST on an instance and PUT on a collection
///
/// # Errors
///
/// Returns `NotImplemented` for either combination.
pub fn check_endpoint(ctx: &mut RequestContext) -> Result<(), ApiError> {
    match (ctx.verb, ctx.endpoint) {
        (Verb::Post, Endpoint::Instance) => Err(ApiError::not_implemented(
            "Cannot POST to an instance. Use PUT to update or POST to the collection",
        )),
        (Verb::Put, Endpoint::Collection) => Err(ApiError::not_implemented(
            "Cannot PUT to the collection. Address an instance instead",
        )),
        _ => Ok(()),
    }
}

/// The URL id as a conditions value of the lookup key's type
fn id_value(ctx: &RequestContext, id: &str) -> Value {
    let kind = ctx.controller.schema().path(ctx.controller.find_by()).map(|p| p.kind);
    if kind == Some(PathKind::Number)
        && let Ok(n) = id.parse::<f64>()
    {
        if n.fract() == 0.0
            && let Ok(i) = id.parse::<i64>()
        {
            return Value::from(i);
        }
        return Value::from(n);
    }
    Value::String(id.to_string())
}

/// Build `ctx.conditions` from the `conditions` parameter and the URL id
///
/// The id always wins over a client-supplied value for the lookup key.
///
/// # Errors
///
/// Returns `BadRequest` when `conditions` is not a JSON object or uses `$explain` on a
/// controller without explain enabled.
pub fn build_conditions(ctx: &mut RequestContext) -> Result<(), ApiError> {
    let mut conditions = match ctx.params.conditions.as_deref() {
        None | Some("") => serde_json::Map::new(),
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(ApiError::bad_request("The conditions query string value must be an object")),
            Err(e) => {
                return Err(ApiError::bad_request(format!(
                    "The conditions query string value was not valid JSON: \"{e}\""
                )));
            }
        },
    };

    if conditions.contains_key("$explain") {
        if !ctx.controller.explain() {
            return Err(ApiError::bad_request("Using $explain is disabled for this resource"));
        }
        conditions.remove("$explain");
        ctx.explain = true;
    }

    if let Some(id) = ctx.id.clone() {
        let value = id_value(ctx, &id);
        conditions.insert(ctx.controller.find_by().to_string(), value);
    }

    ctx.conditions = conditions;
    Ok(())
}

/// Start both transform pipelines empty
pub fn install_pipelines(ctx: &mut RequestContext) {
    ctx.incoming = Pipeline::new();
    ctx.outgoing = Pipeline::new();
}
