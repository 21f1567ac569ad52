//! Query construction and read refinement.
//!
//! Each refinement is a no-op when its query parameter is absent. They run in a fixed
//! order: `count` must reject `hint`/`comment` before either is applied, and the
//! select/populate privacy checks must pass before anything is read.

use serde_json::{Map, Number, Value};

use super::RequestContext;
use crate::errors::ApiError;
use crate::query::{Inclusion, Populate, Projection, Query, Sort};
use crate::routing::Verb;

fn is_read(ctx: &RequestContext) -> bool {
    matches!(ctx.verb, Verb::Get | Verb::Head)
}

fn is_deselected(ctx: &RequestContext, path: &str) -> bool {
    ctx.controller
        .deselected()
        .iter()
        .any(|hidden| path == hidden || path.starts_with(&format!("{hidden}.")))
}

/// Create `ctx.query` from the conditions
pub fn build_query(ctx: &mut RequestContext) {
    let mut query = Query::new(ctx.conditions.clone());
    query.explain = ctx.explain;
    ctx.query = Some(query);
}

/// `?distinct=path` replaces the result with the distinct values of `path`
///
/// # Errors
///
/// Returns `Forbidden` for a deselected path, `BadRequest` outside GET/HEAD, or the
/// model's failure.
pub async fn distinct(ctx: &mut RequestContext) -> Result<(), ApiError> {
    let Some(path) = ctx.params.distinct.clone() else {
        return Ok(());
    };
    if !is_read(ctx) {
        return Err(ApiError::bad_request("Distinct is only supported when reading documents"));
    }
    if is_deselected(ctx, &path) {
        return Err(ApiError::forbidden("You may not find distinct values for the requested path"));
    }
    let values = ctx.controller.model().distinct(&path, &ctx.conditions).await?;
    ctx.documents = Some(values);
    Ok(())
}

/// Controller default sort, then `?sort=`
///
/// # Errors
///
/// Returns `BadRequest` for a malformed sort.
pub fn sort(ctx: &mut RequestContext) -> Result<(), ApiError> {
    let requested = match ctx.params.sort.as_deref() {
        Some(spec) => Some(Sort::parse(spec)?),
        None => None,
    };
    let defaults = ctx.controller.sort().clone();
    let query = ctx.query_mut();
    query.sort.merge(&defaults);
    if let Some(requested) = requested {
        query.sort.merge(&requested);
    }
    Ok(())
}

/// Controller default select, then `?select=`
///
/// # Errors
///
/// Returns `Forbidden` when the request uses `+path` or names a deselected path.
pub fn select(ctx: &mut RequestContext) -> Result<(), ApiError> {
    let requested = ctx.params.select.as_deref().map(Projection::parse);
    if let Some(requested) = &requested {
        if requested.paths(Inclusion::Force).next().is_some() {
            return Err(ApiError::forbidden("Including excluded fields is not permitted"));
        }
        if requested
            .paths(Inclusion::Include)
            .any(|path| is_deselected(ctx, path))
        {
            return Err(ApiError::forbidden("Including excluded fields is not permitted"));
        }
    }
    let defaults = ctx.controller.select().clone();
    let query = ctx.query_mut();
    query.select.merge(&defaults);
    if let Some(requested) = requested {
        query.select.merge(&requested);
    }
    Ok(())
}

/// `?populate=` in any of its three forms
///
/// # Errors
///
/// Returns `BadRequest` for a malformed value, `Forbidden` for a deselected path or a
/// nested `select` the context does not allow.
pub fn populate(ctx: &mut RequestContext) -> Result<(), ApiError> {
    let Some(param) = ctx.params.populate.clone() else {
        return Ok(());
    };
    let populate = Populate::parse(&param)?;
    for entry in &populate {
        if is_deselected(ctx, &entry.path) {
            return Err(ApiError::forbidden("Including excluded fields is not permitted"));
        }
        if entry.select.is_some() && !ctx.allow_populate_select {
            return Err(ApiError::forbidden("Selecting fields of populated documents is not permitted"));
        }
    }
    ctx.query_mut().populate.extend(populate);
    Ok(())
}

/// `?skip=` as a non-negative integer
///
/// # Errors
///
/// Returns `BadRequest` for anything else.
pub fn skip(ctx: &mut RequestContext) -> Result<(), ApiError> {
    let Some(raw) = ctx.params.skip.clone() else {
        return Ok(());
    };
    let skip = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ApiError::bad_request("Skip must be a non-negative integer if set"))?;
    ctx.query_mut().skip = Some(skip);
    Ok(())
}

/// `?limit=` as a positive integer
///
/// # Errors
///
/// Returns `BadRequest` for anything else.
pub fn limit(ctx: &mut RequestContext) -> Result<(), ApiError> {
    let Some(raw) = ctx.params.limit.clone() else {
        return Ok(());
    };
    let limit = raw
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|l| *l > 0)
        .ok_or_else(|| ApiError::bad_request("Limit must be a positive integer if set"))?;
    ctx.query_mut().limit = Some(limit);
    Ok(())
}

/// `?count=true|false`
///
/// # Errors
///
/// Returns `BadRequest` for other values, outside GET/HEAD, or combined with `hint` or
/// `comment`.
pub fn count(ctx: &mut RequestContext) -> Result<(), ApiError> {
    let Some(raw) = ctx.params.count.as_deref() else {
        return Ok(());
    };
    let count = match raw {
        "true" => true,
        "false" => false,
        _ => return Err(ApiError::bad_request("Count must be \"true\" or \"false\" if set")),
    };
    if !count {
        return Ok(());
    }
    if !is_read(ctx) {
        return Err(ApiError::bad_request("Count is only supported when reading documents"));
    }
    if ctx.params.hint.is_some() {
        return Err(ApiError::bad_request("Hint can't be used with count"));
    }
    if ctx.params.comment.is_some() {
        return Err(ApiError::bad_request("Comment can't be used with count"));
    }
    ctx.count = true;
    Ok(())
}

/// `?comment=` when comments are enabled; otherwise ignored
pub fn comment(ctx: &mut RequestContext) {
    let Some(comment) = ctx.params.comment.clone() else {
        return;
    };
    if ctx.controller.comments() {
        ctx.query_mut().comment = Some(comment);
    } else {
        tracing::debug!(%comment, "Query comment ignored, comments are disabled");
    }
}

fn coerce_hint_value(key: &str, value: &Value) -> Result<Value, ApiError> {
    let invalid = || ApiError::bad_request(format!("The hint value for \"{key}\" must be a number"));
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => {
            let n = s.trim().parse::<f64>().map_err(|_| invalid())?;
            #[allow(clippy::cast_possible_truncation)]
            let coerced = if n.fract() == 0.0 && n.abs() < 9.0e15 {
                Value::from(n as i64)
            } else {
                Number::from_f64(n).map(Value::Number).ok_or_else(invalid)?
            };
            Ok(coerced)
        }
        _ => Err(invalid()),
    }
}

/// `?hint=` as a JSON object of index keys, values coerced to numbers
///
/// # Errors
///
/// Returns `Forbidden` when hints are disabled and `BadRequest` for a malformed hint.
pub fn hint(ctx: &mut RequestContext) -> Result<(), ApiError> {
    let Some(raw) = ctx.params.hint.clone() else {
        return Ok(());
    };
    if !ctx.controller.hints() {
        return Err(ApiError::forbidden("Hints are not enabled for this resource"));
    }
    let parsed: Map<String, Value> = serde_json::from_str(&raw)
        .map_err(|e| ApiError::bad_request(format!("The hint must be a JSON object: \"{e}\"")))?;
    let mut hint = Map::new();
    for (key, value) in &parsed {
        hint.insert(key.clone(), coerce_hint_value(key, value)?);
    }
    ctx.query_mut().hint = Some(hint);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_hint_values() {
        assert_eq!(coerce_hint_value("a", &json!("1")).unwrap(), json!(1));
        assert_eq!(coerce_hint_value("a", &json!(-1)).unwrap(), json!(-1));
        assert_eq!(coerce_hint_value("a", &json!("0.5")).unwrap(), json!(0.5));
        assert!(coerce_hint_value("a", &json!("up")).is_err());
        assert!(coerce_hint_value("a", &json!(true)).is_err());
    }
}
