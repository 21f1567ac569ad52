use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use crudline::{Api, ApiError, Envelope, middleware};
use futures::FutureExt;
use serde_json::json;

mod common;
use common::{app, builder, fixture, get, names, post, send};

fn versioned(fixture: &common::Fixture) -> Router {
    let vegetables = builder(&fixture.vegetables).versions("1.x").build().unwrap();
    let farmers = builder(&fixture.farmers).versions("~3").build().unwrap();
    let api = Api::new()
        .release("1.0.0")
        .unwrap()
        .release("2.1.0")
        .unwrap()
        .release("3.0.1")
        .unwrap()
        .rest(vegetables)
        .rest(farmers)
        .into_router()
        .unwrap();
    Router::new().nest("/api", api)
}

async fn get_versioned(app: &Router, uri: &str, range: &str) -> common::Reply {
    let request = Request::builder()
        .uri(uri)
        .header("api-version", range)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

#[tokio::test]
async fn test_version_resolution() {
    let fixture = fixture(false);
    let app = versioned(&fixture);

    let reply = get_versioned(&app, "/api/vegetables", "*").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("api-version"), Some("1.0.0"));
    assert_eq!(reply.header("vary"), Some("API-Version"));

    let reply = get_versioned(&app, "/api/farmers", "^3").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("api-version"), Some("3.0.1"));
    assert_eq!(names(&reply.json()), vec!["Ada"]);

    let reply = get(&app, "/api/farmers").await;
    assert_eq!(reply.header("api-version"), Some("3.0.1"));

    let reply = get_versioned(&app, "/api/vegetables", "^3").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = get_versioned(&app, "/api/vegetables", "two").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = get_versioned(&app, "/api/vegetables", ">=4").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_names(), vec!["BadRequest"]);
}

#[tokio::test]
async fn test_empty_collection_status() {
    let fixture = fixture(false);
    let nothing = format!("/api/vegetables?conditions={}", common::q(r#"{"color":"blue"}"#));

    let ok = app(builder(&fixture.vegetables).empty_collection(200).build().unwrap());
    let reply = get(&ok, &nothing).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!([]));

    let no_content = app(builder(&fixture.vegetables).empty_collection(204).build().unwrap());
    let reply = get(&no_content, &nothing).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert!(reply.body.is_empty());

    let not_found = app(builder(&fixture.vegetables).empty_collection(404).build().unwrap());
    let reply = get(&not_found, &nothing).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.error_names(), vec!["NotFound"]);
}

#[tokio::test]
async fn test_unhandled_errors_keep_status() {
    let fixture = fixture(false);
    let app = app(builder(&fixture.vegetables).handle_errors(false).build().unwrap());

    let reply = get(&app, "/api/vegetables?limit=0").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        String::from_utf8(reply.body.to_vec()).unwrap(),
        "Limit must be a positive integer if set"
    );
}

#[tokio::test]
async fn test_middleware_can_halt() {
    let fixture = fixture(false);
    let guard = middleware(|ctx| {
        async move {
            if ctx.header("x-api-key") != Some("let-me-in") {
                ctx.halt(StatusCode::UNAUTHORIZED, json!({"message": "Missing API key"}));
            }
            Ok::<(), ApiError>(())
        }
        .boxed()
    });
    let app = app(builder(&fixture.vegetables).request(None, Some("post"), guard).build().unwrap());

    let reply = post(&app, "/api/vegetables", &json!({"name": "Leek"})).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.json()["message"], "Missing API key");
    assert_eq!(fixture.vegetables.documents().len(), 4);

    let request = Request::builder()
        .method("POST")
        .uri("/api/vegetables")
        .header("content-type", "application/json")
        .header("x-api-key", "let-me-in")
        .body(Body::from(json!({"name": "Leek"}).to_string()))
        .unwrap();
    assert_eq!(send(&app, request).await.status, StatusCode::CREATED);

    let reply = get(&app, "/api/vegetables").await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn test_middleware_errors_are_translated() {
    let fixture = fixture(false);
    let refuse = middleware(|_ctx| async move { Err::<(), _>(ApiError::forbidden("Read-only on Sundays")) }.boxed());
    let app = app(
        builder(&fixture.vegetables)
            .find_by("name")
            .request(Some("instance"), Some("put"), refuse)
            .build()
            .unwrap(),
    );

    let reply = common::put(&app, "/api/vegetables/Kale", &json!({"color": "gold"}), None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.json()[0]["message"], "Read-only on Sundays");
    let kale = fixture.vegetables.documents().into_iter().find(|d| d["name"] == "Kale").unwrap();
    assert_eq!(kale["color"], "green");
}

#[tokio::test]
async fn test_pipelines() {
    let fixture = fixture(false);
    let pipelines = middleware(|ctx| {
        async move {
            ctx.incoming.map(|mut envelope: Envelope| {
                if let Some(incoming) = envelope.incoming.as_mut() {
                    incoming["color"] = json!("unknown");
                }
                Ok(envelope)
            });
            ctx.outgoing
                .filter(|envelope: &Envelope| envelope.doc.as_ref().is_some_and(|d| d["color"] != "red"))
                .map(|mut envelope: Envelope| {
                    if let Some(doc) = envelope.doc.as_mut() {
                        doc["served"] = json!(true);
                    }
                    Ok(envelope)
                });
            Ok::<(), ApiError>(())
        }
        .boxed()
    });
    let app = app(builder(&fixture.vegetables).sort("name").request(None, None, pipelines).build().unwrap());

    let reply = get(&app, "/api/vegetables").await;
    let body = reply.json();
    assert_eq!(names(&body), vec!["Carrot", "Kale", "Spinach"]);
    assert!(body.as_array().unwrap().iter().all(|d| d["served"] == true));

    let reply = post(&app, "/api/vegetables", &json!({"name": "Leek", "color": "white"})).await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.json()["color"], "unknown");

    // counts skip the outgoing pipeline
    let reply = get(&app, "/api/vegetables?count=true").await;
    assert_eq!(reply.json(), json!(5));
}

#[tokio::test]
async fn test_unknown_fragment_is_not_routed() {
    let fixture = fixture(false);
    let app = app(builder(&fixture.vegetables).build().unwrap());
    let reply = get(&app, "/api/minerals").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_find_by_must_be_unique() {
    let fixture = fixture(false);
    for path in ["color", "calories", "tags", "missing"] {
        let result = builder(&fixture.vegetables).find_by(path).build();
        assert!(result.is_err(), "{path}");
    }
    assert!(builder(&fixture.vegetables).find_by("name").build().is_ok());
}

#[tokio::test]
async fn test_misconfigured_routes() {
    let fixture = fixture(false);
    let noop = middleware(|_ctx| async move { Ok::<(), ApiError>(()) }.boxed());

    let bad_stage = builder(&fixture.vegetables).route("later", None, None, vec![noop.clone()]).build();
    assert!(bad_stage.is_err());

    let bad_endpoint = builder(&fixture.vegetables).request(Some("member"), None, noop.clone()).build();
    assert!(bad_endpoint.is_err());

    let bad_methods = builder(&fixture.vegetables).request(None, Some("patch"), noop.clone()).build();
    assert!(bad_methods.is_err());

    let no_middleware = builder(&fixture.vegetables).route("request", None, None, Vec::new()).build();
    assert!(no_middleware.is_err());

    let bad_range = builder(&fixture.vegetables).versions("one point oh").build();
    assert!(bad_range.is_err());
}
