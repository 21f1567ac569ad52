use axum::http::StatusCode;
use serde_json::{Value, json};

mod common;
use common::{app, builder, delete, fixture, get, put, q};

fn stored(fixture: &common::Fixture, name: &str) -> Value {
    fixture
        .vegetables
        .documents()
        .into_iter()
        .find(|d| d["name"] == name)
        .unwrap_or(Value::Null)
}

#[tokio::test]
async fn test_update_merges_document() {
    let fixture = fixture(false);
    let app = app(builder(&fixture.vegetables).find_by("name").build().unwrap());

    let reply = put(&app, "/api/vegetables/Kale", &json!({"color": "purple"}), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let body = reply.json();
    assert_eq!(body["color"], "purple");
    assert_eq!(body["calories"], 49);
    assert!(body.get("secret").is_none());

    let kale = stored(&fixture, "Kale");
    assert_eq!(kale["color"], "purple");
    assert_eq!(kale["secret"], "k");
}

#[tokio::test]
async fn test_update_rejects_mismatched_lookup_key() {
    let fixture = fixture(false);
    let app = app(builder(&fixture.vegetables).find_by("name").build().unwrap());

    let reply = put(&app, "/api/vegetables/Kale", &json!({"name": "Cabbage"}), None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(stored(&fixture, "Kale")["name"], "Kale");
}

#[tokio::test]
async fn test_update_body_shape() {
    let fixture = fixture(false);
    let app = app(builder(&fixture.vegetables).find_by("name").build().unwrap());

    let reply = put(&app, "/api/vegetables/Kale", &json!([{"color": "a"}, {"color": "b"}]), None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);

    let reply = put(&app, "/api/vegetables/Kale", &json!([]), None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);

    let reply = put(&app, "/api/vegetables/Kale", &json!({"calories": "many"}), None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.json()[0]["path"], "calories");
}

#[tokio::test]
async fn test_update_missing_and_collection() {
    let fixture = fixture(false);
    let app = app(builder(&fixture.vegetables).find_by("name").build().unwrap());

    let reply = put(&app, "/api/vegetables/Turnip", &json!({"color": "white"}), None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = put(&app, "/api/vegetables", &json!({"color": "white"}), None).await;
    assert_eq!(reply.status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_update_unique_collision() {
    let fixture = fixture(false);
    let app = app(builder(&fixture.vegetables).build().unwrap());
    let id = stored(&fixture, "Kale")["_id"].as_str().unwrap().to_string();

    let reply = put(&app, &format!("/api/vegetables/{id}"), &json!({"name": "Radish"}), None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.json()[0]["message"], "Path `name` (Radish) must be unique.");
}

#[tokio::test]
async fn test_optimistic_locking() {
    let fixture = fixture(true);
    let app = app(builder(&fixture.vegetables).find_by("name").build().unwrap());

    let reply = put(&app, "/api/vegetables/Kale", &json!({"color": "purple"}), None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);

    let reply = put(&app, "/api/vegetables/Kale", &json!({"color": "purple", "__v": 0}), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["__v"], 1);
    assert_eq!(stored(&fixture, "Kale")["__v"], 1);

    let reply = put(&app, "/api/vegetables/Kale", &json!({"color": "blue", "__v": 0}), None).await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.error_names(), vec!["LockConflict"]);
    assert_eq!(stored(&fixture, "Kale")["color"], "purple");

    let reply = put(&app, "/api/vegetables/Kale", &json!({"color": "blue", "__v": 1}), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(stored(&fixture, "Kale")["__v"], 2);
}

#[tokio::test]
async fn test_locking_requires_selected_version() {
    let fixture = fixture(true);
    let hidden_version = app(builder(&fixture.vegetables).find_by("name").select("-__v").build().unwrap());

    let reply = put(&hidden_version, "/api/vegetables/Kale", &json!({"color": "purple", "__v": 0}), None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(stored(&fixture, "Kale")["color"], "green");

    let app = app(builder(&fixture.vegetables).find_by("name").build().unwrap());
    let reply = put(&app, "/api/vegetables/Kale?select=name", &json!({"color": "purple", "__v": 0}), None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = put(&app, "/api/vegetables/Kale", &json!({"color": "purple", "__v": 0}), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(stored(&fixture, "Kale")["color"], "purple");
}

#[tokio::test]
async fn test_operator_whitelist() {
    let fixture = fixture(false);
    let app = app(
        builder(&fixture.vegetables)
            .find_by("name")
            .operators("$push $addToSet", &["tags"])
            .build()
            .unwrap(),
    );

    let reply = put(&app, "/api/vegetables/Kale", &json!({"tags": "bitter"}), Some("$push")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["tags"], json!(["leafy", "bitter"]));

    let reply = put(&app, "/api/vegetables/Kale", &json!({"tags": "leafy"}), Some("$addToSet")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(stored(&fixture, "Kale")["tags"], json!(["leafy", "bitter"]));

    let reply = put(&app, "/api/vegetables/Kale", &json!({"color": "gold"}), Some("$push")).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = put(&app, "/api/vegetables/Kale", &json!({"tags": "leafy"}), Some("$pull")).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = put(&app, "/api/vegetables/Kale", &json!({"tags": "x"}), Some("$rename")).await;
    assert_eq!(reply.status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_operator_update_with_locking() {
    let fixture = fixture(true);
    let app = app(
        builder(&fixture.vegetables)
            .find_by("name")
            .operators("$set", &["color"])
            .build()
            .unwrap(),
    );

    let reply = put(&app, "/api/vegetables/Kale", &json!({"color": "gold"}), Some("$set")).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);

    let reply = put(&app, "/api/vegetables/Kale", &json!({"color": "gold", "__v": 0}), Some("$set")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["color"], "gold");
    assert_eq!(stored(&fixture, "Kale")["__v"], 1);

    let reply = put(&app, "/api/vegetables/Kale", &json!({"color": "teal", "__v": 0}), Some("$set")).await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(stored(&fixture, "Kale")["color"], "gold");

    let reply = put(&app, "/api/vegetables/Turnip", &json!({"color": "teal", "__v": 0}), Some("$set")).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let excluded = q(r#"{"color":"green"}"#);
    let uri = format!("/api/vegetables/Kale?conditions={excluded}");
    let reply = put(&app, &uri, &json!({"color": "teal", "__v": 1}), Some("$set")).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(stored(&fixture, "Kale")["color"], "gold");
}

#[tokio::test]
async fn test_delete() {
    let fixture = fixture(false);
    let app = app(builder(&fixture.vegetables).find_by("name").build().unwrap());

    let reply = delete(&app, "/api/vegetables/Kale").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!(1));
    assert!(stored(&fixture, "Kale").is_null());

    let reply = delete(&app, "/api/vegetables/Kale").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let conditions = q(r#"{"tags":"root"}"#);
    let reply = delete(&app, &format!("/api/vegetables?conditions={conditions}")).await;
    assert_eq!(reply.json(), json!(2));
    assert_eq!(fixture.vegetables.documents().len(), 1);
}

#[tokio::test]
async fn test_delete_ignores_requested_projection() {
    let fixture = fixture(false);
    let app = app(builder(&fixture.vegetables).build().unwrap());

    let reply = delete(&app, "/api/vegetables?select=-_id").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!(4));
    assert!(fixture.vegetables.documents().is_empty());

    let reply = delete(&app, "/api/vegetables?select=name").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!([]));
}

#[tokio::test]
async fn test_disabled_methods() {
    let fixture = fixture(false);
    let app = app(
        builder(&fixture.vegetables)
            .find_by("name")
            .methods("put delete", false)
            .build()
            .unwrap(),
    );

    let reply = delete(&app, "/api/vegetables/Kale").await;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(reply.header("allow"), Some("HEAD,GET,POST"));

    let reply = put(&app, "/api/vegetables/Kale", &json!({"color": "gold"}), None).await;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);

    let reply = get(&app, "/api/vegetables/Kale").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("allow"), Some("HEAD,GET,POST"));
}
