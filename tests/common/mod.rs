#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use crudline::model::{MemoryModel, Model, PathInfo, Schema};
use crudline::{Api, Controller, ControllerBuilder};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

pub struct Fixture {
    pub vegetables: Arc<MemoryModel>,
    pub farmers: Arc<MemoryModel>,
    pub farmer_id: String,
}

pub fn vegetable_schema(locking: bool) -> Schema {
    Schema::builder("vegetable")
        .path("name", PathInfo::string().required().unique())
        .path("color", PathInfo::string())
        .path("calories", PathInfo::number())
        .path("tags", PathInfo::array())
        .path("secret", PathInfo::string().deselected())
        .path("farmer", PathInfo::object_id().reference("farmers"))
        .last_modified("lastModified")
        .locking(locking)
        .build()
}

/// Four vegetables grown by one farmer
pub fn fixture(locking: bool) -> Fixture {
    let farmers = Arc::new(MemoryModel::new(
        Schema::builder("farmer")
            .path("name", PathInfo::string().required())
            .path("ssn", PathInfo::string().deselected())
            .build(),
    ));
    let farmer = farmers
        .seed([json!({"name": "Ada", "ssn": "000-00-0000"})])
        .expect("Failed to seed farmers");
    let farmer_id = farmer[0]["_id"].as_str().unwrap().to_string();

    let vegetables = Arc::new(
        MemoryModel::new(vegetable_schema(locking))
            .with_index(["color", "name"])
            .with_reference("farmer", Arc::clone(&farmers)),
    );
    vegetables
        .seed([
            json!({"name": "Kale", "color": "green", "calories": 49, "tags": ["leafy"], "secret": "k", "farmer": farmer_id, "lastModified": "2024-01-01T00:00:00Z"}),
            json!({"name": "Radish", "color": "red", "calories": 16, "tags": ["root"], "secret": "r", "farmer": farmer_id, "lastModified": "2024-03-01T00:00:00Z"}),
            json!({"name": "Carrot", "color": "orange", "calories": 41, "tags": ["root"], "secret": "c", "farmer": farmer_id, "lastModified": "2024-02-01T00:00:00Z"}),
            json!({"name": "Spinach", "color": "green", "calories": 23, "tags": ["leafy"], "secret": "s", "farmer": farmer_id, "lastModified": "2024-01-15T00:00:00Z"}),
        ])
        .expect("Failed to seed vegetables");

    Fixture {
        vegetables,
        farmers,
        farmer_id,
    }
}

pub fn builder(model: &Arc<MemoryModel>) -> ControllerBuilder {
    let model: Arc<dyn Model> = Arc::clone(model) as Arc<dyn Model>;
    Controller::builder(model)
}

/// Mount `controller` under `/api` with a single release
pub fn app(controller: Controller) -> Router {
    let api = Api::new()
        .release("1.0.0")
        .expect("valid release")
        .rest(controller)
        .into_router()
        .expect("Failed to build router");
    Router::new().nest("/api", api)
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            panic!("Body was not JSON ({e}): {}", String::from_utf8_lossy(&self.body))
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Names of the entries of an error body
    pub fn error_names(&self) -> Vec<String> {
        self.json()
            .as_array()
            .expect("error bodies are arrays")
            .iter()
            .map(|e| e["name"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> Reply {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    Reply { status, headers, body }
}

pub async fn get(app: &Router, uri: &str) -> Reply {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

pub async fn post(app: &Router, uri: &str, body: &Value) -> Reply {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn put(app: &Router, uri: &str, body: &Value, operator: Option<&str>) -> Reply {
    let mut request = Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(operator) = operator {
        request = request.header("update-operator", operator);
    }
    send(app, request.body(Body::from(body.to_string())).unwrap()).await
}

pub async fn delete(app: &Router, uri: &str) -> Reply {
    send(app, Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap()).await
}

/// Percent-encode a query string value
pub fn q(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

pub fn names(body: &Value) -> Vec<&str> {
    body.as_array()
        .expect("expected an array")
        .iter()
        .map(|d| d["name"].as_str().unwrap_or_default())
        .collect()
}
