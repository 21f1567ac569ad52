//! Vegetable Garden
//!
//! Serves two in-memory collections through a versioned API:
//!
//! ```bash
//! cargo run --example vegetables
//! curl localhost:3000/api/vegetables?sort=-calories&select=name%20calories
//! curl -H 'Accept: application/x-ndjson' localhost:3000/api/vegetables
//! curl -H 'API-Version: ~2' localhost:3000/api/farmers
//! curl 'localhost:3000/api/vegetables/Kale?populate=farmer'
//! curl -X PUT -H 'Content-Type: application/json' -H 'Update-Operator: $push' \
//!      -d '{"tags":"bitter"}' localhost:3000/api/vegetables/Kale
//! ```

use axum::Router;
use crudline::model::{MemoryModel, Model, PathInfo, Schema};
use crudline::{Api, ApiError, Controller, Envelope, middleware};
use futures::FutureExt;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Models
// ============================================================================

fn farmers() -> Result<Arc<MemoryModel>, Box<dyn std::error::Error>> {
    let model = Arc::new(MemoryModel::new(
        Schema::builder("farmer")
            .path("name", PathInfo::string().required().unique())
            .path("ssn", PathInfo::string().deselected())
            .build(),
    ));
    model.seed([
        json!({"name": "Ada", "ssn": "000-00-0000"}),
        json!({"name": "Grace", "ssn": "111-11-1111"}),
    ])?;
    Ok(model)
}

fn vegetables(farmers: &Arc<MemoryModel>) -> Result<Arc<MemoryModel>, Box<dyn std::error::Error>> {
    let farmer = farmers.documents()[0]["_id"].clone();
    let model = Arc::new(
        MemoryModel::new(
            Schema::builder("vegetable")
                .path("name", PathInfo::string().required().unique())
                .path("color", PathInfo::string())
                .path("calories", PathInfo::number())
                .path("tags", PathInfo::array())
                .path("farmer", PathInfo::object_id().reference("farmers"))
                .last_modified("lastModified")
                .locking(true)
                .build(),
        )
        .with_index(["color", "name"])
        .with_reference("farmer", Arc::clone(farmers)),
    );
    model.seed([
        json!({"name": "Kale", "color": "green", "calories": 49, "tags": ["leafy"], "farmer": farmer}),
        json!({"name": "Radish", "color": "red", "calories": 16, "tags": ["root"], "farmer": farmer}),
        json!({"name": "Carrot", "color": "orange", "calories": 41, "tags": ["root"], "farmer": farmer}),
    ])?;
    Ok(model)
}

// ============================================================================
// Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let farmers = farmers()?;
    let vegetables = vegetables(&farmers)?;

    // Stamp every outgoing vegetable with the time it was served
    let stamp = middleware(|ctx| {
        async move {
            ctx.outgoing.map(|mut envelope: Envelope| {
                if let Some(doc) = envelope.doc.as_mut() {
                    doc["servedAt"] = json!(chrono::Utc::now().to_rfc3339());
                }
                Ok(envelope)
            });
            Ok::<(), ApiError>(())
        }
        .boxed()
    });

    let vegetable_controller = Controller::builder(Arc::clone(&vegetables) as Arc<dyn Model>)
        .find_by("name")
        .sort("name")
        .hints(true)
        .operators("$push $addToSet $pull", &["tags"])
        .request(None, Some("head get"), stamp)
        .build()?;
    let farmer_controller = Controller::builder(Arc::clone(&farmers) as Arc<dyn Model>)
        .versions(">=2")
        .build()?;

    let api = Api::new()
        .release("1.0.0")?
        .release("2.0.0")?
        .rest(vegetable_controller)
        .rest(farmer_controller)
        .into_router()?;
    let app = Router::new().nest("/api", api);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("API: http://0.0.0.0:3000/api/vegetables");
    axum::serve(listener, app).await?;
    Ok(())
}
