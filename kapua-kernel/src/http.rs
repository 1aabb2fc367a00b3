/**
 * API REST KAPUA KERNEL - Front door HTTP du catalogue de ressources
 *
 * RÔLE :
 * Exposer les ressources (`kapua://devices`, `kapua://fleet-health`) aux
 * outils externes qui ne parlent pas directement à Kapua.
 *
 * ROUTES :
 * - GET /health                  : liveness, toujours accessible
 * - GET /resources               : catalogue
 * - GET /resources/read?uri=...  : contenu d'une ressource
 *
 * SÉCURITÉ :
 * - Si une API key est configurée, header x-api-key obligatoire sur toutes
 *   les routes sauf /health
 */

use crate::error::KapuaError;
use crate::resources::{KapuaResources, ResourceContents, ResourceDescriptor};
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub resources: KapuaResources,
    pub api_key: Option<Arc<str>>,
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    uri: String,
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    if !ok {
        warn!("rejected request to {} without valid api key", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/resources", get(list_resources))
        .route("/resources/read", get(read_resource))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

fn status_for(err: &KapuaError) -> StatusCode {
    match err {
        KapuaError::UnknownResource(_) => StatusCode::NOT_FOUND,
        KapuaError::InvalidResourceUri(_) => StatusCode::BAD_REQUEST,
        KapuaError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}

// GET /resources
async fn list_resources(State(app): State<AppState>) -> Json<Vec<ResourceDescriptor>> {
    Json(app.resources.list_resources())
}

// GET /resources/read?uri=kapua://...
async fn read_resource(
    State(app): State<AppState>,
    Query(params): Query<ReadParams>,
) -> Result<Json<ResourceContents>, Response> {
    match app.resources.read_resource(&params.uri).await {
        Ok(contents) => Ok(Json(contents)),
        Err(e) => {
            warn!("resource read failed for {}: {e}", params.uri);
            let body = Json(serde_json::json!({ "error": e.to_string() }));
            Err((status_for(&e), body).into_response())
        }
    }
}
