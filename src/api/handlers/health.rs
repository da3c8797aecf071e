use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

use crate::{GIT_COMMIT_HASH, api::AppState, search::SyncStats};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
    kv: String,
    search_sync: SyncStats,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Database and key-value store are healthy", body = Health),
        (status = 503, description = "Database or key-value store is unhealthy", body = Health)
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let database = match state.store.ping().await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("Failed to ping database: {}", err);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    let kv = match state.kv.ping().await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("Failed to ping key-value store: {}", err);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    let status = |result: &Result<(), StatusCode>| {
        if result.is_ok() { "ok" } else { "error" }.to_string()
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: status(&database),
        kv: status(&kv),
        search_sync: state.publications.sync().stats(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    if database.is_ok() && kv.is_ok() {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}
