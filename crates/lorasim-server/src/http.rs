// ── Control-plane router ──
//
// REST surface over the pool. Every route runs under a 5-second
// timeout that aborts the response, not the in-flight LoRaWAN work.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use lorasim_core::{CoreError, Pool};

use crate::handlers::{devices, gateways, networkservers};

const HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

pub fn router(pool: Arc<Pool>) -> Router {
    Router::new()
        .route(
            "/network-servers",
            get(networkservers::list).post(networkservers::create),
        )
        .route(
            "/network-servers/:name",
            get(networkservers::get_one).delete(networkservers::delete),
        )
        .route(
            "/network-servers/:name/gateways",
            get(gateways::list).post(gateways::create),
        )
        .route(
            "/network-servers/:name/gateways/:eui",
            get(gateways::get_one).delete(gateways::delete),
        )
        .route(
            "/network-servers/:name/gateways/:eui/connect",
            post(gateways::connect),
        )
        .route(
            "/network-servers/:name/gateways/:eui/disconnect",
            post(gateways::disconnect),
        )
        .route(
            "/network-servers/:name/devices",
            get(devices::list).post(devices::create),
        )
        .route(
            "/network-servers/:name/devices/:eui",
            get(devices::get_one).delete(devices::delete),
        )
        .route(
            "/network-servers/:name/devices/:eui/join",
            post(devices::join),
        )
        .route(
            "/network-servers/:name/devices/:eui/uplink",
            post(devices::uplink),
        )
        .layer(middleware::from_fn(timeout_layer))
        .with_state(pool)
}

/// Abort responses that exceed the handler budget with 504. The
/// underlying operation keeps running to completion.
async fn timeout_layer(request: Request, next: Next) -> Response {
    match tokio::time::timeout(HANDLER_TIMEOUT, next.run(request)).await {
        Ok(response) => response,
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({"message": "request timeout"})),
        )
            .into_response(),
    }
}

/// Error envelope shared by every handler.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            err if err.is_validation() => StatusCode::BAD_REQUEST,
            err if err.is_not_found() => StatusCode::NOT_FOUND,
            err if err.is_conflict() => StatusCode::CONFLICT,
            CoreError::Integration(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"message": self.0.to_string()}))).into_response()
    }
}
