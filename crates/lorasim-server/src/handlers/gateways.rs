//! Gateway handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use lorasim_core::{GatewayInfo, Pool};
use lorasim_integration::{Location, RemoteGateway};

use crate::http::ApiError;

use super::{lookup_ns, parse_eui};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGateway {
    pub eui: String,
    pub discovery_uri: String,
    /// Extra headers for the LNS dial, e.g. an Authorization bearer.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

pub async fn list(
    State(pool): State<Arc<Pool>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<GatewayInfo>>, ApiError> {
    Ok(Json(lookup_ns(&pool, &name)?.list_gateways()))
}

pub async fn create(
    State(pool): State<Arc<Pool>>,
    Path(name): Path<String>,
    Json(body): Json<CreateGateway>,
) -> Result<(StatusCode, Json<GatewayInfo>), ApiError> {
    let ns = lookup_ns(&pool, &name)?;
    let eui = parse_eui(&body.eui)?;

    let location = match (body.latitude, body.longitude) {
        (Some(latitude), Some(longitude)) => Some(Location {
            latitude,
            longitude,
        }),
        _ => None,
    };

    let gateway = ns.add_gateway(RemoteGateway {
        eui,
        discovery_uri: body.discovery_uri,
        location,
        headers: body.headers.into_iter().collect(),
    })?;
    Ok((StatusCode::CREATED, Json(gateway.info())))
}

pub async fn get_one(
    State(pool): State<Arc<Pool>>,
    Path((name, eui)): Path<(String, String)>,
) -> Result<Json<GatewayInfo>, ApiError> {
    let ns = lookup_ns(&pool, &name)?;
    let gateway = ns.get_gateway(parse_eui(&eui)?)?;
    Ok(Json(gateway.info()))
}

pub async fn delete(
    State(pool): State<Arc<Pool>>,
    Path((name, eui)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    lookup_ns(&pool, &name)?.remove_gateway(parse_eui(&eui)?)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn connect(
    State(pool): State<Arc<Pool>>,
    Path((name, eui)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let gateway = lookup_ns(&pool, &name)?.get_gateway(parse_eui(&eui)?)?;
    gateway.connect().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn disconnect(
    State(pool): State<Arc<Pool>>,
    Path((name, eui)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let gateway = lookup_ns(&pool, &name)?.get_gateway(parse_eui(&eui)?)?;
    gateway.disconnect().await?;
    Ok(StatusCode::NO_CONTENT)
}
