//! Network-server instance handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use lorasim_core::{NsInfo, Pool};
use lorasim_integration::NsConfig;

use crate::http::ApiError;

use super::lookup_ns;

#[derive(Debug, Deserialize)]
pub struct CreateNs {
    pub name: String,
    #[serde(default)]
    pub config: NsConfig,
}

pub async fn list(State(pool): State<Arc<Pool>>) -> Json<Vec<NsInfo>> {
    Json(pool.list().iter().map(|ns| ns.info()).collect())
}

pub async fn create(
    State(pool): State<Arc<Pool>>,
    Json(body): Json<CreateNs>,
) -> Result<(StatusCode, Json<NsInfo>), ApiError> {
    let ns = pool.add(&body.name, body.config).await?;
    Ok((StatusCode::CREATED, Json(ns.info())))
}

pub async fn get_one(
    State(pool): State<Arc<Pool>>,
    Path(name): Path<String>,
) -> Result<Json<NsInfo>, ApiError> {
    Ok(Json(lookup_ns(&pool, &name)?.info()))
}

pub async fn delete(
    State(pool): State<Arc<Pool>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    pool.remove(&name)?;
    Ok(StatusCode::NO_CONTENT)
}
