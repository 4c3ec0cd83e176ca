//! Device handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use lorasim_core::{CoreError, DeviceInfo, Pool};
use lorasim_integration::{Location, RemoteDevice};
use lorasim_lorawan::{Aes128Key, DevAddr, DevNonce};

use crate::http::ApiError;

use super::{lookup_ns, parse_eui};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDevice {
    pub dev_eui: String,
    pub join_eui: String,
    pub app_key: String,
    #[serde(default)]
    pub dev_nonce: Option<u16>,
    #[serde(default)]
    pub dev_addr: Option<String>,
    #[serde(default)]
    pub app_s_key: Option<String>,
    #[serde(default)]
    pub nwk_s_key: Option<String>,
    #[serde(default)]
    pub fcnt_up: Option<u32>,
    #[serde(default)]
    pub fcnt_dn: Option<u32>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl CreateDevice {
    fn into_spec(self) -> Result<RemoteDevice, ApiError> {
        let dev_eui = parse_eui(&self.dev_eui)?;
        let join_eui = parse_eui(&self.join_eui)?;
        let app_key: Aes128Key = self
            .app_key
            .parse()
            .map_err(|_| ApiError(CoreError::BadKey(self.app_key.clone())))?;

        let mut spec = RemoteDevice::new(dev_eui, join_eui, app_key);
        if let Some(nonce) = self.dev_nonce {
            spec.dev_nonce = DevNonce(nonce);
        }
        if let Some(text) = &self.dev_addr {
            spec.dev_addr = text
                .parse::<DevAddr>()
                .map_err(|_| ApiError(CoreError::BadDevAddr(text.clone())))?;
        }
        if let Some(text) = &self.app_s_key {
            spec.app_s_key = text
                .parse()
                .map_err(|_| ApiError(CoreError::BadKey(text.clone())))?;
        }
        if let Some(text) = &self.nwk_s_key {
            spec.nwk_s_key = text
                .parse()
                .map_err(|_| ApiError(CoreError::BadKey(text.clone())))?;
        }
        spec.fcnt_up = self.fcnt_up.unwrap_or(0);
        spec.fcnt_dn = self.fcnt_dn.unwrap_or(0);
        if let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) {
            spec.location = Some(Location {
                latitude,
                longitude,
            });
        }
        Ok(spec)
    }
}

pub async fn list(
    State(pool): State<Arc<Pool>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<DeviceInfo>>, ApiError> {
    Ok(Json(lookup_ns(&pool, &name)?.list_devices()))
}

pub async fn create(
    State(pool): State<Arc<Pool>>,
    Path(name): Path<String>,
    Json(body): Json<CreateDevice>,
) -> Result<(StatusCode, Json<DeviceInfo>), ApiError> {
    let ns = lookup_ns(&pool, &name)?;
    let device = ns.add_device(body.into_spec()?)?;
    Ok((StatusCode::CREATED, Json(device.info())))
}

pub async fn get_one(
    State(pool): State<Arc<Pool>>,
    Path((name, eui)): Path<(String, String)>,
) -> Result<Json<DeviceInfo>, ApiError> {
    let ns = lookup_ns(&pool, &name)?;
    let device = ns.get_device(parse_eui(&eui)?)?;
    Ok(Json(device.info()))
}

pub async fn delete(
    State(pool): State<Arc<Pool>>,
    Path((name, eui)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    lookup_ns(&pool, &name)?.remove_device(parse_eui(&eui)?)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn join(
    State(pool): State<Arc<Pool>>,
    Path((name, eui)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    lookup_ns(&pool, &name)?.send_join_request(parse_eui(&eui)?)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn uplink(
    State(pool): State<Arc<Pool>>,
    Path((name, eui)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    lookup_ns(&pool, &name)?.send_uplink(parse_eui(&eui)?)?;
    Ok(StatusCode::NO_CONTENT)
}
