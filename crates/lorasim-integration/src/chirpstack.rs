// ChirpStack v4 adapter.
//
// Walks tenant → application → device, fetching per-device detail and
// key documents; gateways come from the instance-wide listing. Talks
// to the REST mirror of the ChirpStack API with a bearer token. The
// discovery URI is the API host rewritten to the Basics Station
// listener on port 3001.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use lorasim_lorawan::{Aes128Key, Eui64};

use crate::{transport, Integration, IntegrationError, Location, RemoteDevice, RemoteGateway};

const VENDOR: &str = "ChirpStack";
const PAGE_LIMIT: usize = 100;

pub struct ChirpStackClient {
    base_url: String,
    http: reqwest::Client,
}

impl ChirpStackClient {
    pub fn new(base_url: &str, api_token: &str) -> Result<Self, IntegrationError> {
        url::Url::parse(base_url)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: transport::build_client(Some(&format!("Bearer {api_token}")))?,
        })
    }

    /// Rewrite the API URL to the Basics Station endpoint:
    /// scheme → ws(s), path and port dropped, port 3001 appended.
    fn discovery_uri(&self) -> String {
        let secure = self.base_url.starts_with("https://");
        let mut host = self
            .base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        if let Some(idx) = host.find('/') {
            host = &host[..idx];
        }
        let host = match host.rfind(':') {
            Some(idx) => &host[..idx],
            None => host,
        };
        let scheme = if secure { "wss" } else { "ws" };
        format!("{scheme}://{host}:3001")
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path_and_query: &str,
    ) -> Result<T, IntegrationError> {
        let url = format!("{}{path_and_query}", self.base_url);
        debug!(%url, "GET");
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IntegrationError::UnexpectedStatus {
                vendor: VENDOR,
                status: status.as_u16(),
            });
        }
        response.json().await.map_err(|e| IntegrationError::Decode {
            vendor: VENDOR,
            message: e.to_string(),
        })
    }

    async fn list_tenant_ids(&self) -> Result<Vec<String>, IntegrationError> {
        let mut ids = Vec::new();
        let mut offset = 0usize;
        loop {
            let page: ListResponse<TenantEntry> = self
                .get_json(&format!("/api/tenants?limit={PAGE_LIMIT}&offset={offset}"))
                .await?;
            let n = page.result.len();
            ids.extend(page.result.into_iter().map(|t| t.id));
            if n < PAGE_LIMIT {
                break;
            }
            offset += PAGE_LIMIT;
        }
        Ok(ids)
    }

    async fn list_application_ids(&self, tenant_id: &str) -> Result<Vec<String>, IntegrationError> {
        let mut ids = Vec::new();
        let mut offset = 0usize;
        loop {
            let page: ListResponse<ApplicationEntry> = self
                .get_json(&format!(
                    "/api/applications?tenantId={tenant_id}&limit={PAGE_LIMIT}&offset={offset}"
                ))
                .await?;
            let n = page.result.len();
            ids.extend(page.result.into_iter().map(|a| a.id));
            if n < PAGE_LIMIT {
                break;
            }
            offset += PAGE_LIMIT;
        }
        Ok(ids)
    }

    async fn application_devices(
        &self,
        application_id: &str,
        out: &mut Vec<RemoteDevice>,
    ) -> Result<(), IntegrationError> {
        let mut offset = 0usize;
        loop {
            let page: ListResponse<DeviceEntry> = self
                .get_json(&format!(
                    "/api/devices?applicationId={application_id}&limit={PAGE_LIMIT}&offset={offset}"
                ))
                .await?;
            let n = page.result.len();

            for dev in page.result {
                let Ok(dev_eui) = dev.dev_eui.parse::<Eui64>() else {
                    warn!(deveui = %dev.dev_eui, "skipping device with invalid EUI");
                    continue;
                };

                // Detail document carries the JoinEUI.
                let detail: DeviceDetailResponse = match self
                    .get_json(&format!("/api/devices/{}", dev.dev_eui))
                    .await
                {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(device = %dev_eui, error = %e, "failed to get device details");
                        continue;
                    }
                };
                let Ok(join_eui) = detail.device.join_eui.parse::<Eui64>() else {
                    warn!(device = %dev_eui, "skipping device with invalid JoinEUI");
                    continue;
                };

                // Keys may be unreadable; the device then has to join
                // with whatever key the operator provisions locally.
                let mut app_key = Aes128Key::default();
                match self
                    .get_json::<DeviceKeysResponse>(&format!("/api/devices/{}/keys", dev.dev_eui))
                    .await
                {
                    // ChirpStack stores the LoRaWAN 1.0.x root key in
                    // the nwk_key slot.
                    Ok(keys) => match keys.device_keys.nwk_key.parse() {
                        Ok(key) => app_key = key,
                        Err(_) => warn!(device = %dev_eui, "invalid root key, using zero value"),
                    },
                    Err(e) => warn!(device = %dev_eui, error = %e, "failed to get device keys"),
                }

                debug!(device = %dev_eui, "found device");
                // Session state is not exposed; devices join fresh.
                out.push(RemoteDevice::new(dev_eui, join_eui, app_key));
            }

            if n < PAGE_LIMIT {
                break;
            }
            offset += PAGE_LIMIT;
        }
        Ok(())
    }
}

#[async_trait]
impl Integration for ChirpStackClient {
    async fn list_gateways(&self) -> Result<Vec<RemoteGateway>, IntegrationError> {
        let discovery_uri = self.discovery_uri();
        debug!(%discovery_uri, "discovery URI");

        let mut gateways = Vec::new();
        let mut offset = 0usize;
        loop {
            let page: ListResponse<GatewayEntry> = self
                .get_json(&format!("/api/gateways?limit={PAGE_LIMIT}&offset={offset}"))
                .await?;
            let n = page.result.len();

            for gw in page.result {
                let Ok(eui) = gw.gateway_id.parse::<Eui64>() else {
                    warn!(gateway_id = %gw.gateway_id, "skipping gateway with invalid EUI");
                    continue;
                };
                debug!(gateway = %eui, "found gateway");

                // Location lives in the detail document.
                let location = match self
                    .get_json::<GatewayDetailResponse>(&format!("/api/gateways/{}", gw.gateway_id))
                    .await
                {
                    Ok(detail) => detail.gateway.location.and_then(|loc| {
                        (loc.latitude != 0.0 || loc.longitude != 0.0).then_some(Location {
                            latitude: loc.latitude,
                            longitude: loc.longitude,
                        })
                    }),
                    Err(e) => {
                        warn!(gateway = %eui, error = %e, "failed to get gateway details");
                        None
                    }
                };

                gateways.push(RemoteGateway {
                    eui,
                    discovery_uri: discovery_uri.clone(),
                    location,
                    headers: Vec::new(),
                });
            }

            if n < PAGE_LIMIT {
                break;
            }
            offset += PAGE_LIMIT;
        }

        debug!(count = gateways.len(), "listed gateways");
        Ok(gateways)
    }

    async fn list_devices(&self) -> Result<Vec<RemoteDevice>, IntegrationError> {
        let mut devices = Vec::new();
        for tenant_id in self.list_tenant_ids().await? {
            debug!(tenant = %tenant_id, "listing applications");
            let application_ids = match self.list_application_ids(&tenant_id).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(tenant = %tenant_id, error = %e, "failed to list applications");
                    continue;
                }
            };
            for application_id in application_ids {
                debug!(application = %application_id, "listing devices");
                if let Err(e) = self.application_devices(&application_id, &mut devices).await {
                    warn!(application = %application_id, error = %e, "failed to list devices");
                }
            }
        }
        debug!(count = devices.len(), "listed devices");
        Ok(devices)
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    result: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TenantEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApplicationEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GatewayEntry {
    #[serde(rename = "gatewayId")]
    gateway_id: String,
}

#[derive(Debug, Deserialize)]
struct GatewayDetailResponse {
    gateway: GatewayDetail,
}

#[derive(Debug, Deserialize)]
struct GatewayDetail {
    #[serde(default)]
    location: Option<WireLocation>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct WireLocation {
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    #[serde(rename = "devEui")]
    dev_eui: String,
}

#[derive(Debug, Deserialize)]
struct DeviceDetailResponse {
    device: DeviceDetail,
}

#[derive(Debug, Deserialize)]
struct DeviceDetail {
    #[serde(default, rename = "joinEui")]
    join_eui: String,
}

#[derive(Debug, Deserialize)]
struct DeviceKeysResponse {
    #[serde(rename = "deviceKeys")]
    device_keys: DeviceKeys,
}

#[derive(Debug, Deserialize)]
struct DeviceKeys {
    #[serde(default, rename = "nwkKey")]
    nwk_key: String,
}

// ── Tests ───────────────────────────────────────────────────────────
