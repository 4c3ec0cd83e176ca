// LORIOT adapter.
//
// REST surface: `/1/nwk/status` for the Basics Station endpoint,
// paginated `/1/nwk/gateways` and `/1/nwk/devices` listings, and
// `/1/nwk/device/{deveui}` for per-device session detail. The
// configured `Authorization` header is passed through verbatim.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use lorasim_lorawan::{Aes128Key, DevAddr, DevNonce, Eui64};

use crate::{transport, Integration, IntegrationError, Location, RemoteDevice, RemoteGateway};

const VENDOR: &str = "LORIOT";
const PER_PAGE: usize = 100;

pub struct LoriotClient {
    base_url: String,
    http: reqwest::Client,
}

impl LoriotClient {
    pub fn new(base_url: &str, auth_header: &str) -> Result<Self, IntegrationError> {
        url::Url::parse(base_url)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: transport::build_client(Some(auth_header))?,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<T, IntegrationError> {
        debug!(%url, "GET");
        let response = self.http.get(url).send().await?;
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

    /// The discovery endpoint gateways should dial, assembled from
    /// the network status document.
    async fn basics_station_uri(&self) -> Result<String, IntegrationError> {
        let status: StatusResponse = self
            .get_json(&format!("{}/1/nwk/status", self.base_url))
            .await?;
        Ok(format!(
            "{}:{}",
            status.basics_station_url, status.basics_station_discovery_port
        ))
    }

    async fn device_detail(&self, dev_eui: Eui64) -> Result<RemoteDevice, IntegrationError> {
        let detail: DeviceDetailResponse = self
            .get_json(&format!("{}/1/nwk/device/{}", self.base_url, dev_eui))
            .await?;

        let dev_eui: Eui64 = detail.dev_eui.parse().map_err(|_| IntegrationError::Decode {
            vendor: VENDOR,
            message: format!("invalid deveui {:?}", detail.dev_eui),
        })?;
        let join_eui: Eui64 =
            detail
                .join_eui
                .parse()
                .map_err(|_| IntegrationError::Decode {
                    vendor: VENDOR,
                    message: format!("invalid joineui {:?}", detail.join_eui),
                })?;
        let app_key: Aes128Key =
            detail.app_key.parse().map_err(|_| IntegrationError::Decode {
                vendor: VENDOR,
                message: format!("invalid appkey for {dev_eui}"),
            })?;

        // Session fields are absent until the device has joined; an
        // unparsable value degrades to the zero value rather than
        // failing the whole sync.
        let parse_key = |text: &str, what: &str| -> Aes128Key {
            if text.is_empty() {
                return Aes128Key::default();
            }
            text.parse().unwrap_or_else(|_| {
                warn!(device = %dev_eui, "invalid {what}, using zero value");
                Aes128Key::default()
            })
        };
        let app_s_key = parse_key(&detail.app_s_key, "appskey");
        let nwk_s_key = parse_key(&detail.nwk_s_key, "nwkskey");
        let dev_addr = if detail.dev_addr.is_empty() {
            DevAddr::default()
        } else {
            detail.dev_addr.parse().unwrap_or_else(|_| {
                warn!(device = %dev_eui, "invalid devaddr, using zero value");
                DevAddr::default()
            })
        };

        let dev_nonce = DevNonce(detail.last_dev_nonces.iter().copied().max().unwrap_or(0));

        // seqno is the last used FCntUp (-1 when unused), so the next
        // uplink starts one past it. seqdn maps directly.
        let fcnt_up = if detail.seqno >= 0 {
            detail.seqno as u32 + 1
        } else {
            0
        };
        let fcnt_dn = if detail.seqdn >= 0 { detail.seqdn as u32 } else { 0 };

        Ok(RemoteDevice {
            dev_eui,
            join_eui,
            app_key,
            dev_nonce,
            dev_addr,
            app_s_key,
            nwk_s_key,
            fcnt_up,
            fcnt_dn,
            location: detail.location.and_then(nonzero_location),
        })
    }
}

#[async_trait]
impl Integration for LoriotClient {
    async fn list_gateways(&self) -> Result<Vec<RemoteGateway>, IntegrationError> {
        let discovery_uri = self.basics_station_uri().await?;

        let mut gateways = Vec::new();
        let mut page = 1usize;
        loop {
            let url = format!(
                "{}/1/nwk/gateways?page={page}&perPage={PER_PAGE}",
                self.base_url
            );
            let response: GatewayListResponse = self.get_json(&url).await?;

            if response.total == 0 {
                debug!("no gateways found");
                break;
            }

            for gw in &response.gateways {
                // Only Basics Station gateways can be simulated.
                if gw.base != "basics-station" {
                    continue;
                }
                let Ok(eui) = gw.eui.parse::<Eui64>() else {
                    warn!(eui = %gw.eui, "skipping gateway with invalid EUI");
                    continue;
                };
                debug!(gateway = %eui, "found gateway");
                gateways.push(RemoteGateway {
                    eui,
                    discovery_uri: discovery_uri.clone(),
                    location: gw.location.and_then(nonzero_location),
                    headers: Vec::new(),
                });
            }

            let total_pages = response.total.div_ceil(PER_PAGE);
            if page >= total_pages {
                break;
            }
            page += 1;
        }

        Ok(gateways)
    }

    async fn list_devices(&self) -> Result<Vec<RemoteDevice>, IntegrationError> {
        let mut devices = Vec::new();
        let mut page = 1usize;
        loop {
            let url = format!(
                "{}/1/nwk/devices?page={page}&perPage={PER_PAGE}",
                self.base_url
            );
            let response: DeviceListResponse = self.get_json(&url).await?;

            if response.total == 0 {
                debug!("no devices found");
                break;
            }

            for dev in &response.devices {
                let Ok(dev_eui) = dev.dev_eui.parse::<Eui64>() else {
                    warn!(deveui = %dev.dev_eui, "skipping device with invalid EUI");
                    continue;
                };
                // The listing lacks session state; fetch the detail
                // document. A failing detail skips the device only.
                match self.device_detail(dev_eui).await {
                    Ok(device) => {
                        debug!(device = %device.dev_eui, "found device");
                        devices.push(device);
                    }
                    Err(e) => warn!(device = %dev_eui, error = %e, "failed to get device details"),
                }
            }

            let total_pages = response.total.div_ceil(PER_PAGE);
            if page >= total_pages {
                break;
            }
            page += 1;
        }

        debug!(count = devices.len(), "listed devices");
        Ok(devices)
    }
}

fn nonzero_location(loc: WireLocation) -> Option<Location> {
    (loc.lat != 0.0 || loc.lon != 0.0).then_some(Location {
        latitude: loc.lat,
        longitude: loc.lon,
    })
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(rename = "basicsStationUrl")]
    basics_station_url: String,
    #[serde(rename = "basicsStationDiscoveryPort")]
    basics_station_discovery_port: u16,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct WireLocation {
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct GatewayListResponse {
    #[serde(default)]
    gateways: Vec<GatewayEntry>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct GatewayEntry {
    #[serde(rename = "EUI")]
    eui: String,
    #[serde(default)]
    base: String,
    #[serde(default)]
    location: Option<WireLocation>,
}

#[derive(Debug, Deserialize)]
struct DeviceListResponse {
    #[serde(default)]
    devices: Vec<DeviceEntry>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    #[serde(rename = "deveui")]
    dev_eui: String,
}

#[derive(Debug, Deserialize)]
struct DeviceDetailResponse {
    #[serde(rename = "deveui")]
    dev_eui: String,
    #[serde(rename = "joineui")]
    join_eui: String,
    #[serde(rename = "appkey")]
    app_key: String,
    #[serde(default, rename = "appskey")]
    app_s_key: String,
    #[serde(default, rename = "nwkskey")]
    nwk_s_key: String,
    #[serde(default, rename = "devaddr")]
    dev_addr: String,
    #[serde(default, rename = "lastDevNonces")]
    last_dev_nonces: Vec<u16>,
    #[serde(default = "minus_one")]
    seqno: i64,
    #[serde(default = "minus_one")]
    seqdn: i64,
    #[serde(default)]
    location: Option<WireLocation>,
}

fn minus_one() -> i64 {
    -1
}
