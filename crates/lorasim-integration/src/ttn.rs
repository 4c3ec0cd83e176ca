// The Things Network (v3) adapter.
//
// Gateways come from the gateway registry; devices from an
// application → end-device walk, with session detail fetched from the
// network-server and application-server registries when readable.
// The API key authenticates every call and is also propagated into
// each gateway's LNS dial headers, which is how TTN authorizes a
// Basics Station connection.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use lorasim_lorawan::{Aes128Key, DevAddr, DevNonce, Eui64};

use crate::{transport, Integration, IntegrationError, Location, RemoteDevice, RemoteGateway};

const VENDOR: &str = "TTN";
const PAGE_LIMIT: usize = 100;

pub struct TtnClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl TtnClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, IntegrationError> {
        url::Url::parse(base_url)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http: transport::build_client(Some(&format!("Bearer {api_key}")))?,
        })
    }

    /// Basics Station endpoint for this cluster: the API host on the
    /// LNS WebSocket port (8887 TLS, 1887 plain).
    fn discovery_uri(&self) -> String {
        let secure = !self.base_url.starts_with("http://");
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
        if secure {
            format!("wss://{host}:8887")
        } else {
            format!("ws://{host}:1887")
        }
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

    /// Session detail readable only with NS/AS rights; failures leave
    /// the device with list-level information so it joins fresh.
    async fn device_session(
        &self,
        application_id: &str,
        device_id: &str,
        device: &mut RemoteDevice,
    ) -> Result<(), IntegrationError> {
        let ns: EndDeviceResponse = self
            .get_json(&format!(
                "/api/v3/ns/applications/{application_id}/devices/{device_id}\
                 ?field_mask=session"
            ))
            .await?;
        if let Some(session) = ns.session {
            if let Some(addr) = session.dev_addr {
                match addr.parse::<DevAddr>() {
                    Ok(a) => device.dev_addr = a,
                    Err(_) => warn!(device = %device.dev_eui, "invalid session DevAddr"),
                }
            }
            // The network session key of a 1.0.x session lives in the
            // nwk_s_enc_key slot.
            if let Some(key) = session.keys.and_then(|k| k.nwk_s_enc_key).map(|k| k.key) {
                match key.parse::<Aes128Key>() {
                    Ok(k) => device.nwk_s_key = k,
                    Err(_) => warn!(device = %device.dev_eui, "invalid NwkSKey"),
                }
            }
            device.fcnt_up = session.last_f_cnt_up.unwrap_or(0);
            device.fcnt_dn = session.last_n_f_cnt_down.unwrap_or(0);
        }

        let app_srv: EndDeviceResponse = self
            .get_json(&format!(
                "/api/v3/as/applications/{application_id}/devices/{device_id}\
                 ?field_mask=session.keys.app_s_key.key"
            ))
            .await?;
        if let Some(key) = app_srv
            .session
            .and_then(|s| s.keys)
            .and_then(|k| k.app_s_key)
            .map(|k| k.key)
        {
            match key.parse::<Aes128Key>() {
                Ok(k) => device.app_s_key = k,
                Err(_) => warn!(device = %device.dev_eui, "invalid AppSKey"),
            }
        }

        // Root key and last nonce from the join server.
        let join_srv: EndDeviceResponse = self
            .get_json(&format!(
                "/api/v3/js/applications/{application_id}/devices/{device_id}\
                 ?field_mask=root_keys.app_key.key,last_dev_nonce"
            ))
            .await?;
        if let Some(key) = join_srv.root_keys.and_then(|k| k.app_key).map(|k| k.key) {
            match key.parse::<Aes128Key>() {
                Ok(k) => device.app_key = k,
                Err(_) => warn!(device = %device.dev_eui, "invalid AppKey"),
            }
        }
        if let Some(nonce) = join_srv.last_dev_nonce {
            device.dev_nonce = DevNonce((nonce & 0xffff) as u16);
        }

        Ok(())
    }
}

#[async_trait]
impl Integration for TtnClient {
    async fn list_gateways(&self) -> Result<Vec<RemoteGateway>, IntegrationError> {
        let discovery_uri = self.discovery_uri();
        debug!(%discovery_uri, "discovery URI");

        let mut gateways = Vec::new();
        let mut page = 1usize;
        loop {
            let response: GatewaysResponse = self
                .get_json(&format!(
                    "/api/v3/gateways?page={page}&limit={PAGE_LIMIT}&field_mask=ids.eui,antennas"
                ))
                .await?;
            let n = response.gateways.len();

            for gw in response.gateways {
                let Some(eui_text) = gw.ids.eui else {
                    continue;
                };
                let Ok(eui) = eui_text.parse::<Eui64>() else {
                    warn!(eui = %eui_text, "skipping gateway with invalid EUI");
                    continue;
                };
                debug!(gateway = %eui, "found gateway");

                // TTN keeps the position on the first antenna.
                let location = gw
                    .antennas
                    .first()
                    .and_then(|a| a.location)
                    .and_then(|loc| {
                        (loc.latitude != 0.0 || loc.longitude != 0.0).then_some(Location {
                            latitude: loc.latitude,
                            longitude: loc.longitude,
                        })
                    });

                gateways.push(RemoteGateway {
                    eui,
                    discovery_uri: discovery_uri.clone(),
                    location,
                    headers: vec![(
                        "Authorization".to_string(),
                        format!("Bearer {}", self.api_key),
                    )],
                });
            }

            if n < PAGE_LIMIT {
                break;
            }
            page += 1;
        }

        debug!(count = gateways.len(), "listed gateways");
        Ok(gateways)
    }

    async fn list_devices(&self) -> Result<Vec<RemoteDevice>, IntegrationError> {
        let mut devices = Vec::new();
        let mut app_page = 1usize;
        loop {
            let apps: ApplicationsResponse = self
                .get_json(&format!(
                    "/api/v3/applications?page={app_page}&limit={PAGE_LIMIT}&field_mask=ids"
                ))
                .await?;
            let apps_on_page = apps.applications.len();

            for app in apps.applications {
                let application_id = app.ids.application_id;
                debug!(application = %application_id, "listing devices");

                let mut dev_page = 1usize;
                loop {
                    let url = format!(
                        "/api/v3/applications/{application_id}/devices\
                         ?page={dev_page}&limit={PAGE_LIMIT}\
                         &field_mask=ids.dev_eui,ids.join_eui,locations"
                    );
                    let response: EndDevicesResponse = match self.get_json(&url).await {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(application = %application_id, error = %e,
                                "failed to list devices");
                            break;
                        }
                    };
                    let n = response.end_devices.len();

                    for dev in response.end_devices {
                        let Some(dev_eui_text) = dev.ids.dev_eui else {
                            continue;
                        };
                        let Ok(dev_eui) = dev_eui_text.parse::<Eui64>() else {
                            warn!(deveui = %dev_eui_text, "skipping device with invalid EUI");
                            continue;
                        };
                        let join_eui = dev
                            .ids
                            .join_eui
                            .as_deref()
                            .and_then(|t| t.parse().ok())
                            .unwrap_or_default();

                        let mut device =
                            RemoteDevice::new(dev_eui, join_eui, Aes128Key::default());

                        // Prefer the operator-set position.
                        let pick = dev
                            .locations
                            .get("user")
                            .or_else(|| dev.locations.values().next());
                        device.location = pick.and_then(|loc| {
                            (loc.latitude != 0.0 || loc.longitude != 0.0).then_some(Location {
                                latitude: loc.latitude,
                                longitude: loc.longitude,
                            })
                        });

                        if let Err(e) = self
                            .device_session(&application_id, &dev.ids.device_id, &mut device)
                            .await
                        {
                            warn!(device = %dev_eui, error = %e,
                                "could not get full details, using basic info only");
                        }

                        debug!(device = %device.dev_eui, "found device");
                        devices.push(device);
                    }

                    if n < PAGE_LIMIT {
                        break;
                    }
                    dev_page += 1;
                }
            }

            if apps_on_page < PAGE_LIMIT {
                break;
            }
            app_page += 1;
        }

        debug!(count = devices.len(), "listed devices");
        Ok(devices)
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GatewaysResponse {
    #[serde(default)]
    gateways: Vec<GatewayEntry>,
}

#[derive(Debug, Deserialize)]
struct GatewayEntry {
    ids: GatewayIds,
    #[serde(default)]
    antennas: Vec<Antenna>,
}

#[derive(Debug, Deserialize)]
struct GatewayIds {
    #[serde(default)]
    eui: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Antenna {
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
struct ApplicationsResponse {
    #[serde(default)]
    applications: Vec<ApplicationEntry>,
}

#[derive(Debug, Deserialize)]
struct ApplicationEntry {
    ids: ApplicationIds,
}

#[derive(Debug, Deserialize)]
struct ApplicationIds {
    application_id: String,
}

#[derive(Debug, Deserialize)]
struct EndDevicesResponse {
    #[serde(default)]
    end_devices: Vec<EndDeviceEntry>,
}

#[derive(Debug, Deserialize)]
struct EndDeviceEntry {
    ids: EndDeviceIds,
    #[serde(default)]
    locations: std::collections::HashMap<String, WireLocation>,
}

#[derive(Debug, Deserialize)]
struct EndDeviceIds {
    device_id: String,
    #[serde(default)]
    dev_eui: Option<String>,
    #[serde(default)]
    join_eui: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EndDeviceResponse {
    #[serde(default)]
    session: Option<Session>,
    #[serde(default)]
    root_keys: Option<RootKeys>,
    #[serde(default)]
    last_dev_nonce: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Session {
    #[serde(default)]
    dev_addr: Option<String>,
    #[serde(default)]
    keys: Option<SessionKeys>,
    #[serde(default)]
    last_f_cnt_up: Option<u32>,
    #[serde(default)]
    last_n_f_cnt_down: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SessionKeys {
    #[serde(default)]
    nwk_s_enc_key: Option<KeyEnvelope>,
    #[serde(default)]
    app_s_key: Option<KeyEnvelope>,
}

#[derive(Debug, Deserialize)]
struct RootKeys {
    #[serde(default)]
    app_key: Option<KeyEnvelope>,
}

#[derive(Debug, Deserialize)]
struct KeyEnvelope {
    key: String,
}

// ── Tests ───────────────────────────────────────────────────────────
