//! Remote network-server integrations.
//!
//! A network-server instance in the simulator can mirror a real
//! network server. Each vendor is wrapped in an [`Integration`]: a
//! narrow capability that lists the gateways and devices provisioned
//! remotely so the instance can reconcile its local population
//! against them. Vendor protocol details stay inside the adapters;
//! the core only ever sees [`RemoteGateway`] / [`RemoteDevice`]
//! snapshots.

pub mod chirpstack;
pub mod generic;
pub mod loriot;
mod transport;
pub mod ttn;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lorasim_lorawan::{Aes128Key, DevAddr, DevNonce, Eui64};

pub use chirpstack::ChirpStackClient;
pub use generic::GenericClient;
pub use loriot::LoriotClient;
pub use ttn::TtnClient;

// ── Configuration ───────────────────────────────────────────────────

/// Which remote network server a simulator instance talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NsKind {
    #[default]
    Generic,
    Loriot,
    ChirpStack,
    Ttn,
}

/// Network-server instance configuration, as carried by the
/// control-plane API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NsConfig {
    #[serde(rename = "type")]
    pub kind: NsKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// LORIOT: full `Authorization` header value.
    #[serde(default, rename = "authHeader", skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,

    /// ChirpStack: API token (sent as a bearer).
    #[serde(default, rename = "apiToken", skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// TTN: API key (sent as a bearer).
    #[serde(default, rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

// ── Snapshot records ────────────────────────────────────────────────

/// Geographic position attached to a gateway or device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// A gateway as provisioned on the remote network server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteGateway {
    pub eui: Eui64,
    /// LNS discovery endpoint the gateway should dial.
    pub discovery_uri: String,
    pub location: Option<Location>,
    /// Extra headers for the LNS dial (bearer propagation).
    pub headers: Vec<(String, String)>,
}

/// A device as provisioned on the remote network server. Session
/// fields default to zero for devices that must join first.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDevice {
    pub dev_eui: Eui64,
    pub join_eui: Eui64,
    pub app_key: Aes128Key,
    pub dev_nonce: DevNonce,
    pub dev_addr: DevAddr,
    pub app_s_key: Aes128Key,
    pub nwk_s_key: Aes128Key,
    pub fcnt_up: u32,
    pub fcnt_dn: u32,
    pub location: Option<Location>,
}

impl RemoteDevice {
    pub fn new(dev_eui: Eui64, join_eui: Eui64, app_key: Aes128Key) -> Self {
        Self {
            dev_eui,
            join_eui,
            app_key,
            dev_nonce: DevNonce::default(),
            dev_addr: DevAddr::default(),
            app_s_key: Aes128Key::default(),
            nwk_s_key: Aes128Key::default(),
            fcnt_up: 0,
            fcnt_dn: 0,
            location: None,
        }
    }
}

// ── Capability ──────────────────────────────────────────────────────

/// The capability each vendor adapter provides to the core.
///
/// Listing powers the reconciling sync; the provisioning hooks exist
/// for vendors that support write access and default to no-ops.
#[async_trait]
pub trait Integration: Send + Sync {
    async fn list_gateways(&self) -> Result<Vec<RemoteGateway>, IntegrationError>;

    async fn list_devices(&self) -> Result<Vec<RemoteDevice>, IntegrationError>;

    async fn create_gateway(
        &self,
        _eui: Eui64,
        _discovery_uri: &str,
    ) -> Result<(), IntegrationError> {
        Ok(())
    }

    async fn delete_gateway(&self, _eui: Eui64) -> Result<(), IntegrationError> {
        Ok(())
    }

    async fn create_device(
        &self,
        _dev_eui: Eui64,
        _join_eui: Eui64,
        _app_key: Aes128Key,
    ) -> Result<(), IntegrationError> {
        Ok(())
    }

    async fn delete_device(&self, _dev_eui: Eui64) -> Result<(), IntegrationError> {
        Ok(())
    }
}

/// Build the integration for a config. Incomplete vendor configs fall
/// back to the generic (no-op) integration rather than failing.
pub fn new_integration(config: &NsConfig) -> Result<Box<dyn Integration>, IntegrationError> {
    match config.kind {
        NsKind::Generic => Ok(Box::new(GenericClient::new())),
        NsKind::Loriot => match (&config.url, &config.auth_header) {
            (Some(url), Some(auth)) if !url.is_empty() && !auth.is_empty() => {
                Ok(Box::new(LoriotClient::new(url, auth)?))
            }
            _ => Ok(Box::new(GenericClient::new())),
        },
        NsKind::ChirpStack => match (&config.url, &config.api_token) {
            (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => {
                Ok(Box::new(ChirpStackClient::new(url, token)?))
            }
            _ => Ok(Box::new(GenericClient::new())),
        },
        NsKind::Ttn => match (&config.url, &config.api_key) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => {
                Ok(Box::new(TtnClient::new(url, key)?))
            }
            _ => Ok(Box::new(GenericClient::new())),
        },
    }
}

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum IntegrationError {
    /// HTTP transport failure (connect, DNS, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The remote API answered with a non-success status.
    #[error("{vendor} API returned status {status}")]
    UnexpectedStatus { vendor: &'static str, status: u16 },

    /// The remote answered 200 but the body did not parse.
    #[error("failed to decode {vendor} response: {message}")]
    Decode {
        vendor: &'static str,
        message: String,
    },
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ns_config_json_field_names() {
        let config: NsConfig = serde_json::from_str(
            r#"{"type":"loriot","url":"https://eu1.loriot.io","authHeader":"Session abc"}"#,
        )
        .unwrap();
        assert_eq!(config.kind, NsKind::Loriot);
        assert_eq!(config.url.as_deref(), Some("https://eu1.loriot.io"));
        assert_eq!(config.auth_header.as_deref(), Some("Session abc"));

        let round = serde_json::to_string(&config).unwrap();
        assert!(round.contains("\"authHeader\""));
        assert!(!round.contains("apiToken"));
    }

    #[test]
    fn kind_defaults_to_generic() {
        let config: NsConfig = serde_json::from_str(r#"{"type":"generic"}"#).unwrap();
        assert_eq!(config.kind, NsKind::Generic);
    }

    #[tokio::test]
    async fn incomplete_vendor_config_falls_back_to_generic() {
        let config = NsConfig {
            kind: NsKind::Loriot,
            url: Some("https://eu1.loriot.io".into()),
            auth_header: None,
            ..NsConfig::default()
        };
        let integration = new_integration(&config).unwrap();
        assert!(integration.list_gateways().await.unwrap().is_empty());
        assert!(integration.list_devices().await.unwrap().is_empty());
    }
}
