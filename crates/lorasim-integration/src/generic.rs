// Generic network server: no remote side to mirror.

use async_trait::async_trait;

use crate::{Integration, IntegrationError, RemoteDevice, RemoteGateway};

/// No-op integration for plain network servers. Listings are empty,
/// provisioning hooks succeed silently.
#[derive(Debug, Default)]
pub struct GenericClient;

impl GenericClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Integration for GenericClient {
    async fn list_gateways(&self) -> Result<Vec<RemoteGateway>, IntegrationError> {
        Ok(Vec::new())
    }

    async fn list_devices(&self) -> Result<Vec<RemoteDevice>, IntegrationError> {
        Ok(Vec::new())
    }
}
