// ── Network-server instance ──
//
// Owns its devices and gateways, keyed by EUI. Uplinks fan out to
// every owned gateway, downlinks route by DevAddr (data) or broadcast
// to every device (Join-Accept). `sync` reconciles the local
// population against the remote network server's integration.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use lorasim_integration::{
    new_integration, Integration, NsConfig, RemoteDevice, RemoteGateway,
};
use lorasim_lorawan::{Eui64, MacPayload, PhyPayload};

use crate::device::{Device, DeviceInfo};
use crate::error::CoreError;
use crate::gateway::{Gateway, GatewayInfo};

pub struct NetworkServer {
    name: String,
    config: NsConfig,
    integration: Box<dyn Integration>,
    devices: RwLock<HashMap<Eui64, Arc<Device>>>,
    gateways: RwLock<HashMap<Eui64, Arc<Gateway>>>,
    uplink_tx: mpsc::Sender<PhyPayload>,
    downlink_tx: mpsc::Sender<PhyPayload>,
}

impl std::fmt::Debug for NetworkServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkServer")
            .field("name", &self.name)
            .finish()
    }
}

/// Snapshot for listings and API responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NsInfo {
    pub name: String,
    pub config: NsConfig,
    pub device_count: usize,
    pub gateway_count: usize,
}

impl NetworkServer {
    pub(crate) fn new(
        name: &str,
        config: NsConfig,
        uplink_tx: mpsc::Sender<PhyPayload>,
        downlink_tx: mpsc::Sender<PhyPayload>,
    ) -> Result<Arc<Self>, CoreError> {
        let integration = new_integration(&config)?;
        Ok(Arc::new(Self {
            name: name.to_string(),
            config,
            integration,
            devices: RwLock::new(HashMap::new()),
            gateways: RwLock::new(HashMap::new()),
            uplink_tx,
            downlink_tx,
        }))
    }

    #[cfg(test)]
    pub(crate) fn with_integration(
        name: &str,
        integration: Box<dyn Integration>,
        uplink_tx: mpsc::Sender<PhyPayload>,
        downlink_tx: mpsc::Sender<PhyPayload>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            config: NsConfig::default(),
            integration,
            devices: RwLock::new(HashMap::new()),
            gateways: RwLock::new(HashMap::new()),
            uplink_tx,
            downlink_tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> NsInfo {
        let device_count = self.devices.read().expect("device map lock poisoned").len();
        let gateway_count = self
            .gateways
            .read()
            .expect("gateway map lock poisoned")
            .len();
        NsInfo {
            name: self.name.clone(),
            config: self.config.clone(),
            device_count,
            gateway_count,
        }
    }

    // ── Gateway management ───────────────────────────────────────────

    pub fn add_gateway(&self, spec: RemoteGateway) -> Result<Arc<Gateway>, CoreError> {
        let mut gateways = self.gateways.write().expect("gateway map lock poisoned");
        if gateways.contains_key(&spec.eui) {
            return Err(CoreError::AlreadyExists("gateway"));
        }
        let gateway = Gateway::new(self.downlink_tx.clone(), spec);
        gateways.insert(gateway.eui(), gateway.clone());
        Ok(gateway)
    }

    pub fn get_gateway(&self, eui: Eui64) -> Result<Arc<Gateway>, CoreError> {
        self.gateways
            .read()
            .expect("gateway map lock poisoned")
            .get(&eui)
            .cloned()
            .ok_or(CoreError::NotFound("gateway"))
    }

    /// Gateways sorted by EUI for stable output.
    pub fn list_gateways(&self) -> Vec<GatewayInfo> {
        let mut infos: Vec<GatewayInfo> = self
            .gateways
            .read()
            .expect("gateway map lock poisoned")
            .values()
            .map(|gw| gw.info())
            .collect();
        infos.sort_by_key(|info| info.eui);
        infos
    }

    /// Drops the map entry only; a connected gateway keeps its socket
    /// until disconnected explicitly.
    pub fn remove_gateway(&self, eui: Eui64) -> Result<(), CoreError> {
        let mut gateways = self.gateways.write().expect("gateway map lock poisoned");
        gateways
            .remove(&eui)
            .map(|_| ())
            .ok_or(CoreError::NotFound("gateway"))
    }

    // ── Device management ────────────────────────────────────────────

    pub fn add_device(&self, spec: RemoteDevice) -> Result<Arc<Device>, CoreError> {
        let mut devices = self.devices.write().expect("device map lock poisoned");
        if devices.contains_key(&spec.dev_eui) {
            return Err(CoreError::AlreadyExists("device"));
        }
        let device = Device::new(self.uplink_tx.clone(), spec);
        devices.insert(device.dev_eui(), device.clone());
        Ok(device)
    }

    pub fn get_device(&self, dev_eui: Eui64) -> Result<Arc<Device>, CoreError> {
        self.devices
            .read()
            .expect("device map lock poisoned")
            .get(&dev_eui)
            .cloned()
            .ok_or(CoreError::NotFound("device"))
    }

    /// Devices sorted by DevEUI for stable output.
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        let mut infos: Vec<DeviceInfo> = self
            .devices
            .read()
            .expect("device map lock poisoned")
            .values()
            .map(|dev| dev.info())
            .collect();
        infos.sort_by_key(|info| info.dev_eui);
        infos
    }

    pub fn remove_device(&self, dev_eui: Eui64) -> Result<(), CoreError> {
        let mut devices = self.devices.write().expect("device map lock poisoned");
        devices
            .remove(&dev_eui)
            .map(|_| ())
            .ok_or(CoreError::NotFound("device"))
    }

    // ── Traffic entry points ─────────────────────────────────────────

    pub fn send_join_request(&self, dev_eui: Eui64) -> Result<(), CoreError> {
        self.get_device(dev_eui)?.join_request().map(|_| ())
    }

    pub fn send_uplink(&self, dev_eui: Eui64) -> Result<(), CoreError> {
        self.get_device(dev_eui)?.uplink().map(|_| ())
    }

    // ── Fan-out ──────────────────────────────────────────────────────

    /// Hand an uplink to every owned gateway, one task per gateway so
    /// a slow send queue never blocks the others. Per-target errors
    /// are logged, never propagated.
    pub fn forward_uplink(&self, uplink: PhyPayload) {
        let gateways: Vec<Arc<Gateway>> = self
            .gateways
            .read()
            .expect("gateway map lock poisoned")
            .values()
            .cloned()
            .collect();

        for gateway in gateways {
            debug!(server = %self.name, gateway = %gateway.eui(), "propagating uplink");
            let frame = uplink.clone();
            let server = self.name.clone();
            tokio::spawn(async move {
                if let Err(e) = gateway.forward(&frame).await {
                    warn!(server = %server, gateway = %gateway.eui(), error = %e,
                        "uplink forward failed");
                }
            });
        }
    }

    /// Route a downlink: data frames go only to devices whose DevAddr
    /// matches, Join-Accepts go to every device and the MIC selects
    /// the intended one.
    pub fn forward_downlink(&self, downlink: PhyPayload) {
        if downlink.mhdr.mtype.is_data_downlink() {
            let MacPayload::Data(data) = &downlink.mac else {
                warn!(server = %self.name, "invalid MAC payload for data downlink");
                return;
            };
            let dev_addr = data.fhdr.dev_addr;

            let targets: Vec<Arc<Device>> = self
                .devices
                .read()
                .expect("device map lock poisoned")
                .values()
                .filter(|dev| dev.dev_addr() == dev_addr)
                .cloned()
                .collect();

            for device in targets {
                debug!(server = %self.name, device = %device.dev_eui(), addr = %dev_addr,
                    "propagating downlink");
                let frame = downlink.clone();
                let server = self.name.clone();
                tokio::spawn(async move {
                    if let Err(e) = device.downlink(frame) {
                        debug!(server = %server, device = %device.dev_eui(), error = %e,
                            "downlink rejected");
                    }
                });
            }
        } else {
            // Join-Accept: every device checks the MIC against its
            // own nonce; mismatches are expected traffic.
            let devices: Vec<Arc<Device>> = self
                .devices
                .read()
                .expect("device map lock poisoned")
                .values()
                .cloned()
                .collect();

            for device in devices {
                debug!(server = %self.name, device = %device.dev_eui(),
                    "propagating join accept");
                let frame = downlink.clone();
                let server = self.name.clone();
                tokio::spawn(async move {
                    if let Err(e) = device.join_accept(frame) {
                        debug!(server = %server, device = %device.dev_eui(), error = %e,
                            "join accept not for this device");
                    }
                });
            }
        }
    }

    // ── Remote reconciliation ────────────────────────────────────────

    /// Reconcile against the remote network server: gateways whose
    /// discovery URI changed are replaced, new gateways and devices
    /// are added, existing devices are left alone. Removals apply
    /// before additions so a URI change can reuse the same EUI.
    pub async fn sync(&self) -> Result<(), CoreError> {
        let remote_gateways = self.integration.list_gateways().await?;

        let (to_remove, to_add) = {
            let gateways = self.gateways.read().expect("gateway map lock poisoned");
            let mut to_remove = Vec::new();
            let mut to_add = Vec::new();
            for remote in remote_gateways {
                match gateways.get(&remote.eui) {
                    Some(local) if local.discovery_uri() == remote.discovery_uri => {
                        debug!(server = %self.name, gateway = %remote.eui, "gateway already exists");
                        continue;
                    }
                    Some(_) => {
                        debug!(server = %self.name, gateway = %remote.eui,
                            "gateway exists with different discovery URI");
                        to_remove.push(remote.eui);
                        to_add.push(remote);
                    }
                    None => {
                        debug!(server = %self.name, gateway = %remote.eui, "new gateway");
                        to_add.push(remote);
                    }
                }
            }
            (to_remove, to_add)
        };

        for eui in to_remove {
            if let Err(e) = self.remove_gateway(eui) {
                warn!(server = %self.name, gateway = %eui, error = %e, "unable to remove gateway");
            }
        }
        for spec in to_add {
            let eui = spec.eui;
            if let Err(e) = self.add_gateway(spec) {
                warn!(server = %self.name, gateway = %eui, error = %e, "unable to add gateway");
            }
        }

        let remote_devices = self.integration.list_devices().await?;

        let to_add: Vec<RemoteDevice> = {
            let devices = self.devices.read().expect("device map lock poisoned");
            remote_devices
                .into_iter()
                .filter(|remote| {
                    if devices.contains_key(&remote.dev_eui) {
                        debug!(server = %self.name, device = %remote.dev_eui,
                            "device already exists");
                        false
                    } else {
                        debug!(server = %self.name, device = %remote.dev_eui, "new device");
                        true
                    }
                })
                .collect()
        };

        for spec in to_add {
            let dev_eui = spec.dev_eui;
            if let Err(e) = self.add_device(spec) {
                warn!(server = %self.name, device = %dev_eui, error = %e, "unable to add device");
            }
        }

        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
