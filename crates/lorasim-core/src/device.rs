// ── Simulated end device ──
//
// Per-endpoint LoRaWAN state machine. Identity (DevEUI, JoinEUI) is
// fixed at creation; session state mutates under the device lock. The
// lock is held only for state capture and mutation — crypto runs with
// it released, and bus publishes happen in their own task so callers
// never block on consumer progress.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use lorasim_integration::{Location, RemoteDevice};
use lorasim_lorawan::{
    derive_session_key, encrypt_frm_payload, Aes128Key, DevAddr, DevNonce, Eui64, FCtrl, Fhdr,
    JoinAccept, JoinRequestPayload, MacData, MacPayload, Mhdr, Mic, MType, PhyPayload,
    SessionKeyTag,
};

use crate::error::CoreError;

/// Fixed demo payload carried by every simulated uplink.
const UPLINK_PAYLOAD: [u8; 4] = [0x01, 0x02, 0x03, 0x04];
const UPLINK_FPORT: u8 = 1;

pub struct Device {
    dev_eui: Eui64,
    join_eui: Eui64,
    state: RwLock<SessionState>,
    uplink_tx: mpsc::Sender<PhyPayload>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("dev_eui", &self.dev_eui)
            .field("join_eui", &self.join_eui)
            .finish()
    }
}

struct SessionState {
    app_key: Aes128Key,
    dev_nonce: DevNonce,
    dev_addr: DevAddr,
    app_s_key: Aes128Key,
    nwk_s_key: Aes128Key,
    fcnt_up: u32,
    fcnt_dn: u32,
    location: Option<Location>,
}

/// Snapshot of a device for listings and API responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub dev_eui: Eui64,
    pub join_eui: Eui64,
    pub app_key: Aes128Key,
    pub dev_nonce: DevNonce,
    pub dev_addr: DevAddr,
    pub app_s_key: Aes128Key,
    pub nwk_s_key: Aes128Key,
    pub fcnt_up: u32,
    pub fcnt_dn: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Device {
    pub(crate) fn new(uplink_tx: mpsc::Sender<PhyPayload>, spec: RemoteDevice) -> Arc<Self> {
        Arc::new(Self {
            dev_eui: spec.dev_eui,
            join_eui: spec.join_eui,
            state: RwLock::new(SessionState {
                app_key: spec.app_key,
                dev_nonce: spec.dev_nonce,
                dev_addr: spec.dev_addr,
                app_s_key: spec.app_s_key,
                nwk_s_key: spec.nwk_s_key,
                fcnt_up: spec.fcnt_up,
                fcnt_dn: spec.fcnt_dn,
                location: spec.location,
            }),
            uplink_tx,
        })
    }

    pub fn dev_eui(&self) -> Eui64 {
        self.dev_eui
    }

    pub fn dev_addr(&self) -> DevAddr {
        self.state.read().expect("device lock poisoned").dev_addr
    }

    pub fn info(&self) -> DeviceInfo {
        let state = self.state.read().expect("device lock poisoned");
        DeviceInfo {
            dev_eui: self.dev_eui,
            join_eui: self.join_eui,
            app_key: state.app_key,
            dev_nonce: state.dev_nonce,
            dev_addr: state.dev_addr,
            app_s_key: state.app_s_key,
            nwk_s_key: state.nwk_s_key,
            fcnt_up: state.fcnt_up,
            fcnt_dn: state.fcnt_dn,
            location: state.location,
        }
    }

    /// Build and publish a Join-Request.
    ///
    /// The emitted frame carries the pre-increment DevNonce; two
    /// concurrent callers always emit distinct consecutive nonces.
    pub fn join_request(&self) -> Result<PhyPayload, CoreError> {
        let (app_key, dev_nonce) = {
            let mut state = self.state.write().expect("device lock poisoned");
            let nonce = state.dev_nonce;
            state.dev_nonce = DevNonce(nonce.0.wrapping_add(1));
            (state.app_key, nonce)
        };

        let mut frame = PhyPayload {
            mhdr: Mhdr::new(MType::JoinRequest),
            mac: MacPayload::JoinRequest(JoinRequestPayload {
                join_eui: self.join_eui,
                dev_eui: self.dev_eui,
                dev_nonce,
            }),
            mic: Mic::default(),
        };
        frame.set_uplink_join_mic(&app_key)?;

        info!(device = %self.dev_eui, nonce = %dev_nonce, "sending join request");
        self.publish(frame.clone());
        Ok(frame)
    }

    /// Process a broadcast Join-Accept.
    ///
    /// Every device on the pool sees every Join-Accept; the MIC is
    /// recomputed against this device's JoinEUI and the DevNonce it
    /// actually sent, so only the addressed device passes. A mismatch
    /// returns [`CoreError::InvalidMic`] and leaves all state alone.
    pub fn join_accept(&self, mut frame: PhyPayload) -> Result<(), CoreError> {
        if frame.mhdr.mtype != MType::JoinAccept {
            return Err(CoreError::UnsupportedMType(frame.mhdr.mtype));
        }
        let (app_key, sent_nonce) = {
            let state = self.state.read().expect("device lock poisoned");
            (state.app_key, state.dev_nonce.previous())
        };

        frame.decrypt_join_accept(&app_key)?;
        if !frame.validate_downlink_join_mic(self.join_eui, sent_nonce, &app_key)? {
            debug!(device = %self.dev_eui, "join accept MIC mismatch, not for us");
            return Err(CoreError::InvalidMic);
        }

        let MacPayload::JoinAccept(JoinAccept::Clear(payload)) = &frame.mac else {
            return Err(CoreError::InvalidMacPayload);
        };

        let nwk_s_key = derive_session_key(
            SessionKeyTag::Network,
            &app_key,
            payload.join_nonce,
            payload.home_net_id,
            sent_nonce,
        );
        let app_s_key = derive_session_key(
            SessionKeyTag::Application,
            &app_key,
            payload.join_nonce,
            payload.home_net_id,
            sent_nonce,
        );

        {
            let mut state = self.state.write().expect("device lock poisoned");
            state.dev_addr = payload.dev_addr;
            state.nwk_s_key = nwk_s_key;
            state.app_s_key = app_s_key;
            state.fcnt_up = 0;
            state.fcnt_dn = 0;
        }

        info!(device = %self.dev_eui, dev_addr = %payload.dev_addr, "joined");
        Ok(())
    }

    /// Build and publish a confirmed data uplink with the fixed demo
    /// payload. Increments FCntUp exactly once per call.
    pub fn uplink(&self) -> Result<PhyPayload, CoreError> {
        let (dev_addr, app_s_key, nwk_s_key, fcnt) = {
            let mut state = self.state.write().expect("device lock poisoned");
            let fcnt = state.fcnt_up;
            state.fcnt_up += 1;
            (state.dev_addr, state.app_s_key, state.nwk_s_key, fcnt)
        };

        let frm_payload = encrypt_frm_payload(&app_s_key, true, dev_addr, fcnt, &UPLINK_PAYLOAD);

        let mut frame = PhyPayload {
            mhdr: Mhdr::new(MType::ConfirmedDataUp),
            mac: MacPayload::Data(MacData {
                fhdr: Fhdr {
                    dev_addr,
                    fctrl: FCtrl::default(),
                    fcnt: fcnt as u16,
                    fopts: Vec::new(),
                },
                fport: Some(UPLINK_FPORT),
                frm_payload,
            }),
            mic: Mic::default(),
        };
        frame.set_data_mic(&nwk_s_key, fcnt)?;

        info!(device = %self.dev_eui, fcnt, "sending uplink");
        self.publish(frame.clone());
        Ok(frame)
    }

    /// Process a data downlink routed to this device.
    ///
    /// Validates the downlink MIC and decrypts the application
    /// payload when one is present. The payload is only logged;
    /// FCntDn is neither checked nor advanced at this layer.
    pub fn downlink(&self, frame: PhyPayload) -> Result<(), CoreError> {
        if !frame.mhdr.mtype.is_data_downlink() {
            return Err(CoreError::UnsupportedMType(frame.mhdr.mtype));
        }
        let MacPayload::Data(data) = &frame.mac else {
            return Err(CoreError::InvalidMacPayload);
        };

        let (nwk_s_key, app_s_key) = {
            let state = self.state.read().expect("device lock poisoned");
            (state.nwk_s_key, state.app_s_key)
        };

        if !frame.validate_data_mic(&nwk_s_key, data.fhdr.fcnt as u32)? {
            debug!(device = %self.dev_eui, "downlink MIC mismatch");
            return Err(CoreError::InvalidMic);
        }

        if data.fport.is_some() && !data.frm_payload.is_empty() {
            let clear = encrypt_frm_payload(
                &app_s_key,
                false,
                data.fhdr.dev_addr,
                data.fhdr.fcnt as u32,
                &data.frm_payload,
            );
            info!(
                device = %self.dev_eui,
                fcnt = data.fhdr.fcnt,
                payload = %hex::encode(&clear),
                "downlink received"
            );
        } else {
            info!(device = %self.dev_eui, fcnt = data.fhdr.fcnt, "empty downlink received");
        }

        Ok(())
    }

    /// Hand the frame to the pool uplink bus without blocking the
    /// caller on bus capacity.
    fn publish(&self, frame: PhyPayload) {
        let tx = self.uplink_tx.clone();
        let dev_eui = self.dev_eui;
        tokio::spawn(async move {
            if tx.send(frame).await.is_err() {
                warn!(device = %dev_eui, "uplink bus closed, frame dropped");
            }
        });
    }
}

// ── Tests ───────────────────────────────────────────────────────────
