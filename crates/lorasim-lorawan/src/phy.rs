// ── PHYPayload frame model ──
//
// LoRaWAN 1.0.x top-level frame: MHDR ‖ MACPayload ‖ MIC. The MIC of
// a Join-Accept travels inside the encrypted portion, so that variant
// has an explicit encrypted/clear state.

use std::fmt;

use crate::types::{DevAddr, DevNonce, Eui64, JoinNonce, Mic, NetId};
use crate::LoraError;

// ── MHDR ────────────────────────────────────────────────────────────

/// Message type (MHDR bits 7..5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    RejoinRequest,
    Proprietary,
}

impl MType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0b000 => Self::JoinRequest,
            0b001 => Self::JoinAccept,
            0b010 => Self::UnconfirmedDataUp,
            0b011 => Self::UnconfirmedDataDown,
            0b100 => Self::ConfirmedDataUp,
            0b101 => Self::ConfirmedDataDown,
            0b110 => Self::RejoinRequest,
            _ => Self::Proprietary,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::JoinRequest => 0b000,
            Self::JoinAccept => 0b001,
            Self::UnconfirmedDataUp => 0b010,
            Self::UnconfirmedDataDown => 0b011,
            Self::ConfirmedDataUp => 0b100,
            Self::ConfirmedDataDown => 0b101,
            Self::RejoinRequest => 0b110,
            Self::Proprietary => 0b111,
        }
    }

    pub fn is_data_uplink(self) -> bool {
        matches!(self, Self::UnconfirmedDataUp | Self::ConfirmedDataUp)
    }

    pub fn is_data_downlink(self) -> bool {
        matches!(self, Self::UnconfirmedDataDown | Self::ConfirmedDataDown)
    }
}

impl fmt::Display for MType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::JoinRequest => "JoinRequest",
            Self::JoinAccept => "JoinAccept",
            Self::UnconfirmedDataUp => "UnconfirmedDataUp",
            Self::UnconfirmedDataDown => "UnconfirmedDataDown",
            Self::ConfirmedDataUp => "ConfirmedDataUp",
            Self::ConfirmedDataDown => "ConfirmedDataDown",
            Self::RejoinRequest => "RejoinRequest",
            Self::Proprietary => "Proprietary",
        };
        f.write_str(name)
    }
}

/// LoRaWAN major version (MHDR bits 1..0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Major {
    #[default]
    LoRaWanR1,
    Rfu(u8),
}

impl Major {
    pub fn bits(self) -> u8 {
        match self {
            Self::LoRaWanR1 => 0b00,
            Self::Rfu(b) => b & 0b11,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::LoRaWanR1,
            other => Self::Rfu(other),
        }
    }
}

/// MAC header: message type plus major version, one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mhdr {
    pub mtype: MType,
    pub major: Major,
}

impl Mhdr {
    pub fn new(mtype: MType) -> Self {
        Self {
            mtype,
            major: Major::LoRaWanR1,
        }
    }

    pub fn to_byte(self) -> u8 {
        (self.mtype.bits() << 5) | self.major.bits()
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            mtype: MType::from_bits(byte >> 5),
            major: Major::from_bits(byte),
        }
    }
}

// ── Join payloads ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRequestPayload {
    pub join_eui: Eui64,
    pub dev_eui: Eui64,
    pub dev_nonce: DevNonce,
}

/// DLSettings byte of the Join-Accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DlSettings {
    pub rx1_dr_offset: u8,
    pub rx2_data_rate: u8,
}

impl DlSettings {
    pub fn to_byte(self) -> u8 {
        ((self.rx1_dr_offset & 0x07) << 4) | (self.rx2_data_rate & 0x0f)
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            rx1_dr_offset: (byte >> 4) & 0x07,
            rx2_data_rate: byte & 0x0f,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAcceptPayload {
    pub join_nonce: JoinNonce,
    pub home_net_id: NetId,
    pub dev_addr: DevAddr,
    pub dl_settings: DlSettings,
    pub rx_delay: u8,
    pub cf_list: Option<[u8; 16]>,
}

impl JoinAcceptPayload {
    /// Clear-text payload bytes (MIC not included).
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(28);
        out.extend_from_slice(&self.join_nonce.to_wire());
        out.extend_from_slice(&self.home_net_id.to_wire());
        out.extend_from_slice(&self.dev_addr.to_wire());
        out.push(self.dl_settings.to_byte());
        out.push(self.rx_delay);
        if let Some(cf) = self.cf_list {
            out.extend_from_slice(&cf);
        }
        out
    }

    pub(crate) fn from_bytes(data: &[u8]) -> Result<Self, LoraError> {
        if data.len() != 12 && data.len() != 28 {
            return Err(LoraError::InvalidFrame(format!(
                "join-accept payload must be 12 or 28 bytes, got {}",
                data.len()
            )));
        }
        let cf_list = if data.len() == 28 {
            let mut cf = [0u8; 16];
            cf.copy_from_slice(&data[12..28]);
            Some(cf)
        } else {
            None
        };
        Ok(Self {
            join_nonce: JoinNonce::from_wire([data[0], data[1], data[2]]),
            home_net_id: NetId::from_wire([data[3], data[4], data[5]]),
            dev_addr: DevAddr::from_wire([data[6], data[7], data[8], data[9]]),
            dl_settings: DlSettings::from_byte(data[10]),
            rx_delay: data[11],
            cf_list,
        })
    }
}

/// A Join-Accept as seen on the wire (ciphertext covering payload and
/// MIC) or after decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinAccept {
    Encrypted(Vec<u8>),
    Clear(JoinAcceptPayload),
}

// ── Data payloads ───────────────────────────────────────────────────

/// Frame control byte. Bit 4 is Class B on uplinks and FPending on
/// downlinks; FOptsLen is derived from the FOpts field on marshal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FCtrl {
    pub adr: bool,
    pub adr_ack_req: bool,
    pub ack: bool,
    pub f_pending: bool,
}

impl FCtrl {
    pub fn to_byte(self, fopts_len: usize) -> u8 {
        let mut b = (fopts_len as u8) & 0x0f;
        if self.adr {
            b |= 0x80;
        }
        if self.adr_ack_req {
            b |= 0x40;
        }
        if self.ack {
            b |= 0x20;
        }
        if self.f_pending {
            b |= 0x10;
        }
        b
    }

    pub fn from_byte(byte: u8) -> (Self, usize) {
        (
            Self {
                adr: byte & 0x80 != 0,
                adr_ack_req: byte & 0x40 != 0,
                ack: byte & 0x20 != 0,
                f_pending: byte & 0x10 != 0,
            },
            (byte & 0x0f) as usize,
        )
    }
}

/// Frame header of a data message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fhdr {
    pub dev_addr: DevAddr,
    pub fctrl: FCtrl,
    /// 16-bit wire counter (the low half of the session FCnt).
    pub fcnt: u16,
    /// Serialized MAC commands, at most 15 bytes.
    pub fopts: Vec<u8>,
}

impl Fhdr {
    fn to_bytes(&self) -> Result<Vec<u8>, LoraError> {
        if self.fopts.len() > 15 {
            return Err(LoraError::InvalidFrame(format!(
                "FOpts is {} bytes, maximum is 15",
                self.fopts.len()
            )));
        }
        let mut out = Vec::with_capacity(7 + self.fopts.len());
        out.extend_from_slice(&self.dev_addr.to_wire());
        out.push(self.fctrl.to_byte(self.fopts.len()));
        out.extend_from_slice(&self.fcnt.to_le_bytes());
        out.extend_from_slice(&self.fopts);
        Ok(out)
    }
}

/// MACPayload of a data message: FHDR plus optional port and payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MacData {
    pub fhdr: Fhdr,
    pub fport: Option<u8>,
    /// FRMPayload bytes, already encrypted when the frame carries an
    /// application payload.
    pub frm_payload: Vec<u8>,
}

// ── PhyPayload ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacPayload {
    JoinRequest(JoinRequestPayload),
    JoinAccept(JoinAccept),
    Data(MacData),
}

/// Top-level LoRaWAN frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhyPayload {
    pub mhdr: Mhdr,
    pub mac: MacPayload,
    pub mic: Mic,
}

impl PhyPayload {
    /// Serialize to wire bytes.
    pub fn marshal(&self) -> Result<Vec<u8>, LoraError> {
        let mut out = vec![self.mhdr.to_byte()];
        match (&self.mhdr.mtype, &self.mac) {
            (MType::JoinRequest, MacPayload::JoinRequest(jr)) => {
                out.extend_from_slice(&jr.join_eui.to_wire());
                out.extend_from_slice(&jr.dev_eui.to_wire());
                out.extend_from_slice(&jr.dev_nonce.0.to_le_bytes());
                out.extend_from_slice(&self.mic.0);
            }
            (MType::JoinAccept, MacPayload::JoinAccept(JoinAccept::Encrypted(ct))) => {
                // The MIC is inside the ciphertext.
                out.extend_from_slice(ct);
            }
            (MType::JoinAccept, MacPayload::JoinAccept(JoinAccept::Clear(p))) => {
                out.extend_from_slice(&p.to_bytes());
                out.extend_from_slice(&self.mic.0);
            }
            (mtype, MacPayload::Data(data))
                if mtype.is_data_uplink() || mtype.is_data_downlink() =>
            {
                out.extend_from_slice(&data.fhdr.to_bytes()?);
                if let Some(port) = data.fport {
                    out.push(port);
                    out.extend_from_slice(&data.frm_payload);
                } else if !data.frm_payload.is_empty() {
                    return Err(LoraError::InvalidFrame(
                        "FRMPayload present without FPort".into(),
                    ));
                }
                out.extend_from_slice(&self.mic.0);
            }
            (mtype, _) => return Err(LoraError::PayloadMismatch(*mtype)),
        }
        Ok(out)
    }

    /// Parse wire bytes into a frame.
    pub fn unmarshal(data: &[u8]) -> Result<Self, LoraError> {
        if data.is_empty() {
            return Err(LoraError::InvalidFrame("empty PHYPayload".into()));
        }
        let mhdr = Mhdr::from_byte(data[0]);
        match mhdr.mtype {
            MType::JoinRequest => Self::unmarshal_join_request(mhdr, data),
            MType::JoinAccept => Self::unmarshal_join_accept(mhdr, data),
            mtype if mtype.is_data_uplink() || mtype.is_data_downlink() => {
                Self::unmarshal_data(mhdr, data)
            }
            mtype => Err(LoraError::UnsupportedMType(mtype)),
        }
    }

    fn unmarshal_join_request(mhdr: Mhdr, data: &[u8]) -> Result<Self, LoraError> {
        // MHDR(1) + JoinEUI(8) + DevEUI(8) + DevNonce(2) + MIC(4)
        if data.len() != 23 {
            return Err(LoraError::InvalidFrame(format!(
                "join-request must be 23 bytes, got {}",
                data.len()
            )));
        }
        let join_eui = Eui64::from_wire(data[1..9].try_into().expect("8 bytes"));
        let dev_eui = Eui64::from_wire(data[9..17].try_into().expect("8 bytes"));
        let dev_nonce = DevNonce(u16::from_le_bytes([data[17], data[18]]));
        let mic = Mic(data[19..23].try_into().expect("4 bytes"));
        Ok(Self {
            mhdr,
            mac: MacPayload::JoinRequest(JoinRequestPayload {
                join_eui,
                dev_eui,
                dev_nonce,
            }),
            mic,
        })
    }

    fn unmarshal_join_accept(mhdr: Mhdr, data: &[u8]) -> Result<Self, LoraError> {
        // Ciphertext is payload(12|28) + MIC(4).
        let ct = &data[1..];
        if ct.len() != 16 && ct.len() != 32 {
            return Err(LoraError::InvalidFrame(format!(
                "join-accept ciphertext must be 16 or 32 bytes, got {}",
                ct.len()
            )));
        }
        Ok(Self {
            mhdr,
            mac: MacPayload::JoinAccept(JoinAccept::Encrypted(ct.to_vec())),
            mic: Mic::default(),
        })
    }

    fn unmarshal_data(mhdr: Mhdr, data: &[u8]) -> Result<Self, LoraError> {
        // Minimum: MHDR(1) + DevAddr(4) + FCtrl(1) + FCnt(2) + MIC(4)
        if data.len() < 12 {
            return Err(LoraError::InvalidFrame(format!(
                "data frame must be at least 12 bytes, got {}",
                data.len()
            )));
        }
        let dev_addr = DevAddr::from_wire(data[1..5].try_into().expect("4 bytes"));
        let (fctrl, fopts_len) = FCtrl::from_byte(data[5]);
        let fcnt = u16::from_le_bytes([data[6], data[7]]);

        let mic_start = data.len() - 4;
        let fopts_end = 8 + fopts_len;
        if fopts_end > mic_start {
            return Err(LoraError::InvalidFrame(format!(
                "FOpts length {fopts_len} exceeds frame"
            )));
        }
        let fopts = data[8..fopts_end].to_vec();

        let (fport, frm_payload) = if fopts_end < mic_start {
            (Some(data[fopts_end]), data[fopts_end + 1..mic_start].to_vec())
        } else {
            (None, Vec::new())
        };

        let mic = Mic(data[mic_start..].try_into().expect("4 bytes"));
        Ok(Self {
            mhdr,
            mac: MacPayload::Data(MacData {
                fhdr: Fhdr {
                    dev_addr,
                    fctrl,
                    fcnt,
                    fopts,
                },
                fport,
                frm_payload,
            }),
            mic,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
