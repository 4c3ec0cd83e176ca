// ── MIC computation, payload encryption, key derivation ──
//
// LoRaWAN 1.0.x cryptography: AES-CMAC integrity codes truncated to
// 4 bytes, the counter-mode FRMPayload scheme, ECB Join-Accept
// encryption, and OTAA session-key derivation. Direction bytes: 0x00
// uplink, 0x01 downlink.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};

use crate::phy::{JoinAccept, MacPayload, PhyPayload};
use crate::types::{Aes128Key, DevAddr, DevNonce, Eui64, JoinNonce, Mic, NetId};
use crate::LoraError;

/// Join-request frame type byte used in the downlink join MIC.
const JOIN_REQUEST_TYPE: u8 = 0xff;

fn aes128_cmac(key: &Aes128Key, msg: &[u8]) -> [u8; 4] {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key.as_bytes())
        .expect("AES-128 key length is fixed");
    mac.update(msg);
    let full = mac.finalize().into_bytes();
    [full[0], full[1], full[2], full[3]]
}

fn aes128_encrypt_block(key: &Aes128Key, block: &mut [u8; 16]) {
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    cipher.encrypt_block(GenericArray::from_mut_slice(block));
}

fn aes128_decrypt_block(key: &Aes128Key, block: &mut [u8; 16]) {
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    cipher.decrypt_block(GenericArray::from_mut_slice(block));
}

// ── Session-key derivation ──────────────────────────────────────────

/// First plaintext byte of the derivation block, selecting which
/// session key comes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKeyTag {
    /// 0x01 → NwkSKey
    Network,
    /// 0x02 → AppSKey
    Application,
}

impl SessionKeyTag {
    fn byte(self) -> u8 {
        match self {
            Self::Network => 0x01,
            Self::Application => 0x02,
        }
    }
}

/// Derive a session key from the join exchange:
/// `AES128_encrypt(AppKey, tag ‖ JoinNonce(3,LE) ‖ NetID(3,LE) ‖
/// DevNonce(2,LE) ‖ 0x00×7)`.
pub fn derive_session_key(
    tag: SessionKeyTag,
    app_key: &Aes128Key,
    join_nonce: JoinNonce,
    net_id: NetId,
    dev_nonce: DevNonce,
) -> Aes128Key {
    let mut block = [0u8; 16];
    block[0] = tag.byte();
    block[1..4].copy_from_slice(&join_nonce.to_wire());
    block[4..7].copy_from_slice(&net_id.to_wire());
    block[7..9].copy_from_slice(&dev_nonce.0.to_le_bytes());
    aes128_encrypt_block(app_key, &mut block);
    Aes128Key(block)
}

// ── FRMPayload encryption ───────────────────────────────────────────

/// Encrypt or decrypt an FRMPayload (the operation is its own
/// inverse). Keystream blocks:
/// `Ai = 0x01 ‖ 0x00×4 ‖ dir ‖ DevAddr(LE) ‖ FCnt(LE,4B) ‖ 0x00 ‖ i`.
pub fn encrypt_frm_payload(
    key: &Aes128Key,
    uplink: bool,
    dev_addr: DevAddr,
    fcnt: u32,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = payload.to_vec();
    for (i, chunk) in out.chunks_mut(16).enumerate() {
        let mut block = [0u8; 16];
        block[0] = 0x01;
        block[5] = direction_byte(uplink);
        block[6..10].copy_from_slice(&dev_addr.to_wire());
        block[10..14].copy_from_slice(&fcnt.to_le_bytes());
        block[15] = (i + 1) as u8;
        aes128_encrypt_block(key, &mut block);
        for (b, s) in chunk.iter_mut().zip(block.iter()) {
            *b ^= s;
        }
    }
    out
}

fn direction_byte(uplink: bool) -> u8 {
    if uplink {
        0x00
    } else {
        0x01
    }
}

// ── Frame-level operations ──────────────────────────────────────────

impl PhyPayload {
    /// Compute and set the uplink join MIC:
    /// `CMAC(AppKey, MHDR ‖ JoinEUI ‖ DevEUI ‖ DevNonce)[0..4]`.
    pub fn set_uplink_join_mic(&mut self, app_key: &Aes128Key) -> Result<(), LoraError> {
        let mic = self.uplink_join_mic(app_key)?;
        self.mic = mic;
        Ok(())
    }

    pub fn validate_uplink_join_mic(&self, app_key: &Aes128Key) -> Result<bool, LoraError> {
        Ok(self.uplink_join_mic(app_key)? == self.mic)
    }

    fn uplink_join_mic(&self, app_key: &Aes128Key) -> Result<Mic, LoraError> {
        let MacPayload::JoinRequest(jr) = &self.mac else {
            return Err(LoraError::PayloadMismatch(self.mhdr.mtype));
        };
        let mut msg = Vec::with_capacity(19);
        msg.push(self.mhdr.to_byte());
        msg.extend_from_slice(&jr.join_eui.to_wire());
        msg.extend_from_slice(&jr.dev_eui.to_wire());
        msg.extend_from_slice(&jr.dev_nonce.0.to_le_bytes());
        Ok(Mic(aes128_cmac(app_key, &msg)))
    }

    /// Compute and set the downlink join MIC over
    /// `0xFF ‖ JoinEUI ‖ DevNonce ‖ MHDR ‖ JoinAcceptPayload`.
    ///
    /// `dev_nonce` is the nonce from the Join-Request being answered;
    /// its inclusion lets a device reject Join-Accepts meant for a
    /// different join exchange. Requires the clear payload.
    pub fn set_downlink_join_mic(
        &mut self,
        join_eui: Eui64,
        dev_nonce: DevNonce,
        app_key: &Aes128Key,
    ) -> Result<(), LoraError> {
        let mic = self.downlink_join_mic(join_eui, dev_nonce, app_key)?;
        self.mic = mic;
        Ok(())
    }

    pub fn validate_downlink_join_mic(
        &self,
        join_eui: Eui64,
        dev_nonce: DevNonce,
        app_key: &Aes128Key,
    ) -> Result<bool, LoraError> {
        Ok(self.downlink_join_mic(join_eui, dev_nonce, app_key)? == self.mic)
    }

    fn downlink_join_mic(
        &self,
        join_eui: Eui64,
        dev_nonce: DevNonce,
        app_key: &Aes128Key,
    ) -> Result<Mic, LoraError> {
        let MacPayload::JoinAccept(JoinAccept::Clear(payload)) = &self.mac else {
            return Err(LoraError::JoinAcceptState("not decrypted"));
        };
        let mut msg = Vec::with_capacity(40);
        msg.push(JOIN_REQUEST_TYPE);
        msg.extend_from_slice(&join_eui.to_wire());
        msg.extend_from_slice(&dev_nonce.0.to_le_bytes());
        msg.push(self.mhdr.to_byte());
        msg.extend_from_slice(&payload.to_bytes());
        Ok(Mic(aes128_cmac(app_key, &msg)))
    }

    /// Encrypt a clear Join-Accept (payload ‖ MIC) for the wire.
    ///
    /// The network side applies the AES *decrypt* primitive so that
    /// end devices only ever need the encrypt path.
    pub fn encrypt_join_accept(&mut self, app_key: &Aes128Key) -> Result<(), LoraError> {
        let MacPayload::JoinAccept(JoinAccept::Clear(payload)) = &self.mac else {
            return Err(LoraError::JoinAcceptState("already encrypted"));
        };
        let mut buf = payload.to_bytes();
        buf.extend_from_slice(&self.mic.0);
        for chunk in buf.chunks_mut(16) {
            let block: &mut [u8; 16] = chunk.try_into().expect("16-byte aligned");
            aes128_decrypt_block(app_key, block);
        }
        self.mac = MacPayload::JoinAccept(JoinAccept::Encrypted(buf));
        self.mic = Mic::default();
        Ok(())
    }

    /// Decrypt a received Join-Accept, recovering payload and MIC.
    pub fn decrypt_join_accept(&mut self, app_key: &Aes128Key) -> Result<(), LoraError> {
        let MacPayload::JoinAccept(JoinAccept::Encrypted(ct)) = &self.mac else {
            return Err(LoraError::JoinAcceptState("already decrypted"));
        };
        let mut buf = ct.clone();
        for chunk in buf.chunks_mut(16) {
            let block: &mut [u8; 16] = chunk.try_into().expect("16-byte aligned");
            aes128_encrypt_block(app_key, block);
        }
        let mic_start = buf.len() - 4;
        let payload = crate::phy::JoinAcceptPayload::from_bytes(&buf[..mic_start])?;
        self.mic = Mic(buf[mic_start..].try_into().expect("4 bytes"));
        self.mac = MacPayload::JoinAccept(JoinAccept::Clear(payload));
        Ok(())
    }

    /// Compute and set the data MIC with the network session key.
    /// Direction comes from the MHDR; `fcnt` is the full 32-bit
    /// counter (the frame carries only its low half).
    pub fn set_data_mic(&mut self, nwk_s_key: &Aes128Key, fcnt: u32) -> Result<(), LoraError> {
        let mic = self.data_mic(nwk_s_key, fcnt)?;
        self.mic = mic;
        Ok(())
    }

    pub fn validate_data_mic(
        &self,
        nwk_s_key: &Aes128Key,
        fcnt: u32,
    ) -> Result<bool, LoraError> {
        Ok(self.data_mic(nwk_s_key, fcnt)? == self.mic)
    }

    fn data_mic(&self, nwk_s_key: &Aes128Key, fcnt: u32) -> Result<Mic, LoraError> {
        let MacPayload::Data(data) = &self.mac else {
            return Err(LoraError::PayloadMismatch(self.mhdr.mtype));
        };
        let mtype = self.mhdr.mtype;
        if !mtype.is_data_uplink() && !mtype.is_data_downlink() {
            return Err(LoraError::UnsupportedMType(mtype));
        }

        let frame = self.marshal()?;
        let msg = &frame[..frame.len() - 4];

        let mut b0 = [0u8; 16];
        b0[0] = 0x49;
        b0[5] = direction_byte(mtype.is_data_uplink());
        b0[6..10].copy_from_slice(&data.fhdr.dev_addr.to_wire());
        b0[10..14].copy_from_slice(&fcnt.to_le_bytes());
        b0[15] = msg.len() as u8;

        let mut input = Vec::with_capacity(16 + msg.len());
        input.extend_from_slice(&b0);
        input.extend_from_slice(msg);
        Ok(Mic(aes128_cmac(nwk_s_key, &input)))
    }
}

// ── Tests ───────────────────────────────────────────────────────────
