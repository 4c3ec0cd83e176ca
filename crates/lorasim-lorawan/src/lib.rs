//! LoRaWAN 1.0.x frame codec and crypto primitives.
//!
//! Everything the simulator needs to speak LoRaWAN at the byte level:
//! the identifier and key value types, the [`PhyPayload`] frame model
//! with exact wire marshalling, AES-CMAC message integrity codes, the
//! LoRaWAN counter-mode payload encryption, Join-Accept
//! encryption/decryption, and OTAA session-key derivation.
//!
//! Frames target LoRaWAN 1.0.x: one network session key, 16-bit frame
//! counters on the wire, no rejoin handling.

pub mod crypto;
pub mod phy;
pub mod types;

use thiserror::Error;

pub use crypto::{derive_session_key, encrypt_frm_payload, SessionKeyTag};
pub use phy::{
    DlSettings, FCtrl, Fhdr, JoinAccept, JoinAcceptPayload, JoinRequestPayload, MacData,
    MacPayload, Major, Mhdr, MType, PhyPayload,
};
pub use types::{Aes128Key, DevAddr, DevNonce, Eui64, JoinNonce, Mic, NetId};

/// Errors produced by the codec layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoraError {
    /// Text did not parse as an EUI64 (wrong length or non-hex).
    #[error("invalid EUI64 text: {0}")]
    InvalidEui(String),

    /// Text did not parse as a 16-byte AES key.
    #[error("invalid AES-128 key text: {0}")]
    InvalidKey(String),

    /// Text did not parse as a 4-byte device address.
    #[error("invalid DevAddr text: {0}")]
    InvalidDevAddr(String),

    /// Frame bytes violate the LoRaWAN structure.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The MACPayload variant does not match the MHDR message type.
    #[error("MAC payload does not match message type {0}")]
    PayloadMismatch(MType),

    /// Operation is not defined for this message type.
    #[error("unsupported message type {0}")]
    UnsupportedMType(MType),

    /// Message integrity check failed.
    #[error("invalid MIC")]
    InvalidMic,

    /// Join-Accept is in the wrong encryption state for the operation.
    #[error("join-accept payload is {0}")]
    JoinAcceptState(&'static str),
}
