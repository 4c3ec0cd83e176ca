use thiserror::Error;

use lorasim_integration::IntegrationError;
use lorasim_lorawan::{LoraError, MType};

/// Top-level error type for the simulator core.
///
/// Variants are grouped by how callers treat them: validation errors
/// go straight back to the operator, state conflicts map to HTTP 409,
/// transient I/O is logged and surfaced, and protocol errors cover
/// everything the LoRaWAN and LNS layers can reject.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Validation ──────────────────────────────────────────────────
    #[error("invalid EUI: {0}")]
    BadEui(String),

    #[error("invalid AES-128 key: {0}")]
    BadKey(String),

    #[error("invalid DevAddr: {0}")]
    BadDevAddr(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    // ── State conflict ──────────────────────────────────────────────
    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("already connected")]
    AlreadyConnected,

    #[error("already connecting")]
    AlreadyConnecting,

    #[error("already disconnected")]
    AlreadyDisconnected,

    /// Operation needs a connected data socket.
    #[error("gateway not connected")]
    NotConnected,

    // ── Transient I/O ───────────────────────────────────────────────
    #[error("dial failed: {0}")]
    DialFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("close failed: {0}")]
    CloseFailed(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    // ── Protocol ────────────────────────────────────────────────────
    #[error("invalid MIC")]
    InvalidMic,

    #[error("invalid MAC payload")]
    InvalidMacPayload,

    #[error("unsupported message type {0}")]
    UnsupportedMType(MType),

    #[error("marshal failed: {0}")]
    Marshal(LoraError),

    #[error("JSON parse failed: {0}")]
    JsonParse(String),

    // ── Remote integration ──────────────────────────────────────────
    #[error("integration error: {0}")]
    Integration(#[from] IntegrationError),
}

impl From<LoraError> for CoreError {
    fn from(err: LoraError) -> Self {
        match err {
            LoraError::InvalidMic => Self::InvalidMic,
            LoraError::UnsupportedMType(mtype) => Self::UnsupportedMType(mtype),
            LoraError::PayloadMismatch(_) => Self::InvalidMacPayload,
            LoraError::InvalidEui(text) => Self::BadEui(text),
            LoraError::InvalidKey(text) => Self::BadKey(text),
            LoraError::InvalidDevAddr(text) => Self::BadDevAddr(text),
            other => Self::Marshal(other),
        }
    }
}

impl CoreError {
    /// Operator input was malformed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::BadEui(_) | Self::BadKey(_) | Self::BadDevAddr(_) | Self::MissingField(_)
        )
    }

    /// The entity exists/doesn't exist or is in the wrong state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists(_)
                | Self::AlreadyConnected
                | Self::AlreadyConnecting
                | Self::AlreadyDisconnected
                | Self::NotConnected
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
