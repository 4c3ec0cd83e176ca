// ── LoRaWAN value types ──
//
// Identifier and key newtypes shared by every layer of the simulator.
// All of them store bytes in display order (the order hex dumps and
// vendor UIs use); wire marshalling reverses to little-endian where
// LoRaWAN requires it. Text parsing is case-insensitive and tolerant
// of separators; emission is always lowercase.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::LoraError;

// ── Eui64 ───────────────────────────────────────────────────────────

/// 64-bit extended unique identifier (DevEUI, JoinEUI, gateway EUI).
///
/// Two external text forms exist: compact hex (`aabbccddeeff0011`,
/// REST paths) and hyphenated octets (`aa-bb-cc-dd-ee-ff-00-11`, the
/// LNS `router` field). Parsing accepts both, plus colon separators,
/// in either case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// True for the all-zero EUI (unset).
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 8]
    }

    /// Wire representation: LoRaWAN frames carry EUIs little-endian.
    pub fn to_wire(self) -> [u8; 8] {
        let mut b = self.0;
        b.reverse();
        b
    }

    pub fn from_wire(mut bytes: [u8; 8]) -> Self {
        bytes.reverse();
        Self(bytes)
    }

    /// Hyphenated octet form used as the LNS router identity:
    /// `aa-bb-cc-dd-ee-ff-00-11`.
    pub fn to_hyphenated(self) -> String {
        self.0
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join("-")
    }

    /// ID6 form (IPv6-style): four 16-bit blocks, leading zeros
    /// stripped, longest zero run compressed to `::`.
    ///
    /// `00-00-00-00-00-00-00-00` → `::0`, `00-01-00-00-00-00-00-00` →
    /// `1::`, `00-0f-a1-23-00-f8-01-00` → `f:a123:f8:100`.
    pub fn to_id6(self) -> String {
        let blocks: Vec<u16> = self
            .0
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();

        // Longest run of zero blocks wins the `::`.
        let (mut best_start, mut best_len) = (0usize, 0usize);
        let (mut run_start, mut run_len) = (0usize, 0usize);
        for (i, &b) in blocks.iter().enumerate() {
            if b == 0 {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
                if run_len > best_len {
                    best_start = run_start;
                    best_len = run_len;
                }
            } else {
                run_len = 0;
            }
        }

        let fmt_block = |b: &u16| format!("{b:x}");

        if best_len > 1 {
            if best_len == 4 {
                return "::0".to_string();
            }
            let head = blocks[..best_start]
                .iter()
                .map(fmt_block)
                .collect::<Vec<_>>()
                .join(":");
            let tail = blocks[best_start + best_len..]
                .iter()
                .map(fmt_block)
                .collect::<Vec<_>>()
                .join(":");
            return format!("{head}::{tail}");
        }

        blocks.iter().map(fmt_block).collect::<Vec<_>>().join(":")
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Eui64 {
    type Err = LoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| *c != '-' && *c != ':').collect();
        let bytes =
            hex::decode(&compact).map_err(|_| LoraError::InvalidEui(s.to_string()))?;
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| LoraError::InvalidEui(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl Serialize for Eui64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Eui64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ── DevAddr ─────────────────────────────────────────────────────────

/// 32-bit device address assigned by a Join-Accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DevAddr(pub [u8; 4]);

impl DevAddr {
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 4]
    }

    /// Wire representation (little-endian inside the FHDR).
    pub fn to_wire(self) -> [u8; 4] {
        let mut b = self.0;
        b.reverse();
        b
    }

    pub fn from_wire(mut bytes: [u8; 4]) -> Self {
        bytes.reverse();
        Self(bytes)
    }

    /// Signed big-endian view carried in the LNS `updf` DevAddr field.
    pub fn as_i32_be(self) -> i32 {
        i32::from_be_bytes(self.0)
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for DevAddr {
    type Err = LoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| LoraError::InvalidDevAddr(s.to_string()))?;
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| LoraError::InvalidDevAddr(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl Serialize for DevAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DevAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ── Aes128Key ───────────────────────────────────────────────────────

/// 128-bit AES key (AppKey or derived session key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Aes128Key(pub [u8; 16]);

impl Aes128Key {
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl fmt::Display for Aes128Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

// Key material stays out of debug output.
impl fmt::Debug for Aes128Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aes128Key(****)")
    }
}

impl FromStr for Aes128Key {
    type Err = LoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| LoraError::InvalidKey(s.to_string()))?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| LoraError::InvalidKey(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl Serialize for Aes128Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Aes128Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ── Small numeric types ─────────────────────────────────────────────

/// 16-bit join anti-replay nonce, incremented per Join-Request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DevNonce(pub u16);

impl DevNonce {
    /// The nonce carried by the previous Join-Request, if any.
    pub fn previous(self) -> DevNonce {
        DevNonce(self.0.wrapping_sub(1))
    }
}

impl fmt::Display for DevNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 24-bit server join nonce from the Join-Accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JoinNonce(u32);

impl JoinNonce {
    /// Truncates to 24 bits.
    pub fn new(value: u32) -> Self {
        Self(value & 0x00ff_ffff)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Three little-endian wire bytes.
    pub fn to_wire(self) -> [u8; 3] {
        let b = self.0.to_le_bytes();
        [b[0], b[1], b[2]]
    }

    pub fn from_wire(bytes: [u8; 3]) -> Self {
        Self(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
    }
}

/// 24-bit network identifier from the Join-Accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NetId(pub [u8; 3]);

impl NetId {
    /// Wire representation (little-endian).
    pub fn to_wire(self) -> [u8; 3] {
        let mut b = self.0;
        b.reverse();
        b
    }

    pub fn from_wire(mut bytes: [u8; 3]) -> Self {
        bytes.reverse();
        Self(bytes)
    }
}

/// 4-byte message integrity code (truncated AES-CMAC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mic(pub [u8; 4]);

impl Mic {
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 4]
    }

    /// Signed little-endian view carried in LNS uplink JSON.
    pub fn as_i32_le(self) -> i32 {
        i32::from_le_bytes(self.0)
    }
}

impl fmt::Display for Mic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eui_display_roundtrip() {
        let eui = Eui64::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11]);
        assert_eq!(eui.to_string(), "aabbccddeeff0011");
        assert_eq!("aabbccddeeff0011".parse::<Eui64>().unwrap(), eui);
    }

    #[test]
    fn eui_parse_accepts_all_forms() {
        let expected = Eui64::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11]);
        for text in [
            "aabbccddeeff0011",
            "AABBCCDDEEFF0011",
            "aa-bb-cc-dd-ee-ff-00-11",
            "AA-BB-CC-DD-EE-FF-00-11",
            "aa:bb:cc:dd:ee:ff:00:11",
        ] {
            assert_eq!(text.parse::<Eui64>().unwrap(), expected, "form {text}");
        }
    }

    #[test]
    fn eui_parse_rejects_bad_input() {
        assert!("aabb".parse::<Eui64>().is_err());
        assert!("aabbccddeeff001122".parse::<Eui64>().is_err());
        assert!("zzbbccddeeff0011".parse::<Eui64>().is_err());
    }

    #[test]
    fn eui_hyphenated_matches_router_form() {
        let eui = Eui64::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11]);
        assert_eq!(eui.to_hyphenated(), "aa-bb-cc-dd-ee-ff-00-11");
        assert_eq!(eui.to_hyphenated().parse::<Eui64>().unwrap(), eui);
    }

    #[test]
    fn eui_wire_order_is_reversed() {
        let eui = Eui64::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(
            eui.to_wire(),
            [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
        assert_eq!(Eui64::from_wire(eui.to_wire()), eui);
    }

    #[test]
    fn eui_id6_forms() {
        assert_eq!(Eui64::new([0; 8]).to_id6(), "::0");
        assert_eq!(
            Eui64::new([0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]).to_id6(),
            "1::"
        );
        assert_eq!(
            Eui64::new([0x00, 0x0f, 0xa1, 0x23, 0x00, 0xf8, 0x01, 0x00]).to_id6(),
            "f:a123:f8:100"
        );
        assert_eq!(
            Eui64::new([0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02]).to_id6(),
            "1::2"
        );
        assert_eq!(
            Eui64::new([0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04]).to_id6(),
            "1:2:3:4"
        );
    }

    #[test]
    fn devaddr_views() {
        let addr = DevAddr::new([0x01, 0x02, 0x03, 0x04]);
        assert_eq!(addr.to_string(), "01020304");
        assert_eq!("01020304".parse::<DevAddr>().unwrap(), addr);
        assert_eq!(addr.to_wire(), [0x04, 0x03, 0x02, 0x01]);
        assert_eq!(addr.as_i32_be(), 0x0102_0304);
        // High bit set becomes negative in the signed view.
        assert_eq!(DevAddr::new([0xff, 0x00, 0x00, 0x00]).as_i32_be(), -16777216);
    }

    #[test]
    fn key_parse_and_debug_redaction() {
        let key: Aes128Key = "000102030405060708090a0b0c0d0e0f".parse().unwrap();
        assert_eq!(key.to_string(), "000102030405060708090a0b0c0d0e0f");
        assert_eq!(format!("{key:?}"), "Aes128Key(****)");
        assert!("0001".parse::<Aes128Key>().is_err());
    }

    #[test]
    fn join_nonce_is_24_bit() {
        assert_eq!(JoinNonce::new(0xff12_3456).value(), 0x0012_3456);
        let n = JoinNonce::new(0x123456);
        assert_eq!(n.to_wire(), [0x56, 0x34, 0x12]);
        assert_eq!(JoinNonce::from_wire(n.to_wire()), n);
    }

    #[test]
    fn mic_signed_view() {
        let mic = Mic([0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(mic.as_i32_le(), 0xdead_beefu32 as i32);
    }

    #[test]
    fn eui_serde_as_string() {
        let eui = Eui64::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        let json = serde_json::to_string(&eui).unwrap();
        assert_eq!(json, "\"0102030405060708\"");
        let back: Eui64 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, eui);
    }
}
