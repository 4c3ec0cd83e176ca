//! Simulator core: virtual LoRaWAN devices, virtual Basics Station
//! gateways, the network-server instances that own them, and the pool
//! that wires everything together.
//!
//! Traffic flows over two process-wide buses. Uplinks travel device →
//! pool → every network server → every owned gateway → LNS data
//! socket; downlinks travel the reverse path, with `DevAddr` routing
//! for data frames and broadcast self-selection for Join-Accepts.

pub mod device;
pub mod error;
pub mod gateway;
pub mod networkserver;
pub mod pool;

pub use device::{Device, DeviceInfo};
pub use error::CoreError;
pub use gateway::{ConnState, Gateway, GatewayInfo};
pub use networkserver::{NetworkServer, NsInfo};
pub use pool::Pool;
