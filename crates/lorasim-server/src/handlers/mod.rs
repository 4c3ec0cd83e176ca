pub mod devices;
pub mod gateways;
pub mod networkservers;

use std::sync::Arc;

use lorasim_core::{CoreError, NetworkServer, Pool};
use lorasim_lorawan::Eui64;

use crate::http::ApiError;

/// Resolve the network server named in the path.
pub(crate) fn lookup_ns(pool: &Pool, name: &str) -> Result<Arc<NetworkServer>, ApiError> {
    pool.get(name).map_err(ApiError)
}

/// Parse an EUI path segment, mapping failure to a 400.
pub(crate) fn parse_eui(text: &str) -> Result<Eui64, ApiError> {
    text.parse()
        .map_err(|_| ApiError(CoreError::BadEui(text.to_string())))
}
