// Shared HTTP transport for the vendor adapters.
//
// Every adapter gets the same timeout and user agent; the auth header
// is injected as a client default so individual requests stay clean.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use crate::IntegrationError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a `reqwest::Client` with an optional `Authorization` value
/// attached to every request.
pub(crate) fn build_client(authorization: Option<&str>) -> Result<reqwest::Client, IntegrationError> {
    let mut headers = HeaderMap::new();
    if let Some(value) = authorization {
        let mut value = HeaderValue::from_str(value)
            .map_err(|_| IntegrationError::Decode {
                vendor: "transport",
                message: "authorization value contains invalid characters".into(),
            })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("lorasim/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .build()?)
}
