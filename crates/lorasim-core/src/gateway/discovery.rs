// LNS discovery handshake: a short-lived WebSocket that trades the
// gateway's router identity for the data URI.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::gateway::{ConnState, Gateway};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

type WsConn = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The reply must carry `uri`; the router/muxs echo is ignored.
#[derive(Debug, Deserialize)]
struct DiscoveryReply {
    uri: String,
}

impl Gateway {
    /// Run the discovery handshake and return the data URI. The
    /// discovery socket is closed on every exit path and
    /// `discoveryState` always ends at `Disconnected`.
    pub(super) async fn discover(&self) -> Result<String, CoreError> {
        self.set_discovery_state(ConnState::Connecting);

        let url = format!("{}/router-info", self.discovery_uri());
        let (mut ws, _) = match connect_async(url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(gateway = %self.eui(), error = %e, "discovery connection error");
                self.set_discovery_state(ConnState::Disconnected);
                return Err(CoreError::DialFailed(e.to_string()));
            }
        };
        info!(gateway = %self.eui(), "discovery connected");
        self.set_discovery_state(ConnState::Connected);

        let result = self.discovery_exchange(&mut ws).await;

        if let Err(e) = ws.close(None).await {
            warn!(gateway = %self.eui(), error = %e, "discovery disconnection error");
        }
        info!(gateway = %self.eui(), "discovery disconnected");
        self.set_discovery_state(ConnState::Disconnected);

        result
    }

    async fn discovery_exchange(&self, ws: &mut WsConn) -> Result<String, CoreError> {
        let router_msg = format!(r#"{{"router":"{}"}}"#, self.eui().to_hyphenated());
        if let Err(e) = ws.send(Message::Text(router_msg.clone())).await {
            warn!(gateway = %self.eui(), error = %e, "discovery router error");
            return Err(CoreError::WriteFailed(e.to_string()));
        }
        debug!(gateway = %self.eui(), sent = %router_msg, "discovery sent");

        let reply = match tokio::time::timeout(DISCOVERY_TIMEOUT, ws.next()).await {
            Err(_) => {
                warn!(gateway = %self.eui(), "discovery response timeout");
                return Err(CoreError::Timeout("discovery response"));
            }
            Ok(None) => {
                warn!(gateway = %self.eui(), "discovery socket closed before reply");
                return Err(CoreError::ReadFailed("connection closed".into()));
            }
            Ok(Some(Err(e))) => {
                warn!(gateway = %self.eui(), error = %e, "discovery response error");
                return Err(CoreError::ReadFailed(e.to_string()));
            }
            Ok(Some(Ok(message))) => message,
        };

        let text = reply
            .into_text()
            .map_err(|e| CoreError::ReadFailed(e.to_string()))?;
        debug!(gateway = %self.eui(), response = %text, "discovery response");

        let reply: DiscoveryReply = serde_json::from_str(&text).map_err(|e| {
            warn!(gateway = %self.eui(), error = %e, "discovery response parse error");
            CoreError::JsonParse(e.to_string())
        })?;
        Ok(reply.uri)
    }
}
