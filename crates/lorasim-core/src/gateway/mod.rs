// ── Simulated Basics Station gateway ──
//
// LNS client with the two-phase handshake: a short-lived discovery
// WebSocket that yields the data URI, then a persistent data socket
// carrying the traffic. The gateway lock guards only field access;
// all socket I/O runs with it released.

mod data;
mod discovery;
mod state;

use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use lorasim_integration::{Location, RemoteGateway};
use lorasim_lorawan::{Eui64, PhyPayload};

use crate::error::CoreError;

pub use state::ConnState;

pub struct Gateway {
    eui: Eui64,
    discovery_uri: String,
    /// Extra headers attached to the data dial (bearer propagation).
    headers: Vec<(String, String)>,
    location: Option<Location>,
    state: RwLock<GatewayState>,
    downlink_tx: mpsc::Sender<PhyPayload>,
}

#[derive(Default)]
struct GatewayState {
    discovery_state: ConnState,
    data_state: ConnState,
    data_uri: String,
    conn: Option<DataConn>,
}

/// Live only while the data leg is connected.
struct DataConn {
    send_tx: mpsc::Sender<String>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<Result<(), CoreError>>,
}

/// Snapshot of a gateway for listings and API responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfo {
    pub eui: Eui64,
    pub discovery_uri: String,
    pub discovery_state: String,
    pub data_uri: String,
    pub data_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Gateway {
    pub(crate) fn new(downlink_tx: mpsc::Sender<PhyPayload>, spec: RemoteGateway) -> Arc<Self> {
        Arc::new(Self {
            eui: spec.eui,
            discovery_uri: spec.discovery_uri,
            headers: spec.headers,
            location: spec.location,
            state: RwLock::new(GatewayState::default()),
            downlink_tx,
        })
    }

    pub fn eui(&self) -> Eui64 {
        self.eui
    }

    pub fn discovery_uri(&self) -> &str {
        &self.discovery_uri
    }

    pub fn info(&self) -> GatewayInfo {
        let state = self.state.read().expect("gateway lock poisoned");
        GatewayInfo {
            eui: self.eui,
            discovery_uri: self.discovery_uri.clone(),
            discovery_state: state.discovery_state.to_string(),
            data_uri: state.data_uri.clone(),
            data_state: state.data_state.to_string(),
            location: self.location,
        }
    }

    /// Connect to the LNS: discovery handshake first, then the
    /// persistent data socket.
    pub async fn connect(&self) -> Result<(), CoreError> {
        {
            let state = self.state.read().expect("gateway lock poisoned");
            if state.data_state == ConnState::Connected {
                return Err(CoreError::AlreadyConnected);
            }
            if state.discovery_state == ConnState::Connecting
                || state.data_state == ConnState::Connecting
            {
                return Err(CoreError::AlreadyConnecting);
            }
        }

        let uri = self.discover().await?;
        {
            let mut state = self.state.write().expect("gateway lock poisoned");
            state.data_uri = uri.clone();
        }

        self.data_connect(uri).await
    }

    /// Tear the data leg down: close the send channel so the write
    /// loop drains and closes the socket, then wait for the read loop
    /// to observe the close.
    pub async fn disconnect(&self) -> Result<(), CoreError> {
        let conn = {
            let mut state = self.state.write().expect("gateway lock poisoned");
            if state.discovery_state == ConnState::Disconnected
                && state.data_state == ConnState::Disconnected
            {
                return Err(CoreError::AlreadyDisconnected);
            }
            match state.conn.take() {
                Some(conn) => {
                    state.data_state = ConnState::Disconnecting;
                    conn
                }
                None => {
                    // Discovery in flight, or a previous close failed.
                    return Err(match state.data_state {
                        ConnState::DisconnectionError => {
                            CoreError::CloseFailed("previous disconnect failed".into())
                        }
                        _ => CoreError::AlreadyConnecting,
                    });
                }
            }
        };

        info!(gateway = %self.eui, "data disconnecting");
        drop(conn.send_tx);

        match conn.write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(CoreError::CloseFailed(reason))) => {
                self.set_data_state(ConnState::DisconnectionError);
                warn!(gateway = %self.eui, error = %reason, "data disconnection error");
                return Err(CoreError::CloseFailed(reason));
            }
            // The write loop died before the close handshake, so no
            // close frame will reach the peer; force the read loop
            // down instead of waiting for one.
            _ => conn.read_task.abort(),
        }

        let _ = conn.read_task.await;

        self.set_data_state(ConnState::Disconnected);
        info!(gateway = %self.eui, "data disconnected");
        Ok(())
    }

    /// Enqueue one outbound LNS message. Fails when the data leg is
    /// not connected.
    pub(crate) async fn send(&self, message: String) -> Result<(), CoreError> {
        let send_tx = {
            let state = self.state.read().expect("gateway lock poisoned");
            state.conn.as_ref().map(|c| c.send_tx.clone())
        };
        let Some(send_tx) = send_tx else {
            warn!(gateway = %self.eui, "data write refused: not connected");
            return Err(CoreError::NotConnected);
        };
        send_tx
            .send(message)
            .await
            .map_err(|_| CoreError::WriteFailed("send channel closed".into()))
    }

    pub(super) fn set_discovery_state(&self, value: ConnState) {
        self.state
            .write()
            .expect("gateway lock poisoned")
            .discovery_state = value;
    }

    pub(super) fn set_data_state(&self, value: ConnState) {
        self.state.write().expect("gateway lock poisoned").data_state = value;
    }

    pub(super) fn install_conn(
        &self,
        send_tx: mpsc::Sender<String>,
        read_task: JoinHandle<()>,
        write_task: JoinHandle<Result<(), CoreError>>,
    ) {
        let mut state = self.state.write().expect("gateway lock poisoned");
        state.conn = Some(DataConn {
            send_tx,
            read_task,
            write_task,
        });
        state.data_state = ConnState::Connected;
    }
}
