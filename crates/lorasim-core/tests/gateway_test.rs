// Gateway connection lifecycle against in-process mock LNS servers.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use lorasim_core::Pool;
use lorasim_integration::{NsConfig, RemoteGateway};
use lorasim_lorawan::Eui64;

const GATEWAY_EUI: [u8; 8] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11];

/// Mock discovery endpoint: answers every router request with the
/// given data URI. Returns its ws:// URI and a channel of received
/// router messages.
async fn spawn_discovery(data_uri: String) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let data_uri = data_uri.clone();
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    let _ = seen_tx.send(text);
                }
                let reply = format!(r#"{{"uri":"{data_uri}"}}"#);
                let _ = ws.send(Message::Text(reply)).await;
                // Drain until the client closes the handshake socket.
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    (format!("ws://{addr}"), seen_rx)
}

/// Mock discovery endpoint that upgrades but never answers.
async fn spawn_mute_discovery() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    format!("ws://{addr}")
}

/// Mock data endpoint: records every received text frame and relays
/// pushed messages to the connected client.
async fn spawn_data() -> (
    String,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedSender<String>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let mut ws = accept_async(stream).await.unwrap();
        loop {
            tokio::select! {
                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let _ = seen_tx.send(text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                },
                Some(out) = push_rx.recv() => {
                    let _ = ws.send(Message::Text(out)).await;
                }
            }
        }
    });

    (format!("ws://{addr}/gateway/test"), seen_rx, push_tx)
}

async fn recv_with_timeout(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

#[tokio::test]
async fn connect_runs_discovery_then_data() {
    let (data_uri, mut data_seen, _push) = spawn_data().await;
    let (discovery_uri, mut discovery_seen) = spawn_discovery(data_uri.clone()).await;

    let pool = Pool::new();
    let ns = pool.add("test", NsConfig::default()).await.unwrap();
    let gateway = ns
        .add_gateway(RemoteGateway {
            eui: Eui64::new(GATEWAY_EUI),
            discovery_uri,
            location: None,
            headers: Vec::new(),
        })
        .unwrap();

    gateway.connect().await.unwrap();

    let info = gateway.info();
    assert_eq!(info.discovery_state, "disconnected");
    assert_eq!(info.data_state, "connected");
    assert_eq!(info.data_uri, data_uri);

    // Discovery saw the hyphenated router identity.
    let router_msg = recv_with_timeout(&mut discovery_seen).await;
    assert_eq!(router_msg, r#"{"router":"aa-bb-cc-dd-ee-ff-00-11"}"#);

    // The data socket opened with exactly one version frame.
    let version_msg = recv_with_timeout(&mut data_seen).await;
    assert_eq!(
        version_msg,
        r#"{"msgtype":"version","station":"lorawan-simulator","protocol":2}"#
    );
    assert!(data_seen.try_recv().is_err());

    gateway.disconnect().await.unwrap();
    let info = gateway.info();
    assert_eq!(info.discovery_state, "disconnected");
    assert_eq!(info.data_state, "disconnected");
}

#[tokio::test]
async fn connect_twice_is_rejected() {
    let (data_uri, _seen, _push) = spawn_data().await;
    let (discovery_uri, _discovery_seen) = spawn_discovery(data_uri).await;

    let pool = Pool::new();
    let ns = pool.add("test", NsConfig::default()).await.unwrap();
    let gateway = ns
        .add_gateway(RemoteGateway {
            eui: Eui64::new(GATEWAY_EUI),
            discovery_uri,
            location: None,
            headers: Vec::new(),
        })
        .unwrap();

    gateway.connect().await.unwrap();
    let err = gateway.connect().await.unwrap_err();
    assert_eq!(err.to_string(), "already connected");
}

#[tokio::test]
async fn disconnect_without_connect_is_rejected() {
    let pool = Pool::new();
    let ns = pool.add("test", NsConfig::default()).await.unwrap();
    let gateway = ns
        .add_gateway(RemoteGateway {
            eui: Eui64::new(GATEWAY_EUI),
            discovery_uri: "ws://127.0.0.1:9".into(),
            location: None,
            headers: Vec::new(),
        })
        .unwrap();

    let err = gateway.disconnect().await.unwrap_err();
    assert_eq!(err.to_string(), "already disconnected");
}

#[tokio::test]
async fn dial_failure_returns_to_disconnected() {
    let pool = Pool::new();
    let ns = pool.add("test", NsConfig::default()).await.unwrap();
    // Nothing listens on port 9.
    let gateway = ns
        .add_gateway(RemoteGateway {
            eui: Eui64::new(GATEWAY_EUI),
            discovery_uri: "ws://127.0.0.1:9".into(),
            location: None,
            headers: Vec::new(),
        })
        .unwrap();

    let err = gateway.connect().await.unwrap_err();
    assert!(err.to_string().starts_with("dial failed"), "got: {err}");

    let info = gateway.info();
    assert_eq!(info.discovery_state, "disconnected");
    assert_eq!(info.data_state, "disconnected");
}

#[tokio::test]
async fn discovery_timeout_after_five_seconds() {
    let discovery_uri = spawn_mute_discovery().await;

    let pool = Pool::new();
    let ns = pool.add("test", NsConfig::default()).await.unwrap();
    let gateway = ns
        .add_gateway(RemoteGateway {
            eui: Eui64::new(GATEWAY_EUI),
            discovery_uri,
            location: None,
            headers: Vec::new(),
        })
        .unwrap();

    let started = Instant::now();
    let err = gateway.connect().await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.to_string(), "discovery response timed out");
    assert!(
        elapsed >= Duration::from_secs(4) && elapsed <= Duration::from_secs(6),
        "timeout fired after {elapsed:?}"
    );

    let info = gateway.info();
    assert_eq!(info.discovery_state, "disconnected");
    assert_eq!(info.data_state, "disconnected");
}
