// End-to-end traffic flow: device ↔ pool buses ↔ network server ↔
// gateway ↔ mock LNS data socket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use lorasim_core::{Device, Pool};
use lorasim_integration::{NsConfig, RemoteDevice, RemoteGateway};
use lorasim_lorawan::{
    Aes128Key, DevAddr, DevNonce, DlSettings, Eui64, JoinAccept, JoinAcceptPayload, JoinNonce,
    MacPayload, Mhdr, Mic, MType, NetId, PhyPayload,
};

const DEV_EUI: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
const JOIN_EUI: [u8; 8] = [0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18];

fn app_key() -> Aes128Key {
    Aes128Key::new([
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0xff,
    ])
}

/// One-stop mock LNS: discovery and data on two listeners. Yields the
/// discovery URI, received data-socket frames, and a push handle.
async fn spawn_lns() -> (
    String,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedSender<String>,
) {
    let data_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let data_uri = format!("ws://{}", data_listener.local_addr().unwrap());
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let Ok((stream, _)) = data_listener.accept().await else {
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

    let discovery_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let discovery_uri = format!("ws://{}", discovery_listener.local_addr().unwrap());
    tokio::spawn(async move {
        while let Ok((stream, _)) = discovery_listener.accept().await {
            let data_uri = data_uri.clone();
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                let _ = ws.next().await;
                let _ = ws
                    .send(Message::Text(format!(r#"{{"uri":"{data_uri}"}}"#)))
                    .await;
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    (discovery_uri, seen_rx, push_tx)
}

async fn recv_json(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
    let text = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for LNS frame")
        .expect("LNS channel closed");
    serde_json::from_str(&text).expect("LNS frame is not JSON")
}

/// Poll until the device reports a derived network session key.
async fn wait_for_join(device: &Device) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if !device.info().nwk_s_key.is_zero() {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("device never joined");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn uplink_travels_from_device_to_lns_socket() {
    let (discovery_uri, mut lns_seen, _push) = spawn_lns().await;

    let pool = Pool::new();
    let ns = pool.add("e2e", NsConfig::default()).await.unwrap();
    let gateway = ns
        .add_gateway(RemoteGateway {
            eui: Eui64::new([0xaa; 8]),
            discovery_uri,
            location: None,
            headers: Vec::new(),
        })
        .unwrap();
    gateway.connect().await.unwrap();

    // Consume the version handshake.
    let version = recv_json(&mut lns_seen).await;
    assert_eq!(version["msgtype"], "version");

    let mut spec = RemoteDevice::new(Eui64::new(DEV_EUI), Eui64::new(JOIN_EUI), app_key());
    spec.dev_nonce = DevNonce(100);
    ns.add_device(spec).unwrap();

    // Join request reaches the LNS as a jreq.
    ns.send_join_request(Eui64::new(DEV_EUI)).unwrap();
    let jreq = recv_json(&mut lns_seen).await;
    assert_eq!(jreq["msgtype"], "jreq");
    assert_eq!(jreq["DevEui"], "01-02-03-04-05-06-07-08");
    assert_eq!(jreq["JoinEui"], "11-12-13-14-15-16-17-18");
    assert_eq!(jreq["DevNonce"], 100);

    // Data uplink reaches the LNS as an updf.
    ns.send_uplink(Eui64::new(DEV_EUI)).unwrap();
    let updf = recv_json(&mut lns_seen).await;
    assert_eq!(updf["msgtype"], "updf");
    assert_eq!(updf["FCnt"], 0);
    assert_eq!(updf["FPort"], 1);
}

#[tokio::test]
async fn join_accept_downlink_reaches_the_matching_device() {
    let (discovery_uri, mut lns_seen, push) = spawn_lns().await;

    let pool = Pool::new();
    let ns = pool.add("e2e", NsConfig::default()).await.unwrap();
    let gateway = ns
        .add_gateway(RemoteGateway {
            eui: Eui64::new([0xaa; 8]),
            discovery_uri,
            location: None,
            headers: Vec::new(),
        })
        .unwrap();
    gateway.connect().await.unwrap();
    let _ = recv_json(&mut lns_seen).await; // version

    let mut spec = RemoteDevice::new(Eui64::new(DEV_EUI), Eui64::new(JOIN_EUI), app_key());
    spec.dev_nonce = DevNonce(100);
    let device = ns.add_device(spec).unwrap();

    // The device joins; nonce 100 goes over the air.
    ns.send_join_request(Eui64::new(DEV_EUI)).unwrap();
    let _ = recv_json(&mut lns_seen).await; // jreq

    // The "network server" answers with an encrypted Join-Accept.
    let mut accept = PhyPayload {
        mhdr: Mhdr::new(MType::JoinAccept),
        mac: MacPayload::JoinAccept(JoinAccept::Clear(JoinAcceptPayload {
            join_nonce: JoinNonce::new(0x123456),
            home_net_id: NetId([0x00, 0x00, 0x01]),
            dev_addr: DevAddr::new([0x01, 0x02, 0x03, 0x04]),
            dl_settings: DlSettings::default(),
            rx_delay: 1,
            cf_list: None,
        })),
        mic: Mic::default(),
    };
    accept
        .set_downlink_join_mic(Eui64::new(JOIN_EUI), DevNonce(100), &app_key())
        .unwrap();
    accept.encrypt_join_accept(&app_key()).unwrap();
    let pdu = hex::encode(accept.marshal().unwrap());

    push.send(format!(
        r#"{{"msgtype":"dnmsg","DevEui":"01-02-03-04-05-06-07-08","pdu":"{pdu}"}}"#
    ))
    .unwrap();

    wait_for_join(&device).await;
    let info = device.info();
    assert_eq!(info.dev_addr, DevAddr::new([0x01, 0x02, 0x03, 0x04]));
    assert_eq!(info.fcnt_up, 0);
    assert_eq!(info.fcnt_dn, 0);
    assert_ne!(info.nwk_s_key, info.app_s_key);
}

#[tokio::test]
async fn unknown_lns_messages_are_ignored() {
    let (discovery_uri, mut lns_seen, push) = spawn_lns().await;

    let pool = Pool::new();
    let ns = pool.add("e2e", NsConfig::default()).await.unwrap();
    let gateway = ns
        .add_gateway(RemoteGateway {
            eui: Eui64::new([0xaa; 8]),
            discovery_uri,
            location: None,
            headers: Vec::new(),
        })
        .unwrap();
    gateway.connect().await.unwrap();
    let _ = recv_json(&mut lns_seen).await; // version

    // router_config and garbage must not break the read loop.
    push.send(r#"{"msgtype":"router_config","region":"EU863"}"#.into())
        .unwrap();
    push.send("not json".into()).unwrap();

    // The connection still works afterwards.
    let mut spec = RemoteDevice::new(Eui64::new(DEV_EUI), Eui64::new(JOIN_EUI), app_key());
    spec.dev_nonce = DevNonce(1);
    ns.add_device(spec).unwrap();
    ns.send_join_request(Eui64::new(DEV_EUI)).unwrap();
    let jreq = recv_json(&mut lns_seen).await;
    assert_eq!(jreq["msgtype"], "jreq");
}
