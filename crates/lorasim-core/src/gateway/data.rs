// LNS data leg: persistent WebSocket, JSON↔binary codec for uplinks
// and downlinks, and the read/write loops.
//
// The send channel is the single serialization point for outbound
// writes; any number of tasks may call `forward` concurrently.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::ClientRequestBuilder;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use lorasim_lorawan::{Eui64, MacPayload, MType, PhyPayload};

use crate::error::CoreError;
use crate::gateway::{ConnState, Gateway};

const SEND_QUEUE_CAPACITY: usize = 32;

/// Version handshake opening every data connection; the server is
/// expected to answer with a `router_config`.
const VERSION_MSG: &str =
    r#"{"msgtype":"version","station":"lorawan-simulator","protocol":2}"#;

// TODO: dynamic DR, Freq and upinfo once the RF layer models them.
const UPLINK_DR: u8 = 5;
const UPLINK_FREQ: u32 = 868_300_000;
const UPINFO: &str = r#"{"rctx":0,"xtime":26740123065958450,"gpstime":0,"rssi":-50,"snr":9}"#;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

impl Gateway {
    /// Dial the data URI, spawn the read and write loops, and send
    /// the version message.
    pub(super) async fn data_connect(&self, uri: String) -> Result<(), CoreError> {
        self.set_data_state(ConnState::Connecting);
        info!(gateway = %self.eui(), "data connecting");

        let parsed: Uri = match uri.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(gateway = %self.eui(), error = %e, "invalid data URI");
                self.set_data_state(ConnState::Disconnected);
                return Err(CoreError::DialFailed(format!("invalid data URI: {e}")));
            }
        };
        let mut request = ClientRequestBuilder::new(parsed);
        for (key, value) in &self.headers {
            request = request.with_header(key.clone(), value.clone());
        }

        let (ws, _) = match connect_async(request).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(gateway = %self.eui(), error = %e, "data connection error");
                self.set_data_state(ConnState::Disconnected);
                return Err(CoreError::DialFailed(e.to_string()));
            }
        };

        let (sink, stream) = ws.split();
        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);

        let read_task = tokio::spawn(read_loop(self.eui(), stream, self.downlink_tx.clone()));
        let write_task = tokio::spawn(write_loop(self.eui(), sink, send_rx));
        self.install_conn(send_tx, read_task, write_task);
        info!(gateway = %self.eui(), "data connected");

        self.send(VERSION_MSG.to_string()).await
    }

    /// Translate one LoRaWAN uplink into its LNS JSON message and
    /// enqueue it on the data socket.
    pub async fn forward(&self, frame: &PhyPayload) -> Result<(), CoreError> {
        let message = encode_uplink(frame)?;
        self.send(message).await
    }
}

/// Build the `jreq`/`updf` message for an uplink frame.
fn encode_uplink(frame: &PhyPayload) -> Result<String, CoreError> {
    match frame.mhdr.mtype {
        MType::JoinRequest => {
            let MacPayload::JoinRequest(jr) = &frame.mac else {
                return Err(CoreError::InvalidMacPayload);
            };
            Ok(format!(
                r#"{{"msgtype":"jreq","MHdr":{mhdr},"JoinEui":"{join_eui}","DevEui":"{dev_eui}","DevNonce":{dev_nonce},"MIC":{mic},"DR":{UPLINK_DR},"Freq":{UPLINK_FREQ},"upinfo":{UPINFO}}}"#,
                mhdr = frame.mhdr.to_byte(),
                join_eui = jr.join_eui.to_hyphenated(),
                dev_eui = jr.dev_eui.to_hyphenated(),
                dev_nonce = jr.dev_nonce.0,
                mic = frame.mic.as_i32_le(),
            ))
        }
        MType::UnconfirmedDataUp | MType::ConfirmedDataUp => {
            let MacPayload::Data(data) = &frame.mac else {
                return Err(CoreError::InvalidMacPayload);
            };
            Ok(format!(
                r#"{{"msgtype":"updf","MHdr":{mhdr},"DevAddr":{dev_addr},"FCtrl":{fctrl},"FCnt":{fcnt},"FOpts":"{fopts}","FPort":{fport},"FRMPayload":"{frm}","MIC":{mic},"DR":{UPLINK_DR},"Freq":{UPLINK_FREQ},"upinfo":{UPINFO}}}"#,
                mhdr = frame.mhdr.to_byte(),
                dev_addr = data.fhdr.dev_addr.as_i32_be(),
                fctrl = data.fhdr.fctrl.to_byte(data.fhdr.fopts.len()),
                fcnt = data.fhdr.fcnt,
                fopts = hex::encode(&data.fhdr.fopts),
                fport = data.fport.unwrap_or(0),
                frm = hex::encode(&data.frm_payload),
                mic = frame.mic.as_i32_le(),
            ))
        }
        mtype => Err(CoreError::UnsupportedMType(mtype)),
    }
}

/// Read text frames until the socket drops. `dnmsg` frames are
/// decoded and published on the downlink bus; everything else
/// (`router_config`, acks) is logged and ignored.
async fn read_loop(eui: Eui64, mut stream: WsStream, downlink_tx: mpsc::Sender<PhyPayload>) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(gateway = %eui, message = %text, "data read");
                handle_incoming(eui, &text, &downlink_tx);
            }
            Ok(Message::Close(_)) => {
                debug!(gateway = %eui, "data socket closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(gateway = %eui, error = %e, "data read error");
                break;
            }
        }
    }
}

fn handle_incoming(eui: Eui64, text: &str, downlink_tx: &mpsc::Sender<PhyPayload>) {
    #[derive(Deserialize)]
    struct Envelope {
        msgtype: String,
    }

    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(gateway = %eui, error = %e, "failed to parse message");
            return;
        }
    };

    match envelope.msgtype.as_str() {
        "dnmsg" => handle_downlink(eui, text, downlink_tx),
        other => debug!(gateway = %eui, msgtype = %other, "ignoring message"),
    }
}

fn handle_downlink(eui: Eui64, text: &str, downlink_tx: &mpsc::Sender<PhyPayload>) {
    #[derive(Deserialize)]
    struct Dnmsg {
        #[serde(default, rename = "DevEui")]
        dev_eui: Option<String>,
        pdu: String,
    }

    let dnmsg: Dnmsg = match serde_json::from_str(text) {
        Ok(dnmsg) => dnmsg,
        Err(e) => {
            warn!(gateway = %eui, error = %e, "failed to parse dnmsg");
            return;
        }
    };
    if let Some(dev_eui) = &dnmsg.dev_eui {
        debug!(gateway = %eui, device = %dev_eui, "downlink message");
    }

    let pdu = match hex::decode(&dnmsg.pdu) {
        Ok(pdu) => pdu,
        Err(e) => {
            warn!(gateway = %eui, error = %e, "failed to decode downlink PDU hex");
            return;
        }
    };
    let frame = match PhyPayload::unmarshal(&pdu) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(gateway = %eui, error = %e, "failed to unmarshal downlink frame");
            return;
        }
    };

    // Publish in a detached task so a saturated bus never stalls the
    // read loop.
    debug!(gateway = %eui, "broadcasting downlink");
    let downlink_tx = downlink_tx.clone();
    tokio::spawn(async move {
        if downlink_tx.send(frame).await.is_err() {
            warn!(gateway = %eui, "downlink bus closed, frame dropped");
        }
    });
}

/// Drain the send channel onto the socket. When the channel closes
/// (the disconnect path dropped the sender) the socket is closed so
/// the read loop collapses cleanly.
async fn write_loop(
    eui: Eui64,
    mut sink: WsSink,
    mut send_rx: mpsc::Receiver<String>,
) -> Result<(), CoreError> {
    while let Some(message) = send_rx.recv().await {
        debug!(gateway = %eui, message = %message, "data write");
        if let Err(e) = sink.send(Message::Text(message)).await {
            warn!(gateway = %eui, error = %e, "data write error");
            return Err(CoreError::WriteFailed(e.to_string()));
        }
    }
    sink.close()
        .await
        .map_err(|e| CoreError::CloseFailed(e.to_string()))
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lorasim_lorawan::{
        Aes128Key, DevAddr, DevNonce, Eui64, FCtrl, Fhdr, JoinRequestPayload, MacData, Mhdr, Mic,
    };

    #[test]
    fn encodes_join_request() {
        let mut frame = PhyPayload {
            mhdr: Mhdr::new(MType::JoinRequest),
            mac: MacPayload::JoinRequest(JoinRequestPayload {
                join_eui: Eui64::new([0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]),
                dev_eui: Eui64::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]),
                dev_nonce: DevNonce(100),
            }),
            mic: Mic([0xef, 0xbe, 0xad, 0xde]),
        };
        frame
            .set_uplink_join_mic(&Aes128Key::new([0x42; 16]))
            .unwrap();

        let msg = encode_uplink(&frame).unwrap();
        assert!(msg.starts_with(r#"{"msgtype":"jreq","MHdr":0,"#));
        assert!(msg.contains(r#""JoinEui":"11-12-13-14-15-16-17-18""#));
        assert!(msg.contains(r#""DevEui":"01-02-03-04-05-06-07-08""#));
        assert!(msg.contains(r#""DevNonce":100"#));
        assert!(msg.contains(r#""DR":5,"Freq":868300000"#));
        // Parseable JSON with the expected envelope.
        let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["msgtype"], "jreq");
        assert_eq!(value["upinfo"]["rssi"], -50);
    }

    #[test]
    fn encodes_data_uplink() {
        let frame = PhyPayload {
            mhdr: Mhdr::new(MType::ConfirmedDataUp),
            mac: MacPayload::Data(MacData {
                fhdr: Fhdr {
                    dev_addr: DevAddr::new([0xff, 0x00, 0x00, 0x01]),
                    fctrl: FCtrl {
                        adr: true,
                        ..FCtrl::default()
                    },
                    fcnt: 66,
                    fopts: vec![0x02, 0x03],
                },
                fport: Some(1),
                frm_payload: vec![0xca, 0xfe],
            }),
            mic: Mic([0x78, 0x56, 0x34, 0x12]),
        };

        let msg = encode_uplink(&frame).unwrap();
        let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["msgtype"], "updf");
        assert_eq!(value["MHdr"], 0x80);
        // Signed big-endian view of ff000001.
        assert_eq!(value["DevAddr"], -16777215);
        assert_eq!(value["FCtrl"], 0x82);
        assert_eq!(value["FCnt"], 66);
        assert_eq!(value["FOpts"], "0203");
        assert_eq!(value["FPort"], 1);
        assert_eq!(value["FRMPayload"], "cafe");
        // Signed little-endian view of the MIC bytes.
        assert_eq!(value["MIC"], 0x12345678);
    }

    #[test]
    fn rejects_downlink_frames() {
        let frame = PhyPayload {
            mhdr: Mhdr::new(MType::UnconfirmedDataDown),
            mac: MacPayload::Data(MacData::default()),
            mic: Mic::default(),
        };
        assert!(matches!(
            encode_uplink(&frame).unwrap_err(),
            CoreError::UnsupportedMType(MType::UnconfirmedDataDown)
        ));
    }
}
