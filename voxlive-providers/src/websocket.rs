// Websocket transport: one connection split into a writer task and a reader task,
// exposed to the session as a pair of channels.

use std::time::Duration;

use anyhow::{Context, anyhow};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(3);

pub const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    Send(String),
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Binary(Vec<u8>),
    Error(String),
    /// `clean` is true when the closing handshake completed.
    Closed {
        clean: bool,
        code: Option<u16>,
        reason: String,
    },
}

/// An open transport. Dropping `outbound` closes the socket.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<TransportCommand>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

impl TransportLink {
    /// Build a link from raw channel halves (used by in-memory transports).
    pub fn from_channels(
        outbound: mpsc::Sender<TransportCommand>,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }
}

pub async fn connect_websocket(
    url: &str,
    connect_timeout: Duration,
) -> anyhow::Result<TransportLink> {
    let req = url
        .into_client_request()
        .context("build websocket request")?;

    // Connect with a hard timeout so we can't hang on a bad network.
    let (ws, _resp) = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(req))
        .await
        .map_err(|_| anyhow!("websocket connect timed out"))?
        .context("connect websocket")?;

    let (ws_write, mut ws_read) = ws.split();

    let (out_tx, mut out_rx) = mpsc::channel::<TransportCommand>(256);
    let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(256);

    // Pongs go on their own channel so they are never queued behind media.
    let (pong_tx, mut pong_rx) = mpsc::channel::<Message>(8);

    let writer_events = in_tx.clone();
    tokio::spawn(async move {
        let mut ws_write = ws_write;
        let mut pong_closed = false;

        loop {
            let msg: Message = tokio::select! {
                biased;
                pong = pong_rx.recv(), if !pong_closed => {
                    match pong {
                        Some(p) => p,
                        None => { pong_closed = true; continue; }
                    }
                }
                cmd = out_rx.recv() => {
                    match cmd {
                        Some(TransportCommand::Send(text)) => Message::Text(text.into()),
                        Some(TransportCommand::Close { code, reason }) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            };
                            let _ = ws_write.send(Message::Close(Some(frame))).await;
                            break;
                        }
                        None => {
                            let _ = ws_write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            };

            let res = tokio::time::timeout(WS_SEND_TIMEOUT, ws_write.send(msg)).await;
            if !matches!(res, Ok(Ok(()))) {
                let _ = writer_events
                    .send(TransportEvent::Error("websocket send failed".into()))
                    .await;
                break;
            }
        }
    });

    tokio::spawn(async move {
        loop {
            let ev = match ws_read.next().await {
                None => TransportEvent::Closed {
                    clean: false,
                    code: None,
                    reason: "stream ended".into(),
                },
                Some(Err(e)) => {
                    let _ = in_tx
                        .send(TransportEvent::Error(format!("websocket read failed: {e}")))
                        .await;
                    TransportEvent::Closed {
                        clean: false,
                        code: None,
                        reason: e.to_string(),
                    }
                }
                Some(Ok(Message::Text(t))) => TransportEvent::Text(t.to_string()),
                Some(Ok(Message::Binary(b))) => TransportEvent::Binary(b.to_vec()),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                        None => (None, String::new()),
                    };
                    TransportEvent::Closed {
                        clean: true,
                        code,
                        reason,
                    }
                }
                Some(Ok(Message::Ping(p))) => {
                    if pong_tx.try_send(Message::Pong(p)).is_err() {
                        log::debug!("dropping pong: writer busy or gone");
                    }
                    continue;
                }
                Some(Ok(_)) => continue,
            };

            let closed = matches!(ev, TransportEvent::Closed { .. });
            if in_tx.send(ev).await.is_err() || closed {
                break;
            }
        }
    });

    Ok(TransportLink {
        outbound: out_tx,
        inbound: in_rx,
    })
}
