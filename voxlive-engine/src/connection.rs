// Socket lifecycle: connect, handshake, send, reconnect-with-backoff, teardown.
//
// The manager is the single writer of the connection state. It never performs
// I/O on its own; the session loop drives it by awaiting `next_event` and
// feeding the result back through the `on_*` methods.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{self, BoxFuture};
use tokio::sync::{mpsc, watch};
use voxlive_core::config::SessionConfig;
use voxlive_core::event::SessionEvent;
use voxlive_core::types::{ConnectionState, OutboundChunk, SessionId};
use voxlive_providers::gemini_live::{build_media_chunk_message, build_setup_message};
use voxlive_providers::websocket::{
    CLOSE_NORMAL, TransportCommand, TransportEvent, TransportLink, connect_websocket,
};

use crate::traits::{Connector, EventSender, TransportError};

pub const DISCONNECT_REASON: &str = "Intentional disconnect";

type ConnectFuture = BoxFuture<'static, Result<TransportLink, TransportError>>;

/// Connector backed by a real websocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        connect_websocket(url, self.connect_timeout)
            .await
            .map_err(|e| TransportError::Connect(format!("{e:#}")))
    }
}

#[derive(Debug)]
pub enum ConnectionEvent {
    Opened(Result<TransportLink, TransportError>),
    ReconnectDue,
    /// `None` means the transport dropped its channel without a close event.
    Inbound(Option<TransportEvent>),
}

pub struct ConnectionManager {
    id: SessionId,
    url: String,
    model: String,
    response_modality: String,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,

    connector: Arc<dyn Connector>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    events: EventSender,

    link: Option<TransportLink>,
    pending_connect: Option<ConnectFuture>,
    reconnect_timer: Option<Pin<Box<tokio::time::Sleep>>>,

    // Reconnect only once the handshake has succeeded at least once, so a service
    // that rejects the handshake can't cause a reconnect loop.
    reached_ready: bool,
    reconnect_attempts: u32,
}

impl ConnectionManager {
    pub fn new(
        id: SessionId,
        cfg: &SessionConfig,
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        events: EventSender,
    ) -> (Self, watch::Receiver<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let mgr = Self {
            id,
            url: url.into(),
            model: cfg.model.clone(),
            response_modality: cfg.response_modality.clone(),
            reconnect_delay: cfg.reconnect_delay(),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            connector,
            state: ConnectionState::Idle,
            state_tx,
            events,
            link: None,
            pending_connect: None,
            reconnect_timer: None,
            reached_ready: false,
            reconnect_attempts: 0,
        };
        (mgr, state_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        log::debug!(
            "[{}] connection: {} -> {}",
            self.id,
            self.state.label(),
            next.label()
        );
        self.state = next;
        self.state_tx.send_replace(next);
        let _ = self.events.send(SessionEvent::ConnectionStateChanged(next));
    }

    /// Open a transport unless one is already open or opening.
    pub fn connect(&mut self) {
        if self.state.has_transport() {
            return;
        }
        // An explicit connect starts a fresh reconnect budget.
        if self.reconnect_timer.take().is_some() {
            log::debug!("[{}] explicit connect supersedes pending reconnect", self.id);
        }
        self.reached_ready = false;
        self.reconnect_attempts = 0;
        self.start_connect();
    }

    fn start_connect(&mut self) {
        let connector = self.connector.clone();
        let url = self.url.clone();
        self.pending_connect = Some(Box::pin(async move { connector.connect(&url).await }));
        self.set_state(ConnectionState::Connecting);
    }

    /// Wait for the next transport-level occurrence. Cancel-safe.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        tokio::select! {
            res = wait_connect(&mut self.pending_connect) => ConnectionEvent::Opened(res),
            _ = wait_timer(&mut self.reconnect_timer) => ConnectionEvent::ReconnectDue,
            ev = recv_inbound(&mut self.link) => ConnectionEvent::Inbound(ev),
        }
    }

    pub fn on_connect_result(&mut self, res: Result<TransportLink, TransportError>) {
        match res {
            Ok(link) => {
                log::info!("[{}] transport open", self.id);
                self.link = Some(link);
                self.set_state(ConnectionState::Connected);

                let setup = build_setup_message(&self.model, &self.response_modality);
                match self.send_text(setup) {
                    Ok(()) => self.set_state(ConnectionState::AwaitingSetup),
                    Err(e) => {
                        log::error!("[{}] failed to send setup: {e}", self.id);
                        self.link = None;
                        self.on_transport_closed(false, None);
                    }
                }
            }
            Err(e) => {
                log::error!("[{}] {e}", self.id);
                // A connection that never opened counts as an unclean close.
                self.on_transport_closed(false, None);
            }
        }
    }

    /// Returns true when this acknowledgement completed a handshake.
    pub fn on_setup_complete(&mut self) -> bool {
        if self.state != ConnectionState::AwaitingSetup {
            log::debug!(
                "[{}] ignoring setup acknowledgement in state {}",
                self.id,
                self.state.label()
            );
            return false;
        }
        self.reached_ready = true;
        self.reconnect_attempts = 0;
        self.set_state(ConnectionState::Ready);
        log::info!("[{}] session ready", self.id);
        true
    }

    pub fn on_transport_closed(&mut self, clean: bool, code: Option<u16>) {
        self.link = None;
        self.set_state(ConnectionState::Closed);

        let clean = clean || code == Some(CLOSE_NORMAL);
        if clean {
            log::info!("[{}] transport closed cleanly (code={code:?})", self.id);
            return;
        }
        if !self.reached_ready {
            log::warn!("[{}] transport closed before setup completed; not reconnecting", self.id);
            return;
        }
        if self.reconnect_attempts >= self.max_reconnect_attempts {
            log::error!(
                "[{}] giving up after {} reconnect attempts",
                self.id,
                self.reconnect_attempts
            );
            return;
        }

        self.reconnect_attempts += 1;
        log::warn!(
            "[{}] transport lost; reconnect attempt {} in {:?}",
            self.id,
            self.reconnect_attempts,
            self.reconnect_delay
        );
        self.reconnect_timer = Some(Box::pin(tokio::time::sleep(self.reconnect_delay)));
        let _ = self.events.send(SessionEvent::Reconnecting {
            attempt: self.reconnect_attempts,
            delay: self.reconnect_delay,
        });
    }

    pub fn on_reconnect_due(&mut self) {
        if self.state.has_transport() {
            return;
        }
        self.start_connect();
    }

    /// Upload one chunk. Dropped without effect unless the session is ready.
    pub fn send_media_chunk(&mut self, chunk: &OutboundChunk) {
        if !self.is_ready() {
            log::trace!("[{}] dropping media chunk in state {}", self.id, self.state.label());
            return;
        }

        let data = voxlive_core::codec::encode_base64(&chunk.bytes);
        let msg = build_media_chunk_message(&chunk.mime_type, &data);
        if let Err(e) = self.send_text(msg) {
            log::warn!("[{}] media chunk not sent: {e}", self.id);
        }
    }

    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::Closed)?;
        link.outbound
            .try_send(TransportCommand::Send(text))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    /// Close with a normal-closure frame and cancel any pending (re)connect.
    pub fn disconnect(&mut self) {
        self.pending_connect = None;
        self.reconnect_timer = None;
        self.reached_ready = false;
        self.reconnect_attempts = 0;

        if let Some(link) = self.link.take() {
            self.set_state(ConnectionState::Closing);
            let _ = link.outbound.try_send(TransportCommand::Close {
                code: CLOSE_NORMAL,
                reason: DISCONNECT_REASON.into(),
            });
            log::info!("[{}] disconnected", self.id);
        }
        self.set_state(ConnectionState::Closed);
    }
}

async fn wait_connect(slot: &mut Option<ConnectFuture>) -> Result<TransportLink, TransportError> {
    let res = match slot.as_mut() {
        Some(f) => f.await,
        None => future::pending().await,
    };
    *slot = None;
    res
}

async fn wait_timer(slot: &mut Option<Pin<Box<tokio::time::Sleep>>>) {
    match slot.as_mut() {
        Some(s) => s.as_mut().await,
        None => future::pending::<()>().await,
    }
    *slot = None;
}

async fn recv_inbound(slot: &mut Option<TransportLink>) -> Option<TransportEvent> {
    match slot.as_mut() {
        Some(link) => link.inbound.recv().await,
        None => future::pending().await,
    }
}
