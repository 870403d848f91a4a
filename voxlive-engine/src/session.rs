// Streaming session actor.
//
// One task owns the connection manager, the playback scheduler and the turn
// accumulator. Commands from handles, transport events, the reconnect timer and
// playback completions are all delivered through a single `select!`, so no two
// handlers ever run at the same time.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use voxlive_core::codec::f32_to_pcm16_bytes;
use voxlive_core::config::SessionConfig;
use voxlive_core::event::SessionEvent;
use voxlive_core::types::{ConnectionState, OutboundChunk, SessionId};
use voxlive_providers::gemini_live::{
    ServerEvent, decode_binary_frame, parse_server_message_for_rate,
};
use voxlive_providers::websocket::TransportEvent;

use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::playback::PlaybackScheduler;
use crate::traits::{AudioSink, Connector, EventSender, TranscriptionProvider};
use crate::turn::TurnAccumulator;

const COMMAND_QUEUE: usize = 256;

#[derive(Debug)]
enum SessionCmd {
    Connect,
    SendMedia(OutboundChunk),
    Disconnect,
    Shutdown,
}

/// Cheap, cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::Sender<SessionCmd>,
    state: watch::Receiver<ConnectionState>,
    input_mime_type: String,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Latest connection state published by the session.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub async fn connect(&self) -> bool {
        self.tx.send(SessionCmd::Connect).await.is_ok()
    }

    /// Queue a chunk for upload. The session drops it unless the handshake has completed.
    pub async fn send_media_chunk(&self, bytes: Vec<u8>, mime_type: impl Into<String>) -> bool {
        self.tx
            .send(SessionCmd::SendMedia(OutboundChunk {
                bytes,
                mime_type: mime_type.into(),
            }))
            .await
            .is_ok()
    }

    /// Non-blocking variant for capture callbacks. Returns false if the queue is full.
    pub fn try_send_media_chunk(&self, bytes: Vec<u8>, mime_type: impl Into<String>) -> bool {
        self.tx
            .try_send(SessionCmd::SendMedia(OutboundChunk {
                bytes,
                mime_type: mime_type.into(),
            }))
            .is_ok()
    }

    /// Upload normalized samples as PCM16 at the configured input format.
    pub async fn send_samples(&self, samples: &[f32]) -> bool {
        self.send_media_chunk(f32_to_pcm16_bytes(samples), self.input_mime_type.clone())
            .await
    }

    pub async fn disconnect(&self) -> bool {
        self.tx.send(SessionCmd::Disconnect).await.is_ok()
    }

    /// Disconnect and stop the session task.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(SessionCmd::Shutdown).await;
    }
}

pub struct StreamingSession {
    id: SessionId,
    output_sample_rate_hz: u32,
    conn: ConnectionManager,
    playback: PlaybackScheduler,
    turn: TurnAccumulator,
    cmd_rx: mpsc::Receiver<SessionCmd>,
    events: EventSender,
}

impl StreamingSession {
    /// Start a session task. Nothing is opened until `connect` is called.
    pub fn spawn(
        cfg: &SessionConfig,
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        sink: Box<dyn AudioSink>,
        transcriber: Arc<dyn TranscriptionProvider>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let id = SessionId::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();

        let (conn, state_rx) = ConnectionManager::new(id, cfg, url, connector, evt_tx.clone());
        let playback =
            PlaybackScheduler::new(id, cfg.output_sample_rate_hz, sink, evt_tx.clone());
        let turn = TurnAccumulator::new(id, cfg.output_sample_rate_hz, transcriber, evt_tx.clone());

        let session = StreamingSession {
            id,
            output_sample_rate_hz: cfg.output_sample_rate_hz,
            conn,
            playback,
            turn,
            cmd_rx,
            events: evt_tx,
        };
        tokio::spawn(session.run());

        let handle = SessionHandle {
            id,
            tx: cmd_tx,
            state: state_rx,
            input_mime_type: cfg.input_mime_type.clone(),
        };
        (handle, evt_rx)
    }

    async fn run(mut self) {
        log::debug!("[{}] session task started", self.id);
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCmd::Connect) => self.conn.connect(),
                        Some(SessionCmd::SendMedia(chunk)) => self.conn.send_media_chunk(&chunk),
                        Some(SessionCmd::Disconnect) => self.disconnect(),
                        Some(SessionCmd::Shutdown) | None => {
                            self.disconnect();
                            break;
                        }
                    }
                }
                ev = self.conn.next_event() => self.on_connection_event(ev),
                _ = self.playback.wait_current() => self.playback.on_unit_finished(),
            }
        }
        log::debug!("[{}] session task stopped", self.id);
    }

    fn disconnect(&mut self) {
        self.conn.disconnect();
        self.turn.discard();
    }

    fn on_connection_event(&mut self, ev: ConnectionEvent) {
        match ev {
            ConnectionEvent::Opened(res) => self.conn.on_connect_result(res),
            ConnectionEvent::ReconnectDue => self.conn.on_reconnect_due(),
            ConnectionEvent::Inbound(Some(TransportEvent::Text(text))) => self.handle_message(&text),
            ConnectionEvent::Inbound(Some(TransportEvent::Binary(bytes))) => {
                match decode_binary_frame(&bytes) {
                    Ok(text) => self.handle_message(&text),
                    Err(e) => log::warn!("[{}] dropping binary frame: {e}", self.id),
                }
            }
            ConnectionEvent::Inbound(Some(TransportEvent::Error(e))) => {
                log::error!("[{}] transport error: {e}", self.id);
                self.conn.on_transport_closed(false, None);
            }
            ConnectionEvent::Inbound(Some(TransportEvent::Closed {
                clean,
                code,
                reason,
            })) => {
                log::info!(
                    "[{}] transport closed: clean={clean} code={code:?} reason={reason:?}",
                    self.id
                );
                self.conn.on_transport_closed(clean, code);
            }
            ConnectionEvent::Inbound(None) => self.conn.on_transport_closed(false, None),
        }
    }

    fn handle_message(&mut self, text: &str) {
        let parsed = match parse_server_message_for_rate(text, self.output_sample_rate_hz) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("[{}] dropping server message: {e}", self.id);
                return;
            }
        };
        let _ = self.events.send(SessionEvent::MessageReceived(parsed.kind));

        for ev in parsed.events {
            if let ServerEvent::SetupComplete = ev {
                if self.conn.on_setup_complete() {
                    let _ = self.events.send(SessionEvent::SetupComplete);
                }
                continue;
            }

            // Setup must be the first message honored.
            if !self.conn.is_ready() {
                log::debug!("[{}] ignoring content before setup completed", self.id);
                continue;
            }

            match ev {
                ServerEvent::AudioFragment(fragment) => {
                    let _ = self.events.send(SessionEvent::AudioFragment {
                        mime_type: fragment.mime_type.clone(),
                        len: fragment.base64_payload.len(),
                    });
                    self.turn.append(&fragment.base64_payload);
                    if let Err(e) = self.playback.enqueue(&fragment) {
                        log::warn!("[{}] dropping audio fragment: {e}", self.id);
                    }
                }
                ServerEvent::Text(t) => {
                    let _ = self.events.send(SessionEvent::TextReceived(t));
                }
                ServerEvent::TurnComplete => {
                    self.turn.on_turn_complete();
                }
                ServerEvent::SetupComplete => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{PlaybackCompletion, PlaybackError, TranscriptionError, TransportError};
    use async_trait::async_trait;
    use futures_util::FutureExt;
    use std::sync::Mutex;
    use std::time::Duration;
    use voxlive_core::codec::{WAV_HEADER_LEN, decode_base64};
    use voxlive_core::types::{MessageKind, PlaybackUnit};
    use voxlive_providers::websocket::{TransportCommand, TransportLink};

    struct Remote {
        sent: mpsc::Receiver<TransportCommand>,
        events: mpsc::Sender<TransportEvent>,
    }

    impl Remote {
        async fn next_sent(&mut self) -> TransportCommand {
            tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
                .await
                .expect("timed out waiting for client frame")
                .expect("client dropped link")
        }

        async fn push(&self, json: &str) {
            self.events
                .send(TransportEvent::Text(json.to_string()))
                .await
                .unwrap();
        }
    }

    /// Each accepted connection is handed to the test through a channel.
    struct ChannelConnector {
        remotes: mpsc::UnboundedSender<Remote>,
    }

    #[async_trait]
    impl Connector for ChannelConnector {
        async fn connect(&self, _url: &str) -> Result<TransportLink, TransportError> {
            let (out_tx, out_rx) = mpsc::channel(64);
            let (in_tx, in_rx) = mpsc::channel(64);
            self.remotes
                .send(Remote {
                    sent: out_rx,
                    events: in_tx,
                })
                .map_err(|_| TransportError::Connect("test gone".into()))?;
            Ok(TransportLink::from_channels(out_tx, in_rx))
        }
    }

    /// Finishes every unit immediately.
    struct InstantSink;

    impl AudioSink for InstantSink {
        fn start(&mut self, unit: &PlaybackUnit) -> Result<PlaybackCompletion, PlaybackError> {
            if unit.samples.is_empty() {
                return Err(PlaybackError::EmptyUnit);
            }
            Ok(futures_util::future::ready(()).boxed())
        }
    }

    #[derive(Default)]
    struct RecordingTranscriber {
        calls: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl TranscriptionProvider for RecordingTranscriber {
        async fn transcribe(&self, audio: &[u8], _mime: &str) -> Result<String, TranscriptionError> {
            self.calls.lock().unwrap().push(audio.to_vec());
            Ok("transcribed".into())
        }
    }

    struct Harness {
        handle: SessionHandle,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        remotes: mpsc::UnboundedReceiver<Remote>,
        transcriber: Arc<RecordingTranscriber>,
    }

    impl Harness {
        fn new() -> Self {
            let (remote_tx, remotes) = mpsc::unbounded_channel();
            let transcriber = Arc::new(RecordingTranscriber::default());
            let (handle, events) = StreamingSession::spawn(
                &SessionConfig::default(),
                "mem://live",
                Arc::new(ChannelConnector { remotes: remote_tx }),
                Box::new(InstantSink),
                transcriber.clone(),
            );
            Self {
                handle,
                events,
                remotes,
                transcriber,
            }
        }

        async fn next_remote(&mut self) -> Remote {
            tokio::time::timeout(Duration::from_secs(5), self.remotes.recv())
                .await
                .expect("timed out waiting for connect")
                .expect("connector dropped")
        }

        async fn wait_for(&mut self, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
            loop {
                let ev = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                    .await
                    .expect("timed out waiting for event")
                    .expect("session ended");
                if pred(&ev) {
                    return ev;
                }
            }
        }

        /// Connect and complete the handshake.
        async fn ready(&mut self) -> Remote {
            assert!(self.handle.connect().await);
            let mut remote = self.next_remote().await;
            match remote.next_sent().await {
                TransportCommand::Send(s) => assert!(s.contains("\"setup\"")),
                other => panic!("expected setup, got {other:?}"),
            }
            remote.push(r#"{"setupComplete":{}}"#).await;
            self.wait_for(|e| *e == SessionEvent::SetupComplete).await;
            assert_eq!(self.handle.state(), ConnectionState::Ready);
            remote
        }
    }

    #[tokio::test]
    async fn handshake_then_media_flows() {
        let mut h = Harness::new();
        let mut remote = h.ready().await;

        assert!(h.handle.send_samples(&[0.0, 1.0]).await);
        match remote.next_sent().await {
            TransportCommand::Send(s) => {
                let v: serde_json::Value = serde_json::from_str(&s).unwrap();
                let chunk = &v["realtime_input"]["media_chunks"][0];
                assert_eq!(chunk["mime_type"], "audio/pcm");
                // 0 and 32767 little-endian.
                assert_eq!(chunk["data"], "AAD/fw==");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn media_before_setup_is_dropped() {
        let mut h = Harness::new();
        assert!(h.handle.send_media_chunk(vec![1, 2], "audio/pcm").await);
        assert!(h.handle.connect().await);
        let mut remote = h.next_remote().await;
        assert!(h.handle.send_media_chunk(vec![1, 2], "audio/pcm").await);

        // Only the setup request reaches the wire.
        assert!(matches!(remote.next_sent().await, TransportCommand::Send(s) if s.contains("setup")));
        remote.push(r#"{"setupComplete":true}"#).await;
        h.wait_for(|e| *e == SessionEvent::SetupComplete).await;

        assert!(h.handle.send_media_chunk(vec![1, 2], "audio/pcm").await);
        match remote.next_sent().await {
            TransportCommand::Send(s) => assert!(s.contains("AQI=")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn a_turn_plays_and_is_transcribed_once() {
        let mut h = Harness::new();
        let remote = h.ready().await;

        remote
            .push(r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}}]}}}"#)
            .await;
        remote
            .push(r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"BBB="}},{"text":"hi"}]}}}"#)
            .await;
        remote.push(r#"{"serverContent":{"turnComplete":true}}"#).await;

        let ev = h
            .wait_for(|e| matches!(e, SessionEvent::TranscriptionReady(_)))
            .await;
        assert_eq!(ev, SessionEvent::TranscriptionReady("transcribed".into()));

        let calls = h.transcriber.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let mut expected = decode_base64("AAA=").unwrap();
        expected.extend(decode_base64("BBB=").unwrap());
        assert_eq!(&calls[0][WAV_HEADER_LEN..], expected.as_slice());

        // Another turn-complete with no audio does nothing.
        remote.push(r#"{"serverContent":{"turnComplete":true}}"#).await;
        h.wait_for(|e| *e == SessionEvent::MessageReceived(MessageKind::ServerContent))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.transcriber.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn playback_reports_levels_and_burst_state() {
        let mut h = Harness::new();
        let remote = h.ready().await;

        remote
            .push(r#"{"serverContent":{"modelTurn":{"parts":[
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAQ="}},
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}}
            ]}}}"#)
            .await;

        assert_eq!(
            h.wait_for(|e| matches!(e, SessionEvent::AudioLevel(_))).await,
            SessionEvent::AudioLevel(15.625)
        );
        assert_eq!(
            h.wait_for(|e| matches!(e, SessionEvent::PlayingStateChanged(_)))
                .await,
            SessionEvent::PlayingStateChanged(true)
        );
        assert_eq!(
            h.wait_for(|e| matches!(e, SessionEvent::AudioLevel(_))).await,
            SessionEvent::AudioLevel(0.0)
        );
        assert_eq!(
            h.wait_for(|e| matches!(e, SessionEvent::PlayingStateChanged(_)))
                .await,
            SessionEvent::PlayingStateChanged(false)
        );
    }

    #[tokio::test]
    async fn malformed_messages_do_not_close_the_session() {
        let mut h = Harness::new();
        let mut remote = h.ready().await;

        remote.push("{not json").await;
        remote.push(r#"{"somethingNew":{}}"#).await;
        h.wait_for(|e| *e == SessionEvent::MessageReceived(MessageKind::Unknown))
            .await;
        assert_eq!(h.handle.state(), ConnectionState::Ready);

        assert!(h.handle.send_media_chunk(vec![0, 0], "audio/pcm").await);
        assert!(matches!(remote.next_sent().await, TransportCommand::Send(_)));
    }

    #[tokio::test]
    async fn disconnect_mid_turn_discards_audio() {
        let mut h = Harness::new();
        let mut remote = h.ready().await;

        remote
            .push(r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}}]}}}"#)
            .await;
        h.wait_for(|e| matches!(e, SessionEvent::AudioFragment { .. }))
            .await;

        assert!(h.handle.disconnect().await);
        assert!(matches!(
            remote.next_sent().await,
            TransportCommand::Close { code: 1000, .. }
        ));
        h.wait_for(|e| *e == SessionEvent::ConnectionStateChanged(ConnectionState::Closed))
            .await;
        assert_eq!(h.handle.state(), ConnectionState::Closed);

        // A fresh session's turn-complete must not flush the discarded fragment.
        let remote = h.ready().await;
        remote.push(r#"{"serverContent":{"turnComplete":true}}"#).await;
        h.wait_for(|e| *e == SessionEvent::MessageReceived(MessageKind::ServerContent))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.transcriber.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unclean_close_after_ready_reconnects() {
        let mut h = Harness::new();
        let remote = h.ready().await;

        remote
            .events
            .send(TransportEvent::Closed {
                clean: false,
                code: Some(1006),
                reason: String::new(),
            })
            .await
            .unwrap();

        let ev = h
            .wait_for(|e| matches!(e, SessionEvent::Reconnecting { .. }))
            .await;
        assert_eq!(
            ev,
            SessionEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );

        let mut second = h.next_remote().await;
        assert!(matches!(second.next_sent().await, TransportCommand::Send(s) if s.contains("setup")));
        h.wait_for(|e| *e == SessionEvent::ConnectionStateChanged(ConnectionState::AwaitingSetup))
            .await;
    }

    #[tokio::test]
    async fn shutdown_closes_the_event_stream() {
        let mut h = Harness::new();
        let mut remote = h.ready().await;

        h.handle.shutdown().await;
        assert_eq!(
            remote.next_sent().await,
            TransportCommand::Close {
                code: 1000,
                reason: "Intentional disconnect".into()
            }
        );
        while h.events.recv().await.is_some() {}
        assert!(!h.handle.connect().await);
    }
}
