use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use voxlive_core::config::SessionConfig;
use voxlive_core::event::SessionEvent;
use voxlive_core::types::{ConnectionState, PlaybackUnit};
use voxlive_engine::connection::WebSocketConnector;
use voxlive_engine::session::StreamingSession;
use voxlive_engine::traits::{
    AudioSink, PlaybackCompletion, PlaybackError, TranscriptionError, TranscriptionProvider,
};
use voxlive_providers::gemini_transcribe::{GeminiTranscribeConfig, build_transcription_request};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestSink;

impl AudioSink for TestSink {
    fn start(&mut self, unit: &PlaybackUnit) -> Result<PlaybackCompletion, PlaybackError> {
        if unit.samples.is_empty() {
            return Err(PlaybackError::EmptyUnit);
        }
        Ok(futures_util::future::ready(()).boxed())
    }
}

/// Real request building and parsing against a mock HTTP endpoint.
struct HttpTranscriber {
    cfg: GeminiTranscribeConfig,
}

#[async_trait::async_trait]
impl TranscriptionProvider for HttpTranscriber {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, TranscriptionError> {
        let req = build_transcription_request(&self.cfg, audio, mime_type);
        let resp = voxlive_providers::runtime::execute(&req)
            .await
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;
        if !resp.is_success() {
            return Err(TranscriptionError::Status {
                status: resp.status,
                body: resp.body_snippet(512),
            });
        }
        voxlive_providers::parse::parse_generate_content_text(&resp.body)
            .map_err(|e| TranscriptionError::Decode(e.to_string()))
    }
}

async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("session ended");
        if pred(&ev) {
            return ev;
        }
    }
}

#[tokio::test]
async fn live_turn_round_trip_over_websocket() {
    let http = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash-8b:generateContent"))
        .and(header("x-goog-api-key", "k"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"candidates":[{"content":{"parts":[{"text":"hello from the model"}]}}]}"#,
            "application/json",
        ))
        .expect(1)
        .mount(&http)
        .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        // Setup request first, then acknowledge it.
        if let Some(Ok(Message::Text(t))) = ws.next().await {
            let _ = seen_tx.send(t.to_string());
        }
        ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
            .await
            .unwrap();

        // One media chunk from the client, answered with a two-fragment turn.
        if let Some(Ok(Message::Text(t))) = ws.next().await {
            let _ = seen_tx.send(t.to_string());
        }
        ws.send(Message::Text(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}}]}}}"#.into(),
        ))
        .await
        .unwrap();
        // Binary frames carry the same JSON.
        ws.send(Message::Binary(
            br#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"BBB="}}]},"turnComplete":true}}"#
                .to_vec()
                .into(),
        ))
        .await
        .unwrap();

        // Wait for the client's normal closure.
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(frame) = msg {
                let code = frame.map(|f| u16::from(f.code));
                let _ = seen_tx.send(format!("close:{code:?}"));
                break;
            }
        }
    });

    let cfg = SessionConfig::default();
    let transcriber = HttpTranscriber {
        cfg: GeminiTranscribeConfig {
            base_url: http.uri(),
            api_key: "k".into(),
            model: cfg.transcription_model.clone(),
            prompt: cfg.transcription_prompt.clone(),
        },
    };

    let (handle, mut events) = StreamingSession::spawn(
        &cfg,
        format!("ws://{addr}/"),
        Arc::new(WebSocketConnector::new(Duration::from_secs(2))),
        Box::new(TestSink),
        Arc::new(transcriber),
    );

    assert!(handle.connect().await);
    wait_for(&mut events, |e| *e == SessionEvent::SetupComplete).await;
    assert_eq!(handle.state(), ConnectionState::Ready);

    let setup: serde_json::Value = serde_json::from_str(&seen_rx.recv().await.unwrap()).unwrap();
    assert_eq!(setup["setup"]["model"], "models/gemini-2.0-flash-exp");

    assert!(handle.send_samples(&[0.0; 160]).await);
    let media: serde_json::Value = serde_json::from_str(&seen_rx.recv().await.unwrap()).unwrap();
    assert_eq!(media["realtime_input"]["media_chunks"][0]["mime_type"], "audio/pcm");

    let ev = wait_for(&mut events, |e| {
        matches!(
            e,
            SessionEvent::TranscriptionReady(_) | SessionEvent::TranscriptionFailed(_)
        )
    })
    .await;
    assert_eq!(
        ev,
        SessionEvent::TranscriptionReady("hello from the model".into())
    );

    assert!(handle.disconnect().await);
    assert_eq!(seen_rx.recv().await.as_deref(), Some("close:Some(1000)"));
    handle.shutdown().await;
}

#[tokio::test]
async fn server_rejecting_the_handshake_is_not_retried() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // Accept one connection and drop it without answering setup.
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        drop(ws);

        // Any further connection attempt would be accepted here.
        let second = tokio::time::timeout(Duration::from_millis(1500), listener.accept()).await;
        assert!(second.is_err(), "client reconnected after a failed handshake");
    });

    let http = MockServer::start().await;
    let (handle, mut events) = StreamingSession::spawn(
        &SessionConfig::default(),
        format!("ws://{addr}/"),
        Arc::new(WebSocketConnector::new(Duration::from_secs(2))),
        Box::new(TestSink),
        Arc::new(HttpTranscriber {
            cfg: GeminiTranscribeConfig {
                base_url: http.uri(),
                api_key: "k".into(),
                model: "m".into(),
                prompt: "p".into(),
            },
        }),
    );

    assert!(handle.connect().await);
    wait_for(&mut events, |e| {
        *e == SessionEvent::ConnectionStateChanged(ConnectionState::Closed)
    })
    .await;

    let more = tokio::time::timeout(Duration::from_millis(1500), async {
        wait_for(&mut events, |e| matches!(e, SessionEvent::Reconnecting { .. })).await
    })
    .await;
    assert!(more.is_err());
    assert_eq!(handle.state(), ConnectionState::Closed);
    server.await.unwrap();
}
