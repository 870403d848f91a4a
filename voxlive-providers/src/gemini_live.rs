// Gemini Live (BidiGenerateContent) wire protocol.
//
// Outbound messages are plain JSON values. Inbound parsing is deliberately
// tolerant: unknown fields and message kinds are ignored, only malformed JSON
// is an error.

use anyhow::Context;
use serde_json::{Value, json};
use url::Url;
use voxlive_core::types::{InboundAudioFragment, MessageKind};

pub const OUTPUT_AUDIO_MIME: &str = "audio/pcm;rate=24000";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolParseError {
    #[error("decode server message JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    SetupComplete,
    AudioFragment(InboundAudioFragment),
    Text(String),
    TurnComplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub kind: MessageKind,
    pub events: Vec<ServerEvent>,
}

pub fn build_live_ws_url(base: &str, api_key: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(base).context("parse live websocket url")?;
    if !api_key.trim().is_empty() {
        url.query_pairs_mut().append_pair("key", api_key.trim());
    }
    Ok(url)
}

/// Render a URL for logs with any `key` query parameter masked.
pub fn redact_url(url: &Url) -> String {
    let mut out = url.clone();
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs.is_empty() {
        return out.to_string();
    }

    {
        let mut qp = out.query_pairs_mut();
        qp.clear();
        for (k, v) in &pairs {
            if k == "key" {
                qp.append_pair(k, "[REDACTED]");
            } else {
                qp.append_pair(k, v);
            }
        }
    }
    out.to_string()
}

pub fn build_setup_message(model: &str, response_modality: &str) -> String {
    json!({
        "setup": {
            "model": model,
            "generation_config": {
                "response_modalities": [response_modality],
            },
        },
    })
    .to_string()
}

pub fn build_media_chunk_message(mime_type: &str, base64_data: &str) -> String {
    json!({
        "realtime_input": {
            "media_chunks": [
                { "mime_type": mime_type, "data": base64_data },
            ],
        },
    })
    .to_string()
}

/// Binary frames carry the same JSON as text frames.
pub fn decode_binary_frame(bytes: &[u8]) -> Result<String, ProtocolParseError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolParseError::NotUtf8)
}

/// True for `audio/pcm` with a `rate` parameter equal to `rate_hz`.
pub fn is_pcm_mime_with_rate(mime_type: &str, rate_hz: u32) -> bool {
    let mut parts = mime_type.split(';').map(str::trim);
    let Some(essence) = parts.next() else {
        return false;
    };
    if !essence.eq_ignore_ascii_case("audio/pcm") {
        return false;
    }

    let want = rate_hz.to_string();
    parts.any(|p| {
        p.split_once('=')
            .map(|(k, v)| k.trim().eq_ignore_ascii_case("rate") && v.trim() == want)
            .unwrap_or(false)
    })
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn parse_server_message(text: &str) -> Result<ParsedMessage, ProtocolParseError> {
    parse_server_message_for_rate(text, 24_000)
}

pub fn parse_server_message_for_rate(
    text: &str,
    output_rate_hz: u32,
) -> Result<ParsedMessage, ProtocolParseError> {
    let v: Value = serde_json::from_str(text)?;

    // The acknowledgement takes priority over anything else in the same message.
    if v.get("setupComplete").is_some_and(is_truthy) {
        return Ok(ParsedMessage {
            kind: MessageKind::SetupComplete,
            events: vec![ServerEvent::SetupComplete],
        });
    }

    let Some(content) = v.get("serverContent").filter(|c| c.is_object()) else {
        return Ok(ParsedMessage {
            kind: MessageKind::Unknown,
            events: Vec::new(),
        });
    };

    let mut events = Vec::new();

    let parts = content
        .get("modelTurn")
        .and_then(|t| t.get("parts"))
        .and_then(|p| p.as_array());

    for part in parts.into_iter().flatten() {
        if let Some(inline) = part.get("inlineData") {
            let mime = inline.get("mimeType").and_then(|m| m.as_str()).unwrap_or("");
            let data = inline.get("data").and_then(|d| d.as_str());
            if let Some(data) = data.filter(|_| is_pcm_mime_with_rate(mime, output_rate_hz)) {
                events.push(ServerEvent::AudioFragment(InboundAudioFragment {
                    base64_payload: data.to_string(),
                    mime_type: mime.to_string(),
                }));
            }
        }

        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            if !text.is_empty() {
                events.push(ServerEvent::Text(text.to_string()));
            }
        }
    }

    if content.get("turnComplete") == Some(&Value::Bool(true)) {
        events.push(ServerEvent::TurnComplete);
    }

    Ok(ParsedMessage {
        kind: MessageKind::ServerContent,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_message_shape() {
        let v: Value =
            serde_json::from_str(&build_setup_message("models/gemini-2.0-flash-exp", "AUDIO"))
                .unwrap();
        assert_eq!(v["setup"]["model"], "models/gemini-2.0-flash-exp");
        assert_eq!(
            v["setup"]["generation_config"]["response_modalities"],
            json!(["AUDIO"])
        );
    }

    #[test]
    fn media_chunk_message_shape() {
        let v: Value = serde_json::from_str(&build_media_chunk_message("audio/pcm", "AAA=")).unwrap();
        let chunk = &v["realtime_input"]["media_chunks"][0];
        assert_eq!(chunk["mime_type"], "audio/pcm");
        assert_eq!(chunk["data"], "AAA=");
    }

    #[test]
    fn parses_setup_complete_bool_and_object() {
        for s in [r#"{"setupComplete":true}"#, r#"{"setupComplete":{}}"#] {
            let p = parse_server_message(s).unwrap();
            assert_eq!(p.kind, MessageKind::SetupComplete);
            assert_eq!(p.events, vec![ServerEvent::SetupComplete]);
        }

        let p = parse_server_message(r#"{"setupComplete":false}"#).unwrap();
        assert_eq!(p.kind, MessageKind::Unknown);
        assert!(p.events.is_empty());
    }

    #[test]
    fn parses_audio_parts_in_order_then_turn_complete() {
        let s = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}},
            {"inlineData":{"mimeType":"image/png","data":"xxxx"}},
            {"text":"hello"},
            {"inlineData":{"mimeType":"audio/pcm; rate=24000","data":"BBB="}}
        ]},"turnComplete":true}}"#;

        let p = parse_server_message(s).unwrap();
        assert_eq!(p.kind, MessageKind::ServerContent);
        let payloads: Vec<&str> = p
            .events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::AudioFragment(f) => Some(f.base64_payload.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, vec!["AAA=", "BBB="]);
        assert!(p.events.contains(&ServerEvent::Text("hello".into())));
        assert_eq!(p.events.last(), Some(&ServerEvent::TurnComplete));
    }

    #[test]
    fn other_sample_rates_are_not_playback_audio() {
        let s = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=16000","data":"AAA="}}
        ]}}}"#;
        assert!(parse_server_message(s).unwrap().events.is_empty());
    }

    #[test]
    fn turn_complete_requires_literal_true() {
        let p = parse_server_message(r#"{"serverContent":{"turnComplete":"yes"}}"#).unwrap();
        assert!(p.events.is_empty());
        let p = parse_server_message(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        assert_eq!(p.events, vec![ServerEvent::TurnComplete]);
    }

    #[test]
    fn unknown_shapes_are_ignored() {
        for s in [
            r#"{"toolCall":{"functionCalls":[]}}"#,
            r#"{"serverContent":5}"#,
            r#"{"serverContent":{"modelTurn":{"parts":"nope"}}}"#,
            r#"[]"#,
        ] {
            let p = parse_server_message(s).unwrap();
            assert!(p.events.is_empty(), "{s}");
        }
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            parse_server_message("{not json"),
            Err(ProtocolParseError::Json(_))
        ));
    }

    #[test]
    fn binary_frames_decode_as_utf8() {
        assert_eq!(decode_binary_frame(br#"{"a":1}"#).unwrap(), r#"{"a":1}"#);
        assert!(matches!(
            decode_binary_frame(&[0xff, 0xfe]),
            Err(ProtocolParseError::NotUtf8)
        ));
    }

    #[test]
    fn mime_matching() {
        assert!(is_pcm_mime_with_rate("audio/pcm;rate=24000", 24_000));
        assert!(is_pcm_mime_with_rate("AUDIO/PCM ; rate = 24000", 24_000));
        assert!(!is_pcm_mime_with_rate("audio/pcm", 24_000));
        assert!(!is_pcm_mime_with_rate("audio/wav;rate=24000", 24_000));
    }

    #[test]
    fn ws_url_carries_key_and_redacts_it_for_logs() {
        let url = build_live_ws_url("wss://example.com/ws/live", "secret").unwrap();
        assert!(url.as_str().contains("key=secret"));
        let shown = redact_url(&url);
        assert!(!shown.contains("secret"));
        assert!(shown.contains("REDACTED"));
    }
}
