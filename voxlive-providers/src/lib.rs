pub mod gemini_live;
pub mod gemini_transcribe;
pub mod parse;
pub mod request;
pub mod runtime;
pub mod websocket;
