pub mod config_store;
pub mod defaults;
pub mod secrets;
pub mod session_builder;
pub mod transcription;
