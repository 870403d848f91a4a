pub mod connection;
pub mod playback;
pub mod session;
pub mod traits;
pub mod turn;

pub use voxlive_providers::websocket::{TransportCommand, TransportEvent, TransportLink};
