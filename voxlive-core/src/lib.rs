pub mod codec;
pub mod config;
pub mod event;
pub mod level;
pub mod types;

// Keep the public surface small and intentional.
pub use codec::*;
pub use config::*;
pub use event::*;
pub use level::*;
pub use types::*;
