pub mod chunk;
pub mod clock;
pub mod resample;

// Device backends. Linux builds run headless with `ClockSink`.
#[cfg(any(windows, target_os = "macos"))]
pub mod capture;
#[cfg(any(windows, target_os = "macos"))]
pub mod device;
#[cfg(any(windows, target_os = "macos"))]
pub mod output;

pub use chunk::FrameChunker;
pub use clock::ClockSink;

#[cfg(any(windows, target_os = "macos"))]
pub use capture::MicrophoneStream;
#[cfg(any(windows, target_os = "macos"))]
pub use device::{AudioDeviceError, Direction};
#[cfg(any(windows, target_os = "macos"))]
pub use output::SpeakerSink;
