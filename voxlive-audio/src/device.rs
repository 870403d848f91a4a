use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

/// Which side of the conversation a device serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AudioDeviceError {
    #[error("no default {} device", .0.label())]
    NoDevice(Direction),

    #[error("cannot enumerate audio devices: {0}")]
    Enumerate(#[from] cpal::DevicesError),

    #[error("device has no usable default format: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("audio worker failed: {0}")]
    Worker(String),

    #[error("audio worker did not start in time")]
    WorkerTimeout,

    #[error("resampler setup failed: {0}")]
    Resample(#[from] anyhow::Error),

    #[error("audio worker exited unexpectedly")]
    WorkerGone,
}

/// Device names for `direction`, sorted and deduplicated.
pub fn device_names(direction: Direction) -> Result<Vec<String>, AudioDeviceError> {
    let host = cpal::default_host();
    let devices: Vec<Device> = match direction {
        Direction::Input => host.input_devices()?.collect(),
        Direction::Output => host.output_devices()?.collect(),
    };
    let mut names: Vec<String> = devices.iter().filter_map(|d| d.name().ok()).collect();
    names.sort();
    names.dedup();
    Ok(names)
}

/// The device named `wanted`, else the host default. An unknown name only warns.
pub fn find_device(direction: Direction, wanted: Option<&str>) -> Result<Device, AudioDeviceError> {
    let host = cpal::default_host();

    if let Some(wanted) = wanted.map(str::trim).filter(|n| !n.is_empty()) {
        let devices: Option<Vec<Device>> = match direction {
            Direction::Input => host.input_devices().ok().map(Iterator::collect),
            Direction::Output => host.output_devices().ok().map(Iterator::collect),
        };
        if let Some(dev) = devices
            .into_iter()
            .flatten()
            .find(|d| d.name().is_ok_and(|n| n == wanted))
        {
            log::info!("using {} device: {wanted}", direction.label());
            return Ok(dev);
        }
        log::warn!(
            "{} device {wanted:?} not found; using the default",
            direction.label()
        );
    }

    let dev = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    };
    dev.ok_or(AudioDeviceError::NoDevice(direction))
}
