// Microphone capture for live upload.
//
// The cpal stream lives on a dedicated worker thread (streams are not `Send` on
// every backend). The device callback only mixes to mono and hands the block to
// the worker, which resamples to the upload rate and re-blocks into fixed frames.

use std::sync::mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, SizedSample, Stream};
use tokio::sync::mpsc as async_mpsc;

use crate::chunk::FrameChunker;
use crate::device::{AudioDeviceError, Direction, device_names, find_device};
use crate::resample::StreamResampler;

const FRAME_QUEUE: usize = 64;

enum Cmd {
    Shutdown,
}

enum WorkerMsg {
    Ready,
    Error(String),
}

/// A running microphone. Frames arrive on the receiver returned by `open`.
pub struct MicrophoneStream {
    cmd_tx: mpsc::Sender<Cmd>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
    device_rate_hz: u32,
}

impl MicrophoneStream {
    pub fn list_input_device_names() -> Result<Vec<String>, AudioDeviceError> {
        device_names(Direction::Input)
    }

    /// Start capturing. Each received frame holds `frame_ms` of mono audio at
    /// `target_rate_hz`.
    pub fn open(
        device_name: Option<&str>,
        target_rate_hz: u32,
        frame_ms: u32,
    ) -> Result<(Self, async_mpsc::Receiver<Vec<f32>>), AudioDeviceError> {
        let device = find_device(Direction::Input, device_name)?;
        let default_cfg = device.default_input_config()?;
        let device_rate_hz = default_cfg.sample_rate().0;
        log::info!(
            "microphone: {} Hz, {} ch, resampling to {target_rate_hz} Hz",
            device_rate_hz,
            default_cfg.channels()
        );

        let resampler = StreamResampler::new(device_rate_hz, target_rate_hz, 1024)?;
        let chunker = FrameChunker::new(target_rate_hz, frame_ms);

        let (raw_tx, raw_rx) = mpsc::channel::<Vec<f32>>();
        let (cmd_tx, cmd_rx) = mpsc::channel::<Cmd>();
        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();
        let (frame_tx, frame_rx) = async_mpsc::channel::<Vec<f32>>(FRAME_QUEUE);

        let worker_handle = std::thread::spawn(move || {
            let config: cpal::StreamConfig = default_cfg.clone().into();
            let channels = default_cfg.channels() as usize;

            let stream = match default_cfg.sample_format() {
                SampleFormat::I16 => build_input_stream::<i16>(&device, &config, channels, raw_tx),
                SampleFormat::U16 => build_input_stream::<u16>(&device, &config, channels, raw_tx),
                SampleFormat::I32 => build_input_stream::<i32>(&device, &config, channels, raw_tx),
                SampleFormat::F64 => build_input_stream::<f64>(&device, &config, channels, raw_tx),
                _ => build_input_stream::<f32>(&device, &config, channels, raw_tx),
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    log::error!("microphone stream build failed: {e}");
                    let _ = worker_tx.send(WorkerMsg::Error(format!("build stream: {e}")));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log::error!("microphone stream play failed: {e}");
                let _ = worker_tx.send(WorkerMsg::Error(format!("play stream: {e}")));
                return;
            }

            let _ = worker_tx.send(WorkerMsg::Ready);
            run_consumer(raw_rx, cmd_rx, resampler, chunker, frame_tx);
            drop(stream);
        });

        match worker_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(WorkerMsg::Ready) => {}
            Ok(WorkerMsg::Error(e)) => return Err(AudioDeviceError::Worker(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => return Err(AudioDeviceError::WorkerTimeout),
            Err(_) => return Err(AudioDeviceError::WorkerGone),
        }

        let stream = Self {
            cmd_tx,
            worker_handle: Some(worker_handle),
            device_rate_hz,
        };
        Ok((stream, frame_rx))
    }

    pub fn device_rate_hz(&self) -> u32 {
        self.device_rate_hz
    }

    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.cmd_tx.send(Cmd::Shutdown);
        if let Some(h) = self.worker_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    channels: usize,
    raw_tx: mpsc::Sender<Vec<f32>>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let cb = move |data: &[T], _: &cpal::InputCallbackInfo| {
        let mono: Vec<f32> = if channels <= 1 {
            data.iter().map(|&s| s.to_sample::<f32>()).collect()
        } else {
            data.chunks_exact(channels)
                .map(|frame| {
                    frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / channels as f32
                })
                .collect()
        };
        let _ = raw_tx.send(mono);
    };

    device.build_input_stream(
        config,
        cb,
        |err| log::error!("microphone stream error: {err}"),
        None,
    )
}

fn run_consumer(
    raw_rx: mpsc::Receiver<Vec<f32>>,
    cmd_rx: mpsc::Receiver<Cmd>,
    mut resampler: StreamResampler,
    mut chunker: FrameChunker,
    frame_tx: async_mpsc::Sender<Vec<f32>>,
) {
    let mut dropped: u64 = 0;

    loop {
        if let Ok(Cmd::Shutdown) = cmd_rx.try_recv() {
            return;
        }

        let block = match raw_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(b) => b,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        };

        let resampled = match resampler.push(&block) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("dropping microphone block: {e:#}");
                continue;
            }
        };

        for frame in chunker.push(&resampled) {
            match frame_tx.try_send(frame) {
                Ok(()) => {}
                Err(async_mpsc::error::TrySendError::Full(_)) => {
                    dropped += 1;
                    if dropped.is_power_of_two() {
                        log::warn!("microphone consumer is behind; dropped {dropped} frames");
                    }
                }
                Err(async_mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }
}
