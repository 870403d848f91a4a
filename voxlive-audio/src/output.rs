// Speaker output.
//
// Units are resampled to the device rate through one resampler that persists
// across a burst, then appended to a shared queue that the cpal callback drains.
// Each unit carries a oneshot that fires when its last sample has been written
// to the device buffer. The resampler's held-back tail is queued when the
// scheduler goes idle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream};
use futures_util::FutureExt;
use tokio::sync::oneshot;
use voxlive_core::types::PlaybackUnit;
use voxlive_engine::traits::{AudioSink, PlaybackCompletion, PlaybackError};

use crate::device::{AudioDeviceError, Direction, find_device};
use crate::resample::StreamResampler;

// 20 ms at 24 kHz.
const RESAMPLE_CHUNK_FRAMES: usize = 480;

struct QueuedUnit {
    samples: Vec<f32>,
    pos: usize,
    done: Option<oneshot::Sender<()>>,
}

type SharedQueue = Arc<Mutex<VecDeque<QueuedUnit>>>;

enum WorkerMsg {
    Ready,
    Error(String),
}

pub struct SpeakerSink {
    queue: SharedQueue,
    device_rate_hz: u32,
    /// Keyed by the unit sample rate it was built for.
    resampler: Option<(u32, StreamResampler)>,
    shutdown_tx: mpsc::Sender<()>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
}

impl SpeakerSink {
    pub fn open(device_name: Option<&str>) -> Result<Self, AudioDeviceError> {
        let device = find_device(Direction::Output, device_name)?;
        let default_cfg = device.default_output_config()?;
        let device_rate_hz = default_cfg.sample_rate().0;
        log::info!(
            "speaker: {} Hz, {} ch",
            device_rate_hz,
            default_cfg.channels()
        );

        let queue: SharedQueue = Arc::new(Mutex::new(VecDeque::new()));
        let worker_queue = queue.clone();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();

        let worker_handle = std::thread::spawn(move || {
            let config: cpal::StreamConfig = default_cfg.clone().into();
            let channels = default_cfg.channels() as usize;

            let stream = match default_cfg.sample_format() {
                SampleFormat::I16 => build_output_stream::<i16>(&device, &config, channels, worker_queue),
                SampleFormat::U16 => build_output_stream::<u16>(&device, &config, channels, worker_queue),
                SampleFormat::I32 => build_output_stream::<i32>(&device, &config, channels, worker_queue),
                _ => build_output_stream::<f32>(&device, &config, channels, worker_queue),
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    log::error!("speaker stream build failed: {e}");
                    let _ = worker_tx.send(WorkerMsg::Error(format!("build stream: {e}")));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                log::error!("speaker stream play failed: {e}");
                let _ = worker_tx.send(WorkerMsg::Error(format!("play stream: {e}")));
                return;
            }

            let _ = worker_tx.send(WorkerMsg::Ready);
            // Park until shutdown; the device thread does the work.
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        match worker_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(WorkerMsg::Ready) => {}
            Ok(WorkerMsg::Error(e)) => return Err(AudioDeviceError::Worker(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => return Err(AudioDeviceError::WorkerTimeout),
            Err(_) => return Err(AudioDeviceError::WorkerGone),
        }

        Ok(Self {
            queue,
            device_rate_hz,
            resampler: None,
            shutdown_tx,
            worker_handle: Some(worker_handle),
        })
    }

    pub fn device_rate_hz(&self) -> u32 {
        self.device_rate_hz
    }

    fn to_device_rate(&mut self, unit: &PlaybackUnit) -> anyhow::Result<Vec<f32>> {
        if unit.sample_rate_hz == self.device_rate_hz {
            return Ok(unit.samples.clone());
        }
        let stale = self
            .resampler
            .as_ref()
            .is_none_or(|(rate, _)| *rate != unit.sample_rate_hz);
        if stale {
            let r = StreamResampler::new(
                unit.sample_rate_hz,
                self.device_rate_hz,
                RESAMPLE_CHUNK_FRAMES,
            )?;
            self.resampler = Some((unit.sample_rate_hz, r));
        }
        match self.resampler.as_mut() {
            Some((_, r)) => r.push(&unit.samples),
            None => Ok(unit.samples.clone()),
        }
    }

    fn enqueue(
        &self,
        samples: Vec<f32>,
        done: Option<oneshot::Sender<()>>,
    ) -> Result<(), PlaybackError> {
        self.queue
            .lock()
            .map_err(|_| PlaybackError::Device("output queue poisoned".into()))?
            .push_back(QueuedUnit {
                samples,
                pos: 0,
                done,
            });
        Ok(())
    }
}

impl AudioSink for SpeakerSink {
    fn start(&mut self, unit: &PlaybackUnit) -> Result<PlaybackCompletion, PlaybackError> {
        if unit.samples.is_empty() {
            return Err(PlaybackError::EmptyUnit);
        }

        let samples = self
            .to_device_rate(unit)
            .map_err(|e| PlaybackError::Device(format!("{e:#}")))?;

        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(samples, Some(done_tx))?;

        // A dead device drops the sender, which also ends the wait.
        Ok(done_rx.map(|_| ()).boxed())
    }

    fn idle(&mut self) {
        let Some((_, r)) = self.resampler.as_mut() else {
            return;
        };
        match r.flush() {
            Ok(tail) if !tail.is_empty() => {
                if let Err(e) = self.enqueue(tail, None) {
                    log::warn!("speaker: dropping resampler tail: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("speaker: resampler flush failed: {e:#}"),
        }
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(h) = self.worker_handle.take() {
            let _ = h.join();
        }
    }
}

fn build_output_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    channels: usize,
    queue: SharedQueue,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = channels.max(1);
    let cb = move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        let Ok(mut q) = queue.lock() else {
            data.fill(<T as Sample>::EQUILIBRIUM);
            return;
        };

        for frame in data.chunks_mut(channels) {
            let s = next_sample(&mut q);
            let v = <T as Sample>::from_sample(s);
            frame.fill(v);
        }
    };

    device.build_output_stream(
        config,
        cb,
        |err| log::error!("speaker stream error: {err}"),
        None,
    )
}

/// Pop one mono sample, completing units as they run out. Silence when idle.
fn next_sample(q: &mut VecDeque<QueuedUnit>) -> f32 {
    while let Some(head) = q.front_mut() {
        if let Some(&s) = head.samples.get(head.pos) {
            head.pos += 1;
            if head.pos == head.samples.len() {
                if let Some(done) = head.done.take() {
                    let _ = done.send(());
                }
                q.pop_front();
            }
            return s;
        }
        if let Some(done) = head.done.take() {
            let _ = done.send(());
        }
        q.pop_front();
    }
    0.0
}
