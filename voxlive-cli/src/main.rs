use std::time::Duration;

use anyhow::{Context, anyhow};
use tokio::sync::mpsc;
use voxlive_audio::FrameChunker;
use voxlive_core::codec::pcm16_bytes_to_samples;
use voxlive_core::config::SessionConfig;
use voxlive_core::event::SessionEvent;
use voxlive_engine::session::SessionHandle;
use voxlive_engine::traits::AudioSink;
use voxlive_runtime::config_store::ConfigStore;
use voxlive_runtime::defaults::default_config_path;
use voxlive_runtime::session_builder::{build_live_session, load_api_key, load_session_config};

const FRAME_MS: u32 = 100;

fn usage() -> &'static str {
    "usage: voxlive [--write-config] [PCM_FILE]\n\
     \n\
     Streams the microphone (or a raw mono PCM16 file at the configured input rate)\n\
     to a live session and prints model text and turn transcriptions.\n\
     Ctrl-C disconnects."
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", usage());
        return Ok(());
    }

    let store = ConfigStore::at_path(default_config_path());
    let cfg = load_session_config(&store)?;

    if args.first().map(String::as_str) == Some("--write-config") {
        store.save(&cfg)?;
        println!("wrote {}", store.path().display());
        return Ok(());
    }

    let api_key = load_api_key()?;
    let (handle, mut events) = build_live_session(&cfg, &api_key, open_sink()).await?;

    handle.connect().await;
    tokio::select! {
        res = wait_for_setup(&mut events, cfg.connect_timeout() * 2) => res?,
        _ = tokio::signal::ctrl_c() => {
            handle.shutdown().await;
            return Ok(());
        }
    }
    println!("[session {}] ready", handle.id());

    // Held for the session's lifetime; dropping it stops capture.
    let _source = match args.first() {
        Some(path) => {
            let samples = read_pcm16_file(path)?;
            tokio::spawn(stream_file(handle.clone(), samples, cfg.input_sample_rate_hz));
            None
        }
        None => Some(start_microphone(handle.clone(), &cfg)?),
    };

    loop {
        tokio::select! {
            ev = events.recv() => {
                let Some(ev) = ev else { break; };
                print_event(&ev);
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted; disconnecting");
                break;
            }
        }
    }

    handle.disconnect().await;
    handle.shutdown().await;
    Ok(())
}

fn open_sink() -> Box<dyn AudioSink> {
    #[cfg(any(windows, target_os = "macos"))]
    {
        let device = std::env::var("VOXLIVE_OUTPUT_DEVICE").ok();
        match voxlive_audio::SpeakerSink::open(device.as_deref()) {
            Ok(s) => return Box::new(s),
            Err(e) => log::warn!("speaker unavailable ({e}); playing silently"),
        }
    }
    Box::new(voxlive_audio::ClockSink)
}

async fn wait_for_setup(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let wait = async {
        while let Some(ev) = events.recv().await {
            print_event(&ev);
            match ev {
                SessionEvent::SetupComplete => return Ok(()),
                SessionEvent::ConnectionStateChanged(s)
                    if s == voxlive_core::types::ConnectionState::Closed =>
                {
                    return Err(anyhow!("connection closed before setup completed"));
                }
                _ => {}
            }
        }
        Err(anyhow!("session ended"))
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| anyhow!("timed out waiting for setup"))?
}

fn print_event(ev: &SessionEvent) {
    match ev {
        SessionEvent::TextReceived(t) => println!("[model] {t}"),
        SessionEvent::TranscriptionReady(t) => println!("[transcript] {t}"),
        SessionEvent::TranscriptionFailed(e) => eprintln!("[transcript failed] {e}"),
        SessionEvent::ConnectionStateChanged(s) => log::info!("connection: {}", s.label()),
        SessionEvent::Reconnecting { attempt, delay } => {
            log::warn!("reconnecting (attempt {attempt}) in {delay:?}")
        }
        SessionEvent::PlayingStateChanged(p) => log::debug!("playing: {p}"),
        SessionEvent::AudioLevel(l) => log::trace!("level: {l:.1}"),
        other => log::debug!("{other:?}"),
    }
}

fn read_pcm16_file(path: &str) -> anyhow::Result<Vec<f32>> {
    let bytes = std::fs::read(path).with_context(|| format!("read {path}"))?;
    if bytes.len() % 2 != 0 {
        log::warn!("{path}: odd byte length; last byte ignored");
    }
    Ok(pcm16_bytes_to_samples(&bytes)
        .into_iter()
        .map(|s| s as f32 / 32768.0)
        .collect())
}

/// Upload a file in real time, one frame per frame duration.
async fn stream_file(handle: SessionHandle, samples: Vec<f32>, rate_hz: u32) {
    let mut chunker = FrameChunker::new(rate_hz, FRAME_MS);
    let mut frames = chunker.push(&samples);
    frames.extend(chunker.flush());

    let mut tick = tokio::time::interval(Duration::from_millis(FRAME_MS as u64));
    for frame in &frames {
        tick.tick().await;
        if !handle.send_samples(frame).await {
            return;
        }
    }
    log::info!("finished streaming {} frames", frames.len());
}

#[cfg(any(windows, target_os = "macos"))]
fn start_microphone(
    handle: SessionHandle,
    cfg: &SessionConfig,
) -> anyhow::Result<voxlive_audio::MicrophoneStream> {
    let device = std::env::var("VOXLIVE_INPUT_DEVICE").ok();
    let (mic, mut frames) =
        voxlive_audio::MicrophoneStream::open(device.as_deref(), cfg.input_sample_rate_hz, FRAME_MS)
            .context("open microphone")?;

    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if !handle.send_samples(&frame).await {
                break;
            }
        }
    });
    Ok(mic)
}

#[cfg(not(any(windows, target_os = "macos")))]
fn start_microphone(_handle: SessionHandle, _cfg: &SessionConfig) -> anyhow::Result<()> {
    Err(anyhow!(
        "microphone capture is not available on this platform; pass a PCM file instead"
    ))
}
