//! cadenza: headless multitrack engine host

mod config;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cadenza_core::{format_time, SourceConfig, TrackConfig};
use cadenza_services::{
    AudioBackend, AudioEngine, ClipPlayer, CpalBackend, NullBackend, TrackInput,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cadenza", about = "Cadenza multitrack audio engine")]
struct Cli {
    /// Config file (defaults to <config dir>/cadenza/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Run without audio devices
    #[arg(long)]
    headless: bool,
    /// How long to play or record
    #[arg(short, long, default_value_t = 5.0)]
    seconds: f32,
    /// Record the input instead of just playing. Without a path the file is
    /// named after the first armed track in the recordings directory.
    #[arg(short, long)]
    record: Option<Option<PathBuf>>,
    /// Add a sine test tone track at this frequency
    #[arg(long)]
    tone: Option<f32>,
    /// Add a track playing this WAV file
    #[arg(long)]
    clip: Option<PathBuf>,
    /// Output device name
    #[arg(long)]
    output_device: Option<String>,
    /// Input device name
    #[arg(long)]
    input_device: Option<String>,
    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("cadenza=debug".parse()?))
        .init();

    let cli = Cli::parse();
    if cli.list_devices {
        return list_devices();
    }

    let host = config::load(cli.config.as_deref())?;
    let backend: Box<dyn AudioBackend> = if cli.headless {
        Box::new(NullBackend::new())
    } else {
        Box::new(CpalBackend::with_devices(cli.output_device.clone(), cli.input_device.clone()))
    };

    let mut engine = AudioEngine::new(host.engine, backend)?;
    engine.initialize().context("failed to open audio devices")?;

    for track in host.tracks {
        engine.add_track(track)?;
    }
    if let Some(hz) = cli.tone {
        engine.add_track(TrackConfig::new(format!("Tone {hz} Hz")).with_source(SourceConfig::Tone {
            frequency_hz: hz,
            amplitude: 0.3,
        }))?;
    }
    if let Some(path) = &cli.clip {
        let player = ClipPlayer::from_wav(path, engine.format().sample_rate)
            .with_context(|| format!("failed to load {}", path.display()))?;
        let name = path
            .file_stem()
            .map_or_else(|| "Clip".to_string(), |s| s.to_string_lossy().into_owned());
        engine.add_track_with_input(TrackConfig::new(name), TrackInput::Generator(Box::new(player)))?;
    }
    if engine.tracks().is_empty() {
        engine.add_track(TrackConfig::new("Input"))?;
    }

    let poller = engine.spawn_status_poller()?;
    match &cli.record {
        Some(Some(path)) => {
            engine.record_to(path)?;
        }
        Some(None) => {
            engine.record()?;
        }
        None => engine.play()?,
    }

    let deadline = Instant::now() + Duration::from_secs_f32(cli.seconds.max(0.0));
    let mut last_report = Instant::now();
    while Instant::now() < deadline {
        let wait = deadline.saturating_duration_since(Instant::now());
        let Ok(status) = poller.receiver().recv_timeout(wait) else {
            continue;
        };
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            info!(
                state = ?status.state,
                position = %format_time(status.position_secs),
                cpu_percent = status.metrics.cpu_percent(),
                underruns = status.metrics.underruns,
                tracks = status.metrics.active_track_count,
                "Status"
            );
        }
    }

    engine.stop()?;
    if let Some(summary) = engine.last_recording() {
        info!(
            path = %summary.path.display(),
            frames = summary.frames,
            dropped = summary.dropped_frames,
            "Recording saved"
        );
    }
    let metrics = engine.get_performance_metrics();
    info!(
        underruns = metrics.underruns,
        track_faults = metrics.track_faults,
        "Session finished"
    );
    poller.stop();
    engine.shutdown()?;
    Ok(())
}

fn list_devices() -> Result<()> {
    println!("Output devices:");
    for device in CpalBackend::list_output_devices()? {
        let marker = if device.is_default { "*" } else { " " };
        println!(" {marker} {} ({} Hz, {} ch)", device.name, device.sample_rate, device.channels);
    }
    println!("Input devices:");
    for device in CpalBackend::list_input_devices()? {
        let marker = if device.is_default { "*" } else { " " };
        println!(" {marker} {} ({} Hz, {} ch)", device.name, device.sample_rate, device.channels);
    }
    Ok(())
}
