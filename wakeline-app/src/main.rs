//! Wakeline host process.
//!
//! Wires the voice pipeline against a simulated board: a simulated codec,
//! an energy-threshold wake detector and an offline demo cloud. The
//! microphone is simulated by default; `--wav` replays a file and `--mic`
//! (feature `audio-cpal`) uses the host's default input device.

mod demo_cloud;
mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use wakeline_core::{
    audio::{AudioSource, SimMic, SimSource, WavSource},
    buffering::{create_reference_buffer, REFERENCE_CAPACITY},
    codec::SimCodec,
    inference::{EnergyWakeDetector, PassthroughFrontEnd, ReferenceSubtractFrontEnd},
    pipeline::NoMusic,
    AssistantState, CaptureConfig, CaptureEngine, CaptureResources, CodecArbiter, CodecFormat,
    Collaborators, DetectorHandle, FrontEnd, Orchestrator, PcmTtsPlayer, PipelineCommand,
};

use demo_cloud::DemoCloud;
use settings::{default_settings_path, load_settings, save_settings, AppSettings};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[command(name = "wakeline", version, about = "Wake-word voice assistant on a simulated board")]
struct Cli {
    /// Settings file (created with defaults by `--write-settings`).
    #[arg(long, env = "WAKELINE_SETTINGS")]
    settings: Option<PathBuf>,

    /// Replay a WAV file as the microphone.
    #[arg(long, conflicts_with = "mic")]
    wav: Option<PathBuf>,

    /// Use the host's default input device.
    #[arg(long)]
    mic: bool,

    /// Trigger one wake once the assistant is armed. With the simulated
    /// microphone a short utterance is spoken into it as well.
    #[arg(long)]
    trigger_wake: bool,

    /// Print the available input devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Write the effective settings back to the settings file and exit.
    #[arg(long)]
    write_settings: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wakeline=info,wakeline_core=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    if cli.list_devices {
        list_devices();
        return Ok(());
    }

    // ── Settings ──────────────────────────────────────────────────────────
    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    if let Some(wav) = &cli.wav {
        settings.input_source = "wav".into();
        settings.wav_path = Some(wav.display().to_string());
    } else if cli.mic {
        settings.input_source = "mic".into();
    }
    settings.normalize();
    if cli.write_settings {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings written");
        return Ok(());
    }
    info!(
        path = %settings_path.display(),
        input = settings.input_source.as_str(),
        "Wakeline starting"
    );

    // ── Board ─────────────────────────────────────────────────────────────
    let codec = Arc::new(CodecArbiter::new(Arc::new(SimCodec::realtime())));
    let (reference_writer, reference) = create_reference_buffer(REFERENCE_CAPACITY);
    codec.attach_reference(reference_writer);

    let detector = DetectorHandle::new(EnergyWakeDetector::new(
        settings.pipeline.wake_threshold,
        settings.wake_window_frames,
    ));
    let capture = Arc::new(CaptureEngine::new(CaptureConfig::default(), detector));

    // `sim_mic` stays alive until exit; dropping it disconnects the source.
    let (source, sim_mic) = open_source(&settings)?;
    let front_end: Box<dyn FrontEnd> = if settings.echo_cancel {
        Box::new(ReferenceSubtractFrontEnd::default())
    } else {
        Box::new(PassthroughFrontEnd)
    };
    capture.init(move || {
        Ok(CaptureResources {
            source,
            reference,
            front_end,
        })
    })?;

    // ── Orchestrator ──────────────────────────────────────────────────────
    let cloud = Arc::new(DemoCloud::new(
        settings.demo_response.clone(),
        settings.demo_speech_ms,
    ));
    let tts = Arc::new(PcmTtsPlayer::new(Arc::clone(&codec), CodecFormat::VOICE)?);
    let orchestrator = Arc::new(Orchestrator::spawn(
        settings.pipeline.clone(),
        Collaborators {
            capture: Arc::clone(&capture),
            codec: Arc::clone(&codec),
            cloud,
            tts,
            music: Arc::new(NoMusic),
        },
    )?);

    spawn_event_printers(&orchestrator);
    if cli.trigger_wake {
        tokio::spawn(trigger_wake(Arc::clone(&orchestrator), sim_mic.clone()));
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("shutting down");
    orchestrator.shutdown(SHUTDOWN_TIMEOUT)?;
    let diag = orchestrator.diagnostics();
    info!(
        commands = diag.commands_handled,
        sessions = diag.sessions_opened,
        errors = diag.error_recoveries,
        "Wakeline stopped"
    );
    Ok(())
}

fn open_source(settings: &AppSettings) -> anyhow::Result<(Box<dyn AudioSource>, Option<SimMic>)> {
    match settings.input_source.as_str() {
        "wav" => {
            let path = settings
                .wav_path
                .as_deref()
                .context("input source `wav` needs a wav path")?;
            let source = WavSource::open(Path::new(path), settings.wav_loop)
                .with_context(|| format!("opening {path}"))?;
            Ok((Box::new(source), None))
        }
        "mic" => open_mic(settings),
        _ => {
            let (source, mic) = SimSource::new(16_000);
            Ok((Box::new(source.paced()), Some(mic)))
        }
    }
}

#[cfg(feature = "audio-cpal")]
fn open_mic(settings: &AppSettings) -> anyhow::Result<(Box<dyn AudioSource>, Option<SimMic>)> {
    let source = wakeline_core::audio::CpalSource::open(settings.preferred_input_device.clone())?;
    info!(device_rate = source.device_rate(), "microphone opened");
    Ok((Box::new(source), None))
}

#[cfg(not(feature = "audio-cpal"))]
fn open_mic(_settings: &AppSettings) -> anyhow::Result<(Box<dyn AudioSource>, Option<SimMic>)> {
    anyhow::bail!("built without the `audio-cpal` feature; use the simulated input or --wav")
}

#[cfg(feature = "audio-cpal")]
fn list_devices() {
    for name in wakeline_core::audio::list_input_devices() {
        println!("{name}");
    }
}

#[cfg(not(feature = "audio-cpal"))]
fn list_devices() {
    println!("sim (built without `audio-cpal`)");
}

/// Print status and actuator events as JSON lines.
fn spawn_event_printers(orchestrator: &Orchestrator) {
    let mut status_rx = orchestrator.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("status {line}"),
                    Err(e) => warn!("encode status: {e}"),
                },
                Err(RecvError::Lagged(n)) => warn!("status receiver lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut actuator_rx = orchestrator.subscribe_actuator();
    tokio::spawn(async move {
        loop {
            match actuator_rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("actuator {line}"),
                    Err(e) => warn!("encode actuator event: {e}"),
                },
                Err(RecvError::Lagged(n)) => warn!("actuator receiver lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn trigger_wake(orchestrator: Arc<Orchestrator>, mic: Option<SimMic>) {
    while orchestrator.state() != AssistantState::WakeWordArmed {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    info!("triggering wake");
    if !orchestrator.post(PipelineCommand::WakeDetected) {
        warn!("wake trigger dropped");
        return;
    }
    let Some(mic) = mic else {
        return;
    };
    while orchestrator.state() != AssistantState::Listening {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // Roughly one spoken sentence followed by enough silence to end it.
    mic.push_tone(180.0, 3_000, 1_500);
    mic.push_silence(2_500);
}
