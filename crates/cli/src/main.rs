#![deny(warnings)]

use anyhow::Context;
use calmcam_core::camera::CameraDevice;
use calmcam_core::config::{
    resolve_api_key, resolve_optional_string, ApiKeys, AppConfig, CallBudget, CameraConfig,
    DisplayMode, Env, StdEnv, DEFAULT_CAMERA_INDEX, DEFAULT_DETECT_TIMEOUT_MS,
    DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH, DEFAULT_GEMINI_MODEL, DEFAULT_NARRATE_TIMEOUT_MS,
    DEFAULT_VOICE_TIMEOUT_MS, ENV_CAMERA_INDEX, ENV_DETECTOR_URL, ENV_ELEVENLABS_API_KEY,
    ENV_GEMINI_API_KEY,
};
use calmcam_core::detect::{ExpressionDetector, FixedExpressionDetector, HttpExpressionDetector};
use calmcam_core::narrate::{CalmFallbackGenerator, GeminiNarrativeGenerator, NarrativeGenerator};
use calmcam_core::playback::RodioNarrationSink;
use calmcam_core::session::{CaptureSession, SessionError, SessionOptions};
use calmcam_core::voice::{BasicVoiceSynthesizer, ElevenLabsVoiceSynthesizer, VoiceSynthesizer};
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "calmcam")]
#[command(about = "Webcam emotion capture with calming narration (detect->narrate->speak)")]
struct Args {
    #[arg(long)]
    gemini_api_key: Option<String>,

    #[arg(long)]
    elevenlabs_api_key: Option<String>,

    /// Base URL of the face-expression inference service. Without it a
    /// fixed demo detection is used.
    #[arg(long)]
    detector_url: Option<String>,

    #[arg(long, env = ENV_CAMERA_INDEX, default_value_t = DEFAULT_CAMERA_INDEX)]
    camera_index: u32,

    #[arg(long, default_value_t = DEFAULT_FRAME_WIDTH)]
    frame_width: u32,

    #[arg(long, default_value_t = DEFAULT_FRAME_HEIGHT)]
    frame_height: u32,

    /// Play the narration as soon as it is ready.
    #[arg(long)]
    auto_play: bool,

    #[arg(long, default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    #[arg(long, default_value_t = DEFAULT_DETECT_TIMEOUT_MS)]
    detect_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_NARRATE_TIMEOUT_MS)]
    narrate_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_VOICE_TIMEOUT_MS)]
    voice_timeout_ms: u64,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(args, &env)?;

    let auto_play = cfg.display == DisplayMode::AutoPlay;
    tracing::info!(
        auto_play,
        detect_timeout_ms = cfg.budget.detect_ms,
        narrate_timeout_ms = cfg.budget.narrate_ms,
        voice_timeout_ms = cfg.budget.voice_ms,
        "config loaded"
    );

    run(cfg).await
}

async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let camera = build_camera(&cfg);
    let detector = build_detector(&cfg)?;
    let narrator = build_narrator(&cfg);
    let voice = build_voice(&cfg);
    let sink = RodioNarrationSink::new();

    let session = CaptureSession::new(
        camera,
        detector,
        narrator,
        voice,
        sink,
        SessionOptions::from_app(&cfg),
    );

    session.start().await.context("session start failed")?;

    println!("calmcam ready. commands: capture | play | reset | quit");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "capture" | "c" => match session.capture_and_narrate().await {
                Ok(report) => {
                    println!(
                        "{} (intensity {}/10)",
                        report.emotion.label, report.emotion.intensity
                    );
                    println!("{}", report.text);
                    if let Some(err) = &report.voice_error {
                        println!("(voice unavailable: {err})");
                    } else if !matches!(cfg.display, DisplayMode::AutoPlay) {
                        println!("(type 'play' to listen)");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "capture failed");
                    println!("{}", notice_for(&e));
                }
            },
            "play" | "p" => match session.play_narration().await {
                Ok(true) => {}
                Ok(false) => println!("Nothing to play yet"),
                Err(e) => println!("Unable to play audio: {e}"),
            },
            "reset" | "r" => match session.reset().await {
                Ok(()) => println!("Camera ready"),
                Err(e) => {
                    tracing::warn!(error = %e, "reset failed");
                    println!("{}", notice_for(&e));
                }
            },
            "quit" | "q" => break,
            other => println!("unknown command: {other}"),
        }
    }

    session.shutdown().await;
    Ok(())
}

#[cfg(feature = "opencv-camera")]
fn build_camera(cfg: &AppConfig) -> impl CameraDevice {
    calmcam_core::camera::OpenCvCameraDevice::new(cfg.camera)
}

#[cfg(not(feature = "opencv-camera"))]
fn build_camera(cfg: &AppConfig) -> impl CameraDevice {
    tracing::warn!("built without the opencv-camera feature, using synthetic frames");
    calmcam_core::camera::SyntheticCameraDevice::new(cfg.camera)
}

fn build_detector(cfg: &AppConfig) -> anyhow::Result<Box<dyn ExpressionDetector>> {
    match &cfg.detector_url {
        Some(url) => {
            let detector = HttpExpressionDetector::from_url_str(url)
                .with_context(|| format!("invalid detector url: {url}"))?;
            Ok(Box::new(detector))
        }
        None => {
            tracing::warn!("no detector service configured, using fixed demo detection");
            Ok(Box::new(FixedExpressionDetector::demo()))
        }
    }
}

fn build_narrator(cfg: &AppConfig) -> Box<dyn NarrativeGenerator> {
    let inner = cfg.api_keys.gemini.clone().map(|key| {
        GeminiNarrativeGenerator::new(key.expose().to_owned()).with_model(cfg.gemini_model.clone())
    });
    if inner.is_none() {
        tracing::warn!("no Gemini credential, narration will use the unavailable-service copy");
    }
    Box::new(CalmFallbackGenerator::new(inner, cfg.budget.narrate()))
}

fn build_voice(cfg: &AppConfig) -> Box<dyn VoiceSynthesizer> {
    match cfg.api_keys.elevenlabs.clone() {
        Some(key) => Box::new(ElevenLabsVoiceSynthesizer::new(key.expose().to_owned())),
        None => {
            tracing::info!("no ElevenLabs credential, using the basic tone synthesizer");
            Box::new(BasicVoiceSynthesizer::new())
        }
    }
}

/// User-facing copy for the recoverable session outcomes.
fn notice_for(err: &SessionError) -> &'static str {
    match err {
        SessionError::NotReady => "The camera is not ready",
        SessionError::ModelsNotLoaded => "Detection models are not yet loaded",
        SessionError::NoFaceDetected => "No face detected",
        SessionError::Superseded => "Capture discarded after reset",
        SessionError::Camera(_) => "Unable to access the camera",
        SessionError::Detect(_) | SessionError::Narrate(_) => "Error during analysis",
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn build_config(args: Args, env: &impl Env) -> anyhow::Result<AppConfig> {
    let camera = CameraConfig::new(args.camera_index, args.frame_width, args.frame_height)?;
    let budget = CallBudget::new(
        args.detect_timeout_ms,
        args.narrate_timeout_ms,
        args.voice_timeout_ms,
    )?;

    let gemini = resolve_api_key(args.gemini_api_key, ENV_GEMINI_API_KEY, env)?;
    let elevenlabs = resolve_api_key(args.elevenlabs_api_key, ENV_ELEVENLABS_API_KEY, env)?;
    let detector_url = resolve_optional_string(args.detector_url, ENV_DETECTOR_URL, env);

    let display = if args.auto_play {
        DisplayMode::AutoPlay
    } else {
        DisplayMode::Manual
    };

    Ok(AppConfig {
        camera,
        api_keys: ApiKeys { gemini, elevenlabs },
        budget,
        display,
        gemini_model: args.gemini_model,
        detector_url,
    })
}
