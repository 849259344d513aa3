use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use aerion::assistant::AssistantEvent;
use aerion::voice::{
    AudioPlayback, EnergyGate, FrameSource, MicrophoneSource, SpeechDetector, build_classifier,
    calculate_rms, list_devices,
};
use aerion::{Config, Daemon};

/// Aerion - wake-word voice assistant
#[derive(Parser)]
#[command(name = "aerion", version, about)]
struct Cli {
    /// Config file (default: ~/.config/aerion/config.toml)
    #[arg(short, long, env = "AERION_CONFIG")]
    config: Option<PathBuf>,

    /// Override the wake word
    #[arg(long)]
    wake_word: Option<String>,

    /// Listen for commands continuously instead of waiting for the wake word
    #[arg(long)]
    no_wake_word: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List audio devices
    Devices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,aerion=info",
        1 => "info,aerion=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(wake_word) = cli.wake_word {
        config.wake.keyword = wake_word;
    }
    if cli.no_wake_word {
        config.wake.enabled = false;
    }
    config.validate()?;

    // Audio devices and blocking HTTP clients stay off the runtime threads
    if let Some(cmd) = cli.command {
        return tokio::task::spawn_blocking(move || match cmd {
            Command::TestMic { duration } => test_mic(&config, duration),
            Command::TestSpeaker => test_speaker(),
            Command::TestTts { text } => test_tts(&config, &text),
            Command::Devices => devices(),
        })
        .await?;
    }

    tracing::info!(
        wake_word = %config.wake.keyword,
        wake_enabled = config.wake.enabled,
        model = %config.llm.model,
        "starting aerion"
    );
    tracing::debug!(?config, "loaded configuration");

    let daemon = Daemon::new(config);
    let status = tokio::spawn(print_status(daemon.subscribe(), daemon.shutdown_token()));

    let result = daemon.run().await;
    status.abort();
    result?;

    Ok(())
}

/// Print state changes and the conversation as it happens
async fn print_status(mut events: broadcast::Receiver<AssistantEvent>, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            () = shutdown.cancelled() => return,
        };
        match event {
            Ok(AssistantEvent::StateChanged { to, .. }) => println!("[{to}]"),
            Ok(AssistantEvent::Transcript { text }) => println!("  you: {text}"),
            Ok(AssistantEvent::Reply { text }) => println!("  aerion: {text}"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "status display fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Test microphone input
fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let format = config.frame_format()?;
    let mut source = MicrophoneSource::open(format, config.audio.input_device.as_deref())?;
    let mut detector = SpeechDetector::new(
        EnergyGate::new(config.audio.rms_threshold),
        build_classifier(config.audio.vad, format, config.audio.vad_aggressiveness)?,
    );

    println!(
        "Sample rate: {} Hz, frame: {} ms, gate: {:.4}",
        format.sample_rate(),
        format.frame_ms(),
        config.audio.rms_threshold
    );
    println!("---");

    for i in 0..duration {
        let second = Instant::now();
        let mut frames = 0_u32;
        let mut speech = 0_u32;
        let mut energy = 0.0_f32;
        let mut peak = 0_i16;

        while second.elapsed() < Duration::from_secs(1) {
            let Some(frame) = source.next_frame()? else {
                anyhow::bail!("microphone closed");
            };
            frames += 1;
            energy = energy.max(calculate_rms(frame.samples()));
            peak = peak.max(frame.samples().iter().map(|s| s.saturating_abs()).max().unwrap_or(0));
            if detector.classify(&frame)? {
                speech += 1;
            }
        }

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:5} | Speech: {:3}/{:3} | [{}]",
            i + 1,
            energy,
            peak,
            speech,
            frames,
            meter
        );
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If speech frames stay at 0 while you talk, lower audio.rms_threshold.");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: aerion devices");
    println!("  3. Set audio.input_device in the config file");

    Ok(())
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000_u32;
    let playback = AudioPlayback::new(sample_rate)?;

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    playback.play(samples, &CancellationToken::new())?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Test TTS output with the configured backend
fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let speech = aerion::daemon::build_speech(config)?;
    let started = Instant::now();
    speech.speak(text, &CancellationToken::new())?;

    println!("Spoke in {:.1}s", started.elapsed().as_secs_f32());
    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// List audio devices
fn devices() -> anyhow::Result<()> {
    let (inputs, outputs) = list_devices()?;

    println!("Input devices:");
    for name in &inputs {
        println!("  {name}");
    }
    println!("\nOutput devices:");
    for name in &outputs {
        println!("  {name}");
    }

    Ok(())
}
