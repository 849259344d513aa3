//! TOML configuration file loading
//!
//! Supports `~/.config/aerion/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::TtsBackend;
use crate::assistant::EmptyTranscriptPolicy;
use crate::voice::{TimeoutPolicy, VadBackend};
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AerionConfigFile {
    #[serde(default)]
    pub audio: AudioFileConfig,

    #[serde(default)]
    pub segment: SegmentFileConfig,

    #[serde(default)]
    pub wake: WakeFileConfig,

    #[serde(default)]
    pub conversation: ConversationFileConfig,

    #[serde(default)]
    pub barge_in: BargeInFileConfig,

    #[serde(default)]
    pub llm: LlmFileConfig,

    #[serde(default)]
    pub stt: SttFileConfig,

    #[serde(default)]
    pub tts: TtsFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Capture and frame classification
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// 16000 or 48000
    pub sample_rate: Option<u32>,
    /// 10, 20 or 30
    pub frame_ms: Option<u32>,
    /// Substring of the input device name
    pub input_device: Option<String>,
    /// Energy gate threshold (normalized RMS)
    pub rms_threshold: Option<f32>,
    /// `webrtc` or `energy`
    pub vad: Option<VadBackend>,
    /// 0 (permissive) to 3 (strict)
    pub vad_aggressiveness: Option<u8>,
}

/// Command segmentation
#[derive(Debug, Default, Deserialize)]
pub struct SegmentFileConfig {
    /// Consecutive speech frames that start recording
    pub start_frames: Option<usize>,
    /// Trailing silence that ends a command
    pub silence_secs: Option<f32>,
    /// How long to wait for a command to start
    pub max_wait_secs: Option<f32>,
    /// Audio kept from before speech started
    pub pre_roll_secs: Option<f32>,
    /// `before_speech` or `cap_utterance`
    pub timeout_policy: Option<TimeoutPolicy>,
    /// Ceiling used by `cap_utterance`
    pub max_utterance_secs: Option<f32>,
}

/// Wake word detection
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    pub enabled: Option<bool>,
    pub keyword: Option<String>,
    /// 0 to 1
    pub sensitivity: Option<f32>,
}

/// Conversation behavior
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    pub system_prompt: Option<String>,
    pub follow_up_on_question: Option<bool>,
    /// `wake_word` or `command`
    pub empty_transcript: Option<EmptyTranscriptPolicy>,
    /// Spoken on failure; empty string disables
    pub apology: Option<String>,
    pub restart_phrases: Option<Vec<String>>,
}

/// Interrupting playback
#[derive(Debug, Default, Deserialize)]
pub struct BargeInFileConfig {
    pub enabled: Option<bool>,
    pub rms_threshold: Option<f32>,
    pub min_speech_frames: Option<usize>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-4o")
    pub model: Option<String>,
    /// API root shared with cloud STT and TTS
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tool_rounds: Option<u32>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// STT model (e.g. "whisper-1")
    pub model: Option<String>,
    /// Clips shorter than this are not sent
    pub min_duration_secs: Option<f32>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// `openai` or `command`
    pub backend: Option<TtsBackend>,
    /// TTS model (e.g. "tts-1")
    pub model: Option<String>,
    /// TTS voice identifier (e.g. "alloy")
    pub voice: Option<String>,
    /// TTS speed multiplier
    pub speed: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file
///
/// An explicit `path` must exist and parse. Without one, the standard path
/// is used if present; a broken file there is logged and ignored.
///
/// # Errors
///
/// Returns a configuration error if an explicit path cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<AerionConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = parse(&content)
            .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(AerionConfigFile::default());
    };

    if !path.exists() {
        return Ok(AerionConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(AerionConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(AerionConfigFile::default())
        }
    }
}

/// Parse TOML config text
///
/// # Errors
///
/// Returns error on malformed TOML or unknown keys
pub fn parse(content: &str) -> Result<AerionConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/aerion/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("aerion").join("config.toml"))
}
