//! Configuration management for Aerion
//!
//! Values resolve as environment, then config file, then built-in default.

pub mod file;

use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

use crate::assistant::{AssistantSettings, EmptyTranscriptPolicy};
use crate::llm::RestartPhrases;
use crate::voice::{FrameFormat, OPENAI_BASE_URL, RecorderSettings, TimeoutPolicy, VadBackend};
use crate::{Error, Result};

/// Default wake word
pub const DEFAULT_WAKE_WORD: &str = "computer";

/// Default LLM model
pub const DEFAULT_MODEL: &str = "gpt-4o";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a home voice assistant with the manner of a dry, \
    unflappable butler. Be direct and efficient. Your replies are spoken aloud, so keep them \
    short and never use markdown, lists or emoji.";

const DEFAULT_APOLOGY: &str = "Sorry, I ran into a problem with that.";

/// Aerion configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub audio: AudioConfig,
    pub segment: SegmentConfig,
    pub wake: WakeConfig,
    pub conversation: ConversationConfig,
    pub barge_in: BargeInConfig,
    pub llm: LlmConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub api_keys: ApiKeys,
}

/// Capture and frame classification
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    /// Substring of the input device name; default device if unset
    pub input_device: Option<String>,
    /// Energy gate threshold for command capture
    pub rms_threshold: f32,
    pub vad: VadBackend,
    pub vad_aggressiveness: u8,
}

/// Command segmentation
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    pub start_frames: usize,
    pub silence_secs: f32,
    pub max_wait_secs: f32,
    pub pre_roll_secs: f32,
    pub timeout_policy: TimeoutPolicy,
    pub max_utterance_secs: f32,
}

/// Wake word detection
#[derive(Debug, Clone)]
pub struct WakeConfig {
    pub enabled: bool,
    pub keyword: String,
    pub sensitivity: f32,
}

/// Conversation behavior
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub system_prompt: String,
    pub follow_up_on_question: bool,
    pub empty_transcript: EmptyTranscriptPolicy,
    pub apology: Option<String>,
    pub restart_phrases: Vec<String>,
}

/// Interrupting playback
#[derive(Debug, Clone)]
pub struct BargeInConfig {
    pub enabled: bool,
    pub rms_threshold: f32,
    pub min_speech_frames: usize,
}

/// Chat model
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    /// API root, shared with cloud STT and TTS
    pub base_url: String,
    pub temperature: f32,
    pub max_tool_rounds: u32,
}

/// Speech-to-text
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub model: String,
    pub min_duration_secs: f32,
}

/// Which speech synthesizer to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsBackend {
    /// `OpenAI` speech endpoint
    #[default]
    Openai,
    /// Local `say` / `espeak`
    Command,
}

/// Text-to-speech
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub backend: TtsBackend,
    pub model: String,
    pub voice: String,
    pub speed: f32,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<SecretString>,
}

impl Config {
    /// Load configuration from environment and config file
    ///
    /// # Errors
    ///
    /// Returns a configuration error if an explicit file is unusable or a
    /// value is out of range
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        let config = Self::from_sources(fc, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Resolve a file overlay and an environment lookup into a config
    ///
    /// Does not validate.
    #[must_use]
    pub fn from_sources(fc: file::AerionConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let audio = AudioConfig {
            sample_rate: fc.audio.sample_rate.unwrap_or(16_000),
            frame_ms: fc.audio.frame_ms.unwrap_or(30),
            input_device: fc.audio.input_device,
            rms_threshold: fc.audio.rms_threshold.unwrap_or(0.01),
            vad: fc.audio.vad.unwrap_or_default(),
            vad_aggressiveness: fc.audio.vad_aggressiveness.unwrap_or(1),
        };

        let segment = SegmentConfig {
            start_frames: fc.segment.start_frames.unwrap_or(3),
            silence_secs: fc.segment.silence_secs.unwrap_or(2.0),
            max_wait_secs: fc.segment.max_wait_secs.unwrap_or(10.0),
            pre_roll_secs: fc.segment.pre_roll_secs.unwrap_or(0.5),
            timeout_policy: fc.segment.timeout_policy.unwrap_or_default(),
            max_utterance_secs: fc.segment.max_utterance_secs.unwrap_or(30.0),
        };

        let wake = WakeConfig {
            enabled: fc.wake.enabled.unwrap_or(true),
            keyword: env("AERION_WAKE_WORD")
                .or(fc.wake.keyword)
                .unwrap_or_else(|| DEFAULT_WAKE_WORD.to_string()),
            sensitivity: fc.wake.sensitivity.unwrap_or(0.5),
        };

        let conversation = ConversationConfig {
            system_prompt: fc
                .conversation
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            follow_up_on_question: fc.conversation.follow_up_on_question.unwrap_or(false),
            empty_transcript: fc.conversation.empty_transcript.unwrap_or_default(),
            apology: fc
                .conversation
                .apology
                .map_or_else(|| Some(DEFAULT_APOLOGY.to_string()), |a| {
                    Some(a).filter(|a| !a.trim().is_empty())
                }),
            restart_phrases: fc
                .conversation
                .restart_phrases
                .unwrap_or_else(|| vec!["restart".to_string(), "restart yourself".to_string()]),
        };

        let barge_in = BargeInConfig {
            enabled: fc.barge_in.enabled.unwrap_or(true),
            rms_threshold: fc.barge_in.rms_threshold.unwrap_or(0.02),
            min_speech_frames: fc.barge_in.min_speech_frames.unwrap_or(1),
        };

        let llm = LlmConfig {
            model: env("OPENAI_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: env("OPENAI_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            temperature: fc.llm.temperature.unwrap_or(0.7),
            max_tool_rounds: fc.llm.max_tool_rounds.unwrap_or(4),
        };

        let stt = SttConfig {
            model: fc.stt.model.unwrap_or_else(|| "whisper-1".to_string()),
            min_duration_secs: fc.stt.min_duration_secs.unwrap_or(0.2),
        };

        let tts = TtsConfig {
            backend: fc.tts.backend.unwrap_or_default(),
            model: fc.tts.model.unwrap_or_else(|| "tts-1".to_string()),
            voice: env("VOICE_NAME")
                .or(fc.tts.voice)
                .unwrap_or_else(|| "alloy".to_string()),
            speed: fc.tts.speed.unwrap_or(1.0),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
        };

        Self {
            audio,
            segment,
            wake,
            conversation,
            barge_in,
            llm,
            stt,
            tts,
            api_keys,
        }
    }

    /// Check every value the audio pipeline depends on
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first bad value
    pub fn validate(&self) -> Result<()> {
        self.frame_format()?;

        if self.audio.vad_aggressiveness > 3 {
            return Err(Error::Config(format!(
                "audio.vad_aggressiveness must be 0..=3, got {}",
                self.audio.vad_aggressiveness
            )));
        }
        if self.segment.start_frames == 0 {
            return Err(Error::Config("segment.start_frames must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.wake.sensitivity) {
            return Err(Error::Config(format!(
                "wake.sensitivity must be in [0, 1], got {}",
                self.wake.sensitivity
            )));
        }
        if self.wake.keyword.trim().is_empty() {
            return Err(Error::Config("wake.keyword must not be empty".to_string()));
        }
        for (name, secs) in [
            ("segment.silence_secs", self.segment.silence_secs),
            ("segment.max_wait_secs", self.segment.max_wait_secs),
            ("segment.max_utterance_secs", self.segment.max_utterance_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(Error::Config(format!("{name} must be positive, got {secs}")));
            }
        }
        if !self.segment.pre_roll_secs.is_finite() || self.segment.pre_roll_secs < 0.0 {
            return Err(Error::Config("segment.pre_roll_secs must not be negative".to_string()));
        }
        if !(0.25..=4.0).contains(&self.tts.speed) {
            return Err(Error::Config(format!(
                "tts.speed must be in [0.25, 4.0], got {}",
                self.tts.speed
            )));
        }
        Ok(())
    }

    /// Frame shape for capture and VAD
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unsupported rate or duration
    pub fn frame_format(&self) -> Result<FrameFormat> {
        FrameFormat::new(self.audio.sample_rate, self.audio.frame_ms)
    }

    /// Segment thresholds in frames
    ///
    /// # Errors
    ///
    /// Returns a configuration error if [`Config::validate`] fails
    pub fn recorder_settings(&self) -> Result<RecorderSettings> {
        self.validate()?;
        let format = self.frame_format()?;
        let settings = RecorderSettings::from_durations(
            format,
            self.segment.start_frames,
            self.segment.silence_secs,
            self.segment.max_wait_secs,
            self.segment.pre_roll_secs,
        );
        Ok(match self.segment.timeout_policy {
            TimeoutPolicy::BeforeSpeech => settings,
            TimeoutPolicy::CapUtterance => settings
                .with_utterance_cap(format.frames_for(self.segment.max_utterance_secs).max(1)),
        })
    }

    /// State machine settings
    ///
    /// # Errors
    ///
    /// Returns a configuration error if [`Config::validate`] fails
    pub fn assistant_settings(&self) -> Result<AssistantSettings> {
        Ok(AssistantSettings {
            format: self.frame_format()?,
            recorder: self.recorder_settings()?,
            wake_enabled: self.wake.enabled,
            barge_in_enabled: self.barge_in.enabled,
            follow_up_on_question: self.conversation.follow_up_on_question,
            empty_transcript: self.conversation.empty_transcript,
            apology: self.conversation.apology.clone(),
            system_prompt: self.conversation.system_prompt.clone(),
        })
    }

    #[must_use]
    pub fn restart_phrases(&self) -> RestartPhrases {
        RestartPhrases::new(&self.conversation.restart_phrases)
    }

    /// The `OpenAI` key
    ///
    /// # Errors
    ///
    /// Missing credentials are a configuration error
    pub fn openai_key(&self) -> Result<SecretString> {
        self.api_keys.openai.clone().ok_or_else(|| {
            Error::Config("OPENAI_API_KEY is not set (env or [api_keys] openai)".to_string())
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_sources(file::AerionConfigFile::default(), |_| None)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.wake.keyword, "computer");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.tts.voice, "alloy");
        assert!(config.api_keys.openai.is_none());

        let recorder = config.recorder_settings().unwrap();
        assert_eq!(recorder.end_silence_frames, 66);
        assert_eq!(recorder.pre_roll_frames, 16);
        assert_eq!(recorder.max_wait_frames, 333);
        assert_eq!(recorder.timeout_policy, TimeoutPolicy::BeforeSpeech);
    }

    #[test]
    fn test_env_overrides_file() {
        let fc = file::parse(
            r#"
            [wake]
            keyword = "jarvis"

            [tts]
            voice = "nova"

            [api_keys]
            openai = "sk-file"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            fc,
            env_of(&[("VOICE_NAME", "onyx"), ("OPENAI_API_KEY", "sk-env")]),
        );
        assert_eq!(config.wake.keyword, "jarvis");
        assert_eq!(config.tts.voice, "onyx");
        assert_eq!(config.openai_key().unwrap().expose_secret(), "sk-env");
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let config = Config::from_sources(
            file::AerionConfigFile::default(),
            env_of(&[("AERION_WAKE_WORD", "  ")]),
        );
        assert_eq!(config.wake.keyword, "computer");
    }

    #[test]
    fn test_policies_parse() {
        let fc = file::parse(
            r#"
            [segment]
            timeout_policy = "cap_utterance"
            max_utterance_secs = 3.0

            [conversation]
            empty_transcript = "command"
            apology = ""

            [tts]
            backend = "command"

            [audio]
            vad = "energy"
            "#,
        )
        .unwrap();
        let config = Config::from_sources(fc, |_| None);

        assert_eq!(config.conversation.empty_transcript, EmptyTranscriptPolicy::Command);
        assert_eq!(config.conversation.apology, None);
        assert_eq!(config.tts.backend, TtsBackend::Command);
        assert_eq!(config.audio.vad, VadBackend::Energy);

        let recorder = config.recorder_settings().unwrap();
        assert_eq!(recorder.timeout_policy, TimeoutPolicy::CapUtterance);
        assert_eq!(recorder.max_utterance_frames, 100);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.audio.sample_rate = 44_100;
        assert!(config.validate().unwrap_err().is_fatal());

        let mut config = Config::default();
        config.audio.vad_aggressiveness = 4;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.wake.sensitivity = 1.2;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.segment.start_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_settings_are_validated() {
        let mut config = Config::default();
        config.segment.silence_secs = f32::NAN;
        assert!(config.validate().is_err());
        assert!(config.recorder_settings().unwrap_err().is_fatal());

        let mut config = Config::default();
        config.segment.max_wait_secs = 0.0;
        assert!(config.assistant_settings().unwrap_err().is_fatal());

        let mut config = Config::default();
        config.segment.pre_roll_secs = f32::INFINITY;
        assert!(config.recorder_settings().is_err());
    }

    #[test]
    fn test_missing_key_is_fatal() {
        assert!(Config::default().openai_key().unwrap_err().is_fatal());
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(file::parse("[channels]\ndiscord = true\n").is_err());
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(file::load_config_file(Some(&missing)).is_err());

        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[audio]\nframe_ms = 20").unwrap();
        let fc = file::load_config_file(Some(&path)).unwrap();
        assert_eq!(fc.audio.frame_ms, Some(20));

        std::fs::write(&path, "[audio\n").unwrap();
        assert!(file::load_config_file(Some(&path)).unwrap_err().is_fatal());
    }
}
