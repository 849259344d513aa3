//! Voice processing module
//!
//! Frames come in through a [`FrameSource`], are gated and classified, and
//! the [`SegmentRecorder`] turns them into utterances. Wake word detection,
//! transcription and speech output sit behind traits so the conversation
//! loop can be driven by fakes in tests.

mod capture;
mod frame;
mod gate;
mod playback;
mod segment;
mod stt;
mod tts;
mod vad;
mod wake_word;

pub use capture::{FrameSource, MicrophoneSource, list_devices};
pub use frame::{
    Frame, FrameFormat, SUPPORTED_FRAME_MS, SUPPORTED_SAMPLE_RATES, Utterance, f32_to_i16,
    samples_to_wav,
};
pub use gate::{EnergyGate, calculate_rms};
pub use playback::{AudioPlayback, PcmAudio, PlaybackOutcome, decode_mp3};
pub use segment::{RecorderSettings, SegmentEvent, SegmentRecorder, TimeoutPolicy};
pub use stt::{OPENAI_BASE_URL, Transcriber, WhisperTranscriber, transcribe_or_empty};
pub use tts::{CloudSpeech, CommandSpeech, SpeechSink};
pub use vad::{
    BargeInDetector, EnergyOnly, SpeechDetector, VadBackend, VoiceActivityClassifier,
    WebRtcClassifier, build_classifier,
};
pub use wake_word::{
    DetectorState, TranscriptWakeWord, WakeWordDetector, contains_keyword, energy_threshold,
};
