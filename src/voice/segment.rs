//! Utterance segmentation
//!
//! [`SegmentRecorder`] consumes classified frames and decides where a spoken
//! command starts and ends:
//!
//! - a short ring of recent non-speech frames (pre-roll) is kept so the
//!   first syllable is not clipped
//! - recording starts after `start_frames` consecutive speech frames
//! - once recording, every frame is kept; `end_silence_frames` consecutive
//!   silent frames close the utterance
//! - if speech never starts within `max_wait_frames`, a timeout is reported

use std::collections::VecDeque;

use serde::Deserialize;

use super::{Frame, FrameFormat, Utterance};

/// What bounds the capture window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// The wait limit applies only before speech starts; an utterance in
    /// progress runs until its closing silence
    #[default]
    BeforeSpeech,
    /// As `BeforeSpeech`, and an utterance is also cut at
    /// `max_utterance_frames`
    CapUtterance,
}

/// Frame-count thresholds for a recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderSettings {
    /// Consecutive speech frames that start recording (K)
    pub start_frames: usize,
    /// Consecutive silent frames that end recording (M)
    pub end_silence_frames: usize,
    /// Frames to wait for speech before giving up
    pub max_wait_frames: usize,
    /// Capacity of the pre-roll ring
    pub pre_roll_frames: usize,
    /// Capture window policy
    pub timeout_policy: TimeoutPolicy,
    /// Utterance cap under [`TimeoutPolicy::CapUtterance`]
    pub max_utterance_frames: usize,
}

impl RecorderSettings {
    /// Derive frame counts from durations
    #[must_use]
    pub fn from_durations(
        format: FrameFormat,
        start_frames: usize,
        silence_secs: f32,
        max_wait_secs: f32,
        pre_roll_secs: f32,
    ) -> Self {
        Self {
            start_frames: start_frames.max(1),
            end_silence_frames: format.frames_for(silence_secs).max(1),
            max_wait_frames: format.frames_for(max_wait_secs).max(1),
            pre_roll_frames: format.frames_for(pre_roll_secs),
            timeout_policy: TimeoutPolicy::BeforeSpeech,
            max_utterance_frames: usize::MAX,
        }
    }

    /// Cut utterances at `frames`
    #[must_use]
    pub const fn with_utterance_cap(mut self, frames: usize) -> Self {
        self.timeout_policy = TimeoutPolicy::CapUtterance;
        self.max_utterance_frames = frames;
        self
    }
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self::from_durations(FrameFormat::default(), 3, 2.0, 10.0, 0.5)
    }
}

/// Outcome of feeding one frame
#[derive(Debug)]
pub enum SegmentEvent {
    /// Nothing to report yet
    Pending,
    /// Recording just started
    Started,
    /// A complete utterance
    Utterance(Utterance),
    /// No speech started within the wait window
    Timeout,
    /// Capture was abandoned by the caller
    Interrupted,
}

/// Frame-driven utterance segmenter
#[derive(Debug)]
pub struct SegmentRecorder {
    settings: RecorderSettings,
    format: FrameFormat,
    pre_roll: VecDeque<Frame>,
    pending: Vec<Frame>,
    recording: Option<Vec<Frame>>,
    silent_run: usize,
    waited: usize,
}

impl SegmentRecorder {
    /// Create an idle recorder
    #[must_use]
    pub fn new(settings: RecorderSettings, format: FrameFormat) -> Self {
        Self {
            pre_roll: VecDeque::with_capacity(settings.pre_roll_frames),
            pending: Vec::with_capacity(settings.start_frames),
            recording: None,
            silent_run: 0,
            waited: 0,
            settings,
            format,
        }
    }

    /// Feed one classified frame
    pub fn observe(&mut self, frame: Frame, is_speech: bool) -> SegmentEvent {
        if self.recording.is_some() {
            return self.observe_recording(frame, is_speech);
        }

        self.waited += 1;

        if is_speech {
            self.pending.push(frame);
            if self.pending.len() >= self.settings.start_frames {
                let mut frames =
                    Vec::with_capacity(self.pre_roll.len() + self.pending.len());
                frames.extend(self.pre_roll.drain(..));
                frames.append(&mut self.pending);
                self.recording = Some(frames);
                self.silent_run = 0;
                self.waited = 0;
                tracing::debug!("speech started, recording");
                return SegmentEvent::Started;
            }
        } else {
            // A broken speech run was noise; it becomes context
            let pending = std::mem::take(&mut self.pending);
            for candidate in pending {
                self.push_pre_roll(candidate);
            }
            self.push_pre_roll(frame);
        }

        if self.waited >= self.settings.max_wait_frames {
            tracing::debug!(frames = self.waited, "no speech within wait window");
            self.reset();
            return SegmentEvent::Timeout;
        }

        SegmentEvent::Pending
    }

    fn observe_recording(&mut self, frame: Frame, is_speech: bool) -> SegmentEvent {
        let Some(frames) = self.recording.as_mut() else {
            return SegmentEvent::Pending;
        };
        frames.push(frame);

        if is_speech {
            self.silent_run = 0;
        } else {
            self.silent_run += 1;
        }

        let closed = self.silent_run >= self.settings.end_silence_frames;
        let capped = self.settings.timeout_policy == TimeoutPolicy::CapUtterance
            && frames.len() >= self.settings.max_utterance_frames;

        if closed || capped {
            let frames = std::mem::take(frames);
            self.reset();
            tracing::debug!(frames = frames.len(), capped, "utterance complete");
            return SegmentEvent::Utterance(Utterance::from_frames(frames, self.format));
        }

        SegmentEvent::Pending
    }

    fn push_pre_roll(&mut self, frame: Frame) {
        if self.settings.pre_roll_frames == 0 {
            return;
        }
        if self.pre_roll.len() == self.settings.pre_roll_frames {
            self.pre_roll.pop_front();
        }
        self.pre_roll.push_back(frame);
    }

    /// Abandon any capture in progress
    pub fn interrupt(&mut self) -> SegmentEvent {
        self.reset();
        SegmentEvent::Interrupted
    }

    /// Clear all buffers and counters
    pub fn reset(&mut self) {
        self.pre_roll.clear();
        self.pending.clear();
        self.recording = None;
        self.silent_run = 0;
        self.waited = 0;
    }

    /// Whether speech has started
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Frames currently held in the pre-roll ring
    #[must_use]
    pub fn pre_roll_len(&self) -> usize {
        self.pre_roll.len()
    }

    /// Active thresholds
    #[must_use]
    pub const fn settings(&self) -> &RecorderSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RecorderSettings {
        RecorderSettings {
            start_frames: 3,
            end_silence_frames: 4,
            max_wait_frames: 20,
            pre_roll_frames: 2,
            timeout_policy: TimeoutPolicy::BeforeSpeech,
            max_utterance_frames: usize::MAX,
        }
    }

    fn frame() -> Frame {
        Frame::silence(FrameFormat::default())
    }

    #[test]
    fn test_default_settings_match_durations() {
        let settings = RecorderSettings::default();
        assert_eq!(settings.start_frames, 3);
        assert_eq!(settings.end_silence_frames, 66);
        assert_eq!(settings.max_wait_frames, 333);
        assert_eq!(settings.pre_roll_frames, 16);
    }

    #[test]
    fn test_pre_roll_evicts_oldest() {
        let mut recorder = SegmentRecorder::new(settings(), FrameFormat::default());
        for _ in 0..5 {
            recorder.observe(frame(), false);
        }
        assert_eq!(recorder.pre_roll_len(), 2);
    }

    #[test]
    fn test_short_noise_burst_does_not_start() {
        let mut recorder = SegmentRecorder::new(settings(), FrameFormat::default());
        recorder.observe(frame(), true);
        recorder.observe(frame(), true);
        recorder.observe(frame(), false);
        recorder.observe(frame(), true);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_start_includes_pre_roll() {
        let mut recorder = SegmentRecorder::new(settings(), FrameFormat::default());
        recorder.observe(frame(), false);
        recorder.observe(frame(), true);
        recorder.observe(frame(), true);
        assert!(matches!(recorder.observe(frame(), true), SegmentEvent::Started));

        for _ in 0..3 {
            assert!(matches!(recorder.observe(frame(), false), SegmentEvent::Pending));
        }
        let SegmentEvent::Utterance(utterance) = recorder.observe(frame(), false) else {
            panic!("expected utterance");
        };
        // 1 pre-roll + 3 speech + 4 silence
        assert_eq!(utterance.frame_count(), 8);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_speech_resets_silence_run() {
        let mut recorder = SegmentRecorder::new(settings(), FrameFormat::default());
        for _ in 0..3 {
            recorder.observe(frame(), true);
        }
        for _ in 0..3 {
            recorder.observe(frame(), false);
        }
        recorder.observe(frame(), true);
        for _ in 0..3 {
            assert!(matches!(recorder.observe(frame(), false), SegmentEvent::Pending));
        }
        assert!(matches!(
            recorder.observe(frame(), false),
            SegmentEvent::Utterance(_)
        ));
    }

    #[test]
    fn test_wait_limit_ignored_while_recording() {
        let mut recorder = SegmentRecorder::new(settings(), FrameFormat::default());
        for _ in 0..3 {
            recorder.observe(frame(), true);
        }
        for _ in 0..50 {
            assert!(matches!(recorder.observe(frame(), true), SegmentEvent::Pending));
        }
    }

    #[test]
    fn test_cap_utterance_policy() {
        let settings = settings().with_utterance_cap(10);
        let mut recorder = SegmentRecorder::new(settings, FrameFormat::default());
        for _ in 0..3 {
            recorder.observe(frame(), true);
        }
        for _ in 0..6 {
            assert!(matches!(recorder.observe(frame(), true), SegmentEvent::Pending));
        }
        let SegmentEvent::Utterance(utterance) = recorder.observe(frame(), true) else {
            panic!("expected capped utterance");
        };
        assert_eq!(utterance.frame_count(), 10);
    }

    #[test]
    fn test_interrupt_discards_capture() {
        let mut recorder = SegmentRecorder::new(settings(), FrameFormat::default());
        for _ in 0..4 {
            recorder.observe(frame(), true);
        }
        assert!(matches!(recorder.interrupt(), SegmentEvent::Interrupted));
        assert!(!recorder.is_recording());
        assert_eq!(recorder.pre_roll_len(), 0);
    }
}
