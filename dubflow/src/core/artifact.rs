//! Typed artifacts produced by pipeline steps.
//!
//! Each step declares the artifact variant it produces and consumes
//! through [`StepContext`] accessors, so downstream steps never cast
//! untyped blobs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One timed segment of transcribed or translated speech.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechSegment {
    /// Segment start offset in milliseconds.
    pub start_ms: u64,
    /// Segment end offset in milliseconds.
    pub end_ms: u64,
    /// Segment text.
    pub text: String,
    /// Speaker label, if diarization provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl SpeechSegment {
    /// Creates a new segment.
    #[must_use]
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
            speaker: None,
        }
    }
}

/// A transcript of the source audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    /// Language of the transcribed speech.
    pub language: String,
    /// Timed segments in source order.
    pub segments: Vec<SpeechSegment>,
}

impl Transcript {
    /// Creates a transcript.
    #[must_use]
    pub fn new(language: impl Into<String>, segments: Vec<SpeechSegment>) -> Self {
        Self {
            language: language.into(),
            segments,
        }
    }

    /// Full text of all segments joined by spaces.
    #[must_use]
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Content-derived hash over language and segment text, used as a
    /// memoization key component.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.language.as_bytes());
        for segment in &self.segments {
            hasher.update(segment.start_ms.to_le_bytes());
            hasher.update(segment.text.as_bytes());
        }
        hex::encode(&hasher.finalize()[..16])
    }
}

/// A translated transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    /// Target language of the translation.
    pub language: String,
    /// Timed segments, aligned with the source transcript.
    pub segments: Vec<SpeechSegment>,
}

impl Translation {
    /// Creates a translation.
    #[must_use]
    pub fn new(language: impl Into<String>, segments: Vec<SpeechSegment>) -> Self {
        Self {
            language: language.into(),
            segments,
        }
    }
}

/// One synthesized audio segment, aligned to a translation segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSegment {
    /// Index of the translation segment this audio belongs to.
    pub index: usize,
    /// Reference to the synthesized audio artifact.
    pub audio_ref: String,
    /// Target start offset in milliseconds.
    pub start_ms: u64,
    /// Target end offset in milliseconds.
    pub end_ms: u64,
    /// Backend that produced this segment.
    pub backend: String,
}

/// Result of validating the final output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the artifact passes the quality threshold.
    pub passes_threshold: bool,
    /// Issues found during validation.
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Output of a single pipeline step.
///
/// A tagged union rather than an untyped key/value blob: each step
/// produces exactly one variant, and consumers read it back through the
/// typed [`StepContext`] accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StepOutput {
    /// Extracted source audio reference.
    AudioRef {
        /// The audio artifact reference.
        audio_ref: String,
    },
    /// Source-language transcript.
    Transcript(Transcript),
    /// Target-language translation.
    Translation(Translation),
    /// Generated subtitle artifact reference.
    SubtitleRef {
        /// The subtitle artifact reference.
        subtitle_ref: String,
    },
    /// Synthesized audio segments.
    AudioSegments(Vec<AudioSegment>),
    /// Assembled dubbed audio track reference.
    AudioTrack {
        /// The audio track artifact reference.
        track_ref: String,
    },
    /// Final muxed video reference.
    VideoRef {
        /// The video artifact reference.
        video_ref: String,
    },
    /// Output validation report.
    Validation(ValidationReport),
}

impl StepOutput {
    /// Short name of the variant, used in logs and events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AudioRef { .. } => "audio_ref",
            Self::Transcript(_) => "transcript",
            Self::Translation(_) => "translation",
            Self::SubtitleRef { .. } => "subtitle_ref",
            Self::AudioSegments(_) => "audio_segments",
            Self::AudioTrack { .. } => "audio_track",
            Self::VideoRef { .. } => "video_ref",
            Self::Validation(_) => "validation",
        }
    }
}

/// Per-job typed store of step outputs for a single execution attempt.
///
/// Later outputs of the same variant replace earlier ones, which is what
/// a retried step needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepContext {
    outputs: Vec<StepOutput>,
}

impl StepContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a step output, replacing any previous output of the same kind.
    pub fn put(&mut self, output: StepOutput) {
        self.outputs.retain(|o| o.kind() != output.kind());
        self.outputs.push(output);
    }

    /// Number of distinct outputs recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Returns true if no outputs have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// The extracted audio reference, if recorded.
    #[must_use]
    pub fn audio_ref(&self) -> Option<&str> {
        self.outputs.iter().find_map(|o| match o {
            StepOutput::AudioRef { audio_ref } => Some(audio_ref.as_str()),
            _ => None,
        })
    }

    /// The transcript, if recorded.
    #[must_use]
    pub fn transcript(&self) -> Option<&Transcript> {
        self.outputs.iter().find_map(|o| match o {
            StepOutput::Transcript(t) => Some(t),
            _ => None,
        })
    }

    /// The translation, if recorded.
    #[must_use]
    pub fn translation(&self) -> Option<&Translation> {
        self.outputs.iter().find_map(|o| match o {
            StepOutput::Translation(t) => Some(t),
            _ => None,
        })
    }

    /// The subtitle reference, if recorded.
    #[must_use]
    pub fn subtitle_ref(&self) -> Option<&str> {
        self.outputs.iter().find_map(|o| match o {
            StepOutput::SubtitleRef { subtitle_ref } => Some(subtitle_ref.as_str()),
            _ => None,
        })
    }

    /// The synthesized audio segments, if recorded.
    #[must_use]
    pub fn audio_segments(&self) -> Option<&[AudioSegment]> {
        self.outputs.iter().find_map(|o| match o {
            StepOutput::AudioSegments(s) => Some(s.as_slice()),
            _ => None,
        })
    }

    /// The assembled audio track reference, if recorded.
    #[must_use]
    pub fn audio_track(&self) -> Option<&str> {
        self.outputs.iter().find_map(|o| match o {
            StepOutput::AudioTrack { track_ref } => Some(track_ref.as_str()),
            _ => None,
        })
    }

    /// The final video reference, if recorded.
    #[must_use]
    pub fn video_ref(&self) -> Option<&str> {
        self.outputs.iter().find_map(|o| match o {
            StepOutput::VideoRef { video_ref } => Some(video_ref.as_str()),
            _ => None,
        })
    }

    /// The validation report, if recorded.
    #[must_use]
    pub fn validation(&self) -> Option<&ValidationReport> {
        self.outputs.iter().find_map(|o| match o {
            StepOutput::Validation(v) => Some(v),
            _ => None,
        })
    }

    /// Artifact references to expose as job outputs: final video, subtitle
    /// track, and dubbed audio track, in that order, when present.
    #[must_use]
    pub fn output_refs(&self) -> Vec<String> {
        let mut refs = Vec::new();
        if let Some(v) = self.video_ref() {
            refs.push(v.to_string());
        }
        if let Some(s) = self.subtitle_ref() {
            refs.push(s.to_string());
        }
        if let Some(t) = self.audio_track() {
            refs.push(t.to_string());
        }
        refs
    }
}
