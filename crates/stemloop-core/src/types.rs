//! Common types for the stemloop session engine
//!
//! Fixed track layout, preview settings, and the stereo sample type shared
//! between the session model and the audio engine.

/// Default sample rate used throughout stemloop (48kHz - the rate the render
/// service produces). The output device may negotiate a different rate.
pub const SAMPLE_RATE: u32 = 48_000;

/// Beats per bar; mix playback always starts on a bar boundary
pub const BEATS_PER_BAR: u32 = 4;

/// Lead time applied when starting the transport, in milliseconds.
/// Absorbs scheduling latency so the first bar boundary is never missed.
pub const TRANSPORT_LEAD_MS: u32 = 100;

/// Instrument layers in their fixed declaration order.
/// Fingerprints and render requests always iterate tracks in this order.
pub const TRACK_ORDER: [&str; 9] = [
    "Chords",
    "Kick",
    "Bass",
    "Snare",
    "Hi Hat",
    "Percussions",
    "Melody",
    "Counter Melody",
    "Clap",
];

/// Tracks that start unmuted (the core beat elements)
pub const DEFAULT_UNMUTED: [&str; 6] = [
    "Chords",
    "Kick",
    "Bass",
    "Snare",
    "Hi Hat",
    "Percussions",
];

/// Keys offered by the session (root + mode pairs the render service accepts)
pub const KEY_CHOICES: [&str; 16] = [
    "C Major", "C Minor", "D Major", "D Minor", "E Major", "E Minor",
    "F Major", "F Minor", "G Major", "G Minor", "A Major", "A Minor",
    "A# Major", "A# Minor", "B Major", "B Minor",
];

/// BPM range used by randomize-all
pub const RANDOM_BPM_MIN: u32 = 80;
pub const RANDOM_BPM_MAX: u32 = 180;

/// Track slot identifier (index into the session's fixed track list)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub usize);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track {}", self.0)
    }
}

/// Which part of a stem an audition excerpt is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewSection {
    Start,
    Middle,
    End,
}

impl PreviewSection {
    /// Wire name expected by the render service
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewSection::Start => "start",
            PreviewSection::Middle => "middle",
            PreviewSection::End => "end",
        }
    }
}

/// Preview length setting (both render at full quality; only the excerpt
/// duration differs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewQuality {
    /// 10 second excerpt
    Short,
    /// 30 second excerpt
    Long,
}

impl PreviewQuality {
    /// Excerpt duration in seconds
    pub fn duration_secs(&self) -> f64 {
        match self {
            PreviewQuality::Short => 10.0,
            PreviewQuality::Long => 30.0,
        }
    }

    /// Quality parameters sent with every render request
    pub fn render_params(&self) -> QualityParams {
        QualityParams {
            sample_rate: 48_000,
            bit_depth: 32,
            compression_ratio: 0.1,
            monophonic: false,
        }
    }
}

/// Encoding parameters forwarded to the render service
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityParams {
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub compression_ratio: f32,
    pub monophonic: bool,
}

/// Audio sample type (32-bit float for processing)
pub type Sample = f32;

/// A single stereo sample (left and right channels)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    /// Create a new stereo sample
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    /// Create a silent stereo sample
    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Scale both channels by a factor
    #[inline]
    pub fn scale(&self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

/// Stems whose path points at a local fallback entry rather than real
/// catalog content. These are never sent to the render service and cannot
/// be auditioned.
pub fn is_placeholder(path: &str) -> bool {
    path.contains("placeholder") || path.contains("fallback")
}
