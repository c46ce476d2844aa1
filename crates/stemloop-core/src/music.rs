//! Music theory utilities and stem filename metadata
//!
//! Stem libraries encode tempo and key in the filename
//! (`01.Piano c minor 100 Bpm.wav`). This module parses those once at
//! catalog load time and provides key normalization for fingerprints.

use std::sync::OnceLock;

use regex::Regex;

/// Musical key with root note and scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicalKey {
    /// Root note as semitone offset from C (0=C, 1=C#, 2=D, ..., 11=B)
    pub root: u8,
    /// true = minor, false = major
    pub minor: bool,
}

const ROOT_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

impl MusicalKey {
    /// Create a new musical key
    pub const fn new(root: u8, minor: bool) -> Self {
        Self {
            root: root % 12,
            minor,
        }
    }

    /// Parse key strings like "C Minor", "f# major", "Bb Min"
    ///
    /// A bare root note with no mode is rejected; the render service needs
    /// an explicit Major/Minor.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let mut chars = s.chars().peekable();

        let root_char = chars.next()?.to_ascii_uppercase();
        let base_root = match root_char {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };

        let root = match chars.peek() {
            Some('#') => {
                chars.next();
                (base_root + 1) % 12
            }
            Some('b') => {
                chars.next();
                (base_root + 11) % 12 // +11 is same as -1 mod 12
            }
            _ => base_root,
        };

        let rest: String = chars.collect::<String>().trim().to_lowercase();
        let minor = if rest.starts_with("min") || rest == "m" {
            true
        } else if rest.starts_with("maj") {
            false
        } else {
            return None;
        };

        Some(Self { root, minor })
    }

    /// Canonical display form: "C Minor", "A# Major"
    pub fn canonical_name(&self) -> String {
        format!(
            "{} {}",
            ROOT_NAMES[self.root as usize],
            if self.minor { "Minor" } else { "Major" }
        )
    }

    /// Compact form used in fingerprints: "CMinor", "A#Major"
    pub fn compact_name(&self) -> String {
        self.canonical_name().replace(' ', "")
    }
}

/// Metadata parsed from a stem filename, extracted once at load time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StemInfo {
    /// Original tempo ("100 Bpm" in the filename)
    pub original_bpm: Option<u32>,
    /// Original key in canonical form ("C Minor")
    pub original_key: Option<String>,
}

fn bpm_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+)\s*Bpm").expect("bpm regex"))
}

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)([A-G][#b]?)\s*(Major|Minor|Maj|Min)").expect("key regex")
    })
}

/// Last path segment of a stem identifier; the file name is also the
/// stem's identity in fingerprints
pub fn stem_file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parse tempo and key metadata from a stem path's file name
pub fn parse_stem_info(path: &str) -> StemInfo {
    let file_name = stem_file_name(path);

    let original_bpm = bpm_regex()
        .captures(file_name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());

    let original_key = key_regex().captures(file_name).and_then(|c| {
        let root = c.get(1)?.as_str();
        let mode = c.get(2)?.as_str();
        MusicalKey::parse(&format!("{} {}", root, mode)).map(|k| k.canonical_name())
    });

    StemInfo {
        original_bpm,
        original_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_basic() {
        let key = MusicalKey::parse("C Minor").unwrap();
        assert_eq!(key.root, 0);
        assert!(key.minor);
        assert_eq!(key.canonical_name(), "C Minor");
    }

    #[test]
    fn test_parse_key_case_and_accidentals() {
        assert_eq!(
            MusicalKey::parse("f# major").unwrap().canonical_name(),
            "F# Major"
        );
        // Flats normalize to the sharp spelling of the same pitch
        assert_eq!(
            MusicalKey::parse("Bb Min").unwrap().canonical_name(),
            "A# Minor"
        );
    }

    #[test]
    fn test_bare_note_is_rejected() {
        // "Piano C 100 Bpm" has no mode, so no key is assigned
        assert!(MusicalKey::parse("C").is_none());
        assert!(MusicalKey::parse("G 100").is_none());
    }

    #[test]
    fn test_compact_name() {
        assert_eq!(MusicalKey::parse("C Minor").unwrap().compact_name(), "CMinor");
    }

    #[test]
    fn test_parse_stem_info_full() {
        let info = parse_stem_info("/stems/Piano/01.Piano c minor 100 Bpm.wav");
        assert_eq!(info.original_bpm, Some(100));
        assert_eq!(info.original_key.as_deref(), Some("C Minor"));
    }

    #[test]
    fn test_parse_stem_info_bpm_only() {
        let info = parse_stem_info("/stems/Kick/Kick 90 Bpm.wav");
        assert_eq!(info.original_bpm, Some(90));
        assert_eq!(info.original_key, None);
    }

    #[test]
    fn test_parse_stem_info_nothing() {
        let info = parse_stem_info("/stems/Clap/tight-clap.wav");
        assert_eq!(info, StemInfo::default());
    }

    #[test]
    fn test_stem_file_name() {
        assert_eq!(
            stem_file_name("/stems/Kick/01.Kick 100 Bpm.wav"),
            "01.Kick 100 Bpm.wav"
        );
        assert_eq!(stem_file_name("bare.wav"), "bare.wav");
    }
}
