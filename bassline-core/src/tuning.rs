//! # Musical Tuning Module
//!
//! Frequency ↔ note conversions for 12-tone equal temperament with A4 = 440 Hz.
//!
//! ## Features
//! - Nearest-note lookup by MIDI rounding (octave independent pitch classes)
//! - Cent deviation calculations
//! - Sharp or flat spelling of pitch classes
//! - Bass-register preview frequency for a pitch class

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};

/// Reference frequency of A4 in Hz.
pub const A4_HZ: f32 = 440.0;

/// MIDI note number of A4.
pub const A4_MIDI: i32 = 69;

const NAMES_SHARP: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];
const NAMES_FLAT: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

/// Preview tones are folded into this range so every root sounds like a bass note.
const BASS_PREVIEW_MIN_HZ: f32 = 40.0;
const BASS_PREVIEW_MAX_HZ: f32 = 110.0;
const BASS_PREVIEW_CENTER_HZ: f32 = 75.0;

/// How accidentals are written when a pitch class is rendered to text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spelling {
    #[default]
    Sharp,
    Flat,
}

/// One of the 12 octave-independent equal-tempered note names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Maps any MIDI note number (negative included) to its pitch class.
    pub fn from_midi(midi: i32) -> Self {
        Self::ALL[midi.rem_euclid(12) as usize]
    }

    /// Semitones above C (0..=11).
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self, spelling: Spelling) -> &'static str {
        match spelling {
            Spelling::Sharp => NAMES_SHARP[self.index()],
            Spelling::Flat => NAMES_FLAT[self.index()],
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name(Spelling::Sharp))
    }
}

impl FromStr for PitchClass {
    type Err = anyhow::Error;

    /// Accepts either spelling, so "Db" and "C#" parse to the same class.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        NAMES_SHARP
            .iter()
            .position(|&n| n == s)
            .or_else(|| NAMES_FLAT.iter().position(|&n| n == s))
            .map(|i| Self::ALL[i])
            .ok_or_else(|| anyhow!("Unknown note name: {:?}", s))
    }
}

/// The equal-tempered note closest to a measured frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestNote {
    pub pitch_class: PitchClass,
    /// MIDI note number (69 = A4).
    pub midi: i32,
    /// Exact equal-tempered frequency of that note in Hz.
    pub target_frequency: f32,
}

impl NearestNote {
    /// Octave number in scientific pitch notation (C4 = MIDI 60).
    pub fn octave(&self) -> i32 {
        self.midi.div_euclid(12) - 1
    }

    /// Note name with octave, e.g. "A1".
    pub fn display_name(&self, spelling: Spelling) -> String {
        format!("{}{}", self.pitch_class.name(spelling), self.octave())
    }
}

/// Finds the closest musical note to a given frequency.
///
/// `midi = round(69 + 12·log2(freq / 440))`, the pitch class is `midi mod 12`.
///
/// # Arguments
/// * `freq` - Input frequency in Hz, must be positive and finite
///
/// # Returns
/// * `Some(NearestNote)` - Closest note and its target frequency
/// * `None` - The frequency was not a positive finite number
pub fn nearest_note(freq: f32) -> Option<NearestNote> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }
    let midi = (A4_MIDI as f32 + 12.0 * (freq / A4_HZ).log2()).round() as i32;
    Some(NearestNote {
        pitch_class: PitchClass::from_midi(midi),
        midi,
        target_frequency: midi_to_frequency(midi),
    })
}

/// Equal-tempered frequency of a MIDI note number.
pub fn midi_to_frequency(midi: i32) -> f32 {
    A4_HZ * 2.0_f32.powf((midi - A4_MIDI) as f32 / 12.0)
}

/// Frequency of a pitch class in a given octave (scientific pitch notation).
pub fn frequency_of(pitch_class: PitchClass, octave: i32) -> f32 {
    midi_to_frequency(12 * (octave + 1) + pitch_class.index() as i32)
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn cents_offset(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Absolute cents error between a frequency and its nearest equal-tempered note.
pub fn cents_error(freq: f32) -> Option<f32> {
    nearest_note(freq).map(|n| cents_offset(freq, n.target_frequency).abs())
}

/// Picks a frequency for auditioning a captured root in the bass register.
///
/// Chooses among octaves 1..=3 the rendition closest to 75 Hz, then folds it
/// into 40..=110 Hz.
pub fn bass_preview_frequency(pitch_class: PitchClass) -> f32 {
    let mut freq = (1..=3)
        .map(|octave| frequency_of(pitch_class, octave))
        .min_by(|a, b| {
            let da = (a - BASS_PREVIEW_CENTER_HZ).abs();
            let db = (b - BASS_PREVIEW_CENTER_HZ).abs();
            da.total_cmp(&db)
        })
        .unwrap_or(BASS_PREVIEW_CENTER_HZ);

    while freq > BASS_PREVIEW_MAX_HZ {
        freq /= 2.0;
    }
    while freq < BASS_PREVIEW_MIN_HZ {
        freq *= 2.0;
    }
    freq
}
