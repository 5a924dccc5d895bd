//! # Chord Symbols
//!
//! Turns captured roots into the chord symbols that seed progression
//! generation. A symbol is `(root, quality)`; qualities default from the
//! selected genre but each slot can be edited on its own.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::sequencer::CapturedNote;
use crate::tuning::Spelling;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    Rock,
    Pop,
    Jazz,
}

impl Genre {
    pub fn default_quality(self) -> Quality {
        match self {
            Genre::Rock => Quality::Power,
            Genre::Pop => Quality::Major,
            Genre::Jazz => Quality::Dominant7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Genre::Rock => "rock",
            Genre::Pop => "pop",
            Genre::Jazz => "jazz",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Genre {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rock" => Ok(Genre::Rock),
            "pop" => Ok(Genre::Pop),
            "jazz" => Ok(Genre::Jazz),
            other => Err(anyhow!("Unknown genre: {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Quality {
    Power,
    #[default]
    Major,
    Minor,
    Dominant7,
    Sus4,
    Diminished,
    Augmented,
}

impl Quality {
    /// Suffix appended to the root. Major is bare unless `maj_as_text`.
    pub fn suffix(self, maj_as_text: bool) -> &'static str {
        match self {
            Quality::Power => "5",
            Quality::Major if maj_as_text => "maj",
            Quality::Major => "",
            Quality::Minor => "m",
            Quality::Dominant7 => "7",
            Quality::Sus4 => "sus4",
            Quality::Diminished => "dim",
            Quality::Augmented => "aug",
        }
    }
}

impl FromStr for Quality {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "5" | "power" => Ok(Quality::Power),
            "maj" | "major" | "" => Ok(Quality::Major),
            "min" | "m" | "minor" => Ok(Quality::Minor),
            "7" | "dom7" => Ok(Quality::Dominant7),
            "sus4" => Ok(Quality::Sus4),
            "dim" => Ok(Quality::Diminished),
            "aug" => Ok(Quality::Augmented),
            other => Err(anyhow!("Unknown chord quality: {:?}", other)),
        }
    }
}

/// Renders a chord symbol such as "C7", "Dm" or "E5".
pub fn build_symbol(root: &str, quality: Quality, maj_as_text: bool) -> String {
    format!("{}{}", root, quality.suffix(maj_as_text))
}

/// Per-slot chord qualities plus the display options for the seed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordSheet {
    qualities: Vec<Quality>,
    genre: Option<Genre>,
    pub maj_as_text: bool,
    pub spelling: Spelling,
}

impl ChordSheet {
    pub fn new(slot_count: usize) -> Self {
        Self {
            qualities: vec![Quality::default(); slot_count],
            genre: None,
            maj_as_text: false,
            spelling: Spelling::Sharp,
        }
    }

    pub fn genre(&self) -> Option<Genre> {
        self.genre
    }

    pub fn qualities(&self) -> &[Quality] {
        &self.qualities
    }

    /// Selects a genre and sets every slot to its default quality.
    pub fn apply_genre(&mut self, genre: Genre) {
        self.genre = Some(genre);
        self.qualities.fill(genre.default_quality());
    }

    pub fn set_quality(&mut self, index: usize, quality: Quality) -> Result<()> {
        let slot = self
            .qualities
            .get_mut(index)
            .ok_or_else(|| anyhow!("No chord slot {}", index))?;
        *slot = quality;
        Ok(())
    }

    /// A freshly committed root takes the genre's default quality.
    pub fn on_commit(&mut self, index: usize) {
        if let (Some(genre), Some(slot)) = (self.genre, self.qualities.get_mut(index)) {
            *slot = genre.default_quality();
        }
    }

    /// Grows or shrinks the sheet; new slots get the rock default.
    pub fn resize(&mut self, slot_count: usize) {
        self.qualities
            .resize(slot_count, Genre::Rock.default_quality());
    }

    /// Chord symbols for the filled slots, in slot order.
    pub fn build_seed(&self, slots: &[Option<CapturedNote>]) -> Vec<String> {
        slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.map(|note| {
                    let quality = self.qualities.get(i).copied().unwrap_or_default();
                    build_symbol(note.pitch_class.name(self.spelling), quality, self.maj_as_text)
                })
            })
            .collect()
    }

    /// The request body for the progression service.
    ///
    /// # Returns
    /// * `Err` - No genre has been selected yet
    pub fn seed_request(&self, slots: &[Option<CapturedNote>]) -> Result<ChordSeedRequest> {
        let genre = self
            .genre
            .ok_or_else(|| anyhow!("Select a genre before requesting a progression"))?;
        Ok(ChordSeedRequest {
            genre,
            seed: self.build_seed(slots),
        })
    }
}

/// JSON body sent to the chord-progression service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordSeedRequest {
    pub genre: Genre,
    pub seed: Vec<String>,
}

impl ChordSeedRequest {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
