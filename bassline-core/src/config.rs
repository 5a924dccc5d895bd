//! Layered TOML configuration: embedded defaults, then the user's config
//! file, then an explicit path if one was given.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::chord::{ChordSheet, Genre};
use crate::pitch::DetectorConfig;
use crate::sequencer::SequencerConfig;
use crate::tuning::Spelling;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    detector: DetectorSection,
    #[serde(default)]
    sequencer: SequencerSection,
    #[serde(default)]
    chords: ChordsSection,
}

#[derive(Deserialize, Default)]
struct DetectorSection {
    analysis_window_size: Option<usize>,
    min_volume_rms: Option<f32>,
    high_pass_hz: Option<f32>,
    low_pass_hz: Option<f32>,
    prefer_fundamental: Option<bool>,
    fundamental_divisors: Option<Vec<u32>>,
    min_frequency_hz: Option<f32>,
}

#[derive(Deserialize, Default)]
struct SequencerSection {
    start_max_hz: Option<f32>,
    track_max_hz: Option<f32>,
    lock_time_ms: Option<u64>,
    rearm_quiet_ms: Option<u64>,
    cooldown_ms: Option<u64>,
    slot_count: Option<usize>,
    prefer_flat: Option<bool>,
}

#[derive(Deserialize, Default)]
struct ChordsSection {
    genre: Option<Genre>,
    maj_as_text: Option<bool>,
}

pub struct BasslineConfig {
    detector: DetectorSection,
    sequencer: SequencerSection,
    chords: ChordsSection,
}

impl BasslineConfig {
    /// Embedded defaults only.
    pub fn builtin() -> Result<Self> {
        let base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse embedded config.toml")?;
        Ok(Self::from_file(base))
    }

    /// Loads the layered configuration.
    ///
    /// A malformed user file is skipped with a warning. A malformed or
    /// unreadable `explicit` file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse embedded config.toml")?;

        if let Some(path) = user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => merge(&mut base, user),
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        if let Some(path) = explicit {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let file: ConfigFile = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config {}", path.display()))?;
            merge(&mut base, file);
            log::info!(target: "config", "loaded {}", path.display());
        }

        Ok(Self::from_file(base))
    }

    fn from_file(file: ConfigFile) -> Self {
        Self {
            detector: file.detector,
            sequencer: file.sequencer,
            chords: file.chords,
        }
    }

    pub fn detector(&self) -> DetectorConfig {
        let fallback = DetectorConfig::default();
        let d = &self.detector;
        DetectorConfig {
            analysis_window_size: d
                .analysis_window_size
                .unwrap_or(fallback.analysis_window_size),
            min_volume_rms: d.min_volume_rms.unwrap_or(fallback.min_volume_rms),
            low_pass_hz: d.low_pass_hz.unwrap_or(fallback.low_pass_hz),
            high_pass_hz: d.high_pass_hz.unwrap_or(fallback.high_pass_hz),
            prefer_fundamental: d.prefer_fundamental.unwrap_or(fallback.prefer_fundamental),
            fundamental_divisors: d
                .fundamental_divisors
                .clone()
                .unwrap_or(fallback.fundamental_divisors),
            min_frequency_hz: d.min_frequency_hz.unwrap_or(fallback.min_frequency_hz),
        }
    }

    pub fn spelling(&self) -> Spelling {
        match self.sequencer.prefer_flat {
            Some(true) => Spelling::Flat,
            _ => Spelling::Sharp,
        }
    }

    pub fn sequencer(&self) -> SequencerConfig {
        let fallback = SequencerConfig::default();
        let s = &self.sequencer;
        SequencerConfig {
            start_max_hz: s.start_max_hz.unwrap_or(fallback.start_max_hz),
            track_max_hz: s.track_max_hz.unwrap_or(fallback.track_max_hz),
            lock_time: s
                .lock_time_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.lock_time),
            rearm_quiet: s
                .rearm_quiet_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.rearm_quiet),
            cooldown: s
                .cooldown_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.cooldown),
            slot_count: s.slot_count.unwrap_or(fallback.slot_count),
            spelling: self.spelling(),
        }
    }

    /// A chord sheet sized for the configured slot count.
    pub fn chord_sheet(&self) -> ChordSheet {
        let mut sheet = ChordSheet::new(self.sequencer().slot_count);
        if let Some(genre) = self.chords.genre {
            sheet.apply_genre(genre);
        }
        sheet.maj_as_text = self.chords.maj_as_text.unwrap_or(false);
        sheet.spelling = self.spelling();
        sheet
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bassline").join("config.toml"))
}

fn merge(base: &mut ConfigFile, user: ConfigFile) {
    merge_detector(&mut base.detector, user.detector);
    merge_sequencer(&mut base.sequencer, user.sequencer);
    merge_chords(&mut base.chords, user.chords);
}

fn merge_detector(base: &mut DetectorSection, user: DetectorSection) {
    if user.analysis_window_size.is_some() {
        base.analysis_window_size = user.analysis_window_size;
    }
    if user.min_volume_rms.is_some() {
        base.min_volume_rms = user.min_volume_rms;
    }
    if user.high_pass_hz.is_some() {
        base.high_pass_hz = user.high_pass_hz;
    }
    if user.low_pass_hz.is_some() {
        base.low_pass_hz = user.low_pass_hz;
    }
    if user.prefer_fundamental.is_some() {
        base.prefer_fundamental = user.prefer_fundamental;
    }
    if user.fundamental_divisors.is_some() {
        base.fundamental_divisors = user.fundamental_divisors;
    }
    if user.min_frequency_hz.is_some() {
        base.min_frequency_hz = user.min_frequency_hz;
    }
}

fn merge_sequencer(base: &mut SequencerSection, user: SequencerSection) {
    if user.start_max_hz.is_some() {
        base.start_max_hz = user.start_max_hz;
    }
    if user.track_max_hz.is_some() {
        base.track_max_hz = user.track_max_hz;
    }
    if user.lock_time_ms.is_some() {
        base.lock_time_ms = user.lock_time_ms;
    }
    if user.rearm_quiet_ms.is_some() {
        base.rearm_quiet_ms = user.rearm_quiet_ms;
    }
    if user.cooldown_ms.is_some() {
        base.cooldown_ms = user.cooldown_ms;
    }
    if user.slot_count.is_some() {
        base.slot_count = user.slot_count;
    }
    if user.prefer_flat.is_some() {
        base.prefer_flat = user.prefer_flat;
    }
}

fn merge_chords(base: &mut ChordsSection, user: ChordsSection) {
    if user.genre.is_some() {
        base.genre = user.genre;
    }
    if user.maj_as_text.is_some() {
        base.maj_as_text = user.maj_as_text;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn embedded_defaults_match_code_defaults() {
        let config = BasslineConfig::builtin().unwrap();
        assert_eq!(config.detector(), DetectorConfig::default());
        assert_eq!(config.sequencer(), SequencerConfig::default());
        assert_eq!(config.chord_sheet().genre(), None);
    }

    #[test]
    fn explicit_file_overrides_only_given_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[sequencer]\nslot_count = 4\nprefer_flat = true\n\n[chords]\ngenre = \"jazz\"\n\n[detector]\nlow_pass_hz = 400.0"
        )
        .unwrap();

        let config = BasslineConfig::load(Some(file.path())).unwrap();
        let sequencer = config.sequencer();
        assert_eq!(sequencer.slot_count, 4);
        assert_eq!(sequencer.spelling, Spelling::Flat);
        assert_eq!(sequencer.lock_time, Duration::from_millis(1200));

        let detector = config.detector();
        assert_eq!(detector.low_pass_hz, 400.0);
        assert_eq!(detector.high_pass_hz, 25.0);

        let sheet = config.chord_sheet();
        assert_eq!(sheet.genre(), Some(Genre::Jazz));
        assert_eq!(sheet.qualities().len(), 4);
        assert_eq!(sheet.spelling, Spelling::Flat);
    }

    #[test]
    fn malformed_explicit_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sequencer]\nslot_count = \"three\"").unwrap();
        assert!(BasslineConfig::load(Some(file.path())).is_err());

        let dir = tempfile::tempdir().unwrap();
        assert!(BasslineConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn unknown_genre_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[chords]\ngenre = \"metal\"").unwrap();
        assert!(BasslineConfig::load(Some(file.path())).is_err());
    }
}
