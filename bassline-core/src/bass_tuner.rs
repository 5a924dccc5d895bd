//! # Bass String Tuner
//!
//! Needle readout for a four-string bass: which string is being tuned, how
//! far off it is, and whether the reading has settled.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};

use crate::tuning::{self, PitchClass};

/// Number of recent readings used for the lock check.
const LOCK_HISTORY: usize = 12;
const LOCK_MAX_CENTS: f32 = 5.0;
const LOCK_MAX_STDEV: f32 = 4.0;
/// Readings beyond this many cents are shown as flat / sharp.
const NEAR_CENTS: f32 = 6.0;
const CENTS_CLAMP: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BassString {
    E,
    A,
    D,
    G,
}

impl BassString {
    pub const ALL: [BassString; 4] = [BassString::E, BassString::A, BassString::D, BassString::G];

    /// Open-string frequency in standard tuning.
    pub fn reference_hz(self) -> f32 {
        match self {
            BassString::E => tuning::frequency_of(PitchClass::E, 1),
            BassString::A => tuning::frequency_of(PitchClass::A, 1),
            BassString::D => tuning::frequency_of(PitchClass::D, 2),
            BassString::G => tuning::frequency_of(PitchClass::G, 2),
        }
    }
}

impl fmt::Display for BassString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BassString::E => "E",
            BassString::A => "A",
            BassString::D => "D",
            BassString::G => "G",
        };
        f.write_str(name)
    }
}

impl FromStr for BassString {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "E" => Ok(BassString::E),
            "A" => Ok(BassString::A),
            "D" => Ok(BassString::D),
            "G" => Ok(BassString::G),
            other => Err(anyhow!("Unknown bass string: {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneStatus {
    Flat,
    Near,
    Sharp,
}

/// One frame of tuner output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TunerReading {
    pub string: BassString,
    /// The string's reference moved to the octave of the played note.
    pub reference_hz: f32,
    /// Deviation clamped to ±100 cents.
    pub cents: f32,
    pub status: TuneStatus,
    pub locked: bool,
}

/// `base · 2^k` closest to `freq` (in octaves).
pub fn nearest_octave_hz(freq: f32, base: f32) -> f32 {
    if freq <= 0.0 {
        return base;
    }
    let k = (freq / base).log2().round();
    base * 2.0_f32.powf(k)
}

fn stdev(values: &VecDeque<f32>) -> f32 {
    if values.is_empty() {
        return f32::INFINITY;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n).sqrt()
}

#[derive(Debug, Clone)]
pub struct BassTuner {
    /// `None` picks the closest string automatically.
    manual_string: Option<BassString>,
    history: VecDeque<f32>,
}

impl Default for BassTuner {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BassTuner {
    pub fn new(manual_string: Option<BassString>) -> Self {
        Self {
            manual_string,
            history: VecDeque::with_capacity(LOCK_HISTORY),
        }
    }

    pub fn set_manual_string(&mut self, string: Option<BassString>) {
        self.manual_string = string;
        self.history.clear();
    }

    /// Forgets recent readings ("measure again").
    pub fn reset(&mut self) {
        self.history.clear();
    }

    fn pick_string(&self, freq: f32) -> BassString {
        if let Some(string) = self.manual_string {
            return string;
        }
        BassString::ALL
            .into_iter()
            .min_by(|a, b| {
                let da = (freq - nearest_octave_hz(freq, a.reference_hz())).abs();
                let db = (freq - nearest_octave_hz(freq, b.reference_hz())).abs();
                da.total_cmp(&db)
            })
            .unwrap_or(BassString::E)
    }

    /// Feeds one estimate. Silence clears the lock history.
    pub fn update(&mut self, estimate: Option<f32>) -> Option<TunerReading> {
        let Some(freq) = estimate.filter(|f| f.is_finite() && *f > 0.0) else {
            self.history.clear();
            return None;
        };

        let string = self.pick_string(freq);
        let reference_hz = nearest_octave_hz(freq, string.reference_hz());
        let cents = tuning::cents_offset(freq, reference_hz).clamp(-CENTS_CLAMP, CENTS_CLAMP);

        if self.history.len() == LOCK_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(cents);

        let status = if cents < -NEAR_CENTS {
            TuneStatus::Flat
        } else if cents > NEAR_CENTS {
            TuneStatus::Sharp
        } else {
            TuneStatus::Near
        };
        let locked = cents.abs() < LOCK_MAX_CENTS && stdev(&self.history) < LOCK_MAX_STDEV;

        Some(TunerReading {
            string,
            reference_hz,
            cents,
            status,
            locked,
        })
    }
}
