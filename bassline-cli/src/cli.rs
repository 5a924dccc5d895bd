//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use bassline_core::bass_tuner::BassString;
use bassline_core::chord::{Genre, Quality};
use bassline_core::tuning::PitchClass;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "bassline")]
#[command(about = "Play bass roots, get chord symbols", long_about = None)]
pub struct Args {
    /// Extra config file layered over the defaults and the user config
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List audio input devices
    Devices,

    /// Live bass tuner readout
    Tune {
        /// Input device name (default input if omitted)
        #[arg(long)]
        device: Option<String>,

        /// Tune a fixed string instead of the closest one: E, A, D or G
        #[arg(long, value_name = "STRING", conflicts_with = "chromatic")]
        string: Option<BassString>,

        /// Show the nearest note of any instrument instead of bass strings
        #[arg(long)]
        chromatic: bool,

        /// Stop after this many seconds
        #[arg(long, value_name = "SECONDS")]
        seconds: Option<f32>,
    },

    /// Capture roots from the instrument until every slot is filled
    Capture {
        #[arg(long)]
        device: Option<String>,

        /// Number of slots to fill
        #[arg(long, value_name = "N")]
        slots: Option<usize>,

        #[command(flatten)]
        chords: ChordArgs,
    },

    /// Run a recording through the capture pipeline
    Replay {
        /// WAV file to analyze
        wav: PathBuf,

        #[arg(long, value_name = "N")]
        slots: Option<usize>,

        #[command(flatten)]
        chords: ChordArgs,
    },

    /// Render a bass preview tone for a note
    Preview {
        /// Note name, e.g. "A", "C#" or "Bb"
        note: PitchClass,

        /// Output file (defaults to <note>.wav)
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,

        #[arg(long, value_name = "SECONDS")]
        seconds: Option<f32>,

        #[arg(long, default_value_t = 48_000)]
        sample_rate: u32,
    },
}

/// Chord sheet options shared by `capture` and `replay`.
#[derive(clap::Args, Debug)]
pub struct ChordArgs {
    /// rock, pop or jazz
    #[arg(long)]
    pub genre: Option<Genre>,

    /// Spell accidentals with flats
    #[arg(long)]
    pub flat: bool,

    /// Write major chords as "Cmaj" instead of "C"
    #[arg(long)]
    pub maj_text: bool,

    /// Override one slot's chord quality, e.g. "2=m" or "4=7" (repeatable)
    #[arg(long = "quality", value_name = "SLOT=QUALITY", value_parser = parse_slot_quality)]
    pub qualities: Vec<(usize, Quality)>,
}

/// Parses "SLOT=QUALITY" with a 1-based slot number.
fn parse_slot_quality(s: &str) -> Result<(usize, Quality), String> {
    let (slot, quality) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SLOT=QUALITY, got {:?}", s))?;
    let slot: usize = slot
        .trim()
        .parse()
        .map_err(|_| format!("invalid slot number {:?}", slot))?;
    if slot == 0 {
        return Err("slots are numbered from 1".to_string());
    }
    let quality = quality.parse::<Quality>().map_err(|e| e.to_string())?;
    Ok((slot, quality))
}
