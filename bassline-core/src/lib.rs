// bassline-core/src/lib.rs

//! The core logic for the bass-note chord seeder.
//! This crate is responsible for audio capture, bass-register pitch
//! detection, and the capture sequencer that turns played roots into
//! chord symbols. It is completely headless and contains no UI code.

pub mod audio;
pub mod bass_tuner;
pub mod chord;
pub mod config;
pub mod fft;
pub mod filter;
pub mod pitch;
pub mod preview;
pub mod sequencer;
pub mod session;
pub mod tuning;
pub mod window;

pub use chord::{ChordSeedRequest, ChordSheet, Genre, Quality};
pub use config::BasslineConfig;
pub use pitch::{DetectorConfig, PitchDetector};
pub use sequencer::{CaptureSequencer, SequencerConfig, SequencerEvent, SequencerState};
pub use session::{CaptureSession, Pipeline, SessionCommand, SessionConfig, SessionEvent};
