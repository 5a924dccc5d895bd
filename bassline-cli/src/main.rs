// bassline-cli/src/main.rs

//! Terminal front end for bassline-core.
//! Owns the capture session, prints live readings and emits the chord
//! seed request once every slot is filled.

mod cli;

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use log::{info, warn};

use bassline_core::bass_tuner::{BassString, BassTuner, TuneStatus};
use bassline_core::preview::{self, DEFAULT_PREVIEW_SECONDS};
use bassline_core::sequencer::SequencerEvent;
use bassline_core::tuning::{self, Spelling};
use bassline_core::{
    BasslineConfig, CaptureSession, ChordSheet, DetectorConfig, Pipeline, SessionCommand,
    SessionConfig, SessionEvent,
};

use cli::{Args, ChordArgs, Command};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = BasslineConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Devices => list_devices(),
        Command::Tune {
            device,
            string,
            chromatic,
            seconds,
        } => tune(&config, device, string, chromatic, seconds),
        Command::Capture {
            device,
            slots,
            chords,
        } => capture(&config, device, slots, &chords),
        Command::Replay { wav, slots, chords } => replay(&config, wav, slots, &chords),
        Command::Preview {
            note,
            out,
            seconds,
            sample_rate,
        } => {
            let frequency = tuning::bass_preview_frequency(note);
            let samples = preview::render_preview(
                frequency,
                sample_rate,
                seconds.unwrap_or(DEFAULT_PREVIEW_SECONDS),
            )?;
            let path = out.unwrap_or_else(|| PathBuf::from(format!("{}.wav", note)));
            preview::write_wav(&path, &samples, sample_rate)?;
            println!("{} ({:.2} Hz) -> {}", note, frequency, path.display());
            Ok(())
        }
    }
}

fn list_devices() -> Result<()> {
    let devices = bassline_core::audio::list_input_devices()?;
    if devices.is_empty() {
        println!("No input devices found");
    }
    for name in devices {
        println!("{}", name);
    }
    Ok(())
}

/// Applies the command-line chord options over the configured sheet.
fn chord_sheet(config: &BasslineConfig, slot_count: usize, chords: &ChordArgs) -> ChordSheet {
    let mut sheet = config.chord_sheet();
    sheet.resize(slot_count);
    if let Some(genre) = chords.genre.or(sheet.genre()) {
        sheet.apply_genre(genre);
    }
    if chords.flat {
        sheet.spelling = Spelling::Flat;
    }
    if chords.maj_text {
        sheet.maj_as_text = true;
    }
    sheet
}

/// Per-slot `--quality` edits. Applied after capture, since a commit resets
/// its slot to the genre default.
fn apply_quality_overrides(sheet: &mut ChordSheet, chords: &ChordArgs) -> Result<()> {
    for &(slot, quality) in &chords.qualities {
        sheet
            .set_quality(slot - 1, quality)
            .with_context(|| format!("--quality {}", slot))?;
    }
    Ok(())
}

fn session_config(
    config: &BasslineConfig,
    device: Option<String>,
    slots: Option<usize>,
    spelling: Spelling,
) -> SessionConfig {
    let mut sequencer = config.sequencer();
    if let Some(n) = slots {
        sequencer.slot_count = n;
    }
    sequencer.spelling = spelling;
    SessionConfig {
        device,
        detector: config.detector(),
        sequencer,
    }
}

fn tune(
    config: &BasslineConfig,
    device: Option<String>,
    string: Option<BassString>,
    chromatic: bool,
    seconds: Option<f32>,
) -> Result<()> {
    let deadline = match seconds {
        Some(s) => {
            let limit = Duration::try_from_secs_f32(s)
                .with_context(|| format!("Invalid --seconds value {}", s))?;
            Some(Instant::now() + limit)
        }
        None => None,
    };

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let mut session_config = session_config(config, device, None, config.spelling());
    if chromatic {
        session_config.detector = DetectorConfig::instrument_tuner();
    }
    let spelling = session_config.sequencer.spelling;
    let mut session = CaptureSession::start(session_config, event_tx)?;
    info!("Tuning on {} ({} Hz)", session.device_name(), session.sample_rate());

    let mut tuner = BassTuner::new(string);
    let mut stdout = std::io::stdout();

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match event_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(SessionEvent::Pitch(estimate)) => {
                let line = if chromatic {
                    estimate.and_then(|freq| chromatic_line(freq, spelling))
                } else {
                    bass_string_line(&mut tuner, estimate, spelling)
                };
                print!("\r{:<72}", line.as_deref().unwrap_or("  -- no signal --"));
                stdout.flush()?;
            }
            Ok(SessionEvent::StreamError(message)) => {
                warn!("Stream error: {}", message);
                if !session.is_running() {
                    bail!("Audio stream stopped");
                }
            }
            Ok(SessionEvent::Sequencer(_)) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    println!();
    session.stop();
    Ok(())
}

/// Nearest note of any register and its offset in cents.
fn chromatic_line(freq: f32, spelling: Spelling) -> Option<String> {
    let note = tuning::nearest_note(freq)?;
    let cents = tuning::cents_offset(freq, note.target_frequency);
    Some(format!(
        "{:>7.2} Hz  {:<4} ({:.2} Hz)  {:+6.1} cents",
        freq,
        note.display_name(spelling),
        note.target_frequency,
        cents
    ))
}

fn bass_string_line(
    tuner: &mut BassTuner,
    estimate: Option<f32>,
    spelling: Spelling,
) -> Option<String> {
    let reading = tuner.update(estimate)?;
    let freq = estimate?;
    let note = tuning::nearest_note(freq)
        .map(|n| n.display_name(spelling))
        .unwrap_or_default();
    let status = if reading.locked {
        "locked"
    } else {
        match reading.status {
            TuneStatus::Flat => "flat",
            TuneStatus::Near => "near",
            TuneStatus::Sharp => "sharp",
        }
    };
    Some(format!(
        "{:>7.2} Hz  {:<4} string {} ({:.1} Hz)  {:+6.1} cents  {}",
        freq, note, reading.string, reading.reference_hz, reading.cents, status
    ))
}

fn print_event(event: &SequencerEvent) {
    match event {
        SequencerEvent::TrackingStarted { slot, frequency_hz } => {
            println!("slot {}: tracking ({:.1} Hz)", slot + 1, frequency_hz)
        }
        SequencerEvent::SlotCommitted {
            index,
            note,
            frequency_hz,
            reason,
        } => println!(
            "slot {}: {} ({:.2} Hz, {:?})",
            index + 1,
            note,
            frequency_hz,
            reason
        ),
        SequencerEvent::CaptureAborted { slot } => println!("slot {}: no pitch, try again", slot + 1),
        SequencerEvent::AllSlotsFilled { notes, .. } => println!("done: {}", notes.join(" ")),
        SequencerEvent::Rearmed => info!("ready for the next note"),
        SequencerEvent::Reset => info!("slots cleared"),
    }
}

/// A line typed while capturing.
#[derive(Debug, PartialEq)]
enum Control {
    Reset,
    Slots(usize),
    Device(Option<String>),
}

impl Control {
    fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match word {
            "r" | "reset" => Ok(Control::Reset),
            "n" | "slots" => {
                let n: usize = rest
                    .parse()
                    .with_context(|| format!("Invalid slot count {:?}", rest))?;
                if n == 0 {
                    bail!("Slot count must be at least 1");
                }
                Ok(Control::Slots(n))
            }
            "d" | "device" => Ok(Control::Device((!rest.is_empty()).then(|| rest.to_string()))),
            other => bail!("Unknown command {:?} (r, n <slots>, d [device])", other),
        }
    }
}

/// Forwards stdin lines; the reader thread lives until stdin closes.
fn spawn_stdin_reader() -> crossbeam_channel::Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn capture(
    config: &BasslineConfig,
    device: Option<String>,
    slots: Option<usize>,
    chords: &ChordArgs,
) -> Result<()> {
    let mut slot_count = slots.unwrap_or(config.sequencer().slot_count);
    let mut sheet = chord_sheet(config, slot_count, chords);
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let mut session = CaptureSession::start(
        session_config(config, device, Some(slot_count), sheet.spelling),
        event_tx,
    )?;
    println!(
        "Listening on {}. Play {} root note(s), one at a time.",
        session.device_name(),
        slot_count
    );
    println!("Type r to reset, n <count> to change slots, d [name] to switch input.");
    let lines = spawn_stdin_reader();
    let no_input = crossbeam_channel::never::<String>();
    let mut stdin_closed = false;

    let mut filled = Vec::new();
    loop {
        let input = if stdin_closed { &no_input } else { &lines };
        crossbeam_channel::select! {
            recv(event_rx) -> msg => match msg {
                Ok(SessionEvent::Sequencer(event)) => {
                    print_event(&event);
                    match event {
                        SequencerEvent::SlotCommitted { index, .. } => sheet.on_commit(index),
                        SequencerEvent::AllSlotsFilled { slots, .. } => {
                            filled = slots;
                            break;
                        }
                        _ => {}
                    }
                }
                Ok(SessionEvent::StreamError(message)) => {
                    warn!("Stream error: {}", message);
                    if !session.is_running() {
                        break;
                    }
                }
                Ok(SessionEvent::Pitch(_)) => {}
                Err(_) => break,
            },
            recv(input) -> msg => match msg.as_deref().map(str::trim) {
                Err(_) => stdin_closed = true,
                Ok("") => {}
                Ok(line) => match Control::parse(line) {
                    Ok(Control::Reset) => session.send(SessionCommand::Reset)?,
                    Ok(Control::Slots(n)) => {
                        session.send(SessionCommand::SetSlotCount(n))?;
                        slot_count = n;
                        sheet.resize(n);
                    }
                    Ok(Control::Device(name)) => {
                        session.switch_device(name)?;
                        println!(
                            "Listening on {}. All {} slot(s) cleared.",
                            session.device_name(),
                            slot_count
                        );
                    }
                    Err(e) => warn!("{:#}", e),
                },
            },
        }
    }
    session.stop();

    if filled.is_empty() {
        bail!("Capture ended before every slot was filled");
    }
    apply_quality_overrides(&mut sheet, chords)?;
    print_seed(&sheet, &filled)
}

fn replay(
    config: &BasslineConfig,
    wav: PathBuf,
    slots: Option<usize>,
    chords: &ChordArgs,
) -> Result<()> {
    let (samples, sample_rate) = preview::read_wav_mono(&wav)?;
    let slot_count = slots.unwrap_or(config.sequencer().slot_count);
    let mut sheet = chord_sheet(config, slot_count, chords);
    let session_config = session_config(config, None, Some(slot_count), sheet.spelling);

    let mut pipeline = Pipeline::new(session_config.detector, session_config.sequencer, sample_rate)
        .with_context(|| format!("Cannot analyze {}", wav.display()))?;
    info!(
        "Replaying {} ({:.1} s at {} Hz)",
        wav.display(),
        samples.len() as f32 / sample_rate as f32,
        sample_rate
    );

    for (at, event) in pipeline.run_offline(&samples) {
        print!("[{:>6.3}s] ", at.as_secs_f32());
        print_event(&event);
        if let SequencerEvent::SlotCommitted { index, .. } = event {
            sheet.on_commit(index);
        }
    }

    let filled = pipeline.sequencer().slots().to_vec();
    if filled.iter().all(Option::is_none) {
        println!("No roots captured");
        return Ok(());
    }
    apply_quality_overrides(&mut sheet, chords)?;
    print_seed(&sheet, &filled)
}

fn print_seed(
    sheet: &ChordSheet,
    slots: &[Option<bassline_core::sequencer::CapturedNote>],
) -> Result<()> {
    match sheet.seed_request(slots) {
        Ok(request) => println!("{}", request.to_json()?),
        Err(e) => {
            warn!("{}", e);
            println!("{}", sheet.build_seed(slots).join(" "));
        }
    }
    Ok(())
}
