//! # Capture Session
//!
//! Owns the audio thread. The thread opens the input stream, pushes every
//! incoming frame through the [`Pipeline`] and runs one analysis tick about
//! 60 times per second, reporting results over a channel.
//!
//! ```text
//!   cpal callback ──frames──▶ ┌────────────── audio thread ──────────────┐
//!                             │ push_samples     tick ─▶ detector.estimate│──events──▶ owner
//!   owner ──commands/stop───▶ │                          sequencer.process│
//!                             └───────────────────────────────────────────┘
//! ```

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};

use crate::audio;
use crate::pitch::{DetectorConfig, PitchDetector};
use crate::sequencer::{CaptureSequencer, SequencerConfig, SequencerEvent};

/// Analysis cadence (~60 Hz, one display frame).
pub const TICK_INTERVAL: Duration = Duration::from_micros(16_667);

/// Frames buffered between the audio callback and the analysis thread.
const FRAME_QUEUE: usize = 256;

/// The audio-free analysis core: detector plus sequencer.
pub struct Pipeline {
    detector: PitchDetector,
    sequencer: CaptureSequencer,
    /// Samples consumed by [`Pipeline::run_offline`]; its stream clock.
    offline_samples: u64,
}

impl Pipeline {
    pub fn new(
        detector_config: DetectorConfig,
        sequencer_config: SequencerConfig,
        sample_rate: u32,
    ) -> Result<Self> {
        Ok(Self {
            detector: PitchDetector::new(detector_config, sample_rate)?,
            sequencer: CaptureSequencer::new(sequencer_config)?,
            offline_samples: 0,
        })
    }

    pub fn detector(&self) -> &PitchDetector {
        &self.detector
    }

    pub fn sequencer(&self) -> &CaptureSequencer {
        &self.sequencer
    }

    pub fn sequencer_mut(&mut self) -> &mut CaptureSequencer {
        &mut self.sequencer
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        self.detector.push_samples(samples);
    }

    /// One analysis tick: estimate, then advance the sequencer.
    pub fn tick(&mut self, now: Duration) -> (Option<f32>, Vec<SequencerEvent>) {
        let estimate = self.detector.estimate();
        let events = self.sequencer.process(estimate, now);
        (estimate, events)
    }

    /// Runs a recorded signal through the pipeline at the live tick cadence.
    ///
    /// Returns every sequencer event with the stream time it occurred at.
    /// Successive calls continue the same clock.
    pub fn run_offline(&mut self, samples: &[f32]) -> Vec<(Duration, SequencerEvent)> {
        let sample_rate = self.detector.sample_rate() as f64;
        let hop = ((sample_rate * TICK_INTERVAL.as_secs_f64()).round() as usize).max(1);
        let mut out = Vec::new();

        for chunk in samples.chunks(hop) {
            self.detector.push_samples(chunk);
            self.offline_samples += chunk.len() as u64;
            let now = Duration::from_secs_f64(self.offline_samples as f64 / sample_rate);
            let (_, events) = self.tick(now);
            out.extend(events.into_iter().map(|e| (now, e)));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Clear every slot and start over.
    Reset,
    SetSlotCount(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The estimate of one tick; `None` is silence.
    Pitch(Option<f32>),
    Sequencer(SequencerEvent),
    /// The backend reported a stream error. Capture may have stopped.
    StreamError(String),
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Input device name; `None` uses the default input.
    pub device: Option<String>,
    pub detector: DetectorConfig,
    pub sequencer: SequencerConfig,
}

/// Handle to a running audio thread.
///
/// Dropping the session stops the thread and closes the stream.
#[derive(Debug)]
pub struct CaptureSession {
    config: SessionConfig,
    events: Sender<SessionEvent>,
    command_tx: Sender<SessionCommand>,
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
    sample_rate: u32,
    device_name: String,
}

impl CaptureSession {
    /// Opens the input device and starts analysis.
    ///
    /// Blocks until the stream is running, so device and configuration
    /// errors are returned here rather than reported later.
    pub fn start(config: SessionConfig, events: Sender<SessionEvent>) -> Result<Self> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let (init_tx, init_rx) = crossbeam_channel::bounded::<Result<(u32, String)>>(1);

        let thread_config = config.clone();
        let thread_events = events.clone();
        let thread_handle = thread::Builder::new()
            .name("bassline-audio".into())
            .spawn(move || {
                run_audio_thread(thread_config, thread_events, command_rx, shutdown_rx, init_tx)
            })
            .context("Failed to spawn audio thread")?;

        let init = init_rx
            .recv()
            .map_err(|_| anyhow!("Audio thread exited during startup"))
            .and_then(|r| r);
        let (sample_rate, device_name) = match init {
            Ok(ok) => ok,
            Err(e) => {
                let _ = thread_handle.join();
                return Err(e);
            }
        };

        Ok(Self {
            config,
            events,
            command_tx,
            shutdown_tx,
            thread_handle: Some(thread_handle),
            sample_rate,
            device_name,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn send(&self, command: SessionCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| anyhow!("Audio thread is not running"))
    }

    /// Signals the thread and waits for it; the stream is closed on return.
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(target: "session", "Shutting down audio thread...");
            let _ = self.shutdown_tx.try_send(());
            if handle.join().is_err() {
                error!(target: "session", "Audio thread panicked");
            }
            info!(target: "session", "Audio thread stopped");
        }
    }

    /// Tears down the current stream and opens a new one on `device`.
    ///
    /// Filters and buffers are rebuilt for the new sample rate and all
    /// slots start empty.
    pub fn switch_device(&mut self, device: Option<String>) -> Result<()> {
        self.stop();
        let mut config = self.config.clone();
        config.device = device;
        *self = Self::start(config, self.events.clone())?;
        Ok(())
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_audio_thread(
    config: SessionConfig,
    events: Sender<SessionEvent>,
    command_rx: Receiver<SessionCommand>,
    shutdown_rx: Receiver<()>,
    init_tx: Sender<Result<(u32, String)>>,
) {
    debug!(target: "session", "Starting audio thread...");
    let (frame_tx, frame_rx) = crossbeam_channel::bounded::<Vec<f32>>(FRAME_QUEUE);
    let (error_tx, error_rx) = crossbeam_channel::bounded::<String>(16);

    let input = match audio::start_audio_capture(config.device.as_deref(), frame_tx, error_tx) {
        Ok(input) => input,
        Err(e) => {
            error!(target: "session", "Fatal error starting audio: {:#}", e);
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    let pipeline = match Pipeline::new(config.detector, config.sequencer, input.sample_rate) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(target: "session", "Invalid analysis configuration: {:#}", e);
            input.pause();
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    let _ = init_tx.send(Ok((input.sample_rate, input.device_name.clone())));
    info!(
        target: "session",
        "Capturing from {} at {} Hz",
        input.device_name,
        input.sample_rate
    );

    let inputs = LoopInputs {
        frames: frame_rx,
        errors: error_rx,
        commands: command_rx,
        shutdown: shutdown_rx,
    };
    run_analysis_loop(pipeline, inputs, &events);

    debug!(target: "session", "Stopping stream and exiting...");
    input.pause();
    drop(input);
}

/// Everything the analysis loop listens to besides its own ticker.
struct LoopInputs {
    frames: Receiver<Vec<f32>>,
    errors: Receiver<String>,
    commands: Receiver<SessionCommand>,
    shutdown: Receiver<()>,
}

/// Sends sequencer events in order. `false` once the receiver is gone.
fn forward(events: &Sender<SessionEvent>, seq_events: Vec<SequencerEvent>) -> bool {
    seq_events
        .into_iter()
        .all(|e| events.send(SessionEvent::Sequencer(e)).is_ok())
}

/// Drives one pipeline until shutdown, a closed input, or a dropped event
/// receiver. Owns the session's only ticker; the pipeline is handed back
/// on exit.
fn run_analysis_loop(
    mut pipeline: Pipeline,
    inputs: LoopInputs,
    events: &Sender<SessionEvent>,
) -> Pipeline {
    let ticker = crossbeam_channel::tick(TICK_INTERVAL);
    let started = Instant::now();

    loop {
        crossbeam_channel::select! {
            recv(inputs.frames) -> msg => match msg {
                Ok(frame) => pipeline.push_samples(&frame),
                Err(_) => {
                    warn!(target: "session", "Audio channel closed");
                    break;
                }
            },
            recv(ticker) -> _ => {
                let (estimate, seq_events) = pipeline.tick(started.elapsed());
                if events.send(SessionEvent::Pitch(estimate)).is_err()
                    || !forward(events, seq_events)
                {
                    debug!(target: "session", "Event receiver dropped");
                    break;
                }
            },
            recv(inputs.commands) -> msg => {
                let seq_events = match msg {
                    Ok(SessionCommand::Reset) => pipeline.sequencer_mut().reset(),
                    Ok(SessionCommand::SetSlotCount(n)) => {
                        match pipeline.sequencer_mut().set_slot_count(n) {
                            Ok(seq_events) => seq_events,
                            Err(e) => {
                                warn!(target: "session", "Rejected slot count {}: {}", n, e);
                                Vec::new()
                            }
                        }
                    }
                    Err(_) => {
                        debug!(target: "session", "Command channel closed");
                        break;
                    }
                };
                if !forward(events, seq_events) {
                    debug!(target: "session", "Event receiver dropped");
                    break;
                }
            },
            recv(inputs.errors) -> msg => match msg {
                Ok(message) => {
                    if events.send(SessionEvent::StreamError(message)).is_err() {
                        debug!(target: "session", "Event receiver dropped");
                        break;
                    }
                }
                Err(_) => {
                    warn!(target: "session", "Stream error channel closed");
                    break;
                }
            },
            recv(inputs.shutdown) -> _ => {
                debug!(target: "session", "Received shutdown signal");
                break;
            },
        }
    }
    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::SequencerState;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: u32, seconds: f32, amp: f32) -> Vec<f32> {
        let len = (seconds * sample_rate as f32) as usize;
        (0..len)
            .map(|i| amp * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn tick_reports_silence_until_window_fills() {
        let mut pipeline =
            Pipeline::new(DetectorConfig::default(), SequencerConfig::default(), 48_000).unwrap();
        pipeline.push_samples(&sine(55.0, 48_000, 0.1, 0.5));
        let (estimate, events) = pipeline.tick(Duration::from_millis(100));
        assert_eq!(estimate, None);
        assert!(events.is_empty());
    }

    #[test]
    fn offline_run_commits_a_held_note() {
        let mut pipeline =
            Pipeline::new(DetectorConfig::default(), SequencerConfig::default(), 48_000).unwrap();
        let mut signal = sine(55.0, 48_000, 2.0, 0.5);
        signal.extend(std::iter::repeat(0.0).take(24_000));
        let events = pipeline.run_offline(&signal);

        let committed: Vec<_> = events
            .iter()
            .filter_map(|(_, e)| match e {
                SequencerEvent::SlotCommitted { note, .. } => Some(note.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(committed, vec!["A"]);
        assert_eq!(pipeline.sequencer().state(), SequencerState::Idle);
    }

    #[test]
    fn invalid_configuration_fails_fast() {
        let detector = DetectorConfig {
            high_pass_hz: 400.0,
            ..DetectorConfig::default()
        };
        assert!(Pipeline::new(detector, SequencerConfig::default(), 48_000).is_err());

        let sequencer = SequencerConfig {
            slot_count: 0,
            ..SequencerConfig::default()
        };
        assert!(Pipeline::new(DetectorConfig::default(), sequencer, 48_000).is_err());
    }

    /// The analysis loop on its own thread, fed through plain channels.
    struct LoopHarness {
        frames: Sender<Vec<f32>>,
        errors: Sender<String>,
        commands: Sender<SessionCommand>,
        shutdown: Sender<()>,
        events: Receiver<SessionEvent>,
        handle: JoinHandle<Pipeline>,
    }

    fn spawn_loop() -> LoopHarness {
        let pipeline =
            Pipeline::new(DetectorConfig::default(), SequencerConfig::default(), 48_000).unwrap();
        let (frames, frame_rx) = crossbeam_channel::unbounded();
        let (errors, error_rx) = crossbeam_channel::unbounded();
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded(1);
        let (event_tx, events) = crossbeam_channel::unbounded();
        let inputs = LoopInputs {
            frames: frame_rx,
            errors: error_rx,
            commands: command_rx,
            shutdown: shutdown_rx,
        };
        let handle = thread::spawn(move || run_analysis_loop(pipeline, inputs, &event_tx));
        LoopHarness {
            frames,
            errors,
            commands,
            shutdown,
            events,
            handle,
        }
    }

    /// Sequencer events received before `pred` matches, plus the match.
    fn wait_for(
        events: &Receiver<SessionEvent>,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> Vec<SessionEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let event = events
                .recv_timeout(left)
                .unwrap_or_else(|_| panic!("timed out, saw {:?}", seen));
            let done = pred(&event);
            if !matches!(event, SessionEvent::Pitch(_)) {
                seen.push(event);
            }
            if done {
                return seen;
            }
        }
    }

    #[test]
    fn loop_commits_streamed_note_and_applies_commands() {
        let harness = spawn_loop();
        for frame in sine(55.0, 48_000, 1.0, 0.5).chunks(audio::FRAME_SIZE) {
            harness.frames.send(frame.to_vec()).unwrap();
        }

        let seen = wait_for(&harness.events, |e| {
            matches!(e, SessionEvent::Sequencer(SequencerEvent::SlotCommitted { .. }))
        });
        match seen.last() {
            Some(SessionEvent::Sequencer(SequencerEvent::SlotCommitted { note, index, .. })) => {
                assert_eq!(note, "A");
                assert_eq!(*index, 0);
            }
            other => panic!("unexpected {:?}", other),
        }

        // Zero slots is refused without touching the row.
        harness.commands.send(SessionCommand::SetSlotCount(0)).unwrap();
        harness.commands.send(SessionCommand::Reset).unwrap();
        harness.commands.send(SessionCommand::SetSlotCount(2)).unwrap();

        let is_reset = |e: &SessionEvent| matches!(e, SessionEvent::Sequencer(SequencerEvent::Reset));
        wait_for(&harness.events, is_reset);
        wait_for(&harness.events, is_reset);

        harness.shutdown.send(()).unwrap();
        let pipeline = harness.handle.join().unwrap();
        assert_eq!(pipeline.sequencer().config().slot_count, 2);
        assert_eq!(pipeline.sequencer().slots().len(), 2);

        // The frame source is released once the loop returns.
        assert!(harness.frames.send(vec![0.0; audio::FRAME_SIZE]).is_err());
    }

    #[test]
    fn stream_errors_reach_the_owner() {
        let harness = spawn_loop();
        harness.errors.send("device unplugged".to_string()).unwrap();
        let seen = wait_for(&harness.events, |e| matches!(e, SessionEvent::StreamError(_)));
        assert_eq!(
            seen.last(),
            Some(&SessionEvent::StreamError("device unplugged".to_string()))
        );
        harness.shutdown.send(()).unwrap();
        harness.handle.join().unwrap();
    }

    #[test]
    fn loop_exits_when_the_owner_goes_away() {
        let harness = spawn_loop();
        drop(harness.events);
        harness.errors.send("late error".to_string()).unwrap();
        let pipeline = harness.handle.join().unwrap();
        assert_eq!(pipeline.sequencer().state(), SequencerState::Idle);
    }

    #[test]
    fn closed_frame_source_ends_the_loop() {
        let harness = spawn_loop();
        drop(harness.frames);
        harness.handle.join().unwrap();
        assert!(harness.commands.send(SessionCommand::Reset).is_err());
    }
}
