//! # Capture Sequencer
//!
//! Turns the per-tick stream of pitch estimates into debounced "note
//! committed" events that fill a fixed row of root-note slots.
//!
//! ```text
//!            armed, cooled down, f < start_max
//!   Idle ───────────────────────────────────────▶ Tracking
//!    ▲                                               │ elapsed >= lock_time
//!    │            slots left                         │ or f > start_max
//!    └──────────────────────── finalize ◀────────────┘
//!                                  │ last slot filled
//!                                  ▼
//!                                 Done ── reset ──▶ Idle
//! ```
//!
//! All timing is driven by the `now` passed to [`CaptureSequencer::process`];
//! the sequencer owns no timers.

use std::time::Duration;

use anyhow::{Result, ensure};

use crate::tuning::{self, PitchClass, Spelling};

/// Configuration for a [`CaptureSequencer`].
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerConfig {
    /// Only estimates below this can start a capture; above it ends one.
    pub start_max_hz: f32,
    /// Only estimates below this feed the running minimum.
    pub track_max_hz: f32,
    /// Hard cap on how long one note is tracked.
    pub lock_time: Duration,
    /// Continuous silence required before the next capture may start.
    pub rearm_quiet: Duration,
    /// Dead time after each finalize.
    pub cooldown: Duration,
    pub slot_count: usize,
    pub spelling: Spelling,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            start_max_hz: 150.0,
            track_max_hz: 120.0,
            lock_time: Duration::from_millis(1200),
            rearm_quiet: Duration::from_millis(350),
            cooldown: Duration::from_millis(220),
            slot_count: 3,
            spelling: Spelling::Sharp,
        }
    }
}

impl SequencerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.slot_count > 0, "slot_count must be at least 1");
        ensure!(
            self.start_max_hz > 0.0 && self.track_max_hz > 0.0,
            "start_max_hz and track_max_hz must be positive"
        );
        ensure!(!self.lock_time.is_zero(), "lock_time must be non-zero");
        Ok(())
    }
}

/// Externally visible state of the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Tracking,
    Done,
}

/// Why a tracked note was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// The note was held for the full lock time.
    LockTime,
    /// The estimate rose above the start ceiling.
    LeftBassRange,
}

/// A root note written into a slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturedNote {
    pub pitch_class: PitchClass,
    /// Lowest frequency observed while tracking.
    pub frequency_hz: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SequencerEvent {
    TrackingStarted {
        slot: usize,
        frequency_hz: f32,
    },
    SlotCommitted {
        index: usize,
        note: String,
        frequency_hz: f32,
        reason: FinalizeReason,
    },
    /// Tracking ended without a usable reading; nothing was written.
    CaptureAborted {
        slot: usize,
    },
    AllSlotsFilled {
        notes: Vec<String>,
        slots: Vec<Option<CapturedNote>>,
    },
    Rearmed,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Tracking {
        started_at: Duration,
        min_hz: Option<f32>,
    },
    Done,
}

#[derive(Debug, Clone)]
pub struct CaptureSequencer {
    config: SequencerConfig,
    phase: Phase,
    slots: Vec<Option<CapturedNote>>,
    next_slot: usize,
    armed: bool,
    cooldown_until: Duration,
    /// Last tick that carried a pitch, or the last finalize.
    last_activity_at: Duration,
}

impl CaptureSequencer {
    pub fn new(config: SequencerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            slots: vec![None; config.slot_count],
            config,
            phase: Phase::Idle,
            next_slot: 0,
            armed: true,
            cooldown_until: Duration::ZERO,
            last_activity_at: Duration::ZERO,
        })
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    pub fn state(&self) -> SequencerState {
        match self.phase {
            Phase::Idle => SequencerState::Idle,
            Phase::Tracking { .. } => SequencerState::Tracking,
            Phase::Done => SequencerState::Done,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Running minimum of the note being tracked.
    pub fn min_observed_hz(&self) -> Option<f32> {
        match self.phase {
            Phase::Tracking { min_hz, .. } => min_hz,
            _ => None,
        }
    }

    /// Slot that the next commit will fill, `None` once done.
    pub fn current_slot(&self) -> Option<usize> {
        (self.next_slot < self.slots.len()).then_some(self.next_slot)
    }

    pub fn slots(&self) -> &[Option<CapturedNote>] {
        &self.slots
    }

    /// Slot contents rendered with the configured spelling.
    pub fn slot_names(&self) -> Vec<Option<String>> {
        self.slots
            .iter()
            .map(|slot| slot.map(|n| n.pitch_class.name(self.config.spelling).to_string()))
            .collect()
    }

    /// Names of the filled slots, in slot order.
    pub fn committed_names(&self) -> Vec<String> {
        self.slot_names().into_iter().flatten().collect()
    }

    pub fn set_spelling(&mut self, spelling: Spelling) {
        self.config.spelling = spelling;
    }

    /// Changes the number of slots. Always starts a fresh session.
    pub fn set_slot_count(&mut self, slot_count: usize) -> Result<Vec<SequencerEvent>> {
        ensure!(slot_count > 0, "slot_count must be at least 1");
        self.config.slot_count = slot_count;
        Ok(self.reset())
    }

    /// Empties every slot and returns to Idle, clearing all timers and flags.
    pub fn reset(&mut self) -> Vec<SequencerEvent> {
        self.slots = vec![None; self.config.slot_count];
        self.phase = Phase::Idle;
        self.next_slot = 0;
        self.armed = true;
        self.cooldown_until = Duration::ZERO;
        self.last_activity_at = Duration::ZERO;
        log::debug!(target: "sequencer", "Reset: {} empty slots", self.config.slot_count);
        vec![SequencerEvent::Reset]
    }

    /// Advances the state machine by one tick.
    ///
    /// # Arguments
    /// * `estimate` - The tick's pitch estimate; `None` (or a non-finite /
    ///   non-positive value) is silence
    /// * `now` - Monotonic time of this tick
    ///
    /// # Returns
    /// * The events produced by this tick, in order
    pub fn process(&mut self, estimate: Option<f32>, now: Duration) -> Vec<SequencerEvent> {
        let estimate = estimate.filter(|f| f.is_finite() && *f > 0.0);
        let mut events = Vec::new();

        match estimate {
            Some(_) => self.last_activity_at = now,
            None => self.observe_quiet(now, &mut events),
        }

        match self.phase {
            Phase::Done => {}
            Phase::Idle => {
                if let Some(freq) = estimate {
                    self.try_start(freq, now, &mut events);
                }
            }
            Phase::Tracking { started_at, min_hz } => {
                // Attack transients run sharp of the settled fundamental.
                if let Some(freq) = estimate.filter(|&f| f < self.config.track_max_hz) {
                    self.phase = Phase::Tracking {
                        started_at,
                        min_hz: Some(min_hz.map_or(freq, |m| m.min(freq))),
                    };
                }

                // The time cap is checked first; both paths finalize the same way.
                let elapsed = now.saturating_sub(started_at);
                let reason = if elapsed >= self.config.lock_time {
                    Some(FinalizeReason::LockTime)
                } else if estimate.is_some_and(|f| f > self.config.start_max_hz) {
                    Some(FinalizeReason::LeftBassRange)
                } else {
                    None
                };

                if let Some(reason) = reason {
                    self.finalize(now, reason, &mut events);
                }
            }
        }

        events
    }

    fn observe_quiet(&mut self, now: Duration, events: &mut Vec<SequencerEvent>) {
        if self.armed || self.phase != Phase::Idle {
            return;
        }
        if now.saturating_sub(self.last_activity_at) >= self.config.rearm_quiet {
            self.armed = true;
            log::debug!(target: "sequencer", "Re-armed after {:?} of quiet", self.config.rearm_quiet);
            events.push(SequencerEvent::Rearmed);
        }
    }

    fn try_start(&mut self, freq: f32, now: Duration, events: &mut Vec<SequencerEvent>) {
        if !self.armed || now < self.cooldown_until || freq >= self.config.start_max_hz {
            return;
        }
        self.phase = Phase::Tracking {
            started_at: now,
            min_hz: Some(freq),
        };
        self.armed = false;
        log::debug!(
            target: "sequencer",
            "Tracking slot {} from {:.2} Hz",
            self.next_slot,
            freq
        );
        events.push(SequencerEvent::TrackingStarted {
            slot: self.next_slot,
            frequency_hz: freq,
        });
    }

    /// Leaves Tracking exactly once: the tracking state is taken out of
    /// `phase` before anything is written, so a second call is a no-op.
    fn finalize(&mut self, now: Duration, reason: FinalizeReason, events: &mut Vec<SequencerEvent>) {
        let Phase::Tracking { min_hz, .. } = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };

        self.cooldown_until = now + self.config.cooldown;
        self.last_activity_at = now;
        self.armed = false;

        let slot = self.next_slot;
        let Some((min_hz, note)) = min_hz.and_then(|f| tuning::nearest_note(f).map(|n| (f, n)))
        else {
            log::debug!(target: "sequencer", "Capture for slot {} aborted: no reading", slot);
            events.push(SequencerEvent::CaptureAborted { slot });
            return;
        };

        let name = note.pitch_class.name(self.config.spelling).to_string();
        self.slots[slot] = Some(CapturedNote {
            pitch_class: note.pitch_class,
            frequency_hz: min_hz,
        });
        self.next_slot += 1;
        log::info!(
            target: "sequencer",
            "Slot {} <- {} ({:.2} Hz, {:?})",
            slot,
            name,
            min_hz,
            reason
        );
        events.push(SequencerEvent::SlotCommitted {
            index: slot,
            note: name,
            frequency_hz: min_hz,
            reason,
        });

        if self.next_slot >= self.slots.len() {
            self.phase = Phase::Done;
            let notes = self.committed_names();
            log::info!(target: "sequencer", "All slots filled: {}", notes.join(" "));
            events.push(SequencerEvent::AllSlotsFilled {
                notes,
                slots: self.slots.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(16);

    /// Drives a sequencer with a scripted estimate stream at 16 ms ticks.
    struct Script {
        sequencer: CaptureSequencer,
        now: Duration,
        events: Vec<(Duration, SequencerEvent)>,
    }

    impl Script {
        fn new(config: SequencerConfig) -> Self {
            Self {
                sequencer: CaptureSequencer::new(config).unwrap(),
                now: Duration::ZERO,
                events: Vec::new(),
            }
        }

        fn feed(&mut self, estimate: Option<f32>, duration: Duration) -> &mut Self {
            let end = self.now + duration;
            while self.now < end {
                for event in self.sequencer.process(estimate, self.now) {
                    self.events.push((self.now, event));
                }
                self.now += TICK;
            }
            self
        }

        fn glide(&mut self, from: f32, to: f32, duration: Duration) -> &mut Self {
            let start = self.now;
            let end = self.now + duration;
            while self.now < end {
                let t = (self.now - start).as_secs_f32() / duration.as_secs_f32();
                let f = from + (to - from) * t;
                for event in self.sequencer.process(Some(f), self.now) {
                    self.events.push((self.now, event));
                }
                self.now += TICK;
            }
            self
        }

        fn commits(&self) -> Vec<(usize, String)> {
            self.events
                .iter()
                .filter_map(|(_, e)| match e {
                    SequencerEvent::SlotCommitted { index, note, .. } => {
                        Some((*index, note.clone()))
                    }
                    _ => None,
                })
                .collect()
        }

        fn first_time_of(&self, pred: impl Fn(&SequencerEvent) -> bool) -> Option<Duration> {
            self.events.iter().find(|(_, e)| pred(e)).map(|(t, _)| *t)
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn held_note_commits_at_lock_time() {
        let mut s = Script::new(SequencerConfig::default());
        s.feed(None, ms(400));
        let onset = s.now;
        s.feed(Some(55.0), ms(1500));

        let started = s
            .first_time_of(|e| matches!(e, SequencerEvent::TrackingStarted { .. }))
            .unwrap();
        assert_eq!(started, onset);

        let committed = s
            .first_time_of(|e| matches!(e, SequencerEvent::SlotCommitted { .. }))
            .unwrap();
        assert!(committed - started >= ms(1200));
        assert!(committed - started < ms(1200) + TICK);

        assert_eq!(s.commits(), vec![(0, "A".to_string())]);
        assert_eq!(s.sequencer.state(), SequencerState::Idle);
        assert_eq!(s.sequencer.current_slot(), Some(1));
        assert!(matches!(
            s.events.iter().find(|(_, e)| matches!(e, SequencerEvent::SlotCommitted { .. })),
            Some((_, SequencerEvent::SlotCommitted { reason: FinalizeReason::LockTime, .. }))
        ));
    }

    #[test]
    fn minimum_reading_wins_over_attack() {
        let mut s = Script::new(SequencerConfig::default());
        s.glide(60.0, 55.0, ms(300)).feed(Some(55.0), ms(1200));

        // 60 Hz alone would snap to B.
        assert_eq!(tuning::nearest_note(60.0).unwrap().pitch_class, PitchClass::B);
        assert_eq!(s.commits(), vec![(0, "A".to_string())]);
        let slot = s.sequencer.slots()[0].unwrap();
        assert!((slot.frequency_hz - 55.0).abs() < 0.1);
    }

    #[test]
    fn readings_above_track_ceiling_are_ignored() {
        let mut s = Script::new(SequencerConfig::default());
        // Starts at 140 Hz (allowed to start), then 130 Hz readings are ignored.
        s.feed(Some(140.0), TICK).feed(Some(130.0), ms(100));
        assert_eq!(s.sequencer.min_observed_hz(), Some(140.0));
        s.feed(Some(100.0), TICK);
        assert_eq!(s.sequencer.min_observed_hz(), Some(100.0));
    }

    #[test]
    fn leaving_the_bass_range_finalizes_early() {
        let mut s = Script::new(SequencerConfig::default());
        s.feed(Some(73.4), ms(200)).feed(Some(220.0), TICK);
        assert_eq!(s.commits(), vec![(0, "D".to_string())]);
        assert!(s.events.iter().any(|(_, e)| matches!(
            e,
            SequencerEvent::SlotCommitted { reason: FinalizeReason::LeftBassRange, .. }
        )));
    }

    #[test]
    fn high_notes_never_start_tracking() {
        let mut s = Script::new(SequencerConfig::default());
        s.feed(Some(196.0), ms(2000));
        assert_eq!(s.sequencer.state(), SequencerState::Idle);
        assert!(s.events.is_empty());
    }

    #[test]
    fn lock_time_also_holds_through_silence() {
        let mut s = Script::new(SequencerConfig::default());
        s.feed(Some(55.0), ms(100)).feed(None, ms(1200));
        assert_eq!(s.commits(), vec![(0, "A".to_string())]);
    }

    #[test]
    fn time_cap_wins_when_both_conditions_hit() {
        let mut s = Script::new(SequencerConfig::default());
        s.feed(Some(55.0), ms(1200));
        assert_eq!(s.sequencer.state(), SequencerState::Tracking);
        s.feed(Some(300.0), TICK);
        assert!(s.events.iter().any(|(_, e)| matches!(
            e,
            SequencerEvent::SlotCommitted { reason: FinalizeReason::LockTime, .. }
        )));
    }

    #[test]
    fn no_retrigger_without_continuous_quiet() {
        let mut s = Script::new(SequencerConfig::default());
        s.feed(Some(55.0), ms(1300));
        assert_eq!(s.commits().len(), 1);
        assert!(!s.sequencer.is_armed());

        // Still sounding, then a short gap, then another qualifying note.
        s.feed(Some(55.0), ms(500))
            .feed(None, ms(200))
            .feed(Some(49.0), ms(300));
        assert_eq!(s.sequencer.state(), SequencerState::Idle);
        assert!(!s.sequencer.is_armed());
        assert_eq!(s.commits().len(), 1);

        // A full quiet window re-arms.
        s.feed(None, ms(400));
        assert!(s.sequencer.is_armed());
        s.feed(Some(49.0), ms(1300));
        assert_eq!(
            s.commits(),
            vec![(0, "A".to_string()), (1, "G".to_string())]
        );
    }

    #[test]
    fn cooldown_blocks_immediate_restart() {
        let config = SequencerConfig {
            rearm_quiet: ms(50),
            ..SequencerConfig::default()
        };
        let mut s = Script::new(config);
        s.feed(Some(55.0), ms(1210));
        let committed = s
            .first_time_of(|e| matches!(e, SequencerEvent::SlotCommitted { .. }))
            .unwrap();

        // Quiet long enough to re-arm, but still inside the 220 ms cooldown.
        s.feed(None, ms(80)).feed(Some(55.0), TICK);
        assert!(s.now - committed < ms(220));
        assert_eq!(s.sequencer.state(), SequencerState::Idle);

        s.feed(None, ms(80)).feed(Some(55.0), ms(100));
        assert_eq!(s.sequencer.state(), SequencerState::Tracking);
    }

    #[test]
    fn filling_all_slots_reaches_done_and_reset_clears() {
        let mut s = Script::new(SequencerConfig::default());
        for f in [55.0, 73.4, 98.0] {
            s.feed(Some(f), ms(1300)).feed(None, ms(400));
        }
        assert_eq!(s.sequencer.state(), SequencerState::Done);
        assert_eq!(s.sequencer.committed_names(), vec!["A", "D", "G"]);
        assert_eq!(s.sequencer.current_slot(), None);
        assert!(s.events.iter().any(|(_, e)| matches!(
            e,
            SequencerEvent::AllSlotsFilled { notes, .. } if notes == &["A", "D", "G"]
        )));

        // Done ignores further input.
        s.feed(Some(41.2), ms(1300));
        assert_eq!(s.commits().len(), 3);

        assert_eq!(s.sequencer.reset(), vec![SequencerEvent::Reset]);
        assert_eq!(s.sequencer.state(), SequencerState::Idle);
        assert!(s.sequencer.slots().iter().all(Option::is_none));
        assert!(s.sequencer.is_armed());
    }

    #[test]
    fn reset_from_tracking_discards_partial_capture() {
        let mut s = Script::new(SequencerConfig::default());
        s.feed(Some(55.0), ms(300));
        assert_eq!(s.sequencer.state(), SequencerState::Tracking);
        s.sequencer.reset();
        assert_eq!(s.sequencer.state(), SequencerState::Idle);
        assert_eq!(s.sequencer.min_observed_hz(), None);
        assert!(s.sequencer.slots().iter().all(Option::is_none));
    }

    #[test]
    fn flat_spelling_and_slot_count() {
        let config = SequencerConfig {
            spelling: Spelling::Flat,
            ..SequencerConfig::default()
        };
        let mut s = Script::new(config);
        s.sequencer.set_slot_count(1).unwrap();
        s.feed(Some(58.27), ms(1300));
        assert_eq!(s.sequencer.state(), SequencerState::Done);
        assert_eq!(s.sequencer.committed_names(), vec!["Bb"]);
        assert!(s.sequencer.set_slot_count(0).is_err());
    }

    #[test]
    fn garbage_estimates_count_as_silence() {
        let mut s = Script::new(SequencerConfig::default());
        s.feed(Some(f32::NAN), ms(500)).feed(Some(-5.0), ms(500));
        assert_eq!(s.sequencer.state(), SequencerState::Idle);
        assert!(s.events.is_empty());
    }
}
