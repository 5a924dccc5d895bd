//! # Pitch Detection Module
//!
//! Turns a live, band-limited sample stream into one fundamental-frequency
//! estimate per tick, tuned for the bass register where estimators tend to
//! lock onto the 2nd or 3rd harmonic.
//!
//! ## Features
//! - YIN pitch detection with FFT-backed difference function
//! - RMS noise gate
//! - Parabolic interpolation for sub-sample accuracy
//! - Sub-octave dip check and cents-based octave correction

use anyhow::{Result, ensure};

use crate::fft::{self, Correlator};
use crate::filter::FilterChain;
use crate::tuning;
use crate::window::{AnalysisWindow, MIN_WINDOW_SIZE};

/// No estimate below this frequency is ever emitted.
pub const DEFAULT_MIN_FREQUENCY_HZ: f32 = 30.0;

/// Absolute CMND threshold for accepting a period (YIN step 4).
const YIN_THRESHOLD: f32 = 0.15;

/// How much deeper the dip at twice the lag must be before the lower octave
/// is trusted over the first dip.
const SUB_OCTAVE_MARGIN: f32 = 0.02;

/// Cents errors closer than this are treated as equal.
const CENTS_TIE_EPSILON: f32 = 0.01;

/// Configuration for a [`PitchDetector`].
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Samples per analysis frame (power of two, >= 2048).
    pub analysis_window_size: usize,
    /// Frames quieter than this RMS level are reported as silence.
    pub min_volume_rms: f32,
    pub low_pass_hz: f32,
    pub high_pass_hz: f32,
    /// Enable octave / sub-harmonic correction.
    pub prefer_fundamental: bool,
    /// Candidate divisors for octave correction, least divided first.
    pub fundamental_divisors: Vec<u32>,
    pub min_frequency_hz: f32,
}

impl Default for DetectorConfig {
    /// The bass capture profile.
    fn default() -> Self {
        Self {
            analysis_window_size: 8192,
            min_volume_rms: 0.02,
            low_pass_hz: 350.0,
            high_pass_hz: 25.0,
            prefer_fundamental: true,
            fundamental_divisors: vec![1, 2, 3],
            min_frequency_hz: DEFAULT_MIN_FREQUENCY_HZ,
        }
    }
}

impl DetectorConfig {
    /// A general instrument tuner: shorter window, wider band, no correction.
    pub fn instrument_tuner() -> Self {
        Self {
            analysis_window_size: 4096,
            min_volume_rms: 0.01,
            low_pass_hz: 1200.0,
            prefer_fundamental: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.analysis_window_size.is_power_of_two()
                && self.analysis_window_size >= MIN_WINDOW_SIZE,
            "analysis_window_size must be a power of two >= {}, got {}",
            MIN_WINDOW_SIZE,
            self.analysis_window_size
        );
        ensure!(
            self.high_pass_hz < self.low_pass_hz,
            "high_pass_hz ({}) must be below low_pass_hz ({})",
            self.high_pass_hz,
            self.low_pass_hz
        );
        ensure!(
            self.min_volume_rms >= 0.0,
            "min_volume_rms must not be negative"
        );
        ensure!(
            self.min_frequency_hz > 0.0,
            "min_frequency_hz must be positive"
        );
        ensure!(
            self.fundamental_divisors.first() == Some(&1),
            "fundamental_divisors must start with 1"
        );
        ensure!(
            self.fundamental_divisors.windows(2).all(|w| w[0] < w[1]),
            "fundamental_divisors must be strictly increasing"
        );
        Ok(())
    }
}

/// Picks the octave-corrected fundamental for a raw estimate.
///
/// Builds the candidates `freq / d` for each divisor (in order), drops those
/// below `min_frequency_hz`, and keeps the one whose nearest equal-tempered
/// note has the smallest absolute cents error. Ties go to the earlier, less
/// divided candidate.
///
/// # Returns
/// * The chosen candidate, or `freq` unchanged when no candidate qualifies
pub fn correct_octave(freq: f32, divisors: &[u32], min_frequency_hz: f32) -> f32 {
    let mut best: Option<(f32, f32)> = None;

    for &divisor in divisors {
        if divisor == 0 {
            continue;
        }
        let candidate = freq / divisor as f32;
        if candidate < min_frequency_hz {
            continue;
        }
        let Some(error) = tuning::cents_error(candidate) else {
            continue;
        };
        match best {
            Some((_, best_error)) if error >= best_error - CENTS_TIE_EPSILON => {}
            _ => best = Some((candidate, error)),
        }
    }

    best.map_or(freq, |(candidate, _)| candidate)
}

/// A robust implementation of the YIN pitch detection algorithm.
///
/// The squared difference function is assembled from energies and an FFT
/// cross-correlation, so large windows stay within a frame's time budget.
/// Buffers are reused between calls.
pub struct YinEstimator {
    correlator: Correlator,
    energy: Vec<f64>,
    correlation: Vec<f32>,
    cmnd: Vec<f32>,
}

impl YinEstimator {
    pub fn new(window_size: usize) -> Self {
        Self {
            correlator: Correlator::new(window_size),
            energy: Vec::with_capacity(window_size + 1),
            correlation: Vec::with_capacity(window_size / 2),
            cmnd: Vec::with_capacity(window_size / 2),
        }
    }

    /// Estimates the period of `frame`.
    ///
    /// # Arguments
    /// * `frame` - Input audio signal (already gated and filtered)
    /// * `sample_rate` - Sample rate in Hz
    /// * `min_frequency_hz` - Lowest frequency searched for
    /// * `check_sub_octave` - Prefer twice the lag when its dip is clearly deeper
    ///
    /// # Returns
    /// * `Some(frequency)` - Detected frequency in Hz
    /// * `None` - No periodicity found
    pub fn estimate(
        &mut self,
        frame: &[f32],
        sample_rate: u32,
        min_frequency_hz: f32,
        check_sub_octave: bool,
    ) -> Option<f32> {
        let half = frame.len() / 2;
        if half < 4 || sample_rate == 0 {
            return None;
        }
        let longest_period = (sample_rate as f32 / min_frequency_hz).ceil() as usize + 2;
        let max_lag = longest_period.min(half - 1);

        // --- Step 1 & 2: Squared difference d(tau) = e(0) + e(tau) - 2 r(tau) ---
        self.energy.clear();
        self.energy.push(0.0);
        let mut running = 0.0f64;
        for &s in frame {
            running += (s as f64) * (s as f64);
            self.energy.push(running);
        }
        self.correlator
            .cross_correlate(&frame[..half], frame, max_lag + 1, &mut self.correlation);
        if self.correlation.len() <= max_lag {
            return None;
        }

        // --- Step 3: Cumulative mean normalized difference ---
        let head_energy = self.energy[half];
        let mut running_sum = 0.0f64;
        self.cmnd.clear();
        self.cmnd.push(1.0);
        for tau in 1..=max_lag {
            let tail_energy = self.energy[tau + half] - self.energy[tau];
            let diff =
                (head_energy + tail_energy - 2.0 * self.correlation[tau] as f64).max(0.0);
            running_sum += diff;
            let value = if running_sum > 0.0 {
                diff * tau as f64 / running_sum
            } else {
                1.0
            };
            self.cmnd.push(value as f32);
        }

        // --- Step 4: First dip under the threshold, followed to its bottom ---
        let mut period = (2..max_lag).find(|&tau| self.cmnd[tau] < YIN_THRESHOLD)?;
        while period + 1 < max_lag && self.cmnd[period + 1] < self.cmnd[period] {
            period += 1;
        }

        if check_sub_octave {
            period = self.deeper_sub_octave(period, max_lag);
        }

        // --- Step 5: Parabolic interpolation for better precision ---
        if period + 1 > max_lag {
            return None;
        }
        let y1 = self.cmnd[period - 1];
        let y2 = self.cmnd[period];
        let y3 = self.cmnd[period + 1];
        let denominator = y1 - 2.0 * y2 + y3;
        let period_float = if denominator != 0.0 {
            let shift = (y1 - y3) / (2.0 * denominator);
            if shift.abs() < 1.0 {
                period as f32 + shift
            } else {
                period as f32
            }
        } else {
            period as f32
        };

        let frequency = sample_rate as f32 / period_float;
        if frequency.is_finite() && frequency >= min_frequency_hz {
            Some(frequency)
        } else {
            None
        }
    }

    /// A harmonic lock shows a shallow dip at the harmonic's period and a much
    /// deeper one at the true period. Returns the lag of the deeper dip near
    /// `2 * period` when it clears the margin, `period` otherwise.
    fn deeper_sub_octave(&self, period: usize, max_lag: usize) -> usize {
        let doubled = period * 2;
        if doubled + 2 >= max_lag {
            return period;
        }
        let lowest = (doubled - 2..=doubled + 2)
            .min_by(|&a, &b| self.cmnd[a].total_cmp(&self.cmnd[b]))
            .unwrap_or(doubled);

        if self.cmnd[period] - self.cmnd[lowest] > SUB_OCTAVE_MARGIN {
            lowest
        } else {
            period
        }
    }
}

/// Live pitch detector: filter chain → analysis window → YIN → octave correction.
pub struct PitchDetector {
    config: DetectorConfig,
    sample_rate: u32,
    filters: FilterChain,
    window: AnalysisWindow,
    yin: YinEstimator,
    filtered: Vec<f32>,
    frame: Vec<f32>,
}

impl PitchDetector {
    /// Builds a detector for one input stream.
    ///
    /// # Returns
    /// * `Err` - The configuration is invalid for this sample rate
    pub fn new(config: DetectorConfig, sample_rate: u32) -> Result<Self> {
        config.validate()?;
        let filters = FilterChain::new(sample_rate, config.high_pass_hz, config.low_pass_hz)?;
        let window = AnalysisWindow::new(config.analysis_window_size)?;
        let yin = YinEstimator::new(config.analysis_window_size);

        log::debug!(
            target: "pitch",
            "Detector ready: {} Hz, window {}, band {}-{} Hz, prefer_fundamental={}",
            sample_rate,
            config.analysis_window_size,
            config.high_pass_hz,
            config.low_pass_hz,
            config.prefer_fundamental
        );

        Ok(Self {
            filtered: Vec::with_capacity(config.analysis_window_size),
            frame: Vec::with_capacity(config.analysis_window_size),
            config,
            sample_rate,
            filters,
            window,
            yin,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Replaces the filter graph and buffers for a new stream.
    pub fn rebuild(&mut self, sample_rate: u32) -> Result<()> {
        *self = Self::new(self.config.clone(), sample_rate)?;
        Ok(())
    }

    /// Filters incoming samples into the analysis window.
    ///
    /// Non-finite samples (a glitching device) are written as silence.
    pub fn push_samples(&mut self, samples: &[f32]) {
        self.filtered.clear();
        self.filtered.extend(
            samples
                .iter()
                .map(|&s| if s.is_finite() { s } else { 0.0 }),
        );
        self.filters.process(&mut self.filtered);
        self.window.push(&self.filtered);
    }

    /// Runs one analysis tick over the most recent window.
    ///
    /// # Returns
    /// * `Some(frequency)` - Best fundamental estimate, always >= `min_frequency_hz`
    /// * `None` - Window not yet full, below the volume gate, or no periodicity
    pub fn estimate(&mut self) -> Option<f32> {
        if !self.window.is_full() {
            return None;
        }
        self.window.snapshot_into(&mut self.frame);
        fft::remove_dc_offset(&mut self.frame);

        // --- Noise Gate ---
        if fft::rms(&self.frame) < self.config.min_volume_rms {
            return None;
        }

        let raw = self.yin.estimate(
            &self.frame,
            self.sample_rate,
            self.config.min_frequency_hz,
            self.config.prefer_fundamental,
        )?;

        let frequency = if self.config.prefer_fundamental {
            correct_octave(
                raw,
                &self.config.fundamental_divisors,
                self.config.min_frequency_hz,
            )
        } else {
            raw
        };
        log::trace!(target: "pitch", "raw {:.2} Hz -> {:.2} Hz", raw, frequency);

        (frequency >= self.config.min_frequency_hz).then_some(frequency)
    }

    /// Drops buffered audio and filter state.
    pub fn reset(&mut self) {
        self.filters.reset();
        self.window.clear();
    }
}
