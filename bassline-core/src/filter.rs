//! # Filter Chain Module
//!
//! Band-limiting pre-filter for the pitch estimator. Low-frequency estimators
//! lock onto upper harmonics unless the input is band-limited first, so every
//! sample goes through a high-pass (rumble / DC) and then a low-pass
//! (harmonics) before it reaches the analysis window.
//!
//! Both stages are topology-preserving-transform state-variable filters run
//! at Butterworth damping (Q = 0.707).

use std::f32::consts::{FRAC_1_SQRT_2, PI};

use anyhow::{Result, ensure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    LowPass,
    HighPass,
}

/// A single 2-pole state-variable filter stage.
#[derive(Debug, Clone)]
pub struct SVFilter {
    ic1eq: f32, // First integrator's memory
    ic2eq: f32, // Second integrator's memory

    g: f32,
    k: f32,
    cutoff_hz: f32,
    filter_type: FilterType,
}

impl SVFilter {
    pub fn new(filter_type: FilterType, cutoff_hz: f32, q: f32, sample_rate: f32) -> Self {
        // Prewarped integrator gain.
        let g = (PI * cutoff_hz / sample_rate).tan();
        Self {
            ic1eq: 0.0,
            ic2eq: 0.0,
            g,
            k: 1.0 / q,
            cutoff_hz,
            filter_type,
        }
    }

    pub fn lowpass(cutoff_hz: f32, sample_rate: f32) -> Self {
        Self::new(FilterType::LowPass, cutoff_hz, FRAC_1_SQRT_2, sample_rate)
    }

    pub fn highpass(cutoff_hz: f32, sample_rate: f32) -> Self {
        Self::new(FilterType::HighPass, cutoff_hz, FRAC_1_SQRT_2, sample_rate)
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    #[inline]
    pub fn next_sample(&mut self, sample: f32) -> f32 {
        let (g, k) = (self.g, self.k);
        let h = 1.0 / (1.0 + g * (g + k));
        let v3 = sample - self.ic2eq;
        let v1 = h * (self.ic1eq + g * v3);
        let v2 = self.ic2eq + g * v1;

        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;

        match self.filter_type {
            FilterType::LowPass => v2,
            FilterType::HighPass => sample - k * v1 - v2,
        }
    }

    pub fn render(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.next_sample(*sample);
        }
    }

    pub fn reset(&mut self) {
        self.ic1eq = 0.0;
        self.ic2eq = 0.0;
    }
}

/// High-pass followed by low-pass, owned by one capture session.
///
/// Never retuned in place: a new device (or sample rate) gets a new chain.
#[derive(Debug, Clone)]
pub struct FilterChain {
    high_pass: SVFilter,
    low_pass: SVFilter,
    sample_rate: u32,
}

impl FilterChain {
    /// Builds the chain, checking `0 < high_pass_hz < low_pass_hz < nyquist`.
    pub fn new(sample_rate: u32, high_pass_hz: f32, low_pass_hz: f32) -> Result<Self> {
        ensure!(sample_rate > 0, "Sample rate must be positive");
        let nyquist = sample_rate as f32 / 2.0;
        ensure!(
            high_pass_hz > 0.0 && high_pass_hz < low_pass_hz,
            "High-pass cutoff ({} Hz) must be positive and below the low-pass cutoff ({} Hz)",
            high_pass_hz,
            low_pass_hz
        );
        ensure!(
            low_pass_hz < nyquist,
            "Low-pass cutoff ({} Hz) must be below Nyquist ({} Hz)",
            low_pass_hz,
            nyquist
        );

        let sr = sample_rate as f32;
        Ok(Self {
            high_pass: SVFilter::highpass(high_pass_hz, sr),
            low_pass: SVFilter::lowpass(low_pass_hz, sr),
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn high_pass_hz(&self) -> f32 {
        self.high_pass.cutoff_hz()
    }

    pub fn low_pass_hz(&self) -> f32 {
        self.low_pass.cutoff_hz()
    }

    /// Filters `buffer` in place.
    pub fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            let hp = self.high_pass.next_sample(*sample);
            *sample = self.low_pass.next_sample(hp);
        }
    }

    pub fn reset(&mut self) {
        self.high_pass.reset();
        self.low_pass.reset();
    }
}
