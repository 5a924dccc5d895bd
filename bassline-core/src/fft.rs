//! # Fast Fourier Transform (FFT) Module
//!
//! FFT-backed helpers for the per-frame pitch analysis. The YIN difference
//! function is O(N²) when computed directly; building it from an FFT
//! autocorrelation keeps an 8192-sample window well inside one frame.
//!
//! ## Features
//! - DC offset removal
//! - RMS level measurement for the noise gate
//! - Linear (zero-padded) cross-correlation with cached FFT plans

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// Removes the DC offset from a signal by making its average value zero.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Root-mean-square level of a buffer. Empty buffers are silent.
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Computes linear correlations of fixed-size frames.
///
/// Plans are created once for a given window size and reused every frame.
pub struct Correlator {
    window_size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    signal_buf: Vec<Complex<f32>>,
    template_buf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Correlator {
    pub fn new(window_size: usize) -> Self {
        // Zero-pad to 2N so the circular correlation equals the linear one.
        let padded = (window_size * 2).next_power_of_two();
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(padded);
        let inverse = planner.plan_fft_inverse(padded);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let zero = Complex { re: 0.0, im: 0.0 };

        Self {
            window_size,
            forward,
            inverse,
            signal_buf: vec![zero; padded],
            template_buf: vec![zero; padded],
            scratch: vec![zero; scratch_len],
        }
    }

    /// Writes `c[tau] = Σ_j template[j]·signal[j+tau]` for `tau in 0..max_lag`.
    ///
    /// Both inputs are truncated to the window size. Terms where `j + tau`
    /// runs past the end of `signal` count as zero.
    pub fn cross_correlate(
        &mut self,
        template: &[f32],
        signal: &[f32],
        max_lag: usize,
        out: &mut Vec<f32>,
    ) {
        let n = signal.len().min(self.window_size);
        let m = template.len().min(self.window_size);
        let padded = self.signal_buf.len();

        load_padded(&mut self.signal_buf, &signal[..n]);
        load_padded(&mut self.template_buf, &template[..m]);

        self.forward
            .process_with_scratch(&mut self.signal_buf, &mut self.scratch);
        self.forward
            .process_with_scratch(&mut self.template_buf, &mut self.scratch);
        for (s, t) in self.signal_buf.iter_mut().zip(self.template_buf.iter()) {
            *s *= t.conj();
        }
        self.inverse
            .process_with_scratch(&mut self.signal_buf, &mut self.scratch);

        // rustfft does not normalise the inverse transform.
        let scale = 1.0 / padded as f32;
        out.clear();
        out.extend(
            self.signal_buf
                .iter()
                .take(max_lag.min(n))
                .map(|c| c.re * scale),
        );
    }
}

fn load_padded(buffer: &mut [Complex<f32>], samples: &[f32]) {
    for (slot, &sample) in buffer.iter_mut().zip(samples.iter()) {
        *slot = Complex { re: sample, im: 0.0 };
    }
    for slot in buffer[samples.len()..].iter_mut() {
        *slot = Complex { re: 0.0, im: 0.0 };
    }
}
