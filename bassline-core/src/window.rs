//! # Analysis Window
//!
//! Holds the most recent `size` filtered samples so each tick can analyse the
//! latest stretch of audio regardless of how the device chunks its callbacks.

use anyhow::{Result, ensure};

/// Smallest window that still resolves a low-B string fundamental.
pub const MIN_WINDOW_SIZE: usize = 2048;

#[derive(Debug, Clone)]
pub struct AnalysisWindow {
    buffer: Vec<f32>,
    write_pos: usize,
    filled: usize,
}

impl AnalysisWindow {
    /// `size` must be a power of two ≥ 2048.
    pub fn new(size: usize) -> Result<Self> {
        ensure!(
            size.is_power_of_two() && size >= MIN_WINDOW_SIZE,
            "Analysis window size must be a power of two >= {}, got {}",
            MIN_WINDOW_SIZE,
            size
        );
        Ok(Self {
            buffer: vec![0.0; size],
            write_pos: 0,
            filled: 0,
        })
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// True once a full window of real samples has been written.
    pub fn is_full(&self) -> bool {
        self.filled == self.buffer.len()
    }

    pub fn push(&mut self, samples: &[f32]) {
        let size = self.buffer.len();
        // Only the tail can survive in the window.
        let samples = if samples.len() > size {
            &samples[samples.len() - size..]
        } else {
            samples
        };
        for &s in samples {
            self.buffer[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % size;
        }
        self.filled = (self.filled + samples.len()).min(size);
    }

    /// Copies the window into `out`, oldest sample first.
    pub fn snapshot_into(&self, out: &mut Vec<f32>) {
        out.clear();
        if self.is_full() {
            out.extend_from_slice(&self.buffer[self.write_pos..]);
            out.extend_from_slice(&self.buffer[..self.write_pos]);
        } else {
            out.extend_from_slice(&self.buffer[..self.filled]);
        }
    }

    pub fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_sizes() {
        assert!(AnalysisWindow::new(1024).is_err());
        assert!(AnalysisWindow::new(3000).is_err());
        assert!(AnalysisWindow::new(4096).is_ok());
    }

    #[test]
    fn snapshot_is_oldest_first_after_wrap() {
        let mut window = AnalysisWindow::new(2048).unwrap();
        let ramp: Vec<f32> = (0..3000).map(|i| i as f32).collect();
        window.push(&ramp[..1000]);
        assert!(!window.is_full());
        window.push(&ramp[1000..]);
        assert!(window.is_full());

        let mut out = Vec::new();
        window.snapshot_into(&mut out);
        assert_eq!(out.len(), 2048);
        assert_eq!(out[0], 952.0);
        assert_eq!(out[2047], 2999.0);
        assert!(out.windows(2).all(|w| w[1] - w[0] == 1.0));
    }

    #[test]
    fn oversized_push_keeps_tail() {
        let mut window = AnalysisWindow::new(2048).unwrap();
        let ramp: Vec<f32> = (0..5000).map(|i| i as f32).collect();
        window.push(&ramp);
        let mut out = Vec::new();
        window.snapshot_into(&mut out);
        assert_eq!(out[0], 2952.0);
        assert_eq!(out[2047], 4999.0);
    }

    #[test]
    fn clear_empties_window() {
        let mut window = AnalysisWindow::new(2048).unwrap();
        window.push(&[1.0; 2048]);
        window.clear();
        assert!(!window.is_full());
        let mut out = vec![5.0];
        window.snapshot_into(&mut out);
        assert!(out.is_empty());
    }
}
