//! Short synthesized bass note used to audition a captured root, plus the
//! WAV helpers shared with offline replay.

use std::f32::consts::PI;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use log::info;

pub const DEFAULT_PREVIEW_SECONDS: f32 = 1.2;

const ATTACK_SECONDS: f32 = 0.02;
const PEAK_GAIN: f32 = 0.9;
const SUSTAIN_GAIN: f32 = 0.2;
const FLOOR_GAIN: f32 = 1e-4;
const SUB_LEVEL: f32 = 0.5;
const MASTER_LEVEL: f32 = 0.5;

fn envelope(t: f32, seconds: f32) -> f32 {
    let half = seconds / 2.0;
    if t < ATTACK_SECONDS {
        PEAK_GAIN * t / ATTACK_SECONDS
    } else if t < half {
        let progress = (t - ATTACK_SECONDS) / (half - ATTACK_SECONDS).max(f32::EPSILON);
        PEAK_GAIN * (SUSTAIN_GAIN / PEAK_GAIN).powf(progress)
    } else {
        let progress = ((t - half) / (seconds - half).max(f32::EPSILON)).min(1.0);
        SUSTAIN_GAIN * (FLOOR_GAIN / SUSTAIN_GAIN).powf(progress)
    }
}

fn triangle(phase: f32) -> f32 {
    // phase in [0, 1)
    4.0 * (phase - (phase + 0.5).floor()).abs() - 1.0
}

/// Renders a triangle at `frequency_hz` layered with a sine one octave
/// below, shaped by a pluck envelope.
pub fn render_preview(frequency_hz: f32, sample_rate: u32, seconds: f32) -> Result<Vec<f32>> {
    ensure!(
        frequency_hz.is_finite() && frequency_hz > 0.0,
        "Preview frequency must be positive, got {}",
        frequency_hz
    );
    ensure!(sample_rate > 0, "Sample rate must be positive");
    ensure!(seconds.is_finite(), "Preview length must be finite");
    ensure!(
        seconds > ATTACK_SECONDS,
        "Preview must be longer than the attack ({}s)",
        ATTACK_SECONDS
    );

    let len = (seconds * sample_rate as f32).round() as usize;
    let sr = sample_rate as f32;
    let samples = (0..len)
        .map(|i| {
            let t = i as f32 / sr;
            let tri = triangle((frequency_hz * t).fract());
            let sub = (2.0 * PI * frequency_hz * 0.5 * t).sin();
            MASTER_LEVEL * envelope(t, seconds) * (tri + SUB_LEVEL * sub)
        })
        .collect();
    Ok(samples)
}

/// Writes mono 32-bit float samples to a WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    info!(target: "preview", "Wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}

/// Reads a WAV file and mixes it down to mono `f32` in [-1, 1].
///
/// # Returns
/// * `Ok((samples, sample_rate))`
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect::<Result<_, _>>()?
        }
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        assert_eq!(envelope(0.0, 1.2), 0.0);
        assert!((envelope(0.02, 1.2) - PEAK_GAIN).abs() < 1e-4);
        assert!((envelope(0.6, 1.2) - SUSTAIN_GAIN).abs() < 1e-4);
        assert!(envelope(1.2, 1.2) < 1e-3);
        assert!(envelope(0.3, 1.2) < PEAK_GAIN && envelope(0.3, 1.2) > SUSTAIN_GAIN);
    }

    #[test]
    fn triangle_spans_full_range() {
        assert!((triangle(0.0) + 1.0).abs() < 1e-6);
        assert!((triangle(0.5) - 1.0).abs() < 1e-6);
        assert!(triangle(0.25).abs() < 1e-6);
    }

    #[test]
    fn render_length_and_level() {
        let samples = render_preview(55.0, 48_000, DEFAULT_PREVIEW_SECONDS).unwrap();
        assert_eq!(samples.len(), 57_600);
        let peak = samples.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.3 && peak <= 1.0, "peak {}", peak);
        assert!(samples.last().unwrap().abs() < 1e-3);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(render_preview(0.0, 48_000, 1.0).is_err());
        assert!(render_preview(55.0, 0, 1.0).is_err());
        assert!(render_preview(55.0, 48_000, 0.01).is_err());
        assert!(render_preview(55.0, 48_000, f32::INFINITY).is_err());
    }

    #[test]
    fn wav_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.wav");
        let samples = render_preview(41.2, 22_050, 0.5).unwrap();
        write_wav(&path, &samples, 22_050).unwrap();

        let (read, sample_rate) = read_wav_mono(&path).unwrap();
        assert_eq!(sample_rate, 22_050);
        assert_eq!(read, samples);
    }

    #[test]
    fn stereo_int_files_are_mixed_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..4 {
            writer.write_sample(16_384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let (mono, sample_rate) = read_wav_mono(&path).unwrap();
        assert_eq!(sample_rate, 8_000);
        assert_eq!(mono, vec![0.25; 4]);
    }
}
