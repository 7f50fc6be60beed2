//! Byte-scaled frequency data from the output tap
//!
//! Produces the same shape of data a browser analyser node exposes: a
//! Blackman-windowed FFT, smoothed over time, converted to decibels and mapped
//! onto 0..=255 between `min_decibels` and `max_decibels`.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Default FFT size
pub const DEFAULT_FFT_SIZE: usize = 2048;

/// Analyser settings
#[derive(Debug, Clone, Copy)]
pub struct SpectrumConfig {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

pub struct SpectrumAnalyser {
    config: SpectrumConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyser {
    pub fn new(config: SpectrumConfig) -> Self {
        let size = config.fft_size.max(2);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            config: SpectrumConfig {
                fft_size: size,
                ..config
            },
            fft,
            window: blackman(size),
            smoothed: vec![0.0; size / 2],
            scratch,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.config.fft_size
    }

    /// Number of frequency bins produced per frame
    pub fn bin_count(&self) -> usize {
        self.config.fft_size / 2
    }

    /// Compute byte frequency data for the latest `fft_size` samples
    ///
    /// Shorter input is zero-padded at the front; longer input keeps its tail.
    pub fn byte_frequency_data(&mut self, samples: &[f32]) -> Vec<u8> {
        let size = self.config.fft_size;
        let tail = &samples[samples.len().saturating_sub(size)..];
        let offset = size - tail.len();

        let mut buffer: Vec<Complex<f32>> = (0..size)
            .map(|i| {
                let s = if i < offset { 0.0 } else { tail[i - offset] };
                Complex::new(s * self.window[i], 0.0)
            })
            .collect();

        self.fft.process_with_scratch(&mut buffer, &mut self.scratch);

        let tau = self.config.smoothing;
        let range = self.config.max_decibels - self.config.min_decibels;
        let scale = 1.0 / size as f32;

        self.smoothed
            .iter_mut()
            .zip(buffer.iter())
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() * scale;
                *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
                let db = 20.0 * smoothed.log10();
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let byte = (255.0 / range * (db - self.config.min_decibels))
                    .clamp(0.0, 255.0)
                    .floor() as u8;
                byte
            })
            .collect()
    }

    /// Forget smoothing history
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
    }
}

/// Mean magnitude across all bins
pub fn mean_magnitude(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    bins.iter().map(|&b| f32::from(b)).sum::<f32>() / bins.len() as f32
}

fn blackman(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| {
            let x = i as f32 / n;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}
