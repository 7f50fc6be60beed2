//! Mood signal derived from the played-back speech
//!
//! The analyzer taps the output renderer, computes byte-scaled frequency data
//! on a fixed cadence while the service is speaking, and maps the mean bin
//! magnitude onto a coarse bucket for the presentation layer.

mod analyzer;
mod spectrum;

pub use analyzer::{
    MoodAnalyzer, MoodBucket, MoodSample, MoodState, DEFAULT_MOOD_CADENCE, MIN_MOOD_CADENCE,
};
pub use spectrum::{mean_magnitude, SpectrumAnalyser, SpectrumConfig, DEFAULT_FFT_SIZE};
