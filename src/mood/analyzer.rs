use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::spectrum::{mean_magnitude, SpectrumAnalyser, SpectrumConfig};
use crate::audio::AudioOutput;

/// Default sampling cadence (one display frame at 60 Hz)
pub const DEFAULT_MOOD_CADENCE: Duration = Duration::from_millis(16);

/// Shortest cadence the analyzer will tick at
pub const MIN_MOOD_CADENCE: Duration = Duration::from_millis(1);

/// Coarse loudness label for the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoodBucket {
    #[default]
    Neutral,
    Relaxed,
    Happy,
    Excited,
}

impl MoodBucket {
    /// Map a mean bin magnitude onto a bucket
    ///
    /// Thresholds are checked from the top. Below the lowest one there is no
    /// opinion and the caller keeps its current bucket.
    pub fn classify(mean: f32) -> Option<Self> {
        if mean > 50.0 {
            Some(Self::Excited)
        } else if mean > 20.0 {
            Some(Self::Happy)
        } else if mean > 5.0 {
            Some(Self::Relaxed)
        } else {
            None
        }
    }
}

/// Published mood value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoodSample {
    /// Current bucket
    pub bucket: MoodBucket,

    /// When the bucket was last set (by a sample or a reset)
    pub computed_at: DateTime<Utc>,
}

impl MoodSample {
    pub fn neutral() -> Self {
        Self {
            bucket: MoodBucket::Neutral,
            computed_at: Utc::now(),
        }
    }
}

/// Shared mood cell observed by the presentation layer
///
/// The analyzer writes measurements; only the session controller resets.
#[derive(Clone)]
pub struct MoodState {
    tx: Arc<watch::Sender<MoodSample>>,
}

impl MoodState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(MoodSample::neutral());
        Self { tx: Arc::new(tx) }
    }

    /// Watch mood changes
    pub fn subscribe(&self) -> watch::Receiver<MoodSample> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> MoodSample {
        *self.tx.borrow()
    }

    /// Force the bucket back to Neutral
    pub fn reset(&self) {
        self.tx.send_replace(MoodSample::neutral());
    }

    /// Apply one measurement and return the resulting bucket
    pub fn apply(&self, mean: f32) -> MoodBucket {
        match MoodBucket::classify(mean) {
            Some(bucket) => {
                self.tx.send_if_modified(|sample| {
                    let changed = sample.bucket != bucket;
                    *sample = MoodSample {
                        bucket,
                        computed_at: Utc::now(),
                    };
                    changed
                });
                bucket
            }
            None => self.current().bucket,
        }
    }
}

impl Default for MoodState {
    fn default() -> Self {
        Self::new()
    }
}

/// Samples the output spectrum while speech is rendering
pub struct MoodAnalyzer {
    output: Arc<dyn AudioOutput>,
    state: MoodState,
    speaking: watch::Receiver<bool>,
    spectrum: SpectrumAnalyser,
    cadence: Duration,
}

impl MoodAnalyzer {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        state: MoodState,
        speaking: watch::Receiver<bool>,
        cadence: Duration,
    ) -> Self {
        Self {
            output,
            state,
            speaking,
            spectrum: SpectrumAnalyser::new(SpectrumConfig::default()),
            cadence: cadence.max(MIN_MOOD_CADENCE),
        }
    }

    /// Take one measurement from the output tap
    pub fn sample_once(&mut self) -> MoodBucket {
        let window = self.output.analysis_window(self.spectrum.fft_size());
        let bins = self.spectrum.byte_frequency_data(&window);
        let mean = mean_magnitude(&bins);
        self.state.apply(mean)
    }

    /// Run until the speaking channel closes
    pub async fn run(mut self) {
        info!("Mood analyzer started ({:?} cadence)", self.cadence);

        loop {
            if self.speaking.wait_for(|speaking| *speaking).await.is_err() {
                break;
            }

            debug!("speech rendering, sampling mood");
            self.spectrum.reset();
            let mut ticker = tokio::time::interval(self.cadence);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !*self.speaking.borrow() {
                            break;
                        }
                        self.sample_once();
                    }
                    changed = self.speaking.changed() => {
                        if changed.is_err() {
                            info!("Mood analyzer stopped");
                            return;
                        }
                        if !*self.speaking.borrow_and_update() {
                            break;
                        }
                    }
                }
            }

            debug!("speech ended, mood sampling paused");
        }

        info!("Mood analyzer stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
