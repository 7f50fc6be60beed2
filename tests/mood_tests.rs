// Mood analyzer timing tests
//
// Time is paused so the analyzer's cadence is driven by the test.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{noise, FixedOutput};
use live_translator::audio::AudioOutput;
use live_translator::mood::{MoodAnalyzer, MoodBucket, MoodState, DEFAULT_FFT_SIZE};
use tokio::sync::watch;

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_loud_speech_becomes_excited() {
    let output = FixedOutput::new(noise(DEFAULT_FFT_SIZE));
    let state = MoodState::new();
    let (speaking, speaking_rx) = watch::channel(false);

    let task = MoodAnalyzer::new(
        Arc::clone(&output) as Arc<dyn AudioOutput>,
        state.clone(),
        speaking_rx,
        Duration::from_millis(16),
    )
    .spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.current().bucket, MoodBucket::Neutral, "idle while silent");

    speaking.send_replace(true);
    // long enough for the smoothed spectrum to converge
    tokio::time::sleep(Duration::from_millis(500)).await;
    settle().await;
    assert_eq!(state.current().bucket, MoodBucket::Excited);

    task.abort();
}

#[tokio::test(start_paused = true)]
async fn test_stops_sampling_when_speech_ends() {
    let output = FixedOutput::new(vec![0.0; DEFAULT_FFT_SIZE]);
    let state = MoodState::new();
    let (speaking, speaking_rx) = watch::channel(true);

    let task = MoodAnalyzer::new(
        Arc::clone(&output) as Arc<dyn AudioOutput>,
        state.clone(),
        speaking_rx,
        Duration::from_millis(16),
    )
    .spawn();

    tokio::time::sleep(Duration::from_millis(50)).await;
    settle().await;
    assert_eq!(state.current().bucket, MoodBucket::Neutral, "silence keeps bucket");

    speaking.send_replace(false);
    settle().await;
    output.set(noise(DEFAULT_FFT_SIZE));
    tokio::time::sleep(Duration::from_millis(100)).await;
    settle().await;
    assert_eq!(state.current().bucket, MoodBucket::Neutral);

    task.abort();
}

#[tokio::test(start_paused = true)]
async fn test_analyzer_exits_when_speaking_channel_closes() {
    let output = FixedOutput::new(Vec::new());
    let (speaking, speaking_rx) = watch::channel(false);

    let task = MoodAnalyzer::new(
        output as Arc<dyn AudioOutput>,
        MoodState::new(),
        speaking_rx,
        Duration::from_millis(16),
    )
    .spawn();

    drop(speaking);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_zero_cadence_still_samples() {
    let output = FixedOutput::new(noise(DEFAULT_FFT_SIZE));
    let state = MoodState::new();
    let (speaking, speaking_rx) = watch::channel(false);

    let task = MoodAnalyzer::new(
        Arc::clone(&output) as Arc<dyn AudioOutput>,
        state.clone(),
        speaking_rx,
        Duration::ZERO,
    )
    .spawn();

    speaking.send_replace(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    settle().await;

    assert!(!task.is_finished(), "analyzer task survived");
    assert_eq!(state.current().bucket, MoodBucket::Excited);

    task.abort();
}

#[test]
fn test_excited_then_relaxed_not_neutral() {
    let state = MoodState::new();
    let mut rx = state.subscribe();

    assert_eq!(state.apply(60.0), MoodBucket::Excited);
    assert_eq!(rx.borrow_and_update().bucket, MoodBucket::Excited);

    assert_eq!(state.apply(10.0), MoodBucket::Relaxed);
    assert_eq!(rx.borrow_and_update().bucket, MoodBucket::Relaxed);
}
