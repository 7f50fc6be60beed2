// Integration tests for the audio pipeline
//
// Capture encoding, gapless playback scheduling and WAV export.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use base64::Engine;
use common::{payload_secs, ManualOutput, OUTPUT_RATE};
use live_translator::audio::{
    decode_payload, decode_pcm16, encode_pcm16, export_pcm16_payload, AudioFrame,
    AudioOutput, CaptureConfig, CaptureEncoder, PlaybackScheduler, CAPTURE_SAMPLE_RATE,
    CAPTURE_WINDOW,
};

fn scheduler() -> (PlaybackScheduler, Arc<ManualOutput>) {
    let output = ManualOutput::new(OUTPUT_RATE);
    let scheduler = PlaybackScheduler::new(Arc::clone(&output) as Arc<dyn AudioOutput>);
    (scheduler, output)
}

// ============================================================================
// Capture encoding
// ============================================================================

#[test]
fn test_silent_window_encodes_to_zero_bytes() {
    let mut encoder = CaptureEncoder::new(CAPTURE_SAMPLE_RATE);
    let frame = AudioFrame {
        samples: vec![0.0; CAPTURE_WINDOW],
        sample_rate: CAPTURE_SAMPLE_RATE,
        timestamp_ms: 0,
    };

    let chunk = encoder.encode(&frame);
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&chunk.data)
        .unwrap();

    assert_eq!(bytes.len(), 8192);
    assert!(bytes.iter().all(|&b| b == 0));
    assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
}

#[test]
fn test_round_trip_within_one_step() {
    // Encoding scales positives by 32767 and decoding divides by 32768, so a
    // positive sample can land up to 1.5 steps away; negatives stay within 0.5.
    let samples: Vec<f32> = (-1000..=1000).map(|i| i as f32 / 1000.0).collect();
    let decoded = decode_pcm16(&encode_pcm16(&samples)).unwrap();

    for (original, restored) in samples.iter().zip(&decoded) {
        let steps = if *original < 0.0 { 0.5 } else { 1.5 };
        let bound = steps / 32768.0 + f32::EPSILON;
        assert!(
            (original - restored).abs() <= bound,
            "{original} came back as {restored}"
        );
    }
}

#[test]
fn test_capture_defaults() {
    let config = CaptureConfig::default();
    assert_eq!(config.target_sample_rate, 16_000);
    assert_eq!(config.window, 4096);
    assert!(config.queue_capacity > 0);
}

// ============================================================================
// Playback scheduling
// ============================================================================

#[test]
fn test_back_to_back_buffers_are_gapless() {
    let (mut scheduler, _output) = scheduler();

    let first = scheduler.decode(&payload_secs(0.5, 100)).unwrap();
    let second = scheduler.decode(&payload_secs(0.3, 100)).unwrap();

    let a = scheduler.schedule(first, None).unwrap();
    let b = scheduler.schedule(second, None).unwrap();

    assert_eq!(a.start, 0.0);
    assert_eq!(b.start, a.start + 0.5);
    assert_eq!(b.start, a.end);
    assert_eq!(scheduler.pending(), 2);
}

#[test]
fn test_arbitrary_arrivals_never_overlap() {
    let (mut scheduler, output) = scheduler();
    let durations = [0.12, 0.4, 0.05, 0.33, 0.2, 0.01, 0.5, 0.27];
    let gaps = [0.0, 0.1, 0.9, 0.0, 0.02, 1.5, 0.0, 0.3];

    let mut intervals = Vec::new();
    for (duration, gap) in durations.iter().zip(gaps) {
        output.advance_secs(gap);
        let buffer = scheduler.decode(&payload_secs(*duration, 1)).unwrap();
        let now = output.current_time();
        let interval = scheduler.schedule(buffer, None).unwrap();
        assert!(interval.start >= now);
        intervals.push(interval);
    }

    for pair in intervals.windows(2) {
        assert!(pair[1].start >= pair[0].end, "{:?} overlaps {:?}", pair[1], pair[0]);
        assert!(pair[1].start >= pair[0].start);
    }
}

#[test]
fn test_late_buffer_starts_now() {
    let (mut scheduler, output) = scheduler();

    let first = scheduler.decode(&payload_secs(0.1, 1)).unwrap();
    scheduler.schedule(first, None).unwrap();

    output.advance_secs(1.0);
    let late = scheduler.decode(&payload_secs(0.1, 1)).unwrap();
    let interval = scheduler.schedule(late, None).unwrap();

    assert!((interval.start - 1.0).abs() < 1e-9);
}

#[test]
fn test_completion_fires_once_per_buffer() {
    let (mut scheduler, output) = scheduler();
    let fired = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let buffer = scheduler.decode(&payload_secs(0.1, 1)).unwrap();
        let fired = Arc::clone(&fired);
        scheduler
            .schedule(
                buffer,
                Some(Box::new(move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
    }

    output.advance_secs(0.15);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    output.advance_secs(1.0);
    assert_eq!(fired.load(Ordering::SeqCst), 3);
}

#[test]
fn test_rendered_samples_follow_schedule() {
    let (mut scheduler, output) = scheduler();

    output.advance(10);
    let buffer = scheduler.decode(&payload_secs(0.001, 16_384)).unwrap();
    scheduler.schedule(buffer, None).unwrap();

    let rendered = output.advance(48);
    assert!(rendered[..24].iter().all(|&s| (s - 0.5).abs() < 1e-6));
    assert!(rendered[24..].iter().all(|&s| s == 0.0));
}

#[test]
fn test_queued_latency_tracks_unplayed_audio() {
    let (mut scheduler, output) = scheduler();
    assert_eq!(scheduler.queued_latency(), 0.0);

    for _ in 0..2 {
        let buffer = scheduler.decode(&payload_secs(0.5, 1)).unwrap();
        scheduler.schedule(buffer, None).unwrap();
    }
    assert!((scheduler.queued_latency() - 1.0).abs() < 1e-9);

    output.advance_secs(0.25);
    assert!((scheduler.queued_latency() - 0.75).abs() < 1e-3);

    output.advance_secs(2.0);
    assert_eq!(scheduler.queued_latency(), 0.0);
}

#[test]
fn test_reset_drops_queue_and_rewinds() {
    let (mut scheduler, output) = scheduler();
    let buffer = scheduler.decode(&payload_secs(0.5, 1)).unwrap();
    scheduler.schedule(buffer, None).unwrap();

    scheduler.reset();

    assert_eq!(scheduler.pending(), 0);
    assert_eq!(scheduler.next_start_time(), 0.0);
    assert_eq!(output.queued(), 0);
    assert!(!scheduler.complete(0));
}

#[test]
fn test_decode_rejects_odd_payload() {
    let payload = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
    assert!(decode_payload(&payload, OUTPUT_RATE).is_err());
}

// ============================================================================
// WAV export
// ============================================================================

#[test]
fn test_export_round_trips_through_wav() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("utterance.wav");

    let samples: Vec<i16> = vec![0, 1000, -1000, i16::MAX, i16::MIN];
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes);

    let written = export_pcm16_payload(&payload, &path)?;
    assert_eq!(written, samples.len());

    let reader = hound::WavReader::open(&path)?;
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 24_000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);

    let restored = reader.into_samples::<i16>().collect::<Result<Vec<_>, _>>()?;
    assert_eq!(restored, samples);

    Ok(())
}

#[test]
fn test_export_rejects_bad_payload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.wav");
    assert!(export_pcm16_payload("not base64!!", &path).is_err());
    assert!(!path.exists());
}

#[test]
fn test_export_into_missing_directory_fails() {
    let payload = base64::engine::general_purpose::STANDARD.encode([0u8, 0]);
    let result = export_pcm16_payload(&payload, "/nonexistent/path/to/audio.wav");
    assert!(result.is_err(), "Writing into a missing directory should fail");
}
