mod common;

use common::ChunkSource;
use tokio::sync::mpsc;
use voicelink::audio::{quantize, spawn_capture, AudioFrameEncoder, EncoderConfig};

fn encoder(frame_size: usize) -> AudioFrameEncoder {
    AudioFrameEncoder::new(EncoderConfig {
        frame_size,
        sample_rate: 24000,
    })
    .unwrap()
}

/// Deterministic pseudo-random samples, deliberately overshooting [-1, 1]
fn noise(len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2654435761).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state as f32 / u32::MAX as f32) * 2.6 - 1.3
        })
        .collect()
}

#[test]
fn test_frame_size_four_scenario() {
    let mut enc = encoder(4);

    let frames = enc.push_samples(&[0.0, 0.5, -0.5, 1.0, -1.0, 0.25]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].samples, vec![0, 16384, -16384, 32767]);
    assert_eq!(frames[0].sequence, 0);
    assert_eq!(enc.pending(), 2);

    // The buffered tail completes with two more samples
    let frames = enc.push_samples(&[0.0, 0.0]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].samples, vec![-32768, quantize(0.25), 0, 0]);
}

#[test]
fn test_quantize_range_ends() {
    assert_eq!(quantize(1.0), 32767);
    assert_eq!(quantize(-1.0), -32768);
    assert_eq!(quantize(0.0), 0);
    assert_eq!(quantize(7.5), 32767);
    assert_eq!(quantize(-7.5), -32768);
    assert_eq!(quantize(f32::NAN), 0);
    assert_eq!(quantize(f32::INFINITY), 32767);
    assert_eq!(quantize(f32::NEG_INFINITY), -32768);
}

#[test]
fn test_quantize_clamps_before_scaling() {
    for x in [1.0001f32, 2.0, 100.0, -1.0001, -3.0] {
        assert_eq!(quantize(x), quantize(x.clamp(-1.0, 1.0)), "x = {}", x);
    }
}

#[test]
fn test_frames_concatenate_to_quantized_input() {
    // Any chunking of the input must yield the same frames
    for (seed, frame_size) in [(1u32, 1usize), (2, 3), (3, 16), (4, 1024), (5, 7)] {
        let input = noise(5000, seed);
        let chunkings: [&[usize]; 3] = [&[1], &[13, 1, 250], &[4999, 1]];

        for sizes in chunkings {
            let mut enc = encoder(frame_size);
            let mut frames = Vec::new();
            let mut offset = 0;
            let mut turn = 0;
            while offset < input.len() {
                let len = sizes[turn % sizes.len()].min(input.len() - offset);
                frames.extend(enc.push_samples(&input[offset..offset + len]));
                offset += len;
                turn += 1;
            }

            let complete = input.len() / frame_size;
            assert_eq!(frames.len(), complete);
            assert!(frames.iter().all(|f| f.samples.len() == frame_size));
            assert_eq!(enc.pending(), input.len() % frame_size);

            let emitted: Vec<i16> = frames.iter().flat_map(|f| f.samples.iter().copied()).collect();
            let expected: Vec<i16> = input[..complete * frame_size]
                .iter()
                .map(|&s| quantize(s))
                .collect();
            assert_eq!(emitted, expected, "frame_size {} chunks {:?}", frame_size, sizes);
        }
    }
}

#[test]
fn test_empty_push_is_noop() {
    let mut enc = encoder(4);
    enc.push_samples(&[0.1]);
    assert!(enc.push_samples(&[]).is_empty());
    assert_eq!(enc.pending(), 1);
}

#[test]
fn test_sequence_and_timestamps_increase() {
    let mut enc = encoder(240);
    let frames = enc.push_samples(&noise(240 * 10, 9));

    assert_eq!(frames.len(), 10);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.sequence, i as u64);
        assert_eq!(frame.sample_rate, 24000);
        // 240 samples at 24kHz = 10ms
        assert_eq!(frame.timestamp_us, i as u64 * 10_000);
    }
}

#[test]
fn test_tiny_frames_keep_timestamps_strictly_increasing() {
    let mut enc = AudioFrameEncoder::new(EncoderConfig {
        frame_size: 1,
        sample_rate: 2_000_000,
    })
    .unwrap();

    let frames = enc.push_samples(&[0.0; 16]);
    for pair in frames.windows(2) {
        assert!(pair[1].timestamp_us > pair[0].timestamp_us);
    }
}

#[test]
fn test_flush_emits_partial_frame() {
    let mut enc = encoder(4);
    enc.push_samples(&[0.0, 0.5, -0.5, 1.0, 0.25, -1.0]);

    let tail = enc.flush().unwrap();
    assert_eq!(tail.samples, vec![quantize(0.25), -32768]);
    assert_eq!(tail.sequence, 1);
    assert_eq!(enc.pending(), 0);
    assert!(enc.flush().is_none());
}

#[test]
fn test_reset_discards_pending() {
    let mut enc = encoder(4);
    enc.push_samples(&[0.1, 0.2, 0.3, 0.4, 0.5]);
    enc.reset();

    assert_eq!(enc.pending(), 0);
    let frames = enc.push_samples(&[0.0; 4]);
    assert_eq!(frames[0].sequence, 0);
    assert_eq!(frames[0].timestamp_us, 0);
}

#[test]
fn test_rejects_zero_frame_size() {
    assert!(AudioFrameEncoder::new(EncoderConfig {
        frame_size: 0,
        sample_rate: 24000,
    })
    .is_err());
}

#[tokio::test]
async fn test_capture_pump_flushes_tail() {
    let source = ChunkSource::new(vec![vec![0.5; 5], vec![-0.5; 5]], 24000);
    let (tx, mut rx) = mpsc::channel(16);

    let summary = spawn_capture(Box::new(source), encoder(4), tx).await.unwrap();
    assert_eq!(summary.samples_captured, 10);
    assert_eq!(summary.frames_emitted, 3);

    let mut lengths = Vec::new();
    while let Some(frame) = rx.recv().await {
        lengths.push(frame.samples.len());
    }
    assert_eq!(lengths, vec![4, 4, 2]);
}

#[tokio::test]
async fn test_capture_pump_stops_when_receiver_dropped() {
    let source = ChunkSource::new(vec![vec![0.0; 64]; 100], 24000);
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    let summary = spawn_capture(Box::new(source), encoder(4), tx).await.unwrap();
    assert_eq!(summary.frames_emitted, 0);
    assert_eq!(summary.samples_captured, 64);
}
