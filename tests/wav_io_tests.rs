use std::path::Path;
use tempfile::TempDir;
use voicelink::audio::{
    AudioFrame, AudioInput, AudioInputError, AudioOutput, WavFileInput, WavFileOutput,
};

fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

async fn read_all(input: &WavFileInput) -> Vec<Vec<f32>> {
    let mut source = input.open().await.unwrap();
    let mut chunks = Vec::new();
    while let Some(chunk) = source.next_chunk().await {
        chunks.push(chunk);
    }
    chunks
}

#[tokio::test]
async fn test_wav_input_chunks() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mic.wav");
    // 50ms at 24kHz
    write_wav(&path, 24000, 1, &vec![16384i16; 1200]);

    let input = WavFileInput::new(&path, 24000).with_realtime(false);
    let chunks = read_all(&input).await;

    // 20ms chunks: 480 + 480 + 240
    assert_eq!(
        chunks.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![480, 480, 240]
    );
    assert!(chunks.iter().flatten().all(|&s| (s - 0.5).abs() < 1e-6));
}

#[tokio::test(start_paused = true)]
async fn test_wav_input_realtime_pacing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mic.wav");
    write_wav(&path, 24000, 1, &vec![0i16; 4800]);

    let input = WavFileInput::new(&path, 24000);
    let start = tokio::time::Instant::now();
    let chunks = read_all(&input).await;

    assert_eq!(chunks.len(), 10);
    // First chunk is immediate, each following one waits a chunk duration
    assert!(start.elapsed() >= std::time::Duration::from_millis(180));
}

#[tokio::test]
async fn test_wav_input_mixes_stereo_to_mono() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stereo.wav");
    let interleaved: Vec<i16> = (0..480).flat_map(|_| [16384i16, 0]).collect();
    write_wav(&path, 24000, 2, &interleaved);

    let input = WavFileInput::new(&path, 24000).with_realtime(false);
    let samples: Vec<f32> = read_all(&input).await.into_iter().flatten().collect();

    assert_eq!(samples.len(), 480);
    assert!(samples.iter().all(|&s| (s - 0.25).abs() < 1e-6));
}

#[tokio::test]
async fn test_wav_input_rejects_wrong_rate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("slow.wav");
    write_wav(&path, 16000, 1, &[0; 160]);

    let input = WavFileInput::new(&path, 24000);
    match input.open().await {
        Err(AudioInputError::Unavailable(message)) => assert!(message.contains("16000")),
        Err(other) => panic!("unexpected {:?}", other),
        Ok(_) => panic!("expected rate mismatch"),
    }
}

#[tokio::test]
async fn test_wav_input_missing_file() {
    let input = WavFileInput::new("/definitely/not/here.wav", 24000);
    assert!(matches!(
        input.open().await,
        Err(AudioInputError::Unavailable(_))
    ));
}

#[test]
fn test_wav_output_records_frames() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("remote.wav");
    let output = WavFileOutput::create(&path, 24000).unwrap();

    for sequence in 0..3 {
        output
            .play(&AudioFrame {
                samples: vec![1000, -1000, 500, -500],
                sample_rate: 24000,
                sequence,
                timestamp_us: 0,
            })
            .unwrap();
    }

    // Wrong rate is dropped, not an error
    output
        .play(&AudioFrame {
            samples: vec![7; 10],
            sample_rate: 16000,
            sequence: 3,
            timestamp_us: 0,
        })
        .unwrap();

    assert_eq!(output.samples_written(), 12);
    output.finish().unwrap();
    output.finish().unwrap();

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().sample_rate, 24000);
    assert_eq!(reader.spec().channels, 1);
    let samples: Vec<i16> = reader.into_samples::<i16>().map(Result::unwrap).collect();
    assert_eq!(samples.len(), 12);
    assert_eq!(&samples[..4], &[1000, -1000, 500, -500]);
}
