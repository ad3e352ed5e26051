use shadercast_audio::{analyze, AudioLevelSource, AudioSnapshot, RmsLevelProvider};

const RATE: u32 = 16_000;

fn write_sine(path: &std::path::Path, segments: &[(f32, f32)]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let mut n = 0u32;
    for &(secs, amplitude) in segments {
        let count = (secs * RATE as f32) as u32;
        for _ in 0..count {
            let phase = n as f32 / RATE as f32 * 440.0 * std::f32::consts::TAU;
            writer.write_sample(amplitude * phase.sin()).unwrap();
            n += 1;
        }
    }
    writer.finalize().unwrap();
}

#[test]
fn levels_follow_track_loudness() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.wav");
    write_sine(&path, &[(1.0, 0.02), (1.0, 0.6), (1.0, 0.0)]);

    let snapshot = AudioSnapshot::from_wav(&path).unwrap();
    assert!((snapshot.duration_secs() - 3.0).abs() < 1e-6);

    let provider = RmsLevelProvider::new(snapshot.clone());
    let quiet = provider.level_at(0.5);
    let loud = provider.level_at(1.5);
    let silent = provider.level_at(2.5);

    assert!(loud > quiet, "loud={loud} quiet={quiet}");
    assert!(quiet > silent, "quiet={quiet} silent={silent}");
    assert_eq!(silent, 0.0);
    assert_eq!(provider.level_at(3.5), 0.0);

    let analysis = analyze(&snapshot);
    assert!(analysis.peak > 0.5);
    assert!(analysis.energetic);
}

#[test]
fn provider_is_shareable_across_threads() {
    let snapshot = AudioSnapshot::new(vec![0.25f32; 48_000], 48_000.0).unwrap();
    let provider: std::sync::Arc<dyn AudioLevelSource> =
        std::sync::Arc::new(RmsLevelProvider::new(snapshot));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let provider = provider.clone();
            std::thread::spawn(move || provider.level_at(0.1 + i as f64 * 0.2))
        })
        .collect();

    let levels: Vec<f32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(levels.windows(2).all(|w| (w[0] - w[1]).abs() < 1e-6));
}
