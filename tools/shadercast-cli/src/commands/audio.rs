//! Inspect an audio track's loudness.

use std::path::PathBuf;

use shadercast_audio::{analyze, AudioLevelSource, AudioSnapshot, RmsLevelProvider};
use shadercast_common::ShadercastError;

pub fn run(wav: PathBuf, at: Vec<f64>, json: bool) -> anyhow::Result<()> {
    let snapshot = AudioSnapshot::from_wav(&wav).map_err(ShadercastError::from)?;
    let analysis = analyze(&snapshot);
    let duration = snapshot.duration_secs();
    let sample_rate = snapshot.sample_rate();
    let provider = RmsLevelProvider::new(snapshot);
    let levels: Vec<(f64, f32)> = at.iter().map(|&t| (t, provider.level_at(t))).collect();

    if json {
        let report = serde_json::json!({
            "path": wav,
            "sample_rate": sample_rate,
            "duration_secs": duration,
            "analysis": analysis,
            "levels": levels
                .iter()
                .map(|(time, level)| serde_json::json!({ "time": time, "level": level }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Audio: {}", wav.display());
    println!("  Sample rate: {sample_rate} Hz");
    println!("  Duration:    {duration:.2}s");
    println!("  RMS:         {:.4}", analysis.rms);
    println!("  Peak:        {:.4}", analysis.peak);
    println!(
        "  Character:   {}",
        if analysis.energetic { "energetic" } else { "ambient" }
    );

    if !levels.is_empty() {
        println!();
        for (time, level) in levels {
            println!("  t={time:>8.3}s  level={level:.3}");
        }
    }

    Ok(())
}
