//! Whole-track loudness summary.

use serde::Serialize;

use crate::snapshot::AudioSnapshot;

/// Only every `STRIDE`-th sample is inspected.
const STRIDE: usize = 100;

/// RMS above this marks a track as energetic.
const ENERGETIC_RMS: f32 = 0.15;

/// Peak above this marks a track as energetic.
const ENERGETIC_PEAK: f32 = 0.8;

/// Coarse loudness summary of a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioAnalysis {
    /// Strided RMS amplitude.
    pub rms: f32,

    /// Strided absolute peak.
    pub peak: f32,

    /// Loud or punchy enough to call for energetic visuals.
    pub energetic: bool,
}

/// Summarize `snapshot` by sampling every 100th sample.
pub fn analyze(snapshot: &AudioSnapshot) -> AudioAnalysis {
    let mut sum_squares = 0.0f32;
    let mut peak = 0.0f32;
    let mut count = 0usize;

    for &sample in snapshot.samples().iter().step_by(STRIDE) {
        sum_squares += sample * sample;
        peak = peak.max(sample.abs());
        count += 1;
    }

    let rms = if count == 0 {
        0.0
    } else {
        (sum_squares / count as f32).sqrt()
    };

    let analysis = AudioAnalysis {
        rms,
        peak,
        energetic: rms > ENERGETIC_RMS || peak > ENERGETIC_PEAK,
    };
    tracing::debug!(?analysis, "Audio analysis");
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_ambient() {
        let snap = AudioSnapshot::new(vec![0.0f32; 1_000], 1_000.0).unwrap();
        let a = analyze(&snap);
        assert_eq!(a.rms, 0.0);
        assert_eq!(a.peak, 0.0);
        assert!(!a.energetic);
    }

    #[test]
    fn test_empty_track() {
        let snap = AudioSnapshot::new(Vec::new(), 1_000.0).unwrap();
        assert_eq!(analyze(&snap).rms, 0.0);
    }

    #[test]
    fn test_loud_track_is_energetic() {
        let snap = AudioSnapshot::new(vec![0.3f32; 1_000], 1_000.0).unwrap();
        let a = analyze(&snap);
        assert!((a.rms - 0.3).abs() < 1e-5);
        assert!(a.energetic);
    }

    #[test]
    fn test_single_spike_on_stride_is_energetic() {
        let mut samples = vec![0.01f32; 1_000];
        samples[200] = -0.9;
        let a = analyze(&AudioSnapshot::new(samples, 1_000.0).unwrap());
        assert_eq!(a.peak, 0.9);
        assert!(a.energetic);
    }
}
