//! Timestamp → loudness mapping used as the per-frame audio input.

use crate::snapshot::AudioSnapshot;

/// Quietest level that still registers; anything below maps to 0.
pub const FLOOR_DB: f32 = -60.0;

/// Level reported for digital silence before clamping.
const SILENCE_DB: f32 = -160.0;

/// Total RMS window length in seconds (±25 ms around the sample).
pub const WINDOW_SECS: f64 = 0.05;

/// A pure function from a timestamp (seconds) to a normalized level in `[0, 1]`.
///
/// Implementations must be immutable: exports call this from a worker thread.
pub trait AudioLevelSource: Send + Sync {
    /// Loudness at `time_secs`.
    fn level_at(&self, time_secs: f64) -> f32;
}

impl<F> AudioLevelSource for F
where
    F: Fn(f64) -> f32 + Send + Sync,
{
    fn level_at(&self, time_secs: f64) -> f32 {
        self(time_secs)
    }
}

/// Windowed-RMS level provider over an [`AudioSnapshot`].
#[derive(Debug, Clone)]
pub struct RmsLevelProvider {
    snapshot: AudioSnapshot,
    window_len: usize,
}

impl RmsLevelProvider {
    /// Build a provider over `snapshot`.
    pub fn new(snapshot: AudioSnapshot) -> Self {
        let window_len = (WINDOW_SECS * snapshot.sample_rate()) as usize;
        Self {
            snapshot,
            window_len,
        }
    }

    /// The underlying snapshot.
    pub fn snapshot(&self) -> &AudioSnapshot {
        &self.snapshot
    }

    /// Root-mean-square over the window centred on `time_secs`, or `None`
    /// when the time is outside the track or the window is empty.
    pub fn rms_at(&self, time_secs: f64) -> Option<f32> {
        let samples = self.snapshot.samples();
        if samples.is_empty() || !time_secs.is_finite() {
            return None;
        }

        let index = (time_secs * self.snapshot.sample_rate()).floor();
        if index < 0.0 || index >= samples.len() as f64 {
            return None;
        }
        let index = index as usize;

        let half = self.window_len / 2;
        let start = index.saturating_sub(half);
        let end = (index + half).min(samples.len());
        let window = &samples[start..end];
        if window.is_empty() {
            return None;
        }

        let sum_squares: f32 = window.iter().map(|s| s * s).sum();
        Some((sum_squares / window.len() as f32).sqrt())
    }
}

impl AudioLevelSource for RmsLevelProvider {
    fn level_at(&self, time_secs: f64) -> f32 {
        match self.rms_at(time_secs) {
            Some(rms) => normalize_rms(rms),
            None => 0.0,
        }
    }
}

/// Convert an RMS amplitude to a `[0, 1]` level on a [`FLOOR_DB`] scale.
pub fn normalize_rms(rms: f32) -> f32 {
    let db = if rms > 0.0 {
        20.0 * rms.log10()
    } else {
        SILENCE_DB
    };
    let clamped = db.clamp(FLOOR_DB, 0.0);
    (clamped - FLOOR_DB) / FLOOR_DB.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RATE: f64 = 1_000.0;

    /// One second of quiet signal followed by one second of loud signal.
    fn quiet_then_loud() -> RmsLevelProvider {
        let mut samples = vec![0.01f32; 1_000];
        samples.extend(std::iter::repeat(0.5f32).take(1_000));
        RmsLevelProvider::new(AudioSnapshot::new(samples, RATE).unwrap())
    }

    #[test]
    fn test_normalize_rms_endpoints() {
        assert_eq!(normalize_rms(0.0), 0.0);
        assert_eq!(normalize_rms(0.0005), 0.0); // below the -60 dB floor
        assert_eq!(normalize_rms(1.0), 1.0);
        assert_eq!(normalize_rms(4.0), 1.0); // clipped above 0 dB
        assert!((normalize_rms(0.1) - 2.0 / 3.0).abs() < 1e-5); // -20 dB
    }

    #[test]
    fn test_out_of_range_is_zero() {
        let provider = quiet_then_loud();
        assert_eq!(provider.level_at(-0.001), 0.0);
        assert_eq!(provider.level_at(2.0), 0.0);
        assert_eq!(provider.level_at(100.0), 0.0);
        assert_eq!(provider.level_at(f64::NAN), 0.0);
    }

    #[test]
    fn test_empty_snapshot_is_zero() {
        let provider = RmsLevelProvider::new(AudioSnapshot::new(Vec::new(), RATE).unwrap());
        assert_eq!(provider.level_at(0.0), 0.0);
    }

    #[test]
    fn test_louder_window_reads_higher() {
        let provider = quiet_then_loud();
        let quiet = provider.level_at(0.5);
        let loud = provider.level_at(1.5);
        assert!(loud > quiet, "loud={loud} quiet={quiet}");
        assert!((quiet - 1.0 / 3.0).abs() < 1e-4); // 0.01 => -40 dB
        assert!((loud - (1.0 + 20.0 * 0.5f32.log10() / 60.0)).abs() < 1e-4);
    }

    #[test]
    fn test_window_is_clipped_at_track_start() {
        let provider = quiet_then_loud();
        assert_eq!(provider.rms_at(0.0).map(|r| (r * 100.0).round()), Some(1.0));
    }

    #[test]
    fn test_sub_sample_rate_window_is_empty() {
        // At 10 Hz the 50 ms window rounds down to zero samples.
        let provider = RmsLevelProvider::new(AudioSnapshot::new(vec![0.5f32; 10], 10.0).unwrap());
        assert_eq!(provider.level_at(0.5), 0.0);
    }

    #[test]
    fn test_closures_are_sources() {
        let source = |t: f64| (t as f32).min(1.0);
        assert_eq!(source.level_at(0.25), 0.25);
    }

    proptest! {
        #[test]
        fn prop_level_is_normalized(t in -5.0f64..5.0, amp in 0.0f32..2.0) {
            let provider = RmsLevelProvider::new(
                AudioSnapshot::new(vec![amp; 2_000], RATE).unwrap(),
            );
            let level = provider.level_at(t);
            prop_assert!((0.0..=1.0).contains(&level));
        }

        #[test]
        fn prop_louder_fixed_window_reads_strictly_higher(
            quiet in 0.002f32..0.5,
            ratio in 1.05f32..1.9,
            t in 0.1f64..0.9,
        ) {
            let loud = quiet * ratio;
            let a = RmsLevelProvider::new(AudioSnapshot::new(vec![quiet; 1_000], RATE).unwrap());
            let b = RmsLevelProvider::new(AudioSnapshot::new(vec![loud; 1_000], RATE).unwrap());
            prop_assert!(b.level_at(t) > a.level_at(t));
        }
    }
}
