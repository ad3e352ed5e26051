//! Immutable audio sample snapshots.

use std::path::Path;
use std::sync::Arc;

use crate::{AudioError, AudioResult};

/// An immutable mono sample buffer with its sample rate.
///
/// Cloning is cheap: the samples are shared.
#[derive(Debug, Clone)]
pub struct AudioSnapshot {
    samples: Arc<[f32]>,
    sample_rate: f64,
}

impl AudioSnapshot {
    /// Build a snapshot from decoded mono samples.
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: f64) -> AudioResult<Self> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(AudioError::InvalidSampleRate(sample_rate));
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate,
        })
    }

    /// Decode the first channel of a WAV file.
    ///
    /// Integer samples are normalized to `[-1, 1]`; float samples are kept as-is.
    pub fn from_wav(path: &Path) -> AudioResult<Self> {
        if !path.exists() {
            return Err(AudioError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => {
                if spec.bits_per_sample != 32 {
                    return Err(AudioError::UnsupportedFormat {
                        bits: spec.bits_per_sample,
                        format: "float",
                    });
                }
                reader.samples::<f32>().collect::<Result<_, _>>()?
            }
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(AudioError::UnsupportedFormat {
                        bits: spec.bits_per_sample,
                        format: "int",
                    });
                }
                let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let mono: Vec<f32> = interleaved.iter().step_by(channels).copied().collect();

        tracing::info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels,
            samples = mono.len(),
            "Loaded audio snapshot"
        );

        Self::new(mono, spec.sample_rate as f64)
    }

    /// The samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Samples per second.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the snapshot holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Track length in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav_i16(path: &Path, channels: u16, frames: &[[i16; 2]]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for ch in 0..channels as usize {
                writer.write_sample(frame[ch]).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_rejects_bad_sample_rate() {
        assert!(AudioSnapshot::new(vec![0.0f32; 4], 0.0).is_err());
        assert!(AudioSnapshot::new(vec![0.0f32; 4], f64::NAN).is_err());
    }

    #[test]
    fn test_duration() {
        let snap = AudioSnapshot::new(vec![0.0f32; 48_000], 48_000.0).unwrap();
        assert_eq!(snap.duration_secs(), 1.0);
        assert_eq!(snap.len(), 48_000);
        assert!(!snap.is_empty());
    }

    #[test]
    fn test_wav_keeps_first_channel_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav_i16(&path, 2, &[[16_384, -32_768], [-16_384, 0], [0, 32_767]]);

        let snap = AudioSnapshot::from_wav(&path).unwrap();
        assert_eq!(snap.sample_rate(), 8_000.0);
        assert_eq!(snap.samples(), &[0.5, -0.5, 0.0]);
    }

    #[test]
    fn test_missing_wav_is_reported() {
        let err = AudioSnapshot::from_wav(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, AudioError::FileNotFound { .. }));
    }

    #[test]
    fn test_audio_errors_convert_to_shared_error() {
        use shadercast_common::ShadercastError;

        let missing = AudioSnapshot::from_wav(Path::new("/definitely/not/here.wav")).unwrap_err();
        match ShadercastError::from(missing) {
            ShadercastError::FileNotFound { path } => {
                assert_eq!(path, Path::new("/definitely/not/here.wav"))
            }
            other => panic!("unexpected {other:?}"),
        }

        let shared: ShadercastError = AudioError::InvalidSampleRate(0.0).into();
        assert!(shared.to_string().starts_with("Audio error:"));
    }
}
