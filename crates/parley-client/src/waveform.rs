//! Amplitude envelope for recorder visualisation.

use hound::{SampleFormat, WavReader};
use std::io::Cursor;

/// Decodes a recorded WAV clip into mono samples in `[-1, 1]`, averaging
/// channels. Returns `None` when the bytes are not a readable WAV.
pub fn wav_samples(bytes: &[u8]) -> Option<Vec<f32>> {
    let reader = WavReader::new(Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().map_while(Result::ok).collect(),
        SampleFormat::Int => {
            let scale = (1i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
            reader
                .into_samples::<i32>()
                .map_while(Result::ok)
                .map(|s| s as f32 / scale)
                .collect()
        }
    };

    let channels = usize::from(spec.channels.max(1));
    Some(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect(),
    )
}

/// Splits `samples` into `buckets` equal spans and returns each span's peak
/// absolute amplitude, normalised so the loudest bucket is `1.0`.
///
/// Silence yields all zeros. Fewer samples than buckets yields one bucket
/// per sample.
pub fn peaks(samples: &[f32], buckets: usize) -> Vec<f32> {
    if samples.is_empty() || buckets == 0 {
        return Vec::new();
    }
    let buckets = buckets.min(samples.len());
    let raw: Vec<f32> = (0..buckets)
        .map(|i| {
            let start = i * samples.len() / buckets;
            let end = (i + 1) * samples.len() / buckets;
            samples[start..end]
                .iter()
                .fold(0.0f32, |acc, s| acc.max(s.abs()))
        })
        .collect();

    let loudest = raw.iter().copied().fold(0.0f32, f32::max);
    if loudest <= f32::EPSILON {
        return vec![0.0; buckets];
    }
    raw.into_iter().map(|p| p / loudest).collect()
}

/// Root-mean-square level of a frame, for a live input meter.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peaks_are_normalised_per_bucket() {
        let samples = [0.1, -0.2, 0.05, 0.0, -0.4, 0.3, 0.2, 0.1];
        let p = peaks(&samples, 4);
        assert_eq!(p.len(), 4);
        assert!((p[0] - 0.5).abs() < 1e-6);
        assert!((p[2] - 1.0).abs() < 1e-6);
        assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn degenerate_inputs() {
        assert!(peaks(&[], 10).is_empty());
        assert!(peaks(&[0.5], 0).is_empty());
        assert_eq!(peaks(&[0.0; 16], 4), vec![0.0; 4]);
        assert_eq!(peaks(&[0.25, 0.5], 8).len(), 2);
    }

    fn stereo_clip(frames: &[(i16, i16)]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for (l, r) in frames {
                writer.write_sample(*l).unwrap();
                writer.write_sample(*r).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn wav_decoding_mixes_to_mono_and_level() {
        let samples = wav_samples(&stereo_clip(&[(i16::MIN, i16::MIN), (16_384, 0)])).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], -1.0);
        assert!((samples[1] - 0.25).abs() < 1e-6);
        assert!(wav_samples(b"not audio").is_none());

        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5]) - 0.5).abs() < 1e-6);
    }
}
