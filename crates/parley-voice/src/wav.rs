//! WAV decoding and encoding on top of `hound`.
//!
//! Integer and IEEE-float sample formats are both read and normalized to
//! `[-1.0, 1.0]`. Anything `hound` cannot read (compressed containers,
//! truncated headers) is reported as "not inspectable" and callers carry on
//! without audio features.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;

/// Header size of a canonical PCM WAV file.
pub const WAV_HEADER_LEN: usize = 44;

/// Amplitude below which a normalized sample counts as silence.
const SILENCE_THRESHOLD: f32 = 0.01;

/// A decoded WAV buffer: its format and normalized, interleaved samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWav {
    pub spec: WavSpec,
    pub samples: Vec<f32>,
}

impl DecodedWav {
    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        let channels = usize::from(self.spec.channels);
        if channels == 0 || self.spec.sample_rate == 0 {
            return 0.0;
        }
        (self.samples.len() / channels) as f64 / f64::from(self.spec.sample_rate)
    }
}

/// Signal statistics used by the confidence heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFeatures {
    pub duration_secs: f64,
    pub rms_energy: f32,
    pub silence_ratio: f32,
}

/// Decodes a WAV buffer. Samples past a truncated data chunk are dropped.
pub fn decode(bytes: &[u8]) -> Option<DecodedWav> {
    let reader = match WavReader::new(Cursor::new(bytes)) {
        Ok(reader) => reader,
        Err(e) => {
            tracing::debug!(error = %e, "audio is not a readable wav");
            return None;
        }
    };
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
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

    Some(DecodedWav { spec, samples })
}

/// Computes duration, RMS energy and silence ratio of a WAV buffer.
pub fn features(bytes: &[u8]) -> Option<AudioFeatures> {
    let wav = decode(bytes)?;

    let (rms_energy, silence_ratio) = if wav.samples.is_empty() {
        (0.0, 1.0)
    } else {
        let count = wav.samples.len() as f64;
        let sum_squares: f64 = wav.samples.iter().map(|s| f64::from(*s) * f64::from(*s)).sum();
        let silent = wav.samples.iter().filter(|s| s.abs() < SILENCE_THRESHOLD).count();
        (
            (sum_squares / count).sqrt() as f32,
            (silent as f64 / count) as f32,
        )
    };

    Some(AudioFeatures {
        duration_secs: wav.duration_secs(),
        rms_energy,
        silence_ratio,
    })
}

/// Wraps raw signed 16-bit little-endian PCM in a WAV container.
/// A trailing odd byte is dropped.
pub fn encode_pcm16(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + pcm.len()));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for b in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([b[0], b[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn float_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for s in samples {
                writer.write_sample(*s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn encoded_pcm_decodes_back() {
        let wav = encode_pcm16(&pcm(&[0; 16_000]), 16_000, 1).unwrap();

        let decoded = decode(&wav).expect("valid wav");
        assert_eq!(decoded.spec.channels, 1);
        assert_eq!(decoded.spec.sample_rate, 16_000);
        assert_eq!(decoded.samples.len(), 16_000);
        assert!((decoded.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode(b"ID3\x04not a wav at all").is_none());
        assert!(decode(&[]).is_none());
    }

    #[test]
    fn silence_and_tone_features() {
        let silent = features(&encode_pcm16(&pcm(&[0; 800]), 8_000, 1).unwrap()).unwrap();
        assert_eq!(silent.rms_energy, 0.0);
        assert_eq!(silent.silence_ratio, 1.0);

        let loud: Vec<i16> = (0..800).map(|i| if i % 2 == 0 { 16_384 } else { -16_384 }).collect();
        let tone = features(&encode_pcm16(&pcm(&loud), 8_000, 1).unwrap()).unwrap();
        assert!((tone.rms_energy - 0.5).abs() < 1e-3);
        assert_eq!(tone.silence_ratio, 0.0);
        assert!((tone.duration_secs - 0.1).abs() < 1e-9);
    }

    #[test]
    fn float_samples_are_inspected() {
        let square: Vec<f32> = (0..16_000).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let f = features(&float_wav(&square, 16_000)).expect("float wav is readable");
        assert!((f.rms_energy - 0.5).abs() < 1e-6);
        assert_eq!(f.silence_ratio, 0.0);
        assert!((f.duration_secs - 1.0).abs() < 1e-9);
    }
}
