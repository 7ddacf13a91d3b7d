use crate::wav::AudioFeatures;

const UNCERTAIN_MARKERS: [&str; 3] = ["[inaudible]", "[unclear]", "..."];

/// Heuristic transcription confidence for providers that report none.
///
/// Starts at 0.5 and adds 0.2 for a non-empty transcript, 0.1 when no
/// uncertainty markers appear, 0.1 for an RMS energy above 0.01 and 0.1 for
/// a silence ratio below one half. Audio features are only available for PCM
/// WAV input; without them the signal terms contribute nothing.
pub fn estimate_confidence(text: &str, features: Option<&AudioFeatures>) -> f32 {
    let mut confidence = 0.5f32;

    let trimmed = text.trim();
    if !trimmed.is_empty() {
        confidence += 0.2;
    }

    let lower = trimmed.to_lowercase();
    if !UNCERTAIN_MARKERS.iter().any(|m| lower.contains(m)) {
        confidence += 0.1;
    }

    if let Some(f) = features {
        if f.rms_energy > 0.01 {
            confidence += 0.1;
        }
        if f.silence_ratio < 0.5 {
            confidence += 0.1;
        }
    }

    confidence.clamp(0.0, 1.0)
}
