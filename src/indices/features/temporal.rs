//! Waveform-domain routines. Input is one chunk of mono samples in [-1, 1].

use super::{FeatureError, FeatureOutput, mean, median, normalized_entropy};

/// Samples per envelope frame.
const ENVELOPE_FRAME: usize = 512;

/// Activity threshold above the background envelope level.
const ACTIVITY_THRESHOLD_DB: f64 = 3.0;

/// Floor for amplitude → dB conversion (≈ -200 dB).
const AMPLITUDE_FLOOR: f64 = 1e-10;

/// Fast envelope: peak absolute amplitude of each `ENVELOPE_FRAME`-sample frame.
/// A trailing partial frame is kept so short chunks still get one value.
fn envelope(samples: &[f32]) -> Vec<f64> {
    samples
        .chunks(ENVELOPE_FRAME)
        .map(|frame| {
            frame
                .iter()
                .fold(0.0f64, |acc, &s| acc.max((s as f64).abs()))
        })
        .collect()
}

fn amplitude_to_db(a: f64) -> f64 {
    20.0 * a.max(AMPLITUDE_FLOOR).log10()
}

/// Temporal entropy Ht: normalised entropy of the squared envelope.
/// Close to 1 for a flat envelope, lower when energy is concentrated in a few frames.
pub fn temporal_entropy(samples: &[f32]) -> Result<FeatureOutput, FeatureError> {
    let env = envelope(samples);
    if env.len() < 2 {
        return Err(FeatureError::EmptyChunk);
    }
    normalized_entropy(env.iter().map(|a| a * a))
        .map(FeatureOutput::Scalar)
        .ok_or(FeatureError::Silent)
}

/// Temporal activity against the median envelope level.
///
/// Components: `[activity, count, mean_db]` where `activity` is the fraction of envelope
/// frames more than 3 dB above background, `count` the number of such frames and
/// `mean_db` their mean excess level (0 when nothing is active).
pub fn temporal_activity(samples: &[f32]) -> Result<FeatureOutput, FeatureError> {
    let env_db: Vec<f64> = envelope(samples).into_iter().map(amplitude_to_db).collect();
    let background = median(&env_db).ok_or(FeatureError::EmptyChunk)?;

    let excess: Vec<f64> = env_db
        .iter()
        .map(|db| db - background)
        .filter(|&d| d > ACTIVITY_THRESHOLD_DB)
        .collect();

    let count = excess.len() as f64;
    let activity = count / env_db.len() as f64;
    let mean_db = mean(&excess).unwrap_or(0.0);
    Ok(FeatureOutput::Components(vec![activity, count, mean_db]))
}

/// Median of the amplitude envelope.
pub fn temporal_median(samples: &[f32]) -> Result<FeatureOutput, FeatureError> {
    median(&envelope(samples))
        .map(FeatureOutput::Scalar)
        .ok_or(FeatureError::EmptyChunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(n: usize, amplitude: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amplitude * (i as f32 * 0.05).sin())
            .collect()
    }

    #[test]
    fn test_envelope_frames() {
        let env = envelope(&vec![0.5; ENVELOPE_FRAME * 3 + 10]);
        assert_eq!(env.len(), 4);
        assert!(env.iter().all(|&a| (a - 0.5).abs() < 1e-9));
    }

    #[test]
    fn test_flat_signal_has_maximal_entropy() {
        let Ok(FeatureOutput::Scalar(h)) = temporal_entropy(&vec![0.25; ENVELOPE_FRAME * 8]) else {
            panic!("expected scalar");
        };
        assert!((h - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_burst_lowers_entropy() {
        let mut samples = vec![0.001f32; ENVELOPE_FRAME * 16];
        samples[ENVELOPE_FRAME * 4] = 0.9;
        let h = temporal_entropy(&samples).unwrap().select(0).unwrap();
        assert!(h < 0.6, "entropy {h}");
    }

    #[test]
    fn test_silence_is_an_error() {
        assert_eq!(
            temporal_entropy(&vec![0.0; ENVELOPE_FRAME * 4]),
            Err(FeatureError::Silent)
        );
    }

    #[test]
    fn test_activity_counts_loud_frames() {
        let mut samples = tone(ENVELOPE_FRAME * 10, 0.01);
        for s in &mut samples[ENVELOPE_FRAME * 2..ENVELOPE_FRAME * 4] {
            *s *= 50.0;
        }
        let out = temporal_activity(&samples).unwrap();
        assert_eq!(out.select(1), Some(2.0));
        assert!((out.select(0).unwrap() - 0.2).abs() < 1e-9);
        assert!(out.select(2).unwrap() > 30.0);
    }

    #[test]
    fn test_activity_of_steady_tone_is_zero() {
        let out = temporal_activity(&tone(ENVELOPE_FRAME * 10, 0.3)).unwrap();
        assert_eq!(out, FeatureOutput::Components(vec![0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_median_envelope() {
        let m = temporal_median(&tone(ENVELOPE_FRAME * 4, 0.5)).unwrap();
        let v = m.select(0).unwrap();
        assert!(v > 0.45 && v <= 0.5, "median {v}");
    }
}
