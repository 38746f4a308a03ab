//! Per-chunk acoustic feature routines.
//!
//! Each [`Processor`] maps to one routine. A routine returns either a scalar or a list of
//! components; [`selected_component`] documents which component is stored. Whatever the
//! routine does, [`chunk_value`] turns its result into a finite `f64`: a malformed chunk
//! must never abort a multi-hour file.

pub mod spectral;
pub mod temporal;

use ndarray::ArrayView2;
use thiserror::Error;

use super::registry::{Params, Processor};

/// Value stored when a routine fails or yields a non-finite result.
pub const FALLBACK_VALUE: f64 = 0.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("empty chunk")]
    EmptyChunk,
    #[error("no frequency bins in band {0}")]
    EmptyBand(String),
    #[error("no signal energy")]
    Silent,
    #[error("{0} is not a {1} routine")]
    WrongDomain(Processor, &'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOutput {
    Scalar(f64),
    Components(Vec<f64>),
}

impl FeatureOutput {
    /// Pick the stored value. Scalars ignore `position`.
    pub fn select(&self, position: usize) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Components(values) => values.get(position).copied(),
        }
    }
}

/// Per-file context the spectral routines need besides the chunk itself.
#[derive(Debug, Clone, Copy)]
pub struct SpectralContext<'a> {
    /// Centre frequency (Hz) of every row of the spectrogram.
    pub frequencies: &'a [f32],
    /// Seconds between two consecutive time bins.
    pub time_step: f64,
}

/// Component of a routine's output that is persisted.
///
/// - `temporal_activity`: `[activity, count, mean_db]`, chosen by `return_value`
/// - `acoustic_complexity_index`: `[mean_per_bin, sum]`, sum
/// - `frequency_entropy`: `[entropy_of_mean_spectrum, mean_frame_entropy]`, mean frame entropy
/// - `spectral_entropy`: `[eas, ecu, ecv, eps]`, ECU
/// - everything else: first component
pub fn selected_component(processor: Processor, params: &Params) -> usize {
    match processor {
        Processor::TemporalActivity => processor.activity_component(params).position(),
        Processor::AcousticComplexity
        | Processor::FrequencyEntropy
        | Processor::SpectralEntropy => 1,
        _ => 0,
    }
}

pub fn compute_temporal(
    processor: Processor,
    chunk: &[f32],
) -> Result<FeatureOutput, FeatureError> {
    if chunk.is_empty() {
        return Err(FeatureError::EmptyChunk);
    }
    match processor {
        Processor::TemporalEntropy => temporal::temporal_entropy(chunk),
        Processor::TemporalActivity | Processor::MaadTemporalActivity => {
            temporal::temporal_activity(chunk)
        }
        Processor::TemporalMedian => temporal::temporal_median(chunk),
        other => Err(FeatureError::WrongDomain(other, "temporal")),
    }
}

pub fn compute_spectral(
    processor: Processor,
    params: &Params,
    chunk: ArrayView2<'_, f32>,
    ctx: &SpectralContext<'_>,
) -> Result<FeatureOutput, FeatureError> {
    if chunk.is_empty() {
        return Err(FeatureError::EmptyChunk);
    }
    match processor {
        Processor::AcousticComplexity => spectral::acoustic_complexity(chunk),
        Processor::AcousticDiversity => spectral::acoustic_diversity(chunk, ctx),
        Processor::AcousticEvenness => spectral::acoustic_evenness(chunk, ctx),
        Processor::Bioacoustics => {
            let band = processor
                .band(params)
                .unwrap_or(super::registry::DEFAULT_BAND);
            spectral::bioacoustics(chunk, ctx, band)
        }
        Processor::FrequencyEntropy => spectral::frequency_entropy(chunk),
        Processor::SpectralEntropy => spectral::spectral_entropy(chunk),
        Processor::NumberOfPeaks => spectral::number_of_peaks(chunk, ctx),
        Processor::SpectralActivity => spectral::spectral_activity(chunk),
        Processor::SpectralEvents => spectral::spectral_events(chunk, ctx),
        Processor::SpectralCover => spectral::spectral_cover(chunk, ctx),
        Processor::Soundscape => {
            let bio = processor
                .band(params)
                .unwrap_or(super::registry::DEFAULT_BAND);
            let anthro = processor
                .anthropogenic_band(params)
                .unwrap_or(super::registry::FrequencyBand::new(0.0, bio.min));
            spectral::soundscape(chunk, ctx, bio, anthro)
        }
        Processor::AcousticGradient => spectral::acoustic_gradient(chunk, ctx),
        Processor::SpectralLeq => spectral::spectral_leq(chunk),
        Processor::MaadSpectralActivity => match processor.band(params) {
            Some(band) => spectral::band_activity(chunk, ctx, band),
            None => spectral::spectral_activity(chunk),
        },
        other => Err(FeatureError::WrongDomain(other, "spectral")),
    }
}

/// Reduce a routine result to the stored value, substituting [`FALLBACK_VALUE`] for
/// failures, missing components and NaN/inf.
pub fn chunk_value(
    result: Result<FeatureOutput, FeatureError>,
    position: usize,
    index_name: &str,
    chunk_index: usize,
) -> f64 {
    match result {
        Ok(output) => match output.select(position) {
            Some(v) if v.is_finite() => v,
            Some(v) => {
                log::debug!("{index_name}[{chunk_index}]: non-finite value {v}, using fallback");
                FALLBACK_VALUE
            }
            None => {
                log::debug!("{index_name}[{chunk_index}]: missing component {position}, using fallback");
                FALLBACK_VALUE
            }
        },
        Err(e) => {
            log::debug!("{index_name}[{chunk_index}]: {e}, using fallback");
            FALLBACK_VALUE
        }
    }
}

// ── Shared numeric helpers ────────────────────────────────────────────

/// Shannon entropy (bits) of a non-negative distribution, normalised by `log2(n)` to 0..1.
/// `None` when the distribution has no mass.
pub(crate) fn normalized_entropy(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let values: Vec<f64> = values.into_iter().map(|v| v.max(0.0)).collect();
    let total: f64 = values.iter().sum();
    if values.len() < 2 || total <= 0.0 || !total.is_finite() {
        return None;
    }
    let h: f64 = values
        .iter()
        .filter(|&&v| v > 0.0)
        .map(|&v| {
            let p = v / total;
            -p * p.log2()
        })
        .sum();
    Some(h / (values.len() as f64).log2())
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub(crate) fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Gini coefficient of a non-negative distribution: 0 = perfectly even.
pub(crate) fn gini(values: &[f64]) -> Option<f64> {
    let total: f64 = values.iter().sum();
    if values.is_empty() || total <= 0.0 {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len() as f64;
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64 + 1.0) * v)
        .sum();
    Some(2.0 * weighted / (n * total) - (n + 1.0) / n)
}

pub(crate) fn db_to_power(db: f32) -> f64 {
    10f64.powf(db as f64 / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indices::registry::ParamValue;

    #[test]
    fn test_chunk_value_coerces_non_finite() {
        assert_eq!(chunk_value(Ok(FeatureOutput::Scalar(f64::NAN)), 0, "x", 0), 0.0);
        assert_eq!(
            chunk_value(Ok(FeatureOutput::Scalar(f64::INFINITY)), 0, "x", 0),
            0.0
        );
        assert_eq!(chunk_value(Err(FeatureError::Silent), 0, "x", 0), 0.0);
        assert_eq!(
            chunk_value(Ok(FeatureOutput::Components(vec![1.0])), 3, "x", 0),
            0.0
        );
        assert_eq!(
            chunk_value(Ok(FeatureOutput::Components(vec![1.0, 2.5])), 1, "x", 0),
            2.5
        );
    }

    #[test]
    fn test_selected_component() {
        let mut params = Params::new();
        assert_eq!(selected_component(Processor::TemporalActivity, &params), 0);
        params.insert("return_value".into(), ParamValue::Str("count".into()));
        assert_eq!(selected_component(Processor::TemporalActivity, &params), 1);
        assert_eq!(selected_component(Processor::AcousticComplexity, &params), 1);
        assert_eq!(selected_component(Processor::Soundscape, &params), 0);
    }

    #[test]
    fn test_wrong_domain_dispatch_is_an_error() {
        let err = compute_temporal(Processor::SpectralLeq, &[0.1, 0.2]).unwrap_err();
        assert!(matches!(err, FeatureError::WrongDomain(Processor::SpectralLeq, _)));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(normalized_entropy([1.0, 1.0, 1.0, 1.0]), Some(1.0));
        assert_eq!(normalized_entropy([0.0, 0.0]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(gini(&[1.0, 1.0, 1.0]), Some(0.0));
        assert!(gini(&[0.0, 0.0, 10.0]).unwrap() > 0.6);
        assert!((db_to_power(10.0) - 10.0).abs() < 1e-9);
    }
}
