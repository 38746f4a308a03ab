//! Named-index registry: processor identifiers, parameters and persistence names.
//!
//! Every configuration entry, legacy or named, ends up here as an [`IndexSpec`]. Unknown
//! processor identifiers and malformed parameters are rejected when the configuration is
//! loaded, so no file is touched with a configuration that would fail half-way.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ProcessingDomain;
use crate::config::ConfigError;

/// A scalar configuration parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

pub type Params = BTreeMap<String, ParamValue>;

/// Band used by the frequency-dependent processors when none is configured.
pub const DEFAULT_BAND: FrequencyBand = FrequencyBand {
    min: 2000.0,
    max: 8000.0,
};

const BAND_KEYS: [&str; 6] = [
    "freq_min",
    "freq_max",
    "bioacoustic_freq_min",
    "bioacoustic_freq_max",
    "anthropogenic_freq_min",
    "anthropogenic_freq_max",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyBand {
    pub min: f64,
    pub max: f64,
}

impl FrequencyBand {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `"{min}-{max}"` with both bounds truncated to integers.
    pub fn label(&self) -> String {
        format!("{}-{}", self.min as i64, self.max as i64)
    }

    pub fn contains(&self, freq: f64) -> bool {
        freq >= self.min && freq <= self.max
    }
}

/// Which component of `temporal_activity`'s output to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityComponent {
    #[default]
    Activity,
    Count,
    MeanDb,
}

impl ActivityComponent {
    pub fn position(self) -> usize {
        match self {
            Self::Activity => 0,
            Self::Count => 1,
            Self::MeanDb => 2,
        }
    }
}

impl FromStr for ActivityComponent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activity" => Ok(Self::Activity),
            "count" => Ok(Self::Count),
            "mean_db" => Ok(Self::MeanDb),
            other => Err(format!(
                "expected one of activity, count, mean_db; got {other:?}"
            )),
        }
    }
}

/// The closed set of per-chunk routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Processor {
    TemporalEntropy,
    TemporalActivity,
    TemporalMedian,
    MaadTemporalActivity,
    AcousticComplexity,
    AcousticDiversity,
    AcousticEvenness,
    Bioacoustics,
    FrequencyEntropy,
    SpectralEntropy,
    NumberOfPeaks,
    SpectralActivity,
    SpectralEvents,
    SpectralCover,
    Soundscape,
    AcousticGradient,
    SpectralLeq,
    MaadSpectralActivity,
}

impl Processor {
    pub const ALL: [Processor; 18] = [
        Self::TemporalEntropy,
        Self::TemporalActivity,
        Self::TemporalMedian,
        Self::MaadTemporalActivity,
        Self::AcousticComplexity,
        Self::AcousticDiversity,
        Self::AcousticEvenness,
        Self::Bioacoustics,
        Self::FrequencyEntropy,
        Self::SpectralEntropy,
        Self::NumberOfPeaks,
        Self::SpectralActivity,
        Self::SpectralEvents,
        Self::SpectralCover,
        Self::Soundscape,
        Self::AcousticGradient,
        Self::SpectralLeq,
        Self::MaadSpectralActivity,
    ];

    pub fn identifier(self) -> &'static str {
        match self {
            Self::TemporalEntropy => "temporal_entropy",
            Self::TemporalActivity => "temporal_activity",
            Self::TemporalMedian => "temporal_median",
            Self::MaadTemporalActivity => "maad_temporal_activity",
            Self::AcousticComplexity => "acoustic_complexity_index",
            Self::AcousticDiversity => "acoustic_diversity_index",
            Self::AcousticEvenness => "acoustic_eveness_index",
            Self::Bioacoustics => "bioacoustics_index",
            Self::FrequencyEntropy => "frequency_entropy",
            Self::SpectralEntropy => "spectral_entropy",
            Self::NumberOfPeaks => "number_of_peaks",
            Self::SpectralActivity => "spectral_activity",
            Self::SpectralEvents => "spectral_events",
            Self::SpectralCover => "spectral_cover",
            Self::Soundscape => "soundscape_index",
            Self::AcousticGradient => "acoustic_gradient_index",
            Self::SpectralLeq => "spectral_leq",
            Self::MaadSpectralActivity => "maad_spectral_activity",
        }
    }

    pub fn domain(self) -> ProcessingDomain {
        match self {
            Self::TemporalEntropy
            | Self::TemporalActivity
            | Self::TemporalMedian
            | Self::MaadTemporalActivity => ProcessingDomain::Temporal,
            _ => ProcessingDomain::Spectral,
        }
    }

    /// All processors of one domain, in declaration order.
    pub fn for_domain(domain: ProcessingDomain) -> impl Iterator<Item = Processor> {
        Self::ALL.into_iter().filter(move |p| p.domain() == domain)
    }

    /// Band this processor restricts itself to, if any. Never fails: non-numeric values fall
    /// back to defaults here and are rejected separately by [`Processor::validate_params`].
    pub fn band(self, params: &Params) -> Option<FrequencyBand> {
        match self {
            Self::Bioacoustics => Some(FrequencyBand::new(
                first_f64(params, &["freq_min", "bioacoustic_freq_min"]).unwrap_or(DEFAULT_BAND.min),
                first_f64(params, &["freq_max", "bioacoustic_freq_max"]).unwrap_or(DEFAULT_BAND.max),
            )),
            Self::Soundscape => Some(FrequencyBand::new(
                first_f64(params, &["bioacoustic_freq_min", "freq_min"]).unwrap_or(DEFAULT_BAND.min),
                first_f64(params, &["bioacoustic_freq_max", "freq_max"]).unwrap_or(DEFAULT_BAND.max),
            )),
            Self::MaadSpectralActivity => {
                match (param_f64(params, "freq_min"), param_f64(params, "freq_max")) {
                    (Some(min), Some(max)) => Some(FrequencyBand::new(min, max)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Anthropogenic band of `soundscape_index`: `0..bio_min` unless configured.
    pub fn anthropogenic_band(self, params: &Params) -> Option<FrequencyBand> {
        let bio = match self {
            Self::Soundscape => self.band(params)?,
            _ => return None,
        };
        Some(FrequencyBand::new(
            param_f64(params, "anthropogenic_freq_min").unwrap_or(0.0),
            param_f64(params, "anthropogenic_freq_max").unwrap_or(bio.min),
        ))
    }

    /// `return_value` selection for `temporal_activity`.
    pub fn activity_component(self, params: &Params) -> ActivityComponent {
        match self {
            Self::TemporalActivity => params
                .get("return_value")
                .and_then(ParamValue::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            _ => ActivityComponent::Activity,
        }
    }

    /// Strict parameter validation, run once at configuration load.
    pub fn validate_params(self, index: &str, params: &Params) -> Result<(), ConfigError> {
        for key in BAND_KEYS {
            if let Some(value) = params.get(key) {
                if value.as_f64().is_none() {
                    return Err(ConfigError::InvalidParameter {
                        index: index.to_string(),
                        param: key.to_string(),
                        message: format!("expected a number, got {value:?}"),
                    });
                }
            }
        }

        if self == Self::MaadSpectralActivity {
            match (params.contains_key("freq_min"), params.contains_key("freq_max")) {
                (true, false) => {
                    return Err(ConfigError::MissingParameter {
                        index: index.to_string(),
                        param: "freq_max",
                    });
                }
                (false, true) => {
                    return Err(ConfigError::MissingParameter {
                        index: index.to_string(),
                        param: "freq_min",
                    });
                }
                _ => {}
            }
        }

        let bands = [self.band(params), self.anthropogenic_band(params)];
        for band in bands.into_iter().flatten() {
            if band.min < 0.0 || band.min >= band.max {
                return Err(ConfigError::InvalidParameter {
                    index: index.to_string(),
                    param: "freq_min".to_string(),
                    message: format!("empty or negative band {}", band.label()),
                });
            }
        }

        if self == Self::TemporalActivity {
            if let Some(value) = params.get("return_value") {
                let parsed = value
                    .as_str()
                    .ok_or_else(|| format!("expected a string, got {value:?}"))
                    .and_then(|s| s.parse::<ActivityComponent>());
                if let Err(message) = parsed {
                    return Err(ConfigError::InvalidParameter {
                        index: index.to_string(),
                        param: "return_value".to_string(),
                        message,
                    });
                }
            }
        }

        for key in params.keys() {
            if !BAND_KEYS.contains(&key.as_str()) && key != "return_value" {
                log::warn!(
                    "Index {}: parameter {:?} is not used by {}",
                    index,
                    key,
                    self.identifier()
                );
            }
        }

        Ok(())
    }
}

impl FromStr for Processor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.identifier() == s)
            .ok_or_else(|| ConfigError::UnknownProcessor(s.to_string()))
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

fn param_f64(params: &Params, key: &str) -> Option<f64> {
    params.get(key).and_then(ParamValue::as_f64)
}

fn first_f64(params: &Params, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| param_f64(params, k))
}

/// Storage name for an index whose processor is already known.
pub fn persistence_name(cosmetic_name: &str, processor: Processor, params: &Params) -> String {
    match processor.band(params) {
        Some(band) => {
            let label = band.label();
            if cosmetic_name.contains(&label) {
                cosmetic_name.to_string()
            } else {
                format!("{cosmetic_name}_{label}")
            }
        }
        None => cosmetic_name.to_string(),
    }
}

/// Resolve a configuration entry to its collision-safe storage name.
///
/// Pure; fails only on an unrecognised processor identifier.
pub fn resolve(
    cosmetic_name: &str,
    processor_identifier: &str,
    params: &Params,
) -> Result<String, ConfigError> {
    let processor: Processor = processor_identifier.parse()?;
    Ok(persistence_name(cosmetic_name, processor, params))
}

/// One fully resolved and validated index configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub cosmetic_name: String,
    pub persistence_name: String,
    pub processor: Processor,
    pub params: Params,
    pub domain: ProcessingDomain,
}

impl IndexSpec {
    pub fn new(
        cosmetic_name: &str,
        processor_identifier: &str,
        params: Params,
        domain: ProcessingDomain,
    ) -> Result<Self, ConfigError> {
        let processor: Processor = processor_identifier.parse()?;
        if processor.domain() != domain {
            return Err(ConfigError::WrongDomain {
                index: cosmetic_name.to_string(),
                processor: processor.identifier().to_string(),
                expected: domain,
            });
        }
        processor.validate_params(cosmetic_name, &params)?;

        Ok(Self {
            cosmetic_name: cosmetic_name.to_string(),
            persistence_name: persistence_name(cosmetic_name, processor, &params),
            processor,
            params,
            domain,
        })
    }

    /// Canonical JSON fragment used for provenance and duplicate detection.
    /// Keys are sorted (serde_json maps are ordered), so equal configs hash equally.
    pub fn config_fragment(&self) -> serde_json::Value {
        serde_json::json!({
            "processor": self.processor.identifier(),
            "params": self.params,
            "processing_type": self.domain.as_str(),
        })
    }
}

/// The validated set of indices one processor computes, in configuration order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSet {
    domain: ProcessingDomain,
    specs: Vec<IndexSpec>,
}

impl IndexSet {
    pub fn new(domain: ProcessingDomain, specs: Vec<IndexSpec>) -> Result<Self, ConfigError> {
        {
            let mut seen = HashSet::new();
            for spec in &specs {
                if !seen.insert(spec.persistence_name.as_str()) {
                    return Err(ConfigError::DuplicatePersistenceName {
                        name: spec.persistence_name.clone(),
                        domain,
                    });
                }
            }
        }
        Ok(Self { domain, specs })
    }

    pub fn domain(&self) -> ProcessingDomain {
        self.domain
    }

    pub fn specs(&self) -> &[IndexSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn persistence_names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.persistence_name.clone()).collect()
    }
}
