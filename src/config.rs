use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::indices::ProcessingDomain;
use crate::indices::registry::{
    DEFAULT_BAND, FrequencyBand, IndexSet, IndexSpec, ParamValue, Params, Processor,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML in {source_name}: {error}")]
    Parse {
        source_name: String,
        #[source]
        error: serde_yaml::Error,
    },
    #[error("Unknown processor: {0}")]
    UnknownProcessor(String),
    #[error("Index {index}: processor {processor} is not a {expected} processor")]
    WrongDomain {
        index: String,
        processor: String,
        expected: ProcessingDomain,
    },
    #[error("Index {index}: missing required parameter {param}")]
    MissingParameter { index: String, param: &'static str },
    #[error("Index {index}: invalid parameter {param}: {message}")]
    InvalidParameter {
        index: String,
        param: String,
        message: String,
    },
    #[error("Two {domain} indices resolve to the same storage name {name}")]
    DuplicatePersistenceName {
        name: String,
        domain: ProcessingDomain,
    },
    #[error("Index {index}: {message}")]
    InvalidEntry { index: String, message: String },
    #[error("No acoustic_indices.{0} section in configuration")]
    MissingDomain(ProcessingDomain),
    #[error("No {0} indices configured")]
    NoIndices(ProcessingDomain),
    #[error("Invalid {domain} chunk_duration_sec: {value}")]
    InvalidChunkDuration {
        domain: ProcessingDomain,
        value: f64,
    },
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

// ── Application config (TOML) ────────────────────────────────────────

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Recordings directory used when neither `--input` nor the processing config names one.
    pub input_directory: Option<PathBuf>,
    /// Threads used to compute the indices of one file. 0 = auto-detect (cores / 2, min 1).
    pub jobs: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            input_directory: None,
            jobs: 1,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/soundscape-indices/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                return Self::default();
            }
        };
        match toml::from_str::<AppConfig>(&contents) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve job count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_jobs(&self) -> usize {
        if self.jobs > 0 {
            self.jobs
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    let file_name = format!("{}.db", crate::APP_NAME);
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join(file_name)
    } else {
        PathBuf::from(file_name)
    }
}

// ── Processing config (YAML) ─────────────────────────────────────────

fn default_tolerance() -> f64 {
    2.0
}

fn default_estimate() -> f64 {
    4.0
}

/// One run's processing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub input_directory: Option<PathBuf>,
    pub sample_rate: u32,
    pub file_duration_sec: f64,
    #[serde(default = "default_tolerance")]
    pub duration_tolerance_sec: f64,
    /// Seconds per file assumed by dry-run estimates.
    #[serde(default = "default_estimate")]
    pub estimate_secs_per_file: f64,
    #[serde(default)]
    pub acoustic_indices: IndicesSection,
    /// File name the configuration was read from; recorded with stored configurations.
    #[serde(skip)]
    pub source: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndicesSection {
    pub temporal: Option<DomainSection>,
    pub spectral: Option<DomainSection>,
}

/// Settings of one domain: chunk duration plus index entries in either form.
#[derive(Debug, Clone, Deserialize)]
pub struct DomainSection {
    pub chunk_duration_sec: f64,
    /// Remaining keys, in file order: `enabled` (+ band settings) or named entries.
    #[serde(flatten)]
    pub entries: Mapping,
}

#[derive(Debug, Deserialize)]
struct NamedEntry {
    processor: String,
    #[serde(default)]
    params: Params,
}

impl ProcessingConfig {
    /// Read and fully validate a processing configuration, including every index entry.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let config = Self::from_yaml(&contents, &source)?;
        log::info!("Loaded processing config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(contents: &str, source: &str) -> Result<Self, ConfigError> {
        let mut config: ProcessingConfig =
            serde_yaml::from_str(contents).map_err(|error| ConfigError::Parse {
                source_name: source.to_string(),
                error,
            })?;
        config.source = source.to_string();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSetting("sample_rate must be positive".into()));
        }
        if !(self.file_duration_sec.is_finite() && self.file_duration_sec > 0.0) {
            return Err(ConfigError::InvalidSetting(format!(
                "file_duration_sec must be positive, got {}",
                self.file_duration_sec
            )));
        }
        if !(self.duration_tolerance_sec.is_finite() && self.duration_tolerance_sec >= 0.0) {
            return Err(ConfigError::InvalidSetting(format!(
                "duration_tolerance_sec must be non-negative, got {}",
                self.duration_tolerance_sec
            )));
        }
        for domain in ProcessingDomain::ALL {
            if let Some(section) = self.section(domain) {
                let chunk = section.chunk_duration_sec;
                if !(chunk.is_finite() && chunk > 0.0) {
                    return Err(ConfigError::InvalidChunkDuration { domain, value: chunk });
                }
                self.index_set(domain)?;
            }
        }
        Ok(())
    }

    fn section(&self, domain: ProcessingDomain) -> Option<&DomainSection> {
        match domain {
            ProcessingDomain::Temporal => self.acoustic_indices.temporal.as_ref(),
            ProcessingDomain::Spectral => self.acoustic_indices.spectral.as_ref(),
        }
    }

    pub fn domain_settings(&self, domain: ProcessingDomain) -> Result<&DomainSection, ConfigError> {
        self.section(domain).ok_or(ConfigError::MissingDomain(domain))
    }

    /// Validated index set of one domain, from whichever form the section uses.
    pub fn index_set(&self, domain: ProcessingDomain) -> Result<IndexSet, ConfigError> {
        let section = self.domain_settings(domain)?;
        let specs = if section.entries.contains_key("enabled") {
            parse_legacy(domain, &section.entries)?
        } else {
            parse_named(domain, &section.entries)?
        };
        if specs.is_empty() {
            return Err(ConfigError::NoIndices(domain));
        }
        IndexSet::new(domain, specs)
    }
}

/// Legacy form: `enabled: [processor, ...]` with global band settings.
fn parse_legacy(domain: ProcessingDomain, entries: &Mapping) -> Result<Vec<IndexSpec>, ConfigError> {
    let enabled: Vec<String> = entries
        .get("enabled")
        .cloned()
        .map(serde_yaml::from_value::<Vec<String>>)
        .transpose()
        .map_err(|e| ConfigError::InvalidEntry {
            index: "enabled".into(),
            message: e.to_string(),
        })?
        .unwrap_or_default();

    let band = FrequencyBand::new(
        band_setting(entries, "bioacoustics_freq_min")?.unwrap_or(DEFAULT_BAND.min),
        band_setting(entries, "bioacoustics_freq_max")?.unwrap_or(DEFAULT_BAND.max),
    );

    enabled
        .iter()
        .map(|identifier| {
            let processor: Processor = identifier.parse()?;
            let (cosmetic, params) = match processor {
                Processor::Bioacoustics => (
                    format!("standard_bai_{}", band.label()),
                    band_params(band, "freq_min", "freq_max"),
                ),
                Processor::Soundscape => (
                    format!("standard_soundscape_{}", band.label()),
                    band_params(band, "bioacoustic_freq_min", "bioacoustic_freq_max"),
                ),
                _ => (identifier.clone(), Params::new()),
            };
            IndexSpec::new(&cosmetic, identifier, params, domain)
        })
        .collect()
}

/// Named form: `cosmetic_name: {processor: ..., params: {...}}`. Scalar keys are ignored.
fn parse_named(domain: ProcessingDomain, entries: &Mapping) -> Result<Vec<IndexSpec>, ConfigError> {
    let mut specs = Vec::new();
    for (key, value) in entries {
        let Some(name) = key.as_str() else {
            return Err(ConfigError::InvalidEntry {
                index: format!("{key:?}"),
                message: "index names must be strings".into(),
            });
        };
        if !value.is_mapping() {
            log::debug!("Ignoring non-index key {name} in {domain} section");
            continue;
        }
        let entry: NamedEntry =
            serde_yaml::from_value(value.clone()).map_err(|e| ConfigError::InvalidEntry {
                index: name.to_string(),
                message: e.to_string(),
            })?;
        specs.push(IndexSpec::new(name, &entry.processor, entry.params, domain)?);
    }
    Ok(specs)
}

fn band_setting(entries: &Mapping, key: &str) -> Result<Option<f64>, ConfigError> {
    match entries.get(key) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(ConfigError::InvalidParameter {
            index: "enabled".into(),
            param: key.to_string(),
            message: format!("expected a number, got {other:?}"),
        }),
    }
}

fn band_params(band: FrequencyBand, min_key: &str, max_key: &str) -> Params {
    let mut params = Params::new();
    params.insert(min_key.to_string(), number_param(band.min));
    params.insert(max_key.to_string(), number_param(band.max));
    params
}

/// Integral values stay integers so legacy and named forms hash alike.
fn number_param(v: f64) -> ParamValue {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        ParamValue::Int(v as i64)
    } else {
        ParamValue::Float(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"
sample_rate: 48000
file_duration_sec: 900
acoustic_indices:
  temporal:
    chunk_duration_sec: 4.5
    enabled: [temporal_entropy, temporal_activity]
  spectral:
    chunk_duration_sec: 4.5
    bioacoustics_freq_min: 500
    bioacoustics_freq_max: 2000
    enabled: [acoustic_complexity_index, bioacoustics_index, soundscape_index]
"#;

    const NAMED: &str = r#"
database_path: audiomoth.db
sample_rate: 48000
file_duration_sec: 900
duration_tolerance_sec: 1.5
acoustic_indices:
  spectral:
    chunk_duration_sec: 4.5
    frog_bai:
      processor: bioacoustics_index
      params: { freq_min: 500, freq_max: 2000 }
    bird_bai:
      processor: bioacoustics_index
      params: { freq_min: 2000, freq_max: 8000 }
    aci:
      processor: acoustic_complexity_index
"#;

    #[test]
    fn test_legacy_form() {
        let config = ProcessingConfig::from_yaml(LEGACY, "legacy.yaml").unwrap();
        assert_eq!(config.duration_tolerance_sec, 2.0);
        assert_eq!(config.estimate_secs_per_file, 4.0);
        assert_eq!(config.source, "legacy.yaml");

        let temporal = config.index_set(ProcessingDomain::Temporal).unwrap();
        assert_eq!(
            temporal.persistence_names(),
            vec!["temporal_entropy", "temporal_activity"]
        );

        let spectral = config.index_set(ProcessingDomain::Spectral).unwrap();
        assert_eq!(
            spectral.persistence_names(),
            vec![
                "acoustic_complexity_index",
                "standard_bai_500-2000",
                "standard_soundscape_500-2000"
            ]
        );
    }

    #[test]
    fn test_legacy_band_defaults() {
        let yaml = r#"
sample_rate: 48000
file_duration_sec: 900
acoustic_indices:
  spectral:
    chunk_duration_sec: 4.5
    enabled: [bioacoustics_index]
"#;
        let config = ProcessingConfig::from_yaml(yaml, "x").unwrap();
        let set = config.index_set(ProcessingDomain::Spectral).unwrap();
        assert_eq!(set.persistence_names(), vec!["standard_bai_2000-8000"]);
    }

    #[test]
    fn test_named_form_keeps_file_order() {
        let config = ProcessingConfig::from_yaml(NAMED, "named.yaml").unwrap();
        assert_eq!(config.database_path, Some(PathBuf::from("audiomoth.db")));
        assert_eq!(config.duration_tolerance_sec, 1.5);

        let set = config.index_set(ProcessingDomain::Spectral).unwrap();
        assert_eq!(
            set.persistence_names(),
            vec!["frog_bai_500-2000", "bird_bai_2000-8000", "aci"]
        );
        assert!(matches!(
            config.index_set(ProcessingDomain::Temporal),
            Err(ConfigError::MissingDomain(ProcessingDomain::Temporal))
        ));
    }

    #[test]
    fn test_both_forms_produce_the_same_set() {
        let legacy = ProcessingConfig::from_yaml(LEGACY, "a").unwrap();
        let named = ProcessingConfig::from_yaml(
            r#"
sample_rate: 48000
file_duration_sec: 900
acoustic_indices:
  spectral:
    chunk_duration_sec: 4.5
    acoustic_complexity_index:
      processor: acoustic_complexity_index
    standard_bai_500-2000:
      processor: bioacoustics_index
      params: { freq_min: 500, freq_max: 2000 }
    standard_soundscape_500-2000:
      processor: soundscape_index
      params: { bioacoustic_freq_min: 500, bioacoustic_freq_max: 2000 }
"#,
            "b",
        )
        .unwrap();
        assert_eq!(
            legacy.index_set(ProcessingDomain::Spectral).unwrap(),
            named.index_set(ProcessingDomain::Spectral).unwrap()
        );
    }

    #[test]
    fn test_unknown_processor_fails_at_load() {
        let yaml = NAMED.replace("acoustic_complexity_index", "acoustic_complexity_indx");
        let err = ProcessingConfig::from_yaml(&yaml, "bad").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProcessor(ref p) if p == "acoustic_complexity_indx"));

        let err = ProcessingConfig::from_yaml(&LEGACY.replace("temporal_activity", "nope"), "bad")
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProcessor(_)));
    }

    #[test]
    fn test_wrong_domain_and_bad_chunk_duration() {
        let yaml = LEGACY.replace("[temporal_entropy, temporal_activity]", "[spectral_leq]");
        assert!(matches!(
            ProcessingConfig::from_yaml(&yaml, "x"),
            Err(ConfigError::WrongDomain { .. })
        ));

        let yaml = LEGACY.replacen("chunk_duration_sec: 4.5", "chunk_duration_sec: 0", 1);
        assert!(matches!(
            ProcessingConfig::from_yaml(&yaml, "x"),
            Err(ConfigError::InvalidChunkDuration { .. })
        ));
    }

    #[test]
    fn test_empty_section_has_no_indices() {
        let yaml = r#"
sample_rate: 48000
file_duration_sec: 900
acoustic_indices:
  temporal:
    chunk_duration_sec: 4.5
"#;
        assert!(matches!(
            ProcessingConfig::from_yaml(yaml, "x"),
            Err(ConfigError::NoIndices(ProcessingDomain::Temporal))
        ));
    }

    #[test]
    fn test_named_entry_without_processor() {
        let yaml = NAMED.replace("processor: acoustic_complexity_index", "params: {}");
        assert!(matches!(
            ProcessingConfig::from_yaml(&yaml, "x"),
            Err(ConfigError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn test_app_config_defaults_and_parse_failure() {
        let config = AppConfig::default();
        assert_eq!(config.jobs, 1);
        assert_eq!(config.resolve_jobs(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "db_path = \"/tmp/x.db\"\njobs = 4\n").unwrap();
        let config = AppConfig::load_from(&path);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(config.jobs, 4);

        std::fs::write(&path, "jobs = \"many\"").unwrap();
        assert_eq!(AppConfig::load_from(&path).jobs, 1);
    }

    #[test]
    fn test_load_records_file_name_as_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site_a.yaml");
        std::fs::write(&path, LEGACY).unwrap();
        assert_eq!(ProcessingConfig::load(&path).unwrap().source, "site_a.yaml");
        assert!(matches!(
            ProcessingConfig::load(&dir.path().join("missing.yaml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
