//! NPZ spectrogram containers written by the spectrogram pipeline.
//!
//! Entries are plain `.npy` arrays; scalars are stored as one-element vectors. Names are
//! matched with or without the `.npy` suffix, since writers differ on that.

use std::fs::File;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Ix1};
use ndarray_npy::{NpzReader, ReadNpzError, ReadableElement};
use thiserror::Error;

/// Suffix that marks a spectrogram container next to its recording.
pub const SPECTROGRAM_SUFFIX: &str = "_spec.npz";

pub const REQUIRED_FIELDS: [&str; 10] = [
    "spec",
    "fn",
    "time_bins",
    "sample_rate",
    "n_fft",
    "hop_length",
    "n_mels",
    "power",
    "db_scale",
    "normalization",
];

#[derive(Error, Debug)]
pub enum SpectrogramError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("NPZ read error in {field}: {source}")]
    Read {
        field: String,
        #[source]
        source: ReadNpzError,
    },
    #[error("NPZ container error: {0}")]
    Container(#[from] ReadNpzError),
    #[error("Missing required fields: {0}")]
    MissingFields(String),
    #[error("Invalid spectrogram: {0}")]
    Invalid(String),
}

/// A mel spectrogram in dB with its axes and generation parameters.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// `[frequency bins, time bins]`, dB.
    pub spec: Array2<f32>,
    /// Centre frequency of every row, Hz.
    pub frequencies: Vec<f32>,
    /// Centre time of every column, seconds.
    pub time_bins: Vec<f64>,
    pub sample_rate: u32,
    pub n_fft: u32,
    pub hop_length: u32,
    pub n_mels: usize,
    pub power: f32,
    pub db_scale: bool,
    pub normalization: bool,
}

impl Spectrogram {
    pub fn n_freq_bins(&self) -> usize {
        self.spec.nrows()
    }

    pub fn n_time_bins(&self) -> usize {
        self.spec.ncols()
    }

    /// Seconds between consecutive columns.
    pub fn time_step(&self) -> f64 {
        self.hop_length as f64 / self.sample_rate as f64
    }

    /// Duration of the source recording covered by the columns.
    pub fn duration_sec(&self) -> f64 {
        self.n_time_bins() as f64 * self.time_step()
    }

    /// Shape and parameter consistency.
    pub fn validate(&self) -> Result<(), SpectrogramError> {
        if self.sample_rate == 0 || self.hop_length == 0 {
            return Err(SpectrogramError::Invalid(format!(
                "sample_rate {} and hop_length {} must be positive",
                self.sample_rate, self.hop_length
            )));
        }
        if self.frequencies.len() != self.n_freq_bins() {
            return Err(SpectrogramError::Invalid(format!(
                "frequency vector length {} != spectrogram height {}",
                self.frequencies.len(),
                self.n_freq_bins()
            )));
        }
        if self.time_bins.len() != self.n_time_bins() {
            return Err(SpectrogramError::Invalid(format!(
                "time vector length {} != spectrogram width {}",
                self.time_bins.len(),
                self.n_time_bins()
            )));
        }
        if self.n_mels != self.n_freq_bins() {
            return Err(SpectrogramError::Invalid(format!(
                "n_mels {} != spectrogram height {}",
                self.n_mels,
                self.n_freq_bins()
            )));
        }
        Ok(())
    }
}

/// Load and validate a spectrogram container.
pub fn load_spectrogram(path: &Path) -> Result<Spectrogram, SpectrogramError> {
    let mut npz = NpzReader::new(File::open(path)?)?;
    let names = npz.names()?;

    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|f| entry_name(&names, f).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(SpectrogramError::MissingFields(missing.join(", ")));
    }

    let spec: Array2<f32> = read(&mut npz, &names, "spec")?;
    let frequencies: Array1<f32> = read(&mut npz, &names, "fn")?;
    let time_bins: Array1<f64> = read(&mut npz, &names, "time_bins")?;

    let spectrogram = Spectrogram {
        spec,
        frequencies: frequencies.to_vec(),
        time_bins: time_bins.to_vec(),
        sample_rate: positive_u32(read_scalar::<i32>(&mut npz, &names, "sample_rate")?, "sample_rate")?,
        n_fft: positive_u32(read_scalar::<i32>(&mut npz, &names, "n_fft")?, "n_fft")?,
        hop_length: positive_u32(read_scalar::<i32>(&mut npz, &names, "hop_length")?, "hop_length")?,
        n_mels: positive_u32(read_scalar::<i32>(&mut npz, &names, "n_mels")?, "n_mels")? as usize,
        power: read_scalar::<f32>(&mut npz, &names, "power")?,
        db_scale: read_scalar::<bool>(&mut npz, &names, "db_scale")?,
        normalization: read_scalar::<bool>(&mut npz, &names, "normalization")?,
    };
    spectrogram.validate()?;

    log::debug!(
        "Loaded {}: {}x{} bins, hop {} at {} Hz",
        path.display(),
        spectrogram.n_freq_bins(),
        spectrogram.n_time_bins(),
        spectrogram.hop_length,
        spectrogram.sample_rate
    );
    Ok(spectrogram)
}

/// Recording a container was generated from: `<stem>_spec.npz` → `<stem>.WAV`.
pub fn recording_path(spectrogram_path: &Path) -> Option<PathBuf> {
    let name = spectrogram_path.file_name()?.to_str()?;
    let stem = name.strip_suffix(SPECTROGRAM_SUFFIX)?;
    Some(spectrogram_path.with_file_name(format!("{stem}.WAV")))
}

fn entry_name<'a>(names: &'a [String], field: &str) -> Option<&'a str> {
    names
        .iter()
        .map(String::as_str)
        .find(|n| *n == field || n.strip_suffix(".npy") == Some(field))
}

fn read<A, D>(
    npz: &mut NpzReader<File>,
    names: &[String],
    field: &str,
) -> Result<ndarray::Array<A, D>, SpectrogramError>
where
    A: ReadableElement,
    D: ndarray::Dimension,
{
    let name = entry_name(names, field)
        .ok_or_else(|| SpectrogramError::MissingFields(field.to_string()))?;
    npz.by_name(name).map_err(|source| SpectrogramError::Read {
        field: field.to_string(),
        source,
    })
}

fn read_scalar<A: ReadableElement + Copy>(
    npz: &mut NpzReader<File>,
    names: &[String],
    field: &str,
) -> Result<A, SpectrogramError> {
    let values: ndarray::Array<A, Ix1> = read(npz, names, field)?;
    values
        .first()
        .copied()
        .ok_or_else(|| SpectrogramError::Invalid(format!("{field} is empty")))
}

fn positive_u32(value: i32, field: &str) -> Result<u32, SpectrogramError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| SpectrogramError::Invalid(format!("{field} must be positive, got {value}")))
}
