pub mod decode;
pub mod features;
pub mod grid;
pub mod registry;
pub mod spectral;
pub mod spectrogram;
pub mod temporal;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use grid::{ChunkGrid, ChunkOutOfBounds, DurationMismatch};
use registry::IndexSet;

pub use spectral::SpectralProcessor;
pub use temporal::TemporalProcessor;

/// Which representation of a recording an index is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingDomain {
    /// Decoded waveform.
    Temporal,
    /// Precomputed frequency × time array.
    Spectral,
}

impl ProcessingDomain {
    pub const ALL: [ProcessingDomain; 2] = [Self::Temporal, Self::Spectral];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Spectral => "spectral",
        }
    }
}

impl fmt::Display for ProcessingDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "temporal" => Ok(Self::Temporal),
            "spectral" => Ok(Self::Spectral),
            other => Err(format!("unknown processing domain: {other}")),
        }
    }
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Decode error: {0}")]
    Decode(#[from] decode::DecodeError),
    #[error("Spectrogram error: {0}")]
    Spectrogram(#[from] spectrogram::SpectrogramError),
    #[error("Sample rate {actual} Hz does not match configured {expected} Hz")]
    SampleRateMismatch { actual: u32, expected: u32 },
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error(transparent)]
    OutOfBounds(#[from] ChunkOutOfBounds),
    #[error(transparent)]
    Duration(#[from] DurationMismatch),
}

impl IndexError {
    /// Duration failures are recorded as skips, not errors.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Duration(_))
    }

    /// Reason stored with the skip marker, if this is a skip.
    pub fn skip_reason(&self) -> Option<String> {
        match self {
            Self::Duration(d) => Some(d.reason()),
            _ => None,
        }
    }
}

/// All index values of one file. Every sequence has `grid.n_chunks` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedIndices {
    pub grid: ChunkGrid,
    pub values: BTreeMap<String, Vec<f64>>,
}

impl ComputedIndices {
    pub fn get_chunk_timestamps(&self) -> &[f64] {
        &self.grid.timestamps
    }

    pub fn n_chunks(&self) -> usize {
        self.grid.n_chunks
    }
}

/// One processing domain's index computation over whole files.
///
/// Implementations hold only configuration, so one instance can be shared across the
/// threads of a rayon pool.
pub trait IndexProcessor: Send + Sync {
    fn domain(&self) -> ProcessingDomain;

    fn index_set(&self) -> &IndexSet;

    /// Persistence names of the configured indices, in configuration order.
    fn get_enabled_indices(&self) -> Vec<String> {
        self.index_set().persistence_names()
    }

    /// Grid of a file with exactly the nominal duration.
    fn nominal_grid(&self) -> ChunkGrid;

    fn process_file(&self, path: &Path) -> Result<ComputedIndices, IndexError>;
}

/// Build the processor for `domain` from a loaded processing configuration.
pub fn build_processor(
    config: &crate::config::ProcessingConfig,
    domain: ProcessingDomain,
) -> Result<Box<dyn IndexProcessor>, crate::config::ConfigError> {
    let settings = config.domain_settings(domain)?;
    let indices = config.index_set(domain)?;
    let grid = grid::GridSettings {
        chunk_duration_sec: settings.chunk_duration_sec,
        expected_duration_sec: config.file_duration_sec,
        tolerance_sec: config.duration_tolerance_sec,
    };
    Ok(match domain {
        ProcessingDomain::Temporal => {
            Box::new(TemporalProcessor::new(config.sample_rate, grid, indices))
        }
        ProcessingDomain::Spectral => Box::new(SpectralProcessor::new(grid, indices)),
    })
}
