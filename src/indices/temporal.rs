use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

use rayon::prelude::*;

use super::decode::{self, MonoAudio};
use super::features::{chunk_value, compute_temporal, selected_component};
use super::grid::{ChunkGrid, GridSettings};
use super::registry::IndexSet;
use super::{ComputedIndices, IndexError, IndexProcessor, ProcessingDomain};

/// Computes waveform indices from WAV recordings at one fixed sample rate.
#[derive(Debug, Clone)]
pub struct TemporalProcessor {
    sample_rate: u32,
    grid: GridSettings,
    indices: IndexSet,
}

impl TemporalProcessor {
    pub fn new(sample_rate: u32, grid: GridSettings, indices: IndexSet) -> Self {
        Self {
            sample_rate,
            grid,
            indices,
        }
    }

    pub fn samples_per_chunk(&self) -> usize {
        (self.sample_rate as f64 * self.grid.chunk_duration_sec).floor() as usize
    }

    /// Compute every configured index over already-decoded audio.
    pub fn process_audio(&self, audio: &MonoAudio) -> Result<ComputedIndices, IndexError> {
        if audio.sample_rate != self.sample_rate {
            return Err(IndexError::SampleRateMismatch {
                actual: audio.sample_rate,
                expected: self.sample_rate,
            });
        }

        let grid = self.grid.grid_for(audio.duration_sec())?;
        let spc = self.samples_per_chunk();
        if spc == 0 && !grid.is_empty() {
            return Err(IndexError::ShapeMismatch(format!(
                "chunk of {}s holds no samples at {} Hz",
                self.grid.chunk_duration_sec, self.sample_rate
            )));
        }

        // Every slice is checked before any routine runs
        let ranges: Vec<Range<usize>> = (0..grid.n_chunks)
            .map(|i| grid.bounds(i, spc, audio.samples.len()))
            .collect::<Result<_, _>>()?;

        let values: BTreeMap<String, Vec<f64>> = self
            .indices
            .specs()
            .par_iter()
            .map(|spec| {
                let position = selected_component(spec.processor, &spec.params);
                let series = ranges
                    .iter()
                    .enumerate()
                    .map(|(i, range)| {
                        let result =
                            compute_temporal(spec.processor, &audio.samples[range.clone()]);
                        chunk_value(result, position, &spec.persistence_name, i)
                    })
                    .collect();
                (spec.persistence_name.clone(), series)
            })
            .collect();

        Ok(ComputedIndices { grid, values })
    }
}

impl IndexProcessor for TemporalProcessor {
    fn domain(&self) -> ProcessingDomain {
        ProcessingDomain::Temporal
    }

    fn index_set(&self) -> &IndexSet {
        &self.indices
    }

    fn nominal_grid(&self) -> ChunkGrid {
        self.grid.nominal()
    }

    fn process_file(&self, path: &Path) -> Result<ComputedIndices, IndexError> {
        let audio = decode::load_audio(path)?;
        self.process_audio(&audio)
    }
}
