use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;

use ndarray::s;
use rayon::prelude::*;

use super::features::{SpectralContext, chunk_value, compute_spectral, selected_component};
use super::grid::{ChunkGrid, GridSettings};
use super::registry::IndexSet;
use super::spectrogram::{self, Spectrogram};
use super::{ComputedIndices, IndexError, IndexProcessor, ProcessingDomain};

/// Computes spectral indices from NPZ spectrogram containers.
///
/// Chunk width is recomputed per file from the container's actual number of time bins,
/// since time resolution may differ slightly between files.
#[derive(Debug, Clone)]
pub struct SpectralProcessor {
    grid: GridSettings,
    indices: IndexSet,
}

impl SpectralProcessor {
    pub fn new(grid: GridSettings, indices: IndexSet) -> Self {
        Self { grid, indices }
    }

    pub fn process_spectrogram(&self, data: &Spectrogram) -> Result<ComputedIndices, IndexError> {
        if data.frequencies.len() != data.n_freq_bins() {
            return Err(IndexError::ShapeMismatch(format!(
                "frequency vector length {} != {} frequency bins",
                data.frequencies.len(),
                data.n_freq_bins()
            )));
        }

        let grid = self.grid.grid_for(data.duration_sec())?;
        let time_bins = data.n_time_bins();
        let width = if grid.is_empty() {
            0
        } else {
            time_bins / grid.n_chunks
        };
        if width == 0 && !grid.is_empty() {
            return Err(IndexError::ShapeMismatch(format!(
                "{} time bins cannot hold {} chunks",
                time_bins, grid.n_chunks
            )));
        }

        let ranges: Vec<Range<usize>> = (0..grid.n_chunks)
            .map(|i| grid.bounds(i, width, time_bins))
            .collect::<Result<_, _>>()?;

        let ctx = SpectralContext {
            frequencies: &data.frequencies,
            time_step: data.time_step(),
        };

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
                        let chunk = data.spec.slice(s![.., range.clone()]);
                        let result = compute_spectral(spec.processor, &spec.params, chunk, &ctx);
                        chunk_value(result, position, &spec.persistence_name, i)
                    })
                    .collect();
                (spec.persistence_name.clone(), series)
            })
            .collect();

        Ok(ComputedIndices { grid, values })
    }
}

impl IndexProcessor for SpectralProcessor {
    fn domain(&self) -> ProcessingDomain {
        ProcessingDomain::Spectral
    }

    fn index_set(&self) -> &IndexSet {
        &self.indices
    }

    fn nominal_grid(&self) -> ChunkGrid {
        self.grid.nominal()
    }

    fn process_file(&self, path: &Path) -> Result<ComputedIndices, IndexError> {
        let data = spectrogram::load_spectrogram(path)?;
        self.process_spectrogram(&data)
    }
}
