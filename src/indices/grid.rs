//! Partitioning of one file into equal, non-overlapping time chunks.

use std::ops::Range;

use thiserror::Error;

/// Guard for `floor(a / b)` when the ratio is exact in decimal but not in binary
/// (e.g. `0.3 / 0.1`). Far below one sample at any real sample rate.
const FLOOR_EPSILON: f64 = 1e-9;

/// File duration is outside the accepted tolerance of the nominal duration.
///
/// This is not a failure of the run: the caller records the file as skipped.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("duration {actual:.3}s outside tolerance ±{tolerance}s of expected {expected}s")]
pub struct DurationMismatch {
    pub actual: f64,
    pub expected: f64,
    pub tolerance: f64,
}

impl DurationMismatch {
    /// Short reason string stored alongside the skip marker.
    pub fn reason(&self) -> String {
        format!("duration_{}s", self.actual)
    }
}

/// Access past the end of a grid. Always a programming defect or malformed upstream data.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("chunk {index} out of bounds: {end} > {available}")]
pub struct ChunkOutOfBounds {
    pub index: usize,
    pub end: usize,
    pub available: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkGrid {
    pub n_chunks: usize,
    pub chunk_duration_sec: f64,
    pub timestamps: Vec<f64>,
}

/// Compute the chunk grid for a file of `total_duration_sec`.
///
/// Files within tolerance but shorter than nominal get fewer chunks, never chunks
/// that run past the available data.
pub fn compute_grid(
    total_duration_sec: f64,
    chunk_duration_sec: f64,
    expected_duration_sec: f64,
    tolerance_sec: f64,
) -> Result<ChunkGrid, DurationMismatch> {
    if !total_duration_sec.is_finite()
        || (total_duration_sec - expected_duration_sec).abs() > tolerance_sec
    {
        return Err(DurationMismatch {
            actual: total_duration_sec,
            expected: expected_duration_sec,
            tolerance: tolerance_sec,
        });
    }

    let expected_n = floor_ratio(expected_duration_sec, chunk_duration_sec);
    let available_n = floor_ratio(total_duration_sec, chunk_duration_sec);
    Ok(ChunkGrid::with_chunks(expected_n.min(available_n), chunk_duration_sec))
}

/// Per-domain grid parameters, fixed for a whole run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSettings {
    pub chunk_duration_sec: f64,
    pub expected_duration_sec: f64,
    pub tolerance_sec: f64,
}

impl GridSettings {
    pub fn grid_for(&self, total_duration_sec: f64) -> Result<ChunkGrid, DurationMismatch> {
        compute_grid(
            total_duration_sec,
            self.chunk_duration_sec,
            self.expected_duration_sec,
            self.tolerance_sec,
        )
    }

    pub fn nominal(&self) -> ChunkGrid {
        ChunkGrid::nominal(self.expected_duration_sec, self.chunk_duration_sec)
    }
}

fn floor_ratio(duration: f64, chunk: f64) -> usize {
    if chunk <= 0.0 || !chunk.is_finite() || duration <= 0.0 {
        return 0;
    }
    (duration / chunk + FLOOR_EPSILON).floor() as usize
}

impl ChunkGrid {
    pub fn with_chunks(n_chunks: usize, chunk_duration_sec: f64) -> Self {
        let timestamps = (0..n_chunks)
            .map(|i| i as f64 * chunk_duration_sec)
            .collect();
        Self {
            n_chunks,
            chunk_duration_sec,
            timestamps,
        }
    }

    /// Grid of a file of exactly the nominal duration.
    pub fn nominal(expected_duration_sec: f64, chunk_duration_sec: f64) -> Self {
        Self::with_chunks(
            floor_ratio(expected_duration_sec, chunk_duration_sec),
            chunk_duration_sec,
        )
    }

    /// Half-open range of chunk `index` in units of `unit_len` (samples or time bins),
    /// checked against the `available` length of the underlying buffer.
    pub fn bounds(
        &self,
        index: usize,
        unit_len: usize,
        available: usize,
    ) -> Result<Range<usize>, ChunkOutOfBounds> {
        let start = index * unit_len;
        let end = start + unit_len;
        if index >= self.n_chunks || end > available {
            return Err(ChunkOutOfBounds {
                index,
                end,
                available,
            });
        }
        Ok(start..end)
    }

    pub fn is_empty(&self) -> bool {
        self.n_chunks == 0
    }
}
