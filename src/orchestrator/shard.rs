use std::path::PathBuf;

use super::OrchestratorError;

/// Number of shards a file list is split into.
pub const SHARD_COUNT: usize = 10;

/// Shard of the file at position `index` of the sorted listing.
pub fn shard_of(index: usize) -> usize {
    index % SHARD_COUNT
}

/// Files belonging to any of `targets`. An empty target list selects every shard.
pub fn filter_by_shards(
    files: &[PathBuf],
    targets: &[usize],
) -> Result<Vec<PathBuf>, OrchestratorError> {
    if let Some(&bad) = targets.iter().find(|&&t| t >= SHARD_COUNT) {
        return Err(OrchestratorError::InvalidShard(bad));
    }
    if targets.is_empty() {
        return Ok(files.to_vec());
    }

    Ok(files
        .iter()
        .enumerate()
        .filter(|(i, _)| targets.contains(&shard_of(*i)))
        .map(|(_, f)| f.clone())
        .collect())
}
