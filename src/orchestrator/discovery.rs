use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::OrchestratorError;
use crate::indices::ProcessingDomain;
use crate::indices::spectrogram::SPECTROGRAM_SUFFIX;

/// Whether `path` is an input of `domain`: a `.wav` recording (any case) or a
/// `*_spec.npz` spectrogram container.
pub fn is_input(path: &Path, domain: ProcessingDomain) -> bool {
    match domain {
        ProcessingDomain::Temporal => path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav")),
        ProcessingDomain::Spectral => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(SPECTROGRAM_SUFFIX)),
    }
}

/// All inputs of `domain` below `root`, sorted by full path.
///
/// The order is what shard assignment is based on, so every worker must see the same listing.
/// An entry that cannot be read fails the whole listing instead of shifting later positions.
pub fn discover_files(root: &Path, domain: ProcessingDomain) -> Result<Vec<PathBuf>, OrchestratorError> {
    if !root.is_dir() {
        return Err(OrchestratorError::InputDirectory(root.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry?;
        if entry.file_type().is_file() && is_input(entry.path(), domain) {
            files.push(entry.into_path());
        }
    }
    files.sort();

    log::info!("Found {} {} input file(s) in {}", files.len(), domain, root.display());
    Ok(files)
}
