use crate::indices::ProcessingDomain;

/// A recording row read from `audio_files`.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub id: i64,
    pub filename: String,
    pub filepath: String,
    pub duration_seconds: Option<f64>,
    pub samplerate_hz: Option<i64>,
}

/// A pass over one domain rejected the recording.
#[derive(Debug, Clone, PartialEq)]
pub struct SkipMark {
    pub domain: String,
    pub reason: String,
    pub skipped_at: String,
}

/// One stored value, as shown by `show`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub index_name: String,
    pub chunk_index: i64,
    pub start_time_sec: f64,
    pub value: f64,
    pub domain: String,
    pub computed_at: String,
}

/// Row and file counts of one stored index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStat {
    pub domain: String,
    pub index_name: String,
    pub rows: i64,
    pub files: i64,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
}

/// Summary statistics of the store.
#[derive(Debug, Default)]
pub struct StoreStats {
    pub recordings: i64,
    pub skipped_recordings: i64,
    pub files_with_indices: i64,
    pub total_rows: i64,
    pub temporal_rows: i64,
    pub spectral_rows: i64,
    pub per_index: Vec<IndexStat>,
}

impl StoreStats {
    pub fn rows_for(&self, domain: ProcessingDomain) -> i64 {
        match domain {
            ProcessingDomain::Temporal => self.temporal_rows,
            ProcessingDomain::Spectral => self.spectral_rows,
        }
    }
}

/// A registered index configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredConfiguration {
    pub id: i64,
    pub config_source: String,
    pub index_name: String,
    pub cosmetic_name: String,
    pub processor: String,
    pub processing_domain: String,
    /// Canonical JSON `{params, processing_type, processor}`.
    pub config_fragment: String,
    pub content_hash: String,
    pub created_at: String,
}
