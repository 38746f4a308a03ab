//! Sharded, resumable index computation over a directory of recordings.
//!
//! Every worker process lists the same inputs, takes the files of its shard(s) and walks them
//! in order. All store state needed to decide what to do with a file is loaded in bulk before
//! the loop, so a re-run over a finished shard does no per-file store queries.

pub mod discovery;
pub mod lock;
pub mod report;
pub mod shard;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::ThreadPool;
use thiserror::Error;

use crate::config::{ConfigError, ProcessingConfig};
use crate::db::queries::{IndexValues, path_key};
use crate::db::{Database, DbError};
use crate::indices::spectrogram::recording_path;
use crate::indices::{IndexProcessor, ProcessingDomain, build_processor};

pub use discovery::discover_files;
pub use lock::FileLockGuard;
pub use report::{DryRunReport, FileOutcome, RunSummary};
pub use shard::{SHARD_COUNT, filter_by_shards, shard_of};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Input directory not found: {}", .0.display())]
    InputDirectory(PathBuf),
    #[error("Cannot list input directory: {0}")]
    Listing(#[from] walkdir::Error),
    #[error("Shard target {0} is outside 0..{max}", max = SHARD_COUNT)]
    InvalidShard(usize),
    #[error("Cannot build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Options of one pass.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Shards to process. Empty means all of them.
    pub targets: Vec<usize>,
    /// Recompute files whose indices are already stored, and retry skipped files.
    pub force: bool,
    pub dry_run: bool,
    /// Retry recordings an earlier pass marked as skipped.
    pub retry_skipped: bool,
    /// Threads computing the indices of one file.
    pub jobs: usize,
    pub show_progress: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            force: false,
            dry_run: false,
            retry_skipped: false,
            jobs: 1,
            show_progress: true,
        }
    }
}

#[derive(Debug)]
pub enum RunReport {
    Completed(RunSummary),
    DryRun(DryRunReport),
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(summary) => fmt::Display::fmt(summary, f),
            Self::DryRun(report) => fmt::Display::fmt(report, f),
        }
    }
}

/// Process the selected shards of `input_dir` for one domain.
///
/// Configuration problems fail here, before any file is looked at.
pub fn process(
    db: &Database,
    config: &ProcessingConfig,
    domain: ProcessingDomain,
    input_dir: &Path,
    options: &RunOptions,
) -> Result<RunReport, OrchestratorError> {
    let processor = build_processor(config, domain)?;
    let files = discover_files(input_dir, domain)?;
    let files = filter_by_shards(&files, &options.targets)?;
    log::info!(
        "{} {} file(s) selected (shards {:?})",
        files.len(),
        domain,
        options.targets
    );

    if options.dry_run {
        let report = dry_run(db, processor.as_ref(), &files, options, config.estimate_secs_per_file)?;
        return Ok(RunReport::DryRun(report));
    }

    db.store_index_set(&config.source, processor.index_set())?;
    let summary = run_files(db, processor.as_ref(), &files, options)?;
    Ok(RunReport::Completed(summary))
}

/// Compute and store every file of `files` that needs it, in order.
pub fn run_files(
    db: &Database,
    processor: &dyn IndexProcessor,
    files: &[PathBuf],
    options: &RunOptions,
) -> Result<RunSummary, OrchestratorError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.max(1))
        .build()?;
    let preloaded = Preloaded::load(db, processor, files, true)?;

    let pb = progress_bar(files.len(), options.show_progress);
    let mut summary = RunSummary::default();

    for (path, key) in files.iter().zip(&preloaded.keys) {
        pb.set_message(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );

        let outcome = match preloaded.decide(key, options) {
            Decision::Exists => FileOutcome::Exists,
            Decision::Skipped(reason) => FileOutcome::Skipped { reason },
            Decision::Compute(Some(file_id)) => {
                compute_and_store(db, processor, &pool, path, file_id)
            }
            Decision::Compute(None) => FileOutcome::Error {
                message: format!("recording {key} is not registered"),
            },
        };

        match &outcome {
            FileOutcome::Error { message } => {
                log::warn!("Error processing {}: {}", path.display(), message)
            }
            FileOutcome::Skipped { reason } => {
                log::info!("Skipped {}: {}", path.display(), reason)
            }
            FileOutcome::Locked => log::info!("{} is locked by another worker", path.display()),
            other => log::debug!("{}: {}", path.display(), other.label()),
        }

        summary.record(path.clone(), outcome);
        pb.inc(1);
    }

    pb.finish_with_message(format!("Done: {summary}"));
    log::info!("{} pass finished: {}", processor.domain(), summary);
    Ok(summary)
}

/// What a pass over `files` would do. Takes no locks and writes nothing.
pub fn dry_run(
    db: &Database,
    processor: &dyn IndexProcessor,
    files: &[PathBuf],
    options: &RunOptions,
    estimate_secs_per_file: f64,
) -> Result<DryRunReport, OrchestratorError> {
    let preloaded = Preloaded::load(db, processor, files, false)?;

    let mut report = DryRunReport {
        domain: processor.domain(),
        files: files.len(),
        would_create: 0,
        exists: 0,
        skipped: 0,
        index_names: processor.get_enabled_indices(),
        estimated_secs: 0.0,
    };
    for key in &preloaded.keys {
        match preloaded.decide(key, options) {
            Decision::Exists => report.exists += 1,
            Decision::Skipped(_) => report.skipped += 1,
            Decision::Compute(_) => report.would_create += 1,
        }
    }
    report.estimated_secs = report.would_create as f64 * estimate_secs_per_file;
    Ok(report)
}

fn compute_and_store(
    db: &Database,
    processor: &dyn IndexProcessor,
    pool: &ThreadPool,
    path: &Path,
    file_id: i64,
) -> FileOutcome {
    let _lock = match FileLockGuard::try_acquire(path) {
        Ok(Some(guard)) => guard,
        Ok(None) => return FileOutcome::Locked,
        Err(e) => {
            return FileOutcome::Error {
                message: format!("cannot create lock file: {e}"),
            };
        }
    };

    match pool.install(|| processor.process_file(path)) {
        Ok(computed) => match db.store(
            file_id,
            processor.domain(),
            &computed.values,
            computed.get_chunk_timestamps(),
        ) {
            Ok(_) => FileOutcome::Created,
            Err(e) => FileOutcome::Error {
                message: e.to_string(),
            },
        },
        Err(e) => match e.skip_reason() {
            Some(reason) => match db.mark_skipped(file_id, processor.domain(), &reason) {
                Ok(()) => FileOutcome::Skipped { reason },
                Err(db_err) => FileOutcome::Error {
                    message: db_err.to_string(),
                },
            },
            None => FileOutcome::Error {
                message: e.to_string(),
            },
        },
    }
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Store key of the recording an input belongs to. Spectrogram containers are stored
/// under the recording they were computed from.
fn recording_key(domain: ProcessingDomain, path: &Path) -> String {
    match domain {
        ProcessingDomain::Temporal => path_key(path),
        ProcessingDomain::Spectral => match recording_path(path) {
            Some(recording) => path_key(&recording),
            None => path_key(path),
        },
    }
}

enum Decision {
    Exists,
    Skipped(String),
    /// Compute; `None` when the recording has no id (dry runs register nothing).
    Compute(Option<i64>),
}

/// Store state of a whole file list, loaded in a handful of bulk queries.
struct Preloaded {
    /// Recording key per input, in input order.
    keys: Vec<String>,
    ids: HashMap<String, i64>,
    skipped: HashMap<i64, String>,
    existing: HashMap<i64, IndexValues>,
    expected: Vec<String>,
}

impl Preloaded {
    fn load(
        db: &Database,
        processor: &dyn IndexProcessor,
        files: &[PathBuf],
        register: bool,
    ) -> Result<Self, DbError> {
        let domain = processor.domain();
        let keys: Vec<String> = files.iter().map(|f| recording_key(domain, f)).collect();
        let ids = if register {
            db.ensure_recordings(&keys)?
        } else {
            db.recording_ids(&keys)?
        };

        let id_list: Vec<i64> = ids.values().copied().collect();
        let expected = processor.get_enabled_indices();
        let skipped = db.skip_status(&id_list, domain)?;
        let existing = db.get_many(&id_list, domain, Some(&expected))?;
        log::debug!(
            "Preloaded {} recordings: {} with stored {} values, {} skipped",
            ids.len(),
            existing.len(),
            domain,
            skipped.len()
        );

        Ok(Self {
            keys,
            ids,
            skipped,
            existing,
            expected,
        })
    }

    fn decide(&self, key: &str, options: &RunOptions) -> Decision {
        let Some(&id) = self.ids.get(key) else {
            return Decision::Compute(None);
        };

        let complete = self
            .existing
            .get(&id)
            .is_some_and(|stored| self.expected.iter().all(|name| stored.contains_key(name)));
        if complete && !options.force {
            return Decision::Exists;
        }

        if !options.force && !options.retry_skipped {
            if let Some(reason) = self.skipped.get(&id) {
                return Decision::Skipped(reason.clone());
            }
        }

        Decision::Compute(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spectrogram_fixture, write_npz, write_wav};
    use std::fs;

    const RATE: u32 = 1000;

    const TEMPORAL_CONFIG: &str = "
sample_rate: 1000
file_duration_sec: 50
acoustic_indices:
  temporal:
    chunk_duration_sec: 5
    enabled: [temporal_entropy]
";

    const SPECTRAL_CONFIG: &str = "
sample_rate: 1000
file_duration_sec: 50
acoustic_indices:
  spectral:
    chunk_duration_sec: 5
    leq:
      processor: spectral_leq
    frog_bai:
      processor: bioacoustics_index
      params: { freq_min: 500, freq_max: 2000 }
";

    fn options() -> RunOptions {
        RunOptions {
            show_progress: false,
            ..RunOptions::default()
        }
    }

    fn config(yaml: &str) -> ProcessingConfig {
        ProcessingConfig::from_yaml(yaml, "test.yaml").unwrap()
    }

    /// Ten 50s recordings `rec_00.WAV` .. `rec_09.WAV`.
    fn recordings(dir: &Path) -> Vec<PathBuf> {
        (0..10)
            .map(|i| {
                let path = dir.join(format!("rec_{i:02}.WAV"));
                write_wav(&path, RATE, 50.0);
                path
            })
            .collect()
    }

    fn row_count(db: &Database) -> i64 {
        db.conn
            .query_row("SELECT COUNT(*) FROM acoustic_indices", [], |r| r.get(0))
            .unwrap()
    }

    fn completed(report: RunReport) -> RunSummary {
        match report {
            RunReport::Completed(summary) => summary,
            RunReport::DryRun(_) => panic!("expected a completed pass"),
        }
    }

    fn outcome_of<'a>(summary: &'a RunSummary, path: &Path) -> &'a FileOutcome {
        &summary
            .outcomes
            .iter()
            .find(|(p, _)| p == path)
            .unwrap()
            .1
    }

    #[test]
    fn test_ten_files_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        recordings(dir.path());
        let db = Database::open_in_memory().unwrap();
        let cfg = config(TEMPORAL_CONFIG);
        let domain = ProcessingDomain::Temporal;

        let first = completed(process(&db, &cfg, domain, dir.path(), &options()).unwrap());
        assert_eq!(first.created, 10);
        assert_eq!(first.errors, 0);
        assert_eq!(row_count(&db), 100);

        let second = completed(process(&db, &cfg, domain, dir.path(), &options()).unwrap());
        assert_eq!(second.exists, 10);
        assert_eq!(second.created, 0);
        assert_eq!(row_count(&db), 100);

        let forced = RunOptions {
            force: true,
            ..options()
        };
        let third = completed(process(&db, &cfg, domain, dir.path(), &forced).unwrap());
        assert_eq!(third.created, 10);
        assert_eq!(row_count(&db), 100);

        // Configuration registered once despite three passes
        assert_eq!(db.all_configurations(Some("test.yaml")).unwrap().len(), 1);
        // Lock files stay behind, released
        assert!(FileLockGuard::try_acquire(&dir.path().join("rec_00.WAV"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_shards_cover_every_file_once() {
        let dir = tempfile::tempdir().unwrap();
        recordings(dir.path());
        let db = Database::open_in_memory().unwrap();
        let cfg = config(TEMPORAL_CONFIG);

        let mut created = 0;
        for shard in 0..SHARD_COUNT {
            let opts = RunOptions {
                targets: vec![shard],
                ..options()
            };
            let summary = completed(
                process(&db, &cfg, ProcessingDomain::Temporal, dir.path(), &opts).unwrap(),
            );
            assert_eq!(summary.total(), 1);
            created += summary.created;
        }
        assert_eq!(created, 10);
        assert_eq!(row_count(&db), 100);
    }

    #[test]
    fn test_held_lock_reports_locked() {
        let dir = tempfile::tempdir().unwrap();
        let files = recordings(dir.path());
        let db = Database::open_in_memory().unwrap();
        let cfg = config(TEMPORAL_CONFIG);

        let _held = FileLockGuard::try_acquire(&files[3]).unwrap().unwrap();
        let summary = completed(
            process(&db, &cfg, ProcessingDomain::Temporal, dir.path(), &options()).unwrap(),
        );
        assert_eq!(summary.locked, 1);
        assert_eq!(summary.created, 9);
        assert_eq!(outcome_of(&summary, &files[3]), &FileOutcome::Locked);
        assert_eq!(row_count(&db), 90);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        recordings(dir.path());
        let db = Database::open_in_memory().unwrap();
        let cfg = config(TEMPORAL_CONFIG);
        let opts = RunOptions {
            dry_run: true,
            ..options()
        };

        let report = match process(&db, &cfg, ProcessingDomain::Temporal, dir.path(), &opts).unwrap() {
            RunReport::DryRun(report) => report,
            RunReport::Completed(_) => panic!("expected a dry run"),
        };
        assert_eq!(report.would_create, 10);
        assert_eq!(report.index_names, vec!["temporal_entropy"]);
        assert_eq!(report.estimated_secs, 40.0);

        let stats = db.index_stats().unwrap();
        assert_eq!(stats.recordings, 0);
        assert_eq!(stats.total_rows, 0);
        assert!(db.all_configurations(None).unwrap().is_empty());

        // After a real pass the dry run sees everything as stored
        process(&db, &cfg, ProcessingDomain::Temporal, dir.path(), &options()).unwrap();
        let report = match process(&db, &cfg, ProcessingDomain::Temporal, dir.path(), &opts).unwrap() {
            RunReport::DryRun(report) => report,
            RunReport::Completed(_) => panic!("expected a dry run"),
        };
        assert_eq!((report.would_create, report.exists), (0, 10));
    }

    #[test]
    fn test_skipped_files_are_not_decoded_again() {
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("short.WAV");
        write_wav(&short, RATE, 30.0);
        let shortened = dir.path().join("shortened.WAV");
        write_wav(&shortened, RATE, 49.0);
        let db = Database::open_in_memory().unwrap();
        let cfg = config(TEMPORAL_CONFIG);
        let domain = ProcessingDomain::Temporal;

        let first = completed(process(&db, &cfg, domain, dir.path(), &options()).unwrap());
        assert_eq!(
            outcome_of(&first, &short),
            &FileOutcome::Skipped {
                reason: "duration_30s".into()
            }
        );
        // Within tolerance but short: one chunk fewer
        let id = db.recording_ids(&[path_key(&shortened)]).unwrap()[&path_key(&shortened)];
        assert_eq!(db.get_indices(id, None, None).unwrap()["temporal_entropy"].len(), 9);

        // A decode now would fail; the stored skip mark answers instead
        fs::write(&short, b"not audio").unwrap();
        let second = completed(process(&db, &cfg, domain, dir.path(), &options()).unwrap());
        assert_eq!(second.skipped, 1);
        assert_eq!(second.errors, 0);

        let retry = RunOptions {
            retry_skipped: true,
            ..options()
        };
        let third = completed(process(&db, &cfg, domain, dir.path(), &retry).unwrap());
        assert!(matches!(outcome_of(&third, &short), FileOutcome::Error { .. }));
        assert_eq!(third.exists, 1);
    }

    #[test]
    fn test_skip_in_one_domain_leaves_the_other_alone() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("rec_0.WAV");
        write_wav(&wav, RATE, 30.0);
        let npz = dir.path().join("rec_0_spec.npz");
        write_npz(&npz, &spectrogram_fixture(8, 500, 100));
        let db = Database::open_in_memory().unwrap();
        let temporal = config(TEMPORAL_CONFIG);
        let spectral = config(SPECTRAL_CONFIG);

        let first = completed(
            process(&db, &temporal, ProcessingDomain::Temporal, dir.path(), &options()).unwrap(),
        );
        assert_eq!(first.skipped, 1);

        // The 50s container is valid even though its recording was rejected
        let second = completed(
            process(&db, &spectral, ProcessingDomain::Spectral, dir.path(), &options()).unwrap(),
        );
        assert_eq!(second.created, 1);
        assert_eq!(outcome_of(&second, &npz), &FileOutcome::Created);

        // The spectral store did not lift the temporal mark: no decode happens
        fs::write(&wav, b"not audio").unwrap();
        let third = completed(
            process(&db, &temporal, ProcessingDomain::Temporal, dir.path(), &options()).unwrap(),
        );
        assert_eq!(
            outcome_of(&third, &wav),
            &FileOutcome::Skipped {
                reason: "duration_30s".into()
            }
        );

        let id = db.recording_ids(&[path_key(&wav)]).unwrap()[&path_key(&wav)];
        let marks = db.skip_marks(id).unwrap();
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].domain, "temporal");
    }

    #[test]
    fn test_store_failure_is_an_error_and_the_shard_continues() {
        let dir = tempfile::tempdir().unwrap();
        let files = recordings(dir.path());
        let db = Database::open_in_memory().unwrap();
        let cfg = config(TEMPORAL_CONFIG);
        db.conn
            .execute_batch(
                "CREATE TEMP TRIGGER reject_rec_03 BEFORE INSERT ON acoustic_indices
                 WHEN NEW.file_id = (SELECT id FROM audio_files WHERE filename = 'rec_03.WAV')
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
            )
            .unwrap();

        let first = completed(
            process(&db, &cfg, ProcessingDomain::Temporal, dir.path(), &options()).unwrap(),
        );
        assert_eq!(first.errors, 1);
        assert_eq!(first.created, 9);
        match outcome_of(&first, &files[3]) {
            FileOutcome::Error { message } => assert!(message.contains("disk I/O error")),
            other => panic!("expected an error, got {other:?}"),
        }
        // Nothing partial was kept, and an error is not a skip
        assert_eq!(row_count(&db), 90);
        assert_eq!(db.index_stats().unwrap().skipped_recordings, 0);

        db.conn.execute_batch("DROP TRIGGER reject_rec_03;").unwrap();
        let second = completed(
            process(&db, &cfg, ProcessingDomain::Temporal, dir.path(), &options()).unwrap(),
        );
        assert_eq!((second.created, second.exists), (1, 9));
        assert_eq!(row_count(&db), 100);
    }

    #[test]
    fn test_spectral_pass_stores_under_recording() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            let npz = dir.path().join(format!("rec_{i}_spec.npz"));
            write_npz(&npz, &spectrogram_fixture(8, 500, 100));
        }
        let db = Database::open_in_memory().unwrap();
        let cfg = config(SPECTRAL_CONFIG);

        let summary = completed(
            process(&db, &cfg, ProcessingDomain::Spectral, dir.path(), &options()).unwrap(),
        );
        assert_eq!(summary.created, 3);

        let recording = path_key(&dir.path().join("rec_0.WAV"));
        let stored = db.get_recording(&recording).unwrap().unwrap();
        let values = db
            .get_indices(stored.id, Some(ProcessingDomain::Spectral), None)
            .unwrap();
        assert_eq!(
            values.keys().collect::<Vec<_>>(),
            vec!["frog_bai_500-2000", "leq"]
        );
        assert!(values.values().all(|v| v.len() == 10));
        assert_eq!(row_count(&db), 60);
    }

    #[test]
    fn test_bad_config_fails_before_files() {
        let dir = tempfile::tempdir().unwrap();
        recordings(dir.path());
        let db = Database::open_in_memory().unwrap();
        let cfg = config(TEMPORAL_CONFIG);

        let err = process(&db, &cfg, ProcessingDomain::Spectral, dir.path(), &options())
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Config(ConfigError::MissingDomain(ProcessingDomain::Spectral))
        ));
        assert_eq!(db.index_stats().unwrap().recordings, 0);

        let opts = RunOptions {
            targets: vec![11],
            ..options()
        };
        assert!(matches!(
            process(&db, &cfg, ProcessingDomain::Temporal, dir.path(), &opts),
            Err(OrchestratorError::InvalidShard(11))
        ));
    }
}
