use std::fmt;
use std::path::PathBuf;

use crate::indices::ProcessingDomain;

/// What happened to one file in a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// Indices were computed and stored.
    Created,
    /// Every configured index was already stored.
    Exists,
    /// The recording was rejected (now or in an earlier pass).
    Skipped { reason: String },
    /// Another worker holds the file's lock.
    Locked,
    Error { message: String },
}

impl FileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Exists => "exists",
            Self::Skipped { .. } => "skipped",
            Self::Locked => "locked",
            Self::Error { .. } => "error",
        }
    }
}

/// Per-outcome counts of one pass, plus the outcome of every file.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub created: u64,
    pub exists: u64,
    pub skipped: u64,
    pub locked: u64,
    pub errors: u64,
    pub outcomes: Vec<(PathBuf, FileOutcome)>,
}

impl RunSummary {
    pub fn record(&mut self, path: PathBuf, outcome: FileOutcome) {
        match &outcome {
            FileOutcome::Created => self.created += 1,
            FileOutcome::Exists => self.exists += 1,
            FileOutcome::Skipped { .. } => self.skipped += 1,
            FileOutcome::Locked => self.locked += 1,
            FileOutcome::Error { .. } => self.errors += 1,
        }
        self.outcomes.push((path, outcome));
    }

    pub fn total(&self) -> u64 {
        self.created + self.exists + self.skipped + self.locked + self.errors
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files: {} created, {} exists, {} skipped, {} locked, {} errors",
            self.total(),
            self.created,
            self.exists,
            self.skipped,
            self.locked,
            self.errors
        )
    }
}

/// What a pass would do, computed from the store alone.
#[derive(Debug)]
pub struct DryRunReport {
    pub domain: ProcessingDomain,
    pub files: usize,
    pub would_create: usize,
    pub exists: usize,
    pub skipped: usize,
    pub index_names: Vec<String>,
    pub estimated_secs: f64,
}

impl fmt::Display for DryRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dry run ({} indices):", self.domain)?;
        writeln!(f, "  Files in shard(s): {}", self.files)?;
        writeln!(f, "  Would create:      {}", self.would_create)?;
        writeln!(f, "  Already stored:    {}", self.exists)?;
        writeln!(f, "  Skipped:           {}", self.skipped)?;
        writeln!(f, "  Indices ({}):", self.index_names.len())?;
        for name in &self.index_names {
            writeln!(f, "    {name}")?;
        }
        write!(
            f,
            "  Estimated time:    {}",
            format_duration(self.estimated_secs)
        )
    }
}

/// `1h 02m 03s` style.
fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}
