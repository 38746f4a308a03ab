use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use soundscape_indices::config::{AppConfig, ProcessingConfig};
use soundscape_indices::db::Database;
use soundscape_indices::db::models::StoredConfiguration;
use soundscape_indices::db::queries::path_key;
use soundscape_indices::indices::ProcessingDomain;
use soundscape_indices::indices::spectrogram::recording_path;
use soundscape_indices::orchestrator::{self, RunOptions, RunReport};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "soundscape-indices",
    version,
    about = "Chunked acoustic indices for long-duration field recordings"
)]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct DomainChoice {
    /// Compute indices from the decoded waveform (*.wav)
    #[arg(long)]
    temporal: bool,

    /// Compute indices from precomputed spectrograms (*_spec.npz)
    #[arg(long)]
    spectral: bool,
}

impl DomainChoice {
    fn domain(&self) -> ProcessingDomain {
        if self.spectral {
            ProcessingDomain::Spectral
        } else {
            ProcessingDomain::Temporal
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compute and store indices for one or more shards of a recordings directory
    Process {
        #[command(flatten)]
        domain: DomainChoice,

        /// Processing configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Recordings directory (defaults to the configured input_directory)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Shards to process, 0-9 (default: all)
        #[arg(short, long, num_args = 1..)]
        target: Vec<usize>,

        /// Recompute files whose indices are already stored
        #[arg(long)]
        force: bool,

        /// Show what would be computed without touching files or the database
        #[arg(long)]
        dry_run: bool,

        /// Retry recordings an earlier pass skipped
        #[arg(long)]
        retry_skipped: bool,

        /// Threads per file (0 = from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Show store statistics
    Stats,

    /// Show the stored indices of one recording
    Show {
        /// Recording (or its *_spec.npz spectrogram)
        file: PathBuf,

        /// Only this domain (temporal or spectral)
        #[arg(short, long)]
        domain: Option<ProcessingDomain>,
    },

    /// List registered index configurations
    Configs {
        /// Only configurations from this config file name
        #[arg(long)]
        source: Option<String>,

        /// Show the latest configuration of one stored index name
        #[arg(long)]
        index: Option<String>,
    },

    /// Delete stored index values
    Clear {
        /// Only this recording
        #[arg(long)]
        file: Option<PathBuf>,

        /// Only this domain (temporal or spectral)
        #[arg(short, long)]
        domain: Option<ProcessingDomain>,

        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let Cli {
        db_path,
        verbose,
        command,
    } = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let app_config = AppConfig::load();

    match command {
        Commands::Process {
            domain,
            config,
            input,
            target,
            force,
            dry_run,
            retry_skipped,
            jobs,
        } => {
            let domain = domain.domain();
            let processing = ProcessingConfig::load(&config)
                .with_context(|| format!("Invalid processing config {}", config.display()))?;

            // CLI > processing config > app config > XDG default
            let db = open_database(
                db_path.or_else(|| processing.database_path.clone()),
                &app_config,
            )?;

            let input_dir = input
                .or_else(|| processing.input_directory.clone())
                .or_else(|| app_config.input_directory.clone())
                .context(
                    "No recordings directory. Pass --input or set input_directory in the config.",
                )?;

            let options = RunOptions {
                targets: target,
                force,
                dry_run,
                retry_skipped,
                jobs: if jobs > 0 { jobs } else { app_config.resolve_jobs() },
                show_progress: true,
            };

            if dry_run {
                println!("DRY RUN: no files are locked and nothing is written to the database");
                println!();
            }
            let report = orchestrator::process(&db, &processing, domain, &input_dir, &options)
                .with_context(|| format!("{domain} processing failed"))?;
            match &report {
                RunReport::Completed(summary) => {
                    println!("Processing complete ({domain}): {summary}");
                }
                RunReport::DryRun(_) => println!("{report}"),
            }
        }

        Commands::Stats => {
            let db = open_database(db_path, &app_config)?;
            let stats = db.index_stats().context("Failed to get stats")?;
            println!("Index Store Statistics");
            println!("======================");
            println!("Recordings:          {}", stats.recordings);
            println!("  skipped:           {}", stats.skipped_recordings);
            println!("  with indices:      {}", stats.files_with_indices);
            println!("Stored values:       {}", stats.total_rows);
            for domain in ProcessingDomain::ALL {
                println!("  {:<18} {}", format!("{domain}:"), stats.rows_for(domain));
            }
            println!();

            if !stats.per_index.is_empty() {
                println!(
                    "{:<9} {:<40} {:>8} {:>6} {:>12} {:>12}",
                    "Domain", "Index", "Values", "Files", "Min", "Max"
                );
                println!("{}", "-".repeat(92));
                for s in &stats.per_index {
                    println!(
                        "{:<9} {:<40} {:>8} {:>6} {:>12} {:>12}",
                        s.domain,
                        s.index_name,
                        s.rows,
                        s.files,
                        format_value(s.min_value),
                        format_value(s.max_value),
                    );
                }
            }
        }

        Commands::Show { file, domain } => {
            let db = open_database(db_path, &app_config)?;
            let key = recording_key(&file);
            let Some(recording) = db.get_recording(&key).context("Failed to look up recording")?
            else {
                println!("No recording stored for {}.", key);
                return Ok(());
            };

            println!("Recording: {}", recording.filepath);
            let marks = db
                .skip_marks(recording.id)
                .context("Failed to read skip marks")?;
            for mark in marks
                .iter()
                .filter(|m| domain.is_none_or(|d| d.as_str() == m.domain))
            {
                println!("Skipped:   {} ({}, {})", mark.reason, mark.domain, mark.skipped_at);
            }

            let rows = db
                .get_index_rows(recording.id, domain)
                .context("Failed to read indices")?;
            if rows.is_empty() {
                println!("No stored indices.");
                return Ok(());
            }

            println!();
            println!(
                "{:<9} {:<40} {:>5} {:>9} {:>14}",
                "Domain", "Index", "Chunk", "Start (s)", "Value"
            );
            println!("{}", "-".repeat(81));
            for r in &rows {
                println!(
                    "{:<9} {:<40} {:>5} {:>9.1} {:>14.6}",
                    r.domain, r.index_name, r.chunk_index, r.start_time_sec, r.value
                );
            }
            if let Some(computed_at) = rows.iter().map(|r| r.computed_at.as_str()).max() {
                println!();
                println!("Last computed: {}", computed_at);
            }
        }

        Commands::Configs { source, index } => {
            let db = open_database(db_path, &app_config)?;
            let configs: Vec<StoredConfiguration> = match &index {
                Some(name) => db
                    .get_index_configuration(name, source.as_deref())
                    .context("Failed to read configurations")?
                    .into_iter()
                    .collect(),
                None => db
                    .all_configurations(source.as_deref())
                    .context("Failed to read configurations")?,
            };

            if configs.is_empty() {
                println!("No index configurations registered.");
                return Ok(());
            }
            print_configurations(&configs);
        }

        Commands::Clear { file, domain, yes } => {
            if !yes {
                anyhow::bail!("Refusing to delete stored indices without --yes");
            }
            let db = open_database(db_path, &app_config)?;
            let file_id = match &file {
                Some(path) => {
                    let key = recording_key(path);
                    match db.get_recording(&key).context("Failed to look up recording")? {
                        Some(recording) => Some(recording.id),
                        None => {
                            println!("No recording stored for {}.", key);
                            return Ok(());
                        }
                    }
                }
                None => None,
            };
            let deleted = db.clear(file_id, domain).context("Failed to clear indices")?;
            println!("Deleted {} stored values", deleted);
        }
    }

    Ok(())
}

fn open_database(cli_path: Option<PathBuf>, app_config: &AppConfig) -> Result<Database> {
    let db_path = cli_path
        .or_else(|| app_config.db_path.clone())
        .unwrap_or_else(soundscape_indices::config::default_db_path);
    log::info!("Database: {}", db_path.display());
    Database::open(&db_path).context("Failed to open database")
}

/// Spectrogram containers are stored under the recording they belong to.
fn recording_key(path: &Path) -> String {
    match recording_path(path) {
        Some(recording) => path_key(&recording),
        None => path_key(path),
    }
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".into())
}

/// Print registered configurations, one block per stored index name.
fn print_configurations(configs: &[StoredConfiguration]) {
    println!(
        "{:<20} {:<9} {:<36} {:<30} {:<16}",
        "Source", "Domain", "Index", "Processor", "Hash"
    );
    println!("{}", "-".repeat(115));
    for c in configs {
        println!(
            "{:<20} {:<9} {:<36} {:<30} {:<16}",
            c.config_source, c.processing_domain, c.index_name, c.processor, c.content_hash
        );
        if c.cosmetic_name != c.index_name {
            println!("    configured as: {}", c.cosmetic_name);
        }
        println!("    {}", c.config_fragment);
    }
}
