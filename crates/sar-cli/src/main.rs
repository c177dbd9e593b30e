//! sar - command-line interface for the sequential archiver
//!
//! Creates tar archives (optionally gzip-compressed and size-limited) from
//! files and directories, and extracts them with conflict handling.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sar_core::config::{parse_size, Config};
use sar_core::{Archive, ArchiveType, Compressor};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod interactive;

use interactive::TerminalPrompt;

/// sar - a sequential archiver
///
/// Streams files and directories into tar archives with optional gzip
/// compression and size limits, and restores them faithfully.
#[derive(Parser)]
#[command(name = "sar")]
#[command(author, version, about = "A sequential tar archiver with size limits", long_about = None)]
struct Cli {
    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an archive from files and directories
    Create {
        /// Archive to write, `-` for stdout
        #[arg(short = 'f', long = "file", value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Compress with gzip
        #[arg(short = 'z', long, conflicts_with = "no_gzip")]
        gzip: bool,

        /// Do not compress, whatever the archive name says
        #[arg(long)]
        no_gzip: bool,

        /// Gzip level (0-9)
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(0..=9))]
        level: Option<u32>,

        /// Maximum archive size, e.g. 4096, 10MiB, 2GB
        #[arg(long, value_name = "SIZE")]
        limit_archive: Option<String>,

        /// Maximum amount of file data to read
        #[arg(long, value_name = "SIZE")]
        limit_data: Option<String>,

        /// Files and directories to archive
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Extract an archive into a directory
    Extract {
        /// Archive to read, `-` for stdin
        #[arg(short = 'f', long = "file", value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Existing destination directory
        #[arg(default_value = ".")]
        dest: PathBuf,

        /// Overwrite existing files without asking
        #[arg(long)]
        force: bool,

        /// Never ask; existing files are skipped unless --force is given
        #[arg(long)]
        no_interactive: bool,

        /// Restore file owners
        #[arg(long)]
        owner: bool,

        /// Do not restore access and modification times
        #[arg(long)]
        no_times: bool,

        /// Stop at the first entry that fails
        #[arg(long)]
        fail_fast: bool,

        /// The archive is gzip-compressed
        #[arg(short = 'z', long, conflicts_with = "no_gzip")]
        gzip: bool,

        /// The archive is not compressed, whatever its name says
        #[arg(long)]
        no_gzip: bool,

        /// Append per-entry errors to this file
        #[arg(long, value_name = "FILE")]
        error_log: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Print the configuration file path
        #[arg(long, conflicts_with = "show")]
        path: bool,

        /// Write a commented default configuration file
        #[arg(long, conflicts_with_all = ["show", "path"])]
        init: bool,
    },
}

/// Bad command-line value, reported with exit code 3
#[derive(Debug)]
struct InvalidArgument(String);

impl fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid argument: {}", self.0)
    }
}

impl std::error::Error for InvalidArgument {}

/// Extraction finished but some entries failed, reported with exit code 4
#[derive(Debug)]
struct PartialFailure {
    failed: usize,
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} entries could not be extracted", self.failed)
    }
}

impl std::error::Error for PartialFailure {}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    match run() {
        Ok(()) => process::exit(0),
        Err(e) => {
            error!("Error: {:#}", e);
            process::exit(map_error_to_exit_code(&e));
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring configuration file: {}", e);
            Config::default()
        }
    };

    match cli.command {
        Commands::Create {
            archive,
            gzip,
            no_gzip,
            level,
            limit_archive,
            limit_data,
            paths,
        } => {
            let compressor =
                choose_compressor(&archive, gzip, no_gzip, config.create.compression);
            let write_limit = size_arg("--limit-archive", limit_archive, config.create.limit_archive)?;
            let read_limit = size_arg("--limit-data", limit_data, config.create.limit_data)?;

            for path in &paths {
                if fs::symlink_metadata(path).is_err() {
                    return Err(InvalidArgument(format!("{} does not exist", path.display())).into());
                }
            }

            info!(
                "Creating archive: {} ({}, limit {})",
                archive.display(),
                compressor,
                describe_limit(write_limit)
            );

            let sink: Box<dyn Write> = if is_stdio(&archive) {
                Box::new(io::stdout().lock())
            } else {
                let file = File::create(&archive)
                    .with_context(|| format!("Failed to create {}", archive.display()))?;
                Box::new(BufWriter::new(file))
            };

            let mut handle = Archive::new(ArchiveType::Tar, compressor)
                .compression_level(level.unwrap_or(config.create.level))
                .limit_archive(write_limit)
                .limit_data(read_limit)
                .with_writer(sink);

            let result = handle.archive_path(&paths);
            let closed = handle.close();
            result?;
            closed?;

            info!(
                "Archive created: {} ({} bytes of file data)",
                archive.display(),
                handle.read_bytes()
            );
        }

        Commands::Extract {
            archive,
            dest,
            force,
            no_interactive,
            owner,
            no_times,
            fail_fast,
            gzip,
            no_gzip,
            error_log,
        } => {
            let compressor = choose_compressor(&archive, gzip, no_gzip, None);

            let mut opts = config.extract.to_options();
            opts.verbose = cli.verbose;
            opts.overwrite |= force;
            opts.interactive &= !no_interactive;
            opts.restore_owner |= owner;
            opts.restore_timestamps &= !no_times;
            opts.fail_fast |= fail_fast;
            // stdin carries the archive, not answers
            if opts.interactive && !opts.overwrite && !is_stdio(&archive) {
                opts.prompt = Some(Box::new(TerminalPrompt));
            }
            if let Some(log_path) = &error_log {
                let log = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log_path)
                    .with_context(|| format!("Failed to open {}", log_path.display()))?;
                opts.error_log = Some(Box::new(log));
            }

            info!("Extracting {} to {}", archive.display(), dest.display());

            let source: Box<dyn Read> = if is_stdio(&archive) {
                Box::new(io::stdin().lock())
            } else {
                let file = File::open(&archive)
                    .with_context(|| format!("Failed to open {}", archive.display()))?;
                Box::new(BufReader::new(file))
            };

            let mut handle = Archive::new(ArchiveType::Tar, compressor).with_reader(source);
            let summary = handle.extract(&dest, &mut opts)?;

            info!(
                "Extracted {} entries, skipped {}, failed {}",
                summary.extracted,
                summary.skipped.len(),
                summary.failed
            );
            if !opts.errors.is_empty() {
                return Err(PartialFailure {
                    failed: opts.errors.len(),
                }
                .into());
            }
        }

        Commands::Config { show, path, init } => {
            let config_path = Config::config_path()?;

            if path {
                println!("{}", config_path.display());
            } else if init {
                if config_path.exists() {
                    warn!("Configuration already exists at {}", config_path.display());
                } else {
                    if let Some(parent) = config_path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&config_path, Config::default_config_content())?;
                    info!("Configuration written to {}", config_path.display());
                }
            } else {
                if !show {
                    info!("Configuration file: {}", config_path.display());
                }
                let rendered = toml::to_string_pretty(&config)
                    .context("Failed to render configuration")?;
                println!("{}", rendered);
            }
        }
    }

    Ok(())
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Explicit flag, then configuration, then the archive name
fn choose_compressor(
    archive: &Path,
    gzip: bool,
    no_gzip: bool,
    configured: Option<Compressor>,
) -> Compressor {
    if gzip {
        return Compressor::Gzip;
    }
    if no_gzip {
        return Compressor::None;
    }
    if let Some(compressor) = configured {
        return compressor;
    }

    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Compressor::Gzip
    } else {
        Compressor::None
    }
}

fn size_arg(flag: &str, value: Option<String>, configured: u64) -> Result<u64> {
    match value {
        Some(text) => parse_size(&text)
            .map_err(|e| InvalidArgument(format!("{} {}: {}", flag, text, e)).into()),
        None => Ok(configured),
    }
}

fn describe_limit(bytes: u64) -> String {
    if bytes == 0 {
        "unlimited".to_string()
    } else {
        format!("{} bytes", bytes)
    }
}

fn map_error_to_exit_code(err: &anyhow::Error) -> i32 {
    use sar_core::Error;

    if err.is::<InvalidArgument>() {
        return 3;
    }
    if err.is::<PartialFailure>() {
        return 4;
    }
    if let Some(core_err) = err.downcast_ref::<Error>() {
        return match core_err.root_cause() {
            Error::Io(_) | Error::Walk(_) | Error::ShortRead { .. } | Error::Close(_) => 2,
            Error::InvalidPath(_)
            | Error::DestinationMissing(_)
            | Error::DestinationNotDirectory(_)
            | Error::Setup(_) => 3,
            Error::UnsupportedEntryType(_) | Error::Metadata(_) => 4,
            Error::WriteLimitExceeded | Error::ReadLimitExceeded => 5,
            Error::ExtractionAborted => 130,
            Error::Config(_) | Error::AlreadyClosed | Error::Entry { .. } => 1,
        };
    }
    if err.downcast_ref::<io::Error>().is_some() {
        2
    } else {
        1
    }
}
