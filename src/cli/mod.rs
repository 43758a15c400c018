//! CLI argument surface; subcommands live here.

use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};

use crate::{Error, Result};

pub mod backup;
pub mod restore;

#[derive(Debug, Clone)]
pub enum Command {
    Backup(backup::BackupArgs),
    Restore(restore::RestoreArgs),
    None,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub command: Command,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            command: Command::None,
        }
    }
}

pub fn dispatch(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Backup(b) => backup::execute(b),
        Command::Restore(r) => restore::execute(r),
        Command::None => Err(Error::Cli("no action specified".into()).into()),
    }
}

/// Flags shared by both subcommands.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Data directory root
    #[arg(short = 'D', long = "pgdata", default_value = "/var/lib/pgsql/data")]
    pub pgdata: PathBuf,

    /// Backup root: local path or rsync remote spec (host:path)
    #[arg(short = 'b', long = "backup-path")]
    pub backup_path: String,

    /// Compression codec, `name` or `name-level` (none, gzip, bzip2, lzma)
    #[arg(short = 'c', long = "compress", default_value = "none")]
    pub compress: String,

    /// Scratch directory for temp artifacts
    #[arg(short = 't', long = "tmpdir", default_value = "/tmp/barman")]
    pub tmpdir: PathBuf,

    /// Transport retry attempts
    #[arg(short = 'r', long = "retries", default_value_t = 5)]
    pub retries: u32,

    /// Seconds to sleep between transport retries
    #[arg(short = 's', long = "pause", default_value_t = 30)]
    pub pause: u64,

    /// Worker count
    #[arg(short = 'p', long = "parallel", default_value_t = 1)]
    pub parallel: usize,

    /// Tablespace map, `name:path,...`
    #[arg(short = 'T', long = "tablespaces", default_value = "")]
    pub tablespaces: String,

    /// Page size in bytes
    #[arg(short = 'Z', long = "block-size", default_value_t = 8192)]
    pub block_size: usize,

    /// Artifact magic number
    #[arg(short = 'm', long = "magic", default_value_t = 2359285)]
    pub magic: u32,

    /// Global bandwidth cap in KB/s, split across workers
    #[arg(short = 'w', long = "bandwidth-limit")]
    pub bandwidth_limit: Option<u64>,

    /// Per-tablespace bandwidth caps, `name:KBps,...`
    #[arg(short = 'W', long = "tablespaces-bandwidth", default_value = "")]
    pub tablespaces_bandwidth: String,

    /// Extra arguments passed to rsync
    #[arg(short = 'R', long = "rsync-args", default_value = " -v")]
    pub rsync_args: String,

    /// Verbosity; repeat for more detail
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser, Debug)]
#[command(
    name = "pgback",
    version,
    about = "Incremental page-level backup and restore for PostgreSQL data directories"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Subcommands>,
}

#[derive(Subcommand, Debug)]
enum Subcommands {
    /// Back up a data directory, incrementally when a watermark LSN is given.
    Backup(backup::BackupArgs),
    /// Restore a data directory from a backup onto its prior state.
    Restore(restore::RestoreArgs),
}

/// Parse CLI arguments into internal representation.
pub fn parse_args<I, S>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = args.into_iter().map(Into::into).collect();
    let cli = Cli::parse_from(argv);
    let command = match cli.command {
        Some(Subcommands::Backup(args)) => Command::Backup(args),
        Some(Subcommands::Restore(args)) => Command::Restore(args),
        None => Command::None,
    };

    Ok(CliArgs { command })
}

/// Build the underlying clap `Command` (useful for help/usage contract tests).
pub fn clap_command() -> clap::Command {
    Cli::command()
}
