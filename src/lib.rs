use thiserror::Error;

pub mod artifact;
pub mod backup;
pub mod cli;
pub mod compress;
pub mod config;
pub mod driver;
pub mod logging;
pub mod manifest;
pub mod page;
pub mod restore;
pub mod transport;

pub type Result<T> = anyhow::Result<T>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cli error: {0}")]
    Cli(String),
    #[error("transport failed after {attempts} attempts: {src} -> {dst}: {last}")]
    TransportExhausted {
        src: String,
        dst: String,
        attempts: u32,
        last: String,
    },
    #[error("unable to read page {0}")]
    PageRead(u64),
    #[error("incorrect page {0}")]
    PageFormat(u64),
    #[error("malformed file list entry: {0}")]
    MalformedFileList(String),
    #[error("backup of pre-existing file failed: {0}")]
    PreExistingFileFailed(String),
    #[error("backup of pg_control failed")]
    PgControlFailed,
    #[error("missing backup_label in backup: {0}")]
    MissingBackupLabel(String),
    #[error("failed to restore {0} files")]
    RestoreFailed(usize),
    #[error("tablespace {name} points to {actual}, expected {expected}")]
    TablespaceMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("unsupported compression spec: {0}")]
    UnsupportedCompression(String),
    #[error("invalid lsn: {0}")]
    InvalidLsn(String),
    #[error("serialization error")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Entry point for the library, called by the CLI thin wrapper.
pub fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let cli_args = cli::parse_args(args.into_iter().map(Into::into))?;
    cli::dispatch(cli_args)
}
