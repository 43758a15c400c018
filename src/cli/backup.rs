//! Implementation of `pgback backup`.
//!
//! Orchestration order matters for crash consistency: tablespaces, then the
//! data directory, then explicit includes, then `pg_control` as the
//! fencepost, and the manifest upload only after `pg_control` succeeded.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Args;
use tracing::{info, warn};

use crate::backup::backup_file;
use crate::cli::CommonArgs;
use crate::compress::Compression;
use crate::config::{
    parse_bandwidth_map, parse_tablespace_map, per_worker_limit, Config,
};
use crate::driver::{relative_to, TreeDriver};
use crate::logging::{init_logging, LoggingConfig};
use crate::manifest::FileList;
use crate::page::parse_lsn;
use crate::transport::Transport;
use crate::{Error, Result};

#[derive(Debug, Clone, Args)]
pub struct BackupArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Incremental watermark LSN (decimal or `X/X`); absent means full backup
    #[arg(short = 'l', long = "lsn")]
    pub lsn: Option<String>,

    /// Unix-time mtime cutoff for the unchanged-file shortcut
    #[arg(short = 'a', long = "after")]
    pub after: Option<i64>,

    /// Comma-separated exclude globs
    #[arg(
        short = 'e',
        long = "exclude",
        default_value = "*pg_xlog/*,*pg_log/*,*pg_stat_tmp/*,*pg_replslot/*"
    )]
    pub exclude: String,

    /// Prior manifest location, required for incremental backup
    #[arg(short = 'f', long = "file-list")]
    pub file_list: Option<String>,

    /// Comma-separated absolute paths to force-full with no compression
    #[arg(short = 'i', long = "include-files", default_value = "")]
    pub include_files: String,
}

pub fn execute(args: BackupArgs) -> Result<()> {
    init_logging(LoggingConfig::console(args.common.verbose))?;

    let compression: Compression = args.common.compress.parse()?;
    let lsn = args.lsn.as_deref().map(parse_lsn).transpose()?;
    let start_time = unix_now();

    fs::create_dir_all(&args.common.tmpdir)?;
    let result = run(&args, lsn, compression, start_time);
    if let Err(err) = fs::remove_dir_all(&args.common.tmpdir) {
        warn!("failed to remove tmpdir: {err}");
    }
    result
}

fn run(args: &BackupArgs, lsn: Option<u64>, compression: Compression, start_time: i64) -> Result<()> {
    let common = &args.common;
    let transport = Transport::new(
        common.retries,
        Duration::from_secs(common.pause),
        None,
        &common.rsync_args,
    );

    // An incremental run needs the prior manifest; failing to fetch it is fatal.
    let input_file_list = if lsn.is_some() {
        let url = args.file_list.as_deref().ok_or_else(|| {
            Error::Cli("incremental backup requires a prior file list (-f)".into())
        })?;
        let local = common.tmpdir.join("file.list");
        transport.copy_in(url, &local)?;
        FileList::load(&local)?
    } else {
        FileList::new()
    };

    let cfg = Config {
        pgdata: common.pgdata.clone(),
        backup_path: common.backup_path.clone(),
        lsn,
        last_ts: args.after,
        compression,
        tmpdir: common.tmpdir.clone(),
        retries: common.retries,
        pause: Duration::from_secs(common.pause),
        block_size: common.block_size,
        magic: common.magic,
        bandwidth: per_worker_limit(common.bandwidth_limit, common.parallel),
        rsync_args: common.rsync_args.clone(),
        input_file_list: Arc::new(input_file_list),
    };

    let excludes: Vec<String> = common_split(&args.exclude);
    let driver = TreeDriver::new(common.parallel, &excludes, start_time)?;
    let bandwidth_map = parse_bandwidth_map(&common.tablespaces_bandwidth)?;
    let mut processed = FileList::new();

    // Tablespaces first; their processed entries shadow the main walk. Only
    // targets inside the data directory get their own traversal, the link
    // itself is recreated from configuration on restore either way.
    for (name, target) in parse_tablespace_map(&common.tablespaces)? {
        let link = cfg.pgdata.join("pg_tblspc").join(&name);
        let actual = fs::read_link(&link)?;
        if actual != target {
            return Err(Error::TablespaceMismatch {
                name,
                expected: target.display().to_string(),
                actual: actual.display().to_string(),
            }
            .into());
        }
        if !target.starts_with(&cfg.pgdata) {
            continue;
        }
        let ts_bandwidth = bandwidth_map
            .get(&name)
            .copied()
            .or(common.bandwidth_limit);
        let ts_cfg = cfg.with_bandwidth(per_worker_limit(ts_bandwidth, common.parallel));
        info!(tablespace = %name, target = %target.display(), "backing up tablespace");
        driver.backup_tree(&ts_cfg, &target, &mut processed)?;
    }

    info!(pgdata = %cfg.pgdata.display(), "backing up data directory");
    driver.backup_tree(&cfg, &cfg.pgdata, &mut processed)?;

    let include: Vec<PathBuf> = common_split(&args.include_files)
        .iter()
        .map(|p| relative_to(Path::new(p), &cfg.pgdata))
        .collect();
    if !include.is_empty() {
        driver.backup_paths(&cfg, include, &mut processed)?;
    }

    // pg_control is the consistency fencepost, strictly after every other file.
    let pg_control = Path::new("global/pg_control");
    let outcome = backup_file(
        &cfg.with_lsn(None).with_compression(Compression::NONE),
        pg_control,
    );
    if !outcome.ok {
        return Err(Error::PgControlFailed.into());
    }
    processed.insert_file(pg_control, fs::metadata(cfg.pgdata.join(pg_control))?.len());

    // The manifest goes up only once pg_control is safe.
    processed.save(&cfg.tmpdir.join("file.list"))?;
    transport.send_relative(
        &cfg.tmpdir,
        Path::new("file.list"),
        &cfg.backup_path,
        false,
    )?;
    info!(entries = processed.len(), "backup complete");
    Ok(())
}

fn common_split(spec: &str) -> Vec<String> {
    spec.split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
