//! Implementation of `pgback restore`.
//!
//! Rebuilds a data directory from a backup: tablespace links first, then the
//! manifest drives per-file restores, empty directories are recreated, stale
//! paths are pruned, and `backup_label` is fetched last when missing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::cli::backup::unix_now;
use crate::cli::CommonArgs;
use crate::compress::Compression;
use crate::config::{
    parse_bandwidth_map, parse_tablespace_map, per_worker_limit, Config,
};
use crate::driver::{relative_to, TreeDriver};
use crate::logging::{init_logging, LoggingConfig};
use crate::manifest::{dir_key, file_key, FileList};
use crate::transport::Transport;
use crate::{Error, Result};

#[derive(Debug, Clone, Args)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

pub fn execute(args: RestoreArgs) -> Result<()> {
    init_logging(LoggingConfig::console(args.common.verbose))?;

    let compression: Compression = args.common.compress.parse()?;

    fs::create_dir_all(&args.common.tmpdir)?;
    let result = run(&args, compression);
    if let Err(err) = fs::remove_dir_all(&args.common.tmpdir) {
        warn!("failed to remove tmpdir: {err}");
    }
    result
}

fn run(args: &RestoreArgs, compression: Compression) -> Result<()> {
    let common = &args.common;
    let pgdata = &common.pgdata;
    let transport = Transport::new(
        common.retries,
        Duration::from_secs(common.pause),
        None,
        &common.rsync_args,
    );

    fs::create_dir_all(pgdata.join("pg_tblspc"))?;
    let tablespaces = parse_tablespace_map(&common.tablespaces)?;
    materialize_tablespace_links(pgdata, &tablespaces)?;

    let manifest_local = common.tmpdir.join("file.list");
    transport.copy_in(&format!("{}/file.list", common.backup_path), &manifest_local)?;
    let file_list = Arc::new(FileList::load(&manifest_local)?);
    info!(entries = file_list.len(), "manifest fetched");

    let cfg = Config {
        pgdata: pgdata.clone(),
        backup_path: common.backup_path.clone(),
        lsn: None,
        last_ts: None,
        compression,
        tmpdir: common.tmpdir.clone(),
        retries: common.retries,
        pause: Duration::from_secs(common.pause),
        block_size: common.block_size,
        magic: common.magic,
        bandwidth: per_worker_limit(common.bandwidth_limit, common.parallel),
        rsync_args: common.rsync_args.clone(),
        input_file_list: Arc::clone(&file_list),
    };

    let bandwidth_map = parse_bandwidth_map(&common.tablespaces_bandwidth)?;
    let overrides: Vec<(String, Option<u64>)> = tablespaces
        .iter()
        .filter(|(_, target)| target.starts_with(pgdata))
        .filter_map(|(name, target)| {
            bandwidth_map.get(name).map(|kbps| {
                let prefix = format!("{}/", relative_to(target, pgdata).display());
                (prefix, per_worker_limit(Some(*kbps), common.parallel))
            })
        })
        .collect();

    let driver = TreeDriver::new(common.parallel, &[], unix_now())?;
    driver.restore_files(&cfg, &file_list, &overrides)?;

    for dir in file_list.dirs() {
        fs::create_dir_all(pgdata.join(dir))?;
    }

    prune_stale(pgdata, &file_list, &tablespaces, &common.tmpdir)?;

    // A restore without backup_label cannot recover; fetch it if the backup
    // itself did not carry one.
    let label = pgdata.join("backup_label");
    if !label.exists() {
        transport
            .copy_in(&format!("{}/backup_label", common.backup_path), &label)
            .map_err(|err| Error::MissingBackupLabel(format!("{err:#}")))?;
    }
    info!("restore complete");
    Ok(())
}

/// Recreate the configured `pg_tblspc` symlinks, repairing wrong targets and
/// removing stale links that are no longer configured.
fn materialize_tablespace_links(
    pgdata: &Path,
    tablespaces: &[(String, PathBuf)],
) -> Result<()> {
    let tblspc = pgdata.join("pg_tblspc");
    for entry in fs::read_dir(&tblspc)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !tablespaces.iter().any(|(n, _)| *n == name) {
            info!(link = %name, "removing stale tablespace link");
            remove_entry(&entry.path())?;
        }
    }
    for (name, target) in tablespaces {
        let link = tblspc.join(name);
        match fs::read_link(&link) {
            Ok(actual) if actual == *target => {}
            Ok(_) => {
                fs::remove_file(&link)?;
                std::os::unix::fs::symlink(target, &link)?;
            }
            Err(_) => {
                if fs::symlink_metadata(&link).is_ok() {
                    remove_entry(&link)?;
                }
                std::os::unix::fs::symlink(target, &link)?;
            }
        }
        fs::create_dir_all(target)?;
    }
    Ok(())
}

/// Delete everything under `pgdata` that the manifest does not list, leaving
/// alone the configured tablespace links and the scratch directory. The main
/// walk skips in-pgdata tablespace subtrees; each of those targets then runs
/// its own pruning traversal against the same manifest.
fn prune_stale(
    pgdata: &Path,
    list: &FileList,
    tablespaces: &[(String, PathBuf)],
    tmpdir: &Path,
) -> Result<()> {
    let inside: Vec<&PathBuf> = tablespaces
        .iter()
        .filter(|(_, target)| target.starts_with(pgdata))
        .map(|(_, target)| target)
        .collect();
    let protected: Vec<PathBuf> = inside
        .iter()
        .map(|target| target.strip_prefix(pgdata).unwrap().to_path_buf())
        .collect();
    let links: Vec<PathBuf> = tablespaces
        .iter()
        .map(|(name, _)| PathBuf::from("pg_tblspc").join(name))
        .collect();

    prune_tree(pgdata, pgdata, list, &protected, &links, tmpdir)?;
    for target in inside {
        prune_tree(pgdata, target, list, &[], &links, tmpdir)?;
    }
    Ok(())
}

fn prune_tree(
    pgdata: &Path,
    root: &Path,
    list: &FileList,
    skip: &[PathBuf],
    links: &[PathBuf],
    tmpdir: &Path,
) -> Result<()> {
    let mut walker = WalkDir::new(root).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        if entry.path().starts_with(tmpdir) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(pgdata)
            .unwrap_or(entry.path())
            .to_path_buf();
        let is_dir = entry.file_type().is_dir();
        if skip.iter().any(|p| rel.starts_with(p)) {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }
        if links.contains(&rel) {
            continue;
        }
        let key = if is_dir { dir_key(&rel) } else { file_key(&rel) };
        if !list.contains_key(&key) {
            info!(path = %rel.display(), "pruning, not in manifest");
            if is_dir {
                fs::remove_dir_all(entry.path())?;
                walker.skip_current_dir();
            } else {
                fs::remove_file(entry.path())?;
            }
        }
    }
    Ok(())
}

fn remove_entry(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}
