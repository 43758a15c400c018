#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pgback::compress::Compression;
use pgback::config::Config;
use pgback::manifest::FileList;

pub const BLCKSZ: usize = 8192;
pub const MAGIC: u32 = 2359285;

/// Build a valid page: correct header with the given LSN, payload filled with
/// a recognizable byte.
pub fn make_page(lsn: u64, fill: u8) -> Vec<u8> {
    let mut page = vec![fill; BLCKSZ];
    write_header(&mut page, lsn, (BLCKSZ + 4) as u16);
    page
}

/// Same as [`make_page`] but with a bogus layout version, which the validity
/// predicate rejects.
pub fn make_invalid_page(lsn: u64, fill: u8) -> Vec<u8> {
    let mut page = vec![fill; BLCKSZ];
    write_header(&mut page, lsn, 5);
    page
}

fn write_header(page: &mut [u8], lsn: u64, version: u16) {
    page[0..4].copy_from_slice(&((lsn >> 32) as u32).to_le_bytes());
    page[4..8].copy_from_slice(&(lsn as u32).to_le_bytes());
    page[8..10].copy_from_slice(&0u16.to_le_bytes()); // checksum
    page[10..12].copy_from_slice(&0u16.to_le_bytes()); // flags
    page[12..14].copy_from_slice(&24u16.to_le_bytes()); // lower
    page[14..16].copy_from_slice(&128u16.to_le_bytes()); // upper
    page[16..18].copy_from_slice(&(BLCKSZ as u16).to_le_bytes()); // special
    page[18..20].copy_from_slice(&version.to_le_bytes());
    page[20..24].copy_from_slice(&0u32.to_le_bytes()); // prune_xid
}

/// Write `pages` concatenated as one relation file under `pgdata`.
pub fn write_relation(pgdata: &Path, rel: &str, pages: &[Vec<u8>]) {
    let path = pgdata.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut bytes = Vec::new();
    for page in pages {
        bytes.extend_from_slice(page);
    }
    fs::write(path, bytes).unwrap();
}

/// Minimal data directory skeleton: a backup_label and a pg_control stand-in.
pub fn seed_pgdata(pgdata: &Path) {
    fs::create_dir_all(pgdata.join("global")).unwrap();
    fs::write(
        pgdata.join("global/pg_control"),
        vec![0x5Au8; BLCKSZ],
    )
    .unwrap();
    fs::write(
        pgdata.join("backup_label"),
        "START WAL LOCATION: 0/2000028\n",
    )
    .unwrap();
}

/// Config for driving the per-file routines directly, bypassing the CLI.
pub fn test_config(pgdata: &Path, backup_path: &Path, tmpdir: &Path) -> Config {
    Config {
        pgdata: pgdata.to_path_buf(),
        backup_path: backup_path.display().to_string(),
        lsn: None,
        last_ts: None,
        compression: Compression::NONE,
        tmpdir: tmpdir.to_path_buf(),
        retries: 1,
        pause: Duration::ZERO,
        block_size: BLCKSZ,
        magic: MAGIC,
        bandwidth: None,
        rsync_args: String::new(),
        input_file_list: Arc::new(FileList::new()),
    }
}

pub fn with_file_list(cfg: Config, list: FileList) -> Config {
    Config {
        input_file_list: Arc::new(list),
        ..cfg
    }
}

/// Run the CLI entry point with string arguments.
pub fn run_cli(args: &[&str]) -> pgback::Result<()> {
    let argv: Vec<String> = std::iter::once("pgback".to_string())
        .chain(args.iter().map(|s| s.to_string()))
        .collect();
    pgback::run(argv)
}

/// Shorthand for the flags every test run shares.
pub fn base_args(pgdata: &Path, backup: &Path, tmpdir: &Path) -> Vec<String> {
    vec![
        "-D".into(),
        pgdata.display().to_string(),
        "-b".into(),
        backup.display().to_string(),
        "-t".into(),
        tmpdir.display().to_string(),
        "-r".into(),
        "1".into(),
        "-s".into(),
        "0".into(),
    ]
}

pub fn run_backup(pgdata: &Path, backup: &Path, tmpdir: &Path, extra: &[&str]) -> pgback::Result<()> {
    let mut argv = vec!["pgback".to_string(), "backup".to_string()];
    argv.extend(base_args(pgdata, backup, tmpdir));
    argv.extend(extra.iter().map(|s| s.to_string()));
    pgback::run(argv)
}

pub fn run_restore(pgdata: &Path, backup: &Path, tmpdir: &Path, extra: &[&str]) -> pgback::Result<()> {
    let mut argv = vec!["pgback".to_string(), "restore".to_string()];
    argv.extend(base_args(pgdata, backup, tmpdir));
    argv.extend(extra.iter().map(|s| s.to_string()));
    pgback::run(argv)
}

/// Flatten a directory tree into (relative path, contents) pairs for
/// byte-for-byte comparisons.
pub fn snapshot_tree(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut out = Vec::new();
    collect(root, root, &mut out);
    out.sort();
    out
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, Vec<u8>)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        let meta = fs::symlink_metadata(&path).unwrap();
        if meta.is_dir() {
            collect(root, &path, out);
        } else if meta.is_file() {
            out.push((
                path.strip_prefix(root).unwrap().to_path_buf(),
                fs::read(&path).unwrap(),
            ));
        }
    }
}
