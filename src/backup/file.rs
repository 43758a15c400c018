//! The per-file backup algorithm.
//!
//! A file with a set watermark goes through the incremental scan: every page
//! whose LSN is at or above the watermark lands in the artifact, behind a
//! prefix listing the selected page indices. A short tail read or an invalid
//! page header escalates the whole file to full-copy mode, the same shape a
//! file without a watermark takes. Files whose size and mtime match the prior
//! backup are reduced to a bare `[magic]` marker.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::artifact;
use crate::config::Config;
use crate::page::{PageHeader, HEADER_LEN};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub rel: PathBuf,
    pub ok: bool,
}

/// Back up one file: write its artifact under `tmpdir`, transport it to the
/// backup location, unlink the temp copy. Errors are logged, never raised;
/// the driver decides whether a failed file is fatal.
pub fn backup_file(cfg: &Config, rel: &Path) -> FileOutcome {
    let ok = match run(cfg, rel) {
        Ok(()) => true,
        Err(err) => {
            error!(path = %rel.display(), "backup failed: {err:?}");
            false
        }
    };
    FileOutcome {
        rel: rel.to_path_buf(),
        ok,
    }
}

fn run(cfg: &Config, rel: &Path) -> Result<()> {
    let src = cfg.pgdata.join(rel);
    let meta = fs::metadata(&src)?;

    let tmp = cfg.tmpdir.join(rel);
    if let Some(parent) = tmp.parent() {
        fs::create_dir_all(parent)?;
    }

    if is_unchanged(cfg, rel, meta.len(), meta.mtime()) {
        debug!(path = %rel.display(), "unchanged since prior backup");
        write_unchanged_artifact(cfg, &tmp)?;
    } else {
        match cfg.lsn {
            Some(watermark) => match scan_changed_pages(cfg, &src, watermark)? {
                Some(pages) => {
                    debug!(path = %rel.display(), changed = pages.len(), "incremental scan done");
                    write_incremental_artifact(cfg, &src, &tmp, &pages)?;
                }
                None => {
                    info!(path = %rel.display(), "falling back to full copy");
                    write_full_artifact(cfg, &src, &tmp)?;
                }
            },
            None => write_full_artifact(cfg, &src, &tmp)?,
        }
    }

    cfg.transport()
        .send_relative(&cfg.tmpdir, rel, &cfg.backup_path, false)?;
    fs::remove_file(&tmp)?;
    Ok(())
}

/// The unchanged shortcut applies only to incremental runs with a timestamp
/// cutoff: same size as the prior backup and not modified since.
fn is_unchanged(cfg: &Config, rel: &Path, file_size: u64, mtime: i64) -> bool {
    if cfg.lsn.is_none() {
        return false;
    }
    let Some(last_ts) = cfg.last_ts else {
        return false;
    };
    cfg.input_file_list.size_of(rel) == Some(file_size) && mtime < last_ts
}

/// Phase one of the incremental path: walk the file page by page and collect
/// the indices whose LSN clears the watermark. `None` escalates to full mode.
fn scan_changed_pages(cfg: &Config, src: &Path, watermark: u64) -> Result<Option<Vec<u64>>> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut buf = vec![0u8; cfg.block_size];
    let mut pages = Vec::new();
    let mut index: u64 = 0;
    loop {
        let n = artifact::read_block(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        if n < cfg.block_size {
            warn!(block = index, got = n, "short page read, escalating to full copy");
            return Ok(None);
        }
        let header: &[u8; HEADER_LEN] = buf[..HEADER_LEN].try_into().unwrap();
        let header = PageHeader::parse(header);
        if !header.is_correct(cfg.block_size) {
            warn!(block = index, "invalid page header, escalating to full copy");
            return Ok(None);
        }
        if header.lsn() >= watermark {
            pages.push(index);
        }
        index += 1;
    }
    Ok(Some(pages))
}

fn write_incremental_artifact(
    cfg: &Config,
    src: &Path,
    tmp: &Path,
    pages: &[u64],
) -> Result<()> {
    let mut writer = cfg.compression.writer(File::create(tmp)?);
    artifact::write_prefix(&mut writer, cfg.magic, pages)?;

    let file = File::open(src)?;
    let mut buf = vec![0u8; cfg.block_size];
    for &page in pages {
        file.read_exact_at(&mut buf, page * cfg.block_size as u64)?;
        writer.write_all(&buf)?;
    }
    writer.finish()?.sync_all()?;
    Ok(())
}

fn write_full_artifact(cfg: &Config, src: &Path, tmp: &Path) -> Result<()> {
    let mut writer = cfg.compression.writer(File::create(tmp)?);
    let mut reader = File::open(src)?;
    io::copy(&mut reader, &mut writer)?;
    writer.finish()?.sync_all()?;
    Ok(())
}

fn write_unchanged_artifact(cfg: &Config, tmp: &Path) -> Result<()> {
    let mut writer = cfg.compression.writer(File::create(tmp)?);
    artifact::write_full_prefix(&mut writer, cfg.magic)?;
    writer.finish()?.sync_all()?;
    Ok(())
}
