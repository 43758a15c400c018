//! The per-file restore algorithm, inverse of the backup side.
//!
//! The artifact is fetched into the scratch directory and opened through the
//! matching codec. A readable prefix selects the patch path: each listed page
//! is validated and written at its offset over the existing target, which is
//! then truncated down to the manifest size if longer. Anything else is a raw
//! full-file copy and the target is rewritten from scratch. Unlike backup,
//! a page-format violation here is a hard failure; the artifact no longer
//! matches the target state.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::artifact;
use crate::config::Config;
use crate::page::{PageHeader, HEADER_LEN};
use crate::{Error, Result};

/// Restore one manifest entry. Returns the path on success; errors are
/// logged and reported as `None` for the driver to count.
pub fn restore_file(cfg: &Config, rel: &Path) -> Option<PathBuf> {
    match run(cfg, rel) {
        Ok(()) => Some(rel.to_path_buf()),
        Err(err) => {
            error!(path = %rel.display(), "restore failed: {err:?}");
            None
        }
    }
}

fn run(cfg: &Config, rel: &Path) -> Result<()> {
    let tmp = cfg.tmpdir.join(rel);
    cfg.transport().copy_in(
        &format!("{}/{}", cfg.backup_path, rel.display()),
        &tmp,
    )?;

    let target = cfg.pgdata.join(rel);
    let mut reader = cfg.compression.reader(File::open(&tmp)?);
    match artifact::read_prefix(&mut reader, cfg.magic)? {
        Some(pages) if pages.is_empty() => {
            debug!(path = %rel.display(), "unchanged, leaving target alone");
        }
        Some(pages) => patch_pages(cfg, &mut reader, &target, rel, &pages)?,
        None => {
            // Raw full-file stream; restart from offset 0 by reopening.
            drop(reader);
            let mut reader = cfg.compression.reader(File::open(&tmp)?);
            rewrite_full(cfg, &mut reader, &target)?;
        }
    }

    fs::remove_file(&tmp)?;
    Ok(())
}

fn patch_pages(
    cfg: &Config,
    reader: &mut dyn Read,
    target: &Path,
    rel: &Path,
    pages: &[u64],
) -> Result<()> {
    let out = OpenOptions::new().read(true).write(true).open(target)?;
    let mut buf = vec![0u8; cfg.block_size];
    for &page in pages {
        let n = artifact::read_block(reader, &mut buf)?;
        if n < cfg.block_size {
            return Err(Error::PageRead(page).into());
        }
        let header: &[u8; HEADER_LEN] = buf[..HEADER_LEN].try_into().unwrap();
        if !PageHeader::parse(header).is_correct(cfg.block_size) {
            return Err(Error::PageFormat(page).into());
        }
        out.write_all_at(&buf, page * cfg.block_size as u64)?;
    }

    // The manifest size is authoritative; drop any tail beyond it.
    if let Some(size) = cfg.input_file_list.size_of(rel) {
        if out.metadata()?.len() > size {
            out.set_len(size)?;
        }
    }
    out.sync_all()?;
    Ok(())
}

fn rewrite_full(cfg: &Config, reader: &mut dyn Read, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(target)?;
    let mut buf = vec![0u8; cfg.block_size];
    loop {
        let n = artifact::read_block(reader, &mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
    }
    out.sync_all()?;
    Ok(())
}
