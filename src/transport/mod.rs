//! Retried copies between the data directory, the scratch directory and the
//! backup location.
//!
//! Remote destinations (`host:path`, `user@host:path`) go through rsync with
//! `-R`/`-Rd` for relative-path preservation; purely local copies skip the
//! subprocess and use the filesystem directly. This is the only component
//! allowed to fail a run on plain I/O errors.

use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Transport {
    pub retries: u32,
    pub pause: Duration,
    /// Per-worker cap in KB/s, forwarded to rsync as `--bwlimit`.
    pub bwlimit: Option<u64>,
    pub extra_args: Vec<String>,
}

impl Transport {
    pub fn new(retries: u32, pause: Duration, bwlimit: Option<u64>, rsync_args: &str) -> Self {
        Self {
            retries,
            pause,
            bwlimit,
            extra_args: rsync_args.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// Upload `base/rel` to `dst_root`, recreating `rel` underneath it.
    /// With `dirs_only` the path itself is materialized as an empty directory.
    pub fn send_relative(
        &self,
        base: &Path,
        rel: &Path,
        dst_root: &str,
        dirs_only: bool,
    ) -> Result<()> {
        let src = format!("{}/./{}", base.display(), rel.display());
        self.with_retries(&src, dst_root, || {
            if is_remote(dst_root) {
                self.rsync(&src, dst_root, dirs_only)
            } else {
                let dst = Path::new(dst_root).join(rel);
                if dirs_only {
                    fs::create_dir_all(&dst)?;
                } else {
                    if let Some(parent) = dst.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::copy(base.join(rel), &dst)?;
                }
                Ok(())
            }
        })
    }

    /// Fetch a single file `src` into the local path `dst`.
    pub fn copy_in(&self, src: &str, dst: &Path) -> Result<()> {
        let dst_desc = dst.display().to_string();
        self.with_retries(src, &dst_desc, || {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            if is_remote(src) {
                self.rsync(src, &dst_desc, false)
            } else {
                fs::copy(src, dst)?;
                Ok(())
            }
        })
    }

    fn rsync(&self, src: &str, dst: &str, dirs_only: bool) -> Result<()> {
        let mut cmd = Command::new("rsync");
        cmd.arg(if dirs_only { "-Rd" } else { "-R" });
        if let Some(kbps) = self.bwlimit {
            cmd.arg(format!("--bwlimit={kbps}"));
        }
        cmd.args(&self.extra_args);
        cmd.arg(src).arg(dst);
        debug!(?cmd, "rsync");
        let status = cmd.status()?;
        if !status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("rsync exited with {status}"),
            )
            .into());
        }
        Ok(())
    }

    fn with_retries(
        &self,
        src: &str,
        dst: &str,
        mut op: impl FnMut() -> Result<()>,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.retries => {
                    warn!(attempt, src, dst, "transport attempt failed: {err:#}");
                    thread::sleep(self.pause);
                }
                Err(err) => {
                    return Err(Error::TransportExhausted {
                        src: src.to_string(),
                        dst: dst.to_string(),
                        attempts: attempt,
                        last: format!("{err:#}"),
                    }
                    .into())
                }
            }
        }
    }
}

/// `host:path` and `user@host:path` are remote; anything with a slash before
/// the first colon (or no colon at all) is local.
pub fn is_remote(spec: &str) -> bool {
    match spec.find(':') {
        Some(idx) => !spec[..idx].contains('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_remote_specs() {
        assert!(is_remote("backup:/srv/backups"));
        assert!(is_remote("user@host:backups"));
        assert!(!is_remote("/srv/backups"));
        assert!(!is_remote("relative/dir"));
        assert!(!is_remote("./odd:name/dir"));
    }

    #[test]
    fn local_send_preserves_relative_path() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let rel = Path::new("base/1/1234");
        fs::create_dir_all(src.path().join("base/1")).unwrap();
        fs::write(src.path().join(rel), b"contents").unwrap();

        let transport = Transport::new(1, Duration::ZERO, None, "");
        transport
            .send_relative(src.path(), rel, &dst.path().display().to_string(), false)
            .unwrap();
        assert_eq!(fs::read(dst.path().join(rel)).unwrap(), b"contents");
    }

    #[test]
    fn exhaustion_reports_attempt_count() {
        let dst = tempfile::tempdir().unwrap();
        let transport = Transport::new(3, Duration::ZERO, None, "");
        let err = transport
            .copy_in("/nonexistent/source/file", &dst.path().join("out"))
            .unwrap_err();
        let err = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(
            err,
            Error::TransportExhausted { attempts: 3, .. }
        ));
    }
}
