//! Run configuration shared by per-file tasks.
//!
//! `Config` is an immutable value; dispatch derives per-task variants through
//! the `with_*` builders (a `.conf` file clears the watermark and codec, a
//! tablespace walk swaps the bandwidth cap). The prior manifest sits behind
//! an `Arc` so derived configs stay cheap to clone across workers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::compress::Compression;
use crate::manifest::FileList;
use crate::transport::Transport;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub pgdata: PathBuf,
    pub backup_path: String,
    /// Incremental watermark; `None` means full mode.
    pub lsn: Option<u64>,
    /// Unix-time mtime cutoff for the unchanged-file shortcut.
    pub last_ts: Option<i64>,
    pub compression: Compression,
    pub tmpdir: PathBuf,
    pub retries: u32,
    pub pause: Duration,
    pub block_size: usize,
    pub magic: u32,
    /// Effective per-worker transport cap in KB/s.
    pub bandwidth: Option<u64>,
    pub rsync_args: String,
    /// Manifest of the prior backup (incremental) or of the backup being
    /// restored.
    pub input_file_list: Arc<FileList>,
}

impl Config {
    pub fn with_lsn(&self, lsn: Option<u64>) -> Self {
        let mut cfg = self.clone();
        cfg.lsn = lsn;
        cfg
    }

    pub fn with_compression(&self, compression: Compression) -> Self {
        let mut cfg = self.clone();
        cfg.compression = compression;
        cfg
    }

    pub fn with_bandwidth(&self, bandwidth: Option<u64>) -> Self {
        let mut cfg = self.clone();
        cfg.bandwidth = bandwidth;
        cfg
    }

    pub fn transport(&self) -> Transport {
        Transport::new(self.retries, self.pause, self.bandwidth, &self.rsync_args)
    }
}

/// Split a global KB/s cap across the worker pool; every worker keeps at
/// least 1 KB/s.
pub fn per_worker_limit(total: Option<u64>, workers: usize) -> Option<u64> {
    total.map(|kbps| (kbps / workers.max(1) as u64).max(1))
}

/// Parse `name:path,...` tablespace mappings.
pub fn parse_tablespace_map(spec: &str) -> Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for part in spec.split(',').filter(|p| !p.is_empty()) {
        let (name, path) = part
            .split_once(':')
            .ok_or_else(|| Error::Cli(format!("malformed tablespace entry: {part}")))?;
        out.push((name.to_string(), PathBuf::from(path)));
    }
    Ok(out)
}

/// Parse `name:KBps,...` per-tablespace bandwidth caps.
pub fn parse_bandwidth_map(spec: &str) -> Result<HashMap<String, u64>> {
    let mut out = HashMap::new();
    for part in spec.split(',').filter(|p| !p.is_empty()) {
        let (name, kbps) = part
            .split_once(':')
            .ok_or_else(|| Error::Cli(format!("malformed bandwidth entry: {part}")))?;
        let kbps: u64 = kbps
            .parse()
            .map_err(|_| Error::Cli(format!("malformed bandwidth entry: {part}")))?;
        out.insert(name.to_string(), kbps);
    }
    Ok(out)
}
