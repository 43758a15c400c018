//! Fixed-size worker pool for per-file tasks.
//!
//! Tasks share no mutable state; workers drain a common queue and report
//! over a channel. The manifest is only ever touched by the driver after
//! harvesting, never by workers.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::error;

use crate::backup::backup_file;
use crate::config::Config;
use crate::restore::restore_file;
use crate::Result;

#[derive(Debug, Clone)]
pub enum Task {
    BackupFile { rel: PathBuf, cfg: Config },
    MaterializeDir { rel: PathBuf, cfg: Config },
    RestoreFile { rel: PathBuf, cfg: Config },
}

#[derive(Debug, Clone)]
pub enum TaskResult {
    Backup {
        rel: PathBuf,
        is_dir: bool,
        ok: bool,
    },
    Restore {
        rel: PathBuf,
        ok: bool,
    },
}

/// Run every task on a pool of `workers` OS threads. Results come back in
/// completion order and are re-sorted so the driver harvests them in
/// submission order.
pub fn run_tasks(tasks: Vec<Task>, workers: usize) -> Vec<TaskResult> {
    if tasks.is_empty() {
        return Vec::new();
    }
    let worker_count = workers.max(1).min(tasks.len());
    let queue: Arc<Mutex<VecDeque<(usize, Task)>>> =
        Arc::new(Mutex::new(tasks.into_iter().enumerate().collect()));
    let (tx, rx) = mpsc::channel();

    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let queue = Arc::clone(&queue);
        let tx = tx.clone();
        handles.push(thread::spawn(move || loop {
            let task = queue.lock().pop_front();
            let Some((index, task)) = task else { break };
            if tx.send((index, execute(task))).is_err() {
                break;
            }
        }));
    }
    drop(tx);

    let mut results: Vec<(usize, TaskResult)> = rx.iter().collect();
    for handle in handles {
        let _ = handle.join();
    }
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

fn execute(task: Task) -> TaskResult {
    match task {
        Task::BackupFile { rel, cfg } => {
            let outcome = backup_file(&cfg, &rel);
            TaskResult::Backup {
                rel: outcome.rel,
                is_dir: false,
                ok: outcome.ok,
            }
        }
        Task::MaterializeDir { rel, cfg } => {
            let ok = materialize_dir(&cfg, &rel);
            TaskResult::Backup {
                rel,
                is_dir: true,
                ok,
            }
        }
        Task::RestoreFile { rel, cfg } => {
            let ok = restore_file(&cfg, &rel).is_some();
            TaskResult::Restore { rel, ok }
        }
    }
}

/// Transport an empty directory entry so restore can recreate empty leaves.
fn materialize_dir(cfg: &Config, rel: &Path) -> bool {
    match try_materialize_dir(cfg, rel) {
        Ok(()) => true,
        Err(err) => {
            error!(path = %rel.display(), "directory backup failed: {err:?}");
            false
        }
    }
}

fn try_materialize_dir(cfg: &Config, rel: &Path) -> Result<()> {
    fs::create_dir_all(cfg.tmpdir.join(rel))?;
    cfg.transport()
        .send_relative(&cfg.tmpdir, rel, &cfg.backup_path, true)?;
    Ok(())
}
