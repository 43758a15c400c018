//! Data-tree walking, task dispatch, manifest assembly and failure policy.

pub mod pool;

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::compress::Compression;
use crate::config::Config;
use crate::manifest::{dir_key, file_key, FileList};
use crate::{Error, Result};
use pool::{run_tasks, Task, TaskResult};

pub struct TreeDriver {
    workers: usize,
    excludes: GlobSet,
    /// Unix time the run began; files older than this that fail to back up
    /// are fatal, anything newer will reappear on WAL apply.
    start_time: i64,
}

impl TreeDriver {
    pub fn new(workers: usize, exclude_list: &[String], start_time: i64) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_list {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            workers,
            excludes: builder.build()?,
            start_time,
        })
    }

    /// Walk `root` depth-first and back up everything reachable, appending
    /// results to `processed` in submission order. Entries already in
    /// `processed` are skipped, so a tablespace traversal that ran first
    /// shadows the main walk.
    pub fn backup_tree(&self, cfg: &Config, root: &Path, processed: &mut FileList) -> Result<()> {
        let tasks = self.collect_backup_tasks(cfg, root, processed)?;
        let results = run_tasks(tasks, self.workers);
        self.harvest(cfg, results, processed)
    }

    /// Back up an explicit list of files, forced full with no compression.
    pub fn backup_paths(
        &self,
        cfg: &Config,
        rels: Vec<PathBuf>,
        processed: &mut FileList,
    ) -> Result<()> {
        let forced = cfg.with_lsn(None).with_compression(Compression::NONE);
        let tasks = rels
            .into_iter()
            .map(|rel| Task::BackupFile {
                rel,
                cfg: forced.clone(),
            })
            .collect();
        let results = run_tasks(tasks, self.workers);
        self.harvest(cfg, results, processed)
    }

    /// Dispatch a restore task for every file entry of the manifest.
    /// `bandwidth_overrides` pairs a relative-path prefix with the per-worker
    /// cap for work under that tablespace.
    pub fn restore_files(
        &self,
        cfg: &Config,
        list: &FileList,
        bandwidth_overrides: &[(String, Option<u64>)],
    ) -> Result<()> {
        let mut tasks = Vec::new();
        for (key, _) in list.files() {
            let rel = PathBuf::from(key);
            // .conf files and pg_control are always stored uncompressed.
            let mut task_cfg = if key.ends_with(".conf") || key == "global/pg_control" {
                cfg.with_compression(Compression::NONE)
            } else {
                cfg.clone()
            };
            if let Some((_, bandwidth)) = bandwidth_overrides
                .iter()
                .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            {
                task_cfg = task_cfg.with_bandwidth(*bandwidth);
            }
            tasks.push(Task::RestoreFile { rel, cfg: task_cfg });
        }

        let results = run_tasks(tasks, self.workers);
        let failed = results
            .iter()
            .filter(|r| matches!(r, TaskResult::Restore { ok: false, .. }))
            .count();
        if failed > 0 {
            return Err(Error::RestoreFailed(failed).into());
        }
        Ok(())
    }

    fn collect_backup_tasks(
        &self,
        cfg: &Config,
        root: &Path,
        processed: &FileList,
    ) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for entry in WalkDir::new(root).min_depth(1) {
            let entry = entry?;
            let rel = relative_to(entry.path(), &cfg.pgdata);
            let is_dir = entry.file_type().is_dir();
            let key = if is_dir { dir_key(&rel) } else { file_key(&rel) };

            if processed.contains_key(&key) {
                continue;
            }
            if self.excludes.is_match(key.as_str()) {
                continue;
            }

            if is_dir {
                tasks.push(Task::MaterializeDir {
                    rel,
                    cfg: cfg.clone(),
                });
            } else if entry.file_type().is_file() {
                let task_cfg = if rel.extension().is_some_and(|ext| ext == "conf") {
                    cfg.with_lsn(None).with_compression(Compression::NONE)
                } else if cfg.input_file_list.size_of(&rel).is_some() {
                    cfg.clone()
                } else {
                    cfg.with_lsn(None)
                };
                tasks.push(Task::BackupFile { rel, cfg: task_cfg });
            }
            // Symlinks (tablespace links) are recreated from configuration on
            // restore, not copied.
        }
        Ok(tasks)
    }

    /// Apply the per-file failure policy and record successes in the manifest.
    fn harvest(
        &self,
        cfg: &Config,
        results: Vec<TaskResult>,
        processed: &mut FileList,
    ) -> Result<()> {
        for result in results {
            let TaskResult::Backup { rel, is_dir, ok } = result else {
                continue;
            };
            let abs = cfg.pgdata.join(&rel);
            if ok {
                if is_dir {
                    processed.insert_dir(&rel);
                } else {
                    match fs::metadata(&abs) {
                        Ok(meta) => processed.insert_file(&rel, meta.len()),
                        Err(_) => {
                            info!(path = %rel.display(), "seems deleted during backup")
                        }
                    }
                }
            } else {
                let pre_existing = fs::metadata(&abs)
                    .map(|meta| meta.ctime() < self.start_time)
                    .unwrap_or(false);
                if pre_existing {
                    return Err(Error::PreExistingFileFailed(rel.display().to_string()).into());
                }
                warn!(path = %rel.display(), "should appear on wal apply");
            }
        }
        Ok(())
    }
}

/// Relative path of `path` with respect to `base`, producing `..` components
/// for targets outside the base (tablespaces living next to the data
/// directory).
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix(base) {
        return stripped.to_path_buf();
    }
    let base_comps: Vec<Component> = base.components().collect();
    let path_comps: Vec<Component> = path.components().collect();
    let mut common = 0;
    while common < base_comps.len()
        && common < path_comps.len()
        && base_comps[common] == path_comps[common]
    {
        common += 1;
    }
    let mut rel = PathBuf::new();
    for _ in common..base_comps.len() {
        rel.push("..");
    }
    for comp in &path_comps[common..] {
        rel.push(comp.as_os_str());
    }
    rel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_inside_and_outside_base() {
        assert_eq!(
            relative_to(Path::new("/data/base/1"), Path::new("/data")),
            PathBuf::from("base/1")
        );
        assert_eq!(
            relative_to(Path::new("/mnt/ts1/f"), Path::new("/data")),
            PathBuf::from("../mnt/ts1/f")
        );
        assert_eq!(
            relative_to(Path::new("/data"), Path::new("/data")),
            PathBuf::new()
        );
    }

    #[test]
    fn exclude_globs_match_whole_subtrees() {
        let driver = TreeDriver::new(1, &["*pg_xlog/*".to_string()], 0).unwrap();
        assert!(driver.excludes.is_match("pg_xlog/000000010000000000000001"));
        assert!(driver.excludes.is_match("pg_xlog/"));
        assert!(driver.excludes.is_match("nested/pg_xlog/segment"));
        assert!(!driver.excludes.is_match("base/1/1234"));
    }
}
