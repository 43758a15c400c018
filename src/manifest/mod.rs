//! The `file.list` manifest: one `<relative-path>|<size>` entry per line.
//!
//! Directory entries carry a trailing slash and size 0. Keys are unique and
//! order is irrelevant; a `BTreeMap` keeps serialization stable anyway.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileList {
    entries: BTreeMap<String, u64>,
}

impl FileList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_file(&mut self, rel: &Path, size: u64) {
        self.entries.insert(file_key(rel), size);
    }

    pub fn insert_dir(&mut self, rel: &Path) {
        self.entries.insert(dir_key(rel), 0);
    }

    /// Recorded size of a file entry; `None` for directories and unknown paths.
    pub fn size_of(&self, rel: &Path) -> Option<u64> {
        self.entries.get(&file_key(rel)).copied()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.entries.iter()
    }

    /// Directory entries, trailing slash stripped.
    pub fn dirs(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .filter(|k| k.ends_with('/'))
            .map(|k| k.trim_end_matches('/'))
    }

    /// File entries with their recorded sizes.
    pub fn files(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries
            .iter()
            .filter(|(k, _)| !k.ends_with('/'))
            .map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold another listing into this one, e.g. a tablespace traversal into
    /// the main data-directory listing.
    pub fn merge(&mut self, other: FileList) {
        self.entries.extend(other.entries);
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let (path, size) = line
                .rsplit_once('|')
                .ok_or_else(|| Error::MalformedFileList(line.to_string()))?;
            let size: u64 = size
                .parse()
                .map_err(|_| Error::MalformedFileList(line.to_string()))?;
            entries.insert(path.to_string(), size);
        }
        Ok(Self { entries })
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (path, size) in &self.entries {
            out.push_str(path);
            out.push('|');
            out.push_str(&size.to_string());
            out.push('\n');
        }
        out
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_text())?;
        Ok(())
    }
}

pub(crate) fn file_key(rel: &Path) -> String {
    rel.to_string_lossy().into_owned()
}

pub(crate) fn dir_key(rel: &Path) -> String {
    format!("{}/", rel.to_string_lossy())
}
