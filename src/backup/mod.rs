//! Per-file backup with incremental page selection and fall-back to full copy.

pub mod file;

pub use file::{backup_file, FileOutcome};
