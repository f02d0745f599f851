//! Output path resolution.
//!
//! Paths are pure functions of (root, product label, date). Directory creation
//! is kept in separate `prepare_*` calls so resolution can be used in dry runs.

use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

/// Local directory layout rooted at a configured output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<YYYYMM>/<prefix>.<category>.<YYYYMMDD>.<ext>`
    pub fn daily_file(&self, prefix: &str, category: &str, date: NaiveDate, ext: &str) -> PathBuf {
        self.root.join(date.format("%Y%m").to_string()).join(format!(
            "{}.{}.{}.{}",
            prefix,
            category,
            date.format("%Y%m%d"),
            ext
        ))
    }

    /// `<root>/<label>/<YYYY>`
    pub fn yearly_dir(&self, label: &str, year: i32) -> PathBuf {
        self.root.join(label).join(format!("{:04}", year))
    }
}

/// Create the parent directory of a file path if it is missing.
pub fn prepare_file(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Create a directory and its parents if missing.
pub fn prepare_dir(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)
}

/// Sibling path used while a transfer is in flight.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
