//! Ordered, de-duplicated list of input files.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{ConvertError, Result};

/// Input files for one batch, in insertion order.
///
/// Every entry is an absolute path to a regular file. Adding a path that is
/// already present is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputList {
    paths: Vec<PathBuf>,
}

impl InputList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, or the regular files directly inside a directory in name
    /// order. Returns how many new entries were added.
    pub fn add(&mut self, path: &Path) -> Result<usize> {
        let meta = fs::metadata(path).map_err(|e| ConvertError::io(path, e))?;
        if meta.is_file() {
            return Ok(usize::from(self.push(path)?));
        }
        if !meta.is_dir() {
            return Err(ConvertError::prerequisite(format!(
                "{} is neither a file nor a directory",
                path.display()
            )));
        }

        let mut added = 0;
        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                ConvertError::io(path, source)
            })?;
            if entry.file_type().is_file() && self.push(entry.path())? {
                added += 1;
            }
        }
        tracing::debug!("added {added} files from {}", path.display());
        Ok(added)
    }

    /// Add each path in turn; stops at the first error.
    pub fn extend<I, P>(&mut self, paths: I) -> Result<usize>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut added = 0;
        for p in paths {
            added += self.add(p.as_ref())?;
        }
        Ok(added)
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let before = self.paths.len();
        self.paths.retain(|p| p != &target);
        self.paths.len() != before
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    pub fn into_paths(self) -> Vec<PathBuf> {
        self.paths
    }

    fn push(&mut self, path: &Path) -> Result<bool> {
        let absolute = fs::canonicalize(path).map_err(|e| ConvertError::io(path, e))?;
        if self.paths.contains(&absolute) {
            return Ok(false);
        }
        self.paths.push(absolute);
        Ok(true)
    }
}

impl IntoIterator for InputList {
    type Item = PathBuf;
    type IntoIter = std::vec::IntoIter<PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.into_iter()
    }
}
