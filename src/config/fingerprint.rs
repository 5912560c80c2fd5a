//! Content fingerprints for change detection.
//!
//! # Design Decisions
//! - Identity is (mtime, length, SHA-256), never inode or file handle, so a
//!   file replaced by rename or delete+create is still seen as a change
//! - Metadata is compared first; content is hashed only when it differs
//! - A touched file with unchanged content is not a change

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

/// Snapshot of one file's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    modified: Option<SystemTime>,
    len: u64,
    sha256: Vec<u8>,
}

impl FileFingerprint {
    /// Fingerprint the file at `path`. `None` if it cannot be read.
    pub fn read(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        let content = fs::read(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok(),
            len: content.len() as u64,
            sha256: Sha256::digest(&content).to_vec(),
        })
    }

    fn same_metadata(&self, metadata: &fs::Metadata) -> bool {
        self.len == metadata.len() && self.modified.is_some() && self.modified == metadata.modified().ok()
    }
}

/// The set of files whose change should trigger a reload.
#[derive(Debug, Default)]
pub struct TrackedFiles {
    files: Vec<(PathBuf, Option<FileFingerprint>)>,
}

impl TrackedFiles {
    /// Start tracking `paths` with their current fingerprints. Absent files are tracked too.
    pub fn capture(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut tracked = Self::default();
        tracked.extend(paths);
        tracked
    }

    /// Track more paths. Already tracked paths keep their fingerprint.
    pub fn extend(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        for path in paths {
            if self.contains(&path) {
                continue;
            }
            let fingerprint = FileFingerprint::read(&path);
            self.files.push((path, fingerprint));
        }
    }

    /// Re-fingerprint every file, returning those that changed since the last look.
    pub fn poll_changes(&mut self) -> Vec<PathBuf> {
        let mut changed = Vec::new();

        for (path, recorded) in &mut self.files {
            let metadata = fs::metadata(&*path).ok();
            match (recorded.as_ref(), metadata) {
                (None, None) => continue,
                (Some(fp), Some(metadata)) if fp.same_metadata(&metadata) => continue,
                _ => {}
            }

            let current = FileFingerprint::read(path);
            let same_content = match (recorded.as_ref(), current.as_ref()) {
                (Some(fp), Some(now)) => fp.sha256 == now.sha256,
                (None, None) => true,
                _ => false,
            };

            if same_content {
                // Touched but identical; remember the new mtime.
                if let (Some(fp), Some(now)) = (recorded.as_mut(), current) {
                    fp.modified = now.modified;
                }
            } else {
                changed.push(path.clone());
                *recorded = current;
            }
        }

        changed
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.iter().any(|(tracked, _)| tracked == path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|(path, _)| path.as_path())
    }

    /// Parent directories to watch for filesystem events.
    pub fn directories(&self) -> BTreeSet<PathBuf> {
        self.paths()
            .map(|path| match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
