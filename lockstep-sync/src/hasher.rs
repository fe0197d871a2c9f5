//! Current-state hashing for the lockfile and the package library.
//!
//! Both hashes are XXH3-64 digests rendered as 16 lowercase hex digits. An
//! empty string means "nothing to hash" and compares equal to a never-stored
//! hash.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use lockstep_core::{ArtifactKind, ProjectLayout};

/// Computes hashes from whatever is on disk at call time. Holds no cache.
#[derive(Debug, Clone)]
pub struct StateHasher {
    lockfile: PathBuf,
    library: PathBuf,
    metadata_file: String,
}

impl StateHasher {
    pub fn new(layout: &ProjectLayout) -> Self {
        Self {
            lockfile: layout.lockfile.clone(),
            library: layout.library.clone(),
            metadata_file: layout.metadata_file.clone(),
        }
    }

    pub fn compute(&self, kind: ArtifactKind) -> String {
        match kind {
            ArtifactKind::Lockfile => self.lockfile_hash(),
            ArtifactKind::Library => self.library_hash(),
        }
    }

    /// Hash of the raw lockfile bytes, or "" when the lockfile is absent.
    pub fn lockfile_hash(&self) -> String {
        match std::fs::read(&self.lockfile) {
            Ok(bytes) => hash_bytes(&bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => {
                tracing::warn!(
                    path = %self.lockfile.display(),
                    error = %err,
                    "failed to read lockfile; treating as absent",
                );
                String::new()
            }
        }
    }

    /// Hash of every metadata file under the library, concatenated in
    /// file-name-sorted traversal order. "" when there is no content.
    pub fn library_hash(&self) -> String {
        if !self.library.is_dir() {
            return String::new();
        }

        let mut hasher = Xxh3::new();
        let mut total = 0usize;
        let walker = WalkDir::new(&self.library)
            .follow_links(false)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable library entry");
                    continue;
                }
            };
            // Symlinked metadata is read through; a dangling one reads as empty.
            if entry.file_type().is_dir() || !self.is_metadata_file(entry.path()) {
                continue;
            }
            match std::fs::read(entry.path()) {
                Ok(bytes) => {
                    total += bytes.len();
                    hasher.update(&bytes);
                }
                Err(err) => {
                    tracing::warn!(
                        path = %entry.path().display(),
                        error = %err,
                        "failed to read package metadata; treating as empty",
                    );
                }
            }
        }

        if total == 0 {
            return String::new();
        }
        format_digest(hasher.digest())
    }

    fn is_metadata_file(&self, path: &Path) -> bool {
        path.file_name().and_then(|name| name.to_str()) == Some(self.metadata_file.as_str())
    }
}

/// XXH3-64 of `bytes` as 16 lowercase hex digits.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format_digest(xxh3_64(bytes))
}

fn format_digest(digest: u64) -> String {
    format!("{digest:016x}")
}
