//! Classification of raw file-change paths into reconciliation requests.

use std::path::{Path, PathBuf};

use lockstep_core::{ArtifactKind, ProjectLayout};

#[derive(Debug, Clone)]
pub struct ChangeRouter {
    lockfile: PathBuf,
    library: PathBuf,
    metadata_file: String,
    excluded_dirs: Vec<String>,
}

impl ChangeRouter {
    pub fn new(layout: &ProjectLayout) -> Self {
        Self {
            lockfile: layout.lockfile.clone(),
            library: layout.library.clone(),
            metadata_file: layout.metadata_file.clone(),
            excluded_dirs: layout.excluded_dirs.clone(),
        }
    }

    /// Which artifact, if any, a change at `path` may have affected.
    ///
    /// Library changes count when the path is a directory or a metadata file,
    /// unless it is (or sits directly inside) an excluded bookkeeping
    /// directory.
    pub fn classify(&self, path: &Path) -> Option<ArtifactKind> {
        if path == self.lockfile {
            return Some(ArtifactKind::Lockfile);
        }
        if !path.starts_with(&self.library) {
            return None;
        }

        let name = file_name(path);
        if !path.is_dir() && name != Some(self.metadata_file.as_str()) {
            return None;
        }
        let parent = path.parent().and_then(file_name);
        if self.is_excluded(name) || self.is_excluded(parent) {
            return None;
        }
        Some(ArtifactKind::Library)
    }

    /// Classify a batch, keeping arrival order and dropping unrelated paths.
    pub fn route<P: AsRef<Path>>(&self, paths: &[P]) -> Vec<ArtifactKind> {
        paths
            .iter()
            .filter_map(|path| {
                let kind = self.classify(path.as_ref());
                if let Some(kind) = kind {
                    tracing::trace!(path = %path.as_ref().display(), artifact = %kind, "routed change");
                }
                kind
            })
            .collect()
    }

    pub fn library_exists(&self) -> bool {
        self.library.is_dir()
    }

    fn is_excluded(&self, name: Option<&str>) -> bool {
        name.is_some_and(|name| self.excluded_dirs.iter().any(|dir| dir == name))
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}
