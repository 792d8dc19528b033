use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::{Builder, TempDir};

use crate::domain::RecordId;
use crate::error::MetaError;

/// On-disk layout of a curation project.
///
/// ```text
/// raw/zenodo-metadata.json   metadata cache
/// raw/datasets/<record>/     extracted dataset archives
/// etc/{blacklist,whitelist,not-cldf}.csv
/// cldf/                      generated catalog
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    project_root: Utf8PathBuf,
}

impl Store {
    pub fn new(project_root: Utf8PathBuf) -> Self {
        Self { project_root }
    }

    pub fn from_path(path: &Path) -> Result<Self, MetaError> {
        let project_root = Utf8PathBuf::from_path_buf(path.to_path_buf())
            .map_err(|_| MetaError::Filesystem("invalid project path".to_string()))?;
        Ok(Self { project_root })
    }

    pub fn current_dir() -> Result<Self, MetaError> {
        let cwd = std::env::current_dir().map_err(|err| MetaError::Filesystem(err.to_string()))?;
        Self::from_path(&cwd)
    }

    pub fn project_root(&self) -> &Utf8Path {
        &self.project_root
    }

    pub fn raw_dir(&self) -> Utf8PathBuf {
        self.project_root.join("raw")
    }

    pub fn etc_dir(&self) -> Utf8PathBuf {
        self.project_root.join("etc")
    }

    pub fn cldf_dir(&self) -> Utf8PathBuf {
        self.project_root.join("cldf")
    }

    pub fn datasets_dir(&self) -> Utf8PathBuf {
        self.raw_dir().join("datasets")
    }

    pub fn dataset_dir(&self, id: RecordId) -> Utf8PathBuf {
        self.datasets_dir().join(id.to_string())
    }

    pub fn metadata_path(&self) -> Utf8PathBuf {
        self.raw_dir().join("zenodo-metadata.json")
    }

    pub fn blacklist_path(&self) -> Utf8PathBuf {
        self.etc_dir().join("blacklist.csv")
    }

    pub fn whitelist_path(&self) -> Utf8PathBuf {
        self.etc_dir().join("whitelist.csv")
    }

    pub fn not_cldf_path(&self) -> Utf8PathBuf {
        self.etc_dir().join("not-cldf.csv")
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), MetaError> {
        fs::create_dir_all(path.as_std_path()).map_err(|err| MetaError::Filesystem(err.to_string()))
    }

    /// A dataset counts as downloaded once its folder exists and holds
    /// at least one entry.
    pub fn dataset_present(&self, id: RecordId) -> bool {
        dir_has_entries(self.dataset_dir(id).as_std_path())
    }

    pub fn staging_dir(&self, prefix: &str, parent: &Utf8Path) -> Result<TempDir, MetaError> {
        Self::ensure_dir(parent)?;
        Builder::new()
            .prefix(prefix)
            .tempdir_in(parent.as_std_path())
            .map_err(|err| MetaError::Filesystem(err.to_string()))
    }

    pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), MetaError> {
        let mut content = serde_json::to_vec_pretty(value)
            .map_err(|err| MetaError::Filesystem(err.to_string()))?;
        content.push(b'\n');
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), MetaError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| MetaError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| MetaError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| MetaError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Moves a fully prepared directory into place, replacing whatever was
    /// there before.
    pub fn replace_dir(source: &Path, dest: &Utf8Path) -> Result<(), MetaError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| MetaError::Filesystem(err.to_string()))?;
        }
        atomic_rename_dir(source, dest.as_std_path())
            .map_err(|err| MetaError::Filesystem(format!("move into {dest}: {err}")))
    }
}

/// Lists every file below `root`, sorted by path.
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, MetaError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| MetaError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| MetaError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                items.push(path);
            }
        }
    }
    items.sort();
    Ok(items)
}

pub fn dir_has_entries(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}
