//! Byte storage for documents and snapshots.
//!
//! Artifacts are addressed by relative names such as `report.xlsx` or
//! `backups/report_20240301_120000_000.xlsx`. Names that could escape the
//! storage root are rejected.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid artifact name '{0}'")]
    InvalidName(String),

    #[error("Storage I/O failed for '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(name: &str, source: io::Error) -> Self {
        Self::Io {
            name: name.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// An artifact found by [`Storage::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    /// Name relative to the storage root.
    pub name: String,
    pub modified: SystemTime,
    pub size: u64,
}

/// Where document bytes live.
pub trait Storage: Send + Sync {
    /// Full contents, or `None` if the artifact does not exist.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the artifact atomically: readers see the old bytes or the new
    /// bytes, never a mix.
    fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;

    fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Returns whether something was deleted.
    fn delete(&self, name: &str) -> Result<bool>;

    fn exists(&self, name: &str) -> Result<bool>;

    /// Files directly inside `dir`. A missing directory lists as empty.
    fn list(&self, dir: &str) -> Result<Vec<ArtifactInfo>>;
}

/// Storage rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it is missing.
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| StorageError::io(".", e))
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let clean = !name.is_empty()
            && !name.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn resolve_dir(&self, dir: &str) -> Result<PathBuf> {
        if dir.is_empty() || dir == "." {
            Ok(self.root.clone())
        } else {
            self.resolve(dir)
        }
    }
}

impl Storage for FsStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(name, e)),
        }
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(name)?;
        atomic_write(&path, bytes).map_err(|e| StorageError::io(name, e))
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        let bytes = self
            .read(from)?
            .ok_or_else(|| StorageError::io(from, io::ErrorKind::NotFound.into()))?;
        self.write(to, &bytes)
    }

    fn delete(&self, name: &str) -> Result<bool> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(name, e)),
        }
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let path = self.resolve(name)?;
        Ok(path.is_file())
    }

    fn list(&self, dir: &str) -> Result<Vec<ArtifactInfo>> {
        let path = self.resolve_dir(dir)?;
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(dir, e)),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(dir, e))?;
            let meta = entry.metadata().map_err(|e| StorageError::io(dir, e))?;
            if !meta.is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let name = if path == self.root {
                file_name
            } else {
                format!("{}/{file_name}", dir.trim_end_matches('/'))
            };
            found.push(ArtifactInfo {
                name,
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: meta.len(),
            });
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }
}

/// Write to a temp file beside `dest`, sync it, then rename it into place.
fn atomic_write(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;

    // Directory sync is best-effort; the file is already in place.
    let _ = File::open(dir).and_then(|d| d.sync_all());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, FsStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        (dir, storage)
    }

    #[test]
    fn test_read_missing_is_none() {
        let (_dir, storage) = storage();
        assert_eq!(storage.read("nothing.xlsx").unwrap(), None);
        assert!(!storage.exists("nothing.xlsx").unwrap());
        assert!(!storage.delete("nothing.xlsx").unwrap());
    }

    #[test]
    fn test_write_creates_directories() {
        let (_dir, storage) = storage();
        storage.write("backups/a.xlsx", b"one").unwrap();
        assert_eq!(storage.read("backups/a.xlsx").unwrap().as_deref(), Some(&b"one"[..]));

        storage.write("backups/a.xlsx", b"two").unwrap();
        assert_eq!(storage.read("backups/a.xlsx").unwrap().as_deref(), Some(&b"two"[..]));
    }

    #[test]
    fn test_copy_and_delete() {
        let (_dir, storage) = storage();
        storage.write("a.xlsx", b"data").unwrap();
        storage.copy("a.xlsx", "b.xlsx").unwrap();
        assert!(storage.exists("b.xlsx").unwrap());
        assert!(storage.delete("a.xlsx").unwrap());
        assert!(!storage.exists("a.xlsx").unwrap());
        assert!(storage.copy("a.xlsx", "c.xlsx").is_err());
    }

    #[test]
    fn test_list_only_files_in_dir() {
        let (_dir, storage) = storage();
        storage.write("top.xlsx", b"1").unwrap();
        storage.write("backups/one.xlsx", b"22").unwrap();
        storage.write("backups/two.xlsx", b"333").unwrap();

        let root: Vec<_> = storage.list("").unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(root, vec!["top.xlsx"]);

        let backups = storage.list("backups").unwrap();
        let names: Vec<_> = backups.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["backups/one.xlsx", "backups/two.xlsx"]);
        assert_eq!(backups[1].size, 3);

        assert!(storage.list("missing").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_escaping_names() {
        let (_dir, storage) = storage();
        for name in ["", "../x.xlsx", "a/../../x.xlsx", "/etc/passwd", "./a.xlsx", "a\\b.xlsx"] {
            assert!(
                matches!(storage.read(name), Err(StorageError::InvalidName(_))),
                "{name:?}"
            );
        }
        assert!(storage.write("../x.xlsx", b"x").is_err());
    }
}
