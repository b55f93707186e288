use std::io::Write;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use super::{BlobStore, BlobUsage};
use crate::error::StorageError;

/// Move a file from `src` to `dst`. Uses `rename` first (atomic on the same
/// filesystem) and falls back to copy + delete for cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Blob store rooted at a directory on the local filesystem.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a relative blob path under the root, rejecting anything that
    /// could escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Copies a file from outside the store into `path`.
    pub fn import_file(&self, source: &Path, path: &str) -> Result<u64, StorageError> {
        let content = std::fs::read(source).map_err(|e| StorageError::ReadFile {
            path: source.to_path_buf(),
            source: e,
        })?;
        self.put(path, &content)?;
        Ok(content.len() as u64)
    }
}

impl BlobStore for FileBlobStore {
    /// Writes to a sibling temp file and renames it into place, so a repeated
    /// write replaces the blob whole and readers never see a partial file.
    fn put(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            self.ensure_directory(parent)?;
        }

        let tmp = target.with_file_name(format!(
            ".tmp-{}-{}",
            uuid::Uuid::new_v4(),
            target
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("blob")
        ));
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .map_err(|e| StorageError::WriteFile {
                path: tmp.clone(),
                source: e,
            })?;
        file.write_all(content)
            .and_then(|_| file.sync_all())
            .map_err(|e| StorageError::WriteFile {
                path: tmp.clone(),
                source: e,
            })?;
        drop(file);

        if let Err(e) = move_file(&tmp, &target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.resolve(path)?;
        std::fs::read(&full).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(path.to_string())
            } else {
                StorageError::ReadFile {
                    path: full,
                    source: e,
                }
            }
        })
    }

    fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.resolve(path)?;
        match std::fs::remove_file(&full) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Delete {
                path: full,
                source: e,
            }),
        }
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.resolve(path)?.is_file())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let dir = self.resolve(prefix)?;
        if !dir.exists() {
            return Ok(0);
        }
        let removed = WalkDir::new(&dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count() as u64;
        std::fs::remove_dir_all(&dir).map_err(|e| StorageError::Delete {
            path: dir.clone(),
            source: e,
        })?;
        Ok(removed)
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        self.resolve(path)
    }

    fn usage(&self) -> Result<BlobUsage, StorageError> {
        let mut usage = BlobUsage::default();
        if !self.root.exists() {
            return Ok(usage);
        }
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            usage.files += 1;
            usage.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
        Ok(usage)
    }
}
