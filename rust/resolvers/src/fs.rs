//! File-system contract.
//!
//! All local reads and writes in the runtime go through this trait so
//! tests can run against an in-memory tree. Paths at this boundary are
//! validated ([`ValidatedResourcePath`]); validation happens upstream.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use mlld_security::ValidatedResourcePath;

use crate::error::ResolverError;

fn io_err(path: &Path, err: &std::io::Error) -> ResolverError {
    ResolverError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Async file-system operations used by resolvers and effect handlers.
#[async_trait]
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    async fn read_file(&self, path: &ValidatedResourcePath) -> Result<String, ResolverError>;
    async fn write_file(
        &self,
        path: &ValidatedResourcePath,
        content: &str,
        append: bool,
    ) -> Result<(), ResolverError>;
    async fn exists(&self, path: &ValidatedResourcePath) -> bool;
    async fn is_file(&self, path: &ValidatedResourcePath) -> bool;
    async fn is_dir(&self, path: &ValidatedResourcePath) -> bool;
    /// File names (not paths) of the directory's entries.
    async fn read_dir(&self, path: &ValidatedResourcePath) -> Result<Vec<String>, ResolverError>;
    async fn create_dir_all(&self, path: &ValidatedResourcePath) -> Result<(), ResolverError>;
}

/// The default implementation backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn read_file(&self, path: &ValidatedResourcePath) -> Result<String, ResolverError> {
        tokio::fs::read_to_string(path.as_path())
            .await
            .map_err(|err| io_err(path.as_path(), &err))
    }

    async fn write_file(
        &self,
        path: &ValidatedResourcePath,
        content: &str,
        append: bool,
    ) -> Result<(), ResolverError> {
        use tokio::io::AsyncWriteExt;

        if append {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.as_path())
                .await
                .map_err(|err| io_err(path.as_path(), &err))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|err| io_err(path.as_path(), &err))
        } else {
            tokio::fs::write(path.as_path(), content)
                .await
                .map_err(|err| io_err(path.as_path(), &err))
        }
    }

    async fn exists(&self, path: &ValidatedResourcePath) -> bool {
        tokio::fs::try_exists(path.as_path()).await.unwrap_or(false)
    }

    async fn is_file(&self, path: &ValidatedResourcePath) -> bool {
        tokio::fs::metadata(path.as_path())
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    async fn is_dir(&self, path: &ValidatedResourcePath) -> bool {
        tokio::fs::metadata(path.as_path())
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    async fn read_dir(&self, path: &ValidatedResourcePath) -> Result<Vec<String>, ResolverError> {
        let mut entries = tokio::fs::read_dir(path.as_path())
            .await
            .map_err(|err| io_err(path.as_path(), &err))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| io_err(path.as_path(), &err))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn create_dir_all(&self, path: &ValidatedResourcePath) -> Result<(), ResolverError> {
        tokio::fs::create_dir_all(path.as_path())
            .await
            .map_err(|err| io_err(path.as_path(), &err))
    }
}

/// An in-memory file system for tests.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: Mutex<BTreeMap<PathBuf, String>>,
}

impl MemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file, creating implicit parent directories.
    pub fn seed(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), content.into());
    }

    #[must_use]
    pub fn contents(&self, path: &Path) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn read_file(&self, path: &ValidatedResourcePath) -> Result<String, ResolverError> {
        self.contents(path.as_path())
            .ok_or_else(|| ResolverError::NotFound {
                path: path.as_path().display().to_string(),
            })
    }

    async fn write_file(
        &self,
        path: &ValidatedResourcePath,
        content: &str,
        append: bool,
    ) -> Result<(), ResolverError> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = files.entry(path.as_path().to_path_buf()).or_default();
        if append {
            entry.push_str(content);
        } else {
            *entry = content.to_string();
        }
        Ok(())
    }

    async fn exists(&self, path: &ValidatedResourcePath) -> bool {
        self.is_file(path).await || self.is_dir(path).await
    }

    async fn is_file(&self, path: &ValidatedResourcePath) -> bool {
        self.contents(path.as_path()).is_some()
    }

    async fn is_dir(&self, path: &ValidatedResourcePath) -> bool {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.keys().any(|p| p.starts_with(path.as_path()) && p != path.as_path())
    }

    async fn read_dir(&self, path: &ValidatedResourcePath) -> Result<Vec<String>, ResolverError> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = files
            .keys()
            .filter_map(|p| {
                p.strip_prefix(path.as_path()).ok().and_then(|rest| {
                    rest.components()
                        .next()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                })
            })
            .collect();
        names.sort();
        names.dedup();
        if names.is_empty() {
            return Err(ResolverError::NotFound {
                path: path.as_path().display().to_string(),
            });
        }
        Ok(names)
    }

    async fn create_dir_all(&self, _path: &ValidatedResourcePath) -> Result<(), ResolverError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mlld_security::{PathValidator, RawPath, ValidationContext};

    use super::*;

    fn validated(root: &Path, relative: &str) -> ValidatedResourcePath {
        PathValidator
            .validate(&RawPath::new(relative), &ValidationContext::rooted(root))
            .expect("valid path")
            .validated_path
    }

    #[tokio::test]
    async fn tokio_fs_round_trips_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = TokioFileSystem;
        let path = validated(dir.path(), "notes.md");

        assert!(!fs.exists(&path).await);
        fs.write_file(&path, "first", false).await.expect("write");
        fs.write_file(&path, " second", true).await.expect("append");
        assert_eq!(fs.read_file(&path).await.expect("read"), "first second");
        assert!(fs.is_file(&path).await);

        let dir_path = validated(dir.path(), ".");
        let entries = fs.read_dir(&dir_path).await.expect("read_dir");
        assert!(entries.contains(&"notes.md".to_string()));
    }

    #[tokio::test]
    async fn memory_fs_append_and_listing() {
        let fs = MemoryFileSystem::new();
        let path = validated(Path::new("/project"), "log.txt");
        fs.write_file(&path, "a", false).await.expect("write");
        fs.write_file(&path, "b", true).await.expect("append");
        assert_eq!(fs.read_file(&path).await.expect("read"), "ab");

        let dir = validated(Path::new("/project"), ".");
        assert_eq!(fs.read_dir(&dir).await.expect("read_dir"), vec!["log.txt"]);
    }
}
