//! Blob storage: named disks with path-based access.
//!
//! Every record names the disk its files live on. A disk is anything
//! implementing [`BlobStore`]; [`LocalDisk`] keeps blobs under a root directory
//! and serves them below a public URL prefix. Paths are always relative,
//! `/`-separated, and may not escape the disk root.
//!
//! Writes go to a temporary sibling first and are renamed into place, so a
//! reader never sees a half-written file.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("unknown disk '{0}'")]
    UnknownDisk(String),
    #[error("invalid storage path '{0}'")]
    InvalidPath(String),
    #[error("disk '{0}' does not support temporary URLs")]
    TemporaryUrlUnsupported(String),
}

fn io_error(path: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_string(),
        source,
    }
}

/// Hierarchical blob store.
pub trait BlobStore: Send + Sync {
    fn name(&self) -> &str;

    fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;

    fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Size in bytes, without reading the blob.
    fn size(&self, path: &str) -> Result<u64, StorageError>;

    /// Delete one blob. Deleting a missing blob is not an error.
    fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Delete everything under `prefix`. A missing prefix is not an error.
    fn delete_tree(&self, prefix: &str) -> Result<(), StorageError>;

    /// Direct children files of `dir`, sorted.
    fn files(&self, dir: &str) -> Result<Vec<String>, StorageError>;

    /// All files below `prefix` at any depth, sorted.
    fn all_files(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    fn make_directory(&self, path: &str) -> Result<(), StorageError>;

    /// Public URL. Pure string work, never touches the blob.
    fn url(&self, path: &str) -> String;

    /// Signed URL valid for `ttl`.
    fn temporary_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// A disk rooted in a local directory.
pub struct LocalDisk {
    name: String,
    root: PathBuf,
    url_base: String,
    signing_key: Option<String>,
}

impl LocalDisk {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, url_base: &str) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            url_base: url_base.trim_end_matches('/').to_string(),
            signing_key: None,
        }
    }

    /// Enable temporary URLs signed with `key`.
    pub fn with_signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = Some(key.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a storage path onto the filesystem, rejecting anything that could
    /// leave the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path.trim_start_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(StorageError::InvalidPath(path.to_string())),
            }
        }
        Ok(self.root.join(relative))
    }

    fn relative(&self, absolute: &Path) -> Option<String> {
        let rel = absolute.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn signature(&self, key: &str, path: &str, expires: u64) -> String {
        let digest = Sha256::digest(format!("{key}:{path}:{expires}").as_bytes());
        format!("{:x}", digest)
    }

    /// Check a signature produced by [`BlobStore::temporary_url`] at `now`.
    pub fn verify_temporary_url(
        &self,
        path: &str,
        expires: u64,
        signature: &str,
        now: SystemTime,
    ) -> bool {
        let Some(key) = &self.signing_key else {
            return false;
        };
        let now = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        now <= expires && self.signature(key, path, expires) == signature
    }
}

impl BlobStore for LocalDisk {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error(path))?;
        }
        let mut tmp_name = target.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        fs::write(&tmp, bytes).map_err(io_error(path))?;
        fs::rename(&tmp, &target).map_err(io_error(path))
    }

    fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let target = self.resolve(path)?;
        if !target.is_file() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        fs::read(&target).map_err(io_error(path))
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.resolve(path)?.is_file())
    }

    fn size(&self, path: &str) -> Result<u64, StorageError> {
        let target = self.resolve(path)?;
        if !target.is_file() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(fs::metadata(&target).map_err(io_error(path))?.len())
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(path)(e)),
        }
    }

    fn delete_tree(&self, prefix: &str) -> Result<(), StorageError> {
        let target = self.resolve(prefix)?;
        if target == self.root {
            return Err(StorageError::InvalidPath(prefix.to_string()));
        }
        match fs::remove_dir_all(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(prefix)(e)),
        }
    }

    fn files(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        self.walk(dir, Some(1))
    }

    fn all_files(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.walk(prefix, None)
    }

    fn make_directory(&self, path: &str) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        fs::create_dir_all(&target).map_err(io_error(path))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.url_base, path.trim_start_matches('/'))
    }

    fn temporary_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        let key = self
            .signing_key
            .as_deref()
            .ok_or_else(|| StorageError::TemporaryUrlUnsupported(self.name.clone()))?;
        let expires = SystemTime::now()
            .checked_add(ttl)
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(u64::MAX);
        Ok(format!(
            "{}?expires={}&signature={}",
            self.url(path),
            expires,
            self.signature(key, path, expires)
        ))
    }
}

impl LocalDisk {
    fn walk(&self, dir: &str, max_depth: Option<usize>) -> Result<Vec<String>, StorageError> {
        let target = self.resolve(dir)?;
        if !target.is_dir() {
            return Ok(Vec::new());
        }
        let mut walker = WalkDir::new(&target).min_depth(1).sort_by_file_name();
        if let Some(depth) = max_depth {
            walker = walker.max_depth(depth);
        }
        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| StorageError::Io {
                path: dir.to_string(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            if let Some(rel) = self.relative(entry.path()) {
                files.push(rel);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Named disks, one of which is the default for new uploads.
#[derive(Clone)]
pub struct Disks {
    disks: BTreeMap<String, Arc<dyn BlobStore>>,
    default: String,
}

impl Disks {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            disks: BTreeMap::new(),
            default: default.into(),
        }
    }

    pub fn insert(&mut self, disk: Arc<dyn BlobStore>) {
        self.disks.insert(disk.name().to_string(), disk);
    }

    pub fn with(mut self, disk: Arc<dyn BlobStore>) -> Self {
        self.insert(disk);
        self
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn BlobStore>, StorageError> {
        self.disks
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::UnknownDisk(name.to_string()))
    }

    pub fn default_disk(&self) -> Result<Arc<dyn BlobStore>, StorageError> {
        self.get(&self.default)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.disks.keys().map(String::as_str)
    }
}
