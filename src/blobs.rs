use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use uuid::Uuid;

use crate::errors::{self, FileStoreError};

/// Raw byte storage addressed by an opaque path.
///
/// `put` only returns once the bytes are durable, callers rely on that to
/// write the metadata pointing at them afterward.
pub trait BlobStore: Send + Sync {
    fn put(&self, bytes: &[u8]) -> errors::Result<String>;
    fn get(&self, path: &str) -> errors::Result<Vec<u8>>;
    fn is_alive(&self) -> bool;
}

/// Stores every blob as a flat file named by a fresh uuid under `root_path`.
#[derive(Debug, Clone)]
pub struct DiskBlobStore {
    root_path: PathBuf,
}

impl DiskBlobStore {
    pub fn new(root_path: impl Into<PathBuf>) -> errors::Result<Self> {
        let root_path = root_path.into();
        std::fs::create_dir_all(&root_path).with_context(|| {
            format!(
                "Cannot create blob directory {}",
                root_path.to_string_lossy()
            )
        })?;
        Ok(Self { root_path })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Only paths handed out by `put` are readable, anything else is reported
    /// as missing rather than touching the filesystem outside the root.
    fn owned_path(&self, path: &str) -> Option<PathBuf> {
        let path = Path::new(path);
        let name = path.file_name()?;
        if path.parent() != Some(self.root_path.as_path()) || Uuid::parse_str(name.to_str()?).is_err() {
            return None;
        }
        Some(path.to_path_buf())
    }
}

impl BlobStore for DiskBlobStore {
    fn put(&self, bytes: &[u8]) -> errors::Result<String> {
        let path = self.root_path.join(Uuid::new_v4().to_string());
        let mut f = File::create(&path)
            .with_context(|| format!("Cannot create file {}", path.to_string_lossy()))?;
        f.write_all(bytes)
            .and_then(|_| f.sync_all())
            .with_context(|| format!("Error writing to file {}", path.to_string_lossy()))?;
        // the new directory entry must survive a crash too
        File::open(&self.root_path)
            .and_then(|dir| dir.sync_all())
            .with_context(|| {
                format!("Cannot sync blob directory {}", self.root_path.to_string_lossy())
            })?;
        log::debug!("wrote {} bytes to {}", bytes.len(), path.to_string_lossy());
        Ok(path.to_string_lossy().into_owned())
    }

    fn get(&self, path: &str) -> errors::Result<Vec<u8>> {
        let owned = self
            .owned_path(path)
            .ok_or_else(|| FileStoreError::not_found("Not found"))?;
        match std::fs::read(&owned) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::error!("Attempted to read blob at {path} but didn't find anything.");
                Err(FileStoreError::not_found("Not found"))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn is_alive(&self) -> bool {
        self.root_path.is_dir()
    }
}
