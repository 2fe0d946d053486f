//! Artifact store: the `downloads/` directory.
//!
//! Each artifact is a payload file `<key>` plus a `<key>.meta.json` sidecar.
//! Each file is written to a temp file in the same directory, fsynced and
//! renamed into place, so a reader never sees a torn file.
//!
//! The two renames are separate steps: the payload lands first, then the
//! sidecar. Between them, or after a failed sidecar write, the sidecar still
//! describes the previous payload. Compare its `checksum` with the payload
//! when the pair must agree.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DownloadError;

const META_SUFFIX: &str = ".meta.json";
const TMP_PREFIX: &str = ".partial-";

/// The persisted result of a successful download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Storage key, equal to the target id.
    pub key: String,
    /// Path of the payload file.
    pub path: PathBuf,
    /// URL the payload was fetched from.
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    /// Payload size in bytes.
    pub size: u64,
    /// Lowercase hex SHA-256 of the payload.
    pub checksum: String,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Directory-backed artifact store.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the store directory if it does not exist.
    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn meta_path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", key, META_SUFFIX))
    }

    /// Persist `bytes` under `key`, replacing any previous version atomically.
    ///
    /// The payload is renamed into place before the sidecar. If the sidecar
    /// write fails the new payload stays and the error is returned as
    /// transient, so a retry rewrites both.
    ///
    /// Blocking; run it off the async runtime.
    pub fn write(
        &self,
        key: &str,
        source: &str,
        bytes: &[u8],
        fetched_at: DateTime<Utc>,
    ) -> Result<Artifact, DownloadError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(DownloadError::Permanent(format!(
                "Invalid artifact key '{}'",
                key
            )));
        }
        self.ensure_dir().map_err(|e| DownloadError::from_io(&e))?;

        let path = self.path_for(key);
        let artifact = Artifact {
            key: key.to_string(),
            path: path.clone(),
            source: source.to_string(),
            fetched_at,
            size: bytes.len() as u64,
            checksum: checksum(bytes),
        };
        let meta = serde_json::to_vec_pretty(&artifact)
            .map_err(|e| DownloadError::Permanent(format!("Artifact metadata: {}", e)))?;

        self.write_atomic(&path, bytes)
            .map_err(|e| DownloadError::from_io(&e))?;
        self.write_atomic(&self.meta_path_for(key), &meta)
            .map_err(|e| DownloadError::from_io(&e))?;
        Ok(artifact)
    }

    /// Read the metadata sidecar for `key`, if present.
    pub fn read_meta(&self, key: &str) -> std::io::Result<Option<Artifact>> {
        let path = self.meta_path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read(&path)?;
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempfile_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|e| e.error)?;
        Ok(())
    }
}
