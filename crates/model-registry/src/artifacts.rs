//! Version-qualified artifact storage.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use training_core::types::ModelVersion;
use training_core::{Error, Result};

/// Where model weights (or pointers to them) live, keyed by version.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Record the checkpoint for a version; returns the storage path agents
    /// load the model from.
    async fn store(&self, version: ModelVersion, checkpoint_ref: &str) -> Result<String>;

    /// Stored versions, ascending.
    async fn list(&self) -> Result<Vec<ModelVersion>>;
}

/// Filesystem-backed artifact store.
///
/// Each version gets its own directory under the root with a `checkpoint.ref`
/// file naming the engine checkpoint. The directory path doubles as the
/// model's storage path.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn store(&self, version: ModelVersion, checkpoint_ref: &str) -> Result<String> {
        let dir = self.root.join(version.to_string());
        tokio::fs::create_dir_all(&dir).await.map_err(|e| Error::Registry {
            message: format!("cannot create artifact dir {}: {e}", dir.display()),
        })?;

        let ref_path = dir.join("checkpoint.ref");
        tokio::fs::write(&ref_path, checkpoint_ref)
            .await
            .map_err(|e| Error::Registry {
                message: format!("cannot write {}: {e}", ref_path.display()),
            })?;

        debug!(version = %version, path = %dir.display(), "Stored model artifact");
        Ok(dir.to_string_lossy().into_owned())
    }

    async fn list(&self) -> Result<Vec<ModelVersion>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Registry {
                    message: format!("cannot read artifact root {}: {e}", self.root.display()),
                })
            }
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::Registry {
            message: format!("cannot read artifact root {}: {e}", self.root.display()),
        })? {
            if let Ok(version) = entry.file_name().to_string_lossy().parse::<ModelVersion>() {
                versions.push(version);
            }
        }
        versions.sort();
        Ok(versions)
    }
}
