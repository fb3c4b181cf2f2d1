//! Workspace directory lifecycle.
//!
//! A workspace is the directory holding one subject's output tree. New
//! workspaces refuse to overwrite existing directories, and a lock file
//! keeps two concurrent runs out of the same tree.

use crate::artifact::ArtifactStore;
use crate::errors::PipelineError;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = ".aslflow.lock";

/// An exclusively held workspace directory.
///
/// The lock is released when the workspace is dropped.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Creates a fresh workspace directory and takes the lock.
    ///
    /// # Errors
    ///
    /// [`PipelineError::WorkspaceExists`] if the directory already exists;
    /// existing results are never silently overwritten. Resume into an
    /// existing tree with [`Self::resume`].
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        if root.exists() {
            return Err(PipelineError::WorkspaceExists {
                path: root.display().to_string(),
            });
        }
        std::fs::create_dir_all(&root)
            .map_err(|e| PipelineError::io_write(root.display().to_string(), e))?;
        Self::lock(root)
    }

    /// Opens an existing workspace directory and takes the lock, creating
    /// the directory if needed.
    ///
    /// # Errors
    ///
    /// [`PipelineError::WorkspaceLocked`] if another run holds the lock.
    pub fn resume(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| PipelineError::io_write(root.display().to_string(), e))?;
        Self::lock(root)
    }

    fn lock(root: PathBuf) -> Result<Self, PipelineError> {
        let lock_path = root.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(_) => {
                debug!(path = %lock_path.display(), "workspace lock taken");
                Ok(Self { root })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(PipelineError::WorkspaceLocked {
                    path: lock_path.display().to_string(),
                })
            }
            Err(e) => Err(PipelineError::io_write(lock_path.display().to_string(), e)),
        }
    }

    /// The workspace root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Opens the artifact store for this workspace.
    ///
    /// # Errors
    ///
    /// Propagates store-creation failures.
    pub fn open_store(&self, config_hash: impl Into<String>) -> Result<ArtifactStore, PipelineError> {
        ArtifactStore::open(&self.root, config_hash)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let lock_path = self.root.join(LOCK_FILE);
        if let Err(e) = std::fs::remove_file(&lock_path) {
            debug!(path = %lock_path.display(), error = %e, "failed to remove workspace lock");
        }
    }
}
