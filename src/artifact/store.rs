//! The artifact store: sole reader and writer of the on-disk output tree.
//!
//! All file writes go through this type so the eleven-category layout stays
//! the single source of truth. A manifest under `report/` records every
//! artifact together with the configuration hash of the run that produced
//! it; reruns reload the manifest to rediscover and validate prior outputs.

use super::{Artifact, ArtifactKind, Category, Provenance};
use crate::errors::PipelineError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MANIFEST_FILE: &str = "manifest.json";

/// Persisted index of the output tree.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    /// Hash of the configuration the artifacts were produced under.
    config_hash: String,
    /// When the manifest was last written.
    written_at: DateTime<Utc>,
    /// Every artifact in the tree.
    artifacts: Vec<Artifact>,
}

/// Manages the output tree for one analysis run.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    config_hash: String,
    index: RwLock<HashMap<String, Artifact>>,
}

impl ArtifactStore {
    /// Opens a store rooted at `root`, creating the category subdirectories.
    ///
    /// If a manifest from a previous run exists and was produced under the
    /// same configuration hash, artifacts that still validate on disk are
    /// preloaded so the orchestrator can treat their producing stages as
    /// already complete.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::IoWrite`] if the tree cannot be created.
    pub fn open(root: impl Into<PathBuf>, config_hash: impl Into<String>) -> Result<Self, PipelineError> {
        let root = root.into();
        for category in Category::ALL {
            let dir = root.join(category.dir_name());
            std::fs::create_dir_all(&dir)
                .map_err(|e| PipelineError::io_write(dir.display().to_string(), e))?;
        }

        let store = Self {
            root,
            config_hash: config_hash.into(),
            index: RwLock::new(HashMap::new()),
        };
        store.load_manifest();
        Ok(store)
    }

    /// The workspace root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path where an artifact of the given identity lives.
    ///
    /// Filenames are derived deterministically from the logical name so
    /// reruns can locate prior outputs. Stages direct external tools to
    /// write here, then register the result with [`Self::commit`].
    #[must_use]
    pub fn target_path(&self, category: Category, name: &str, kind: ArtifactKind) -> PathBuf {
        let file = format!("{}.{}", sanitize(name), kind.extension());
        self.root.join(category.dir_name()).join(file)
    }

    /// Writes `data` as a new artifact. Used by in-process transforms.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::IoWrite`] on failure to write.
    pub fn put(
        &self,
        category: Category,
        name: &str,
        kind: ArtifactKind,
        provenance: Provenance,
        data: &[u8],
    ) -> Result<Artifact, PipelineError> {
        let path = self.target_path(category, name, kind);
        std::fs::write(&path, data).map_err(|e| PipelineError::io_write(name, e))?;
        self.register(Artifact {
            name: name.to_string(),
            category,
            kind,
            path,
            provenance,
        })
    }

    /// Copies an existing file into the tree as a new artifact. Used to
    /// bring raw inputs under `input/`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::IoWrite`] if the copy fails.
    pub fn ingest(
        &self,
        category: Category,
        name: &str,
        kind: ArtifactKind,
        provenance: Provenance,
        source: &Path,
    ) -> Result<Artifact, PipelineError> {
        let path = self.target_path(category, name, kind);
        std::fs::copy(source, &path).map_err(|e| PipelineError::io_write(name, e))?;
        self.register(Artifact {
            name: name.to_string(),
            category,
            kind,
            path,
            provenance,
        })
    }

    /// Registers a file an external tool wrote to [`Self::target_path`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StageValidation`] if the file is missing,
    /// empty, or fails the format-stamp check for its kind.
    pub fn commit(
        &self,
        category: Category,
        name: &str,
        kind: ArtifactKind,
        provenance: Provenance,
    ) -> Result<Artifact, PipelineError> {
        let path = self.target_path(category, name, kind);
        if !file_valid(&path, kind) {
            let stage = provenance.stage().unwrap_or("raw input").to_string();
            return Err(PipelineError::stage_validation(stage, name));
        }
        self.register(Artifact {
            name: name.to_string(),
            category,
            kind,
            path,
            provenance,
        })
    }

    /// Looks up an artifact by logical name.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ArtifactNotFound`] if the artifact was never
    /// produced.
    pub fn get(&self, name: &str) -> Result<Artifact, PipelineError> {
        self.index
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::artifact_not_found(name))
    }

    /// Returns true if the artifact exists and still validates on disk.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.index
            .read()
            .get(name)
            .is_some_and(|a| file_valid(&a.path, a.kind))
    }

    /// Every artifact currently registered, in no particular order.
    #[must_use]
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.index.read().values().cloned().collect()
    }

    fn register(&self, artifact: Artifact) -> Result<Artifact, PipelineError> {
        debug!(
            name = %artifact.name,
            category = %artifact.category,
            path = %artifact.path.display(),
            "artifact registered"
        );
        self.index
            .write()
            .insert(artifact.name.clone(), artifact.clone());
        self.save_manifest()?;
        Ok(artifact)
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(Category::Report.dir_name()).join(MANIFEST_FILE)
    }

    fn load_manifest(&self) {
        let path = self.manifest_path();
        let Ok(text) = std::fs::read_to_string(&path) else {
            return;
        };
        let manifest: Manifest = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable manifest");
                return;
            }
        };
        if manifest.config_hash != self.config_hash {
            debug!("manifest configuration hash differs; ignoring cached artifacts");
            return;
        }
        let mut index = self.index.write();
        for artifact in manifest.artifacts {
            if file_valid(&artifact.path, artifact.kind) {
                index.insert(artifact.name.clone(), artifact);
            }
        }
    }

    fn save_manifest(&self) -> Result<(), PipelineError> {
        let manifest = Manifest {
            config_hash: self.config_hash.clone(),
            written_at: Utc::now(),
            artifacts: self.artifacts(),
        };
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| PipelineError::io_write(MANIFEST_FILE, std::io::Error::other(e)))?;
        std::fs::write(self.manifest_path(), json)
            .map_err(|e| PipelineError::io_write(MANIFEST_FILE, e))
    }
}

/// Deterministic filename stem from a logical name.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

fn file_valid(path: &Path, kind: ArtifactKind) -> bool {
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut head = [0u8; 4];
    match file.read(&mut head) {
        Ok(n) if n > 0 => kind.stamp_valid(&head[..n]),
        _ => false,
    }
}
