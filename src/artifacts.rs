//! Filesystem storage for per-step intermediates and final outputs.
//!
//! The store owns the physical path scheme; steps only ever ask for a save
//! or load by `(id, kind, extension)`. Scratch artifacts live under the
//! configured temp root as `{id:03}_{kind}.{ext}`, downloaded images under
//! `{id:03}_images/`, and final PDFs under a separate canonical directory
//! that survives scratch clearing.

use crate::config::PipelineConfig;
use crate::error::Talk2PdfError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Filesystem-backed artifact storage for one configured data layout.
///
/// Cheap to construct; steps build one from the config on demand.
pub struct ArtifactStore {
    temp_dir: PathBuf,
    pdf_dir: PathBuf,
}

impl ArtifactStore {
    /// Build a store from the pipeline config, creating the roots.
    pub fn new(config: &PipelineConfig) -> Result<Self, Talk2PdfError> {
        let store = Self {
            temp_dir: config.temp_dir.clone(),
            pdf_dir: config.pdf_dir.clone(),
        };
        std::fs::create_dir_all(&store.temp_dir)
            .map_err(|e| Talk2PdfError::io(&store.temp_dir, e))?;
        std::fs::create_dir_all(&store.pdf_dir)
            .map_err(|e| Talk2PdfError::io(&store.pdf_dir, e))?;
        Ok(store)
    }

    /// The scratch root this store writes to.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Deterministic scratch path for `(id, kind, ext)`.
    pub fn path_of(&self, id: i64, kind: &str, ext: &str) -> PathBuf {
        self.temp_dir.join(format!("{id:03}_{kind}.{ext}"))
    }

    /// The per-id image subdirectory, `{id:03}_images/`.
    pub fn image_dir(&self, id: i64) -> PathBuf {
        self.temp_dir.join(format!("{id:03}_images"))
    }

    /// Write a text artifact to scratch, returning its path.
    pub fn save(&self, id: i64, kind: &str, ext: &str, content: &str) -> Result<PathBuf, Talk2PdfError> {
        let path = self.path_of(id, kind, ext);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Talk2PdfError::io(parent, e))?;
        }
        std::fs::write(&path, content).map_err(|e| Talk2PdfError::io(&path, e))?;
        debug!("Saved {kind} to {}", path.display());
        Ok(path)
    }

    /// Write image bytes into the per-id image subdirectory.
    pub fn save_image(&self, id: i64, filename: &str, bytes: &[u8]) -> Result<PathBuf, Talk2PdfError> {
        let path = self.image_dir(id).join(filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Talk2PdfError::io(parent, e))?;
        }
        std::fs::write(&path, bytes).map_err(|e| Talk2PdfError::io(&path, e))?;
        debug!("Saved image to {}", path.display());
        Ok(path)
    }

    /// Read a text artifact back from scratch.
    pub fn load(&self, id: i64, kind: &str, ext: &str) -> Result<String, Talk2PdfError> {
        let path = self.path_of(id, kind, ext);
        if !path.exists() {
            return Err(Talk2PdfError::ArtifactNotFound { path });
        }
        let content = std::fs::read_to_string(&path).map_err(|e| Talk2PdfError::io(&path, e))?;
        debug!("Loaded {kind} from {}", path.display());
        Ok(content)
    }

    /// Publish a final PDF to the canonical output directory.
    ///
    /// Named `{stem}_notes.pdf` after the input; the only artifact that
    /// survives scratch clearing.
    pub fn save_final(&self, stem: &str, bytes: &[u8]) -> Result<PathBuf, Talk2PdfError> {
        std::fs::create_dir_all(&self.pdf_dir).map_err(|e| Talk2PdfError::io(&self.pdf_dir, e))?;
        let path = self.pdf_dir.join(format!("{stem}_notes.pdf"));
        std::fs::write(&path, bytes).map_err(|e| Talk2PdfError::io(&path, e))?;
        info!("Saved PDF to {}", path.display());
        Ok(path)
    }

    /// Delete every scratch artifact belonging to `id` — files and the
    /// image subdirectory prefixed `{id:03}_` — then recreate the scratch
    /// root.
    pub fn clear_scratch(&self, id: i64) -> Result<(), Talk2PdfError> {
        self.ensure_scratch_root()?;

        let prefix = format!("{id:03}_");
        if self.temp_dir.exists() {
            let entries = std::fs::read_dir(&self.temp_dir)
                .map_err(|e| Talk2PdfError::io(&self.temp_dir, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| Talk2PdfError::io(&self.temp_dir, e))?;
                let name = entry.file_name();
                if !name.to_string_lossy().starts_with(&prefix) {
                    continue;
                }
                let path = entry.path();
                if path.is_dir() {
                    std::fs::remove_dir_all(&path).map_err(|e| Talk2PdfError::io(&path, e))?;
                } else {
                    std::fs::remove_file(&path).map_err(|e| Talk2PdfError::io(&path, e))?;
                }
            }
        }
        std::fs::create_dir_all(&self.temp_dir)
            .map_err(|e| Talk2PdfError::io(&self.temp_dir, e))?;
        info!("Cleared scratch files for id {id:03}");
        Ok(())
    }

    /// List everything currently under the scratch root, for the CLI's
    /// delete-confirmation prompt.
    pub fn scratch_entries(&self) -> Result<Vec<PathBuf>, Talk2PdfError> {
        if !self.temp_dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.temp_dir)
            .map_err(|e| Talk2PdfError::io(&self.temp_dir, e))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        Ok(entries)
    }

    /// Delete the entire scratch root and recreate it empty.
    pub fn clear_all(&self) -> Result<(), Talk2PdfError> {
        self.ensure_scratch_root()?;
        if self.temp_dir.exists() {
            std::fs::remove_dir_all(&self.temp_dir)
                .map_err(|e| Talk2PdfError::io(&self.temp_dir, e))?;
        }
        std::fs::create_dir_all(&self.temp_dir)
            .map_err(|e| Talk2PdfError::io(&self.temp_dir, e))?;
        info!("Cleared all scratch files in {}", self.temp_dir.display());
        Ok(())
    }

    /// Refuse destructive operations unless the scratch root looks like one.
    ///
    /// The marker check (`temp` somewhere in the path) is the last line of
    /// defence against a misconfigured `temp_dir` pointing at a real
    /// directory.
    fn ensure_scratch_root(&self) -> Result<(), Talk2PdfError> {
        if self.temp_dir.to_string_lossy().contains("temp") {
            Ok(())
        } else {
            Err(Talk2PdfError::ScratchRootUnsafe {
                path: self.temp_dir.clone(),
            })
        }
    }
}
