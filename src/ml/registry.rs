//! Hot-reloading holder for the served model.
//!
//! Request handlers ask the registry for the current model. The registry
//! compares the artifact files' modification times against what it loaded last
//! and swaps in a freshly loaded model when the trainer has replaced them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::RwLock;

use super::artifacts::{self, ArtifactError, ModelArtifact};
use super::trainer::Metrics;

/// A model and its metrics as loaded from disk.
#[derive(Debug)]
pub struct LoadedModel {
    pub artifact: ModelArtifact,
    pub metrics: Option<Metrics>,
    model_modified: SystemTime,
    metrics_modified: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    dir: PathBuf,
    current: Arc<RwLock<Option<Arc<LoadedModel>>>>,
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

impl ModelRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Arc::new(RwLock::new(None)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The current model, reloaded first if the files on disk changed.
    ///
    /// Returns `None` when no model file exists or the file cannot be used.
    pub async fn current(&self) -> Option<Arc<LoadedModel>> {
        let model_modified = modified(&artifacts::model_path(&self.dir)).await;
        let metrics_modified = modified(&artifacts::metrics_path(&self.dir)).await;

        {
            let guard = self.current.read().await;
            match (&*guard, model_modified) {
                (None, None) => return None,
                (Some(loaded), Some(m))
                    if loaded.model_modified == m
                        && loaded.metrics_modified == metrics_modified =>
                {
                    return Some(loaded.clone());
                }
                _ => {}
            }
        }

        self.refresh().await
    }

    /// Reload from disk unconditionally.
    pub async fn refresh(&self) -> Option<Arc<LoadedModel>> {
        let mut guard = self.current.write().await;

        let Some(model_modified) = modified(&artifacts::model_path(&self.dir)).await else {
            if guard.take().is_some() {
                tracing::warn!("Model file disappeared from {}", self.dir.display());
            }
            return None;
        };
        let metrics_modified = modified(&artifacts::metrics_path(&self.dir)).await;

        let dir = self.dir.clone();
        let loaded = tokio::task::spawn_blocking(move || load_from(&dir)).await;
        match loaded {
            Ok(Ok((artifact, metrics))) => {
                tracing::info!(
                    "Loaded model trained at {} ({:?} data, {} trees)",
                    artifact.trained_at,
                    artifact.data_source,
                    artifact.model.n_trees()
                );
                let loaded = Arc::new(LoadedModel {
                    artifact,
                    metrics,
                    model_modified,
                    metrics_modified,
                });
                *guard = Some(loaded.clone());
                Some(loaded)
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to load model from {}: {}", self.dir.display(), e);
                *guard = None;
                None
            }
            Err(e) => {
                tracing::error!("Model loading task failed: {}", e);
                None
            }
        }
    }
}

fn load_from(dir: &Path) -> Result<(ModelArtifact, Option<Metrics>), ArtifactError> {
    let artifact = artifacts::load_model(dir)?;
    let metrics = match artifacts::load_metrics(dir) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!("Model loaded without metrics: {}", e);
            None
        }
    };
    Ok((artifact, metrics))
}
