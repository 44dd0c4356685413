//! On-disk model and metrics artifacts.
//!
//! Both files are JSON and are written through a temp file in the same
//! directory followed by a rename, so a reader never sees a partial file.
//! A training run stages both files before moving either. The model rename
//! is the commit point: if anything fails before it, the served model and its
//! metrics stay as they were.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::features::FeatureVector;
use super::gbdt::GradientBoostedTrees;
use super::trainer::Metrics;
use super::{DataSource, BUCKET_MINUTES, DEFAULT_AVERAGE_CAPACITY, FEATURE_NAMES};

pub const MODEL_FILE: &str = "velib_model.json";
pub const METRICS_FILE: &str = "metrics.json";
/// Present while a training run owns the model directory.
pub const LOCK_FILE: &str = "trainer.lock";

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to move artifact into place: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("incompatible model artifact: {0}")]
    SchemaMismatch(String),

    #[error("another training run holds {0}")]
    Locked(PathBuf),
}

/// A fitted model together with the feature contract it was trained under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub feature_names: Vec<String>,
    pub bucket_minutes: i64,
    pub default_average_capacity: i32,
    pub data_source: DataSource,
    pub trained_at: DateTime<Utc>,
    pub model: GradientBoostedTrees,
}

impl ModelArtifact {
    pub fn new(
        model: GradientBoostedTrees,
        data_source: DataSource,
        trained_at: DateTime<Utc>,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            bucket_minutes: BUCKET_MINUTES,
            default_average_capacity: DEFAULT_AVERAGE_CAPACITY,
            data_source,
            trained_at,
            model,
        }
    }

    /// Predicted global average bikes for one feature vector.
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        self.model.predict(&features.to_array())
    }

    /// Reject artifacts produced under a different feature contract.
    fn validate(&self) -> Result<(), ArtifactError> {
        if self.format_version != FORMAT_VERSION {
            return Err(ArtifactError::SchemaMismatch(format!(
                "format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        if self.feature_names != FEATURE_NAMES {
            return Err(ArtifactError::SchemaMismatch(format!(
                "features {:?} (expected {:?})",
                self.feature_names, FEATURE_NAMES
            )));
        }
        if self.bucket_minutes != BUCKET_MINUTES {
            return Err(ArtifactError::SchemaMismatch(format!(
                "bucket width {} min (expected {})",
                self.bucket_minutes, BUCKET_MINUTES
            )));
        }
        if self.default_average_capacity != DEFAULT_AVERAGE_CAPACITY {
            return Err(ArtifactError::SchemaMismatch(format!(
                "reference capacity {} (expected {})",
                self.default_average_capacity, DEFAULT_AVERAGE_CAPACITY
            )));
        }
        Ok(())
    }
}

pub fn model_path(dir: &Path) -> PathBuf {
    dir.join(MODEL_FILE)
}

pub fn metrics_path(dir: &Path) -> PathBuf {
    dir.join(METRICS_FILE)
}

/// Serialize `value` into a synced temp file next to `path`.
fn stage_json<T: Serialize>(path: &Path, value: &T) -> Result<NamedTempFile, ArtifactError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Serialize `value` to `path` via a sibling temp file and an atomic rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    stage_json(path, value)?.persist(path)?;
    Ok(())
}

/// Replace model and metrics as one unit.
///
/// Metrics are moved first and the model last. When the model rename fails
/// the previous metrics file is put back (or the new one removed if there was
/// none), so the directory still describes the old model.
pub fn save_artifacts(
    dir: &Path,
    artifact: &ModelArtifact,
    metrics: &Metrics,
) -> Result<(), ArtifactError> {
    fs::create_dir_all(dir)?;
    let model_file = model_path(dir);
    let metrics_file = metrics_path(dir);

    let staged_model = stage_json(&model_file, artifact)?;
    let staged_metrics = stage_json(&metrics_file, metrics)?;
    let previous_metrics = match fs::read(&metrics_file) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    staged_metrics.persist(&metrics_file)?;
    if let Err(e) = staged_model.persist(&model_file) {
        restore_metrics(&metrics_file, previous_metrics);
        return Err(e.into());
    }

    tracing::info!("Saved model and metrics to {}", dir.display());
    Ok(())
}

fn restore_metrics(path: &Path, previous: Option<Vec<u8>>) {
    let restored = match previous {
        Some(bytes) => NamedTempFile::new_in(path.parent().unwrap_or(Path::new(".")))
            .and_then(|mut tmp| {
                tmp.write_all(&bytes)?;
                tmp.as_file().sync_all()?;
                Ok(tmp)
            })
            .and_then(|tmp| tmp.persist(path).map(|_| ()).map_err(|e| e.error)),
        None => fs::remove_file(path),
    };
    if let Err(e) = restored {
        tracing::error!(
            "Failed to roll back {} after an aborted save: {}",
            path.display(),
            e
        );
    }
}

pub fn load_model(dir: &Path) -> Result<ModelArtifact, ArtifactError> {
    let file = File::open(model_path(dir))?;
    let artifact: ModelArtifact = serde_json::from_reader(BufReader::new(file))?;
    artifact.validate()?;
    Ok(artifact)
}

pub fn load_metrics(dir: &Path) -> Result<Metrics, ArtifactError> {
    let file = File::open(metrics_path(dir))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Exclusive claim on a model directory for the duration of a training run.
///
/// The lock file is created with `create_new` and removed on drop. A process
/// killed mid-run leaves it behind; it must then be deleted by hand.
#[derive(Debug)]
pub struct TrainingLock {
    path: PathBuf,
}

impl TrainingLock {
    pub fn acquire(dir: &Path) -> Result<Self, ArtifactError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(ArtifactError::Locked(path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for TrainingLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}
