//! Session snapshot persistence
//!
//! One JSON file holds the label catalog, every image still unlabeled and,
//! when present, the last flushed training batch, the completed evaluation
//! batch or the progress of an interrupted evaluation pass. It is read once
//! at startup and rewritten at checkpoints (stop, early stop).
//!
//! Delivery of the flushed batch is at-least-once across a restart: the
//! batch was already queued when the snapshot was written, and a resume
//! queues it again because the first delivery may have been lost.

use labeler_common::atomic::write_atomic;
use labeler_common::protocol::LabelledData;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::catalog::LabelCatalog;
use crate::error::SessionError;
use crate::pool::{discover_images, ImagePool, ImageRef};

/// Persisted form of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub labels_list: Vec<String>,
    #[serde(default)]
    pub unlabelled: Vec<String>,
    /// Batch flushed at this checkpoint; sent again on resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labelled_data: Option<LabelledData>,
    /// Completed evaluation batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_data: Option<LabelledData>,
    /// Evaluation pass not finished yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_progress: Option<EvaluationProgress>,
}

/// State of an unfinished evaluation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationProgress {
    /// Evaluation labels recorded so far
    #[serde(default)]
    pub labelled_data: LabelledData,
    /// Evaluation images still to label; also listed in `unlabelled`
    #[serde(default)]
    pub remaining: Vec<String>,
}

/// Where images come from and how a fresh partition is drawn
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub image_directory: PathBuf,
    pub eval_fraction: f64,
    pub seed: Option<u64>,
}

/// Session state rebuilt at startup
#[derive(Debug)]
pub struct RestoredSession {
    pub catalog: LabelCatalog,
    pub pool: ImagePool,
    /// Completed evaluation batch; `Some` means evaluation is already done
    pub evaluation_batch: Option<LabelledData>,
    /// Evaluation labels recorded before an interrupted evaluation pass
    pub evaluation_records: LabelledData,
    /// Training batch persisted at the last checkpoint, to be re-sent
    pub pending_batch: Option<LabelledData>,
    /// Whether a snapshot was found
    pub resumed: bool,
}

/// Reads and writes the snapshot file
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot; `None` if no file exists
    pub fn load(&self) -> Result<Option<SessionSnapshot>, SessionError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path).map_err(labeler_common::Error::from)?;
        let snapshot = serde_json::from_slice(&bytes).map_err(labeler_common::Error::from)?;
        Ok(Some(snapshot))
    }

    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(labeler_common::Error::from)?;
        write_atomic(&self.path, &bytes)?;
        info!(path = %self.path.display(), "Session snapshot written");
        Ok(())
    }

    /// Resume from the snapshot if there is one, otherwise start fresh from
    /// the image directory.
    pub fn open_session(&self, source: &SourceOptions) -> Result<RestoredSession, SessionError> {
        match self.load()? {
            Some(snapshot) => {
                info!(path = %self.path.display(), "Resuming session from snapshot");
                resume(snapshot, source)
            }
            None => {
                info!(
                    directory = %source.image_directory.display(),
                    "No snapshot found, starting a fresh session"
                );
                fresh(source)
            }
        }
    }
}

fn fresh(source: &SourceOptions) -> Result<RestoredSession, SessionError> {
    let mut pool = ImagePool::discover(&source.image_directory)?;
    pool.partition(source.eval_fraction, source.seed)?;
    info!(
        evaluation = pool.evaluation().len(),
        candidates = pool.candidates().len(),
        "Image pool partitioned"
    );

    Ok(RestoredSession {
        catalog: LabelCatalog::new(),
        pool,
        evaluation_batch: None,
        evaluation_records: LabelledData::new(),
        pending_batch: None,
        resumed: false,
    })
}

/// Keep only paths that still exist on disk
fn existing_images(paths: Vec<String>) -> Vec<ImageRef> {
    let before = paths.len();
    let images: Vec<ImageRef> = paths
        .into_iter()
        .filter(|p| Path::new(p).is_file())
        .map(ImageRef::new)
        .collect();
    if images.len() < before {
        warn!(
            dropped = before - images.len(),
            "Snapshot lists images that no longer exist"
        );
    }
    images
}

fn resume(snapshot: SessionSnapshot, source: &SourceOptions) -> Result<RestoredSession, SessionError> {
    let SessionSnapshot {
        labels_list,
        unlabelled,
        labelled_data,
        test_data,
        evaluation_progress,
    } = snapshot;

    let mut catalog = LabelCatalog::restore(labels_list);
    if catalog.has_labels() {
        catalog.lock();
    }

    let restored = existing_images(unlabelled);
    let (unlabelled, pending_batch) = if restored.is_empty() {
        // Nothing left from the previous pass: go over the directory again
        let mut reshuffle = ImagePool::from_images(discover_images(&source.image_directory)?);
        reshuffle.partition(0.0, source.seed)?;
        (reshuffle.candidates().to_vec(), None)
    } else {
        let pending = labelled_data.filter(|d| !d.is_empty());
        (restored, pending)
    };

    let (pool, evaluation_batch, evaluation_records) = match (test_data, evaluation_progress) {
        (Some(test_data), _) => (
            ImagePool::restore(Vec::new(), unlabelled),
            Some(test_data),
            LabelledData::new(),
        ),
        // Same partition as before; `restore` takes the remaining
        // evaluation images out of the candidates
        (None, Some(progress)) => (
            ImagePool::restore(existing_images(progress.remaining), unlabelled),
            None,
            progress.labelled_data,
        ),
        (None, None) => {
            let mut pool = ImagePool::from_images(unlabelled);
            pool.partition(source.eval_fraction, source.seed)?;
            (pool, None, LabelledData::new())
        }
    };

    info!(
        labels = catalog.labels().len(),
        evaluation = pool.evaluation().len(),
        candidates = pool.candidates().len(),
        evaluation_done = evaluation_batch.is_some(),
        evaluation_recorded = evaluation_records.len(),
        "Session restored"
    );

    Ok(RestoredSession {
        catalog,
        pool,
        evaluation_batch,
        evaluation_records,
        pending_batch,
        resumed: true,
    })
}
