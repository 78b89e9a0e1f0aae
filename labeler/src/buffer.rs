//! Batch buffer for confirmed training annotations
//!
//! Besides the buffered records, the buffer holds the carried image: the one
//! currently on screen and not yet labeled. An interim flush keeps it so the
//! image is neither lost nor offered twice.

use labeler_common::protocol::{LabelId, LabelledData};

use crate::pool::{ImagePool, ImageRef};

/// One confirmed (image, label) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRecord {
    pub image: ImageRef,
    pub label: LabelId,
}

/// Whether a flush keeps the carried image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    /// Buffer threshold reached; the carried image stays in flight
    Interim,
    /// End of session or no images left; nothing is carried over
    Final,
}

/// Records packaged for delivery, with the candidates still unlabeled
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushedBatch {
    pub records: Vec<AnnotationRecord>,
    pub unlabelled: Vec<ImageRef>,
}

impl FlushedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn labelled_data(&self) -> LabelledData {
        self.records
            .iter()
            .map(|r| (r.image.as_str().to_string(), r.label))
            .collect()
    }

    pub fn unlabelled_paths(&self) -> Vec<String> {
        self.unlabelled
            .iter()
            .map(|i| i.as_str().to_string())
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct BatchBuffer {
    records: Vec<AnnotationRecord>,
    carried: Option<ImageRef>,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, image: ImageRef, label: LabelId) {
        self.records.push(AnnotationRecord { image, label });
    }

    /// Mark `image` as the one in flight, replacing any previous one
    pub fn carry_over(&mut self, image: ImageRef) {
        self.carried = Some(image);
    }

    pub fn carried(&self) -> Option<&ImageRef> {
        self.carried.as_ref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn should_flush(&self, threshold: usize) -> bool {
        self.records.len() >= threshold
    }

    /// Hand over the buffered records and reset.
    ///
    /// Flushing an empty buffer is not an error; it yields an empty batch.
    pub fn flush(&mut self, kind: FlushKind, pool: &ImagePool) -> FlushedBatch {
        if kind == FlushKind::Final {
            self.carried = None;
        }
        FlushedBatch {
            records: std::mem::take(&mut self.records),
            unlabelled: pool.candidates().to_vec(),
        }
    }
}
