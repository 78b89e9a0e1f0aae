//! Annotation session coordinator
//!
//! The state machine behind the labeling UI:
//!
//! ```text
//! CollectingLabels -> Evaluation -> Training -> { EarlyStopped | Stopped }
//! ```
//!
//! Every event runs to completion synchronously; the only side effect that
//! leaves the process is an enqueue onto the dispatcher, so a slow or absent
//! trainer never stalls labeling.

use labeler_common::protocol::{
    InitTraining, LabelId, LabelledData, StopTraining, TestData, TrainBatch,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::buffer::{BatchBuffer, FlushKind, FlushedBatch};
use crate::catalog::{LabelCatalog, Proposal};
use crate::dispatch::{Dispatcher, Payload};
use crate::pool::{Cursor, CursorStep, ImagePool, ImageRef};
use crate::store::{EvaluationProgress, RestoredSession, SessionSnapshot, SessionStore};

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    CollectingLabels,
    Evaluation,
    Training,
    EarlyStopped,
    Stopped,
}

/// Answer to a "next image" request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextImage {
    /// Show this image
    Image { image: ImageRef, phase: Phase },
    /// No label has been entered yet
    AwaitingLabels,
    /// Every candidate has been shown
    NoImagesLeft,
    /// The trainer stopped itself
    EarlyStopped,
    /// The annotator ended the session
    SessionStopped,
}

/// Which screen the UI should show
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "page", rename_all = "snake_case")]
pub enum Page {
    CollectLabels { labels: Vec<String> },
    Annotate { labels: Vec<String> },
    Stopped,
}

/// Answer to a stop request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopNotice {
    pub message: String,
    /// Annotations flushed into the stop payload by this request
    pub flushed: usize,
}

/// Counters for the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub phase: Phase,
    pub labels: Vec<String>,
    pub evaluation_remaining: usize,
    pub evaluation_recorded: usize,
    pub candidates_remaining: usize,
    pub buffered: usize,
    pub carried: Option<ImageRef>,
    pub no_images_left: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Training annotations buffered before a `train` delivery
    pub buffer_size: usize,
}

const STOP_MESSAGE: &str = "You can close the labeler and wait for the trainer to save your model";

pub struct SessionCoordinator {
    phase: Phase,
    catalog: LabelCatalog,
    pool: ImagePool,
    buffer: BatchBuffer,
    evaluation_cursor: Option<Cursor>,
    candidate_cursor: Option<Cursor>,
    /// Evaluation image on screen, awaiting its label
    pending_evaluation: Option<ImageRef>,
    /// Evaluation labels collected so far; sent as one batch
    evaluation_records: LabelledData,
    /// The evaluation batch once complete (sent, or restored from a snapshot)
    evaluation_batch: Option<LabelledData>,
    no_images_left: bool,
    stop_sent: bool,
    settings: SessionSettings,
    dispatcher: Dispatcher,
    store: Option<SessionStore>,
}

impl SessionCoordinator {
    /// Build the coordinator from startup state.
    ///
    /// A restored session with labels goes straight to annotating: `init` is
    /// enqueued, and any restored evaluation or pending training batch is
    /// re-sent. An interrupted evaluation pass picks up its recorded labels.
    pub fn new(
        restored: RestoredSession,
        dispatcher: Dispatcher,
        settings: SessionSettings,
        store: Option<SessionStore>,
    ) -> Self {
        let RestoredSession {
            catalog,
            pool,
            evaluation_batch,
            evaluation_records,
            pending_batch,
            ..
        } = restored;

        let mut session = Self {
            phase: Phase::CollectingLabels,
            catalog,
            pool,
            buffer: BatchBuffer::new(),
            evaluation_cursor: None,
            candidate_cursor: None,
            pending_evaluation: None,
            evaluation_records,
            evaluation_batch,
            no_images_left: false,
            stop_sent: false,
            settings,
            dispatcher,
            store,
        };

        if let Some(batch) = &session.evaluation_batch {
            info!(records = batch.len(), "Re-sending restored evaluation batch");
            session.dispatcher.enqueue(Payload::Evaluation(TestData {
                test_data: batch.clone(),
                labels_list: session.catalog.labels(),
            }));
        }
        if let Some(batch) = pending_batch {
            info!(records = batch.len(), "Re-sending restored training batch");
            session.dispatcher.enqueue(Payload::Train(TrainBatch {
                labelled_data: batch,
                labels_list: session.catalog.labels(),
                unlabelled: session.unlabelled_paths(),
            }));
        }
        if session.catalog.is_locked() {
            session.send_init();
            session.enter_annotation();
        }

        session
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Add a label name; returns the current label list.
    ///
    /// Allowed in any phase before `Stopped`: while collecting this builds the
    /// catalog, afterwards a new name is appended with the next id.
    pub fn submit_label(&mut self, name: &str) -> Vec<String> {
        if self.phase == Phase::Stopped {
            return self.catalog.labels();
        }
        match self.catalog.propose(name) {
            Proposal::Added => info!(label = name.trim(), "Label added"),
            Proposal::AlreadyPresent => debug!(label = name.trim(), "Label already present"),
            Proposal::Ignored => debug!("Blank label ignored"),
        }
        self.catalog.labels()
    }

    /// Handle a "next image" event; `label` is the label chosen for the image
    /// currently on screen, if any.
    pub fn request_next(&mut self, label: Option<&str>) -> NextImage {
        match self.phase {
            Phase::Stopped => return NextImage::SessionStopped,
            Phase::EarlyStopped => return NextImage::EarlyStopped,
            Phase::CollectingLabels => {
                if !self.catalog.has_labels() {
                    return NextImage::AwaitingLabels;
                }
                // First request with labels present: the label list is final
                self.catalog.lock();
                info!(labels = ?self.catalog.labels(), "Label catalog locked");
                self.send_init();
                self.enter_annotation();
                return self.advance(None);
            }
            Phase::Evaluation | Phase::Training => {}
        }

        let label_id = label.and_then(|name| self.resolve(name));
        self.advance(label_id)
    }

    /// Stop requested by the annotator.
    ///
    /// Flushes what is buffered into a `stop` payload and writes a snapshot.
    /// Repeated requests are answered with the same notice.
    pub fn request_stop(&mut self) -> StopNotice {
        if self.phase == Phase::Stopped {
            return StopNotice {
                message: STOP_MESSAGE.to_string(),
                flushed: 0,
            };
        }

        info!(phase = ?self.phase, "Stopping session");
        let flushed = self.buffer.flush(FlushKind::Final, &self.pool);
        self.dispatcher.enqueue(Payload::Stop(StopTraining {
            labelled_data: flushed.labelled_data(),
            labels_list: self.catalog.labels(),
            unlabelled: flushed.unlabelled_paths(),
        }));
        self.stop_sent = true;
        self.checkpoint(&flushed);
        self.phase = Phase::Stopped;

        StopNotice {
            message: STOP_MESSAGE.to_string(),
            flushed: flushed.len(),
        }
    }

    /// The trainer stopped itself.
    ///
    /// Anything buffered is sent as a final `train` batch (an empty buffer is
    /// simply skipped) and a snapshot is written.
    pub fn early_stop(&mut self) {
        if matches!(self.phase, Phase::EarlyStopped | Phase::Stopped) {
            debug!(phase = ?self.phase, "Early stop ignored");
            return;
        }

        info!("The trainer stopped itself via early stopping");
        let flushed = self.buffer.flush(FlushKind::Final, &self.pool);
        if !flushed.is_empty() {
            self.send_train(&flushed);
        }
        self.checkpoint(&flushed);
        self.phase = Phase::EarlyStopped;
    }

    /// Apply a ranking posted by the trainer to the candidate order.
    ///
    /// Only the candidate cursor is affected. During training it is rebuilt
    /// right away, without the image on screen; before training the new order
    /// is used when the candidate cursor is created.
    pub fn reorder(&mut self, ranked: &[String]) -> usize {
        let placed = self.pool.reorder_candidates(ranked);
        info!(
            ranked = ranked.len(),
            placed,
            "Query received, images to annotate re-ordered"
        );

        if self.phase == Phase::Training && !self.no_images_left {
            let carried = self.buffer.carried().cloned();
            let order: Vec<ImageRef> = self
                .pool
                .candidates()
                .iter()
                .filter(|image| Some(*image) != carried.as_ref())
                .cloned()
                .collect();
            self.candidate_cursor = Some(Cursor::new(order));
        }
        placed
    }

    /// Screen the UI should render
    pub fn page(&self) -> Page {
        match self.phase {
            Phase::Stopped => Page::Stopped,
            Phase::CollectingLabels => Page::CollectLabels {
                labels: self.catalog.labels(),
            },
            _ => Page::Annotate {
                labels: self.catalog.labels(),
            },
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.phase,
            labels: self.catalog.labels(),
            evaluation_remaining: self.pool.evaluation().len(),
            evaluation_recorded: self.evaluation_records.len(),
            candidates_remaining: self.pool.candidates().len(),
            buffered: self.buffer.len(),
            carried: self.buffer.carried().cloned(),
            no_images_left: self.no_images_left,
        }
    }

    /// Process shutdown: after an early stop nobody sent `stop_training` yet,
    /// so send it now, then close the queues.
    pub fn shutdown(&mut self) {
        if self.phase == Phase::EarlyStopped && !self.stop_sent {
            info!("Sending stop signal after early stop");
            self.dispatcher.enqueue(Payload::Stop(StopTraining {
                labelled_data: LabelledData::new(),
                labels_list: self.catalog.labels(),
                unlabelled: self.unlabelled_paths(),
            }));
            self.stop_sent = true;
        }
        self.dispatcher.close();
    }

    /// Snapshot of the current state; `pending` is the last flushed batch.
    ///
    /// Until the evaluation batch is complete, `unlabelled` also lists the
    /// evaluation images left and the labels recorded for the others are kept
    /// in `evaluation_progress`.
    pub fn snapshot(&self, pending: Option<LabelledData>) -> SessionSnapshot {
        let evaluation_progress = match self.evaluation_batch {
            Some(_) => None,
            None => Some(EvaluationProgress {
                labelled_data: self.evaluation_records.clone(),
                remaining: paths(self.pool.evaluation()),
            }),
        };
        let mut unlabelled = evaluation_progress
            .as_ref()
            .map(|progress| progress.remaining.clone())
            .unwrap_or_default();
        unlabelled.extend(self.unlabelled_paths());

        SessionSnapshot {
            labels_list: self.catalog.labels(),
            unlabelled,
            labelled_data: pending.filter(|d| !d.is_empty()),
            test_data: self.evaluation_batch.clone(),
            evaluation_progress,
        }
    }

    fn resolve(&self, name: &str) -> Option<LabelId> {
        match self.catalog.id_of(name) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!(error = %e, "Label ignored");
                None
            }
        }
    }

    fn unlabelled_paths(&self) -> Vec<String> {
        paths(self.pool.candidates())
    }

    fn send_init(&self) {
        self.dispatcher.enqueue(Payload::Init(InitTraining {
            labels_list: self.catalog.labels(),
        }));
    }

    fn send_train(&self, batch: &FlushedBatch) {
        info!(
            records = batch.len(),
            remaining = batch.unlabelled.len(),
            "Sending training batch"
        );
        self.dispatcher.enqueue(Payload::Train(TrainBatch {
            labelled_data: batch.labelled_data(),
            labels_list: self.catalog.labels(),
            unlabelled: batch.unlabelled_paths(),
        }));
    }

    fn checkpoint(&self, flushed: &FlushedBatch) {
        let Some(store) = &self.store else {
            return;
        };
        // Written inline under the session lock: checkpoints land in event order
        let snapshot = self.snapshot(Some(flushed.labelled_data()));
        if let Err(e) = store.save(&snapshot) {
            warn!(error = %e, "Could not write session snapshot");
        }
    }

    fn enter_annotation(&mut self) {
        if self.evaluation_batch.is_some() {
            self.enter_training();
        } else {
            self.phase = Phase::Evaluation;
            self.evaluation_cursor = Some(self.pool.cursor_over_evaluation());
            info!(images = self.pool.evaluation().len(), "Evaluation phase started");
        }
    }

    fn enter_training(&mut self) {
        self.phase = Phase::Training;
        self.candidate_cursor = Some(self.pool.cursor_over_candidates());
        info!(images = self.pool.candidates().len(), "Training phase started");
    }

    fn advance(&mut self, label_id: Option<LabelId>) -> NextImage {
        if self.phase == Phase::Evaluation {
            if let Some(image) = self.step_evaluation(label_id) {
                return NextImage::Image {
                    image,
                    phase: Phase::Evaluation,
                };
            }
            // The label belonged to the last evaluation image
            return self.step_training(None);
        }
        self.step_training(label_id)
    }

    /// Record the pending evaluation label and show the next evaluation
    /// image. Returns `None` once the evaluation set is exhausted, after the
    /// batch was sent and the session moved to training.
    fn step_evaluation(&mut self, label_id: Option<LabelId>) -> Option<ImageRef> {
        if let Some(image) = self.pending_evaluation.take() {
            if let Some(id) = label_id {
                self.pool.remove(&image);
                self.evaluation_records.push(image.into_string(), id);
            }
        }

        let step = match self.evaluation_cursor.as_mut() {
            Some(cursor) => cursor.advance(),
            None => CursorStep::Exhausted,
        };
        match step {
            CursorStep::Next(image) => {
                self.pending_evaluation = Some(image.clone());
                Some(image)
            }
            CursorStep::Exhausted | CursorStep::Drained => {
                let batch = std::mem::take(&mut self.evaluation_records);
                info!(records = batch.len(), "Sending evaluation data");
                self.dispatcher.enqueue(Payload::Evaluation(TestData {
                    test_data: batch.clone(),
                    labels_list: self.catalog.labels(),
                }));
                self.evaluation_batch = Some(batch);
                self.evaluation_cursor = None;
                self.enter_training();
                None
            }
        }
    }

    fn step_training(&mut self, label_id: Option<LabelId>) -> NextImage {
        if self.no_images_left {
            return NextImage::NoImagesLeft;
        }

        if let (Some(id), Some(image)) = (label_id, self.buffer.carried().cloned()) {
            self.pool.remove(&image);
            self.buffer.record(image, id);
        }

        let step = match self.candidate_cursor.as_mut() {
            Some(cursor) => cursor.advance(),
            None => CursorStep::Exhausted,
        };
        match step {
            CursorStep::Next(image) => {
                self.buffer.carry_over(image.clone());
                if self.buffer.should_flush(self.settings.buffer_size) {
                    let batch = self.buffer.flush(FlushKind::Interim, &self.pool);
                    self.send_train(&batch);
                }
                NextImage::Image {
                    image,
                    phase: Phase::Training,
                }
            }
            CursorStep::Exhausted | CursorStep::Drained => {
                info!("No images left to annotate");
                self.no_images_left = true;
                let batch = self.buffer.flush(FlushKind::Final, &self.pool);
                if !batch.is_empty() {
                    self.send_train(&batch);
                }
                NextImage::NoImagesLeft
            }
        }
    }
}

fn paths(images: &[ImageRef]) -> Vec<String> {
    images.iter().map(|i| i.as_str().to_string()).collect()
}
