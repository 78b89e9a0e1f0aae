//! Scripted in-memory training service for tests

use async_trait::async_trait;
use labeler_common::protocol::{InitTraining, StopTraining, TestData, TrainBatch};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use super::{DeliveryError, Payload, TrainingService};

/// Records successful deliveries; can be told to fail the first N calls
#[derive(Default)]
pub(crate) struct ScriptedTrainer {
    init_failures: AtomicU32,
    train_failures: AtomicU32,
    init_attempts: AtomicU32,
    train_attempts: AtomicU32,
    delivered: Mutex<Vec<Payload>>,
    notify: Notify,
}

impl ScriptedTrainer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing_init(self: Arc<Self>, times: u32) -> Arc<Self> {
        self.init_failures.store(times, Ordering::SeqCst);
        self
    }

    pub(crate) fn failing_train(self: Arc<Self>, times: u32) -> Arc<Self> {
        self.train_failures.store(times, Ordering::SeqCst);
        self
    }

    pub(crate) fn init_attempts(&self) -> u32 {
        self.init_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn train_attempts(&self) -> u32 {
        self.train_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn delivered(&self) -> Vec<Payload> {
        self.delivered.lock().unwrap().clone()
    }

    /// Wait until at least `count` deliveries succeeded (panics after 5s)
    pub(crate) async fn wait_for_deliveries(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.notify.notified();
                if self.delivered.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for deliveries");
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn accept(&self, payload: Payload) -> Result<(), DeliveryError> {
        self.delivered.lock().unwrap().push(payload);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl TrainingService for ScriptedTrainer {
    async fn init_training(&self, body: &InitTraining) -> Result<(), DeliveryError> {
        self.init_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.init_failures) {
            return Err(DeliveryError::ServiceUnavailable("connection refused".into()));
        }
        self.accept(Payload::Init(body.clone()))
    }

    async fn train(&self, body: &TrainBatch) -> Result<(), DeliveryError> {
        self.train_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.train_failures) {
            return Err(DeliveryError::Rejected(503, "busy".into()));
        }
        self.accept(Payload::Train(body.clone()))
    }

    async fn test_data(&self, body: &TestData) -> Result<(), DeliveryError> {
        self.accept(Payload::Evaluation(body.clone()))
    }

    async fn stop_training(&self, body: &StopTraining) -> Result<(), DeliveryError> {
        self.accept(Payload::Stop(body.clone()))
    }
}
