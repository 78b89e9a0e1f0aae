//! Outbound delivery to the training service
//!
//! Four independent FIFO queues (`init`, `train_batch`, `evaluation_batch`,
//! `stop`), each drained by exactly one tokio task making one request per
//! item. Enqueueing is an unbounded channel send and never waits on the
//! network.
//!
//! `init` is retried with a fixed backoff until the trainer accepts it (or
//! until the optional max wait runs out). Every other delivery is attempted
//! once; a failure is logged and the payload dropped.

pub mod client;
#[cfg(test)]
pub(crate) mod testing;

pub use client::{DeliveryError, HttpTrainerClient, TrainingService};

use labeler_common::protocol::{InitTraining, StopTraining, TestData, TrainBatch};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outbound queue names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Init,
    TrainBatch,
    EvaluationBatch,
    Stop,
}

impl Queue {
    pub fn name(&self) -> &'static str {
        match self {
            Queue::Init => "init",
            Queue::TrainBatch => "train_batch",
            Queue::EvaluationBatch => "evaluation_batch",
            Queue::Stop => "stop",
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An owned request body; its variant decides the queue
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Init(InitTraining),
    Train(TrainBatch),
    Evaluation(TestData),
    Stop(StopTraining),
}

impl Payload {
    pub fn queue(&self) -> Queue {
        match self {
            Payload::Init(_) => Queue::Init,
            Payload::Train(_) => Queue::TrainBatch,
            Payload::Evaluation(_) => Queue::EvaluationBatch,
            Payload::Stop(_) => Queue::Stop,
        }
    }
}

/// Backoff for `init_training`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed pause between attempts
    pub interval: Duration,
    /// Stop retrying after this long; `None` retries until the process exits
    pub max_wait: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_wait: None,
        }
    }
}

struct Senders {
    init: UnboundedSender<Payload>,
    train: UnboundedSender<Payload>,
    evaluation: UnboundedSender<Payload>,
    stop: UnboundedSender<Payload>,
}

impl Senders {
    fn for_queue(&self, queue: Queue) -> &UnboundedSender<Payload> {
        match queue {
            Queue::Init => &self.init,
            Queue::TrainBatch => &self.train,
            Queue::EvaluationBatch => &self.evaluation,
            Queue::Stop => &self.stop,
        }
    }
}

/// Receiving ends of the four queues
pub struct DispatchQueues {
    pub init: UnboundedReceiver<Payload>,
    pub train: UnboundedReceiver<Payload>,
    pub evaluation: UnboundedReceiver<Payload>,
    pub stop: UnboundedReceiver<Payload>,
}

impl DispatchQueues {
    fn receiver_mut(&mut self, queue: Queue) -> &mut UnboundedReceiver<Payload> {
        match queue {
            Queue::Init => &mut self.init,
            Queue::TrainBatch => &mut self.train,
            Queue::EvaluationBatch => &mut self.evaluation,
            Queue::Stop => &mut self.stop,
        }
    }

    /// Take whatever is queued on `queue` right now, without waiting
    pub fn drain_now(&mut self, queue: Queue) -> Vec<Payload> {
        let rx = self.receiver_mut(queue);
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(payload) => out.push(payload),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

/// Sending side of the queues, owned by the session coordinator
pub struct Dispatcher {
    senders: Option<Senders>,
}

impl Dispatcher {
    /// Create the four queues without workers attached
    pub fn channels() -> (Self, DispatchQueues) {
        let (init_tx, init_rx) = mpsc::unbounded_channel();
        let (train_tx, train_rx) = mpsc::unbounded_channel();
        let (evaluation_tx, evaluation_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();

        let dispatcher = Self {
            senders: Some(Senders {
                init: init_tx,
                train: train_tx,
                evaluation: evaluation_tx,
                stop: stop_tx,
            }),
        };
        let queues = DispatchQueues {
            init: init_rx,
            train: train_rx,
            evaluation: evaluation_rx,
            stop: stop_rx,
        };
        (dispatcher, queues)
    }

    /// Create the queues and spawn one worker per queue on the current runtime
    pub fn spawn(
        service: Arc<dyn TrainingService>,
        policy: RetryPolicy,
    ) -> (Self, DispatchWorkers) {
        let (dispatcher, queues) = Self::channels();
        let DispatchQueues {
            init,
            train,
            evaluation,
            stop,
        } = queues;

        let handles = [
            (Queue::Init, init),
            (Queue::TrainBatch, train),
            (Queue::EvaluationBatch, evaluation),
            (Queue::Stop, stop),
        ]
        .into_iter()
        .map(|(queue, rx)| {
            let handle = tokio::spawn(run_worker(queue, rx, Arc::clone(&service), policy));
            (queue, handle)
        })
        .collect();

        (dispatcher, DispatchWorkers { handles })
    }

    /// Push `payload` onto its queue.
    ///
    /// Returns `false` (and logs) if the dispatcher was closed or the worker
    /// is gone; the payload is dropped in that case.
    pub fn enqueue(&self, payload: Payload) -> bool {
        let queue = payload.queue();
        let Some(senders) = &self.senders else {
            warn!(queue = %queue, "Dispatcher closed, payload dropped");
            return false;
        };

        match senders.for_queue(queue).send(payload) {
            Ok(()) => {
                debug!(queue = %queue, "Payload enqueued");
                true
            }
            Err(_) => {
                error!(queue = %queue, "Dispatch worker gone, payload dropped");
                false
            }
        }
    }

    /// Close every queue; workers exit once they have drained what is queued
    pub fn close(&mut self) {
        if self.senders.take().is_some() {
            debug!("Dispatcher closed");
        }
    }
}

/// Join handles of the queue workers
pub struct DispatchWorkers {
    handles: Vec<(Queue, JoinHandle<()>)>,
}

impl DispatchWorkers {
    /// Wait for every worker to finish, up to `timeout`.
    ///
    /// Workers only finish after [`Dispatcher::close`]. Returns `false` if the
    /// timeout elapsed first; unfinished deliveries are abandoned.
    pub async fn drain(self, timeout: Duration) -> bool {
        let handles = self.handles;
        let joined = tokio::time::timeout(timeout, async move {
            for (queue, handle) in handles {
                if let Err(e) = handle.await {
                    warn!(queue = %queue, error = %e, "Dispatch worker ended abnormally");
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!("Timed out waiting for queued deliveries, abandoning them");
        }
        joined.is_ok()
    }
}

async fn run_worker(
    queue: Queue,
    mut rx: UnboundedReceiver<Payload>,
    service: Arc<dyn TrainingService>,
    policy: RetryPolicy,
) {
    debug!(queue = %queue, "Dispatch worker started");
    while let Some(payload) = rx.recv().await {
        // Failures are already logged inside deliver
        let _ = deliver(service.as_ref(), &policy, payload).await;
    }
    debug!(queue = %queue, "Queue closed, dispatch worker exiting");
}

/// Perform one delivery with the semantics of its queue
pub async fn deliver(
    service: &dyn TrainingService,
    policy: &RetryPolicy,
    payload: Payload,
) -> Result<(), DeliveryError> {
    let queue = payload.queue();
    let result = match &payload {
        Payload::Init(body) => return deliver_init(service, policy, body).await.map(|_| ()),
        Payload::Train(body) => service.train(body).await,
        Payload::Evaluation(body) => service.test_data(body).await,
        Payload::Stop(body) => service.stop_training(body).await,
    };

    match &result {
        Ok(()) => info!(queue = %queue, "Delivered to training service"),
        Err(e) => error!(queue = %queue, error = %e, "Delivery failed, payload dropped"),
    }
    result
}

/// Post `init_training` until it succeeds; returns the number of attempts
pub async fn deliver_init(
    service: &dyn TrainingService,
    policy: &RetryPolicy,
    body: &InitTraining,
) -> Result<u32, DeliveryError> {
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match service.init_training(body).await {
            Ok(()) => {
                info!(attempts, labels = body.labels_list.len(), "Training service initialised");
                return Ok(attempts);
            }
            Err(e) => {
                if let Some(max_wait) = policy.max_wait {
                    if started.elapsed() >= max_wait {
                        let err = DeliveryError::ServiceUnreachableAtInit {
                            attempts,
                            last_error: e.to_string(),
                        };
                        error!(error = %err, "Giving up on training service init");
                        return Err(err);
                    }
                }
                warn!(attempt = attempts, error = %e, "Waiting for the training service to start");
                tokio::time::sleep(policy.interval).await;
            }
        }
    }
}
