//! Message Delivery Queue.
//!
//! Every thread gets its own lane: an unbounded channel drained by a
//! dedicated task, so tasks for one recipient run strictly in submission
//! order while different recipients proceed in parallel. A shared
//! semaphore caps how many tasks execute at once across all lanes.
//!
//! [`DeliveryQueue::enqueue`] hands back a one-shot receiver resolving to
//! the task's outcome. Failures are also recorded on the stored message, so
//! callers may drop the receiver when they only care about the change feed.
//!
//! A lane that stays empty for the idle timeout retires and forgets its
//! thread; the next task for that thread opens a fresh lane.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sofa_net::SecureTransport;
use sofa_shared::{Envelope, ThreadId};
use sofa_store::{ChatMessage, ConversationStore, SendState};

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Transmit, then persist as Sent or Failed.
    SendAndPersist,
    /// Transmit without touching the store.
    SendOnly,
    /// Persist as given without transmitting.
    PersistOnly,
    /// Overwrite a stored message by identity; never inserts.
    UpdateExisting,
}

#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub thread: ThreadId,
    pub message: ChatMessage,
    pub mode: DeliveryMode,
}

impl DeliveryTask {
    pub fn new(thread: ThreadId, message: ChatMessage, mode: DeliveryMode) -> Self {
        Self {
            thread,
            message,
            mode,
        }
    }
}

/// Resolves to the message as it was last written (or sent).
pub type DeliveryReceipt = oneshot::Receiver<Result<ChatMessage>>;

struct Job {
    task: DeliveryTask,
    reply: oneshot::Sender<Result<ChatMessage>>,
}

#[derive(Default)]
struct Lanes {
    senders: HashMap<ThreadId, mpsc::UnboundedSender<Job>>,
    workers: Vec<JoinHandle<()>>,
    closed: bool,
}

const DEFAULT_LANE_IDLE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct DeliveryQueue {
    conversations: ConversationStore,
    transport: Arc<dyn SecureTransport>,
    permits: Arc<Semaphore>,
    lanes: Arc<Mutex<Lanes>>,
    lane_idle: Duration,
}

impl DeliveryQueue {
    pub fn new(
        conversations: ConversationStore,
        transport: Arc<dyn SecureTransport>,
        worker_pool: usize,
    ) -> Self {
        Self {
            conversations,
            transport,
            permits: Arc::new(Semaphore::new(worker_pool.max(1))),
            lanes: Arc::new(Mutex::new(Lanes::default())),
            lane_idle: DEFAULT_LANE_IDLE,
        }
    }

    /// How long an empty lane waits for work before retiring.
    pub fn with_lane_idle(mut self, idle: Duration) -> Self {
        self.lane_idle = idle;
        self
    }

    /// Threads that currently have an open lane.
    pub fn lane_count(&self) -> usize {
        lock_lanes(&self.lanes).senders.len()
    }

    /// Append a task to its thread's lane.
    ///
    /// Fails with [`ClientError::ShuttingDown`] once [`close`](Self::close)
    /// has run. Must be called from within a tokio runtime.
    pub fn enqueue(&self, task: DeliveryTask) -> Result<DeliveryReceipt> {
        let (reply, receipt) = oneshot::channel();
        let mut lanes = lock_lanes(&self.lanes);
        if lanes.closed {
            return Err(ClientError::ShuttingDown);
        }

        let thread = task.thread.clone();
        let job = Job { task, reply };
        let job = match lanes.senders.get(&thread) {
            Some(lane) => match lane.send(job) {
                Ok(()) => return Ok(receipt),
                // The lane's worker panicked; open a fresh one below.
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // A freshly created channel with a live receiver accepts the send.
        let _ = tx.send(job);
        lanes.senders.insert(thread.clone(), tx);
        lanes.workers.retain(|worker| !worker.is_finished());
        let lane = Lane {
            thread,
            jobs: rx,
            conversations: self.conversations.clone(),
            transport: self.transport.clone(),
            permits: self.permits.clone(),
            lanes: self.lanes.clone(),
            idle: self.lane_idle,
        };
        lanes.workers.push(tokio::spawn(lane.run()));
        Ok(receipt)
    }

    /// Enqueue and wait for the outcome.
    pub async fn submit(&self, task: DeliveryTask) -> Result<ChatMessage> {
        self.enqueue(task)?.await.map_err(|_| ClientError::Cancelled)?
    }

    /// Stop accepting tasks. Tasks already enqueued still run.
    pub fn close(&self) {
        let mut lanes = lock_lanes(&self.lanes);
        if !lanes.closed {
            lanes.closed = true;
            // Dropping the senders lets each lane finish its backlog and exit.
            lanes.senders.clear();
            info!("Delivery queue closed");
        }
    }

    /// Close the queue and wait for every lane to drain.
    pub async fn drain(&self) {
        self.close();
        let workers = std::mem::take(&mut lock_lanes(&self.lanes).workers);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Delivery lane ended abnormally");
            }
        }
        info!("Delivery queue drained");
    }
}

fn lock_lanes(lanes: &Mutex<Lanes>) -> MutexGuard<'_, Lanes> {
    match lanes.lock() {
        Ok(lanes) => lanes,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Lane {
    thread: ThreadId,
    jobs: mpsc::UnboundedReceiver<Job>,
    conversations: ConversationStore,
    transport: Arc<dyn SecureTransport>,
    permits: Arc<Semaphore>,
    lanes: Arc<Mutex<Lanes>>,
    idle: Duration,
}

impl Lane {
    async fn run(mut self) {
        debug!(thread = %self.thread, "Delivery lane opened");
        loop {
            let job = match tokio::time::timeout(self.idle, self.jobs.recv()).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(_) => match self.retire() {
                    Some(job) => job,
                    None => break,
                },
            };
            let permit = self.permits.acquire().await;
            let outcome = execute(&self.conversations, self.transport.as_ref(), job.task).await;
            drop(permit);
            // The caller may have stopped waiting.
            let _ = job.reply.send(outcome);
        }
        debug!(thread = %self.thread, "Delivery lane closed");
    }

    /// Unregister the lane unless a job slipped in before the lock was
    /// taken. Senders only send while holding the same lock, so an empty
    /// channel here stays empty.
    fn retire(&mut self) -> Option<Job> {
        let mut lanes = lock_lanes(&self.lanes);
        match self.jobs.try_recv() {
            Ok(job) => Some(job),
            Err(TryRecvError::Empty) => {
                lanes.senders.remove(&self.thread);
                debug!(thread = %self.thread, "Delivery lane idle");
                None
            }
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

async fn execute(
    conversations: &ConversationStore,
    transport: &dyn SecureTransport,
    task: DeliveryTask,
) -> Result<ChatMessage> {
    let DeliveryTask {
        thread,
        mut message,
        mode,
    } = task;

    match mode {
        DeliveryMode::SendAndPersist => {
            let wire = Envelope::for_transport(&message.payload)?;
            match transport.send(&thread, &wire).await {
                Ok(()) => {
                    message.mark(SendState::Sent, None);
                    conversations.append(&thread, &message)?;
                    debug!(thread = %thread, message = %message.id, "Message sent");
                    Ok(message)
                }
                Err(e) => {
                    warn!(thread = %thread, message = %message.id, error = %e, "Message send failed");
                    message.mark(SendState::Failed, Some(e.to_string()));
                    conversations.append(&thread, &message)?;
                    Err(e.into())
                }
            }
        }
        DeliveryMode::SendOnly => {
            let wire = Envelope::for_transport(&message.payload)?;
            if let Err(e) = transport.send(&thread, &wire).await {
                warn!(thread = %thread, kind = ?message.kind, error = %e, "Envelope send failed");
                return Err(e.into());
            }
            debug!(thread = %thread, kind = ?message.kind, "Envelope sent");
            Ok(message)
        }
        DeliveryMode::PersistOnly => {
            conversations.append(&thread, &message)?;
            Ok(message)
        }
        DeliveryMode::UpdateExisting => match conversations.update(&message)? {
            Some(_) => Ok(message),
            None => Err(ClientError::NotFound(format!("message {}", message.id))),
        },
    }
}
