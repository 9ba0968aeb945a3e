use crossbeam_channel::{Receiver, Sender, TrySendError};
use crossbeam_deque::{Injector, Steal};
use log::error;
use memgrid_ops_int::{Error, ErrorKind, Operation, Packet, Runnable};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

/// What a full work queue does to a non-urgent submission.
///
/// Only observable when a queue capacity is configured; unbounded queues
/// never refuse work.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RejectionPolicy {
    /// Surface the refusal to the submitter.
    #[default]
    Reject,
    /// Block the submitter until space frees up.
    Block,
    /// Log the task at error level and drop it.
    Drop,
}

/// A task placed on a worker queue.
pub(crate) enum WorkItem {
    /// An in-process operation.
    Operation(Operation),
    /// A serialized envelope, deserialized by the worker.
    Packet(Packet),
    /// An opaque action.
    Runnable(Runnable),
    /// Unblocks a worker sitting in a blocking take; a no-op when processed.
    Wakeup,
}

impl Debug for WorkItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkItem::Operation(op) => f.debug_tuple("Operation").field(op).finish(),
            WorkItem::Packet(packet) => f.debug_tuple("Packet").field(packet).finish(),
            WorkItem::Runnable(_) => f.write_str("Runnable(..)"),
            WorkItem::Wakeup => f.write_str("Wakeup"),
        }
    }
}

/// The queue pair a worker drains: a blocking FIFO for regular work and a
/// non-blocking priority queue for urgent work.
///
/// Submitters push through shared references; only the owning worker (or the
/// competing workers of the generic pool) take from it. Every urgent enqueue
/// pairs one wakeup sentinel on the FIFO so that a worker blocked in `recv`
/// returns and drains the priority queue.
pub(crate) struct OperationQueue {
    work_tx: Sender<WorkItem>,
    work_rx: Receiver<WorkItem>,
    priority: Injector<WorkItem>,
    policy: RejectionPolicy,
    sentinels: AtomicUsize,
    abandoned: AtomicUsize,
}

impl OperationQueue {
    pub fn new(capacity: Option<usize>, policy: RejectionPolicy) -> Self {
        let (work_tx, work_rx) = match capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        };
        Self {
            work_tx,
            work_rx,
            priority: Injector::new(),
            policy,
            sentinels: AtomicUsize::new(0),
            abandoned: AtomicUsize::new(0),
        }
    }

    /// Enqueues a non-urgent task.
    pub fn push(&self, item: WorkItem) -> Result<(), Error> {
        match self.policy {
            RejectionPolicy::Block => self
                .work_tx
                .send(item)
                .map_err(|_| disconnected()),
            RejectionPolicy::Reject => self.work_tx.try_send(item).map_err(|e| match e {
                TrySendError::Full(item) => {
                    Error::new(ErrorKind::Rejected, format!("work queue is full, rejecting {item:?}"))
                }
                TrySendError::Disconnected(_) => disconnected(),
            }),
            RejectionPolicy::Drop => match self.work_tx.try_send(item) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(item)) => {
                    error!("work queue is full, dropping {item:?}");
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(disconnected()),
            },
        }
    }

    /// Enqueues an urgent task on the priority queue and wakes a worker.
    pub fn push_urgent(&self, item: WorkItem) {
        self.priority.push(item);
        self.wake();
    }

    /// Puts one wakeup sentinel on the FIFO.
    ///
    /// A full FIFO drops the sentinel: the worker then cannot be blocked in
    /// `recv`, so the wakeup guarantee holds without it.
    pub fn wake(&self) {
        if self.work_tx.try_send(WorkItem::Wakeup).is_ok() {
            self.sentinels.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Called by a worker for every sentinel it dequeued.
    pub fn sentinel_drained(&self) {
        self.sentinels.fetch_sub(1, Ordering::Relaxed);
    }

    /// Called by a worker that exits with an unprocessed task in hand.
    pub fn task_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of tasks taken but never processed because of shutdown.
    pub fn abandoned_count(&self) -> usize {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Next urgent task, if any.
    pub fn pop_priority(&self) -> Option<WorkItem> {
        loop {
            match self.priority.steal() {
                Steal::Success(item) => return Some(item),
                Steal::Retry => {}
                Steal::Empty => return None,
            }
        }
    }

    /// A take handle for a worker thread.
    pub fn receiver(&self) -> Receiver<WorkItem> {
        self.work_rx.clone()
    }

    /// Number of queued non-urgent tasks, sentinels excluded.
    pub fn len(&self) -> usize {
        self.work_tx
            .len()
            .saturating_sub(self.sentinels.load(Ordering::Relaxed))
    }

    /// Number of queued urgent tasks.
    pub fn priority_len(&self) -> usize {
        self.priority.len()
    }
}

impl Debug for OperationQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("len", &self.len())
            .field("priority_len", &self.priority_len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn disconnected() -> Error {
    Error::new(ErrorKind::Rejected, "work queue is disconnected")
}
