use crate::config::Options;
use crate::policy::{self, ThreadRole};
use crate::queue::{OperationQueue, WorkItem};
use crate::response::ResponseWorker;
use crate::worker::{Worker, WorkerContext};
use log::{debug, error, info, trace};
use memgrid_ops_int::{
    Address, CallId, Error, ErrorKind, ExecutionService, Operation, OperationHandler,
    PanicInspector, Packet, PartitionId, ResponseHandler, ThreadLifecycleListener,
    GENERIC_PARTITION_ID,
};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A partition worker together with the queue pair it owns.
struct PartitionWorker {
    queue: Arc<OperationQueue>,
    worker: Worker,
}

/// Routes operations, packets and runnables to the node's worker threads.
///
/// Partition-aware tasks are serialized on the partition worker selected by
/// `partition_id mod P`; everything else competes on the generic pool.
/// Response packets bypass both and go to the dedicated response worker.
///
/// Built through [`Builder`](crate::Builder); dropping the scheduler shuts it
/// down.
pub struct OperationScheduler {
    partition_workers: Box<[PartitionWorker]>,
    generic_queue: Arc<OperationQueue>,
    generic_workers: Box<[Worker]>,
    response: ResponseWorker,
    handler: Arc<dyn OperationHandler>,
    execution_service: Arc<dyn ExecutionService>,
    shutdown: Arc<AtomicBool>,
    accepted: AtomicU64,
    options: Options,
}

impl OperationScheduler {
    pub(crate) fn new(
        handler: Arc<dyn OperationHandler>,
        response_handler: Arc<dyn ResponseHandler>,
        execution_service: Arc<dyn ExecutionService>,
        inspector: Arc<dyn PanicInspector>,
        lifecycle: Arc<dyn ThreadLifecycleListener>,
        options: Options,
    ) -> Self {
        info!(
            "starting operation scheduler with {} partition workers and {} generic workers",
            options.partition_threads, options.generic_threads
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let context = Arc::new(WorkerContext {
            handler: Arc::clone(&handler),
            inspector: Arc::clone(&inspector),
            lifecycle: Arc::clone(&lifecycle),
            shutdown: Arc::clone(&shutdown),
        });

        let partition_workers = (0..options.partition_threads)
            .map(|index| {
                let queue = Arc::new(OperationQueue::new(
                    options.queue_capacity,
                    options.rejection_policy,
                ));
                let worker = Worker::spawn(
                    format!("{}.partition-{index}", options.thread_name_prefix),
                    ThreadRole::Partition(index),
                    Arc::clone(&queue),
                    Arc::clone(&context),
                );
                PartitionWorker { queue, worker }
            })
            .collect();

        let generic_queue = Arc::new(OperationQueue::new(
            options.queue_capacity,
            options.rejection_policy,
        ));
        let generic_workers = (0..options.generic_threads)
            .map(|index| {
                Worker::spawn(
                    format!("{}.generic-{index}", options.thread_name_prefix),
                    ThreadRole::Generic,
                    Arc::clone(&generic_queue),
                    Arc::clone(&context),
                )
            })
            .collect();

        let response = ResponseWorker::spawn(
            format!("{}.response", options.thread_name_prefix),
            response_handler,
            inspector,
            lifecycle,
            Arc::clone(&shutdown),
        );

        Self {
            partition_workers,
            generic_queue,
            generic_workers,
            response,
            handler,
            execution_service,
            shutdown,
            accepted: AtomicU64::new(0),
            options,
        }
    }

    /// Submits a locally produced operation.
    ///
    /// Operations naming an external executor must be generic and non-urgent;
    /// they are wrapped into a runnable and handed to the named pool instead
    /// of a scheduler queue.
    pub fn submit_operation(&self, operation: Operation) -> Result<(), Error> {
        if let Some(name) = operation.executor_name() {
            if operation.is_partition_aware() {
                return Err(Error::new(
                    ErrorKind::InvalidRouting,
                    format!(
                        "operation {} names executor {name} but is bound to partition {}",
                        operation.call_id(),
                        operation.partition_id()
                    ),
                ));
            }
            if operation.is_urgent() {
                return Err(Error::new(
                    ErrorKind::InvalidRouting,
                    format!("urgent operation {} must not name an executor", operation.call_id()),
                ));
            }
            let executor = self.execution_service.executor(name).ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidArgument,
                    format!("no executor registered under {name}"),
                )
            })?;

            trace!("handing operation {} to executor {name}", operation.call_id());
            let handler = Arc::clone(&self.handler);
            executor.execute(Box::new(move || {
                if let Err(e) = handler.process(operation) {
                    error!("external operation failed: {e}");
                }
            }));
            return Ok(());
        }

        let partition_id = if operation.is_partition_aware() {
            operation.partition_id()
        } else {
            GENERIC_PARTITION_ID
        };
        let urgent = operation.is_urgent();
        self.route(WorkItem::Operation(operation), partition_id, urgent)
    }

    /// Submits a non-urgent housekeeping task that must observe partition
    /// affinity.
    pub fn submit_runnable(
        &self,
        partition_id: PartitionId,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<(), Error> {
        self.route(WorkItem::Runnable(Box::new(task)), partition_id, false)
    }

    /// Submits an inbound transport packet.
    ///
    /// Response packets go to the response worker; everything else is routed
    /// by the partition id and urgency flag in the header. A rejection after
    /// shutdown is swallowed, the transport may race the node going down.
    pub fn submit_packet(&self, packet: Packet) -> Result<(), Error> {
        let result = if packet.is_response() {
            if self.shutdown.load(Ordering::Acquire) {
                Err(Error::new(ErrorKind::Rejected, "scheduler is shut down"))
            } else {
                self.response.push(packet)
            }
        } else {
            let partition_id = packet.partition_id();
            let urgent = packet.is_urgent();
            self.route(WorkItem::Packet(packet), partition_id, urgent)
        };

        match result {
            Err(e)
                if e.kind() == ErrorKind::Rejected
                    && self.shutdown.load(Ordering::Acquire) =>
            {
                debug!("dropping packet submitted to an inactive node: {e}");
                Ok(())
            }
            other => other,
        }
    }

    fn route(
        &self,
        item: WorkItem,
        partition_id: PartitionId,
        urgent: bool,
    ) -> Result<(), Error> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::Rejected, "scheduler is shut down"));
        }

        let queue = if partition_id < 0 {
            &self.generic_queue
        } else {
            &self.partition_workers[self.partition_index(partition_id)].queue
        };

        if urgent {
            queue.push_urgent(item);
        } else {
            queue.push(item)?;
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    fn partition_index(&self, partition_id: PartitionId) -> usize {
        debug_assert!(partition_id >= 0);
        partition_id as usize % self.partition_workers.len()
    }

    /// Number of partition worker threads.
    #[inline]
    pub fn partition_thread_count(&self) -> usize {
        self.partition_workers.len()
    }

    /// Number of generic worker threads.
    #[inline]
    pub fn generic_thread_count(&self) -> usize {
        self.generic_workers.len()
    }

    /// Whether the current thread may execute an operation with the given
    /// partition id synchronously on itself.
    pub fn may_run_here(&self, partition_id: PartitionId) -> bool {
        match policy::current_role() {
            ThreadRole::Io => false,
            _ if partition_id < 0 => true,
            ThreadRole::Partition(index) => index == self.partition_index(partition_id),
            _ => false,
        }
    }

    /// Whether the current thread may submit and potentially wait on the
    /// operation without risking a queue inversion deadlock.
    pub fn may_invoke_here(&self, operation: &Operation) -> bool {
        match policy::current_role() {
            ThreadRole::Io => false,
            ThreadRole::Partition(index) if operation.is_partition_aware() => {
                index == self.partition_index(operation.partition_id())
            }
            _ => true,
        }
    }

    /// Number of operations currently executing on a worker thread.
    pub fn running_operation_count(&self) -> usize {
        let partition = self
            .partition_workers
            .iter()
            .filter(|pw| pw.worker.shared().current_operation().is_some())
            .count();
        let generic = self
            .generic_workers
            .iter()
            .filter(|w| w.shared().current_operation().is_some())
            .count();
        partition + generic
    }

    /// Number of queued non-urgent tasks across all operation workers.
    pub fn queue_size(&self) -> usize {
        let partition: usize = self.partition_workers.iter().map(|pw| pw.queue.len()).sum();
        partition + self.generic_queue.len()
    }

    /// Number of queued urgent tasks across all operation workers.
    pub fn priority_queue_size(&self) -> usize {
        let partition: usize = self
            .partition_workers
            .iter()
            .map(|pw| pw.queue.priority_len())
            .sum();
        partition + self.generic_queue.priority_len()
    }

    /// Number of queued response packets.
    pub fn response_queue_size(&self) -> usize {
        self.response.queue_size()
    }

    /// Number of tasks the scheduler queues have accepted so far.
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Number of tasks taken by an operation worker but dropped unprocessed
    /// at shutdown.
    pub fn abandoned_count(&self) -> usize {
        let partition: usize = self
            .partition_workers
            .iter()
            .map(|pw| pw.queue.abandoned_count())
            .sum();
        partition + self.generic_queue.abandoned_count()
    }

    /// Number of response packets the response queue has accepted so far.
    pub fn accepted_response_count(&self) -> u64 {
        self.response.accepted_count()
    }

    /// Number of response packets taken by the response worker but dropped
    /// unprocessed at shutdown.
    pub fn abandoned_response_count(&self) -> usize {
        self.response.abandoned_count()
    }

    /// Whether some worker currently executes the given invocation.
    ///
    /// For a partition-aware id this is a constant-time probe of the one
    /// worker that could run it; otherwise all generic workers are scanned.
    pub fn is_operation_executing(
        &self,
        caller: &Address,
        partition_id: PartitionId,
        call_id: CallId,
    ) -> bool {
        if partition_id >= 0 {
            self.partition_workers[self.partition_index(partition_id)]
                .worker
                .shared()
                .is_executing(caller, partition_id, call_id)
        } else {
            self.generic_workers
                .iter()
                .any(|w| w.shared().is_executing(caller, partition_id, call_id))
        }
    }

    /// Point-in-time snapshot of the scheduler counters.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            accepted: self.accepted_count(),
            partition_processed: self
                .partition_workers
                .iter()
                .map(|pw| pw.worker.shared().processed_count())
                .collect(),
            generic_processed: self
                .generic_workers
                .iter()
                .map(|w| w.shared().processed_count())
                .collect(),
            accepted_responses: self.accepted_response_count(),
            processed_responses: self.response.processed_count(),
            abandoned: self.abandoned_count(),
            abandoned_responses: self.abandoned_response_count(),
            queued: self.queue_size(),
            queued_priority: self.priority_queue_size(),
            queued_responses: self.response_queue_size(),
        }
    }

    /// Shuts the scheduler down.
    ///
    /// Idempotent. Wakes every worker, then joins each thread with a bounded
    /// wait; a thread that overruns the deadline is abandoned. Tasks still
    /// queued at that point are never executed.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down operation scheduler");

        for pw in &self.partition_workers {
            pw.queue.wake();
        }
        for _ in self.generic_workers.iter() {
            self.generic_queue.wake();
        }
        self.response.wake();

        let timeout = self.options.termination_timeout;
        for pw in &self.partition_workers {
            pw.worker.join_timeout(timeout);
        }
        for worker in self.generic_workers.iter() {
            worker.join_timeout(timeout);
        }
        self.response.join_timeout(timeout);

        info!("operation scheduler stopped");
    }
}

impl Drop for OperationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Debug for OperationScheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationScheduler")
            .field("partition_workers", &self.partition_workers.len())
            .field("generic_workers", &self.generic_workers.len())
            .field("accepted", &self.accepted_count())
            .field("shutdown", &self.shutdown.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Point-in-time snapshot of the scheduler counters.
///
/// All values are approximate while the scheduler is running; they are exact
/// once it has been shut down.
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    /// Tasks accepted onto the operation queues so far.
    pub accepted: u64,
    /// Tasks processed per partition worker, indexed by thread id.
    pub partition_processed: Box<[u64]>,
    /// Tasks processed per generic worker.
    pub generic_processed: Box<[u64]>,
    /// Response packets accepted onto the response queue so far.
    pub accepted_responses: u64,
    /// Responses applied by the response worker.
    pub processed_responses: u64,
    /// Operation tasks taken but dropped unprocessed at shutdown.
    pub abandoned: usize,
    /// Response packets taken but dropped unprocessed at shutdown.
    pub abandoned_responses: usize,
    /// Non-urgent tasks still queued.
    pub queued: usize,
    /// Urgent tasks still queued.
    pub queued_priority: usize,
    /// Response packets still queued.
    pub queued_responses: usize,
}

impl SchedulerStats {
    /// Sum of the tasks processed by all operation workers.
    pub fn processed_operations(&self) -> u64 {
        let partition: u64 = self.partition_processed.iter().sum();
        let generic: u64 = self.generic_processed.iter().sum();
        partition + generic
    }
}
