use crate::policy::{self, ThreadRole};
use crate::queue::{OperationQueue, WorkItem};
use log::{debug, error, info, trace, warn};
use memgrid_ops_int::{
    Address, CallId, Operation, OperationDescriptor, OperationHandler, PanicInspector,
    PartitionId, ThreadLifecycleListener,
};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Services shared by all operation workers.
pub(crate) struct WorkerContext {
    pub handler: Arc<dyn OperationHandler>,
    pub inspector: Arc<dyn PanicInspector>,
    pub lifecycle: Arc<dyn ThreadLifecycleListener>,
    pub shutdown: Arc<AtomicBool>,
}

/// Worker state observable by other threads.
///
/// `processed` and `current_operation` have a single writer, the owning
/// worker; readers tolerate staleness. The descriptor is too wide for a
/// lock-free atomic, so the slot is a mutex with sub-microsecond critical
/// sections.
pub(crate) struct WorkerShared {
    processed: AtomicU64,
    current_operation: Mutex<Option<OperationDescriptor>>,
}

impl WorkerShared {
    fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            current_operation: Mutex::new(None),
        }
    }

    /// Number of tasks the worker has processed.
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Descriptor of the operation currently executing, if any.
    pub fn current_operation(&self) -> Option<OperationDescriptor> {
        *self.current_operation.lock()
    }

    /// Whether the worker currently executes the given invocation.
    pub fn is_executing(
        &self,
        caller: &Address,
        partition_id: PartitionId,
        call_id: CallId,
    ) -> bool {
        self.current_operation
            .lock()
            .is_some_and(|d| d.matches(caller, partition_id, call_id))
    }
}

/// A long-lived operation worker thread.
pub(crate) struct Worker {
    shared: Arc<WorkerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

impl Worker {
    /// Spawns a worker draining the given queue pair.
    pub fn spawn(
        name: String,
        role: ThreadRole,
        queue: Arc<OperationQueue>,
        context: Arc<WorkerContext>,
    ) -> Self {
        let shared = Arc::new(WorkerShared::new());

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn({
                let shared = Arc::clone(&shared);
                let name = name.clone();
                move || worker_main(role, &name, &shared, &queue, &context)
            })
            .expect("could not spawn worker thread");

        Self {
            shared,
            thread: Mutex::new(Some(thread)),
            name,
        }
    }

    #[inline]
    pub fn shared(&self) -> &WorkerShared {
        &self.shared
    }

    /// Joins the worker, abandoning it when the deadline elapses.
    pub fn join_timeout(&self, timeout: Duration) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            join_with_deadline(&self.name, handle, timeout);
        }
    }
}

/// Bounded join; an overrunning thread is logged and left behind.
pub(crate) fn join_with_deadline(name: &str, handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("worker {name} did not stop within {timeout:?}, abandoning it");
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    if handle.join().is_err() {
        error!("worker {name} terminated with a panic");
    }
}

fn worker_main(
    role: ThreadRole,
    name: &str,
    shared: &WorkerShared,
    queue: &OperationQueue,
    context: &WorkerContext,
) {
    policy::set_current_role(role);
    context.lifecycle.on_thread_start(name);
    info!("started operation worker {name}");

    let work_rx = queue.receiver();
    loop {
        let item = match work_rx.recv() {
            Ok(item) => item,
            Err(_) => {
                debug!("work queue of {name} disconnected");
                break;
            }
        };
        if context.shutdown.load(Ordering::Acquire) {
            match item {
                WorkItem::Wakeup => queue.sentinel_drained(),
                item => {
                    trace!("{name} observed shutdown, abandoning {item:?}");
                    queue.task_abandoned();
                }
            }
            break;
        }

        // Urgent work first, regardless of what unblocked the take.
        while let Some(urgent) = queue.pop_priority() {
            process(shared, queue, context, urgent);
        }
        process(shared, queue, context, item);
    }

    info!("stopping operation worker {name}");
    context.lifecycle.on_thread_exit(name);
}

fn process(
    shared: &WorkerShared,
    queue: &OperationQueue,
    context: &WorkerContext,
    item: WorkItem,
) {
    match item {
        WorkItem::Wakeup => queue.sentinel_drained(),
        WorkItem::Runnable(task) => {
            shared.processed.fetch_add(1, Ordering::Release);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                context.inspector.inspect(&*payload);
                error!("task panicked: {}", panic_message(&*payload));
            }
        }
        WorkItem::Packet(packet) => {
            shared.processed.fetch_add(1, Ordering::Release);
            match context.handler.deserialize(packet) {
                Ok(Some(operation)) => run_operation(shared, context, operation),
                Ok(None) => trace!("handler dropped a packet"),
                Err(e) => error!("failed to deserialize packet: {e}"),
            }
        }
        WorkItem::Operation(operation) => {
            shared.processed.fetch_add(1, Ordering::Release);
            run_operation(shared, context, operation);
        }
    }
}

fn run_operation(shared: &WorkerShared, context: &WorkerContext, operation: Operation) {
    let descriptor = operation.descriptor();
    let _guard = CurrentOperationGuard::publish(&shared.current_operation, descriptor);

    match panic::catch_unwind(AssertUnwindSafe(|| context.handler.process(operation))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("operation {descriptor:?} failed: {e}"),
        Err(payload) => {
            context.inspector.inspect(&*payload);
            error!(
                "operation {descriptor:?} panicked: {}",
                panic_message(&*payload)
            );
        }
    }
}

/// Clears the published operation on every exit path, unwinding included.
struct CurrentOperationGuard<'a> {
    slot: &'a Mutex<Option<OperationDescriptor>>,
}

impl<'a> CurrentOperationGuard<'a> {
    fn publish(slot: &'a Mutex<Option<OperationDescriptor>>, descriptor: OperationDescriptor) -> Self {
        *slot.lock() = Some(descriptor);
        Self { slot }
    }
}

impl Drop for CurrentOperationGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "opaque panic payload"
    }
}
