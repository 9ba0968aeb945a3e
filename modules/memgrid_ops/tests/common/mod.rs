#![allow(dead_code)]

use memgrid_ops::{current_role, Builder, OperationScheduler, ThreadRole};
use memgrid_ops_int::{
    Address, CallId, Error, ErrorKind, ExecutionService, Executor, Operation, OperationHandler,
    Packet, PanicInspector, PartitionId, Response, ResponseHandler, Runnable,
    ThreadLifecycleListener,
};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub fn addr() -> Address {
    "127.0.0.1:5701".parse().unwrap()
}

/// Polls `condition` until it holds or the timeout elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Operation handler that records starts and completions.
///
/// Packets are expected to carry the call id as eight big-endian bytes; an
/// empty payload makes `deserialize` drop the packet.
#[derive(Default)]
pub struct RecordingOperationHandler {
    sleeps: Mutex<HashMap<u64, Duration>>,
    panics: Mutex<HashSet<u64>>,
    starts: Mutex<Vec<u64>>,
    completions: Mutex<Vec<(u64, ThreadRole)>>,
    active_partitions: Mutex<HashMap<PartitionId, u32>>,
    overlapped: AtomicBool,
}

impl RecordingOperationHandler {
    pub fn set_sleep(&self, call_id: u64, duration: Duration) {
        self.sleeps.lock().unwrap().insert(call_id, duration);
    }

    pub fn set_panic(&self, call_id: u64) {
        self.panics.lock().unwrap().insert(call_id);
    }

    pub fn starts(&self) -> Vec<u64> {
        self.starts.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<(u64, ThreadRole)> {
        self.completions.lock().unwrap().clone()
    }

    pub fn completed_ids(&self) -> Vec<u64> {
        self.completions().into_iter().map(|(id, _)| id).collect()
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::Acquire)
    }
}

impl OperationHandler for RecordingOperationHandler {
    fn deserialize(&self, packet: Packet) -> Result<Option<Operation>, Error> {
        if packet.payload().is_empty() {
            return Ok(None);
        }
        let bytes: [u8; 8] = packet
            .payload()
            .try_into()
            .map_err(|_| Error::new(ErrorKind::Deserialization, "truncated call id"))?;
        let operation = Operation::new(addr(), CallId(u64::from_be_bytes(bytes)))
            .with_partition(packet.partition_id())
            .with_urgency(packet.is_urgent());
        Ok(Some(operation))
    }

    fn process(&self, operation: Operation) -> Result<(), Error> {
        let id = operation.call_id().0;
        let partition = operation.partition_id();
        self.starts.lock().unwrap().push(id);

        if partition >= 0 {
            let mut active = self.active_partitions.lock().unwrap();
            let running = active.entry(partition).or_insert(0);
            *running += 1;
            if *running > 1 {
                self.overlapped.store(true, Ordering::Release);
            }
        }

        if self.panics.lock().unwrap().contains(&id) {
            if partition >= 0 {
                *self
                    .active_partitions
                    .lock()
                    .unwrap()
                    .get_mut(&partition)
                    .unwrap() -= 1;
            }
            panic!("injected fault in call {id}");
        }

        let sleep = self.sleeps.lock().unwrap().get(&id).copied();
        if let Some(duration) = sleep {
            std::thread::sleep(duration);
        }

        if partition >= 0 {
            *self
                .active_partitions
                .lock()
                .unwrap()
                .get_mut(&partition)
                .unwrap() -= 1;
        }
        self.completions.lock().unwrap().push((id, current_role()));
        Ok(())
    }
}

/// Response handler that records the applied call ids.
#[derive(Default)]
pub struct RecordingResponseHandler {
    sleeps: Mutex<HashMap<u64, Duration>>,
    applied: Mutex<Vec<u64>>,
}

impl RecordingResponseHandler {
    pub fn set_sleep(&self, call_id: u64, duration: Duration) {
        self.sleeps.lock().unwrap().insert(call_id, duration);
    }

    pub fn applied(&self) -> Vec<u64> {
        self.applied.lock().unwrap().clone()
    }
}

impl ResponseHandler for RecordingResponseHandler {
    fn deserialize(&self, packet: Packet) -> Result<Response, Error> {
        let bytes: [u8; 8] = packet
            .payload()
            .try_into()
            .map_err(|_| Error::new(ErrorKind::Deserialization, "truncated call id"))?;
        let urgent = packet.is_urgent();
        Ok(Response::new(
            CallId(u64::from_be_bytes(bytes)),
            urgent,
            packet.into_payload(),
        ))
    }

    fn process(&self, response: Response) -> Result<(), Error> {
        let id = response.call_id().0;
        let sleep = self.sleeps.lock().unwrap().get(&id).copied();
        if let Some(duration) = sleep {
            std::thread::sleep(duration);
        }
        self.applied.lock().unwrap().push(id);
        Ok(())
    }
}

/// Registry without any executors.
#[derive(Default)]
pub struct NoExecutors;

impl ExecutionService for NoExecutors {
    fn executor(&self, _name: &str) -> Option<Arc<dyn Executor>> {
        None
    }
}

/// Executor running tasks inline on the submitting thread.
#[derive(Default)]
pub struct InlineExecutor {
    pub executed: AtomicUsize,
}

impl Executor for InlineExecutor {
    fn execute(&self, task: Runnable) {
        task();
        self.executed.fetch_add(1, Ordering::AcqRel);
    }
}

/// Registry with a single named executor.
pub struct SingleExecutorService {
    name: &'static str,
    executor: Arc<InlineExecutor>,
}

impl SingleExecutorService {
    pub fn new(name: &'static str, executor: Arc<InlineExecutor>) -> Self {
        Self { name, executor }
    }
}

impl ExecutionService for SingleExecutorService {
    fn executor(&self, name: &str) -> Option<Arc<dyn Executor>> {
        (name == self.name).then(|| Arc::clone(&self.executor) as Arc<dyn Executor>)
    }
}

/// Counts the panic payloads it inspects.
#[derive(Default)]
pub struct CountingInspector {
    pub seen: AtomicUsize,
}

impl PanicInspector for CountingInspector {
    fn inspect(&self, _payload: &(dyn Any + Send)) {
        self.seen.fetch_add(1, Ordering::AcqRel);
    }
}

/// Counts thread starts and exits.
#[derive(Default)]
pub struct CountingLifecycle {
    pub started: AtomicUsize,
    pub exited: AtomicUsize,
}

impl ThreadLifecycleListener for CountingLifecycle {
    fn on_thread_start(&self, _name: &str) {
        self.started.fetch_add(1, Ordering::AcqRel);
    }

    fn on_thread_exit(&self, _name: &str) {
        self.exited.fetch_add(1, Ordering::AcqRel);
    }
}

/// Scheduler over the recording handlers with the given pool sizes.
pub fn build_scheduler(
    partition_threads: usize,
    generic_threads: usize,
    handler: &Arc<RecordingOperationHandler>,
    responses: &Arc<RecordingResponseHandler>,
) -> OperationScheduler {
    Builder::new(
        handler.clone(),
        responses.clone(),
        Arc::new(NoExecutors),
    )
    .partition_threads(partition_threads)
    .generic_threads(generic_threads)
    .build()
}

/// Call-id payload of a test packet.
pub fn call_payload(call_id: u64) -> Vec<u8> {
    call_id.to_be_bytes().to_vec()
}
