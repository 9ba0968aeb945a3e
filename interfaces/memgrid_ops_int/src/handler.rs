use crate::error::Error;
use crate::task::{Operation, Packet, Response, Runnable};
use std::any::Any;
use std::sync::Arc;

/// Deserializes inbound packets and executes operations.
///
/// Both calls happen synchronously on a worker thread of the scheduler.
/// `process` may fail or panic; it must eventually return and must not block
/// on the network.
pub trait OperationHandler: Send + Sync {
    /// Turns a packet into an operation.
    ///
    /// Returning `Ok(None)` instructs the worker to drop the packet.
    fn deserialize(&self, packet: Packet) -> Result<Option<Operation>, Error>;

    /// Executes an operation and publishes its response.
    fn process(&self, operation: Operation) -> Result<(), Error>;
}

/// Applies inbound response packets to the pending-invocation registry.
pub trait ResponseHandler: Send + Sync {
    /// Turns a response packet into a response.
    fn deserialize(&self, packet: Packet) -> Result<Response, Error>;

    /// Completes the pending invocation the response belongs to.
    fn process(&self, response: Response) -> Result<(), Error>;
}

/// A generic work pool for operations that opt out of the partition model.
pub trait Executor: Send + Sync {
    /// Hands a task to the pool.
    fn execute(&self, task: Runnable);
}

/// Lookup from executor name to an external work pool.
pub trait ExecutionService: Send + Sync {
    /// Resolves the executor registered under `name`.
    fn executor(&self, name: &str) -> Option<Arc<dyn Executor>>;
}

/// Inspects panic payloads before they are logged.
///
/// The node installs a process-wide inspector that classifies faults (e.g.
/// native-memory exhaustion) ahead of the generic fault log line.
pub trait PanicInspector: Send + Sync {
    /// Called with the payload of a caught panic.
    fn inspect(&self, payload: &(dyn Any + Send));
}

/// Inspector that does nothing.
#[derive(Debug, Default)]
pub struct NoopPanicInspector;

impl PanicInspector for NoopPanicInspector {
    fn inspect(&self, _payload: &(dyn Any + Send)) {}
}

/// Hooks invoked at the boundaries of every scheduler thread.
pub trait ThreadLifecycleListener: Send + Sync {
    /// Called on the new thread before it starts taking work.
    fn on_thread_start(&self, _name: &str) {}

    /// Called on the thread right before it exits.
    fn on_thread_exit(&self, _name: &str) {}
}

/// Lifecycle listener that does nothing.
#[derive(Debug, Default)]
pub struct NoopLifecycleListener;

impl ThreadLifecycleListener for NoopLifecycleListener {}
