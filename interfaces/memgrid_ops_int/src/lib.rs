//! Core types and collaborator interfaces of the memgrid operation scheduler.
//!
//! The scheduler implementation lives in the `memgrid_ops` crate; this crate
//! owns the data model shared with its collaborators: the task variants that
//! can be submitted, the handler traits the scheduler calls out to, and the
//! error type surfaced to submitters.
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links
)]

mod error;
mod handler;
mod task;

pub use error::{Error, ErrorKind};
pub use handler::{
    ExecutionService, Executor, NoopLifecycleListener, NoopPanicInspector, OperationHandler,
    PanicInspector, ResponseHandler, ThreadLifecycleListener,
};
pub use task::{
    Address, CallId, Operation, OperationDescriptor, Packet, PacketFlags, PartitionId, Response,
    Runnable, GENERIC_PARTITION_ID,
};
