//! Operation scheduler of a memgrid node.
//!
//! The scheduler routes locally submitted operations and deserialized
//! transport packets to a fixed set of long-lived worker threads:
//!
//! - partition workers, each owning a private work queue and serving the
//!   partitions mapped to it by `partition_id mod P`,
//! - generic workers competing on one shared queue pair,
//! - a single response worker applying inbound response packets.
//!
//! Urgent tasks travel on a second, non-blocking priority queue per queue
//! pair and overtake everything enqueued after them; a wakeup sentinel on the
//! blocking queue guarantees that a sleeping worker observes them.
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links
)]

mod config;
mod policy;
mod queue;
mod response;
mod scheduler;
mod worker;

pub use config::Builder;
pub use policy::{current_role, mark_io_thread, ThreadRole};
pub use queue::RejectionPolicy;
pub use scheduler::{OperationScheduler, SchedulerStats};
