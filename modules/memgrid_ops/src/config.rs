use crate::queue::RejectionPolicy;
use crate::scheduler::OperationScheduler;
use memgrid_ops_int::{
    ExecutionService, NoopLifecycleListener, NoopPanicInspector, OperationHandler,
    PanicInspector, ResponseHandler, ThreadLifecycleListener,
};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// Resolved scheduler settings.
#[derive(Debug, Clone)]
pub(crate) struct Options {
    pub partition_threads: usize,
    pub generic_threads: usize,
    pub termination_timeout: Duration,
    pub thread_name_prefix: String,
    pub queue_capacity: Option<usize>,
    pub rejection_policy: RejectionPolicy,
}

/// A builder for an [`OperationScheduler`].
///
/// The three collaborators are mandatory; everything else defaults to the
/// values below. Worker threads are spawned by [`build`](Builder::build).
pub struct Builder {
    operation_handler: Arc<dyn OperationHandler>,
    response_handler: Arc<dyn ResponseHandler>,
    execution_service: Arc<dyn ExecutionService>,
    inspector: Arc<dyn PanicInspector>,
    lifecycle: Arc<dyn ThreadLifecycleListener>,
    partition_threads: usize,
    generic_threads: usize,
    termination_timeout: Duration,
    thread_name_prefix: String,
    queue_capacity: Option<usize>,
    rejection_policy: RejectionPolicy,
}

impl Builder {
    /// Default per-thread join deadline on shutdown.
    pub const DEFAULT_TERMINATION_TIMEOUT: Duration = Duration::from_secs(3);

    /// Default prefix of the worker thread names.
    pub const DEFAULT_THREAD_NAME_PREFIX: &'static str = "memgrid";

    /// Default number of partition workers: one per core, at least two.
    pub fn default_partition_thread_count() -> usize {
        num_cpus::get().max(2)
    }

    /// Default number of generic workers: half the cores, at least two.
    pub fn default_generic_thread_count() -> usize {
        (num_cpus::get() / 2).max(2)
    }

    /// Creates a new builder with the default settings.
    pub fn new(
        operation_handler: Arc<dyn OperationHandler>,
        response_handler: Arc<dyn ResponseHandler>,
        execution_service: Arc<dyn ExecutionService>,
    ) -> Self {
        Self {
            operation_handler,
            response_handler,
            execution_service,
            inspector: Arc::new(NoopPanicInspector),
            lifecycle: Arc::new(NoopLifecycleListener),
            partition_threads: 0,
            generic_threads: 0,
            termination_timeout: Self::DEFAULT_TERMINATION_TIMEOUT,
            thread_name_prefix: Self::DEFAULT_THREAD_NAME_PREFIX.into(),
            queue_capacity: None,
            rejection_policy: RejectionPolicy::default(),
        }
    }

    /// Changes the number of partition workers. `0` selects the default.
    #[inline]
    pub fn partition_threads(mut self, count: usize) -> Self {
        self.partition_threads = count;
        self
    }

    /// Changes the number of generic workers. `0` selects the default.
    #[inline]
    pub fn generic_threads(mut self, count: usize) -> Self {
        self.generic_threads = count;
        self
    }

    /// Changes the per-thread join deadline used on shutdown.
    #[inline]
    pub fn termination_timeout(mut self, timeout: Duration) -> Self {
        self.termination_timeout = timeout;
        self
    }

    /// Changes the prefix of the worker thread names.
    #[inline]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Bounds the operation work queues. `None` keeps them unbounded.
    ///
    /// The priority channel and the response queue are never bounded: urgent
    /// tasks and responses must not be refused.
    #[inline]
    pub fn queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Changes what a full bounded queue does to a non-urgent submission.
    #[inline]
    pub fn rejection_policy(mut self, policy: RejectionPolicy) -> Self {
        self.rejection_policy = policy;
        self
    }

    /// Installs a panic inspector consulted before faults are logged.
    #[inline]
    pub fn panic_inspector(mut self, inspector: Arc<dyn PanicInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Installs a listener for worker thread start and exit.
    #[inline]
    pub fn lifecycle_listener(mut self, listener: Arc<dyn ThreadLifecycleListener>) -> Self {
        self.lifecycle = listener;
        self
    }

    /// Builds the scheduler, spawning all worker threads.
    pub fn build(self) -> OperationScheduler {
        let options = Options {
            partition_threads: match self.partition_threads {
                0 => Self::default_partition_thread_count(),
                count => count,
            },
            generic_threads: match self.generic_threads {
                0 => Self::default_generic_thread_count(),
                count => count,
            },
            termination_timeout: self.termination_timeout,
            thread_name_prefix: self.thread_name_prefix,
            queue_capacity: self.queue_capacity,
            rejection_policy: self.rejection_policy,
        };
        OperationScheduler::new(
            self.operation_handler,
            self.response_handler,
            self.execution_service,
            self.inspector,
            self.lifecycle,
            options,
        )
    }
}

impl Debug for Builder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("partition_threads", &self.partition_threads)
            .field("generic_threads", &self.generic_threads)
            .field("termination_timeout", &self.termination_timeout)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("queue_capacity", &self.queue_capacity)
            .field("rejection_policy", &self.rejection_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_count_defaults_are_at_least_two() {
        assert!(Builder::default_partition_thread_count() >= 2);
        assert!(Builder::default_generic_thread_count() >= 2);
    }

    #[test]
    fn partition_default_covers_all_cores() {
        assert!(Builder::default_partition_thread_count() >= num_cpus::get());
    }
}
