use std::cell::Cell;

/// Role of the current thread with respect to the scheduler.
///
/// Worker threads tag themselves at startup; the transport tags its I/O
/// threads through [`mark_io_thread`]. Every other thread reads as
/// [`ThreadRole::User`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ThreadRole {
    /// A thread unknown to the scheduler.
    User,
    /// A network I/O thread; must never execute user operations.
    Io,
    /// A partition worker with the given thread index.
    Partition(usize),
    /// A worker of the generic pool.
    Generic,
    /// The response worker.
    Response,
}

thread_local! {
    static CURRENT_ROLE: Cell<ThreadRole> = const { Cell::new(ThreadRole::User) };
}

pub(crate) fn set_current_role(role: ThreadRole) {
    CURRENT_ROLE.set(role);
}

/// Role of the current thread.
pub fn current_role() -> ThreadRole {
    CURRENT_ROLE.get()
}

/// Tags the current thread as a network I/O thread.
///
/// The transport calls this at the start of every thread it dedicates to
/// socket I/O, so that the role predicates refuse to run or invoke
/// operations on it.
pub fn mark_io_thread() {
    CURRENT_ROLE.set(ThreadRole::Io);
}
