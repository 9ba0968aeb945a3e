use bitflags::bitflags;
use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;

/// Identifier of a data partition.
///
/// Negative values mean that a task is not bound to any partition and may be
/// served by the generic worker pool.
pub type PartitionId = i32;

/// Partition id of tasks that are not partition-aware.
pub const GENERIC_PARTITION_ID: PartitionId = -1;

/// Address of the cluster member an operation originates from.
pub type Address = SocketAddr;

/// Id of a pending invocation.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Hash, Ord, PartialOrd, PartialEq, Eq)]
pub struct CallId(
    /// The raw invocation id.
    pub u64,
);

impl Display for CallId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// An opaque zero-argument action.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

bitflags! {
    /// Header flags of a [`Packet`].
    ///
    /// The bit positions are owned by the transport layer; only the flags
    /// the scheduler routes on are mirrored here.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PacketFlags: u16 {
        /// The packet carries a response to a pending invocation.
        const RESPONSE = 1 << 1;
        /// The packet must bypass non-urgent queued work.
        const URGENT = 1 << 4;
    }
}

/// A serialized envelope delivered by the transport, destined for this node.
///
/// The payload is opaque to the scheduler; the operation handler turns it
/// into an [`Operation`] on the worker thread that will run it.
#[derive(Debug, Clone)]
pub struct Packet {
    flags: PacketFlags,
    partition_id: PartitionId,
    payload: Box<[u8]>,
}

impl Packet {
    /// Creates a new packet.
    pub fn new(flags: PacketFlags, partition_id: PartitionId, payload: impl Into<Box<[u8]>>) -> Self {
        Self {
            flags,
            partition_id,
            payload: payload.into(),
        }
    }

    /// Header flags of the packet.
    #[inline]
    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    /// Partition the packet is destined for.
    #[inline]
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Whether the packet carries a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.flags.contains(PacketFlags::RESPONSE)
    }

    /// Whether the packet must bypass non-urgent queued work.
    #[inline]
    pub fn is_urgent(&self) -> bool {
        self.flags.contains(PacketFlags::URGENT)
    }

    /// Serialized payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the packet, returning its payload.
    #[inline]
    pub fn into_payload(self) -> Box<[u8]> {
        self.payload
    }
}

/// An already-constructed in-process operation.
///
/// The scheduler only reads the routing metadata; execution is delegated to
/// the [`OperationHandler`](crate::OperationHandler). The optional payload is
/// carried through untouched for the handler's use.
pub struct Operation {
    partition_id: PartitionId,
    call_id: CallId,
    caller: Address,
    urgent: bool,
    executor_name: Option<Box<str>>,
    payload: Option<Box<dyn Any + Send>>,
}

impl Operation {
    /// Creates a new generic, non-urgent operation.
    pub fn new(caller: Address, call_id: CallId) -> Self {
        Self {
            partition_id: GENERIC_PARTITION_ID,
            call_id,
            caller,
            urgent: false,
            executor_name: None,
            payload: None,
        }
    }

    /// Binds the operation to a partition.
    #[inline]
    pub fn with_partition(mut self, partition_id: PartitionId) -> Self {
        self.partition_id = partition_id;
        self
    }

    /// Marks the operation as urgent.
    #[inline]
    pub fn with_urgency(mut self, urgent: bool) -> Self {
        self.urgent = urgent;
        self
    }

    /// Requests execution on the named external executor.
    #[inline]
    pub fn with_executor(mut self, name: impl Into<Box<str>>) -> Self {
        self.executor_name = Some(name.into());
        self
    }

    /// Attaches an opaque payload for the operation handler.
    #[inline]
    pub fn with_payload(mut self, payload: Box<dyn Any + Send>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Partition the operation is bound to, [`GENERIC_PARTITION_ID`] if none.
    #[inline]
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Id of the invocation this operation belongs to.
    #[inline]
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Address of the submitting member.
    #[inline]
    pub fn caller(&self) -> &Address {
        &self.caller
    }

    /// Whether the operation bypasses non-urgent queued work.
    #[inline]
    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    /// Whether the operation must be serialized with its partition.
    #[inline]
    pub fn is_partition_aware(&self) -> bool {
        self.partition_id >= 0
    }

    /// Name of the external executor the operation opted into, if any.
    #[inline]
    pub fn executor_name(&self) -> Option<&str> {
        self.executor_name.as_deref()
    }

    /// Opaque payload attached at construction.
    #[inline]
    pub fn payload(&self) -> Option<&(dyn Any + Send)> {
        self.payload.as_deref()
    }

    /// Removes and returns the attached payload.
    #[inline]
    pub fn take_payload(&mut self) -> Option<Box<dyn Any + Send>> {
        self.payload.take()
    }

    /// Descriptor published while the operation executes.
    #[inline]
    pub fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor {
            caller: self.caller,
            partition_id: self.partition_id,
            call_id: self.call_id,
        }
    }
}

impl Debug for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("partition_id", &self.partition_id)
            .field("call_id", &self.call_id)
            .field("caller", &self.caller)
            .field("urgent", &self.urgent)
            .field("executor_name", &self.executor_name)
            .finish_non_exhaustive()
    }
}

/// Identity of a currently executing operation.
///
/// A match requires all three fields to be equal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    caller: Address,
    partition_id: PartitionId,
    call_id: CallId,
}

impl OperationDescriptor {
    /// Creates a descriptor from its parts.
    pub fn new(caller: Address, partition_id: PartitionId, call_id: CallId) -> Self {
        Self {
            caller,
            partition_id,
            call_id,
        }
    }

    /// Address of the submitting member.
    #[inline]
    pub fn caller(&self) -> &Address {
        &self.caller
    }

    /// Partition of the operation.
    #[inline]
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Invocation id of the operation.
    #[inline]
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Whether the descriptor matches the given identity.
    #[inline]
    pub fn matches(&self, caller: &Address, partition_id: PartitionId, call_id: CallId) -> bool {
        self.caller == *caller && self.partition_id == partition_id && self.call_id == call_id
    }
}

/// A response to a pending invocation, produced by the response handler.
#[derive(Debug)]
pub struct Response {
    call_id: CallId,
    urgent: bool,
    payload: Box<[u8]>,
}

impl Response {
    /// Creates a new response.
    pub fn new(call_id: CallId, urgent: bool, payload: impl Into<Box<[u8]>>) -> Self {
        Self {
            call_id,
            urgent,
            payload: payload.into(),
        }
    }

    /// Invocation the response belongs to.
    #[inline]
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Whether the response was flagged urgent on the wire.
    #[inline]
    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    /// Serialized response value.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

static_assertions::assert_impl_all!(Operation: Send);
static_assertions::assert_impl_all!(Packet: Send, Sync);
static_assertions::assert_impl_all!(OperationDescriptor: Send, Sync, Copy);

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        "127.0.0.1:5701".parse().unwrap()
    }

    #[test]
    fn operation_defaults_to_generic() {
        let op = Operation::new(addr(), CallId(1));
        assert!(!op.is_partition_aware());
        assert!(!op.is_urgent());
        assert_eq!(op.partition_id(), GENERIC_PARTITION_ID);
    }

    #[test]
    fn descriptor_matches_all_three_fields() {
        let op = Operation::new(addr(), CallId(7)).with_partition(3);
        let d = op.descriptor();
        assert!(d.matches(&addr(), 3, CallId(7)));
        assert!(!d.matches(&addr(), 4, CallId(7)));
        assert!(!d.matches(&addr(), 3, CallId(8)));
        assert!(!d.matches(&"127.0.0.2:5701".parse().unwrap(), 3, CallId(7)));
    }

    #[test]
    fn packet_flags_roundtrip() {
        let p = Packet::new(PacketFlags::RESPONSE | PacketFlags::URGENT, 9, vec![1, 2, 3]);
        assert!(p.is_response());
        assert!(p.is_urgent());
        assert_eq!(p.partition_id(), 9);
        assert_eq!(p.payload(), &[1, 2, 3]);
    }
}
