use crate::policy::{self, ThreadRole};
use crate::worker::{join_with_deadline, panic_message};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, trace};
use memgrid_ops_int::{
    Error, ErrorKind, Packet, PanicInspector, ResponseHandler, ThreadLifecycleListener,
};
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

enum ResponseItem {
    Packet(Packet),
    Wakeup,
}

/// The single consumer of inbound response packets.
///
/// Mirrors the operation workers minus the priority channel. Every failure,
/// deserialization or application, is logged and swallowed: one malformed
/// response must not stall the queue behind it.
pub(crate) struct ResponseWorker {
    tx: Sender<ResponseItem>,
    rx: Receiver<ResponseItem>,
    sentinels: Arc<AtomicUsize>,
    accepted: AtomicU64,
    abandoned: Arc<AtomicUsize>,
    processed: Arc<AtomicU64>,
    thread: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

impl ResponseWorker {
    pub fn spawn(
        name: String,
        handler: Arc<dyn ResponseHandler>,
        inspector: Arc<dyn PanicInspector>,
        lifecycle: Arc<dyn ThreadLifecycleListener>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sentinels = Arc::new(AtomicUsize::new(0));
        let abandoned = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicU64::new(0));

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn({
                let rx = rx.clone();
                let sentinels = Arc::clone(&sentinels);
                let abandoned = Arc::clone(&abandoned);
                let processed = Arc::clone(&processed);
                let name = name.clone();
                move || {
                    response_main(
                        &name, &rx, &sentinels, &abandoned, &processed, &handler, &inspector,
                        &lifecycle, &shutdown,
                    )
                }
            })
            .expect("could not spawn response worker thread");

        Self {
            tx,
            rx,
            sentinels,
            accepted: AtomicU64::new(0),
            abandoned,
            processed,
            thread: Mutex::new(Some(thread)),
            name,
        }
    }

    /// Enqueues a response packet.
    pub fn push(&self, packet: Packet) -> Result<(), Error> {
        self.tx
            .send(ResponseItem::Packet(packet))
            .map_err(|_| Error::new(ErrorKind::Rejected, "response queue is disconnected"))?;
        self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Unblocks the worker so it can observe shutdown.
    pub fn wake(&self) {
        if self.tx.try_send(ResponseItem::Wakeup).is_ok() {
            self.sentinels.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of queued response packets, sentinels excluded.
    pub fn queue_size(&self) -> usize {
        self.tx
            .len()
            .saturating_sub(self.sentinels.load(Ordering::Relaxed))
    }

    /// Number of response packets the queue has accepted so far.
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Number of response packets taken but never applied because of shutdown.
    pub fn abandoned_count(&self) -> usize {
        self.abandoned.load(Ordering::Relaxed)
    }

    /// Number of responses the worker has applied.
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Joins the worker, abandoning it when the deadline elapses.
    pub fn join_timeout(&self, timeout: Duration) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            join_with_deadline(&self.name, handle, timeout);
        }
    }
}

impl Debug for ResponseWorker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWorker")
            .field("name", &self.name)
            .field("queue_size", &self.queue_size())
            .field("processed", &self.processed_count())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::too_many_arguments)]
fn response_main(
    name: &str,
    rx: &Receiver<ResponseItem>,
    sentinels: &AtomicUsize,
    abandoned: &AtomicUsize,
    processed: &AtomicU64,
    handler: &Arc<dyn ResponseHandler>,
    inspector: &Arc<dyn PanicInspector>,
    lifecycle: &Arc<dyn ThreadLifecycleListener>,
    shutdown: &AtomicBool,
) {
    policy::set_current_role(ThreadRole::Response);
    lifecycle.on_thread_start(name);
    info!("started response worker {name}");

    loop {
        let item = match rx.recv() {
            Ok(item) => item,
            Err(_) => {
                debug!("response queue of {name} disconnected");
                break;
            }
        };
        if shutdown.load(Ordering::Acquire) {
            match item {
                ResponseItem::Wakeup => {
                    sentinels.fetch_sub(1, Ordering::Relaxed);
                }
                ResponseItem::Packet(packet) => {
                    trace!("{name} observed shutdown, abandoning {packet:?}");
                    abandoned.fetch_add(1, Ordering::Relaxed);
                }
            }
            break;
        }

        let packet = match item {
            ResponseItem::Packet(packet) => packet,
            ResponseItem::Wakeup => {
                sentinels.fetch_sub(1, Ordering::Relaxed);
                continue;
            }
        };

        processed.fetch_add(1, Ordering::Release);
        let applied = panic::catch_unwind(AssertUnwindSafe(|| {
            let response = handler.deserialize(packet)?;
            handler.process(response)
        }));
        match applied {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("failed to apply response: {e}"),
            Err(payload) => {
                inspector.inspect(&*payload);
                error!("response handler panicked: {}", panic_message(&*payload));
            }
        }
    }

    info!("stopping response worker {name}");
    lifecycle.on_thread_exit(name);
}
