//! Queued units of work.
//!
//! A work item is one thunk of one of four shapes (sync/async × void/value)
//! plus a completion promise. The promise completes exactly once: by the
//! thunk finishing, by the panic path (default value), or by the mailbox's
//! force-complete on deadline. Value-shaped items therefore keep the oneshot
//! sender in a shared take-once slot that both the runner and the canceller
//! can reach.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{error, warn};

use crate::metrics::RuntimeMetrics;
use crate::types::ActorId;

/// Default per-item deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(13);

/// Execution budget for a work item.
///
/// Lifecycle operations (save, deactivate, cross-day) run with
/// [`Deadline::Infinite`]: truncating them would corrupt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deadline {
    #[default]
    Default,
    Infinite,
    After(Duration),
}

impl Deadline {
    pub(crate) fn duration(self) -> Option<Duration> {
        match self {
            Deadline::Default => Some(DEFAULT_DEADLINE),
            Deadline::Infinite => None,
            Deadline::After(d) => Some(d),
        }
    }
}

type Thunk = Box<dyn FnOnce() + Send>;
type AsyncThunk = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// The four payload shapes. Value shapes have their promise captured inside
/// the thunk; the mailbox dispatches once on the tag.
pub(crate) enum WorkPayload {
    SyncVoid(Thunk),
    SyncValue(Thunk),
    AsyncVoid(AsyncThunk),
    AsyncValue(AsyncThunk),
}

impl WorkPayload {
    /// Erases the sync/async split for the worker loop.
    pub(crate) fn into_future(self) -> BoxFuture<'static, ()> {
        match self {
            WorkPayload::SyncVoid(f) | WorkPayload::SyncValue(f) => {
                Box::pin(async move { f() })
            }
            WorkPayload::AsyncVoid(f) | WorkPayload::AsyncValue(f) => f(),
        }
    }
}

type PromiseSlot<R> = Arc<Mutex<Option<oneshot::Sender<R>>>>;

fn complete<R>(slot: &PromiseSlot<R>, value: R) {
    if let Some(tx) = slot.lock().take() {
        // The receiver may be gone (caller stopped waiting); that is fine.
        let _ = tx.send(value);
    }
}

/// Receiving end of a work item's promise.
pub(crate) struct Completion<R> {
    rx: oneshot::Receiver<R>,
    trace: &'static str,
}

impl<R: Default> Completion<R> {
    /// Resolves to the thunk's value, or the default if the promise was
    /// dropped without completing (mailbox torn down mid-flight).
    pub(crate) async fn wait(self) -> R {
        match self.rx.await {
            Ok(v) => v,
            Err(_) => {
                warn!(item = self.trace, "work item promise dropped, returning default");
                R::default()
            }
        }
    }
}

/// One queued unit of work.
pub(crate) struct WorkItem {
    pub(crate) chain_id: u64,
    pub(crate) actor_id: ActorId,
    pub(crate) deadline: Option<Duration>,
    /// Identifies the thunk in deadline logs.
    pub(crate) trace: &'static str,
    pub(crate) payload: WorkPayload,
    /// Completes the promise with the default value. Only the mailbox's
    /// timeout path calls this.
    canceller: Option<Thunk>,
}

impl WorkItem {
    pub(crate) fn sync_void<F>(
        chain_id: u64,
        actor_id: ActorId,
        deadline: Deadline,
        metrics: Arc<RuntimeMetrics>,
        f: F,
    ) -> WorkItem
    where
        F: FnOnce() + Send + 'static,
    {
        let trace = std::any::type_name::<F>();
        let payload = WorkPayload::SyncVoid(Box::new(move || {
            if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
                metrics.record_thunk_panic();
                error!(item = trace, actor_id = %actor_id, "work item panicked");
            }
        }));
        WorkItem {
            chain_id,
            actor_id,
            deadline: deadline.duration(),
            trace,
            payload,
            canceller: None,
        }
    }

    pub(crate) fn sync_value<F, R>(
        chain_id: u64,
        actor_id: ActorId,
        deadline: Deadline,
        metrics: Arc<RuntimeMetrics>,
        f: F,
    ) -> (WorkItem, Completion<R>)
    where
        F: FnOnce() -> R + Send + 'static,
        R: Default + Send + 'static,
    {
        let trace = std::any::type_name::<F>();
        let (tx, rx) = oneshot::channel();
        let slot: PromiseSlot<R> = Arc::new(Mutex::new(Some(tx)));
        let run_slot = Arc::clone(&slot);
        let payload = WorkPayload::SyncValue(Box::new(move || {
            match std::panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(v) => complete(&run_slot, v),
                Err(_) => {
                    metrics.record_thunk_panic();
                    error!(item = trace, actor_id = %actor_id, "work item panicked");
                    complete(&run_slot, R::default());
                }
            }
        }));
        let item = WorkItem {
            chain_id,
            actor_id,
            deadline: deadline.duration(),
            trace,
            payload,
            canceller: Some(Box::new(move || complete(&slot, R::default()))),
        };
        (item, Completion { rx, trace })
    }

    pub(crate) fn async_void<F, Fut>(
        chain_id: u64,
        actor_id: ActorId,
        deadline: Deadline,
        metrics: Arc<RuntimeMetrics>,
        f: F,
    ) -> WorkItem
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let trace = std::any::type_name::<F>();
        let payload = WorkPayload::AsyncVoid(Box::new(move || {
            Box::pin(async move {
                let run = AssertUnwindSafe(async move { f().await }).catch_unwind();
                if run.await.is_err() {
                    metrics.record_thunk_panic();
                    error!(item = trace, actor_id = %actor_id, "work item panicked");
                }
            })
        }));
        WorkItem {
            chain_id,
            actor_id,
            deadline: deadline.duration(),
            trace,
            payload,
            canceller: None,
        }
    }

    pub(crate) fn async_value<F, Fut, R>(
        chain_id: u64,
        actor_id: ActorId,
        deadline: Deadline,
        metrics: Arc<RuntimeMetrics>,
        f: F,
    ) -> (WorkItem, Completion<R>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Default + Send + 'static,
    {
        let trace = std::any::type_name::<F>();
        let (tx, rx) = oneshot::channel();
        let slot: PromiseSlot<R> = Arc::new(Mutex::new(Some(tx)));
        let run_slot = Arc::clone(&slot);
        let payload = WorkPayload::AsyncValue(Box::new(move || {
            Box::pin(async move {
                let run = AssertUnwindSafe(async move { f().await }).catch_unwind();
                match run.await {
                    Ok(v) => complete(&run_slot, v),
                    Err(_) => {
                        metrics.record_thunk_panic();
                        error!(item = trace, actor_id = %actor_id, "work item panicked");
                        complete(&run_slot, R::default());
                    }
                }
            })
        }));
        let item = WorkItem {
            chain_id,
            actor_id,
            deadline: deadline.duration(),
            trace,
            payload,
            canceller: Some(Box::new(move || complete(&slot, R::default()))),
        };
        (item, Completion { rx, trace })
    }

    /// Completes the promise with the default value, leaving the thunk to
    /// finish (or not) on its own. Void items have nothing to release.
    pub(crate) fn take_canceller(&mut self) -> Option<Thunk> {
        self.canceller.take()
    }
}
