//! Per-actor serial execution lane.
//!
//! One unbounded FIFO, one worker task. At most one item executes at a time;
//! suspension inside an item keeps the lane bound to it. The `ask` family
//! applies the reentrancy rule: a caller that is already executing on this
//! mailbox under the same call chain runs the work inline on its own stack,
//! because queueing it would deadlock the chain against itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::context::{next_chain_id, CallContext};
use crate::limit::CallGuard;
use crate::metrics::RuntimeMetrics;
use crate::types::ActorId;
use crate::work::{Deadline, WorkItem};

#[derive(Clone)]
pub struct Mailbox {
    actor_id: ActorId,
    tx: mpsc::UnboundedSender<WorkItem>,
    /// Chain id of the item presently executing, 0 between items.
    current_chain_id: Arc<AtomicU64>,
    /// Items enqueued but not yet picked up by the worker.
    pending: Arc<AtomicU64>,
    metrics: Arc<RuntimeMetrics>,
    guard: CallGuard,
}

impl Mailbox {
    /// Creates the mailbox and spawns its worker.
    pub fn spawn(actor_id: ActorId, metrics: Arc<RuntimeMetrics>, guard: CallGuard) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let current_chain_id = Arc::new(AtomicU64::new(0));
        let pending = Arc::new(AtomicU64::new(0));
        tokio::spawn(run_worker(
            actor_id,
            rx,
            Arc::clone(&current_chain_id),
            Arc::clone(&pending),
            Arc::clone(&metrics),
        ));
        Mailbox {
            actor_id,
            tx,
            current_chain_id,
            pending,
            metrics,
            guard,
        }
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    pub fn current_chain_id(&self) -> u64 {
        self.current_chain_id.load(Ordering::Acquire)
    }

    /// Enqueued-but-not-started item count.
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Fire-and-forget under a fresh chain.
    pub fn tell<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.tell_with(f, Deadline::Default)
    }

    pub fn tell_with<F>(&self, f: F, deadline: Deadline)
    where
        F: FnOnce() + Send + 'static,
    {
        let item = WorkItem::sync_void(
            next_chain_id(),
            self.actor_id,
            deadline,
            Arc::clone(&self.metrics),
            f,
        );
        self.enqueue(item);
    }

    pub fn tell_async<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tell_async_with(f, Deadline::Default)
    }

    pub fn tell_async_with<F, Fut>(&self, f: F, deadline: Deadline)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let item = WorkItem::async_void(
            next_chain_id(),
            self.actor_id,
            deadline,
            Arc::clone(&self.metrics),
            f,
        );
        self.enqueue(item);
    }

    /// Request/response with the reentrancy rule.
    pub async fn ask<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Default + Send + 'static,
    {
        self.ask_inner(f, Deadline::Default, true).await
    }

    pub async fn ask_with<F, R>(&self, f: F, deadline: Deadline) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Default + Send + 'static,
    {
        self.ask_inner(f, deadline, true).await
    }

    pub async fn ask_async<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Default + Send + 'static,
    {
        self.ask_async_inner(f, Deadline::Default, true).await
    }

    pub async fn ask_async_with<F, Fut, R>(&self, f: F, deadline: Deadline) -> R
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Default + Send + 'static,
    {
        self.ask_async_inner(f, deadline, true).await
    }

    /// `ask` minus the call-permission check. Internal lifecycle paths
    /// (component activation in particular) use this: they run on behalf of
    /// the runtime, not game code.
    pub(crate) async fn ask_unchecked<F, Fut, R>(&self, f: F, deadline: Deadline) -> R
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Default + Send + 'static,
    {
        self.ask_async_inner(f, deadline, false).await
    }

    async fn ask_inner<F, R>(&self, f: F, deadline: Deadline, check_guard: bool) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Default + Send + 'static,
    {
        let ctx = CallContext::current();
        if self.owns_current_chain(ctx) {
            self.metrics.record_inline_reentry();
            return CallContext::new(ctx.chain_id, self.actor_id).sync_scope(f);
        }
        if check_guard && !self.guard.allow(ctx, self.actor_id) {
            self.metrics.guard_denials.fetch_add(1, Ordering::Relaxed);
            return R::default();
        }
        let (item, completion) = WorkItem::sync_value(
            chain_for(ctx),
            self.actor_id,
            deadline,
            Arc::clone(&self.metrics),
            f,
        );
        self.enqueue(item);
        completion.wait().await
    }

    async fn ask_async_inner<F, Fut, R>(&self, f: F, deadline: Deadline, check_guard: bool) -> R
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Default + Send + 'static,
    {
        let ctx = CallContext::current();
        if self.owns_current_chain(ctx) {
            self.metrics.record_inline_reentry();
            return CallContext::new(ctx.chain_id, self.actor_id)
                .scope(async move { f().await })
                .await;
        }
        if check_guard && !self.guard.allow(ctx, self.actor_id) {
            self.metrics.guard_denials.fetch_add(1, Ordering::Relaxed);
            return R::default();
        }
        let (item, completion) = WorkItem::async_value(
            chain_for(ctx),
            self.actor_id,
            deadline,
            Arc::clone(&self.metrics),
            f,
        );
        self.enqueue(item);
        completion.wait().await
    }

    /// The caller is already executing on this mailbox under the same chain,
    /// so synchronous reentry is safe. Only the worker writes
    /// `current_chain_id`, and while the caller's item is in flight the
    /// worker is parked on it, so the comparison cannot race for the case
    /// that matters.
    fn owns_current_chain(&self, ctx: CallContext) -> bool {
        ctx.has_chain() && ctx.chain_id == self.current_chain_id()
    }

    fn enqueue(&self, item: WorkItem) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(item).is_err() {
            // The dropped item releases its promise; askers get the default.
            self.pending.fetch_sub(1, Ordering::AcqRel);
            warn!(actor_id = %self.actor_id, "mailbox closed, dropping work item");
        }
    }
}

fn chain_for(ctx: CallContext) -> u64 {
    if ctx.has_chain() {
        ctx.chain_id
    } else {
        next_chain_id()
    }
}

async fn run_worker(
    actor_id: ActorId,
    mut rx: mpsc::UnboundedReceiver<WorkItem>,
    current_chain_id: Arc<AtomicU64>,
    pending: Arc<AtomicU64>,
    metrics: Arc<RuntimeMetrics>,
) {
    while let Some(mut item) = rx.recv().await {
        pending.fetch_sub(1, Ordering::AcqRel);
        current_chain_id.store(item.chain_id, Ordering::Release);

        let ctx = CallContext::new(item.chain_id, item.actor_id);
        let trace = item.trace;
        let deadline = item.deadline;
        let canceller = item.take_canceller();
        let mut fut = Box::pin(ctx.scope(item.payload.into_future()));

        match deadline {
            None => fut.await,
            Some(limit) => {
                if tokio::time::timeout(limit, &mut fut).await.is_err() {
                    metrics.record_deadline_hit();
                    error!(
                        actor_id = %actor_id,
                        item = trace,
                        deadline_ms = limit.as_millis() as u64,
                        "work item exceeded deadline; promise released, thunk left running detached"
                    );
                    if let Some(cancel) = canceller {
                        cancel();
                    }
                    // Deliberately not cancelled: forcing cancellation across
                    // arbitrary async code is unsafe. The lane moves on.
                    tokio::spawn(fut);
                }
            }
        }

        metrics.record_item_executed();
        current_chain_id.store(0, Ordering::Release);
    }
    debug!(actor_id = %actor_id, "mailbox worker stopped");
}
