//! Call-chain context propagation.
//!
//! Every logical call carries a `(chain_id, actor_id)` pair across its await
//! points. The pair is logical-call-local, not thread-local: it rides a tokio
//! task-local slot, so a continuation resumed on another worker thread still
//! observes the chain it was dispatched with. Mailboxes install the context
//! on entry to each work item and for each inline reentrant call; code that
//! runs outside any mailbox observes the zero context.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::ActorId;

tokio::task_local! {
    static CALL_CONTEXT: CallContext;
}

/// The identity of the logical call currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// 0 means "no active chain": the call originates outside any actor.
    pub chain_id: u64,
    /// The actor whose mailbox installed this context.
    pub actor_id: Option<ActorId>,
}

impl Default for CallContext {
    fn default() -> Self {
        CallContext::NONE
    }
}

impl CallContext {
    pub const NONE: CallContext = CallContext {
        chain_id: 0,
        actor_id: None,
    };

    pub fn new(chain_id: u64, actor_id: ActorId) -> Self {
        CallContext {
            chain_id,
            actor_id: Some(actor_id),
        }
    }

    /// The context of the caller, or [`CallContext::NONE`] outside any scope.
    pub fn current() -> CallContext {
        CALL_CONTEXT.try_with(|c| *c).unwrap_or(CallContext::NONE)
    }

    pub fn has_chain(self) -> bool {
        self.chain_id != 0
    }

    /// Runs `fut` with this context installed; nested scopes shadow outer
    /// ones, so a reentrant inline call sees the innermost mailbox's context.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CALL_CONTEXT.scope(self, fut).await
    }

    /// Synchronous companion of [`CallContext::scope`].
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CALL_CONTEXT.sync_scope(self, f)
    }
}

static NEXT_CHAIN_ID: AtomicU64 = AtomicU64::new(1);

/// Mints a fresh chain id: monotonically increasing, never 0.
///
/// Uniqueness only needs to hold within a process lifetime.
pub fn next_chain_id() -> u64 {
    loop {
        let id = NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}
