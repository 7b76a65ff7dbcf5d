//! Actor runtime core for the Warren stateful game server framework.
//!
//! Every logical entity (a player role, a guild, a server-wide singleton) is
//! an actor: its state mutates only on its own serial execution lane, while
//! thousands of actors run in parallel on the shared runtime. The crate
//! unifies four concerns:
//!
//! - **Serial lanes**: each [`Mailbox`] drains work strictly FIFO, one item
//!   at a time; suspension inside an item keeps the lane bound to it.
//! - **Reentrant call chains**: every logical call carries a chain id
//!   ([`CallContext`]); an `ask` that re-enters a mailbox its own chain
//!   already owns runs inline instead of deadlocking against itself.
//! - **Lifecycle**: role actors are lazily created by the
//!   [`ActorManager`], kept hot while active, and reaped after an idle
//!   window with their state flushed first; create/evict decisions are
//!   serialized on lifecycle partition lanes.
//! - **Change-detected persistence**: component state is re-serialized into
//!   a rolling digest ([`ChangeDetector`]) and only written back when the
//!   bytes actually changed.
//!
//! # Wiring
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warren_actors::{ActorManager, MemoryStateStore};
//!
//! # fn registry() -> Arc<warren_actors::ComponentRegistry> { warren_actors::ComponentRegistry::empty() }
//! # async fn demo() {
//! let manager = ActorManager::builder(registry(), Arc::new(MemoryStateStore::new())).build();
//! # let _ = manager;
//! # }
//! ```
//!
//! The game plugin registers components through [`RegistryBuilder`], resolves
//! agents through [`ActorManager::get_or_create`] and [`Actor::agent`], and
//! external timers drive [`ActorManager::idle_scan`],
//! [`ActorManager::timer_save`] and [`ActorManager::cross_day`].

pub mod actor;
pub mod change;
pub mod component;
pub mod context;
pub mod error;
pub mod limit;
pub mod mailbox;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod store;
pub mod time;
pub mod types;
pub mod work;

// Re-export the working surface.
pub use actor::{Actor, AgentRef};
pub use change::{ChangeDetector, Digest, DigestSink};
pub use component::{ActorState, Agent, Component, PersistentState};
pub use context::{next_chain_id, CallContext};
pub use error::{ActorError, RegistryError, StoreError};
pub use limit::CallGuard;
pub use mailbox::Mailbox;
pub use manager::{
    ActorManager, ActorManagerBuilder, RuntimeCore, CROSS_DAY_GLOBAL_WAIT,
    CROSS_DAY_NOT_ROLE_WAIT, IDLE_EVICT_THRESHOLD, IDLE_HOT_WINDOW, ONCE_SAVE_COUNT, WORKER_COUNT,
};
pub use metrics::{MetricsSnapshot, RuntimeMetrics};
pub use registry::{ComponentRegistry, ComponentSpec, RegistryBuilder};
pub use store::{MemoryStateStore, StateStore};
pub use time::{Clock, ManualClock, SystemClock, TimerHost};
pub use types::{ActorId, ActorKind, FeatureId};
pub use work::{Deadline, DEFAULT_DEADLINE};
