//! Components: the (state, agent) pairs owned by an actor.
//!
//! A component holds one durable state object and the cached behavior façade
//! in front of it. All mutation happens on the owning actor's mailbox; the
//! locks here are uncontended in normal operation and exist because a
//! deadline-detached thunk may still be holding references when the lane has
//! moved on.

use std::any::{Any, TypeId};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::actor::Actor;
use crate::change::ChangeDetector;
use crate::error::{ActorError, StoreError};
use crate::metrics::RuntimeMetrics;
use crate::registry::ComponentSpec;
use crate::store::StateStore;
use crate::types::ActorId;

/// A durable state object with a deterministic byte serialization.
///
/// The runtime never interprets the bytes; it hashes them for change
/// detection and hands them to the persistence store.
pub trait ActorState: Send + 'static {
    /// Durable identity; by convention the owning actor's raw id.
    fn state_id(&self) -> u64;

    /// Deterministic, streaming serialization of the full state.
    fn write_bytes(&self, out: &mut dyn io::Write) -> io::Result<()>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A state type the registry can construct and reload.
pub trait PersistentState: ActorState + Sized {
    /// Store collection name. Must be stable across releases.
    const NAME: &'static str;

    /// Fresh state for a first-touch activation.
    fn new(state_id: u64) -> Self;

    /// Decode previously persisted bytes.
    fn decode(bytes: &[u8]) -> Result<Self, StoreError>;
}

/// Hot-swappable behavior façade over a component's state.
///
/// Agents must be side-effect-only: the cached instance can be invalidated by
/// a hotfix reload between any two work items, so all durable data lives in
/// the state.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Runs on the owning mailbox right after the state is loaded.
    async fn on_activate(&self, component: &Component) -> Result<(), ActorError> {
        let _ = component;
        Ok(())
    }

    /// Runs on the owning mailbox after the final save, before release.
    async fn on_deactivate(&self, component: &Component) -> Result<(), ActorError> {
        let _ = component;
        Ok(())
    }

    /// Opt-in for the daily rollover broadcast.
    fn handles_cross_day(&self) -> bool {
        false
    }

    async fn on_cross_day(
        &self,
        component: &Component,
        open_server_day: u32,
    ) -> Result<(), ActorError> {
        let _ = (component, open_server_day);
        Ok(())
    }

    /// Enables typed downcast of the cached instance.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct StateCell {
    state: Option<Box<dyn ActorState>>,
    detector: Option<ChangeDetector>,
}

pub struct Component {
    actor: Weak<Actor>,
    actor_id: ActorId,
    spec: ComponentSpec,
    cell: Mutex<StateCell>,
    is_active: AtomicBool,
    ready_to_deactivate: AtomicBool,
    agent: Mutex<Option<Arc<dyn Agent>>>,
}

impl Component {
    pub(crate) fn new(actor: &Arc<Actor>, spec: ComponentSpec) -> Arc<Component> {
        Arc::new(Component {
            actor: Arc::downgrade(actor),
            actor_id: actor.id(),
            spec,
            cell: Mutex::new(StateCell {
                state: None,
                detector: None,
            }),
            is_active: AtomicBool::new(false),
            ready_to_deactivate: AtomicBool::new(true),
            agent: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub(crate) fn component_type(&self) -> TypeId {
        self.spec.component_type
    }

    /// Factory captured at registration; the actor prefers the current
    /// registry's factory and uses this only as a fallback.
    pub(crate) fn registered_make_agent(&self) -> fn() -> Arc<dyn Agent> {
        self.spec.make_agent
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    /// The owning actor, unless it is already being torn down.
    pub fn actor(&self) -> Option<Arc<Actor>> {
        self.actor.upgrade()
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Acquire)
    }

    /// Whether idle eviction may deactivate the owning actor. Agents with
    /// in-flight work hold this down via [`Component::hold_active`].
    pub fn ready_to_deactivate(&self) -> bool {
        self.ready_to_deactivate.load(Ordering::Acquire)
    }

    pub fn hold_active(&self, hold: bool) {
        self.ready_to_deactivate.store(!hold, Ordering::Release);
    }

    /// Typed access to the state. Must only be called from work running on
    /// the owning mailbox.
    pub fn with_state<S: ActorState, R>(
        &self,
        f: impl FnOnce(&mut S) -> R,
    ) -> Result<R, ActorError> {
        let mut cell = self.cell.lock();
        let state = cell
            .state
            .as_mut()
            .ok_or(ActorError::ComponentInactive {
                actor: self.actor_id,
                component: self.spec.name,
            })?;
        let typed = state
            .as_any_mut()
            .downcast_mut::<S>()
            .ok_or(ActorError::StateTypeMismatch {
                component: self.spec.name,
            })?;
        Ok(f(typed))
    }

    /// Returns the cached agent, resolving it through `make` when the cache
    /// is empty (first use, or after a hotfix cleared it).
    pub(crate) fn resolve_agent(&self, make: fn() -> Arc<dyn Agent>) -> Arc<dyn Agent> {
        let mut slot = self.agent.lock();
        match &*slot {
            Some(agent) => Arc::clone(agent),
            None => {
                let agent = make();
                *slot = Some(Arc::clone(&agent));
                agent
            }
        }
    }

    /// Drops the cached agent so the next access re-resolves it.
    pub(crate) fn clear_agent_cache(&self) {
        *self.agent.lock() = None;
    }

    /// Loads (or creates) the state and runs the activation hook. Runs on the
    /// owning mailbox. On failure the component stays inactive so the next
    /// `agent()` call retries from scratch.
    pub(crate) async fn activate(
        &self,
        store: &Arc<dyn StateStore>,
        make_agent: fn() -> Arc<dyn Agent>,
    ) -> Result<(), ActorError> {
        if self.is_active() {
            return Ok(());
        }
        let state_id = self.actor_id.raw();
        let state = match store.load(self.spec.name, state_id).await {
            Ok(Some(bytes)) => (self.spec.decode_state)(&bytes)
                .map_err(|e| ActorError::activation_failed(self.actor_id, self.spec.name, e.to_string()))?,
            Ok(None) => (self.spec.new_state)(state_id),
            Err(e) => {
                return Err(ActorError::activation_failed(
                    self.actor_id,
                    self.spec.name,
                    e.to_string(),
                ))
            }
        };
        let detector = ChangeDetector::attach(state.as_ref());
        {
            let mut cell = self.cell.lock();
            cell.state = Some(state);
            cell.detector = Some(detector);
        }

        let agent = self.resolve_agent(make_agent);
        if let Err(e) = agent.on_activate(self).await {
            error!(actor_id = %self.actor_id, component = self.spec.name, error = %e, "activation hook failed");
            let mut cell = self.cell.lock();
            cell.state = None;
            cell.detector = None;
            return Err(e);
        }
        self.is_active.store(true, Ordering::Release);
        debug!(actor_id = %self.actor_id, component = self.spec.name, "component activated");
        Ok(())
    }

    /// Persists the state if its serialized form changed since the last
    /// successful persist. A store failure leaves the persisted digest
    /// untouched, so the next pass retries.
    pub(crate) async fn save(
        &self,
        store: &Arc<dyn StateStore>,
        metrics: &RuntimeMetrics,
    ) -> Result<bool, StoreError> {
        if !self.is_active() {
            return Ok(false);
        }
        let (state_id, check) = {
            let cell = self.cell.lock();
            let (state, detector) = match (&cell.state, &cell.detector) {
                (Some(s), Some(d)) => (s, d),
                _ => return Ok(false),
            };
            (state.state_id(), detector.check(state.as_ref()))
        };
        if !check.changed {
            metrics.saves_skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        let bytes = match check.bytes {
            Some(b) => b,
            None => {
                metrics.save_failures.fetch_add(1, Ordering::Relaxed);
                return Err(StoreError::Serialize(format!(
                    "{}/{} did not serialize",
                    self.spec.name, state_id
                )));
            }
        };
        match store.upsert(self.spec.name, state_id, &bytes).await {
            Ok(()) => {
                if let Some(detector) = &self.cell.lock().detector {
                    detector.mark_persisted();
                }
                metrics.saves_written.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) => {
                metrics.save_failures.fetch_add(1, Ordering::Relaxed);
                error!(actor_id = %self.actor_id, component = self.spec.name, error = %e, "save failed, will retry");
                Err(e)
            }
        }
    }

    /// Final save, deactivation hook, release. Runs on the owning mailbox.
    /// A failed final save aborts the deactivation: dropping unsaved state is
    /// worse than keeping the actor hot another window.
    pub(crate) async fn deactivate(
        &self,
        store: &Arc<dyn StateStore>,
        metrics: &RuntimeMetrics,
        make_agent: fn() -> Arc<dyn Agent>,
    ) -> Result<(), ActorError> {
        if !self.is_active() {
            return Ok(());
        }
        self.save(store, metrics).await?;

        let agent = self.resolve_agent(make_agent);
        if let Err(e) = agent.on_deactivate(self).await {
            // Hook failures do not abort: the state is already durable.
            error!(actor_id = %self.actor_id, component = self.spec.name, error = %e, "deactivation hook failed");
        }

        self.is_active.store(false, Ordering::Release);
        let mut cell = self.cell.lock();
        cell.state = None;
        cell.detector = None;
        drop(cell);
        self.clear_agent_cache();
        debug!(actor_id = %self.actor_id, component = self.spec.name, "component deactivated");
        Ok(())
    }

    /// Daily rollover for this component, if its agent opted in.
    pub(crate) async fn cross_day(
        &self,
        open_server_day: u32,
        make_agent: fn() -> Arc<dyn Agent>,
    ) {
        if !self.is_active() {
            return;
        }
        let agent = self.resolve_agent(make_agent);
        if !agent.handles_cross_day() {
            return;
        }
        if let Err(e) = agent.on_cross_day(self, open_server_day).await {
            // One component's rollover failure must not block its siblings.
            error!(
                actor_id = %self.actor_id,
                component = self.spec.name,
                day = open_server_day,
                error = %e,
                "cross-day hook failed"
            );
        }
    }
}
