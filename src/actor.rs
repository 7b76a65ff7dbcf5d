//! Actors: identity + typed role + owned components + a mailbox.
//!
//! An actor never exposes its state directly. Game code resolves an
//! [`AgentRef`] and dispatches closures through it; the closures run on the
//! actor's mailbox with the agent and component resolved in-item, so a hotfix
//! cache clear can never hand a caller a torn agent.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::component::{Agent, Component};
use crate::error::ActorError;
use crate::mailbox::Mailbox;
use crate::manager::RuntimeCore;
use crate::registry::ComponentSpec;
use crate::types::{ActorId, ActorKind};
use crate::work::Deadline;

pub struct Actor {
    id: ActorId,
    /// Back-reference for the work-item closures dispatched from `&self`
    /// methods; set once at construction.
    self_ref: Weak<Actor>,
    mailbox: Mailbox,
    components: RwLock<HashMap<TypeId, Arc<Component>>>,
    /// True for role actors: reaped by the idle scan.
    auto_recycle: AtomicBool,
    /// Externally scheduled timer ids owned by this actor, cancelled on
    /// deactivation.
    timer_ids: Mutex<HashSet<u64>>,
    core: Arc<RuntimeCore>,
}

impl Actor {
    pub(crate) fn new(id: ActorId, core: Arc<RuntimeCore>) -> Arc<Actor> {
        let mailbox = Mailbox::spawn(id, Arc::clone(core.metrics()), core.guard());
        Arc::new_cyclic(|self_ref| Actor {
            id,
            self_ref: self_ref.clone(),
            mailbox,
            components: RwLock::new(HashMap::new()),
            auto_recycle: AtomicBool::new(id.is_role()),
            timer_ids: Mutex::new(HashSet::new()),
            core,
        })
    }

    /// A strong handle to this actor; `None` only while the last reference is
    /// being dropped.
    fn strong(&self) -> Option<Arc<Actor>> {
        self.self_ref.upgrade()
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn kind(&self) -> ActorKind {
        self.id.kind()
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn auto_recycle(&self) -> bool {
        self.auto_recycle.load(Ordering::Acquire)
    }

    /// Posted onto the mailbox so the flag flip is ordered with in-flight
    /// work.
    pub fn set_auto_recycle(&self, value: bool) {
        let Some(actor) = self.strong() else { return };
        self.mailbox
            .tell(move || actor.auto_recycle.store(value, Ordering::Release));
    }

    /// Registers an externally scheduled timer as owned by this actor.
    pub fn attach_timer(&self, timer_id: u64) {
        self.timer_ids.lock().insert(timer_id);
    }

    pub fn detach_timer(&self, timer_id: u64) {
        self.timer_ids.lock().remove(&timer_id);
    }

    /// Fire-and-forget work on this actor's lane.
    pub fn tell<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.mailbox.tell(f)
    }

    pub fn tell_async<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.mailbox.tell_async(f)
    }

    /// Request/response on this actor's lane (reentrancy rule applies).
    pub async fn ask<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Default + Send + 'static,
    {
        self.mailbox.ask(f).await
    }

    pub async fn ask_async<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Default + Send + 'static,
    {
        self.mailbox.ask_async(f).await
    }

    /// Resolves the agent façade for `A`, creating and activating the backing
    /// component on this actor's mailbox if needed.
    ///
    /// First-touch failures propagate: the component stays inactive and the
    /// next call retries.
    pub async fn agent<A: Agent>(&self) -> Result<AgentRef<A>, ActorError> {
        let this = self
            .strong()
            .ok_or(ActorError::ShuttingDown { actor: self.id })?;
        let registry = self.core.registry();
        let component_type = registry.component_of_agent(TypeId::of::<A>())?;
        let spec = registry.spec_for_actor(component_type, self.kind())?;

        // Fast path: component exists and is live.
        let existing = self.components.read().get(&component_type).cloned();
        let component = match existing {
            Some(c) => c,
            None => self.insert_component(&this, component_type, spec),
        };

        if !component.is_active() {
            // Activation must run on the lane, and `agent()` is frequently
            // called from work already executing on it, so this goes through
            // the unchecked ask (same reentrancy rule, no permission check).
            let actor = Arc::clone(&this);
            let comp = Arc::clone(&component);
            let outcome: Option<Result<(), ActorError>> = self
                .mailbox
                .ask_unchecked(
                    move || async move {
                        let store = Arc::clone(actor.core.store());
                        let make = actor.make_agent_for(&comp);
                        Some(comp.activate(&store, make).await)
                    },
                    Deadline::Infinite,
                )
                .await;
            match outcome {
                Some(Ok(())) => {}
                Some(Err(e)) => return Err(e),
                None => return Err(ActorError::ShuttingDown { actor: self.id }),
            }
        }

        Ok(AgentRef {
            actor: this,
            _marker: PhantomData,
        })
    }

    fn insert_component(
        &self,
        this: &Arc<Actor>,
        component_type: TypeId,
        spec: &ComponentSpec,
    ) -> Arc<Component> {
        let mut map = self.components.write();
        map.entry(component_type)
            .or_insert_with(|| Component::new(this, spec.clone()))
            .clone()
    }

    /// The agent factory for `comp` from the current registry, falling back
    /// to the factory captured at registration if a hotfix dropped the
    /// component.
    fn make_agent_for(&self, comp: &Component) -> fn() -> Arc<dyn Agent> {
        self.core
            .registry()
            .spec(comp.component_type())
            .map(|s| s.make_agent)
            .unwrap_or_else(|| comp.registered_make_agent())
    }

    /// Saves every component; unchanged state is skipped by the change
    /// detector. Errors are logged per component and do not stop the pass.
    pub async fn save_all(&self) {
        let Some(actor) = self.strong() else { return };
        let _: Option<()> = self
            .mailbox
            .ask_unchecked(
                move || async move {
                    let components: Vec<_> =
                        actor.components.read().values().cloned().collect();
                    let store = Arc::clone(actor.core.store());
                    for comp in components {
                        if let Err(e) = comp.save(&store, actor.core.metrics()).await {
                            warn!(
                                actor_id = %actor.id,
                                component = comp.name(),
                                error = %e,
                                "component save failed"
                            );
                        }
                    }
                    Some(())
                },
                Deadline::Infinite,
            )
            .await;
    }

    /// Cancels owned timers, then deactivates every component (final save
    /// first). Idempotent. Returns the first component failure: a failed
    /// final save means the caller must not evict this actor.
    pub async fn deactivate(&self) -> Result<(), ActorError> {
        let Some(actor) = self.strong() else {
            return Err(ActorError::ShuttingDown { actor: self.id });
        };
        let outcome: Option<Result<(), ActorError>> = self
            .mailbox
            .ask_unchecked(
                move || async move {
                    if let Some(timers) = actor.core.timers() {
                        let ids: Vec<u64> = actor.timer_ids.lock().drain().collect();
                        for id in ids {
                            timers.cancel(id);
                        }
                    }
                    let components: Vec<_> =
                        actor.components.read().values().cloned().collect();
                    let store = Arc::clone(actor.core.store());
                    let mut first_err = None;
                    for comp in components {
                        let make = actor.make_agent_for(&comp);
                        if let Err(e) = comp.deactivate(&store, actor.core.metrics(), make).await {
                            if first_err.is_none() {
                                first_err = Some(e);
                            }
                        }
                    }
                    Some(first_err.map_or(Ok(()), Err))
                },
                Deadline::Infinite,
            )
            .await;
        outcome.unwrap_or(Err(ActorError::ShuttingDown { actor: self.id }))
    }

    /// Daily rollover across this actor's components. One component's
    /// failure never blocks its siblings (handled inside the component).
    pub async fn cross_day(&self, open_server_day: u32) {
        let Some(actor) = self.strong() else { return };
        let _: Option<()> = self
            .mailbox
            .ask_unchecked(
                move || async move {
                    let components: Vec<_> =
                        actor.components.read().values().cloned().collect();
                    for comp in components {
                        let make = actor.make_agent_for(&comp);
                        comp.cross_day(open_server_day, make).await;
                    }
                    Some(())
                },
                Deadline::Infinite,
            )
            .await;
    }

    /// Drops every component's cached agent. Posted as a work item so no
    /// in-flight item observes the swap.
    pub fn clear_agent_cache(&self) {
        let Some(actor) = self.strong() else { return };
        self.mailbox.tell(move || {
            for comp in actor.components.read().values() {
                comp.clear_agent_cache();
            }
        });
    }

    /// True iff every component reports itself quiescent.
    pub fn ready_to_deactivate(&self) -> bool {
        self.components
            .read()
            .values()
            .all(|c| c.ready_to_deactivate())
    }

    /// Agent + component resolution used by [`AgentRef`] dispatch. Runs
    /// inside work items on this actor's lane.
    pub(crate) fn resolve_typed<A: Agent>(&self) -> Option<(Arc<A>, Arc<Component>)> {
        let registry = self.core.registry();
        let component_type = registry.component_of_agent(TypeId::of::<A>()).ok()?;
        let component = self.components.read().get(&component_type).cloned()?;
        if !component.is_active() {
            return None;
        }
        let make = registry
            .spec(component_type)
            .map(|s| s.make_agent)
            .unwrap_or_else(|| component.registered_make_agent());
        let agent = component.resolve_agent(make);
        let typed = agent.as_any().downcast::<A>().ok()?;
        Some((typed, component))
    }
}

/// Typed handle to one actor's agent of type `A`.
///
/// Holds no agent instance itself: every dispatched item re-resolves the
/// cached agent, which is what makes hotfix cache clears safe.
pub struct AgentRef<A: Agent> {
    actor: Arc<Actor>,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Agent> Clone for AgentRef<A> {
    fn clone(&self) -> Self {
        AgentRef {
            actor: Arc::clone(&self.actor),
            _marker: PhantomData,
        }
    }
}

impl<A: Agent> std::fmt::Debug for AgentRef<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRef")
            .field("actor_id", &self.actor.id())
            .field("agent", &std::any::type_name::<A>())
            .finish()
    }
}

impl<A: Agent> AgentRef<A> {
    pub fn actor(&self) -> &Arc<Actor> {
        &self.actor
    }

    pub async fn ask<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&A, &Component) -> R + Send + 'static,
        R: Default + Send + 'static,
    {
        self.ask_with(f, Deadline::Default).await
    }

    pub async fn ask_with<F, R>(&self, f: F, deadline: Deadline) -> R
    where
        F: FnOnce(&A, &Component) -> R + Send + 'static,
        R: Default + Send + 'static,
    {
        let actor = Arc::clone(&self.actor);
        self.actor
            .mailbox()
            .ask_with(
                move || match actor.resolve_typed::<A>() {
                    Some((agent, comp)) => f(&agent, &comp),
                    None => {
                        warn!(actor_id = %actor.id(), "agent not resolvable, returning default");
                        R::default()
                    }
                },
                deadline,
            )
            .await
    }

    pub async fn ask_async<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce(Arc<A>, Arc<Component>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Default + Send + 'static,
    {
        self.ask_async_with(f, Deadline::Default).await
    }

    pub async fn ask_async_with<F, Fut, R>(&self, f: F, deadline: Deadline) -> R
    where
        F: FnOnce(Arc<A>, Arc<Component>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Default + Send + 'static,
    {
        let actor = Arc::clone(&self.actor);
        self.actor
            .mailbox()
            .ask_async_with(
                move || async move {
                    match actor.resolve_typed::<A>() {
                        Some((agent, comp)) => f(agent, comp).await,
                        None => {
                            warn!(actor_id = %actor.id(), "agent not resolvable, returning default");
                            R::default()
                        }
                    }
                },
                deadline,
            )
            .await
    }

    pub fn tell<F>(&self, f: F)
    where
        F: FnOnce(&A, &Component) + Send + 'static,
    {
        let actor = Arc::clone(&self.actor);
        self.actor.mailbox().tell(move || {
            if let Some((agent, comp)) = actor.resolve_typed::<A>() {
                f(&agent, &comp)
            }
        });
    }

    pub fn tell_async<F, Fut>(&self, f: F)
    where
        F: FnOnce(Arc<A>, Arc<Component>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let actor = Arc::clone(&self.actor);
        self.actor.mailbox().tell_async(move || async move {
            if let Some((agent, comp)) = actor.resolve_typed::<A>() {
                f(agent, comp).await
            }
        });
    }
}
