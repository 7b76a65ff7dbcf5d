//! Global actor directory and lifecycle coordinator.
//!
//! The manager owns the runtime wiring (registry, store, clock, flags) and
//! the concurrent directory of live actors. Role-actor create/evict decisions
//! are serialized on a fixed pool of lifecycle partition lanes; a reap
//! decision must never wait on the mailbox of the actor it is reaping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::actor::Actor;
use crate::component::{Agent, Component};
use crate::limit::CallGuard;
use crate::mailbox::Mailbox;
use crate::metrics::RuntimeMetrics;
use crate::registry::ComponentRegistry;
use crate::store::StateStore;
use crate::time::{Clock, SystemClock, TimerHost};
use crate::types::{ActorId, ActorKind};
use crate::work::Deadline;

/// Number of lifecycle partition lanes.
pub const WORKER_COUNT: usize = 10;
/// A role lookup within this window takes the hot path (no partition hop).
pub const IDLE_HOT_WINDOW: Duration = Duration::from_secs(10 * 60);
/// Role actors idle longer than this are eligible for eviction.
pub const IDLE_EVICT_THRESHOLD: Duration = Duration::from_secs(15 * 60);
/// Batch size of the steady-state save pass.
pub const ONCE_SAVE_COUNT: usize = 1000;
/// Budget for the global phase of cross-day.
pub const CROSS_DAY_GLOBAL_WAIT: Duration = Duration::from_secs(60);
/// Budget for the non-role phase of cross-day.
pub const CROSS_DAY_NOT_ROLE_WAIT: Duration = Duration::from_secs(120);

/// Runtime wiring shared by every actor: registry (swapped on hotfix),
/// persistence store, clock, timer host, flags, metrics.
pub struct RuntimeCore {
    registry: RwLock<Arc<ComponentRegistry>>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    timers: Option<Arc<dyn TimerHost>>,
    shutdown: AtomicBool,
    metrics: Arc<RuntimeMetrics>,
    guard: CallGuard,
}

impl RuntimeCore {
    /// Current registry snapshot. Never hold this across a reload boundary;
    /// take a fresh snapshot per operation.
    pub fn registry(&self) -> Arc<ComponentRegistry> {
        Arc::clone(&self.registry.read())
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn timers(&self) -> Option<&Arc<dyn TimerHost>> {
        self.timers.as_ref()
    }

    pub fn metrics(&self) -> &Arc<RuntimeMetrics> {
        &self.metrics
    }

    pub(crate) fn guard(&self) -> CallGuard {
        self.guard
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn swap_registry(&self, registry: Arc<ComponentRegistry>) {
        *self.registry.write() = registry;
    }
}

pub struct ActorManagerBuilder {
    registry: Arc<ComponentRegistry>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    timers: Option<Arc<dyn TimerHost>>,
    debug: bool,
}

impl ActorManagerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn timers(mut self, timers: Arc<dyn TimerHost>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Enables the development-mode call-permission guard.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Spawns the lifecycle partition lanes; must run inside a tokio runtime.
    pub fn build(self) -> Arc<ActorManager> {
        let metrics = Arc::new(RuntimeMetrics::default());
        let guard = CallGuard::new(self.debug);
        let core = Arc::new(RuntimeCore {
            registry: RwLock::new(self.registry),
            store: self.store,
            clock: self.clock,
            timers: self.timers,
            shutdown: AtomicBool::new(false),
            metrics: Arc::clone(&metrics),
            guard,
        });
        // Partition lanes are internal mailboxes, not directory actors; they
        // borrow the separator kind for their ids.
        let partitions = (0..WORKER_COUNT)
            .map(|i| {
                Mailbox::spawn(
                    ActorId::new(ActorKind::Separator, i as u64),
                    Arc::clone(&metrics),
                    CallGuard::default(),
                )
            })
            .collect();
        info!(partitions = WORKER_COUNT, debug = guard.is_enabled(), "actor manager started");
        Arc::new_cyclic(|self_ref| ActorManager {
            self_ref: self_ref.clone(),
            core,
            directory: DashMap::new(),
            last_active: DashMap::new(),
            partitions,
        })
    }
}

pub struct ActorManager {
    /// Back-reference for work dispatched onto the partition lanes.
    self_ref: Weak<ActorManager>,
    core: Arc<RuntimeCore>,
    directory: DashMap<ActorId, Arc<Actor>>,
    /// Last-touch wall clock for role actors, epoch millis. Monotonic values,
    /// last-writer-wins.
    last_active: DashMap<ActorId, u64>,
    partitions: Vec<Mailbox>,
}

impl ActorManager {
    pub fn builder(
        registry: Arc<ComponentRegistry>,
        store: Arc<dyn StateStore>,
    ) -> ActorManagerBuilder {
        ActorManagerBuilder {
            registry,
            store,
            clock: Arc::new(SystemClock),
            timers: None,
            debug: false,
        }
    }

    pub fn core(&self) -> &Arc<RuntimeCore> {
        &self.core
    }

    pub fn metrics(&self) -> &Arc<RuntimeMetrics> {
        self.core.metrics()
    }

    pub fn len(&self) -> usize {
        self.directory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }

    pub fn contains(&self, id: ActorId) -> bool {
        self.directory.contains_key(&id)
    }

    pub fn get(&self, id: ActorId) -> Option<Arc<Actor>> {
        self.directory.get(&id).map(|a| Arc::clone(a.value()))
    }

    fn partition(&self, id: ActorId) -> &Mailbox {
        &self.partitions[(id.instance() % WORKER_COUNT as u64) as usize]
    }

    fn now_ms(&self) -> u64 {
        self.core.clock.now_ms()
    }

    /// A strong handle for partition-lane closures; `None` only during final
    /// drop.
    fn strong(&self) -> Option<Arc<ActorManager>> {
        self.self_ref.upgrade()
    }

    /// Looks up or creates the actor for `id`.
    ///
    /// Globals (and other non-role kinds) are a plain insert-if-absent. Role
    /// ids take a lock-free hot path while recently active; otherwise the
    /// lookup-and-insert is serialized on the id's lifecycle partition so it
    /// cannot race a concurrent eviction.
    pub async fn get_or_create(&self, id: ActorId) -> Arc<Actor> {
        if !id.is_role() {
            return self.insert_if_absent(id);
        }

        let now = self.now_ms();
        let hot = self
            .last_active
            .get(&id)
            .map(|stamp| now.saturating_sub(*stamp) <= IDLE_HOT_WINDOW.as_millis() as u64)
            .unwrap_or(false);
        if hot {
            if let Some(actor) = self.get(id) {
                self.last_active.insert(id, now);
                return actor;
            }
        }

        if let Some(manager) = self.strong() {
            let created: Option<Arc<Actor>> = self
                .partition(id)
                .ask_async_with(
                    move || async move {
                        let actor = manager.insert_if_absent(id);
                        manager.last_active.insert(id, manager.now_ms());
                        Some(actor)
                    },
                    Deadline::Infinite,
                )
                .await;
            // The partition lane only drops work during teardown; fall back
            // to a direct insert so late callers still get an actor.
            if let Some(actor) = created {
                return actor;
            }
        }
        self.insert_if_absent(id)
    }

    fn insert_if_absent(&self, id: ActorId) -> Arc<Actor> {
        let mut created = false;
        let actor = self
            .directory
            .entry(id)
            .or_insert_with(|| {
                created = true;
                Actor::new(id, Arc::clone(&self.core))
            })
            .clone();
        if created {
            self.core
                .metrics()
                .actors_created
                .fetch_add(1, Ordering::Relaxed);
            debug!(actor_id = %id, "actor created");
        }
        actor
    }

    /// Records activity for a role actor without resolving it.
    pub fn touch(&self, id: ActorId) {
        if id.is_role() {
            self.last_active.insert(id, self.now_ms());
        }
    }

    /// One pass of the idle reaper, driven by an external timer tick.
    ///
    /// Candidates are detected here; the actual eviction runs double-checked
    /// on the actor's lifecycle partition, because activity can arrive
    /// between the scan decision and the partitioned task.
    pub fn idle_scan(&self) {
        let threshold = IDLE_EVICT_THRESHOLD.as_millis() as u64;
        let candidates: Vec<(ActorId, Arc<Actor>)> = self
            .directory
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        for (id, actor) in candidates {
            if !actor.auto_recycle() {
                continue;
            }
            let now = self.now_ms();
            let last = match self.last_active.get(&id).map(|v| *v) {
                Some(v) => v,
                None => {
                    // Never seeded (creation raced a scan): treat as just
                    // touched.
                    self.last_active.insert(id, now);
                    continue;
                }
            };
            if now.saturating_sub(last) <= threshold {
                continue;
            }
            let Some(manager) = self.strong() else { return };
            self.partition(id).tell_async_with(
                move || async move { manager.evict_if_idle(id).await },
                Deadline::Infinite,
            );
        }
    }

    /// Runs on the lifecycle partition. Re-checks idleness, verifies the
    /// actor is quiescent, flushes state, and only then removes it from the
    /// directory.
    async fn evict_if_idle(&self, id: ActorId) {
        let now = self.now_ms();
        let threshold = IDLE_EVICT_THRESHOLD.as_millis() as u64;
        match self.last_active.get(&id).map(|v| *v) {
            None => {
                self.last_active.insert(id, now);
                return;
            }
            Some(last) if now.saturating_sub(last) <= threshold => return,
            Some(_) => {}
        }
        let actor = match self.get(id) {
            Some(a) => a,
            None => {
                self.last_active.remove(&id);
                return;
            }
        };
        if !actor.ready_to_deactivate() {
            debug!(actor_id = %id, "not quiescent, idle eviction deferred");
            self.last_active.insert(id, now);
            return;
        }
        match actor.deactivate().await {
            Ok(()) => {
                self.directory.remove(&id);
                self.last_active.remove(&id);
                self.core
                    .metrics()
                    .actors_evicted
                    .fetch_add(1, Ordering::Relaxed);
                info!(actor_id = %id, "idle actor evicted");
            }
            Err(e) => {
                warn!(actor_id = %id, error = %e, "deactivation failed, actor retained");
                self.last_active.insert(id, now);
            }
        }
    }

    /// Saves every actor in parallel. Used on the shutdown path.
    pub async fn save_all_now(&self) {
        let actors: Vec<Arc<Actor>> = self
            .directory
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        info!(actors = actors.len(), "saving all actors");
        join_all(actors.iter().map(|a| a.save_all())).await;
    }

    /// Steady-state batched save pass, driven by an external timer tick.
    /// Aborts when shutdown has begun; the shutdown path saves everything
    /// itself.
    pub async fn timer_save(&self) {
        let actors: Vec<Arc<Actor>> = self
            .directory
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for batch in actors.chunks(ONCE_SAVE_COUNT) {
            if self.core.is_shutting_down() {
                debug!("timer save aborted, shutdown in progress");
                return;
            }
            join_all(batch.iter().map(|a| a.save_all())).await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Daily rollover, phased: the driver global first and synchronously,
    /// then the remaining globals, then the remaining non-role actors. Wait
    /// budgets are soft: an overrun logs a warning and the rollover
    /// proceeds.
    pub async fn cross_day(&self, open_server_day: u32, driver: ActorKind) {
        if !driver.is_global() {
            warn!(?driver, "cross-day driver must be a global kind, skipping rollover");
            return;
        }
        info!(day = open_server_day, ?driver, "cross-day started");

        let driver_id = ActorId::global(driver);
        let driver_actor = self.get_or_create(driver_id).await;
        driver_actor.cross_day(open_server_day).await;

        let globals: Vec<Arc<Actor>> = self
            .directory
            .iter()
            .filter(|e| e.key().is_global() && *e.key() != driver_id)
            .map(|e| Arc::clone(e.value()))
            .collect();
        let wave = join_all(globals.iter().map(|a| a.cross_day(open_server_day)));
        if tokio::time::timeout(CROSS_DAY_GLOBAL_WAIT, wave).await.is_err() {
            warn!(
                day = open_server_day,
                budget_secs = CROSS_DAY_GLOBAL_WAIT.as_secs(),
                "global cross-day wave exceeded budget, proceeding"
            );
        }

        let others: Vec<Arc<Actor>> = self
            .directory
            .iter()
            .filter(|e| {
                let k = e.key().kind();
                !k.is_global() && !k.is_role()
            })
            .map(|e| Arc::clone(e.value()))
            .collect();
        let wave = join_all(others.iter().map(|a| a.cross_day(open_server_day)));
        if tokio::time::timeout(CROSS_DAY_NOT_ROLE_WAIT, wave).await.is_err() {
            warn!(
                day = open_server_day,
                budget_secs = CROSS_DAY_NOT_ROLE_WAIT.as_secs(),
                "non-role cross-day wave exceeded budget, proceeding"
            );
        }
        info!(day = open_server_day, "cross-day finished");
    }

    /// Fire-and-forget rollover for role actors; they catch up on their own
    /// lanes.
    pub fn for_each_role_cross_day(&self, open_server_day: u32) {
        for entry in self.directory.iter() {
            if !entry.key().is_role() {
                continue;
            }
            let actor = Arc::clone(entry.value());
            let handle = Arc::clone(entry.value());
            actor.tell_async(move || async move {
                handle.cross_day(open_server_day).await;
            });
        }
    }

    /// Broadcasts `f` to every actor hosting agent type `A`, fire-and-forget
    /// on each actor's own lane. Actors whose component is not active are
    /// skipped.
    pub fn for_each_agent<A, F>(&self, f: F)
    where
        A: Agent,
        F: Fn(&A, &Component) + Send + Sync + 'static,
    {
        let registry = self.core.registry();
        let kind = match registry
            .component_of_agent(std::any::TypeId::of::<A>())
            .ok()
            .and_then(|c| registry.spec(c).map(|s| s.kind))
        {
            Some(kind) => kind,
            None => {
                warn!("broadcast to unknown agent type dropped");
                return;
            }
        };
        let f = Arc::new(f);
        for entry in self.directory.iter() {
            if entry.key().kind() != kind {
                continue;
            }
            let actor = Arc::clone(entry.value());
            let f = Arc::clone(&f);
            let target = Arc::clone(entry.value());
            actor.tell(move || {
                if let Some((agent, comp)) = target.resolve_typed::<A>() {
                    f(&agent, &comp)
                }
            });
        }
    }

    /// Async companion of [`ActorManager::for_each_agent`].
    pub fn for_each_agent_async<A, F, Fut>(&self, f: F)
    where
        A: Agent,
        F: Fn(Arc<A>, Arc<Component>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let registry = self.core.registry();
        let kind = match registry
            .component_of_agent(std::any::TypeId::of::<A>())
            .ok()
            .and_then(|c| registry.spec(c).map(|s| s.kind))
        {
            Some(kind) => kind,
            None => {
                warn!("broadcast to unknown agent type dropped");
                return;
            }
        };
        let f = Arc::new(f);
        for entry in self.directory.iter() {
            if entry.key().kind() != kind {
                continue;
            }
            let actor = Arc::clone(entry.value());
            let f = Arc::clone(&f);
            let target = Arc::clone(entry.value());
            actor.tell_async(move || async move {
                if let Some((agent, comp)) = target.resolve_typed::<A>() {
                    f(agent, comp).await
                }
            });
        }
    }

    /// Hotfix entry point: swap the registry and drop every cached agent.
    pub fn reload(&self, registry: Arc<ComponentRegistry>) {
        self.core.swap_registry(registry);
        for entry in self.directory.iter() {
            entry.value().clear_agent_cache();
        }
        info!(actors = self.directory.len(), "registry reloaded, agent caches cleared");
    }

    /// Deactivates every actor (flushing state) and clears the directory.
    pub async fn remove_all(&self) {
        let actors: Vec<Arc<Actor>> = self
            .directory
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        let results = join_all(actors.iter().map(|a| a.deactivate())).await;
        for (actor, result) in actors.iter().zip(results) {
            if let Err(e) = result {
                warn!(actor_id = %actor.id(), error = %e, "deactivation failed during drain");
            }
        }
        self.directory.clear();
        self.last_active.clear();
        info!("actor directory drained");
    }

    /// Orderly shutdown: raise the flag (stops timer saves), flush
    /// everything, drain the directory.
    pub async fn shutdown(&self) {
        self.core.shutdown.store(true, Ordering::Release);
        info!("shutdown started");
        self.save_all_now().await;
        self.remove_all().await;
        info!("shutdown complete");
    }
}
