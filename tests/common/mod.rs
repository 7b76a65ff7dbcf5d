//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::any::Any;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use warren_actors::{
    ActorManager, ActorState, Agent, Component, ComponentRegistry, ManualClock, MemoryStateStore,
    PersistentState, RegistryBuilder, StoreError,
};
use warren_actors::{ActorKind, FeatureId};

/// Role-actor counter state used across the suites.
#[derive(Debug, Serialize, Deserialize)]
pub struct CounterState {
    pub id: u64,
    pub value: i64,
}

impl ActorState for CounterState {
    fn state_id(&self) -> u64 {
        self.id
    }

    fn write_bytes(&self, out: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(out, self).map_err(io::Error::other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl PersistentState for CounterState {
    const NAME: &'static str = "role_counter";

    fn new(state_id: u64) -> Self {
        CounterState {
            id: state_id,
            value: 0,
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::corrupt(Self::NAME, 0, e.to_string()))
    }
}

#[derive(Default)]
pub struct CounterAgent;

#[async_trait]
impl Agent for CounterAgent {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl CounterAgent {
    pub fn add(&self, component: &Component, delta: i64) -> i64 {
        component
            .with_state::<CounterState, _>(|s| {
                s.value += delta;
                s.value
            })
            .unwrap_or_default()
    }
}

/// Best-effort tracing init so `RUST_LOG=debug cargo test` shows runtime
/// events; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Registry with the counter component on the role kind.
pub fn counter_registry() -> Arc<ComponentRegistry> {
    let mut builder = RegistryBuilder::new();
    builder
        .register::<CounterState, CounterAgent>(ActorKind::Role, Some(FeatureId(1)))
        .expect("register counter");
    builder.build().expect("build registry")
}

/// Manager over an empty registry and throwaway store; enough for raw
/// mailbox/actor scenarios.
pub fn bare_manager() -> Arc<ActorManager> {
    init_tracing();
    ActorManager::builder(ComponentRegistry::empty(), Arc::new(MemoryStateStore::new())).build()
}

/// Manager wired for lifecycle scenarios: counter registry, shared store,
/// manually driven clock.
pub fn lifecycle_manager(
    clock: &Arc<ManualClock>,
    store: &Arc<MemoryStateStore>,
) -> Arc<ActorManager> {
    init_tracing();
    ActorManager::builder(
        counter_registry(),
        Arc::clone(store) as Arc<dyn warren_actors::StateStore>,
    )
        .clock(Arc::clone(clock) as Arc<dyn warren_actors::Clock>)
        .build()
}

/// Polls `cond` until it holds or two seconds elapse.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}
