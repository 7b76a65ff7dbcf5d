//! Hotfix scenarios: agent cache clears and registry reloads mid-run.

use std::any::Any;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use warren_actors::{
    ActorId, ActorKind, ActorManager, ActorState, Agent, Component, MemoryStateStore,
    PersistentState, RegistryBuilder, StoreError,
};

static INSTANCES: AtomicU64 = AtomicU64::new(0);

// The instance counter is process-wide; serialize the scenarios so the
// before/after deltas stay meaningful.
static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

#[derive(Debug, Serialize, Deserialize)]
struct HotState {
    id: u64,
    value: i64,
}

impl ActorState for HotState {
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

impl PersistentState for HotState {
    const NAME: &'static str = "role_hot";
    fn new(state_id: u64) -> Self {
        HotState {
            id: state_id,
            value: 0,
        }
    }
    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::corrupt(Self::NAME, 0, e.to_string()))
    }
}

struct HotAgent;

impl Default for HotAgent {
    fn default() -> Self {
        INSTANCES.fetch_add(1, Ordering::SeqCst);
        HotAgent
    }
}

#[async_trait]
impl Agent for HotAgent {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl HotAgent {
    fn poke(&self, component: &Component) -> i64 {
        component
            .with_state::<HotState, _>(|s| {
                s.value += 1;
                s.value
            })
            .unwrap_or_default()
    }
}

fn build_manager() -> Arc<ActorManager> {
    let mut builder = RegistryBuilder::new();
    builder
        .register::<HotState, HotAgent>(ActorKind::Role, None)
        .expect("register");
    ActorManager::builder(builder.build().expect("registry"), Arc::new(MemoryStateStore::new()))
        .build()
}

#[tokio::test]
async fn cache_clear_forces_fresh_agent_resolution() -> anyhow::Result<()> {
    let _guard = SERIAL.lock().await;
    let manager = build_manager();
    let actor = manager.get_or_create(ActorId::new(ActorKind::Role, 1)).await;
    let agent = actor.agent::<HotAgent>().await?;

    assert_eq!(agent.ask(|a, c| a.poke(c)).await, 1);
    let before = INSTANCES.load(Ordering::SeqCst);

    actor.clear_agent_cache();
    // The clear is a queued item; this ask runs after it and re-resolves.
    assert_eq!(agent.ask(|a, c| a.poke(c)).await, 2);
    assert_eq!(INSTANCES.load(Ordering::SeqCst), before + 1);
    Ok(())
}

#[tokio::test]
async fn in_flight_item_never_observes_a_torn_agent() -> anyhow::Result<()> {
    let _guard = SERIAL.lock().await;
    let manager = build_manager();
    let actor = manager.get_or_create(ActorId::new(ActorKind::Role, 2)).await;
    let agent = actor.agent::<HotAgent>().await?;

    // The slow item resolves its agent on entry and keeps it across the
    // suspension; the clear lands behind it in the queue.
    let slow = tokio::spawn({
        let agent = agent.clone();
        async move {
            agent
                .ask_async(|a, c| async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    a.poke(&c)
                })
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    actor.clear_agent_cache();

    assert_eq!(slow.await?, 1);
    // And the post-clear dispatch still works against a fresh instance.
    assert_eq!(agent.ask(|a, c| a.poke(c)).await, 2);
    Ok(())
}

#[tokio::test]
async fn registry_reload_clears_every_cache() -> anyhow::Result<()> {
    let _guard = SERIAL.lock().await;
    let manager = build_manager();
    let actor = manager.get_or_create(ActorId::new(ActorKind::Role, 3)).await;
    let agent = actor.agent::<HotAgent>().await?;
    assert_eq!(agent.ask(|a, c| a.poke(c)).await, 1);

    let before = INSTANCES.load(Ordering::SeqCst);
    let mut builder = RegistryBuilder::new();
    builder.register::<HotState, HotAgent>(ActorKind::Role, None)?;
    manager.reload(builder.build()?);

    // State survives the reload; only the behavior façade was re-resolved.
    assert_eq!(agent.ask(|a, c| a.poke(c)).await, 2);
    assert_eq!(INSTANCES.load(Ordering::SeqCst), before + 1);
    Ok(())
}
