//! Daily rollover scenarios: phase ordering and per-component failure
//! isolation.

use std::any::Any;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use warren_actors::{
    ActorError, ActorId, ActorKind, ActorManager, ActorState, Agent, Component, MemoryStateStore,
    PersistentState, RegistryBuilder, StoreError,
};

static LOG: Mutex<Vec<(&'static str, u32)>> = Mutex::new(Vec::new());

fn log_event(tag: &'static str, day: u32) {
    LOG.lock().push((tag, day));
}

macro_rules! day_state {
    ($state:ident, $name:literal) => {
        #[derive(Debug, Serialize, Deserialize)]
        struct $state {
            id: u64,
            day: u32,
        }

        impl ActorState for $state {
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

        impl PersistentState for $state {
            const NAME: &'static str = $name;
            fn new(state_id: u64) -> Self {
                $state {
                    id: state_id,
                    day: 0,
                }
            }
            fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
                serde_json::from_slice(bytes)
                    .map_err(|e| StoreError::corrupt(Self::NAME, 0, e.to_string()))
            }
        }
    };
}

day_state!(ServerState, "server_day");
day_state!(ChatState, "chat_day");
day_state!(NoticeState, "chat_notice");
day_state!(GuildState, "guild_day");

macro_rules! day_agent {
    ($agent:ident, $state:ident, $start:literal, $done:literal, $pause_ms:literal) => {
        #[derive(Default)]
        struct $agent;

        #[async_trait]
        impl Agent for $agent {
            fn handles_cross_day(&self) -> bool {
                true
            }

            async fn on_cross_day(
                &self,
                component: &Component,
                open_server_day: u32,
            ) -> Result<(), ActorError> {
                log_event($start, open_server_day);
                tokio::time::sleep(Duration::from_millis($pause_ms)).await;
                component.with_state::<$state, _>(|s| s.day = open_server_day)?;
                log_event($done, open_server_day);
                Ok(())
            }

            fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
                self
            }
        }
    };
}

day_agent!(ServerAgent, ServerState, "driver", "driver-done", 40);
day_agent!(ChatAgent, ChatState, "global", "global-done", 20);
day_agent!(GuildAgent, GuildState, "other", "other-done", 10);

/// Second chat component whose rollover always fails.
#[derive(Default)]
struct NoticeAgent;

#[async_trait]
impl Agent for NoticeAgent {
    fn handles_cross_day(&self) -> bool {
        true
    }

    async fn on_cross_day(
        &self,
        _component: &Component,
        open_server_day: u32,
    ) -> Result<(), ActorError> {
        log_event("notice-fail", open_server_day);
        Err(ActorError::hook("notice board offline"))
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn build_manager() -> Arc<ActorManager> {
    let mut builder = RegistryBuilder::new();
    builder
        .register::<ServerState, ServerAgent>(ActorKind::Server, None)
        .expect("server");
    builder
        .register::<ChatState, ChatAgent>(ActorKind::Chat, None)
        .expect("chat");
    builder
        .register::<NoticeState, NoticeAgent>(ActorKind::Chat, None)
        .expect("notice");
    builder
        .register::<GuildState, GuildAgent>(ActorKind::Guild, None)
        .expect("guild");
    let registry = builder.build().expect("registry");
    ActorManager::builder(registry, Arc::new(MemoryStateStore::new())).build()
}

#[tokio::test]
async fn cross_day_runs_driver_then_globals_then_others() {
    let manager = build_manager();

    // Activate one component per actor so the rollover has work to do.
    let chat = manager.get_or_create(ActorId::global(ActorKind::Chat)).await;
    chat.agent::<ChatAgent>().await.expect("chat agent");
    let server = manager
        .get_or_create(ActorId::global(ActorKind::Server))
        .await;
    server.agent::<ServerAgent>().await.expect("server agent");
    let guild = manager
        .get_or_create(ActorId::new(ActorKind::Guild, 1))
        .await;
    guild.agent::<GuildAgent>().await.expect("guild agent");

    manager.cross_day(7, ActorKind::Server).await;

    // The log is shared across the binary's tests; events carry the day so
    // each scenario filters its own.
    let log: Vec<(&'static str, u32)> = LOG
        .lock()
        .iter()
        .filter(|(_, day)| *day == 7)
        .cloned()
        .collect();
    let pos = |tag: &str| {
        log.iter()
            .position(|(t, _)| *t == tag)
            .unwrap_or_else(|| panic!("missing event {tag} in {log:?}"))
    };

    // Driver completes before any global starts.
    assert!(pos("driver-done") < pos("global"));
    // Globals complete before any non-role actor starts.
    assert!(pos("global-done") < pos("other"));
    assert!(pos("other-done") > pos("other"));

    // The rollover landed in state.
    let day = server
        .agent::<ServerAgent>()
        .await
        .expect("server agent")
        .ask(|_, c| c.with_state::<ServerState, _>(|s| s.day).unwrap_or_default())
        .await;
    assert_eq!(day, 7);
}

#[tokio::test]
async fn failing_component_does_not_block_its_siblings() {
    let manager = build_manager();

    let chat = manager.get_or_create(ActorId::global(ActorKind::Chat)).await;
    chat.agent::<ChatAgent>().await.expect("chat agent");
    chat.agent::<NoticeAgent>().await.expect("notice agent");

    manager.cross_day(3, ActorKind::Server).await;

    let log = LOG.lock().clone();
    assert!(log.contains(&("notice-fail", 3)));
    assert!(log.contains(&("global-done", 3)), "sibling still ran: {log:?}");
}
