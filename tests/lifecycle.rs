//! Lifecycle scenarios: activation, idle eviction, save retry, shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::CounterAgent;
use warren_actors::{ActorId, ActorKind, ManualClock, MemoryStateStore};

fn role(n: u64) -> ActorId {
    ActorId::new(ActorKind::Role, n)
}

const MINUTE_MS: u64 = 60 * 1000;

#[tokio::test]
async fn idle_eviction_flushes_state_before_removal() {
    let clock = ManualClock::new(1_000_000);
    let store = Arc::new(MemoryStateStore::new());
    let manager = common::lifecycle_manager(&clock, &store);

    let id = role(42);
    let actor = manager.get_or_create(id).await;
    let agent = actor.agent::<CounterAgent>().await.expect("activate");
    assert_eq!(agent.ask(|a, c| a.add(c, 5)).await, 5);

    clock.advance_ms(20 * MINUTE_MS);
    manager.idle_scan();
    common::wait_until(|| !manager.contains(id)).await;

    // Durability: the state landed in the store before the actor vanished.
    assert!(store.contains("role_counter", id.raw()));
    assert_eq!(manager.metrics().snapshot().actors_evicted, 1);

    // A re-acquire builds a fresh actor that sees the persisted value.
    let fresh = manager.get_or_create(id).await;
    assert!(!Arc::ptr_eq(&actor, &fresh));
    let agent = fresh.agent::<CounterAgent>().await.expect("reactivate");
    assert_eq!(agent.ask(|a, c| a.add(c, 0)).await, 5);
}

#[tokio::test]
async fn hot_window_lookup_reuses_the_cached_actor() {
    let clock = ManualClock::new(1_000_000);
    let store = Arc::new(MemoryStateStore::new());
    let manager = common::lifecycle_manager(&clock, &store);

    let id = role(1);
    let first = manager.get_or_create(id).await;
    clock.advance_ms(5 * MINUTE_MS);
    let second = manager.get_or_create(id).await;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.metrics().snapshot().actors_created, 1);
}

#[tokio::test]
async fn failed_save_defers_eviction_until_the_store_recovers() {
    let clock = ManualClock::new(1_000_000);
    let store = Arc::new(MemoryStateStore::new());
    let manager = common::lifecycle_manager(&clock, &store);

    let id = role(9);
    let actor = manager.get_or_create(id).await;
    let agent = actor.agent::<CounterAgent>().await.expect("activate");
    agent.ask(|a, c| a.add(c, 3)).await;

    store.set_fail_writes(true);
    clock.advance_ms(20 * MINUTE_MS);
    manager.idle_scan();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        manager.contains(id),
        "an actor with unsaved changes must not be dropped"
    );
    assert!(!store.contains("role_counter", id.raw()));

    store.set_fail_writes(false);
    clock.advance_ms(20 * MINUTE_MS);
    manager.idle_scan();
    common::wait_until(|| !manager.contains(id)).await;
    assert!(store.contains("role_counter", id.raw()));
}

#[tokio::test]
async fn non_quiescent_actor_is_not_reaped() {
    let clock = ManualClock::new(1_000_000);
    let store = Arc::new(MemoryStateStore::new());
    let manager = common::lifecycle_manager(&clock, &store);

    let id = role(12);
    let actor = manager.get_or_create(id).await;
    let agent = actor.agent::<CounterAgent>().await.expect("activate");
    agent.ask(|_, c| c.hold_active(true)).await;

    clock.advance_ms(20 * MINUTE_MS);
    manager.idle_scan();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(manager.contains(id));

    agent.ask(|_, c| c.hold_active(false)).await;
    // The deferred eviction refreshed the activity stamp, so another full
    // window has to pass.
    clock.advance_ms(20 * MINUTE_MS);
    manager.idle_scan();
    common::wait_until(|| !manager.contains(id)).await;
}

#[tokio::test]
async fn activation_failure_propagates_and_retries() {
    let clock = ManualClock::new(1_000_000);
    let store = Arc::new(MemoryStateStore::new());
    let manager = common::lifecycle_manager(&clock, &store);

    store.set_fail_reads(true);
    let actor = manager.get_or_create(role(3)).await;
    let err = actor
        .agent::<CounterAgent>()
        .await
        .expect_err("first touch must surface the store failure");
    assert!(err.is_retryable());

    // The component stayed inactive, so the next call retries cleanly.
    store.set_fail_reads(false);
    let agent = actor.agent::<CounterAgent>().await.expect("retry succeeds");
    assert_eq!(agent.ask(|a, c| a.add(c, 1)).await, 1);
}

#[tokio::test]
async fn unchanged_state_is_not_rewritten() {
    let clock = ManualClock::new(1_000_000);
    let store = Arc::new(MemoryStateStore::new());
    let manager = common::lifecycle_manager(&clock, &store);

    let actor = manager.get_or_create(role(4)).await;
    let agent = actor.agent::<CounterAgent>().await.expect("activate");
    agent.ask(|a, c| a.add(c, 1)).await;

    manager.save_all_now().await;
    let after_first = manager.metrics().snapshot();
    assert_eq!(after_first.saves_written, 1);

    // Nothing mutated since: the change detector skips the write.
    manager.save_all_now().await;
    let after_second = manager.metrics().snapshot();
    assert_eq!(after_second.saves_written, 1);
    assert!(after_second.saves_skipped > after_first.saves_skipped);
}

#[tokio::test]
async fn shutdown_saves_everything_and_drains_the_directory() {
    let clock = ManualClock::new(1_000_000);
    let store = Arc::new(MemoryStateStore::new());
    let manager = common::lifecycle_manager(&clock, &store);

    for n in [100u64, 101, 102] {
        let actor = manager.get_or_create(role(n)).await;
        let agent = actor.agent::<CounterAgent>().await.expect("activate");
        agent.ask(move |a, c| a.add(c, n as i64)).await;
    }

    manager.shutdown().await;
    assert!(manager.is_empty());
    for n in [100u64, 101, 102] {
        assert!(store.contains("role_counter", role(n).raw()));
    }
}

#[tokio::test]
async fn timer_save_persists_in_batches() {
    let clock = ManualClock::new(1_000_000);
    let store = Arc::new(MemoryStateStore::new());
    let manager = common::lifecycle_manager(&clock, &store);

    let actor = manager.get_or_create(role(60)).await;
    let agent = actor.agent::<CounterAgent>().await.expect("activate");
    agent.ask(|a, c| a.add(c, 2)).await;

    manager.timer_save().await;
    assert!(store.contains("role_counter", role(60).raw()));
}
