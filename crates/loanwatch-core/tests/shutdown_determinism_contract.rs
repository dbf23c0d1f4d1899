//! Contract Test: Scheduling & Shutdown Determinism
//!
//! This test verifies that the scheduler refreshes on its interval and
//! that shutdown is deterministic and complete.
//!
//! Constraints verified:
//! - The scheduler refreshes immediately and then once per interval
//! - Changing the interval at runtime restarts the schedule
//! - Engine terminates on shutdown signal, even mid-refresh
//! - State is flushed before exit
//!
//! If this test fails, someone has added:
//! - Detached background tasks
//! - Tasks that ignore cancellation
//! - Blocking operations in the shutdown path

mod common;

use common::*;
use loanwatch_core::{EngineEvent, LoanEngine};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn shutdown_signal_terminates_engine() {
    let service = MockLibraryService::new();
    let (engine, mut event_rx) = LoanEngine::new(
        Box::new(service),
        Box::new(MockStateStore::new()),
        &test_engine_config(),
    )
    .expect("engine construction succeeds");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    // Wait for startup
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(shutdown_tx.send(()).is_ok(), "shutdown signal send succeeds");

    let result = tokio::time::timeout(Duration::from_secs(5), engine_handle).await;
    assert!(result.is_ok(), "Engine should terminate within 5 seconds");
    let engine_result = result.unwrap().unwrap();
    assert!(
        engine_result.is_ok(),
        "Engine should shut down successfully: {:?}",
        engine_result
    );

    let mut saw_started = false;
    let mut saw_stopped = false;
    while let Ok(event) = event_rx.try_recv() {
        match event {
            EngineEvent::Started { poll_interval_secs } => {
                assert_eq!(poll_interval_secs, 3600);
                saw_started = true;
            }
            EngineEvent::Stopped { .. } => saw_stopped = true,
            _ => {}
        }
    }
    assert!(saw_started && saw_stopped);
}

#[tokio::test]
async fn shutdown_flushes_state() {
    let store = MockStateStore::new();
    let (engine, _event_rx) = LoanEngine::new(
        Box::new(MockLibraryService::new()),
        Box::new(MockStateStore::sharing_counters_with(&store)),
        &test_engine_config(),
    )
    .expect("engine construction succeeds");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let flushes_before = store.flush_call_count();

    shutdown_tx.send(()).unwrap();
    engine_handle.await.unwrap().unwrap();

    assert_eq!(
        store.flush_call_count(),
        flushes_before + 1,
        "StateStore::flush() should be called exactly once on shutdown"
    );
}

#[tokio::test]
async fn scheduler_refreshes_on_interval() {
    let service = MockLibraryService::new().with_account(account("acc-1", "Jan", "Gent"), activity(0));
    let (engine, _event_rx) = LoanEngine::new(
        Box::new(MockLibraryService::sharing_counters_with(&service)),
        Box::new(MockStateStore::new()),
        &test_engine_config(),
    )
    .expect("engine construction succeeds");
    let engine = engine.with_poll_interval(Duration::from_millis(50));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_millis(180)).await;
    shutdown_tx.send(()).unwrap();
    engine_handle.await.unwrap().unwrap();

    let cycles = service.login_call_count();
    assert!(
        (3..=5).contains(&cycles),
        "Expected an immediate refresh plus one per 50ms, got {}",
        cycles
    );
}

#[tokio::test]
async fn interval_change_restarts_schedule() {
    let service = MockLibraryService::new().with_account(account("acc-1", "Jan", "Gent"), activity(0));
    let (engine, _event_rx) = LoanEngine::new(
        Box::new(MockLibraryService::sharing_counters_with(&service)),
        Box::new(MockStateStore::new()),
        &test_engine_config(),
    )
    .expect("engine construction succeeds");
    let engine = Arc::new(engine);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let engine_handle = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await })
    };

    // Only the immediate refresh happens at a one hour interval
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.login_call_count(), 1);

    engine
        .set_poll_interval(Duration::from_millis(40))
        .expect("valid interval");
    tokio::time::sleep(Duration::from_millis(150)).await;

    shutdown_tx.send(()).unwrap();
    engine_handle.await.unwrap().unwrap();

    assert!(
        service.login_call_count() >= 3,
        "Shorter interval should have produced more refreshes, got {}",
        service.login_call_count()
    );
}

#[tokio::test]
async fn shutdown_during_refresh() {
    let service = MockLibraryService::new().with_account(account("acc-1", "Jan", "Gent"), activity(0));
    service.set_login_delay(Duration::from_millis(200));

    let (engine, _event_rx) = LoanEngine::new(
        Box::new(MockLibraryService::sharing_counters_with(&service)),
        Box::new(MockStateStore::new()),
        &test_engine_config(),
    )
    .expect("engine construction succeeds");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let engine_handle =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    // The immediate refresh is now sleeping in login
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), engine_handle).await;
    assert!(
        result.is_ok(),
        "Engine should terminate within 5 seconds even during a refresh"
    );
}
