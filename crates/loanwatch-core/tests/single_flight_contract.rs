//! Contract Test: Single-Flight Refresh
//!
//! This test verifies that refresh cycles never overlap.
//!
//! Constraints verified:
//! - A refresh arriving while one runs is dropped, not queued
//! - Two concurrent refreshes cause one login and one snapshot write
//! - Extension waits for an in-flight refresh instead of being dropped
//!
//! If this test fails, someone has allowed overlapping sessions against
//! the portal.

mod common;

use common::*;
use loanwatch_core::{LoanEngine, RefreshOutcome};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn concurrent_refreshes_run_once() {
    let service = MockLibraryService::new().with_account(account("acc-1", "Jan", "Gent"), activity(1));
    service.set_details("acc-1", vec![detail("Boek", 9, Some("x1"))]);
    service.set_login_delay(Duration::from_millis(100));

    let store = MockStateStore::new();
    let (engine, _event_rx) = LoanEngine::new(
        Box::new(MockLibraryService::sharing_counters_with(&service)),
        Box::new(MockStateStore::sharing_counters_with(&store)),
        &test_engine_config(),
    )
    .expect("engine construction succeeds");

    let (first, second) = tokio::join!(engine.refresh(), engine.refresh());
    let mut outcomes = vec![first.expect("refresh ok"), second.expect("refresh ok")];
    outcomes.sort_by_key(|o| matches!(o, RefreshOutcome::Skipped));

    assert!(matches!(outcomes[0], RefreshOutcome::Completed { loan_count: 1, .. }));
    assert_eq!(outcomes[1], RefreshOutcome::Skipped);

    assert_eq!(service.login_call_count(), 1, "exactly one login");
    assert_eq!(store.set_call_count(), 1, "exactly one snapshot write");
}

#[tokio::test]
async fn sequential_refreshes_both_run() {
    let service = MockLibraryService::new().with_account(account("acc-1", "Jan", "Gent"), activity(0));

    let store = MockStateStore::new();
    let (engine, _event_rx) = LoanEngine::new(
        Box::new(MockLibraryService::sharing_counters_with(&service)),
        Box::new(MockStateStore::sharing_counters_with(&store)),
        &test_engine_config(),
    )
    .expect("engine construction succeeds");

    engine.refresh().await.expect("first refresh");
    engine.refresh().await.expect("second refresh");

    assert_eq!(service.login_call_count(), 2);
    assert_eq!(store.set_call_count(), 2);
}

#[tokio::test]
async fn extension_waits_for_in_flight_refresh() {
    let service = MockLibraryService::new().with_account(account("acc-1", "Jan", "Gent"), activity(1));
    service.set_details("acc-1", vec![detail("Boek", 2, Some("x1"))]);

    let (engine, _event_rx) = LoanEngine::new(
        Box::new(MockLibraryService::sharing_counters_with(&service)),
        Box::new(MockStateStore::new()),
        &test_engine_config(),
    )
    .expect("engine construction succeeds");
    let engine = Arc::new(engine);

    // Seed a snapshot, then slow the next cycle down
    engine.refresh().await.expect("seed refresh");
    service.set_login_delay(Duration::from_millis(100));

    let refreshing = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.refresh().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = engine.extend_loans(3).await.expect("extension runs");
    assert_eq!(report.total_extended, 1);

    let outcome = refreshing.await.expect("task joins").expect("refresh ok");
    assert!(matches!(outcome, RefreshOutcome::Completed { .. }));
    assert_eq!(service.extend_calls().len(), 1);
}
