//! Test doubles and common utilities for contract tests
//!
//! This module provides minimal test doubles that verify engine contracts
//! without talking to a real library portal.

#![allow(dead_code)]

use loanwatch_core::config::EngineConfig;
use loanwatch_core::error::{AuthError, Error, Result};
use loanwatch_core::model::{Account, ActivityCounts, CoarseRecord, DetailRecord};
use loanwatch_core::traits::{ExtensionResult, LibraryService, StateStore};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Portal contents served by [`MockLibraryService`]
#[derive(Default)]
struct Portal {
    accounts: Vec<Account>,
    activities: HashMap<String, ActivityCounts>,
    details: HashMap<String, Vec<DetailRecord>>,
    overview: Vec<CoarseRecord>,
    fail_login: bool,
    fail_memberships: bool,
    malformed_activities: bool,
    fail_details: HashSet<String>,
    fail_overview: bool,
    fail_extend: HashSet<String>,
    login_delay: Duration,
}

/// A mock LibraryService that serves configurable records and tracks calls
pub struct MockLibraryService {
    portal: Arc<Mutex<Portal>>,
    /// Call counter for login()
    login_call_count: Arc<AtomicUsize>,
    /// Call counter for loan_details()
    details_call_count: Arc<AtomicUsize>,
    /// Recorded (account_id, extend_ids) batches
    extend_calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl MockLibraryService {
    pub fn new() -> Self {
        Self {
            portal: Arc::new(Mutex::new(Portal::default())),
            login_call_count: Arc::new(AtomicUsize::new(0)),
            details_call_count: Arc::new(AtomicUsize::new(0)),
            extend_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a new MockLibraryService that shares state and counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            portal: Arc::clone(&other.portal),
            login_call_count: Arc::clone(&other.login_call_count),
            details_call_count: Arc::clone(&other.details_call_count),
            extend_calls: Arc::clone(&other.extend_calls),
        }
    }

    /// Add an account with the given activity counters
    pub fn with_account(self, account: Account, activity: ActivityCounts) -> Self {
        {
            let mut portal = self.portal.lock().unwrap();
            portal.activities.insert(account.id.clone(), activity);
            portal.accounts.push(account);
        }
        self
    }

    /// Replace the detail records served for an account
    pub fn set_details(&self, account_id: &str, records: Vec<DetailRecord>) {
        self.portal
            .lock()
            .unwrap()
            .details
            .insert(account_id.to_string(), records);
    }

    /// Replace the overview records
    pub fn set_overview(&self, records: Vec<CoarseRecord>) {
        self.portal.lock().unwrap().overview = records;
    }

    pub fn set_fail_login(&self, fail: bool) {
        self.portal.lock().unwrap().fail_login = fail;
    }

    pub fn set_fail_memberships(&self, fail: bool) {
        self.portal.lock().unwrap().fail_memberships = fail;
    }

    pub fn set_fail_details(&self, account_id: &str) {
        self.portal
            .lock()
            .unwrap()
            .fail_details
            .insert(account_id.to_string());
    }

    pub fn clear_fail_details(&self, account_id: &str) {
        self.portal.lock().unwrap().fail_details.remove(account_id);
    }

    /// Serve an activity payload that does not parse
    pub fn set_malformed_activities(&self, malformed: bool) {
        self.portal.lock().unwrap().malformed_activities = malformed;
    }

    pub fn set_fail_overview(&self, fail: bool) {
        self.portal.lock().unwrap().fail_overview = fail;
    }

    pub fn set_fail_extend(&self, account_id: &str) {
        self.portal
            .lock()
            .unwrap()
            .fail_extend
            .insert(account_id.to_string());
    }

    /// Make login() take this long, to widen race windows
    pub fn set_login_delay(&self, delay: Duration) {
        self.portal.lock().unwrap().login_delay = delay;
    }

    /// Get the number of times login() was called
    pub fn login_call_count(&self) -> usize {
        self.login_call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times loan_details() was called
    pub fn details_call_count(&self) -> usize {
        self.details_call_count.load(Ordering::SeqCst)
    }

    /// Get the recorded extension batches
    pub fn extend_calls(&self) -> Vec<(String, Vec<String>)> {
        self.extend_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LibraryService for MockLibraryService {
    async fn login(&self) -> Result<()> {
        self.login_call_count.fetch_add(1, Ordering::SeqCst);
        let (delay, fail) = {
            let portal = self.portal.lock().unwrap();
            (portal.login_delay, portal.fail_login)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(AuthError::CredentialsRejected(401).into());
        }
        Ok(())
    }

    async fn memberships(&self) -> Result<Vec<Account>> {
        let portal = self.portal.lock().unwrap();
        if portal.fail_memberships {
            return Err(Error::fetch("memberships: status 500"));
        }
        Ok(portal.accounts.clone())
    }

    async fn activities(&self, account: &Account) -> Result<ActivityCounts> {
        let portal = self.portal.lock().unwrap();
        if portal.malformed_activities {
            return Err(Error::parse("activity payload is not an object"));
        }
        Ok(portal
            .activities
            .get(&account.id)
            .copied()
            .unwrap_or_default())
    }

    async fn loan_details(&self, account: &Account) -> Result<Vec<DetailRecord>> {
        self.details_call_count.fetch_add(1, Ordering::SeqCst);
        let portal = self.portal.lock().unwrap();
        if portal.fail_details.contains(&account.id) {
            return Err(Error::fetch(format!("details {}: status 502", account.id)));
        }
        Ok(portal.details.get(&account.id).cloned().unwrap_or_default())
    }

    async fn loan_overview(&self) -> Result<Vec<CoarseRecord>> {
        let portal = self.portal.lock().unwrap();
        if portal.fail_overview {
            return Err(Error::fetch("overview: timed out"));
        }
        Ok(portal.overview.clone())
    }

    async fn extend_batch(&self, account_id: &str, extend_ids: &[String]) -> Result<ExtensionResult> {
        self.extend_calls
            .lock()
            .unwrap()
            .push((account_id.to_string(), extend_ids.to_vec()));
        if self.portal.lock().unwrap().fail_extend.contains(account_id) {
            return Err(Error::fetch(format!("renewal form for {}: status 500", account_id)));
        }
        Ok(ExtensionResult::Submitted {
            extended: extend_ids.len(),
            status: 200,
        })
    }

    fn service_name(&self) -> &'static str {
        "mock"
    }
}

/// A mock StateStore that tracks calls
pub struct MockStateStore {
    /// Call counter for get()
    get_call_count: Arc<AtomicUsize>,
    /// Call counter for set()
    set_call_count: Arc<AtomicUsize>,
    /// Call counter for flush()
    flush_call_count: Arc<AtomicUsize>,
    /// Stored values
    state: Arc<Mutex<HashMap<String, serde_json::Value>>>,
}

impl MockStateStore {
    pub fn new() -> Self {
        Self {
            get_call_count: Arc::new(AtomicUsize::new(0)),
            set_call_count: Arc::new(AtomicUsize::new(0)),
            flush_call_count: Arc::new(AtomicUsize::new(0)),
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the number of times get() was called
    pub fn get_call_count(&self) -> usize {
        self.get_call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times set() was called
    pub fn set_call_count(&self) -> usize {
        self.set_call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times flush() was called
    pub fn flush_call_count(&self) -> usize {
        self.flush_call_count.load(Ordering::SeqCst)
    }

    /// Raw stored value
    pub fn value(&self, key: &str) -> Option<serde_json::Value> {
        self.state.lock().unwrap().get(key).cloned()
    }

    /// Create a new MockStateStore that shares counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            get_call_count: Arc::clone(&other.get_call_count),
            set_call_count: Arc::clone(&other.set_call_count),
            flush_call_count: Arc::clone(&other.flush_call_count),
            state: Arc::clone(&other.state),
        }
    }
}

#[async_trait::async_trait]
impl StateStore for MockStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.get_call_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.set_call_count.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.state.lock().unwrap().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().keys().cloned().collect())
    }

    async fn flush(&self) -> Result<()> {
        self.flush_call_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An account fixture
pub fn account(id: &str, name: &str, library: &str) -> Account {
    Account {
        id: id.to_string(),
        name: name.to_string(),
        library_name: library.to_string(),
        barcode: format!("2{}", id.len()),
        region: "oost-vlaanderen".to_string(),
        has_error: false,
    }
}

/// Activity counters with `loans` items on loan
pub fn activity(loans: u32) -> ActivityCounts {
    ActivityCounts {
        loans,
        reservations: 0,
        open_amount: 0.0,
    }
}

/// A renewable detail record
pub fn detail(title: &str, days: i64, extend_id: Option<&str>) -> DetailRecord {
    DetailRecord {
        title: title.to_string(),
        days_remaining: days,
        extend_id: extend_id.map(str::to_string),
        ..Default::default()
    }
}

/// An overview record due `due_in` days from today
pub fn coarse(title: &str, account_name: &str, due_in: i64) -> CoarseRecord {
    let due = loanwatch_core::days::today() + chrono::Duration::days(due_in);
    CoarseRecord {
        title: title.to_string(),
        due_date: Some(due.format("%Y-%m-%d").to_string()),
        account_name: Some(account_name.to_string()),
        ..Default::default()
    }
}

/// Engine settings suitable for tests
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        poll_interval_secs: 3600,
        warning_threshold_days: 7,
        request_timeout_secs: 5,
        extension_settle_secs: 0,
        event_channel_capacity: 100,
    }
}
