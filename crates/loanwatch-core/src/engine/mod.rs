//! Core loanwatch engine
//!
//! The LoanEngine is responsible for:
//! - Running refresh cycles on a schedule (single-flight)
//! - Diffing each new snapshot against its persisted predecessor
//! - Persisting the snapshot before any event leaves the engine
//! - Coordinating batch extensions with the refresh cycle
//!
//! ## Architecture
//!
//! ```text
//!  interval tick ──┐        extend_loans(max_days)
//!                  ▼                 │
//!           ┌──────────────┐         │
//!           │  LoanEngine  │◄────────┘
//!           └──────────────┘
//!                  │
//!     ┌────────────┼──────────────────┬────────────────────┐
//!     ▼            ▼                  ▼                    ▼
//! ┌──────────┐ ┌────────────────┐ ┌──────────────┐ ┌──────────────┐
//! │Aggregator│ │ ChangeDetector │ │  StateStore  │ │    Events    │
//! │ (fetch)  │ │    (diff)      │ │ (snapshot)   │ │   (notify)   │
//! └──────────┘ └────────────────┘ └──────────────┘ └──────────────┘
//! ```
//!
//! ## Cycle Flow
//!
//! 1. Load the previous snapshot from the StateStore
//! 2. Aggregate a new snapshot through the LibraryService
//! 3. Diff previous → current
//! 4. Persist the new snapshot
//! 5. Emit loan events, then `RefreshSucceeded`
//!
//! A cycle that fails at step 2 leaves the stored snapshot untouched, so
//! the next successful cycle still diffs against the last good state.
//!
//! Loan events wait up to [`LOAN_EVENT_SEND_TIMEOUT`] for channel room;
//! lifecycle events are dropped with a warning when the channel is full.

use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::aggregator::LoanAggregator;
use crate::config::EngineConfig;
use crate::days;
use crate::detector::{ChangeDetector, LoanEvent};
use crate::error::{Error, Result};
use crate::extension::{ExtensionCoordinator, ExtensionReport};
use crate::model::Snapshot;
use crate::traits::{LibraryService, SNAPSHOT_KEY, StateStore, StateStoreExt};

/// How long a loan event waits for a slow consumer before it is lost
pub const LOAN_EVENT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Events emitted by the LoanEngine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        poll_interval_secs: u64,
    },

    /// A loan state transition
    Loan(LoanEvent),

    /// A refresh cycle completed and its snapshot was stored
    RefreshSucceeded {
        loan_count: usize,
        min_days: Option<i64>,
    },

    /// A refresh cycle aborted
    RefreshFailed {
        error: String,
    },

    /// An extension run finished
    ExtensionCompleted {
        extended: usize,
        failed_batches: usize,
    },

    /// Engine stopped
    Stopped {
        reason: String,
    },
}

/// Result of a [`LoanEngine::refresh`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A cycle ran and its snapshot was stored
    Completed {
        loan_count: usize,
        events: usize,
    },
    /// Another cycle was already running; this request was dropped
    Skipped,
}

/// Run one aggregation + detection pass
///
/// The previous snapshot is passed in explicitly and the new one is handed
/// back; nothing is read from or written to a store here.
///
/// # Parameters
///
/// - `service`: The library service
/// - `detector`: Configured change detector
/// - `previous`: Predecessor snapshot, if any
/// - `today`: Local calendar date for due-date arithmetic
pub async fn run_cycle(
    service: &dyn LibraryService,
    detector: &ChangeDetector,
    previous: Option<&Snapshot>,
    today: NaiveDate,
) -> Result<(Snapshot, Vec<LoanEvent>)> {
    let snapshot = LoanAggregator::new(service).aggregate(today).await?;
    let events = detector.diff(previous, &snapshot);
    Ok((snapshot, events))
}

/// Core loanwatch engine
///
/// ## Lifecycle
///
/// 1. Create with [`LoanEngine::new()`]
/// 2. Start with [`LoanEngine::run()`]
/// 3. Engine runs until shutdown signal received
/// 4. Drop to cleanup
///
/// ## Concurrency
///
/// `refresh()` and `extend_loans()` take `&self`, so the engine can sit in
/// an `Arc` and be driven from the scheduler and an event consumer at the
/// same time. One internal lock serializes cycles and extension runs:
/// - `refresh()` never waits for it; a concurrent call is dropped
/// - `extend_loans()` waits for it, then releases it before the
///   follow-up refresh
///
/// ## Load Resistance
///
/// - **Bounded event channel**: Prevents unbounded memory growth
/// - **Event dropping**: When the channel is full, new events are dropped (logged)
pub struct LoanEngine {
    /// Library service for fetching and renewing
    service: Box<dyn LibraryService>,

    /// State store for the predecessor snapshot
    state_store: Box<dyn StateStore>,

    detector: ChangeDetector,

    /// Current poll interval; a change restarts the scheduler's interval
    poll_interval: watch::Sender<Duration>,

    /// Delay between a successful extension and the follow-up refresh
    extension_settle: Duration,

    /// Held for the duration of a cycle or an extension run
    cycle_lock: Mutex<()>,

    /// False after a failed cycle, until the next success
    available: AtomicBool,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl LoanEngine {
    /// Create a new loanwatch engine
    ///
    /// # Parameters
    ///
    /// - `service`: Library service implementation
    /// - `state_store`: State store implementation
    /// - `config`: Engine configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        service: Box<dyn LibraryService>,
        state_store: Box<dyn StateStore>,
        config: &EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let (poll_interval, _) = watch::channel(config.poll_interval());

        let engine = Self {
            service,
            state_store,
            detector: ChangeDetector::new(config.warning_threshold_days),
            poll_interval,
            extension_settle: config.extension_settle(),
            cycle_lock: Mutex::new(()),
            available: AtomicBool::new(true),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Override the initial poll interval with sub-second precision
    pub fn with_poll_interval(self, period: Duration) -> Self {
        self.poll_interval.send_replace(period);
        self
    }

    /// Override the extension settle delay with sub-second precision
    pub fn with_extension_settle(mut self, delay: Duration) -> Self {
        self.extension_settle = delay;
        self
    }

    /// Change the poll interval at runtime
    ///
    /// A running scheduler cancels its current interval and starts a new one
    /// with this period; the next refresh is one full period away.
    pub fn set_poll_interval(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(Error::config("Poll interval must be > 0"));
        }
        let previous = self.poll_interval.send_replace(period);
        info!("Poll interval changed: {:?} -> {:?}", previous, period);
        Ok(())
    }

    /// The current poll interval
    pub fn poll_interval(&self) -> Duration {
        *self.poll_interval.borrow()
    }

    /// Whether the last cycle succeeded
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// The most recently stored snapshot
    pub async fn latest_snapshot(&self) -> Result<Option<Snapshot>> {
        self.state_store.get_json(SNAPSHOT_KEY).await
    }

    /// Run one refresh cycle unless one is already running
    ///
    /// # Returns
    ///
    /// - `Ok(RefreshOutcome::Completed { .. })`: Snapshot stored, events emitted
    /// - `Ok(RefreshOutcome::Skipped)`: Another cycle holds the lock
    /// - `Err(Error)`: The cycle aborted; `RefreshFailed` was emitted
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("Refresh already in progress, dropping request");
            return Ok(RefreshOutcome::Skipped);
        };

        match self.refresh_locked().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Refresh cycle failed: {}", e);
                self.available.store(false, Ordering::SeqCst);
                self.emit_event(EngineEvent::RefreshFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn refresh_locked(&self) -> Result<RefreshOutcome> {
        let previous = self.load_previous().await;

        let (snapshot, events) = run_cycle(
            self.service.as_ref(),
            &self.detector,
            previous.as_ref(),
            days::today(),
        )
        .await?;

        self.state_store.set_json(SNAPSHOT_KEY, &snapshot).await?;
        self.state_store.flush().await?;

        if !self.available.swap(true, Ordering::SeqCst) {
            info!("Library service available again");
        }

        let event_count = events.len();
        for event in events {
            debug!("Loan event: {}", event.kind());
            self.emit_loan_event(event).await;
        }

        self.emit_event(EngineEvent::RefreshSucceeded {
            loan_count: snapshot.loan_count(),
            min_days: snapshot.min_days_remaining(),
        });

        Ok(RefreshOutcome::Completed {
            loan_count: snapshot.loan_count(),
            events: event_count,
        })
    }

    /// Predecessor snapshot; an unreadable one counts as absent
    async fn load_previous(&self) -> Option<Snapshot> {
        match self.state_store.get_json::<Snapshot>(SNAPSHOT_KEY).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Stored snapshot unreadable, treating as absent: {}", e);
                None
            }
        }
    }

    /// Renew every eligible loan with at most `max_days` remaining
    ///
    /// Waits for an in-flight refresh, selects from the stored snapshot and
    /// submits one batch per account. After at least one success the engine
    /// waits the settle delay and refreshes.
    pub async fn extend_loans(&self, max_days: i64) -> Result<ExtensionReport> {
        let report = {
            let _guard = self.cycle_lock.lock().await;

            let Some(snapshot) = self.load_previous().await else {
                info!("No snapshot stored yet, nothing to extend");
                return Ok(ExtensionReport::default());
            };

            ExtensionCoordinator::new(self.service.as_ref())
                .extend(&snapshot, max_days)
                .await
        };

        let failed_batches = report.batches.iter().filter(|b| b.error.is_some()).count();
        info!(
            "Extension finished: {} loan(s) extended, {} batch(es) failed",
            report.total_extended, failed_batches
        );
        self.emit_event(EngineEvent::ExtensionCompleted {
            extended: report.total_extended,
            failed_batches,
        });

        if report.total_extended > 0 {
            debug!(
                "Waiting {:?} for the service to settle before refreshing",
                self.extension_settle
            );
            tokio::time::sleep(self.extension_settle).await;
            if let Err(e) = self.refresh().await {
                warn!("Refresh after extension failed: {}", e);
            }
        }

        Ok(report)
    }

    /// Run the scheduler
    ///
    /// Refreshes immediately, then once per poll interval, until SIGINT.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Fatal error
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let mut interval_rx = self.poll_interval.subscribe();
        self.emit_event(EngineEvent::Started {
            poll_interval_secs: interval_rx.borrow().as_secs(),
        });

        let shutdown = async move {
            match shutdown_rx {
                // Test mode: wait for provided shutdown signal
                Some(rx) => {
                    let _ = rx.await;
                }
                // Production mode: wait for SIGINT
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for shutdown signal: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        let mut start = Instant::now();
        'schedule: loop {
            let period = *interval_rx.borrow_and_update();
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("Scheduling refresh every {:?}", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh().await {
                            // Already reported; keep running
                            debug!("Scheduled refresh failed: {}", e);
                        }
                    }

                    changed = interval_rx.changed() => {
                        if changed.is_ok() {
                            start = Instant::now() + *interval_rx.borrow();
                            continue 'schedule;
                        }
                    }

                    _ = &mut shutdown => {
                        info!("Shutdown signal received");
                        self.emit_event(EngineEvent::Stopped {
                            reason: "Shutdown signal".to_string(),
                        });
                        break 'schedule;
                    }
                }
            }
        }

        // Flush state before exiting
        self.state_store.flush().await?;
        info!("State flushed, engine stopped");

        Ok(())
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }

    /// Send a loan event, waiting for channel room
    ///
    /// Holds the cycle lock while waiting, so the wait is bounded.
    async fn emit_loan_event(&self, event: LoanEvent) {
        let kind = event.kind();
        match self
            .event_tx
            .send_timeout(EngineEvent::Loan(event), LOAN_EVENT_SEND_TIMEOUT)
            .await
        {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                error!(
                    "Event consumer stalled for {:?}, loan event {} lost",
                    LOAN_EVENT_SEND_TIMEOUT, kind
                );
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!("Event receiver dropped, discarding loan event {}", kind);
            }
        }
    }

    /// Run the scheduler with a controlled shutdown signal
    ///
    /// Stops when `shutdown_rx` fires or its sender is dropped. With `None`
    /// this behaves like [`run`](Self::run).
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Account, ActivityCounts, CoarseRecord, DetailRecord};
    use crate::state::MemoryStateStore;
    use crate::traits::ExtensionResult;
    use async_trait::async_trait;

    struct OneLoanService {
        days: i64,
    }

    #[async_trait]
    impl LibraryService for OneLoanService {
        async fn login(&self) -> Result<()> {
            Ok(())
        }

        async fn memberships(&self) -> Result<Vec<Account>> {
            Ok(vec![Account {
                id: "acc-1".to_string(),
                name: "Jan".to_string(),
                library_name: "Gent".to_string(),
                barcode: "1".to_string(),
                region: String::new(),
                has_error: false,
            }])
        }

        async fn activities(&self, _account: &Account) -> Result<ActivityCounts> {
            Ok(ActivityCounts {
                loans: 1,
                ..Default::default()
            })
        }

        async fn loan_details(&self, _account: &Account) -> Result<Vec<DetailRecord>> {
            Ok(vec![DetailRecord {
                title: "Boek".to_string(),
                days_remaining: self.days,
                extend_id: Some("x1".to_string()),
                ..Default::default()
            }])
        }

        async fn loan_overview(&self) -> Result<Vec<CoarseRecord>> {
            Ok(Vec::new())
        }

        async fn extend_batch(&self, _account_id: &str, ids: &[String]) -> Result<ExtensionResult> {
            Ok(ExtensionResult::Submitted {
                extended: ids.len(),
                status: 200,
            })
        }

        fn service_name(&self) -> &'static str {
            "one-loan"
        }
    }

    #[tokio::test]
    async fn test_run_cycle_threads_previous_snapshot() {
        let detector = ChangeDetector::new(7);
        let today = days::today();

        let (first, events) = run_cycle(&OneLoanService { days: 10 }, &detector, None, today)
            .await
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(first.min_days_remaining(), Some(10));

        let (_, events) = run_cycle(&OneLoanService { days: 6 }, &detector, Some(&first), today)
            .await
            .unwrap();
        let kinds: Vec<&str> = events.iter().map(LoanEvent::kind).collect();
        assert_eq!(kinds, vec!["days_changed", "loan_expiring_soon"]);
    }

    #[tokio::test]
    async fn test_refresh_persists_snapshot_and_emits() {
        let (engine, mut rx) = LoanEngine::new(
            Box::new(OneLoanService { days: 3 }),
            Box::new(MemoryStateStore::new()),
            &EngineConfig::default(),
        )
        .unwrap();

        let outcome = engine.refresh().await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome::Completed {
                loan_count: 1,
                events: 0
            }
        );
        assert!(engine.is_available());
        assert!(engine.latest_snapshot().await.unwrap().is_some());
        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::RefreshSucceeded {
                loan_count: 1,
                min_days: Some(3)
            }
        );
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let (engine, _rx) = LoanEngine::new(
            Box::new(OneLoanService { days: 3 }),
            Box::new(MemoryStateStore::new()),
            &EngineConfig::default(),
        )
        .unwrap();

        assert!(engine.set_poll_interval(Duration::ZERO).is_err());
        assert!(engine.set_poll_interval(Duration::from_secs(60)).is_ok());
        assert_eq!(engine.poll_interval(), Duration::from_secs(60));
    }
}
