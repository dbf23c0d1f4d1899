// # loanwatch-core
//
// Core library for tracking library loans across linked memberships.
//
// ## Architecture Overview
//
// - **LibraryService**: Trait for authenticated access to a library portal
// - **StateStore**: Trait for persistent state (the predecessor snapshot)
// - **LoanAggregator**: Merges overview and detail records into a Snapshot
// - **ChangeDetector**: Turns successive snapshots into edge-triggered events
// - **ExtensionCoordinator**: Selects and submits batch renewals
// - **LoanEngine**: Schedules refresh cycles and owns the event channel
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Portal specifics live behind `LibraryService`
// 2. **Pure Detection**: Change detection is a function of two snapshots
// 3. **Persist Before Notify**: Events leave the engine only after the
//    snapshot they were derived from is stored
// 4. **Library-First**: All core functionality can be used as a library

pub mod aggregator;
pub mod config;
pub mod days;
pub mod detector;
pub mod engine;
pub mod error;
pub mod extension;
pub mod model;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use aggregator::LoanAggregator;
pub use config::{EngineConfig, LoanwatchConfig, ServiceConfig, StateStoreConfig};
pub use detector::{ChangeDetector, LoanEvent};
pub use engine::{EngineEvent, LoanEngine, RefreshOutcome};
pub use error::{AuthError, Error, Result, SessionError};
pub use extension::{BatchOutcome, ExtensionCoordinator, ExtensionReport};
pub use model::{
    Account, AccountView, ActivityCounts, CoarseRecord, DetailRecord, Loan, LoanKey, LoanRecord,
    Snapshot,
};
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{ExtensionResult, LibraryService, StateStore, StateStoreExt};
