//! Core traits for the loanwatch system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`LibraryService`]: Authenticated access to the library portal
//! - [`StateStore`]: Persistent key-value state across cycles and restarts

pub mod library_service;
pub mod state_store;

pub use library_service::{ExtensionResult, LibraryService};
pub use state_store::{SNAPSHOT_KEY, StateStore, StateStoreExt};
