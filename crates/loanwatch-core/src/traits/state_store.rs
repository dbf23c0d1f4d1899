// # State Store Trait
//
// Defines the interface for persistent key-value state.
//
// ## Purpose
//
// The state store carries data across refresh cycles and restarts:
// - The latest [`Snapshot`](crate::model::Snapshot), which is the
//   predecessor for the next change-detection pass
// - The renewal identifiers and source pages inside it, which the
//   extension coordinator needs after a restart
//
// Values are JSON; typed access goes through [`StateStoreExt`].
//
// ## Implementations
//
// - Memory: `MemoryStateStore`
// - File-based: `FileStateStore` (JSON with backup)
//
// ## Usage
//
// ```rust,ignore
// use loanwatch_core::{StateStore, StateStoreExt};
//
// let store = /* StateStore implementation */;
// store.set_json("snapshot", &snapshot).await?;
// let previous: Option<Snapshot> = store.get_json("snapshot").await?;
// ```

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Key under which the latest snapshot is persisted
pub const SNAPSHOT_KEY: &str = "snapshot";

/// Trait for state store implementations
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// ## Allowed
/// - ✅ Perform I/O for persistent storage (files, databases, etc.)
/// - ✅ Cache state in memory (with explicit flush)
///
/// ## Forbidden
/// - ❌ Interpret the stored values (owned by `LoanEngine`)
/// - ❌ Spawn background tasks; periodic work belongs to the engine
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a value
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))`: The stored value
    /// - `Ok(None)`: No value under this key
    /// - `Err(Error)`: Storage error
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, crate::Error>;

    /// Create or replace a value
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), crate::Error>;

    /// Delete a value (succeeds when absent)
    async fn delete(&self, key: &str) -> Result<(), crate::Error>;

    /// List all keys in the store
    async fn keys(&self) -> Result<Vec<String>, crate::Error>;

    /// Persist any pending changes
    ///
    /// Some implementations may buffer writes. This ensures
    /// all changes are flushed to persistent storage.
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Typed helpers on top of [`StateStore`]
#[async_trait]
pub trait StateStoreExt: StateStore {
    /// Get and deserialize a value
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>, crate::Error> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and set a value
    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), crate::Error> {
        let value = serde_json::to_value(value)?;
        self.set(key, value).await
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}
