//! # lsmkv
//!
//! An embeddable, persistent key-value store over `u64` keys built on a
//! **leveled Log-Structured Merge Tree (LSM-tree)**. Writes are buffered
//! in memory, flushed as immutable sorted tables and merged down a
//! hierarchy of capacity-bounded levels.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lsmkv::{Store, StoreConfig};
//!
//! let store = Store::open("/tmp/my_store", StoreConfig::default()).unwrap();
//!
//! // Write
//! store.put(1, b"hello").unwrap();
//!
//! // Read
//! assert_eq!(store.get(1).unwrap(), Some(b"hello".to_vec()));
//!
//! // Delete
//! assert!(store.del(1).unwrap());
//! assert_eq!(store.get(1).unwrap(), None);
//!
//! // Graceful shutdown (flushes the write buffer)
//! store.close().unwrap();
//! ```
//!
//! ## Features
//!
//! - **Leveled compaction**: level 0 holds two tables, level `L ≥ 1`
//!   holds `2^(L+1)` disjoint tables; overflow cascades downwards.
//! - **Generation ordering**: the freshest copy of a key is the one in
//!   the table with the greatest generation stamp, at any level.
//! - **Bloom filters**: every table carries one, so negative lookups
//!   rarely touch the disk.
//! - **Validated on open**: every table index is checked before use and
//!   staged or parked leftovers of a layout change are swept.
//!
//! There is no write-ahead log: entries still in the write buffer are
//! lost if the process dies before [`Store::close`] or [`Store::flush`].

#![allow(dead_code)]

pub(crate) mod bloom;
pub(crate) mod compaction;
pub(crate) mod encoding;
pub(crate) mod engine;
pub(crate) mod levels;
pub(crate) mod memtable;
pub(crate) mod sstable;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use engine::{Engine, EngineConfig, EngineError, EngineStats};
use thiserror::Error;
use tracing::info;

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Store`] instance.
///
/// All fields have defaults via [`StoreConfig::default()`]. The
/// configuration is validated when passed to [`Store::open`].
///
/// # Example
///
/// ```rust
/// use lsmkv::StoreConfig;
///
/// // Defaults: 2 MiB tables, no entry cap, tombstones purged
/// let config = StoreConfig::default();
///
/// // Or customize
/// let config = StoreConfig {
///     max_entries_per_table: Some(1024),
///     ..StoreConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum serialized size of any table in bytes, including its fixed
    /// header, bloom filter and index arrays.
    ///
    /// Default: 2 MiB. Must leave room for one entry holding a tombstone
    /// (so `del` always fits) and fit in `u32`, since value offsets are
    /// stored as `u32`.
    pub table_size_limit: usize,

    /// Optional cap on the number of entries per table.
    ///
    /// Default: `None`. `Some(0)` is rejected.
    pub max_entries_per_table: Option<usize>,

    /// Drop tombstones during compaction once no deeper level can hold an
    /// older copy of the key.
    ///
    /// Default: `true`.
    pub purge_tombstones: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            table_size_limit: engine.table_size_limit,
            max_entries_per_table: engine.max_entries_per_table,
            purge_tombstones: engine.purge_tombstones,
        }
    }
}

impl StoreConfig {
    /// Validates all configuration parameters.
    fn validate(&self) -> Result<(), StoreError> {
        let min = sstable::index_region_size(1) + sstable::TOMBSTONE.len();
        if self.table_size_limit < min {
            return Err(StoreError::InvalidConfig(format!(
                "table_size_limit must be >= {min}"
            )));
        }
        if u32::try_from(self.table_size_limit).is_err() {
            return Err(StoreError::InvalidConfig(
                "table_size_limit must fit in u32".into(),
            ));
        }
        if self.max_entries_per_table == Some(0) {
            return Err(StoreError::InvalidConfig(
                "max_entries_per_table must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Converts to the internal engine configuration.
    fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            table_size_limit: self.table_size_limit,
            max_entries_per_table: self.max_entries_per_table,
            purge_tombstones: self.purge_tombstones,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Store`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Value constraint violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An engine-internal error occurred.
    #[error("{0}")]
    Engine(#[from] EngineError),
}

// ------------------------------------------------------------------------------------------------
// Statistics
// ------------------------------------------------------------------------------------------------

/// Point-in-time statistics returned by [`Store::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Generation the next flushed table will be stamped with.
    pub generation: u64,

    /// Entries currently held by the write buffer.
    pub buffered_entries: usize,

    /// Projected serialized size of the write buffer in bytes.
    pub buffered_bytes: usize,

    /// Number of tables per level, level 0 first.
    pub level_tables: Vec<usize>,

    /// Generation stamp of every table, per level.
    pub table_generations: Vec<Vec<u64>>,
}

impl From<EngineStats> for StoreStats {
    fn from(s: EngineStats) -> Self {
        Self {
            generation: s.generation,
            buffered_entries: s.buffered_entries,
            buffered_bytes: s.buffered_bytes,
            level_tables: s.level_tables,
            table_generations: s.table_generations,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Store handle
// ------------------------------------------------------------------------------------------------

/// The main store handle.
///
/// # Thread safety
///
/// `Store` is `Send + Sync`. Every operation takes the engine's single
/// lock for its whole duration, so calls are serialized; compaction runs
/// inline inside the `put` (or `flush`) that triggers it.
///
/// # Shutdown
///
/// Call [`Store::close`] to flush the write buffer. If the handle is
/// dropped without calling `close`, the destructor attempts the same,
/// ignoring errors.
pub struct Store {
    engine: Engine,
    closed: AtomicBool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens (or creates) a store at the given directory.
    ///
    /// On a fresh directory `level-0` is created. On an existing directory
    /// every level is loaded and validated, and the generation counter
    /// resumes one past the highest generation found.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if any configuration parameter
    /// is out of range, or [`StoreError::Engine`] if the directory holds
    /// malformed tables.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let engine = Engine::open(&path, config.to_engine_config())?;

        info!(path = %path.as_ref().display(), "store opened");

        Ok(Self {
            engine,
            closed: AtomicBool::new(false),
        })
    }

    /// Flushes the write buffer and closes the handle.
    ///
    /// Subsequent operations return [`StoreError::Closed`]. Calling
    /// `close` more than once is harmless.
    pub fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.engine.close()?;

        info!("store closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Write operations
    // --------------------------------------------------------------------------------------------

    /// Inserts or overwrites `key`.
    ///
    /// If the write buffer cannot take the entry it is flushed first,
    /// possibly running a compaction before this call returns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] if `value` is empty, equals
    /// the reserved tombstone value, or is too large for one table.
    pub fn put(&self, key: u64, value: &[u8]) -> Result<(), StoreError> {
        self.check_open()?;

        if value.is_empty() {
            return Err(StoreError::InvalidArgument("value must not be empty".into()));
        }
        if sstable::is_tombstone(value) {
            return Err(StoreError::InvalidArgument(
                "value equals the reserved tombstone marker".into(),
            ));
        }

        self.engine.put(key, value).map_err(argument_error)
    }

    /// Deletes `key` by writing a tombstone.
    ///
    /// Returns `false` (and writes nothing) if the key does not exist.
    pub fn del(&self, key: u64) -> Result<bool, StoreError> {
        self.check_open()?;
        self.engine.del(key).map_err(argument_error)
    }

    /// Discards every entry, in memory and on disk.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.check_open()?;
        self.engine.reset()?;
        Ok(())
    }

    /// Forces the write buffer to disk.
    ///
    /// Returns `false` if the buffer was empty.
    pub fn flush(&self) -> Result<bool, StoreError> {
        self.check_open()?;
        Ok(self.engine.flush()?)
    }

    // --------------------------------------------------------------------------------------------
    // Read operations
    // --------------------------------------------------------------------------------------------

    /// Retrieves the value associated with `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist or has been deleted.
    pub fn get(&self, key: u64) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_open()?;
        Ok(self.engine.get(key)?)
    }

    /// Returns a snapshot of store statistics.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        self.check_open()?;
        Ok(self.engine.stats()?.into())
    }

    // --------------------------------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------------------------------

    /// Returns `Err(StoreError::Closed)` if the store has been closed.
    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

/// Surfaces engine-side argument rejections as [`StoreError::InvalidArgument`].
fn argument_error(e: EngineError) -> StoreError {
    match e {
        EngineError::InvalidArgument(msg) => StoreError::InvalidArgument(msg),
        other => other.into(),
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            let _ = self.engine.close();
        }
    }
}
