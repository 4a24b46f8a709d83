//! # LSM Storage Engine
//!
//! A **synchronous**, leveled LSM-tree engine over `u64` keys.
//!
//! ## Design Overview
//!
//! The engine owns three pieces of state:
//!
//! 1. **Write buffer** ([`Memtable`]): every `put` lands here first.
//! 2. **Level index** ([`LevelIndex`]): resident indexes of every table on
//!    disk, level 0 first.
//! 3. **Generation counter**: starts at 1 and advances once per buffer
//!    flush; every table is stamped with the generation it was flushed (or
//!    rebuilt) under.
//!
//! ## Write path
//!
//! `put` inserts into the buffer. When the buffer rejects the entry the
//! buffer is flushed: its content becomes a table stamped with the current
//! generation, appended to level 0 if level 0 has room, or otherwise handed
//! to [`compaction::compact`] together with level 0. The generation then
//! advances, the buffer is cleared and the pending entry is re-inserted.
//! Compaction runs inline; there are no background threads.
//!
//! ## Read path
//!
//! `get` consults the buffer first. On a miss every table of every level is
//! consulted through its range check, bloom filter and binary search, and
//! the copy with the greatest generation is read from disk. The tombstone
//! value reads as "not found" wherever it wins.
//!
//! ## Concurrency Model
//!
//! All engine state sits behind one `Arc<Mutex<EngineInner>>`; every
//! operation holds the lock for its full duration.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, info, trace};

use crate::compaction::{self, CompactionError};
use crate::levels::{self, LevelError, LevelIndex};
use crate::memtable::{BufferLimits, Memtable};
use crate::sstable::{self, SSTableError, TOMBSTONE};

#[cfg(test)]
mod tests;

/// Default maximum serialized table size (2 MiB).
pub const DEFAULT_TABLE_SIZE_LIMIT: usize = 2 * 1024 * 1024;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the SSTable subsystem.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Error originating from the level index.
    #[error("Level error: {0}")]
    Level(#[from] LevelError),

    /// Error raised during compaction.
    #[error("Compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request can never succeed with this configuration.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal invariant violation (poisoned lock, unexpected state, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration for an [`Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max serialized size (bytes) of any table, flushed or rebuilt.
    pub table_size_limit: usize,

    /// Optional cap on the number of entries per table.
    pub max_entries_per_table: Option<usize>,

    /// Drop tombstones during compaction when nothing deeper holds the key.
    pub purge_tombstones: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            table_size_limit: DEFAULT_TABLE_SIZE_LIMIT,
            max_entries_per_table: None,
            purge_tombstones: true,
        }
    }
}

impl EngineConfig {
    /// Size limits applied to the write buffer and to compaction rebuilds.
    pub fn limits(&self) -> BufferLimits {
        BufferLimits {
            table_size_limit: self.table_size_limit,
            max_entries: self.max_entries_per_table,
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Generation the next flushed table will be stamped with.
    pub generation: u64,
    /// Entries currently held by the write buffer.
    pub buffered_entries: usize,
    /// Projected serialized size of the write buffer in bytes.
    pub buffered_bytes: usize,
    /// Number of tables per level, level 0 first.
    pub level_tables: Vec<usize>,
    /// Generation stamp of every table, per level, in key order for levels ≥ 1.
    pub table_generations: Vec<Vec<u64>>,
}

#[derive(Debug)]
struct EngineInner {
    /// Ordered write buffer.
    buffer: Memtable,

    /// Resident table indexes, per level.
    levels: LevelIndex,

    /// Stamp of the next flushed table.
    generation: u64,

    /// Path where engine is mounted.
    data_dir: PathBuf,

    config: EngineConfig,
}

/// The LSM storage engine handle.
///
/// Thread-safe: can be cloned and shared across threads via the internal
/// `Arc<Mutex<_>>`.
#[derive(Debug)]
pub struct Engine {
    inner: Arc<Mutex<EngineInner>>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Engine {
    // --------------------------------------------------------------------------------------------
    // Lock helper
    // --------------------------------------------------------------------------------------------

    fn lock(&self) -> Result<MutexGuard<'_, EngineInner>, EngineError> {
        self.inner
            .lock()
            .map_err(|_| EngineError::Internal("Mutex poisoned".into()))
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Opens (or creates) an engine rooted at the given directory.
    ///
    /// Existing level directories are loaded and validated; the generation
    /// counter resumes one past the highest generation found on disk.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let base = path.as_ref();
        fs::create_dir_all(base)?;

        let levels = LevelIndex::open(base)?;
        let generation = levels.max_generation().map_or(1, |g| g + 1);

        info!(
            path = %base.display(),
            generation,
            levels = ?levels.table_counts(),
            "engine opened"
        );

        let inner = EngineInner {
            buffer: Memtable::new(config.limits()),
            levels,
            generation,
            data_dir: base.to_path_buf(),
            config,
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Flushes any buffered entries so that they survive a reopen.
    pub fn close(&self) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        let flushed = Self::flush_inner(&mut inner)?;
        info!(
            path = %inner.data_dir.display(),
            flushed,
            "engine closed"
        );
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Public API
    // --------------------------------------------------------------------------------------------

    /// Inserts or overwrites `key`.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidArgument`] if `value` cannot fit into a table
    /// holding only this entry.
    pub fn put(&self, key: u64, value: &[u8]) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        Self::put_inner(&mut inner, key, value)
    }

    /// Returns the current value for `key`, or `None` if absent or deleted.
    pub fn get(&self, key: u64) -> Result<Option<Vec<u8>>, EngineError> {
        let inner = self.lock()?;
        Self::get_inner(&inner, key)
    }

    /// Deletes `key`, returning whether it existed.
    pub fn del(&self, key: u64) -> Result<bool, EngineError> {
        let mut inner = self.lock()?;
        if Self::get_inner(&inner, key)?.is_none() {
            trace!(key, "del: key absent");
            return Ok(false);
        }
        Self::put_inner(&mut inner, key, TOMBSTONE)?;
        trace!(key, "del: tombstone written");
        Ok(true)
    }

    /// Discards every entry: buffer, all level files and directories.
    ///
    /// The generation counter restarts at 1.
    pub fn reset(&self) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        inner.buffer.reset();
        inner.levels.reset()?;
        inner.generation = 1;
        info!(path = %inner.data_dir.display(), "engine reset");
        Ok(())
    }

    /// Forces the write buffer into level 0. Returns `false` if it was empty.
    pub fn flush(&self) -> Result<bool, EngineError> {
        let mut inner = self.lock()?;
        Self::flush_inner(&mut inner)
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self.lock()?;
        Ok(EngineStats {
            generation: inner.generation,
            buffered_entries: inner.buffer.len(),
            buffered_bytes: inner.buffer.serialized_size(),
            level_tables: inner.levels.table_counts(),
            table_generations: (0..inner.levels.depth())
                .map(|level| {
                    inner
                        .levels
                        .level(level)
                        .iter()
                        .map(|t| t.generation())
                        .collect()
                })
                .collect(),
        })
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn put_inner(inner: &mut EngineInner, key: u64, value: &[u8]) -> Result<(), EngineError> {
        if !inner.config.limits().admits(value.len()) {
            return Err(EngineError::InvalidArgument(format!(
                "value of {} bytes does not fit into a table of at most {} bytes",
                value.len(),
                inner.config.table_size_limit
            )));
        }

        trace!(key, len = value.len(), "put");
        if inner.buffer.add_entry(key, value) {
            return Ok(());
        }

        Self::flush_inner(inner)?;
        if !inner.buffer.add_entry(key, value) {
            return Err(EngineError::Internal(format!(
                "empty write buffer rejected key {key}"
            )));
        }
        Ok(())
    }

    fn get_inner(inner: &EngineInner, key: u64) -> Result<Option<Vec<u8>>, EngineError> {
        if let Some(value) = inner.buffer.search(key) {
            trace!(key, "get: buffer hit");
            return Ok((!sstable::is_tombstone(value)).then(|| value.to_vec()));
        }

        let Some(hit) = inner.levels.lookup(key) else {
            trace!(key, "get: miss");
            return Ok(None);
        };
        trace!(
            key,
            level = hit.level,
            file_id = hit.file_id,
            generation = hit.generation,
            "get: table hit"
        );
        let value = inner.levels.read(&hit)?;
        Ok((!sstable::is_tombstone(&value)).then_some(value))
    }

    /// Turns the buffer into a table and places it. No-op when empty.
    fn flush_inner(inner: &mut EngineInner) -> Result<bool, EngineError> {
        if inner.buffer.is_empty() {
            return Ok(false);
        }

        let table = inner.buffer.to_table(inner.generation)?;
        let entries = table.len();

        if inner.levels.level(0).len() < levels::capacity(0) {
            inner.levels.push(0, table)?;
            debug!(
                generation = inner.generation,
                entries,
                "buffer flushed to level 0"
            );
        } else {
            let report = compaction::compact(&mut inner.levels, table, &inner.config)?;
            debug!(
                generation = inner.generation,
                entries,
                ?report,
                "buffer flushed through compaction"
            );
        }

        inner.generation += 1;
        inner.buffer.reset();
        Ok(true)
    }
}
