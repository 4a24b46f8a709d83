//! # Compaction Module
//!
//! Leveled compaction with cascading overflow.
//!
//! Compaction runs when a buffer flush finds level 0 full. The flushed
//! table (the *overflow*) and every table of level 0 form the initial
//! *working set*; the loop then pushes the working set one level down at a
//! time until every level is within capacity:
//!
//! 1. Compute the working set's aggregate `[min, max]` key span.
//! 2. Select the tables of `next = source + 1` whose range intersects it.
//! 3. K-way merge working set and selected tables: per key, the greatest
//!    generation wins; ties go to the working set.
//! 4. Filter the merged stream:
//!    - an entry whose key still lives in a resident table shallower than
//!      `next` (and outside the working set) is dropped, because that
//!      shallower copy is newer;
//!    - a tombstone is dropped when purging is enabled and no table deeper
//!      than `next` holds the key.
//! 5. Rebuild the survivors into tables through the write buffer's
//!    accept/reject contract. Every rebuilt table is stamped with the
//!    overflow's generation.
//! 6. Place them:
//!    - `next` missing → create it (only if anything survived), done;
//!    - the splice fits `capacity(next)` → replace the selected run (or
//!      insert at the key-ordered position), done;
//!    - otherwise splice anyway, then evict the `excess` tables of `next`
//!      with the lowest `(generation, position)` into a new working set and
//!      repeat with `source = next`.
//!
//!    After each placement the consumed working-set tables are removed from
//!    the source level.
//!
//! The loop terminates: levels strictly increase and a missing level
//! absorbs the whole working set.

mod merge;

#[cfg(test)]
mod tests;

pub use merge::MergeIterator;

use tracing::{debug, info};

use crate::engine::EngineConfig;
use crate::levels::{self, LevelError, LevelIndex};
use crate::memtable::Memtable;
use crate::sstable::{self, SSTable, SSTableError};

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors raised while compacting.
#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    #[error("Level error: {0}")]
    Level(#[from] LevelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violation, e.g. an entry rejected by an empty buffer.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Report
// ------------------------------------------------------------------------------------------------

/// What one compaction did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Deepest level that received rebuilt tables.
    pub deepest_level: usize,

    /// Number of merge rounds (levels written).
    pub rounds: usize,

    /// Entries written into rebuilt tables.
    pub entries_written: usize,

    /// Older copies discarded by the merge.
    pub superseded: usize,

    /// Entries dropped because a shallower resident table holds the key.
    pub shadowed: usize,

    /// Tombstones dropped because nothing deeper can hold the key.
    pub tombstones_purged: usize,

    /// Tables written across all rounds.
    pub tables_written: usize,
}

// ------------------------------------------------------------------------------------------------
// Driver
// ------------------------------------------------------------------------------------------------

/// Compacts level 0 together with `overflow` into the deeper levels.
pub fn compact(
    levels: &mut LevelIndex,
    overflow: SSTable,
    config: &EngineConfig,
) -> Result<CompactionReport, CompactionError> {
    let stamp = overflow.generation();
    let mut report = CompactionReport::default();

    let mut source = 0;
    let mut consumed: Vec<u64> = levels.level(0).iter().map(|t| t.file_id()).collect();
    let mut working = (0..consumed.len())
        .map(|pos| levels.load_table(0, pos))
        .collect::<Result<Vec<_>, _>>()?;
    working.push(overflow);

    loop {
        let next = source + 1;
        let (min, max) = span(&working)?;
        let overlapped = levels.overlapping(next, min, max);

        let mut inputs = working;
        for pos in overlapped.clone() {
            inputs.push(levels.load_table(next, pos)?);
        }
        let rebuilt = rebuild(levels, &inputs, source, next, &consumed, stamp, config, &mut report)?;
        drop(inputs);

        report.rounds += 1;
        report.tables_written += rebuilt.len();
        let rebuilt_count = rebuilt.len();

        if next >= levels.depth() {
            if !rebuilt.is_empty() {
                levels.ensure_level(next)?;
                levels.splice(next, 0..0, rebuilt)?;
                report.deepest_level = next;
            }
            levels.remove(source, &consumed)?;
            info!(
                level = next,
                rebuilt = rebuilt_count,
                consumed = consumed.len(),
                "compaction placed tables into new level"
            );
            return Ok(report);
        }

        let new_len = levels.level(next).len() - overlapped.len() + rebuilt_count;
        levels.splice(next, overlapped.clone(), rebuilt)?;
        levels.remove(source, &consumed)?;
        report.deepest_level = next;

        let cap = levels::capacity(next);
        if new_len <= cap {
            info!(
                level = next,
                overlapped = overlapped.len(),
                rebuilt = rebuilt_count,
                tables = new_len,
                "compaction placed tables"
            );
            return Ok(report);
        }

        let excess = new_len - cap;
        let evicted = pick_evictions(levels, next, excess);
        info!(
            level = next,
            overlapped = overlapped.len(),
            rebuilt = rebuilt_count,
            tables = new_len,
            capacity = cap,
            evicted = evicted.len(),
            "level over capacity, cascading"
        );

        working = evicted
            .iter()
            .map(|&pos| levels.load_table(next, pos))
            .collect::<Result<Vec<_>, _>>()?;
        consumed = evicted
            .iter()
            .map(|&pos| levels.level(next)[pos].file_id())
            .collect();
        source = next;
    }
}

/// Positions of the `excess` tables with the lowest `(generation, position)`,
/// returned in key order.
fn pick_evictions(levels: &LevelIndex, level: usize, excess: usize) -> Vec<usize> {
    let tables = levels.level(level);
    let mut order: Vec<usize> = (0..tables.len()).collect();
    order.sort_by_key(|&pos| (tables[pos].generation(), pos));
    order.truncate(excess);
    order.sort_unstable();
    order
}

/// Aggregate `[min, max]` key span of the working set.
fn span(working: &[SSTable]) -> Result<(u64, u64), CompactionError> {
    let min = working.iter().map(|t| t.index().min_key()).min();
    let max = working.iter().map(|t| t.index().max_key()).max();
    min.zip(max)
        .ok_or_else(|| CompactionError::Internal("empty working set".into()))
}

/// Merges `inputs`, filters the stream and splits it into tables.
#[allow(clippy::too_many_arguments)]
fn rebuild(
    levels: &LevelIndex,
    inputs: &[SSTable],
    source: usize,
    next: usize,
    consumed: &[u64],
    stamp: u64,
    config: &EngineConfig,
    report: &mut CompactionReport,
) -> Result<Vec<SSTable>, CompactionError> {
    let mut buffer = Memtable::new(config.limits());
    let mut out = Vec::new();
    let mut merge = MergeIterator::new(inputs);
    let mut shadowed = 0;
    let mut purged = 0;
    let mut written = 0;

    for entry in merge.by_ref() {
        if levels.shadowed(entry.key, next, source, consumed) {
            shadowed += 1;
            continue;
        }
        if config.purge_tombstones
            && sstable::is_tombstone(entry.value)
            && !levels.held_deeper(next, entry.key)
        {
            purged += 1;
            continue;
        }
        if !buffer.add_entry(entry.key, entry.value) {
            out.push(buffer.to_table(stamp)?);
            buffer.reset();
            if !buffer.add_entry(entry.key, entry.value) {
                return Err(CompactionError::Internal(format!(
                    "entry for key {} ({} bytes) does not fit an empty table",
                    entry.key,
                    entry.value.len()
                )));
            }
        }
        written += 1;
    }
    if !buffer.is_empty() {
        out.push(buffer.to_table(stamp)?);
    }

    debug!(
        source,
        next,
        inputs = inputs.len(),
        written,
        superseded = merge.superseded(),
        shadowed,
        purged,
        tables = out.len(),
        "merge finished"
    );

    report.entries_written += written;
    report.superseded += merge.superseded();
    report.shadowed += shadowed;
    report.tombstones_purged += purged;
    Ok(out)
}
