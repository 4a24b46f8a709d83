//! # Level Index
//!
//! The resident index of every table on disk, grouped by level.
//!
//! ```text
//! <root>/level-0/0.sst 1.sst            capacity 2, ranges may overlap
//! <root>/level-1/0.sst … 3.sst          capacity 4, disjoint, key-ordered
//! <root>/level-2/0.sst … 7.sst          capacity 8, disjoint, key-ordered
//! …                                      capacity 2^(L+1)
//! ```
//!
//! Each level is a `Vec<TableIndex>` whose order matches the file names
//! `0..n-1` in the level directory. Every change to a level goes through
//! [`LevelIndex::commit`], which applies it to disk as one reversible batch
//! (see [`layout`]) and only then swaps the in-memory vector.
//!
//! ## Lookup
//!
//! [`LevelIndex::lookup`] scans every table of every level, shallowest
//! first. Tables whose key range excludes the key or whose bloom filter
//! rejects it are skipped; the rest are binary searched. The hit with the
//! strictly greatest generation wins, so among equal generations the
//! shallower table is preferred.

pub mod layout;

#[cfg(test)]
mod tests;

pub use layout::Slot;

use std::{
    fs,
    io,
    ops::Range,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::sstable::{self, SSTable, SSTableError, TableIndex, ValueHandle};

use layout::{TABLE_EXT, table_file};

/// Prefix of every level directory name.
pub const LEVEL_DIR_PREFIX: &str = "level-";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by level index operations.
#[derive(Debug, Error)]
pub enum LevelError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error reading or writing a table.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// On-disk layout or requested layout violates level invariants.
    #[error("Corrupt level layout: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Maximum number of tables level `level` holds after a compaction cycle.
pub fn capacity(level: usize) -> usize {
    if level == 0 {
        2
    } else {
        u32::try_from(level + 1)
            .ok()
            .and_then(|shift| 1usize.checked_shl(shift))
            .unwrap_or(usize::MAX)
    }
}

/// Directory of level `level` under `root`.
pub fn level_dir(root: &Path, level: usize) -> PathBuf {
    root.join(format!("{LEVEL_DIR_PREFIX}{level}"))
}

fn parse_level_dir(name: &str) -> Option<usize> {
    name.strip_prefix(LEVEL_DIR_PREFIX)?.parse().ok()
}

fn parse_table_file(name: &str) -> Option<u64> {
    name.strip_suffix(TABLE_EXT)?.strip_suffix('.')?.parse().ok()
}

/// Where the freshest copy of a key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub level: usize,
    pub file_id: u64,
    pub generation: u64,
    pub handle: ValueHandle,
}

// ------------------------------------------------------------------------------------------------
// LevelIndex
// ------------------------------------------------------------------------------------------------

/// Per-level table indexes plus the directory they live in.
#[derive(Debug)]
pub struct LevelIndex {
    root: PathBuf,
    levels: Vec<Vec<TableIndex>>,
}

impl LevelIndex {
    /// Opens the level directories under `root`, creating `level-0`.
    ///
    /// Every existing `level-N` directory is loaded: staged and parked
    /// leftovers are removed, table files must be numbered
    /// contiguously from 0, every index must pass validation, and levels
    /// ≥ 1 must hold disjoint, key-ordered tables.
    pub fn open(root: &Path) -> Result<Self, LevelError> {
        fs::create_dir_all(level_dir(root, 0))?;

        let mut depth = 1;
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(level) = entry.file_name().to_str().and_then(parse_level_dir) {
                depth = depth.max(level + 1);
            }
        }

        let mut levels = Vec::with_capacity(depth);
        for level in 0..depth {
            let dir = level_dir(root, level);
            fs::create_dir_all(&dir)?;
            levels.push(Self::load_level(&dir, level)?);
        }

        let index = Self {
            root: root.to_path_buf(),
            levels,
        };
        info!(
            root = %root.display(),
            depth = index.depth(),
            tables = ?index.table_counts(),
            "level index loaded"
        );
        Ok(index)
    }

    fn load_level(dir: &Path, level: usize) -> Result<Vec<TableIndex>, LevelError> {
        let swept = layout::sweep_leftovers(dir)?;
        if swept > 0 {
            warn!(level, swept, "removed staged or parked leftovers");
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            match path.file_name().and_then(|s| s.to_str()).and_then(parse_table_file) {
                Some(id) => ids.push(id),
                None => warn!(path = %path.display(), "ignoring unexpected file in level directory"),
            }
        }
        ids.sort_unstable();

        if let Some((pos, id)) = ids.iter().enumerate().find(|(pos, id)| **id != *pos as u64) {
            return Err(LevelError::Corrupt(format!(
                "{}: expected table {pos}, found {id}",
                dir.display()
            )));
        }

        let mut tables = Vec::with_capacity(ids.len());
        for id in ids {
            tables.push(sstable::load_index(&table_file(dir, id), id)?);
        }

        if level > 0 {
            if let Some(w) = tables.windows(2).find(|w| w[0].max_key() >= w[1].min_key()) {
                return Err(LevelError::Corrupt(format!(
                    "{}: tables {} and {} overlap or are out of order",
                    dir.display(),
                    w[0].file_id(),
                    w[1].file_id()
                )));
            }
        }
        Ok(tables)
    }

    /// Number of levels that exist.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Tables of `level`, empty if the level does not exist.
    pub fn level(&self, level: usize) -> &[TableIndex] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn table_counts(&self) -> Vec<usize> {
        self.levels.iter().map(Vec::len).collect()
    }

    /// Highest generation stamped on any resident table.
    pub fn max_generation(&self) -> Option<u64> {
        self.levels
            .iter()
            .flatten()
            .map(TableIndex::generation)
            .max()
    }

    /// Path of table `file_id` in `level`.
    pub fn table_path(&self, level: usize, file_id: u64) -> PathBuf {
        table_file(&level_dir(&self.root, level), file_id)
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Finds the copy of `key` in the table with the greatest generation.
    pub fn lookup(&self, key: u64) -> Option<Hit> {
        let mut best: Option<Hit> = None;
        for (level, tables) in self.levels.iter().enumerate() {
            for table in tables {
                let Some(handle) = table.locate(key) else {
                    continue;
                };
                if best.is_none_or(|b| table.generation() > b.generation) {
                    best = Some(Hit {
                        level,
                        file_id: table.file_id(),
                        generation: table.generation(),
                        handle,
                    });
                }
            }
        }
        best
    }

    /// Reads the value a [`Hit`] points at.
    pub fn read(&self, hit: &Hit) -> Result<Vec<u8>, LevelError> {
        let path = self.table_path(hit.level, hit.file_id);
        Ok(sstable::read_value(&path, hit.handle)?)
    }

    /// Loads table `pos` of `level` completely into memory.
    pub fn load_table(&self, level: usize, pos: usize) -> Result<SSTable, LevelError> {
        let index = self.level(level).get(pos).ok_or_else(|| {
            LevelError::Corrupt(format!("level {level} has no table at position {pos}"))
        })?;
        let path = self.table_path(level, index.file_id());
        let blob = sstable::read_value_blob(&path, index)?;
        Ok(SSTable::new(index.clone(), blob)?)
    }

    /// Positions of the tables in `level` whose range intersects `[min, max]`.
    ///
    /// Only meaningful for levels ≥ 1, where tables are disjoint and
    /// key-ordered, so the overlap is one contiguous run. When nothing
    /// overlaps, the returned range is empty and starts at the key-ordered
    /// insertion point.
    pub fn overlapping(&self, level: usize, min: u64, max: u64) -> Range<usize> {
        let tables = self.level(level);
        let start = tables.partition_point(|t| t.max_key() < min);
        let len = tables[start..]
            .iter()
            .take_while(|t| t.overlaps(min, max))
            .count();
        start..start + len
    }

    /// Whether a table shallower than `below` holds `key`, ignoring the
    /// tables of `skip_level` listed in `skip_ids`.
    pub fn shadowed(&self, key: u64, below: usize, skip_level: usize, skip_ids: &[u64]) -> bool {
        self.levels
            .iter()
            .take(below)
            .enumerate()
            .any(|(level, tables)| {
                tables.iter().any(|t| {
                    !(level == skip_level && skip_ids.contains(&t.file_id())) && t.contains(key)
                })
            })
    }

    /// Whether any table deeper than `level` holds `key`.
    pub fn held_deeper(&self, level: usize, key: u64) -> bool {
        self.levels
            .iter()
            .skip(level + 1)
            .flatten()
            .any(|t| t.contains(key))
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Creates every level up to and including `level`.
    pub fn ensure_level(&mut self, level: usize) -> Result<(), LevelError> {
        while self.levels.len() <= level {
            let dir = level_dir(&self.root, self.levels.len());
            fs::create_dir_all(&dir)?;
            debug!(level = self.levels.len(), "level created");
            self.levels.push(Vec::new());
        }
        Ok(())
    }

    /// Replaces the layout of `level` with `slots` as one batch.
    pub fn commit(&mut self, level: usize, slots: Vec<Slot>) -> Result<(), LevelError> {
        let current = self
            .levels
            .get(level)
            .ok_or_else(|| LevelError::Corrupt(format!("level {level} does not exist")))?;
        let dir = level_dir(&self.root, level);
        let layout = layout::commit(&dir, current, slots)?;
        self.levels[level] = layout;
        Ok(())
    }

    /// Replaces the tables at `range` of `level` with `fresh`.
    pub fn splice(
        &mut self,
        level: usize,
        range: Range<usize>,
        fresh: Vec<SSTable>,
    ) -> Result<(), LevelError> {
        let len = self.level(level).len();
        if range.start > range.end || range.end > len {
            return Err(LevelError::Corrupt(format!(
                "splice range {range:?} out of bounds for level {level} of {len} tables"
            )));
        }
        let mut slots: Vec<Slot> = (0..range.start).map(Slot::Keep).collect();
        slots.extend(fresh.into_iter().map(Slot::Fresh));
        slots.extend((range.end..len).map(Slot::Keep));
        self.commit(level, slots)
    }

    /// Appends `table` at the end of `level`.
    pub fn push(&mut self, level: usize, table: SSTable) -> Result<(), LevelError> {
        let len = self.level(level).len();
        self.splice(level, len..len, vec![table])
    }

    /// Removes the tables of `level` whose file id is in `ids`.
    pub fn remove(&mut self, level: usize, ids: &[u64]) -> Result<(), LevelError> {
        let slots = self
            .level(level)
            .iter()
            .enumerate()
            .filter(|(_, t)| !ids.contains(&t.file_id()))
            .map(|(pos, _)| Slot::Keep(pos))
            .collect();
        self.commit(level, slots)
    }

    /// Deletes every level directory and starts over with an empty level 0.
    pub fn reset(&mut self) -> Result<(), LevelError> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let is_level = entry.file_type()?.is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .and_then(parse_level_dir)
                    .is_some();
            if is_level {
                fs::remove_dir_all(entry.path())?;
            }
        }
        fs::create_dir_all(level_dir(&self.root, 0))?;
        self.levels = vec![Vec::new()];
        Ok(())
    }
}
