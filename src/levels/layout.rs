//! Batched, reversible commits of one level's on-disk layout.
//!
//! A level directory always holds `0.sst … (n-1).sst`, matching the
//! in-memory order of its tables. Changing a level (appending a flushed
//! table, splicing rebuilt tables, removing consumed ones) generally
//! renumbers several files, so the change is applied as one batch:
//!
//! 1. Every fresh table is written and synced as `staged-<pos>.tmp`.
//! 2. Every existing file that does not stay at its own position is parked
//!    as `<id>.sst.old`.
//! 3. Parked and staged files are renamed to their final `<pos>.sst`.
//! 4. Parked files that were not reused (dropped tables) are deleted.
//!
//! Renames from steps 2 and 3 are recorded in a [`RenameJournal`]. If any
//! of them fails, the journal undoes the completed renames in reverse order
//! and the staged files are removed, leaving the directory as it was.
//! Failing to delete a leftover file in step 4 is logged and ignored; those
//! files are swept on the next open.
//!
//! A process crash in the middle of a batch is not recovered. Between steps
//! 2 and 3 a parked `<id>.sst.old` can be the only copy of a live table, and
//! the sweep on the next open deletes it. Such a level then either fails the
//! contiguity check or silently loses that table.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, error, warn};

use crate::sstable::{self, SSTable, TableIndex};

use super::LevelError;

/// Extension of committed table files.
pub const TABLE_EXT: &str = "sst";

/// Suffix of parked files awaiting their final name or deletion.
pub const PARKED_SUFFIX: &str = ".sst.old";

/// Extension of staged (not yet committed) files.
pub const STAGED_EXT: &str = "tmp";

pub(crate) fn table_file(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.{TABLE_EXT}"))
}

fn parked_file(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}{PARKED_SUFFIX}"))
}

fn staged_file(dir: &Path, pos: usize) -> PathBuf {
    dir.join(format!("staged-{pos}.{STAGED_EXT}"))
}

// ------------------------------------------------------------------------------------------------
// Slot
// ------------------------------------------------------------------------------------------------

/// Content of one position in a level's new layout.
#[derive(Debug)]
pub enum Slot {
    /// The table currently at this old position.
    Keep(usize),

    /// A table that is not on disk yet.
    Fresh(SSTable),
}

// ------------------------------------------------------------------------------------------------
// RenameJournal
// ------------------------------------------------------------------------------------------------

/// Completed renames, undone in reverse on failure.
#[derive(Debug, Default)]
pub(crate) struct RenameJournal {
    done: Vec<(PathBuf, PathBuf)>,
}

impl RenameJournal {
    fn rename(&mut self, from: PathBuf, to: PathBuf) -> Result<(), LevelError> {
        fs::rename(&from, &to)?;
        self.done.push((from, to));
        Ok(())
    }

    fn rollback(self) {
        for (from, to) in self.done.into_iter().rev() {
            if let Err(e) = fs::rename(&to, &from) {
                error!(
                    from = %to.display(),
                    to = %from.display(),
                    %e,
                    "failed to undo rename during layout rollback"
                );
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// commit
// ------------------------------------------------------------------------------------------------

/// Rewrites `dir` so that it holds `slots` at positions `0..slots.len()`.
///
/// `current` is the level's present in-memory layout (table `i` stored as
/// `<current[i].file_id()>.sst`). On success the new in-memory layout is
/// returned with `file_id == position` for every table; on failure the
/// directory is restored and `current` stays valid.
pub(crate) fn commit(
    dir: &Path,
    current: &[TableIndex],
    slots: Vec<Slot>,
) -> Result<Vec<TableIndex>, LevelError> {
    let mut reused = vec![false; current.len()];
    for slot in &slots {
        if let Slot::Keep(old) = slot {
            if *old >= current.len() || reused[*old] {
                return Err(LevelError::Corrupt(format!(
                    "invalid layout: position {old} of a {}-table level kept twice or missing",
                    current.len()
                )));
            }
            reused[*old] = true;
        }
    }

    let staged = stage_fresh(dir, &slots)?;

    let mut journal = RenameJournal::default();
    if let Err(e) = apply_renames(dir, current, &slots, &mut journal) {
        journal.rollback();
        remove_files(&staged);
        return Err(e);
    }

    // Parked files nobody took over are dropped tables.
    let dropped: Vec<PathBuf> = current
        .iter()
        .zip(&reused)
        .filter(|(_, r)| !**r)
        .map(|(t, _)| parked_file(dir, t.file_id()))
        .collect();
    remove_files(&dropped);

    let mut layout = Vec::with_capacity(slots.len());
    for (pos, slot) in slots.into_iter().enumerate() {
        let mut index = match slot {
            Slot::Keep(old) => current[old].clone(),
            Slot::Fresh(table) => table.into_index(),
        };
        index.set_file_id(pos as u64);
        layout.push(index);
    }

    debug!(
        dir = %dir.display(),
        before = current.len(),
        after = layout.len(),
        dropped = dropped.len(),
        "level layout committed"
    );
    Ok(layout)
}

/// Writes every fresh slot as `staged-<pos>.tmp`.
fn stage_fresh(dir: &Path, slots: &[Slot]) -> Result<Vec<PathBuf>, LevelError> {
    let mut staged = Vec::new();
    for (pos, slot) in slots.iter().enumerate() {
        if let Slot::Fresh(table) = slot {
            let path = staged_file(dir, pos);
            // Record before writing so a half-written file is cleaned up too.
            staged.push(path.clone());
            if let Err(e) = sstable::write_table_file(&path, table) {
                remove_files(&staged);
                return Err(e.into());
            }
        }
    }
    Ok(staged)
}

fn apply_renames(
    dir: &Path,
    current: &[TableIndex],
    slots: &[Slot],
    journal: &mut RenameJournal,
) -> Result<(), LevelError> {
    let mut stays = vec![false; current.len()];
    for (pos, slot) in slots.iter().enumerate() {
        if let Slot::Keep(old) = slot {
            if current[*old].file_id() == pos as u64 {
                stays[*old] = true;
            }
        }
    }

    for (table, _) in current.iter().zip(&stays).filter(|(_, s)| !**s) {
        let id = table.file_id();
        journal.rename(table_file(dir, id), parked_file(dir, id))?;
    }

    for (pos, slot) in slots.iter().enumerate() {
        let target = table_file(dir, pos as u64);
        match slot {
            Slot::Keep(old) if stays[*old] => {}
            Slot::Keep(old) => {
                journal.rename(parked_file(dir, current[*old].file_id()), target)?;
            }
            Slot::Fresh(_) => journal.rename(staged_file(dir, pos), target)?,
        }
    }
    Ok(())
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), %e, "failed to remove file"),
        }
    }
}

/// Removes leftover staged and parked files.
///
/// Only safe after a commit that failed cleanly (step 4 cleanup); parked
/// files left by a crash before step 3 may still hold live tables.
pub(crate) fn sweep_leftovers(dir: &Path) -> Result<usize, LevelError> {
    let mut leftovers = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if name.ends_with(PARKED_SUFFIX) || name.ends_with(&format!(".{STAGED_EXT}")) {
            leftovers.push(path);
        }
    }
    remove_files(&leftovers);
    Ok(leftovers.len())
}
