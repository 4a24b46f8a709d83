//! Heap-based k-way merge over in-memory tables.
//!
//! Inputs are sorted tables, each with a single generation stamp. The
//! merge yields one entry per distinct key, in ascending key order. When
//! several inputs hold the same key, the one with the greatest generation
//! wins; equal generations fall back to the lower input position, so the
//! caller decides precedence by the order it passes the tables in. Losing
//! copies are skipped and counted in [`MergeIterator::superseded`].

use std::{cmp::Ordering, collections::BinaryHeap};

use crate::sstable::SSTable;

/// One surviving entry of the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merged<'a> {
    pub key: u64,
    pub value: &'a [u8],
    pub generation: u64,
}

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    key: u64,
    generation: u64,
    source: usize,
    pos: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: smallest key, then highest generation, then lowest
        // source pops first.
        other
            .key
            .cmp(&self.key)
            .then(self.generation.cmp(&other.generation))
            .then(other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges `tables` into one strictly ascending stream.
pub struct MergeIterator<'a> {
    tables: &'a [SSTable],
    heap: BinaryHeap<HeapEntry>,
    superseded: usize,
}

impl<'a> MergeIterator<'a> {
    pub fn new(tables: &'a [SSTable]) -> Self {
        let mut heap = BinaryHeap::with_capacity(tables.len());
        for (source, table) in tables.iter().enumerate() {
            if let Some(&key) = table.index().keys().first() {
                heap.push(HeapEntry {
                    key,
                    generation: table.generation(),
                    source,
                    pos: 0,
                });
            }
        }
        Self {
            tables,
            heap,
            superseded: 0,
        }
    }

    /// Number of older copies skipped so far.
    pub fn superseded(&self) -> usize {
        self.superseded
    }

    fn advance(&mut self, source: usize, pos: usize) {
        let table = &self.tables[source];
        if let Some(&key) = table.index().keys().get(pos + 1) {
            self.heap.push(HeapEntry {
                key,
                generation: table.generation(),
                source,
                pos: pos + 1,
            });
        }
    }
}

impl<'a> Iterator for MergeIterator<'a> {
    type Item = Merged<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let top = self.heap.pop()?;
        let tables = self.tables;
        let merged = Merged {
            key: top.key,
            value: tables[top.source].value_at(top.pos),
            generation: top.generation,
        };
        self.advance(top.source, top.pos);

        while self.heap.peek().is_some_and(|e| e.key == top.key) {
            if let Some(dup) = self.heap.pop() {
                self.superseded += 1;
                self.advance(dup.source, dup.pos);
            }
        }
        Some(merged)
    }
}
