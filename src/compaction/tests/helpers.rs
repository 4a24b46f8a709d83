use crate::engine::EngineConfig;
use crate::levels::LevelIndex;
use crate::sstable::{SSTable, TableBuilder};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Rebuilt tables hold at most `n` entries.
pub fn config_with_cap(n: usize) -> EngineConfig {
    init_tracing();
    EngineConfig {
        max_entries_per_table: Some(n),
        ..EngineConfig::default()
    }
}

/// Table stamped `generation` with explicit values.
pub fn table_with(generation: u64, entries: &[(u64, &[u8])]) -> SSTable {
    let mut b = TableBuilder::new(generation);
    for (k, v) in entries {
        b.add(*k, v).unwrap();
    }
    b.finish().unwrap()
}

/// Table stamped `generation` whose value for `k` is `"<generation>:<k>"`.
pub fn table(generation: u64, keys: &[u64]) -> SSTable {
    let mut b = TableBuilder::new(generation);
    for &k in keys {
        b.add(k, format!("{generation}:{k}").as_bytes()).unwrap();
    }
    b.finish().unwrap()
}

pub fn value(generation: u64, key: u64) -> Vec<u8> {
    format!("{generation}:{key}").into_bytes()
}

/// Value `get` would observe through the level index alone.
pub fn read(levels: &LevelIndex, key: u64) -> Option<Vec<u8>> {
    let hit = levels.lookup(key)?;
    Some(levels.read(&hit).unwrap())
}

/// Key ranges of `level`, in order.
pub fn ranges(levels: &LevelIndex, level: usize) -> Vec<(u64, u64)> {
    levels
        .level(level)
        .iter()
        .map(|t| (t.min_key(), t.max_key()))
        .collect()
}
