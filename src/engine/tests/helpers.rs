use crate::engine::{Engine, EngineConfig};
use crate::levels::capacity;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Default 2 MiB tables: small tests never flush implicitly.
pub fn buffer_only_config() -> EngineConfig {
    init_tracing();
    EngineConfig::default()
}

/// Tables of at most `n` entries, so every `n + 1`-th new key flushes.
pub fn entries_config(n: usize) -> EngineConfig {
    init_tracing();
    EngineConfig {
        max_entries_per_table: Some(n),
        ..EngineConfig::default()
    }
}

/// Reopen with a 4-entry config.
pub fn reopen(path: &Path) -> Engine {
    Engine::open(path, entries_config(4)).unwrap()
}

/// Deterministic value for `key` at `version`.
pub fn val(key: u64, version: u32) -> Vec<u8> {
    format!("v{version}-{key}").into_bytes()
}

/// Asserts every level is within capacity.
pub fn assert_within_capacity(engine: &Engine) {
    let stats = engine.stats().unwrap();
    for (level, &count) in stats.level_tables.iter().enumerate() {
        assert!(
            count <= capacity(level),
            "level {level} holds {count} tables (capacity {})",
            capacity(level)
        );
    }
}
