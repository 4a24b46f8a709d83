//! Durability across close → reopen.
//!
//! Closing flushes the buffer; reopening reloads every level and resumes
//! the generation counter past the highest stamp on disk.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::engine::tests::helpers::*;
    use crate::engine::{Engine, EngineError};
    use crate::levels::level_dir;
    use std::fs;
    use tempfile::TempDir;

    /// # Scenario
    /// Data written before close is readable after reopen.
    #[test]
    fn recovery__data_survives_close_reopen() {
        let tmp = TempDir::new().unwrap();

        {
            let engine = Engine::open(tmp.path(), buffer_only_config()).unwrap();
            engine.put(1, b"one").unwrap();
            engine.put(2, b"two").unwrap();
            engine.close().unwrap();
        }

        let engine = reopen(tmp.path());
        assert_eq!(engine.get(1).unwrap(), Some(b"one".to_vec()));
        assert_eq!(engine.get(2).unwrap(), Some(b"two".to_vec()));
    }

    /// # Scenario
    /// The generation counter resumes one past the highest stamp.
    #[test]
    fn recovery__generation_resumes() {
        let tmp = TempDir::new().unwrap();

        let before = {
            let engine = Engine::open(tmp.path(), entries_config(4)).unwrap();
            for key in 0..50 {
                engine.put(key, &val(key, 0)).unwrap();
            }
            engine.close().unwrap();
            engine.stats().unwrap().generation
        };

        let engine = reopen(tmp.path());
        assert_eq!(engine.stats().unwrap().generation, before);
    }

    /// # Scenario
    /// Writes after reopen supersede values written before it.
    ///
    /// # Actions
    /// 1. Write 60 keys, close.
    /// 2. Reopen, overwrite the first 30, delete keys 50..60, close.
    /// 3. Reopen and read everything.
    #[test]
    fn recovery__newer_writes_win_after_reopen() {
        let tmp = TempDir::new().unwrap();

        {
            let engine = reopen(tmp.path());
            for key in 0..60 {
                engine.put(key, &val(key, 0)).unwrap();
            }
            engine.close().unwrap();
        }
        {
            let engine = reopen(tmp.path());
            for key in 0..30 {
                engine.put(key, &val(key, 1)).unwrap();
            }
            for key in 50..60 {
                assert!(engine.del(key).unwrap());
            }
            engine.close().unwrap();
        }

        let engine = reopen(tmp.path());
        for key in 0..60 {
            let expected = match key {
                0..30 => Some(val(key, 1)),
                30..50 => Some(val(key, 0)),
                _ => None,
            };
            assert_eq!(engine.get(key).unwrap(), expected, "key {key}");
        }
        assert_within_capacity(&engine);
    }

    /// # Scenario
    /// A reopen of an empty directory starts at generation 1.
    #[test]
    fn recovery__empty_directory() {
        let tmp = TempDir::new().unwrap();
        let engine = reopen(&tmp.path().join("nested").join("db"));
        let stats = engine.stats().unwrap();
        assert_eq!(stats.generation, 1);
        assert_eq!(stats.level_tables, vec![0]);
    }

    /// # Scenario
    /// A damaged table is reported on open instead of serving bad data.
    #[test]
    fn recovery__corrupt_table_fails_open() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = reopen(tmp.path());
            engine.put(1, b"one").unwrap();
            engine.close().unwrap();
        }

        let path = level_dir(tmp.path(), 0).join("0.sst");
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        let err = Engine::open(tmp.path(), entries_config(4)).unwrap_err();
        assert!(matches!(err, EngineError::Level(_)), "{err:?}");
    }
}
